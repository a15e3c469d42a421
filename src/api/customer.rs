//! Customer and service status endpoints

use serde::Deserialize;

use super::client::VueClient;
use crate::error::{Error, Result};
use crate::models::Customer;

const API_CUSTOMER: &str = "customers";

pub const MAINTENANCE_URL: &str =
    "https://s3.amazonaws.com/com.emporiaenergy.manual.ota/maintenance/maintenance.json";

#[derive(Debug, Deserialize)]
struct MaintenanceNotice {
    msg: Option<String>,
}

/// Details of the logged-in customer.
pub async fn get_customer_details(client: &VueClient) -> Result<Customer> {
    client.get_json(API_CUSTOMER).await
}

/// Message of the public maintenance notice, if the API is down for maintenance.
///
/// Needs no session; a 404 means no notice is posted.
pub async fn down_for_maintenance(http: &reqwest::Client, url: &str) -> Result<Option<String>> {
    let resp = http.get(url).send().await?;
    let status = resp.status();
    if status == reqwest::StatusCode::NOT_FOUND {
        return Ok(None);
    }
    if status.is_server_error() {
        return Err(Error::ServerUnavailable {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }

    let text = resp.text().await?;
    if text.trim().is_empty() {
        return Ok(None);
    }
    let notice: MaintenanceNotice = serde_json::from_str(&text)
        .map_err(|e| Error::InvalidResponse(format!("maintenance notice: {}", e)))?;
    Ok(notice.msg)
}
