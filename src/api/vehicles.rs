//! Connected vehicle endpoints

use serde_json::Value;

use super::client::VueClient;
use crate::error::{Error, Result};
use crate::models::{Vehicle, VehicleStatus};

const API_VEHICLES: &str = "customers/vehicles";

/// Vehicles linked to the customer account.
pub async fn get_vehicles(client: &VueClient) -> Result<Vec<Vehicle>> {
    client.get_json(API_VEHICLES).await
}

/// Latest status of a vehicle; `None` when the vendor has nothing to report.
pub async fn get_vehicle_status(
    client: &VueClient,
    vehicle_gid: u64,
) -> Result<Option<VehicleStatus>> {
    let path = format!("vehicles/v2/settings?vehicleGid={}", vehicle_gid);
    let data: Value = client.get_json(&path).await?;

    let empty = match &data {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    };
    if empty {
        return Ok(None);
    }
    serde_json::from_value(data)
        .map(Some)
        .map_err(|e| Error::InvalidResponse(format!("vehicle status: {}", e)))
}
