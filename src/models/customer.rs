//! Customer account model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The logged-in customer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Customer {
    pub customer_gid: u64,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub created_at: Option<DateTime<Utc>>,
}
