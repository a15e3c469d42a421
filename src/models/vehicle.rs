//! Connected vehicle models

use serde::{Deserialize, Serialize};

/// A vehicle linked to the customer account
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Vehicle {
    pub vehicle_gid: u64,
    pub vendor: String,
    pub api_id: String,
    pub display_name: String,
    pub load_gid: String,
    pub make: String,
    pub model: String,
    pub year: u32,
}

/// Charge state reported by the vehicle vendor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VehicleStatus {
    pub vehicle_gid: u64,
    pub vehicle_state: String,
    pub battery_level: f64,
    pub battery_range: f64,
    pub charging_state: String,
    pub charge_limit_percent: f64,
    pub minutes_to_full_charge: f64,
    pub charge_current_request: i64,
    pub charge_current_request_max: i64,
}
