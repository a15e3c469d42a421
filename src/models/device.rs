//! Device, outlet and charger models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Smart outlet state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Outlet {
    pub device_gid: u64,
    pub outlet_on: bool,
    pub load_gid: u64,
}

/// EV charger state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Charger {
    pub device_gid: u64,
    pub charger_on: bool,
    pub message: String,
    pub status: String,
    pub icon: String,
    pub icon_label: String,
    pub icon_detail_text: String,
    pub fault_text: String,
    pub charging_rate: f64,
    pub max_charging_rate: f64,
    pub off_peak_schedules_enabled: bool,
    pub load_gid: u64,
    pub debug_code: String,
    pub pro_control_code: String,
    pub breaker_pin: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceConnected {
    pub device_gid: u64,
    pub connected: bool,
    pub offline_since: Option<DateTime<Utc>>,
}

/// A measurement channel on a device
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Channel {
    pub device_gid: u64,
    pub name: Option<String>,
    pub channel_num: String,
    pub channel_multiplier: f64,
    pub channel_type_gid: Option<u64>,
}

/// Kind of load a channel can be assigned to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChannelType {
    pub channel_type_gid: u64,
    pub description: String,
    pub selectable: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LocationProperties {
    pub display_name: Option<String>,
    pub device_name: Option<String>,
    pub time_zone: Option<String>,
    pub zip_code: Option<String>,
}

/// A monitor, outlet or charger registered to the customer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VueDevice {
    pub device_gid: u64,
    pub manufacturer_device_id: String,
    pub model: String,
    pub firmware: String,
    pub parent_device_gid: Option<u64>,
    pub parent_channel_num: Option<String>,
    pub location_properties: LocationProperties,
    pub outlet: Option<Outlet>,
    pub ev_charger: Option<Charger>,
    pub device_connected: Option<DeviceConnected>,
    pub devices: Vec<VueDevice>,
    pub channels: Vec<Channel>,
}

impl VueDevice {
    /// Name shown in the app, falling back to the model.
    pub fn display_name(&self) -> &str {
        self.location_properties
            .device_name
            .as_deref()
            .or(self.location_properties.display_name.as_deref())
            .unwrap_or(&self.model)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CustomerDevices {
    pub customer_gid: u64,
    pub email: String,
    pub devices: Vec<VueDevice>,
}

/// Connectivity plus outlet and charger states
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DevicesStatus {
    pub devices_connected: Vec<DeviceConnected>,
    pub ev_chargers: Vec<Charger>,
    pub outlets: Vec<Outlet>,
}
