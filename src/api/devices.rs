//! Device listing, channel settings and outlet/charger control

use super::client::VueClient;
use crate::error::Result;
use crate::models::{
    Channel, ChannelType, Charger, CustomerDevices, DevicesStatus, Outlet, VueDevice,
};

const API_CUSTOMER_DEVICES: &str = "customers/devices";
const API_GET_STATUS: &str = "customers/devices/status";
const API_CHANNEL_TYPES: &str = "devices/channels/channeltypes";
const API_OUTLET: &str = "devices/outlet";
const API_CHARGER: &str = "devices/evcharger";

/// All devices under the customer account.
pub async fn get_devices(client: &VueClient) -> Result<CustomerDevices> {
    client.get_json(API_CUSTOMER_DEVICES).await
}

/// Connectivity and outlet/charger states.
pub async fn get_devices_status(client: &VueClient) -> Result<DevicesStatus> {
    client.get_json(API_GET_STATUS).await
}

/// Location details of `device`, as a fresh device record.
pub async fn populate_device_properties(
    client: &VueClient,
    device: &VueDevice,
) -> Result<VueDevice> {
    let path = format!("devices/{}/locationProperties", device.device_gid);
    client.get_json(&path).await
}

/// Channel types a channel can be assigned.
pub async fn get_channel_types(client: &VueClient) -> Result<Vec<ChannelType>> {
    client.get_json(API_CHANNEL_TYPES).await
}

/// Save a channel's name, multiplier and type. An empty reply keeps `channel`.
pub async fn update_channel(client: &VueClient, channel: &Channel) -> Result<Channel> {
    let path = format!("devices/{}/channels", channel.device_gid);
    let updated: Option<Channel> = client.put_json(&path, channel).await?;
    Ok(updated.unwrap_or_else(|| channel.clone()))
}

/// Switch an outlet. `on` overrides the state carried in `outlet`.
///
/// Retried writes are not deduplicated by the client.
pub async fn update_outlet(client: &VueClient, outlet: &Outlet, on: Option<bool>) -> Result<Outlet> {
    let mut outlet = outlet.clone();
    if let Some(on) = on {
        outlet.outlet_on = on;
    }
    client.put_json(API_OUTLET, &outlet).await
}

/// Enable/disable a charger or change its rate. Arguments override `charger`.
pub async fn update_charger(
    client: &VueClient,
    charger: &Charger,
    on: Option<bool>,
    charge_rate: Option<f64>,
) -> Result<Charger> {
    let mut charger = charger.clone();
    if let Some(on) = on {
        charger.charger_on = on;
    }
    if let Some(rate) = charge_rate.filter(|r| *r > 0.0) {
        charger.charging_rate = rate;
    }
    client.put_json(API_CHARGER, &charger).await
}
