//! API client module for the Emporia energy API

pub mod client;
mod customer;
mod devices;
pub mod retry;
pub mod usage;
mod vehicles;

use chrono::{DateTime, SecondsFormat, Utc};

pub use client::{ClientOptions, VueClient, API_ROOT};
pub use customer::{down_for_maintenance, get_customer_details, MAINTENANCE_URL};
pub use devices::{
    get_channel_types, get_devices, get_devices_status, populate_device_properties,
    update_channel, update_charger, update_outlet,
};
pub use retry::RetryPolicy;
pub use usage::{get_chart_usage, get_device_list_usage, UsageMerger, UsageSnapshot};
pub use vehicles::{get_vehicle_status, get_vehicles};

/// Render an instant the way the API expects: UTC with a `Z` suffix.
pub(crate) fn format_time(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}
