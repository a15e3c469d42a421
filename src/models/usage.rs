//! Usage query parameters and raw usage responses

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Aggregation window of a usage query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Scale {
    #[default]
    #[serde(rename = "1S")]
    Second,
    #[serde(rename = "1MIN")]
    Minute,
    #[serde(rename = "15MIN")]
    Minutes15,
    #[serde(rename = "1H")]
    Hour,
    #[serde(rename = "1D")]
    Day,
    #[serde(rename = "1W")]
    Week,
    #[serde(rename = "1MON")]
    Month,
    #[serde(rename = "1Y")]
    Year,
}

impl Scale {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scale::Second => "1S",
            Scale::Minute => "1MIN",
            Scale::Minutes15 => "15MIN",
            Scale::Hour => "1H",
            Scale::Day => "1D",
            Scale::Week => "1W",
            Scale::Month => "1MON",
            Scale::Year => "1Y",
        }
    }
}

impl fmt::Display for Scale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scale {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        const ALL: [Scale; 8] = [
            Scale::Second,
            Scale::Minute,
            Scale::Minutes15,
            Scale::Hour,
            Scale::Day,
            Scale::Week,
            Scale::Month,
            Scale::Year,
        ];
        ALL.into_iter()
            .find(|scale| scale.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                format!(
                    "Unknown scale: {}. Use: 1S, 1MIN, 15MIN, 1H, 1D, 1W, 1MON, 1Y",
                    s
                )
            })
    }
}

/// Unit a usage query reports in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Unit {
    #[default]
    KilowattHours,
    Dollars,
    AmpHours,
    Trees,
    GallonsOfGas,
    MilesDriven,
    Carbon,
}

impl Unit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Unit::KilowattHours => "KilowattHours",
            Unit::Dollars => "Dollars",
            Unit::AmpHours => "AmpHours",
            Unit::Trees => "Trees",
            Unit::GallonsOfGas => "GallonsOfGas",
            Unit::MilesDriven => "MilesDriven",
            Unit::Carbon => "Carbon",
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Unit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "kwh" | "kilowatthours" => Ok(Unit::KilowattHours),
            "usd" | "dollars" => Ok(Unit::Dollars),
            "ah" | "amphours" => Ok(Unit::AmpHours),
            "trees" => Ok(Unit::Trees),
            "gas" | "gallonsofgas" => Ok(Unit::GallonsOfGas),
            "driven" | "milesdriven" => Ok(Unit::MilesDriven),
            "carbon" => Ok(Unit::Carbon),
            other => Err(format!(
                "Unknown unit: {}. Use: kwh, usd, ah, trees, gas, driven, carbon",
                other
            )),
        }
    }
}

/// One channel in a getDeviceListUsages reply; `usage` is null when the
/// backend had no reading for it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChannelUsage {
    pub name: Option<String>,
    pub usage: Option<f64>,
    pub device_gid: u64,
    pub channel_num: String,
    pub percentage: Option<f64>,
    pub nested_devices: Vec<DeviceUsage>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceUsage {
    pub device_gid: u64,
    pub channel_usages: Vec<ChannelUsage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceListUsages {
    pub instant: DateTime<Utc>,
    #[serde(default)]
    pub scale: String,
    #[serde(default)]
    pub devices: Vec<DeviceUsage>,
    #[serde(default)]
    pub energy_unit: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceListUsage {
    pub device_list_usages: DeviceListUsages,
}

/// Usage series for one channel from getChartUsage
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelUsageData {
    pub first_usage_instant: DateTime<Utc>,
    #[serde(default)]
    pub usage_list: Vec<Option<f64>>,
}
