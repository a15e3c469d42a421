//! Multi-device usage with best-effort merging across retries
//!
//! getDeviceListUsages can answer 200 with null usage for some channels. The
//! query is retried and each attempt is merged into the best-known snapshot:
//! a device is replaced wholesale once its data is complete (or on the last
//! attempt), and a known reading is never regressed by a partial retry.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};

use super::client::VueClient;
use super::format_time;
use crate::error::Result;
use crate::models::{ChannelUsageData, DeviceListUsage, DeviceUsage, Scale, Unit};

/// Channels whose usage the chart endpoint does not populate.
const VIRTUAL_MAINS_CHANNELS: [&str; 2] = ["MainsFromGrid", "MainsToGrid"];

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelReading {
    pub name: Option<String>,
    /// `None` when the backend reported no value.
    pub usage: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceSnapshot {
    pub channels: BTreeMap<String, ChannelReading>,
}

impl DeviceSnapshot {
    /// Every reported channel has a value.
    pub fn is_complete(&self) -> bool {
        self.channels.values().all(|c| c.usage.is_some())
    }

    /// Reports at least every channel `other` knows about.
    fn covers(&self, other: &DeviceSnapshot) -> bool {
        other.channels.keys().all(|k| self.channels.contains_key(k))
    }

    /// Wholesale replacement by `self`, keeping channels `self` did not report.
    fn replacing(mut self, previous: DeviceSnapshot) -> DeviceSnapshot {
        for (channel, reading) in previous.channels {
            self.channels.entry(channel).or_insert(reading);
        }
        self
    }
}

/// Device gid -> channel number -> reading.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsageSnapshot {
    pub devices: BTreeMap<u64, DeviceSnapshot>,
    /// Requested devices no reply has reported yet.
    pub missing: BTreeSet<u64>,
}

impl UsageSnapshot {
    /// Flatten a usage reply, nested devices included, into a snapshot.
    pub fn from_response(response: &DeviceListUsage) -> Self {
        let usages = &response.device_list_usages;
        let mut snapshot = Self::default();
        for device in &usages.devices {
            snapshot.collect(device, usages.instant);
        }
        snapshot
    }

    fn collect(&mut self, device: &DeviceUsage, timestamp: DateTime<Utc>) {
        let entry = self.devices.entry(device.device_gid).or_default();
        for channel in &device.channel_usages {
            entry.channels.insert(
                channel.channel_num.clone(),
                ChannelReading {
                    name: channel.name.clone(),
                    usage: channel.usage,
                    timestamp,
                },
            );
        }
        for channel in &device.channel_usages {
            for nested in &channel.nested_devices {
                self.collect(nested, timestamp);
            }
        }
    }

    pub fn usage(&self, device_gid: u64, channel_num: &str) -> Option<f64> {
        self.devices
            .get(&device_gid)?
            .channels
            .get(channel_num)?
            .usage
    }

    /// Every requested device was reported and every channel has a value.
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty() && self.devices.values().all(DeviceSnapshot::is_complete)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evaluation {
    Complete,
    Partial,
}

/// Accumulates attempts into the best-known snapshot.
#[derive(Debug)]
pub struct UsageMerger {
    requested: Vec<u64>,
    best: UsageSnapshot,
    accepted: BTreeSet<u64>,
}

impl UsageMerger {
    pub fn new(requested: &[u64]) -> Self {
        Self {
            requested: requested.to_vec(),
            best: UsageSnapshot::default(),
            accepted: BTreeSet::new(),
        }
    }

    /// Merge one attempt.
    ///
    /// Complete devices are accepted and kept from then on. Partial devices
    /// only fill gaps until `final_attempt`, when they replace what is known
    /// (explicit nulls win, omitted channels are kept).
    pub fn absorb(&mut self, attempt: UsageSnapshot, final_attempt: bool) -> Evaluation {
        let mut complete = self
            .requested
            .iter()
            .all(|gid| attempt.devices.contains_key(gid) || self.accepted.contains(gid));

        for (gid, device) in attempt.devices {
            if self.accepted.contains(&gid) {
                continue;
            }

            let previous = self.best.devices.remove(&gid);
            let device_complete =
                device.is_complete() && previous.as_ref().map_or(true, |p| device.covers(p));

            let merged = if device_complete {
                self.accepted.insert(gid);
                device
            } else {
                complete = false;
                match previous {
                    Some(previous) if final_attempt => device.replacing(previous),
                    Some(previous) => previous,
                    None => device,
                }
            };
            self.best.devices.insert(gid, merged);
        }

        self.best.missing = self
            .requested
            .iter()
            .filter(|gid| !self.best.devices.contains_key(*gid))
            .copied()
            .collect();

        if complete {
            Evaluation::Complete
        } else {
            Evaluation::Partial
        }
    }

    pub fn snapshot(&self) -> &UsageSnapshot {
        &self.best
    }

    pub fn into_snapshot(self) -> UsageSnapshot {
        self.best
    }
}

enum MergeState {
    Querying { attempt: u32 },
    Evaluating { attempt: u32, snapshot: UsageSnapshot },
    Retrying { attempt: u32 },
    Done,
}

/// Usage of `device_gids` over `scale` ending at `instant`.
///
/// Partial data is retried on the client's backoff schedule and merged; the
/// result may still be incomplete after the last attempt. Only transport or
/// HTTP failures are errors.
pub async fn get_device_list_usage(
    client: &VueClient,
    device_gids: &[u64],
    instant: Option<DateTime<Utc>>,
    scale: Scale,
    unit: Unit,
) -> Result<UsageSnapshot> {
    let instant = instant.unwrap_or_else(Utc::now);
    let gids = device_gids
        .iter()
        .map(u64::to_string)
        .collect::<Vec<_>>()
        .join("+");
    let path = format!(
        "AppAPI?apiMethod=getDeviceListUsages&deviceGids={}&instant={}&scale={}&energyUnit={}",
        gids,
        format_time(instant),
        scale,
        unit
    );

    let policy = client.retry_policy();
    let mut merger = UsageMerger::new(device_gids);
    let mut state = MergeState::Querying { attempt: 1 };

    loop {
        state = match state {
            MergeState::Querying { attempt } => {
                let response: DeviceListUsage = client.get_json(&path).await?;
                MergeState::Evaluating {
                    attempt,
                    snapshot: UsageSnapshot::from_response(&response),
                }
            }
            MergeState::Evaluating { attempt, snapshot } => {
                let final_attempt = !policy.allows_retry_after(attempt);
                match merger.absorb(snapshot, final_attempt) {
                    Evaluation::Complete => MergeState::Done,
                    Evaluation::Partial if final_attempt => {
                        tracing::warn!(
                            attempt,
                            "Usage data still incomplete after {} attempts, returning best effort",
                            attempt
                        );
                        MergeState::Done
                    }
                    Evaluation::Partial => MergeState::Retrying { attempt },
                }
            }
            MergeState::Retrying { attempt } => {
                let delay = policy.delay_after(attempt);
                tracing::warn!(attempt, "Usage data incomplete, retrying in {:?}", delay);
                tokio::time::sleep(delay).await;
                MergeState::Querying {
                    attempt: attempt + 1,
                }
            }
            MergeState::Done => return Ok(merger.into_snapshot()),
        };
    }
}

/// Usage series for one channel between `start` and `end`.
pub async fn get_chart_usage(
    client: &VueClient,
    device_gid: u64,
    channel_num: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    scale: Scale,
    unit: Unit,
) -> Result<ChannelUsageData> {
    if VIRTUAL_MAINS_CHANNELS.contains(&channel_num) {
        return Ok(ChannelUsageData {
            first_usage_instant: start,
            usage_list: Vec::new(),
        });
    }

    let path = format!(
        "AppAPI?apiMethod=getChartUsage&deviceGid={}&channel={}&start={}&end={}&scale={}&energyUnit={}",
        device_gid,
        channel_num,
        format_time(start),
        format_time(end),
        scale,
        unit
    );
    client.get_json(&path).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::client::tests::{client_with_session, fast_retry};
    use crate::error::Error;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    const INSTANT: &str = "2024-03-01T12:00:00Z";

    fn channel(num: &str, usage: Option<f64>) -> Value {
        json!({ "name": format!("ch {}", num), "usage": usage, "channelNum": num, "nestedDevices": [] })
    }

    fn device(gid: u64, channels: Vec<Value>) -> Value {
        json!({ "deviceGid": gid, "channelUsages": channels })
    }

    fn reply(devices: Vec<Value>) -> Value {
        json!({
            "deviceListUsages": {
                "instant": INSTANT,
                "scale": "1MIN",
                "devices": devices,
                "energyUnit": "KilowattHours"
            }
        })
    }

    fn snapshot(devices: Vec<Value>) -> UsageSnapshot {
        let response: DeviceListUsage = serde_json::from_value(reply(devices)).unwrap();
        UsageSnapshot::from_response(&response)
    }

    #[test]
    fn test_flattens_nested_devices() {
        let mut mains = channel("1,2,3", Some(4.5));
        mains["nestedDevices"] = json!([device(7, vec![channel("1", None)])]);
        let snap = snapshot(vec![device(1, vec![mains, channel("4", Some(0.5))])]);

        assert_eq!(snap.devices.len(), 2);
        assert_eq!(snap.usage(1, "1,2,3"), Some(4.5));
        assert_eq!(snap.usage(1, "4"), Some(0.5));
        assert_eq!(snap.usage(7, "1"), None);
        assert!(snap.devices[&7].channels.contains_key("1"));
        assert!(!snap.is_complete());
        assert_eq!(
            snap.devices[&1].channels["4"].timestamp.to_rfc3339(),
            "2024-03-01T12:00:00+00:00"
        );
    }

    #[test]
    fn test_complete_first_attempt() {
        let mut merger = UsageMerger::new(&[1, 2]);
        let eval = merger.absorb(
            snapshot(vec![
                device(1, vec![channel("1", Some(1.0))]),
                device(2, vec![channel("1", Some(2.0))]),
            ]),
            false,
        );
        assert_eq!(eval, Evaluation::Complete);
        assert!(merger.snapshot().is_complete());
        assert_eq!(merger.snapshot().usage(2, "1"), Some(2.0));
    }

    #[test]
    fn test_partial_device_merged_from_later_attempt() {
        let mut merger = UsageMerger::new(&[1, 2]);

        let first = merger.absorb(
            snapshot(vec![
                device(1, vec![channel("1", Some(1.0)), channel("2", Some(1.5))]),
                device(2, vec![channel("x", None), channel("y", Some(3.0))]),
            ]),
            false,
        );
        assert_eq!(first, Evaluation::Partial);

        let second = merger.absorb(
            snapshot(vec![
                device(1, vec![channel("1", Some(9.0)), channel("2", Some(9.5))]),
                device(2, vec![channel("x", Some(12.3)), channel("y", Some(3.1))]),
            ]),
            false,
        );
        assert_eq!(second, Evaluation::Complete);

        let merged = merger.into_snapshot();
        // Device 1 was accepted from the first attempt.
        assert_eq!(merged.usage(1, "1"), Some(1.0));
        assert_eq!(merged.usage(1, "2"), Some(1.5));
        // Device 2 wholesale from the second.
        assert_eq!(merged.usage(2, "x"), Some(12.3));
        assert_eq!(merged.usage(2, "y"), Some(3.1));
    }

    #[test]
    fn test_known_value_survives_partial_retry() {
        let mut merger = UsageMerger::new(&[5]);
        merger.absorb(
            snapshot(vec![device(5, vec![channel("c", Some(5.0)), channel("d", None)])]),
            false,
        );

        // Retry omits channel c entirely.
        merger.absorb(snapshot(vec![device(5, vec![channel("d", Some(1.0))])]), false);
        assert_eq!(merger.snapshot().usage(5, "c"), Some(5.0));

        // Retry reports c as null.
        merger.absorb(
            snapshot(vec![device(5, vec![channel("c", None), channel("d", Some(1.0))])]),
            false,
        );
        assert_eq!(merger.snapshot().usage(5, "c"), Some(5.0));
    }

    #[test]
    fn test_final_attempt_omission_keeps_value() {
        let mut merger = UsageMerger::new(&[5]);
        merger.absorb(
            snapshot(vec![device(5, vec![channel("c", Some(5.0)), channel("d", None)])]),
            false,
        );

        let eval = merger.absorb(snapshot(vec![device(5, vec![channel("d", None)])]), true);
        assert_eq!(eval, Evaluation::Partial);
        assert_eq!(merger.snapshot().usage(5, "c"), Some(5.0));
        assert_eq!(merger.snapshot().usage(5, "d"), None);
    }

    #[test]
    fn test_final_attempt_explicit_null_replaces() {
        let mut merger = UsageMerger::new(&[5]);
        merger.absorb(
            snapshot(vec![device(5, vec![channel("c", Some(5.0)), channel("d", None)])]),
            false,
        );

        merger.absorb(
            snapshot(vec![device(5, vec![channel("c", None), channel("d", Some(2.0))])]),
            true,
        );
        let merged = merger.snapshot();
        assert_eq!(merged.usage(5, "c"), None);
        assert_eq!(merged.usage(5, "d"), Some(2.0));
        assert!(merged.devices[&5].channels.contains_key("c"));
    }

    #[test]
    fn test_accepted_device_never_regresses() {
        let mut merger = UsageMerger::new(&[1, 2]);
        merger.absorb(
            snapshot(vec![
                device(1, vec![channel("1", Some(1.0))]),
                device(2, vec![channel("1", None)]),
            ]),
            false,
        );

        // Final attempt loses device 1's reading; it stays accepted.
        merger.absorb(
            snapshot(vec![
                device(1, vec![channel("1", None)]),
                device(2, vec![channel("1", None)]),
            ]),
            true,
        );
        assert_eq!(merger.snapshot().usage(1, "1"), Some(1.0));
    }

    #[test]
    fn test_missing_requested_device_is_partial() {
        let mut merger = UsageMerger::new(&[1, 2]);
        let eval = merger.absorb(snapshot(vec![device(1, vec![channel("1", Some(1.0))])]), false);
        assert_eq!(eval, Evaluation::Partial);
        assert!(!merger.snapshot().is_complete());
        assert_eq!(merger.snapshot().missing, BTreeSet::from([2]));

        let eval = merger.absorb(snapshot(vec![device(2, vec![channel("1", Some(2.0))])]), false);
        assert_eq!(eval, Evaluation::Complete);
        assert_eq!(merger.snapshot().devices.len(), 2);
        assert!(merger.snapshot().missing.is_empty());
        assert!(merger.snapshot().is_complete());
    }

    fn scripted(replies: Vec<Value>) -> impl Fn(&Request) -> ResponseTemplate {
        let calls = AtomicUsize::new(0);
        move |_req: &Request| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            ResponseTemplate::new(200).set_body_json(&replies[n.min(replies.len() - 1)])
        }
    }

    #[tokio::test]
    async fn test_retries_until_complete() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/AppAPI"))
            .and(query_param("apiMethod", "getDeviceListUsages"))
            .and(query_param("scale", "1MIN"))
            .and(query_param("energyUnit", "KilowattHours"))
            .respond_with(scripted(vec![
                reply(vec![
                    device(10, vec![channel("1", Some(0.25))]),
                    device(20, vec![channel("x", None)]),
                ]),
                reply(vec![
                    device(10, vec![channel("1", Some(0.3))]),
                    device(20, vec![channel("x", Some(12.3))]),
                ]),
            ]))
            .expect(2)
            .mount(&server)
            .await;

        let (client, _) = client_with_session(&server, fast_retry(5), 3600).await;
        let usage = get_device_list_usage(&client, &[10, 20], None, Scale::Minute, Unit::KilowattHours)
            .await
            .unwrap();

        assert!(usage.is_complete());
        assert_eq!(usage.usage(10, "1"), Some(0.25));
        assert_eq!(usage.usage(20, "x"), Some(12.3));
    }

    #[tokio::test]
    async fn test_returns_best_effort_after_budget() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(scripted(vec![
                reply(vec![
                    device(10, vec![channel("1", Some(0.25))]),
                    device(20, vec![channel("x", None)]),
                ]),
                reply(vec![device(20, vec![channel("x", None)])]),
            ]))
            .expect(3)
            .mount(&server)
            .await;

        let (client, _) = client_with_session(&server, fast_retry(3), 3600).await;
        let usage = get_device_list_usage(&client, &[10, 20], None, Scale::Second, Unit::KilowattHours)
            .await
            .unwrap();

        assert!(!usage.is_complete());
        assert_eq!(usage.usage(10, "1"), Some(0.25));
        assert!(usage.devices[&20].channels["x"].usage.is_none());
    }

    #[tokio::test]
    async fn test_device_never_reported_is_incomplete() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply(vec![device(
                1,
                vec![channel("1", Some(1.0))],
            )])))
            .expect(4)
            .mount(&server)
            .await;

        let (client, _) = client_with_session(&server, fast_retry(4), 3600).await;
        let usage = get_device_list_usage(&client, &[1, 2], None, Scale::Minute, Unit::KilowattHours)
            .await
            .unwrap();

        assert!(!usage.is_complete());
        assert_eq!(usage.missing, BTreeSet::from([2]));
        assert_eq!(usage.usage(1, "1"), Some(1.0));
        assert!(!usage.devices.contains_key(&2));
    }

    #[tokio::test]
    async fn test_http_failure_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let (client, _) = client_with_session(&server, fast_retry(3), 3600).await;
        let err = get_device_list_usage(&client, &[10], None, Scale::Second, Unit::KilowattHours)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RequestRejected { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_virtual_mains_channel_skips_request() {
        let server = MockServer::start().await;
        let (client, _) = client_with_session(&server, fast_retry(1), 3600).await;

        let start: DateTime<Utc> = INSTANT.parse().unwrap();
        let data = get_chart_usage(&client, 1, "MainsFromGrid", start, start, Scale::Day, Unit::KilowattHours)
            .await
            .unwrap();
        assert!(data.usage_list.is_empty());
        assert_eq!(data.first_usage_instant, start);
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_chart_usage() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("apiMethod", "getChartUsage"))
            .and(query_param("deviceGid", "1"))
            .and(query_param("channel", "1,2,3"))
            .and(query_param("start", "2024-03-01T12:00:00Z"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "firstUsageInstant": INSTANT,
                "usageList": [1.5, null, 2.0]
            })))
            .mount(&server)
            .await;

        let (client, _) = client_with_session(&server, fast_retry(1), 3600).await;
        let start: DateTime<Utc> = INSTANT.parse().unwrap();
        let data = get_chart_usage(&client, 1, "1,2,3", start, start, Scale::Hour, Unit::KilowattHours)
            .await
            .unwrap();
        assert_eq!(data.usage_list, vec![Some(1.5), None, Some(2.0)]);
    }
}
