//! Common test utilities and fixtures.

#![allow(dead_code)]

use chrono::NaiveDate;
use perftail_lib::core::config::LiveConfig;
use perftail_lib::core::{DeviceClass, MetricRecord, RequestContext};
use perftail_lib::receiver::{Beacon, RecordBuilder};
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;

pub fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
}

pub fn context() -> RequestContext {
    RequestContext {
        site: 1,
        country: "NL".to_string(),
        device: DeviceClass::Desktop,
    }
}

/// Web-Vitals beacon for `path` with one `(name, value)` pair per metric.
pub fn vital_beacon(path: &str, metrics: &[(&str, f64)]) -> Value {
    json!({
        "type": "webvital",
        "resource": format!("https://example.com{}", path),
        "authenticated": 0,
        "metrics": metrics
            .iter()
            .map(|(name, value)| json!({"name": name, "value": value}))
            .collect::<Vec<_>>(),
    })
}

pub fn resource_beacon(url: &str, load: f64) -> Value {
    json!({
        "type": "resource",
        "resource": url,
        "authenticated": 1,
        "initiator": "img",
        "metrics": [{"name": "load", "value": load}],
    })
}

/// Build a record through the production builder with default path cuts.
pub fn build(body: &Value, date: NaiveDate) -> MetricRecord {
    let beacon: Beacon = serde_json::from_value(body.clone()).unwrap();
    RecordBuilder::new(3, 1).build(&beacon, &context(), date).unwrap()
}

/// Small live configuration rooted at `dir`.
pub fn live_config(dir: &Path, capacity: usize) -> LiveConfig {
    LiveConfig {
        capacity,
        segment_bytes: 64 * 1024,
        shm_dir: dir.to_path_buf(),
        lock_retry_interval: Duration::from_millis(1),
        ..LiveConfig::default()
    }
}
