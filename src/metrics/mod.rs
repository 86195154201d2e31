//! Web-Vitals gauges.
//!
//! The collator keeps a rolling window of vital readings and publishes the
//! window averages through a [`GaugeExporter`].

pub mod collation;

pub use collation::{gauge_name, gauge_value, Collator, WindowStat, GAUGE_PREFIX};

use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Sink for published gauge values
pub trait GaugeExporter: Send + Sync {
    fn set_gauge(&self, name: &str, value: f64);
}

/// Exporter that keeps the latest value of every gauge in memory
#[derive(Debug, Default)]
pub struct InMemoryGauges {
    values: RwLock<BTreeMap<String, f64>>,
}

impl InMemoryGauges {
    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.read().get(name).copied()
    }

    pub fn snapshot(&self) -> BTreeMap<String, f64> {
        self.values.read().clone()
    }
}

impl GaugeExporter for InMemoryGauges {
    fn set_gauge(&self, name: &str, value: f64) {
        self.values.write().insert(name.to_string(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latest_value_wins() {
        let gauges = InMemoryGauges::default();
        gauges.set_gauge("perftail_webvital_lcp", 2.05);
        gauges.set_gauge("perftail_webvital_lcp", 1.9);
        assert_eq!(gauges.get("perftail_webvital_lcp"), Some(1.9));
        assert_eq!(gauges.snapshot().len(), 1);
    }
}
