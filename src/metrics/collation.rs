//! Rolling-window collation of Web-Vital readings into gauges.

use super::GaugeExporter;
use crate::core::{MetricKind, MetricRecord};
use crate::receiver::catalog::{VitalSpec, WEB_VITALS};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Prefix of every published gauge
pub const GAUGE_PREFIX: &str = "perftail_webvital_";

#[derive(Debug, Clone, Copy)]
struct Sample {
    at: DateTime<Utc>,
    spec: &'static VitalSpec,
    value: i64,
}

/// Count and sum of one metric over the window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowStat {
    pub count: u64,
    pub sum: i64,
}

/// Sliding window of Web-Vital samples
pub struct Collator {
    window: Duration,
    samples: VecDeque<Sample>,
    exporter: Option<Arc<dyn GaugeExporter>>,
    publish: bool,
}

impl std::fmt::Debug for Collator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collator")
            .field("window", &self.window)
            .field("samples", &self.samples.len())
            .field("exporter", &self.exporter.is_some())
            .field("publish", &self.publish)
            .finish()
    }
}

impl Collator {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            samples: VecDeque::new(),
            exporter: None,
            publish: false,
        }
    }

    /// Publish gauges to `exporter` when `publish` is set
    pub fn with_exporter(mut self, exporter: Arc<dyn GaugeExporter>, publish: bool) -> Self {
        self.exporter = Some(exporter);
        self.publish = publish;
        self
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Evict stale samples, append the records' vitals, and publish averages.
    ///
    /// Returns the per-metric window statistics after the update.
    pub fn collate(&mut self, records: &[MetricRecord], now: DateTime<Utc>) -> BTreeMap<&'static str, WindowStat> {
        if let Ok(window) = chrono::Duration::from_std(self.window) {
            let horizon = now - window;
            while self.samples.front().map_or(false, |s| s.at < horizon) {
                self.samples.pop_front();
            }
        }

        for record in records.iter().filter(|r| r.kind == MetricKind::WebVital) {
            for spec in WEB_VITALS {
                if let Some(value) = record.measures.get(&format!("{}_sum", spec.name)) {
                    self.samples.push_back(Sample {
                        at: now,
                        spec,
                        value: *value,
                    });
                }
            }
        }

        let mut stats: BTreeMap<&'static str, WindowStat> = BTreeMap::new();
        for sample in &self.samples {
            let stat = stats.entry(sample.spec.name).or_default();
            stat.count += 1;
            stat.sum += sample.value;
        }

        if let (Some(exporter), true) = (&self.exporter, self.publish) {
            for spec in WEB_VITALS {
                if let Some(stat) = stats.get(spec.name) {
                    let value = gauge_value(spec, stat);
                    trace!(metric = spec.name, value, "Publishing gauge");
                    exporter.set_gauge(&gauge_name(spec), value);
                }
            }
        }
        stats
    }
}

/// `perftail_webvital_<metric>` in lowercase
pub fn gauge_name(spec: &VitalSpec) -> String {
    format!("{}{}", GAUGE_PREFIX, spec.name.to_ascii_lowercase())
}

/// Window mean in raw units, rounded to the metric's precision
pub fn gauge_value(spec: &VitalSpec, stat: &WindowStat) -> f64 {
    if stat.count == 0 {
        return 0.0;
    }
    let mean = stat.sum as f64 / (spec.ratio * stat.count as f64);
    let scale = 10f64.powi(spec.gauge_precision());
    (mean * scale).round() / scale
}
