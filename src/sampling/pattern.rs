//! Smart filter for self-inflicted and probe traffic.

use crate::core::{MetricRecord, Result};
use regex::RegexSet;

/// Endpoints that never describe real page performance
const BUILTIN_NOISE: &[&str] = &[
    r"^/favicon\.ico$",
    r"^/robots\.txt$",
    r"^/(health|healthz|ready|readyz|ping)$",
    r"^/\.well-known(/|$)",
];

/// Drops records whose endpoint matches a noise pattern
#[derive(Debug, Clone)]
pub struct NoiseFilter {
    patterns: RegexSet,
}

impl NoiseFilter {
    /// Built-in patterns plus the host's own beacon and live routes
    pub fn new(beacon_path: &str, live_path: &str) -> Result<Self> {
        let mut patterns: Vec<String> = BUILTIN_NOISE.iter().map(|p| (*p).to_string()).collect();
        for route in [beacon_path, live_path] {
            patterns.push(format!("^{}(/|$)", regex::escape(route.trim_end_matches('/'))));
        }
        Ok(Self {
            patterns: RegexSet::new(patterns)?,
        })
    }

    /// True when the record should be discarded
    pub fn is_noise(&self, record: &MetricRecord) -> bool {
        self.is_noise_path(&record.endpoint)
    }

    /// Match a full URL path, before any endpoint truncation
    pub fn is_noise_path(&self, path: &str) -> bool {
        self.patterns.is_match(path)
    }
}
