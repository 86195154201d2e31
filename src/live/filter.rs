//! Read-side filters for the live tail.

use crate::core::{Malformed, MetricKind, MetricRecord, PerfError, Result};
use regex::Regex;

/// Kind selector accepted by the live endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KindFilter {
    #[default]
    All,
    WebVital,
    /// Resource records
    Source,
    Navigation,
}

impl KindFilter {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "" | "all" => Some(KindFilter::All),
            "webvital" => Some(KindFilter::WebVital),
            "source" => Some(KindFilter::Source),
            "navigation" => Some(KindFilter::Navigation),
            _ => None,
        }
    }

    pub fn admits(&self, kind: MetricKind) -> bool {
        match self {
            KindFilter::All => true,
            KindFilter::WebVital => kind == MetricKind::WebVital,
            KindFilter::Source => kind == MetricKind::Resource,
            KindFilter::Navigation => kind == MetricKind::Navigation,
        }
    }
}

/// Kind plus optional regexes over endpoint and site id
#[derive(Debug, Clone, Default)]
pub struct LiveFilter {
    pub kind: KindFilter,
    pub endpoint: Option<Regex>,
    pub site: Option<Regex>,
}

impl LiveFilter {
    pub fn all() -> Self {
        Self::default()
    }

    /// Build from raw query parameters; empty patterns are ignored
    pub fn parse(kind: Option<&str>, endpoint: Option<&str>, site: Option<&str>) -> Result<Self> {
        let kind = match kind {
            None => KindFilter::All,
            Some(raw) => KindFilter::parse(raw).ok_or_else(|| Malformed::UnknownType(raw.to_string()))?,
        };
        Ok(Self {
            kind,
            endpoint: compile(endpoint)?,
            site: compile(site)?,
        })
    }

    pub fn matches(&self, record: &MetricRecord) -> bool {
        if !self.kind.admits(record.kind) {
            return false;
        }
        if let Some(re) = &self.endpoint {
            if !re.is_match(&record.endpoint) {
                return false;
            }
        }
        if let Some(re) = &self.site {
            if !re.is_match(&record.site.to_string()) {
                return false;
            }
        }
        true
    }
}

fn compile(pattern: Option<&str>) -> Result<Option<Regex>> {
    match pattern.filter(|p| !p.is_empty()) {
        Some(p) => Regex::new(p).map(Some).map_err(PerfError::from),
        None => Ok(None),
    }
}
