use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Longest endpoint path kept on a record, in characters.
pub const MAX_ENDPOINT_LEN: usize = 250;

/// Longest authority kept on a resource record, in characters.
pub const MAX_AUTHORITY_LEN: usize = 250;

/// Country code recorded when the host could not resolve one.
pub const UNKNOWN_COUNTRY: &str = "--";

/// Kind of beacon a record was built from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Page navigation timing
    Navigation,
    /// Sub-resource timing
    Resource,
    /// Core Web Vitals and paint metrics
    #[serde(rename = "webvital")]
    WebVital,
}

impl MetricKind {
    /// Parse the beacon `type` field
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "navigation" => Some(MetricKind::Navigation),
            "resource" => Some(MetricKind::Resource),
            "webvital" => Some(MetricKind::WebVital),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Navigation => "navigation",
            MetricKind::Resource => "resource",
            MetricKind::WebVital => "webvital",
        }
    }

    /// Records of this kind land in the resources table
    pub fn is_resource(&self) -> bool {
        matches!(self, MetricKind::Resource)
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse device class of the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    Desktop,
    Mobile,
    Tablet,
    Bot,
    Unknown,
}

impl DeviceClass {
    /// Classify a User-Agent header value
    pub fn from_user_agent(ua: &str) -> Self {
        let ua = ua.to_ascii_lowercase();
        if ua.is_empty() {
            DeviceClass::Unknown
        } else if ua.contains("bot") || ua.contains("spider") || ua.contains("crawl") {
            DeviceClass::Bot
        } else if ua.contains("ipad") || ua.contains("tablet") {
            DeviceClass::Tablet
        } else if ua.contains("mobi") || ua.contains("iphone") || ua.contains("android") {
            DeviceClass::Mobile
        } else {
            DeviceClass::Desktop
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceClass::Desktop => "desktop",
            DeviceClass::Mobile => "mobile",
            DeviceClass::Tablet => "tablet",
            DeviceClass::Bot => "bot",
            DeviceClass::Unknown => "unknown",
        }
    }
}

/// Closed set of MIME categories used for resource grouping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MimeCategory {
    Document,
    Script,
    Style,
    Image,
    Font,
    Media,
    Data,
    Unknown,
}

impl MimeCategory {
    /// Map a MIME type onto its category, falling back to `Unknown`
    pub fn from_mime(mime: &str) -> Self {
        let (major, minor) = mime.split_once('/').unwrap_or((mime, ""));
        match (major, minor) {
            ("text", "html") | ("application", "xhtml+xml") => MimeCategory::Document,
            ("text", "javascript") | ("application", "javascript") => MimeCategory::Script,
            ("text", "css") => MimeCategory::Style,
            ("image", _) => MimeCategory::Image,
            ("font", _) => MimeCategory::Font,
            ("audio", _) | ("video", _) => MimeCategory::Media,
            ("application", "json") | ("application", "xml") | ("text", "plain") | ("text", "xml") => {
                MimeCategory::Data
            },
            _ => MimeCategory::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MimeCategory::Document => "document",
            MimeCategory::Script => "script",
            MimeCategory::Style => "style",
            MimeCategory::Image => "image",
            MimeCategory::Font => "font",
            MimeCategory::Media => "media",
            MimeCategory::Data => "data",
            MimeCategory::Unknown => "unknown",
        }
    }
}

/// Per-request facts supplied by the host (site routing, GeoIP, UA parsing)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub site: u32,
    pub country: String,
    pub device: DeviceClass,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self {
            site: 1,
            country: UNKNOWN_COUNTRY.to_string(),
            device: DeviceClass::Unknown,
        }
    }
}

/// Dimensions only resource records carry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDimensions {
    pub scheme: String,
    pub authority: String,
    pub mime_type: String,
    pub mime_category: MimeCategory,
    pub initiator: String,
}

/// Canonical, bounded-field unit of capture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub kind: MetricKind,
    /// Day the record is aggregated under (UTC)
    pub date: NaiveDate,
    pub site: u32,
    pub endpoint: String,
    pub authenticated: bool,
    pub country: String,
    pub device: DeviceClass,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<ResourceDimensions>,
    /// Column name to integer delta, always including `hit`
    pub measures: BTreeMap<String, i64>,
}

impl MetricRecord {
    /// Check the invariants the aggregation store relies on.
    ///
    /// Returns the first violated invariant as a message.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if !self.endpoint.starts_with('/') {
            return Err(format!("endpoint '{}' is not absolute", self.endpoint));
        }
        if self.endpoint.chars().count() > MAX_ENDPOINT_LEN {
            return Err("endpoint exceeds 250 characters".to_string());
        }
        if self.measures.get("hit") != Some(&1) {
            return Err("record does not carry a single hit".to_string());
        }
        match (&self.resource, self.kind.is_resource()) {
            (Some(dims), true) => {
                if dims.authority.chars().count() > MAX_AUTHORITY_LEN {
                    return Err("authority exceeds 250 characters".to_string());
                }
            },
            (None, false) => {},
            (Some(_), false) => return Err(format!("{} record carries resource dimensions", self.kind)),
            (None, true) => return Err("resource record lacks resource dimensions".to_string()),
        }
        Ok(())
    }

    /// Look up a measure, treating absent columns as zero
    pub fn measure(&self, column: &str) -> i64 {
        self.measures.get(column).copied().unwrap_or(0)
    }
}
