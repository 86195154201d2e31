//! Beacon payloads and their normalization into [`MetricRecord`]s.

use crate::core::types::{MetricKind, MetricRecord, MimeCategory, RequestContext, ResourceDimensions};
use crate::core::Malformed;
use crate::receiver::catalog::{self, NAVIGATION_SCALARS, NAVIGATION_SPANS, RESOURCE_SCALARS, RESOURCE_SPANS};
use crate::receiver::endpoint::{mime_from_path, split_url, truncate_endpoint};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

const MAX_INITIATOR_LEN: usize = 32;

/// Raw beacon body as posted by the client script.
///
/// Every field is optional at the serde level so that a missing key is
/// reported as [`Malformed::MissingField`] rather than a parse error.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Beacon {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub resource: Option<String>,
    pub authenticated: Option<Value>,
    pub metrics: Option<Vec<BeaconMetric>>,
    pub initiator: Option<String>,
}

/// One entry of a beacon's `metrics` array
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BeaconMetric {
    pub name: Option<String>,
    pub value: Option<f64>,
    pub start: Option<f64>,
    pub duration: Option<f64>,
}

impl Beacon {
    /// Decode a JSON body
    pub fn from_slice(body: &[u8]) -> Result<Self, Malformed> {
        serde_json::from_slice(body).map_err(|e| Malformed::InvalidJson(e.to_string()))
    }

    /// Beacon kind, checked before sampling
    pub fn kind(&self) -> Result<MetricKind, Malformed> {
        let raw = self.kind.as_deref().ok_or(Malformed::MissingField("type"))?;
        MetricKind::parse(raw).ok_or_else(|| Malformed::UnknownType(raw.to_string()))
    }

    /// Untruncated path of the `resource` URL
    pub fn url_path(&self) -> Result<String, Malformed> {
        let resource = self
            .resource
            .as_deref()
            .filter(|r| !r.is_empty())
            .ok_or(Malformed::MissingField("resource"))?;
        Ok(split_url(resource)?.path)
    }

    fn authenticated(&self) -> Result<bool, Malformed> {
        match self.authenticated.as_ref() {
            None | Some(Value::Null) => Err(Malformed::MissingField("authenticated")),
            Some(Value::Bool(flag)) => Ok(*flag),
            Some(Value::Number(n)) => Ok(n.as_f64().map_or(false, |v| v != 0.0)),
            Some(Value::String(s)) if s == "0" || s == "1" => Ok(s == "1"),
            Some(_) => Err(Malformed::InvalidValue("authenticated".to_string())),
        }
    }
}

/// Turns beacons into bounded-field records
#[derive(Debug, Clone, Copy)]
pub struct RecordBuilder {
    page_path_cut: usize,
    resource_path_cut: usize,
}

impl RecordBuilder {
    pub fn new(page_path_cut: usize, resource_path_cut: usize) -> Self {
        Self {
            page_path_cut,
            resource_path_cut,
        }
    }

    /// Normalize a beacon observed on `date`.
    ///
    /// Pure: the only outcome of bad input is the returned [`Malformed`].
    pub fn build(
        &self,
        beacon: &Beacon,
        context: &RequestContext,
        date: NaiveDate,
    ) -> Result<MetricRecord, Malformed> {
        let kind = beacon.kind()?;
        let resource = beacon
            .resource
            .as_deref()
            .filter(|r| !r.is_empty())
            .ok_or(Malformed::MissingField("resource"))?;
        let authenticated = beacon.authenticated()?;
        let metrics = beacon
            .metrics
            .as_deref()
            .filter(|m| !m.is_empty())
            .ok_or(Malformed::MissingField("metrics"))?;

        let parts = split_url(resource)?;
        let (endpoint, resource_dims) = if kind.is_resource() {
            let mime_type = mime_from_path(&parts.path);
            let dims = ResourceDimensions {
                scheme: parts.scheme,
                authority: parts.authority,
                mime_type: mime_type.to_string(),
                mime_category: MimeCategory::from_mime(mime_type),
                initiator: normalize_initiator(beacon.initiator.as_deref()),
            };
            (truncate_endpoint(&parts.path, self.resource_path_cut), Some(dims))
        } else {
            (truncate_endpoint(&parts.path, self.page_path_cut), None)
        };

        let mut measures = BTreeMap::new();
        measures.insert("hit".to_string(), 1);
        for (idx, metric) in metrics.iter().enumerate() {
            let name = metric
                .name
                .as_deref()
                .filter(|n| !n.is_empty())
                .ok_or(Malformed::UnnamedMetric(idx))?;
            match kind {
                MetricKind::WebVital => add_vital(&mut measures, name, metric)?,
                MetricKind::Navigation => {
                    add_timing(&mut measures, kind, name, metric, NAVIGATION_SPANS, NAVIGATION_SCALARS)?
                },
                MetricKind::Resource => {
                    add_timing(&mut measures, kind, name, metric, RESOURCE_SPANS, RESOURCE_SCALARS)?
                },
            }
        }

        Ok(MetricRecord {
            kind,
            date,
            site: context.site,
            endpoint,
            authenticated,
            country: context.country.clone(),
            device: context.device,
            resource: resource_dims,
            measures,
        })
    }
}

fn add_vital(
    measures: &mut BTreeMap<String, i64>,
    name: &str,
    metric: &BeaconMetric,
) -> Result<(), Malformed> {
    let spec = catalog::vital(name).ok_or_else(|| Malformed::UnknownMetric {
        kind: MetricKind::WebVital.as_str(),
        name: name.to_string(),
    })?;
    let raw = checked(name, metric.value)?;

    add(measures, format!("{}_sum", spec.name), spec.scale(raw));
    match spec.bucket(raw) {
        Some(bucket) => add(measures, format!("{}_{}", spec.name, bucket.suffix()), 1),
        None => add(measures, format!("{}_hit", spec.name), 1),
    }
    Ok(())
}

fn add_timing(
    measures: &mut BTreeMap<String, i64>,
    kind: MetricKind,
    name: &str,
    metric: &BeaconMetric,
    spans: &[&str],
    scalars: &[&str],
) -> Result<(), Malformed> {
    if let Some(span) = spans.iter().find(|s| **s == name) {
        let start = checked(name, metric.start)?;
        let duration = checked(name, metric.duration)?;
        add(measures, format!("span_{}_start", span), scale_timing(start));
        add(measures, format!("span_{}_duration", span), scale_timing(duration));
        return Ok(());
    }
    if let Some(scalar) = scalars.iter().find(|s| **s == name) {
        let value = checked(name, metric.value)?;
        let stored = (value * catalog::scalar_ratio(scalar)).round() as i64;
        // Scalars are fixed per row, a repeated entry replaces the earlier one
        measures.insert((*scalar).to_string(), stored);
        return Ok(());
    }
    Err(Malformed::UnknownMetric {
        kind: kind.as_str(),
        name: name.to_string(),
    })
}

fn checked(name: &str, value: Option<f64>) -> Result<f64, Malformed> {
    let value = value.ok_or_else(|| Malformed::MissingValue(name.to_string()))?;
    if !value.is_finite() || value < 0.0 {
        return Err(Malformed::InvalidValue(name.to_string()));
    }
    Ok(value)
}

fn scale_timing(seconds: f64) -> i64 {
    (seconds * catalog::TIMING_RATIO).round() as i64
}

fn add(measures: &mut BTreeMap<String, i64>, column: String, delta: i64) {
    *measures.entry(column).or_insert(0) += delta;
}

fn normalize_initiator(raw: Option<&str>) -> String {
    let initiator: String = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("other")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .take(MAX_INITIATOR_LEN)
        .collect::<String>()
        .to_ascii_lowercase();
    if initiator.is_empty() {
        "other".to_string()
    } else {
        initiator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::DeviceClass;
    use serde_json::json;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
    }

    fn beacon(body: Value) -> Beacon {
        serde_json::from_value(body).unwrap()
    }

    fn build(body: Value) -> Result<MetricRecord, Malformed> {
        RecordBuilder::new(2, 1).build(&beacon(body), &RequestContext::default(), date())
    }

    #[test]
    fn test_lcp_scenario() {
        let record = build(json!({
            "type": "webvital",
            "resource": "https://example.com/blog/post-1",
            "authenticated": 0,
            "metrics": [{"name": "LCP", "value": 2.1}]
        }))
        .unwrap();

        assert_eq!(record.kind, MetricKind::WebVital);
        assert_eq!(record.endpoint, "/blog/post-1");
        assert!(!record.authenticated);
        assert_eq!(record.measure("hit"), 1);
        assert_eq!(record.measure("LCP_sum"), 2100);
        assert_eq!(record.measure("LCP_good"), 1);
        assert_eq!(record.measure("LCP_impr"), 0);
        assert!(record.resource.is_none());
    }

    #[test]
    fn test_unrated_vital_counts_hits() {
        let record = build(json!({
            "type": "webvital",
            "resource": "https://example.com/",
            "authenticated": true,
            "metrics": [{"name": "FP", "value": 0.4}, {"name": "CLS", "value": 0.3}]
        }))
        .unwrap();

        assert!(record.authenticated);
        assert_eq!(record.endpoint, "/");
        assert_eq!(record.measure("FP_sum"), 400);
        assert_eq!(record.measure("FP_hit"), 1);
        assert_eq!(record.measure("CLS_sum"), 30000);
        assert_eq!(record.measure("CLS_poor"), 1);
    }

    #[test]
    fn test_navigation_spans_and_scalars() {
        let record = build(json!({
            "type": "navigation",
            "resource": "https://example.com/shop/cart/item?id=3",
            "authenticated": 1,
            "metrics": [
                {"name": "dns", "start": 0.001, "duration": 0.012},
                {"name": "load", "value": 1.25},
                {"name": "redirects", "value": 2}
            ]
        }))
        .unwrap();

        assert_eq!(record.endpoint, "/shop/cart");
        assert_eq!(record.measure("span_dns_start"), 1);
        assert_eq!(record.measure("span_dns_duration"), 12);
        assert_eq!(record.measure("load"), 1250);
        assert_eq!(record.measure("redirects"), 2);
    }

    #[test]
    fn test_resource_dimensions() {
        let record = build(json!({
            "type": "resource",
            "resource": "https://cdn.example.com/assets/js/app.js",
            "authenticated": 0,
            "initiator": "Script",
            "metrics": [{"name": "size", "value": 5120}]
        }))
        .unwrap();

        let dims = record.resource.unwrap();
        assert_eq!(record.endpoint, "/assets");
        assert_eq!(dims.scheme, "https");
        assert_eq!(dims.authority, "cdn.example.com");
        assert_eq!(dims.mime_type, "text/javascript");
        assert_eq!(dims.mime_category, MimeCategory::Script);
        assert_eq!(dims.initiator, "script");
        assert_eq!(record.measures.get("size"), Some(&5120));
    }

    #[test]
    fn test_context_is_copied() {
        let context = RequestContext {
            site: 7,
            country: "DE".to_string(),
            device: DeviceClass::Mobile,
        };
        let record = RecordBuilder::new(3, 1)
            .build(
                &beacon(json!({
                    "type": "webvital",
                    "resource": "https://example.com/",
                    "authenticated": 0,
                    "metrics": [{"name": "TTFB", "value": 0.2}]
                })),
                &context,
                date(),
            )
            .unwrap();
        assert_eq!(record.site, 7);
        assert_eq!(record.country, "DE");
        assert_eq!(record.device, DeviceClass::Mobile);
    }

    #[test]
    fn test_rejections() {
        let base = json!({
            "type": "webvital",
            "resource": "https://example.com/",
            "authenticated": 0,
            "metrics": [{"name": "LCP", "value": 1.0}]
        });

        let cases = [
            ("type", Value::Null, Malformed::MissingField("type")),
            ("resource", Value::Null, Malformed::MissingField("resource")),
            ("authenticated", Value::Null, Malformed::MissingField("authenticated")),
            ("metrics", json!([]), Malformed::MissingField("metrics")),
            ("type", json!("paint"), Malformed::UnknownType("paint".to_string())),
            ("metrics", json!([{"value": 1.0}]), Malformed::UnnamedMetric(0)),
            ("metrics", json!([{"name": "LCP"}]), Malformed::MissingValue("LCP".to_string())),
            ("metrics", json!([{"name": "LCP", "value": -1.0}]), Malformed::InvalidValue("LCP".to_string())),
        ];

        for (field, value, expected) in cases {
            let mut body = base.clone();
            body[field] = value;
            assert_eq!(build(body).unwrap_err(), expected, "field {}", field);
        }
    }

    #[test]
    fn test_metric_must_match_kind() {
        let err = build(json!({
            "type": "resource",
            "resource": "https://example.com/a.png",
            "authenticated": 0,
            "metrics": [{"name": "redirects", "value": 1}]
        }))
        .unwrap_err();
        assert!(matches!(err, Malformed::UnknownMetric { kind: "resource", .. }));

        let err = build(json!({
            "type": "navigation",
            "resource": "https://example.com/",
            "authenticated": 0,
            "metrics": [{"name": "dns", "start": 0.1}]
        }))
        .unwrap_err();
        assert_eq!(err, Malformed::MissingValue("dns".to_string()));
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(Beacon::from_slice(b"{not json"), Err(Malformed::InvalidJson(_))));
        assert!(matches!(
            Beacon::from_slice(br#"{"metrics": [{"name": "LCP", "value": "fast"}]}"#),
            Err(Malformed::InvalidJson(_))
        ));
    }
}
