//! Fixed-width rendering of live entries.

use super::order_key::OrderKey;
use crate::core::{MetricKind, MetricRecord};
use crate::receiver::catalog::{TIMING_RATIO, WEB_VITALS};

const KIND_WIDTH: usize = 10;
const SITE_WIDTH: usize = 4;
const ENDPOINT_WIDTH: usize = 32;

/// `HH:MM:SS.ffffff kind site endpoint summary`, padded or cut to `width`
pub fn format_line(key: &OrderKey, record: &MetricRecord, width: usize) -> String {
    let line = format!(
        "{} {:<kw$} {:>sw$} {:<ew$} {}",
        key.clock(),
        record.kind.as_str(),
        record.site,
        fit(&record.endpoint, ENDPOINT_WIDTH),
        summary(record),
        kw = KIND_WIDTH,
        sw = SITE_WIDTH,
        ew = ENDPOINT_WIDTH,
    );
    fit(&line, width)
}

/// Pad with spaces or cut to exactly `width` characters
fn fit(text: &str, width: usize) -> String {
    let mut out: String = text.chars().take(width).collect();
    let len = out.chars().count();
    out.extend(std::iter::repeat(' ').take(width - len));
    out
}

fn seconds(stored: i64) -> String {
    format!("{:.3}s", stored as f64 / TIMING_RATIO)
}

fn summary(record: &MetricRecord) -> String {
    match record.kind {
        MetricKind::WebVital => WEB_VITALS
            .iter()
            .filter_map(|spec| {
                let column = format!("{}_sum", spec.name);
                record.measures.get(&column).map(|sum| {
                    if spec.ratio == TIMING_RATIO {
                        format!("{}={}", spec.name, seconds(*sum))
                    } else {
                        format!("{}={:.3}", spec.name, *sum as f64 / spec.ratio)
                    }
                })
            })
            .collect::<Vec<_>>()
            .join(" "),
        MetricKind::Navigation => {
            let mut parts = vec![format!("load={}", seconds(record.measure("load")))];
            if let Some(ttfb) = record.measures.get("span_response_start") {
                parts.push(format!("ttfb={}", seconds(*ttfb)));
            }
            if let Some(size) = record.measures.get("size") {
                parts.push(format!("size={}", size));
            }
            parts.join(" ")
        },
        MetricKind::Resource => {
            let origin = record
                .resource
                .as_ref()
                .map(|r| format!("{}://{} {}", r.scheme, r.authority, r.mime_category.as_str()))
                .unwrap_or_default();
            format!("{} load={}", origin, seconds(record.measure("load")))
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{DeviceClass, UNKNOWN_COUNTRY};
    use chrono::{NaiveDate, TimeZone, Utc};
    use std::collections::BTreeMap;

    #[test]
    fn test_vital_line() {
        let key = OrderKey::at(Utc.with_ymd_and_hms(2024, 6, 1, 8, 30, 0).unwrap());
        let record = MetricRecord {
            kind: MetricKind::WebVital,
            date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            site: 7,
            endpoint: "/checkout".to_string(),
            authenticated: false,
            country: UNKNOWN_COUNTRY.to_string(),
            device: DeviceClass::Mobile,
            resource: None,
            measures: BTreeMap::from([
                ("hit".to_string(), 1),
                ("LCP_sum".to_string(), 2100),
                ("CLS_sum".to_string(), 5000),
            ]),
        };
        let line = format_line(&key, &record, 120);
        assert_eq!(line.chars().count(), 120);
        assert!(line.starts_with("08:30:00.000000 webvital      7 /checkout"));
        assert!(line.contains("CLS=0.050 LCP=2.100s"));

        assert_eq!(format_line(&key, &record, 40).chars().count(), 40);
    }
}
