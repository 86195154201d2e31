//! Closed catalog of metric names a beacon may report.
//!
//! Beacon values are seconds (timings) or unitless scores. Stored values are
//! integers: `round(raw * ratio)`. Rating buckets compare the raw value.

/// Scale applied to every second-based timing
pub const TIMING_RATIO: f64 = 1000.0;

/// Scale applied to layout-shift scores
pub const SCORE_RATIO: f64 = 100_000.0;

/// How a Web Vital is rated
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rating {
    /// Two ascending thresholds in raw units
    Rated { good: f64, poor: f64 },
    /// Only `sum` and `hit` are tracked
    Unrated,
}

/// Rating bucket a rated value falls into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    Good,
    Impr,
    Poor,
}

impl Bucket {
    /// Column suffix used by the aggregate tables
    pub fn suffix(&self) -> &'static str {
        match self {
            Bucket::Good => "good",
            Bucket::Impr => "impr",
            Bucket::Poor => "poor",
        }
    }
}

/// Catalog entry for a Web Vital
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VitalSpec {
    pub name: &'static str,
    pub ratio: f64,
    pub rating: Rating,
}

impl VitalSpec {
    /// Integer value stored for a raw reading
    pub fn scale(&self, raw: f64) -> i64 {
        (raw * self.ratio).round() as i64
    }

    /// Bucket for a raw reading; `None` for unrated metrics.
    /// Thresholds are inclusive on the better side.
    pub fn bucket(&self, raw: f64) -> Option<Bucket> {
        match self.rating {
            Rating::Rated { good, poor } => Some(if raw <= good {
                Bucket::Good
            } else if raw <= poor {
                Bucket::Impr
            } else {
                Bucket::Poor
            }),
            Rating::Unrated => None,
        }
    }

    /// Number of decimals gauges of this metric are rounded to
    pub fn gauge_precision(&self) -> i32 {
        if self.ratio == SCORE_RATIO {
            2
        } else {
            3
        }
    }
}

pub const WEB_VITALS: &[VitalSpec] = &[
    VitalSpec { name: "CLS", ratio: SCORE_RATIO, rating: Rating::Rated { good: 0.1, poor: 0.25 } },
    VitalSpec { name: "FCP", ratio: TIMING_RATIO, rating: Rating::Rated { good: 1.8, poor: 3.0 } },
    VitalSpec { name: "FID", ratio: TIMING_RATIO, rating: Rating::Rated { good: 0.1, poor: 0.3 } },
    VitalSpec { name: "INP", ratio: TIMING_RATIO, rating: Rating::Rated { good: 0.2, poor: 0.5 } },
    VitalSpec { name: "LCP", ratio: TIMING_RATIO, rating: Rating::Rated { good: 2.5, poor: 4.0 } },
    VitalSpec { name: "TTFB", ratio: TIMING_RATIO, rating: Rating::Rated { good: 0.8, poor: 1.8 } },
    VitalSpec { name: "FP", ratio: TIMING_RATIO, rating: Rating::Unrated },
    VitalSpec { name: "TBT", ratio: TIMING_RATIO, rating: Rating::Unrated },
];

/// Spans reported by navigation beacons
pub const NAVIGATION_SPANS: &[&str] = &["redirect", "dns", "connect", "tls", "request", "response", "dom"];

/// Spans reported by resource beacons
pub const RESOURCE_SPANS: &[&str] = &["dns", "connect", "tls", "request", "response"];

/// Scalar fields reported by navigation beacons
pub const NAVIGATION_SCALARS: &[&str] = &["load", "redirects", "size", "cache"];

/// Scalar fields reported by resource beacons
pub const RESOURCE_SCALARS: &[&str] = &["load", "size", "cache"];

/// Find a Web Vital by name, ignoring ASCII case
pub fn vital(name: &str) -> Option<&'static VitalSpec> {
    WEB_VITALS.iter().find(|spec| spec.name.eq_ignore_ascii_case(name))
}

/// Scale for a scalar field; only `load` is a timing
pub fn scalar_ratio(name: &str) -> f64 {
    if name == "load" {
        TIMING_RATIO
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_insensitive() {
        assert_eq!(vital("lcp").map(|v| v.name), Some("LCP"));
        assert_eq!(vital("Cls").map(|v| v.name), Some("CLS"));
        assert!(vital("XYZ").is_none());
    }

    #[test]
    fn test_bucket_boundaries() {
        let lcp = vital("LCP").unwrap();
        assert_eq!(lcp.bucket(2.1), Some(Bucket::Good));
        assert_eq!(lcp.bucket(2.5), Some(Bucket::Good));
        assert_eq!(lcp.bucket(2.6), Some(Bucket::Impr));
        assert_eq!(lcp.bucket(4.0), Some(Bucket::Impr));
        assert_eq!(lcp.bucket(4.01), Some(Bucket::Poor));
        assert_eq!(vital("FP").unwrap().bucket(9.0), None);
    }

    #[test]
    fn test_scaling() {
        assert_eq!(vital("LCP").unwrap().scale(2.1), 2100);
        assert_eq!(vital("CLS").unwrap().scale(0.0123), 1230);
        assert_eq!(vital("CLS").unwrap().gauge_precision(), 2);
        assert_eq!(vital("INP").unwrap().gauge_precision(), 3);
    }
}
