//! Time-ordered keys for live entries.
//!
//! A key is the UTC timestamp `YYYYMMDDHHMMSSffffff` (20 digits), so string
//! order is chronological order. Keys issued by one process never repeat.

use chrono::{DateTime, TimeZone, Utc};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

/// Cursor value that means "no position yet"
pub const ZERO_CURSOR: &str = "0";

const KEY_LEN: usize = 20;
const KEY_FORMAT: &str = "%Y%m%d%H%M%S%6f";

static LAST_MICROS: AtomicI64 = AtomicI64::new(i64::MIN);

/// Ordering key of a live entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OrderKey(String);

impl OrderKey {
    /// Next key for the current instant
    pub fn next() -> Self {
        Self::next_at(Utc::now())
    }

    /// Next key at or after `now`, strictly greater than any key this
    /// process issued before
    pub fn next_at(now: DateTime<Utc>) -> Self {
        let wanted = now.timestamp_micros();
        let previous = LAST_MICROS
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(if wanted > last { wanted } else { last + 1 })
            })
            .unwrap_or(wanted);
        let issued = if wanted > previous { wanted } else { previous + 1 };
        Self::from_micros(issued)
    }

    /// Key for a given instant, without the uniqueness guard
    pub fn at(instant: DateTime<Utc>) -> Self {
        Self::from_micros(instant.timestamp_micros())
    }

    fn from_micros(micros: i64) -> Self {
        let secs = micros.div_euclid(1_000_000);
        let nanos = (micros.rem_euclid(1_000_000) * 1_000) as u32;
        match Utc.timestamp_opt(secs, nanos).single() {
            Some(instant) => OrderKey(instant.format(KEY_FORMAT).to_string()),
            None => OrderKey("0".repeat(KEY_LEN)),
        }
    }

    /// Accept a well-formed 20-digit key
    pub fn parse(value: &str) -> Option<Self> {
        (value.len() == KEY_LEN && value.bytes().all(|b| b.is_ascii_digit())).then(|| OrderKey(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `HH:MM:SS.ffffff` part of the key
    pub fn clock(&self) -> String {
        let k = &self.0;
        format!("{}:{}:{}.{}", &k[8..10], &k[10..12], &k[12..14], &k[14..20])
    }
}

impl fmt::Display for OrderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
