//! Shared-memory live tail.
//!
//! Every execution context (server, command line) owns one memory-mapped
//! segment holding a snapshot of its newest records keyed by [`OrderKey`].
//! Writers lock their own segment, merge and trim; readers lock each segment
//! in turn and merge the snapshots. When shared memory is unusable the tail
//! reports itself unavailable and every call is a no-op.

pub mod filter;
pub mod format;
pub mod lock;
pub mod order_key;
pub mod segment;

pub use filter::{KindFilter, LiveFilter};
pub use order_key::{OrderKey, ZERO_CURSOR};
pub use segment::{LiveContext, SharedSegment, Snapshot};

use crate::core::config::LiveConfig;
use crate::core::{MetricKind, MetricRecord, PerfError, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

/// One rendered entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveItem {
    #[serde(rename = "type")]
    pub kind: MetricKind,
    pub line: String,
}

/// Result of a cursor read
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LiveRead {
    /// Cursor to pass to the next read
    pub index: String,
    pub items: BTreeMap<String, LiveItem>,
}

impl LiveRead {
    fn empty(index: &str) -> Self {
        Self {
            index: index.to_string(),
            items: BTreeMap::new(),
        }
    }
}

/// Live ring buffer over the shared segments
#[derive(Debug)]
pub struct LiveTail {
    context: LiveContext,
    /// Segments of every context, own context first; empty when unavailable
    segments: Vec<(LiveContext, SharedSegment)>,
    capacity: usize,
    max_age: Duration,
    line_width: usize,
    max_items: usize,
}

impl LiveTail {
    /// Map the segments under `config.shm_dir`. Never fails; an unusable
    /// directory leaves the tail unavailable.
    pub fn open(config: &LiveConfig, context: LiveContext) -> Self {
        let segments = match Self::open_segments(config, context) {
            Ok(segments) => segments,
            Err(e) => {
                warn!(
                    dir = %config.shm_dir.display(),
                    category = e.category(),
                    "Live tail unavailable: {}",
                    e
                );
                Vec::new()
            },
        };
        Self {
            context,
            segments,
            capacity: config.capacity,
            max_age: config.max_age,
            line_width: config.line_width,
            max_items: config.max_items,
        }
    }

    /// A tail that never stores anything
    pub fn unavailable(config: &LiveConfig, context: LiveContext) -> Self {
        Self {
            context,
            segments: Vec::new(),
            capacity: config.capacity,
            max_age: config.max_age,
            line_width: config.line_width,
            max_items: config.max_items,
        }
    }

    fn open_segments(config: &LiveConfig, context: LiveContext) -> Result<Vec<(LiveContext, SharedSegment)>> {
        if !cfg!(unix) {
            return Err(PerfError::shared_memory("shared segments require a unix host"));
        }
        if !config.shm_dir.is_dir() {
            return Err(PerfError::shared_memory(format!(
                "{} is not a directory",
                config.shm_dir.display()
            )));
        }
        let anchor: PathBuf = config.anchor.clone().unwrap_or_else(|| config.shm_dir.clone());
        let mut order = vec![context];
        order.extend(LiveContext::ALL.iter().copied().filter(|c| *c != context));

        let mut segments = Vec::with_capacity(order.len());
        for ctx in order {
            let segment = SharedSegment::open(
                &config.shm_dir,
                &anchor,
                ctx,
                config.segment_bytes,
                config.lock_attempts,
                config.lock_retry_interval,
            )?;
            debug!(context = ?ctx, key = %format!("{:08x}", segment.key()), "Mapped live segment {}", segment.path().display());
            segments.push((ctx, segment));
        }
        Ok(segments)
    }

    pub fn available(&self) -> bool {
        !self.segments.is_empty()
    }

    pub fn context(&self) -> LiveContext {
        self.context
    }

    /// Append records to this context's segment.
    ///
    /// Returns the number written; 0 when unavailable or when the lock could
    /// not be taken.
    pub fn write(&self, records: &[MetricRecord]) -> Result<usize> {
        let Some((_, segment)) = self.segments.first() else {
            return Ok(0);
        };
        if records.is_empty() {
            return Ok(0);
        }

        let mut fresh = Vec::with_capacity(records.len());
        for record in records {
            fresh.push((OrderKey::next(), serde_json::to_string(record)?));
        }

        let guard = match segment.lock() {
            Ok(guard) => guard,
            Err(PerfError::LockContention { attempts }) => {
                debug!(attempts, "Dropping {} live entries: segment busy", fresh.len());
                return Ok(0);
            },
            Err(e) => return Err(e),
        };

        let mut snapshot = match segment.read(&guard) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(category = e.category(), "Resetting unreadable live segment: {}", e);
                Snapshot::new()
            },
        };
        let written = fresh.len();
        snapshot.extend(fresh.into_iter().map(|(key, json)| (key.as_str().to_string(), json)));

        let cutoff = chrono::Duration::from_std(self.max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
            .map(OrderKey::at);
        if let Some(cutoff) = cutoff {
            snapshot = snapshot.split_off(cutoff.as_str());
        }
        while snapshot.len() > self.capacity {
            snapshot.pop_first();
        }

        let dropped = segment.write(&guard, &mut snapshot)?;
        if dropped > 0 {
            debug!(dropped, "Live snapshot trimmed to fit its segment");
        }
        Ok(written)
    }

    /// Read entries newer than `cursor` from every context.
    ///
    /// A cursor of `"0"` (or anything that is not an order key) only
    /// establishes the position: no items, `index` set to the newest key.
    pub fn read(&self, cursor: &str, filter: &LiveFilter, limit: Option<usize>) -> Result<LiveRead> {
        if !self.available() {
            return Ok(LiveRead::empty(cursor));
        }
        let cursor = OrderKey::parse(cursor);
        let merged = self.merged_snapshot()?;

        let Some(cursor) = cursor else {
            let index = merged.keys().next_back().map_or(ZERO_CURSOR, String::as_str);
            return Ok(LiveRead::empty(index));
        };

        let newer: Vec<(String, String)> = merged
            .into_iter()
            .filter(|(key, _)| key.as_str() > cursor.as_str())
            .collect();
        let index = newer
            .last()
            .map_or_else(|| cursor.as_str().to_string(), |(key, _)| key.clone());

        let mut matched: Vec<(OrderKey, MetricRecord)> = Vec::new();
        for (key, json) in newer {
            let Some(key) = OrderKey::parse(&key) else { continue };
            match serde_json::from_str::<MetricRecord>(&json) {
                Ok(record) if filter.matches(&record) => matched.push((key, record)),
                Ok(_) => {},
                Err(e) => debug!("Skipping undecodable live entry {}: {}", key, e),
            }
        }

        let limit = limit.unwrap_or(self.max_items).min(self.max_items);
        let skip = matched.len().saturating_sub(limit);
        let items = matched
            .into_iter()
            .skip(skip)
            .map(|(key, record)| {
                let line = format::format_line(&key, &record, self.line_width);
                (
                    key.as_str().to_string(),
                    LiveItem {
                        kind: record.kind,
                        line,
                    },
                )
            })
            .collect();

        Ok(LiveRead { index, items })
    }

    /// Union of every segment's snapshot; busy segments are skipped
    fn merged_snapshot(&self) -> Result<Snapshot> {
        let mut merged = Snapshot::new();
        for (ctx, segment) in &self.segments {
            let guard = match segment.lock() {
                Ok(guard) => guard,
                Err(PerfError::LockContention { attempts }) => {
                    debug!(context = ?ctx, attempts, "Skipping busy live segment");
                    continue;
                },
                Err(e) => {
                    debug!(context = ?ctx, category = e.category(), "Skipping unlockable live segment: {}", e);
                    continue;
                },
            };
            match segment.read(&guard) {
                Ok(snapshot) => merged.extend(snapshot),
                Err(e) => debug!(context = ?ctx, "Skipping unreadable live segment: {}", e),
            }
        }
        Ok(merged)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::core::types::{DeviceClass, UNKNOWN_COUNTRY};
    use chrono::NaiveDate;

    fn config(dir: &std::path::Path) -> LiveConfig {
        LiveConfig {
            capacity: 5,
            segment_bytes: 64 * 1024,
            shm_dir: dir.to_path_buf(),
            ..LiveConfig::default()
        }
    }

    fn record(endpoint: &str) -> MetricRecord {
        MetricRecord {
            kind: MetricKind::Navigation,
            date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            site: 1,
            endpoint: endpoint.to_string(),
            authenticated: false,
            country: UNKNOWN_COUNTRY.to_string(),
            device: DeviceClass::Desktop,
            resource: None,
            measures: BTreeMap::from([("hit".to_string(), 1), ("load".to_string(), 1200)]),
        }
    }

    #[test]
    fn test_capacity_bound() {
        let dir = tempfile::tempdir().unwrap();
        let tail = LiveTail::open(&config(dir.path()), LiveContext::Server);
        assert!(tail.available());
        assert_eq!(tail.read(ZERO_CURSOR, &LiveFilter::all(), None).unwrap().index, ZERO_CURSOR);

        tail.write(&[record("/seed")]).unwrap();
        let start = tail.read(ZERO_CURSOR, &LiveFilter::all(), None).unwrap();
        assert!(start.items.is_empty());
        for i in 0..12 {
            tail.write(&[record(&format!("/p{}", i))]).unwrap();
        }
        let read = tail.read(&start.index, &LiveFilter::all(), None).unwrap();
        assert_eq!(read.items.len(), 5);
        assert!(read.items.values().last().unwrap().line.contains("/p11"));
    }

    #[test]
    fn test_contexts_are_merged() {
        let dir = tempfile::tempdir().unwrap();
        let server = LiveTail::open(&config(dir.path()), LiveContext::Server);
        let command = LiveTail::open(&config(dir.path()), LiveContext::Command);

        command.write(&[record("/seed")]).unwrap();
        let start = server.read(ZERO_CURSOR, &LiveFilter::all(), None).unwrap();
        server.write(&[record("/from-server")]).unwrap();
        command.write(&[record("/from-cli")]).unwrap();

        let read = server.read(&start.index, &LiveFilter::all(), None).unwrap();
        assert_eq!(read.items.len(), 2);
        assert_eq!(read.index, *read.items.keys().last().unwrap());
    }

    #[test]
    fn test_limit_keeps_newest() {
        let dir = tempfile::tempdir().unwrap();
        let tail = LiveTail::open(&config(dir.path()), LiveContext::Server);
        tail.write(&[record("/a"), record("/b"), record("/c")]).unwrap();
        let read = tail.read("00000000000000000000", &LiveFilter::all(), Some(2)).unwrap();
        let lines: Vec<&str> = read.items.values().map(|i| i.line.as_str()).collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("/b"));
        assert!(lines[1].contains("/c"));
    }
}
