//! Aggregation store.
//!
//! Buffered records are mapped to per-day aggregate rows, merged by composite
//! key and upserted through a pluggable backend. Each flush also applies the
//! retention purge to both tables.

pub mod backend;
pub mod memory;
pub mod query;
pub mod schema;
pub mod sqlite;

pub use backend::AggregateBackend;
pub use memory::MemoryBackend;
pub use query::{AggregateQuery, Derived, GroupRow};
pub use schema::{AggregateRow, DimValue, RowKey, Table};
pub use sqlite::SqliteBackend;

use crate::core::config::BackendKind;
use crate::core::{Config, MetricRecord, Result};
use chrono::{Duration, NaiveDate, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Outcome of one flush cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Records that failed validation
    pub rejected: usize,
    /// Distinct rows upserted, per table
    pub upserted: BTreeMap<Table, usize>,
    /// Rows removed by retention, per table
    pub purged: BTreeMap<Table, usize>,
    /// Tables whose batch was discarded after a backend failure
    pub failed: Vec<Table>,
}

impl FlushReport {
    pub fn upserted_total(&self) -> usize {
        self.upserted.values().sum()
    }
}

/// Facade over an [`AggregateBackend`] with retention and caching
pub struct AggregationStore {
    backend: Arc<dyn AggregateBackend>,
    statistics_retention_days: u32,
    resources_retention_days: u32,
    oldest: Mutex<HashMap<Table, NaiveDate>>,
}

impl std::fmt::Debug for AggregationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregationStore")
            .field("backend", &self.backend.name())
            .field("statistics_retention_days", &self.statistics_retention_days)
            .field("resources_retention_days", &self.resources_retention_days)
            .finish()
    }
}

impl AggregationStore {
    pub fn new(backend: Arc<dyn AggregateBackend>, statistics_retention_days: u32, resources_retention_days: u32) -> Self {
        Self {
            backend,
            statistics_retention_days: statistics_retention_days.max(crate::core::config::MIN_RETENTION_DAYS),
            resources_retention_days: resources_retention_days.max(crate::core::config::MIN_RETENTION_DAYS),
            oldest: Mutex::new(HashMap::new()),
        }
    }

    /// Open the configured backend
    pub fn from_config(config: &Config) -> Result<Self> {
        let backend: Arc<dyn AggregateBackend> = match config.storage.backend {
            BackendKind::Sqlite => Arc::new(SqliteBackend::open(&config.storage.database_path)?),
            BackendKind::Memory => Arc::new(MemoryBackend::new()),
        };
        Ok(Self::new(
            backend,
            config.statistics_retention_days(),
            config.resources_retention_days(),
        ))
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Retention for `table`, floor applied
    pub fn retention_days(&self, table: Table) -> u32 {
        match table {
            Table::Statistics => self.statistics_retention_days,
            Table::Resources => self.resources_retention_days,
        }
    }

    /// Flush with today's UTC date as the retention reference
    pub fn flush(&self, records: &[MetricRecord]) -> FlushReport {
        self.flush_at(records, Utc::now().date_naive())
    }

    /// Validate, merge and upsert `records`, then purge both tables.
    ///
    /// Never fails: backend errors are logged and the affected batch dropped.
    pub fn flush_at(&self, records: &[MetricRecord], today: NaiveDate) -> FlushReport {
        let mut report = FlushReport::default();
        let mut batches: BTreeMap<Table, BTreeMap<RowKey, AggregateRow>> = BTreeMap::new();

        for record in records {
            if let Err(reason) = record.validate() {
                warn!(endpoint = %record.endpoint, kind = %record.kind, "Dropping invalid record: {}", reason);
                report.rejected += 1;
                continue;
            }
            let row = AggregateRow::from_record(record);
            batches
                .entry(row.table)
                .or_default()
                .entry(row.key())
                .and_modify(|existing| existing.merge(&row))
                .or_insert(row);
        }

        for (table, rows) in batches {
            let rows: Vec<AggregateRow> = rows.into_values().collect();
            match self.backend.upsert(table, &rows) {
                Ok(written) => {
                    self.note_dates(table, &rows);
                    report.upserted.insert(table, written);
                },
                Err(e) => {
                    error!(
                        table = %table,
                        backend = self.backend.name(),
                        category = e.category(),
                        "Discarding {} aggregate rows: {}",
                        rows.len(),
                        e
                    );
                    report.failed.push(table);
                },
            }
        }

        for table in Table::ALL {
            if let Some(removed) = self.purge(table, today) {
                report.purged.insert(table, removed);
            }
        }

        report
    }

    /// Delete rows older than the retention window. `None` on failure.
    pub fn purge(&self, table: Table, today: NaiveDate) -> Option<usize> {
        let cutoff = today - Duration::days(i64::from(self.retention_days(table)));
        match self.backend.purge_before(table, cutoff) {
            Ok(removed) => {
                match removed {
                    0 => debug!(table = %table, "Retention purge found nothing before {}", cutoff),
                    1 => debug!(table = %table, "Retention purge removed 1 row before {}", cutoff),
                    n => debug!(table = %table, "Retention purge removed {} rows before {}", n, cutoff),
                }
                if removed > 0 {
                    self.oldest.lock().remove(&table);
                }
                Some(removed)
            },
            Err(e) => {
                error!(table = %table, category = e.category(), "Retention purge failed: {}", e);
                None
            },
        }
    }

    /// Earliest date in `table`, memoized until the next purge that removes rows
    pub fn oldest_date(&self, table: Table) -> Result<Option<NaiveDate>> {
        if let Some(date) = self.oldest.lock().get(&table) {
            return Ok(Some(*date));
        }
        let oldest = self.backend.oldest_date(table)?;
        if let Some(date) = oldest {
            self.oldest.lock().insert(table, date);
        }
        Ok(oldest)
    }

    /// Run a grouped query, derived values filled in, busiest groups first
    pub fn query(&self, query: &AggregateQuery) -> Result<Vec<GroupRow>> {
        query.validate()?;
        let groups = self.backend.query(query)?;
        Ok(query::finish_groups(query, groups))
    }

    fn note_dates(&self, table: Table, rows: &[AggregateRow]) {
        let Some(earliest) = rows.iter().map(|r| r.date).min() else {
            return;
        };
        let mut oldest = self.oldest.lock();
        if let Some(cached) = oldest.get_mut(&table) {
            if earliest < *cached {
                *cached = earliest;
            }
        }
    }
}
