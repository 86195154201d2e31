//! Storage backend trait for the aggregate tables.

use super::query::{AggregateQuery, GroupRow};
use super::schema::{AggregateRow, Table};
use crate::core::Result;
use chrono::NaiveDate;

/// Trait for aggregate storage backend implementations.
///
/// Calls are synchronous; the capture path runs them on the blocking pool.
pub trait AggregateBackend: Send + Sync {
    /// Merge rows into `table`, atomically for the whole slice.
    ///
    /// Returns the number of rows written.
    fn upsert(&self, table: Table, rows: &[AggregateRow]) -> Result<usize>;

    /// Delete rows with `date < cutoff`.
    fn purge_before(&self, table: Table, cutoff: NaiveDate) -> Result<usize>;

    /// Earliest date present in `table`.
    fn oldest_date(&self, table: Table) -> Result<Option<NaiveDate>>;

    /// Grouped sums for a validated query, unordered and without derived values.
    fn query(&self, query: &AggregateQuery) -> Result<Vec<GroupRow>>;

    /// Backend name for logs.
    fn name(&self) -> &'static str;
}
