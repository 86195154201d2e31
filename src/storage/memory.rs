//! In-memory aggregate backend.
//!
//! Rows live in one map per table behind a single mutex, so an upsert batch
//! is applied atomically with respect to readers.

use super::backend::AggregateBackend;
use super::query::{AggregateQuery, GroupRow};
use super::schema::{AggregateRow, DimValue, RowKey, Table};
use crate::core::Result;
use chrono::NaiveDate;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Default)]
struct Tables {
    statistics: HashMap<RowKey, AggregateRow>,
    resources: HashMap<RowKey, AggregateRow>,
}

impl Tables {
    fn get(&self, table: Table) -> &HashMap<RowKey, AggregateRow> {
        match table {
            Table::Statistics => &self.statistics,
            Table::Resources => &self.resources,
        }
    }

    fn get_mut(&mut self, table: Table) -> &mut HashMap<RowKey, AggregateRow> {
        match table {
            Table::Statistics => &mut self.statistics,
            Table::Resources => &mut self.resources,
        }
    }
}

/// Aggregate backend held entirely in process memory
#[derive(Debug, Default)]
pub struct MemoryBackend {
    tables: Mutex<Tables>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored rows in `table`
    pub fn row_count(&self, table: Table) -> usize {
        self.tables.lock().get(table).len()
    }
}

fn matches(row: &AggregateRow, query: &AggregateQuery) -> bool {
    if query.from.map_or(false, |from| row.date < from) || query.to.map_or(false, |to| row.date > to) {
        return false;
    }
    query
        .filters
        .iter()
        .all(|(dim, value)| row.dimension(dim) == Some(value))
}

fn column_value(row: &AggregateRow, column: &str) -> i64 {
    row.additive
        .get(column)
        .or_else(|| row.fixed.get(column))
        .copied()
        .unwrap_or(0)
}

impl AggregateBackend for MemoryBackend {
    fn upsert(&self, table: Table, rows: &[AggregateRow]) -> Result<usize> {
        let mut tables = self.tables.lock();
        let map = tables.get_mut(table);
        for row in rows {
            map.entry(row.key())
                .and_modify(|existing| existing.merge(row))
                .or_insert_with(|| row.clone());
        }
        Ok(rows.len())
    }

    fn purge_before(&self, table: Table, cutoff: NaiveDate) -> Result<usize> {
        let mut tables = self.tables.lock();
        let map = tables.get_mut(table);
        let before = map.len();
        map.retain(|_, row| row.date >= cutoff);
        Ok(before - map.len())
    }

    fn oldest_date(&self, table: Table) -> Result<Option<NaiveDate>> {
        Ok(self.tables.lock().get(table).values().map(|row| row.date).min())
    }

    fn query(&self, query: &AggregateQuery) -> Result<Vec<GroupRow>> {
        let tables = self.tables.lock();
        let columns = query.summed_columns();
        let mut groups: BTreeMap<Vec<DimValue>, BTreeMap<String, i64>> = BTreeMap::new();

        for row in tables.get(query.table).values().filter(|row| matches(row, query)) {
            let key: Vec<DimValue> = query
                .group_by
                .iter()
                .filter_map(|dim| row.dimension(dim).cloned())
                .collect();
            let sums = groups.entry(key).or_default();
            for column in &columns {
                *sums.entry((*column).to_string()).or_insert(0) += column_value(row, column);
            }
        }

        Ok(groups
            .into_iter()
            .filter(|(_, sums)| query.min_hits.map_or(true, |floor| sums.get("hit").copied().unwrap_or(0) > floor))
            .map(|(key, sums)| GroupRow {
                dimensions: query.group_by.iter().cloned().zip(key).collect(),
                sums,
                derived: BTreeMap::new(),
            })
            .collect())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
