//! SQLite aggregate backend.
//!
//! Each table carries a UNIQUE index over its dimension columns so merges use
//! the native `INSERT ... ON CONFLICT DO UPDATE` upsert. A batch is applied in
//! one transaction.

use super::backend::AggregateBackend;
use super::query::{AggregateQuery, GroupRow};
use super::schema::{format_date, parse_date, AggregateRow, DimValue, Table};
use crate::core::{PerfError, Result};
use chrono::NaiveDate;
use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, TransactionBehavior};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Integer-typed dimension columns; everything else is TEXT
const INTEGER_DIMENSIONS: &[&str] = &["site", "authenticated"];

fn sql_value(dim: &DimValue) -> Value {
    match dim {
        DimValue::Int(v) => Value::Integer(*v),
        DimValue::Text(s) => Value::Text(s.clone()),
    }
}

fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier)
}

fn create_table_sql(table: Table) -> String {
    let mut columns: Vec<String> = table
        .dimensions()
        .iter()
        .map(|dim| {
            let ty = if INTEGER_DIMENSIONS.contains(dim) { "INTEGER" } else { "TEXT" };
            format!("{} {} NOT NULL", quote(dim), ty)
        })
        .collect();
    columns.extend(table.columns().iter().map(|column| {
        if column.additive {
            format!("{} INTEGER NOT NULL DEFAULT 0", quote(&column.name))
        } else {
            format!("{} INTEGER", quote(&column.name))
        }
    }));
    let dims: Vec<String> = table.dimensions().iter().map(|d| quote(d)).collect();
    format!(
        "CREATE TABLE IF NOT EXISTS {name} ({columns});\n\
         CREATE UNIQUE INDEX IF NOT EXISTS {name}_dims ON {name} ({dims});\n\
         CREATE INDEX IF NOT EXISTS {name}_date ON {name} (\"date\");",
        name = table.name(),
        columns = columns.join(", "),
        dims = dims.join(", "),
    )
}

fn upsert_sql(table: Table) -> String {
    let dims: Vec<String> = table.dimensions().iter().map(|d| quote(d)).collect();
    let measures: Vec<String> = table.columns().iter().map(|c| quote(&c.name)).collect();
    let placeholders: Vec<String> = (1..=dims.len() + measures.len()).map(|i| format!("?{}", i)).collect();
    let updates: Vec<String> = table
        .columns()
        .iter()
        .map(|column| {
            let name = quote(&column.name);
            if column.additive {
                format!("{name} = {name} + excluded.{name}")
            } else {
                format!("{name} = COALESCE({name}, excluded.{name})")
            }
        })
        .collect();
    format!(
        "INSERT INTO {table} ({dims}, {measures}) VALUES ({placeholders}) \
         ON CONFLICT({dims}) DO UPDATE SET {updates}",
        table = table.name(),
        dims = dims.join(", "),
        measures = measures.join(", "),
        placeholders = placeholders.join(", "),
        updates = updates.join(", "),
    )
}

fn row_params(table: Table, row: &AggregateRow) -> Vec<Value> {
    let mut params: Vec<Value> = row.dimensions.iter().map(sql_value).collect();
    for column in table.columns() {
        let value = if column.additive {
            Value::Integer(row.additive.get(&column.name).copied().unwrap_or(0))
        } else {
            row.fixed.get(&column.name).map_or(Value::Null, |v| Value::Integer(*v))
        };
        params.push(value);
    }
    params
}

/// Aggregate backend over a single SQLite connection
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBackend").finish_non_exhaustive()
    }
}

impl SqliteBackend {
    /// Open (creating if needed) a database file
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        info!("Opened aggregate database at {} (journal_mode={})", path.display(), mode);
        Self::with_connection(conn)
    }

    /// Private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        for table in Table::ALL {
            conn.execute_batch(&create_table_sql(table))?;
        }
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl AggregateBackend for SqliteBackend {
    fn upsert(&self, table: Table, rows: &[AggregateRow]) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        {
            let mut stmt = tx.prepare_cached(&upsert_sql(table))?;
            for row in rows {
                stmt.execute(params_from_iter(row_params(table, row)))?;
            }
        }
        tx.commit()?;
        debug!("Upserted {} rows into {}", rows.len(), table);
        Ok(rows.len())
    }

    fn purge_before(&self, table: Table, cutoff: NaiveDate) -> Result<usize> {
        let conn = self.conn.lock();
        let removed = conn.execute(
            &format!("DELETE FROM {} WHERE \"date\" < ?1", table.name()),
            [format_date(cutoff)],
        )?;
        Ok(removed)
    }

    fn oldest_date(&self, table: Table) -> Result<Option<NaiveDate>> {
        let conn = self.conn.lock();
        let oldest: Option<String> =
            conn.query_row(&format!("SELECT MIN(\"date\") FROM {}", table.name()), [], |row| row.get(0))?;
        match oldest {
            None => Ok(None),
            Some(text) => parse_date(&text)
                .map(Some)
                .ok_or_else(|| PerfError::storage(format!("unparseable date '{}' in {}", text, table))),
        }
    }

    fn query(&self, query: &AggregateQuery) -> Result<Vec<GroupRow>> {
        query.validate()?;
        let table = query.table;
        let summed = query.summed_columns();

        let mut select: Vec<String> = query.group_by.iter().map(|d| quote(d)).collect();
        select.extend(summed.iter().map(|c| format!("SUM({})", quote(c))));

        let mut conditions: Vec<String> = Vec::new();
        let mut params: Vec<Value> = Vec::new();
        if let Some(from) = query.from {
            params.push(Value::Text(format_date(from)));
            conditions.push(format!("\"date\" >= ?{}", params.len()));
        }
        if let Some(to) = query.to {
            params.push(Value::Text(format_date(to)));
            conditions.push(format!("\"date\" <= ?{}", params.len()));
        }
        for (dim, value) in &query.filters {
            params.push(sql_value(value));
            conditions.push(format!("{} = ?{}", quote(dim), params.len()));
        }

        let mut sql = format!("SELECT {} FROM {}", select.join(", "), table.name());
        if !conditions.is_empty() {
            sql.push_str(&format!(" WHERE {}", conditions.join(" AND ")));
        }
        if !query.group_by.is_empty() {
            let groups: Vec<String> = query.group_by.iter().map(|d| quote(d)).collect();
            sql.push_str(&format!(" GROUP BY {}", groups.join(", ")));
        }
        if let Some(floor) = query.min_hits {
            params.push(Value::Integer(floor));
            sql.push_str(&format!(" HAVING SUM(\"hit\") > ?{}", params.len()));
        }

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let group_len = query.group_by.len();
        let rows = stmt.query_map(params_from_iter(params), |row| {
            let mut dimensions = BTreeMap::new();
            for (idx, dim) in query.group_by.iter().enumerate() {
                let value = match row.get::<_, Value>(idx)? {
                    Value::Integer(v) => DimValue::Int(v),
                    Value::Text(s) => DimValue::Text(s),
                    other => DimValue::Text(format!("{:?}", other)),
                };
                dimensions.insert(dim.clone(), value);
            }
            let mut sums = BTreeMap::new();
            for (offset, column) in summed.iter().enumerate() {
                let sum: Option<i64> = row.get(group_len + offset)?;
                sums.insert((*column).to_string(), sum.unwrap_or(0));
            }
            Ok(GroupRow {
                dimensions,
                sums,
                derived: BTreeMap::new(),
            })
        })?;

        let mut groups = Vec::new();
        for group in rows {
            groups.push(group?);
        }
        // Aggregates over an empty table yield one all-NULL row
        if query.group_by.is_empty() {
            groups.retain(|g| g.hits() > 0);
        }
        Ok(groups)
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}
