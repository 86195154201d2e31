//! Aggregate table layouts and record-to-row mapping.
//!
//! Each table has a composite dimension key and a fixed set of measure
//! columns derived from the metric catalog. Additive columns merge with
//! `col = col + delta`; the remaining measure columns keep the value of the
//! first insert.

use crate::core::{MetricKind, MetricRecord};
use crate::receiver::catalog::{
    Rating, NAVIGATION_SCALARS, NAVIGATION_SPANS, RESOURCE_SCALARS, RESOURCE_SPANS, WEB_VITALS,
};
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use std::collections::BTreeMap;
use std::fmt;

/// Separator between encoded dimension values in a [`RowKey`]
pub const KEY_DELIMITER: char = '|';

/// Aggregate tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Table {
    /// Page navigation and Web-Vitals statistics
    Statistics,
    /// Sub-resource timing statistics
    Resources,
}

/// Measure column definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub additive: bool,
}

static STATISTICS_COLUMNS: Lazy<Vec<Column>> = Lazy::new(|| {
    let mut columns = vec![additive("hit")];
    for spec in WEB_VITALS {
        columns.push(additive(&format!("{}_sum", spec.name)));
        match spec.rating {
            Rating::Rated { .. } => {
                for bucket in ["good", "impr", "poor"] {
                    columns.push(additive(&format!("{}_{}", spec.name, bucket)));
                }
            },
            Rating::Unrated => columns.push(additive(&format!("{}_hit", spec.name))),
        }
    }
    columns.extend(span_columns(NAVIGATION_SPANS));
    columns.extend(NAVIGATION_SCALARS.iter().map(|s| fixed(s)));
    columns
});

static RESOURCES_COLUMNS: Lazy<Vec<Column>> = Lazy::new(|| {
    let mut columns = vec![additive("hit")];
    columns.extend(span_columns(RESOURCE_SPANS));
    columns.extend(RESOURCE_SCALARS.iter().map(|s| fixed(s)));
    columns
});

fn additive(name: &str) -> Column {
    Column {
        name: name.to_string(),
        additive: true,
    }
}

fn fixed(name: &str) -> Column {
    Column {
        name: name.to_string(),
        additive: false,
    }
}

fn span_columns(spans: &'static [&'static str]) -> impl Iterator<Item = Column> {
    spans.iter().flat_map(|span| {
        [
            additive(&format!("span_{}_start", span)),
            additive(&format!("span_{}_duration", span)),
        ]
    })
}

impl Table {
    pub const ALL: [Table; 2] = [Table::Statistics, Table::Resources];

    /// Table a record of `kind` is aggregated into
    pub fn for_kind(kind: MetricKind) -> Self {
        if kind.is_resource() {
            Table::Resources
        } else {
            Table::Statistics
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Table::Statistics => "statistics",
            Table::Resources => "resources",
        }
    }

    /// Composite key columns, in key order
    pub fn dimensions(&self) -> &'static [&'static str] {
        match self {
            Table::Statistics => &["date", "site", "endpoint", "authenticated", "country", "device"],
            Table::Resources => &[
                "date",
                "site",
                "endpoint",
                "authenticated",
                "scheme",
                "authority",
                "mime_type",
                "mime_category",
                "initiator",
            ],
        }
    }

    /// Measure columns
    pub fn columns(&self) -> &'static [Column] {
        match self {
            Table::Statistics => &STATISTICS_COLUMNS,
            Table::Resources => &RESOURCES_COLUMNS,
        }
    }

    pub fn is_dimension(&self, name: &str) -> bool {
        self.dimensions().contains(&name)
    }

    pub fn column(&self, name: &str) -> Option<&'static Column> {
        self.columns().iter().find(|c| c.name == name)
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A dimension value as stored
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DimValue {
    Int(i64),
    Text(String),
}

impl DimValue {
    fn encode(&self) -> String {
        match self {
            DimValue::Int(v) => v.to_string(),
            DimValue::Text(s) => escape_dimension(s),
        }
    }
}

impl From<i64> for DimValue {
    fn from(value: i64) -> Self {
        DimValue::Int(value)
    }
}

impl From<&str> for DimValue {
    fn from(value: &str) -> Self {
        DimValue::Text(value.to_string())
    }
}

impl From<String> for DimValue {
    fn from(value: String) -> Self {
        DimValue::Text(value)
    }
}

impl fmt::Display for DimValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DimValue::Int(v) => write!(f, "{}", v),
            DimValue::Text(s) => f.write_str(s),
        }
    }
}

/// Backslash-escape the key delimiter and the escape character itself
pub fn escape_dimension(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if c == KEY_DELIMITER || c == '\\' {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Row identity: the table plus its encoded dimension tuple
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowKey(String);

impl RowKey {
    pub fn encode(values: &[DimValue]) -> Self {
        let parts: Vec<String> = values.iter().map(DimValue::encode).collect();
        RowKey(parts.join(&KEY_DELIMITER.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One upsert unit: dimension tuple plus measure deltas
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateRow {
    pub table: Table,
    pub date: NaiveDate,
    /// Values in [`Table::dimensions`] order, `date` first
    pub dimensions: Vec<DimValue>,
    pub additive: BTreeMap<String, i64>,
    pub fixed: BTreeMap<String, i64>,
}

impl AggregateRow {
    /// Map a record onto its table, dropping measures the table lacks
    pub fn from_record(record: &MetricRecord) -> Self {
        let table = Table::for_kind(record.kind);
        let mut dimensions = vec![
            DimValue::Text(format_date(record.date)),
            DimValue::Int(i64::from(record.site)),
            DimValue::Text(record.endpoint.clone()),
            DimValue::Int(i64::from(record.authenticated)),
        ];
        match (&record.resource, table) {
            (Some(dims), Table::Resources) => dimensions.extend([
                DimValue::Text(dims.scheme.clone()),
                DimValue::Text(dims.authority.clone()),
                DimValue::Text(dims.mime_type.clone()),
                DimValue::Text(dims.mime_category.as_str().to_string()),
                DimValue::Text(dims.initiator.clone()),
            ]),
            _ => dimensions.extend([
                DimValue::Text(record.country.clone()),
                DimValue::Text(record.device.as_str().to_string()),
            ]),
        }

        let mut additive = BTreeMap::new();
        let mut fixed = BTreeMap::new();
        for (name, value) in &record.measures {
            match table.column(name) {
                Some(column) if column.additive => {
                    additive.insert(name.clone(), *value);
                },
                Some(_) => {
                    fixed.insert(name.clone(), *value);
                },
                None => {},
            }
        }

        Self {
            table,
            date: record.date,
            dimensions,
            additive,
            fixed,
        }
    }

    pub fn key(&self) -> RowKey {
        RowKey::encode(&self.dimensions)
    }

    /// Fold another row with the same key into this one
    pub fn merge(&mut self, other: &AggregateRow) {
        for (name, delta) in &other.additive {
            *self.additive.entry(name.clone()).or_insert(0) += delta;
        }
        for (name, value) in &other.fixed {
            self.fixed.entry(name.clone()).or_insert(*value);
        }
    }

    /// Dimension value by column name
    pub fn dimension(&self, name: &str) -> Option<&DimValue> {
        self.table
            .dimensions()
            .iter()
            .position(|d| *d == name)
            .and_then(|idx| self.dimensions.get(idx))
    }
}

pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()
}
