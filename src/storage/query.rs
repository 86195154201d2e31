//! Read-side query surface over the aggregate tables.
//!
//! Backends return grouped sums; derived values (averages, rates) are
//! computed here from those sums so every backend agrees on them.

use super::schema::{DimValue, Table};
use crate::core::{PerfError, Result};
use crate::receiver::catalog::{Rating, VitalSpec};
use chrono::NaiveDate;
use std::collections::BTreeMap;

/// Read-time computation layered over summed counters
#[derive(Debug, Clone, PartialEq)]
pub enum Derived {
    /// `sum / (count_1 + count_2 + ...)`
    Average {
        name: String,
        sum: String,
        count: Vec<String>,
    },
    /// `100 * part / (total_1 + total_2 + ...)`
    RatePct {
        name: String,
        part: String,
        total: Vec<String>,
    },
}

impl Derived {
    pub fn average(name: &str, sum: &str, count: &[&str]) -> Self {
        Derived::Average {
            name: name.to_string(),
            sum: sum.to_string(),
            count: count.iter().map(|c| (*c).to_string()).collect(),
        }
    }

    pub fn rate_pct(name: &str, part: &str, total: &[&str]) -> Self {
        Derived::RatePct {
            name: name.to_string(),
            part: part.to_string(),
            total: total.iter().map(|c| (*c).to_string()).collect(),
        }
    }

    /// Mean stored value of a Web Vital (`<M>_avg`), in stored units
    pub fn vital_average(spec: &VitalSpec) -> Self {
        let sum = format!("{}_sum", spec.name);
        let count: Vec<String> = match spec.rating {
            Rating::Rated { .. } => ["good", "impr", "poor"]
                .iter()
                .map(|b| format!("{}_{}", spec.name, b))
                .collect(),
            Rating::Unrated => vec![format!("{}_hit", spec.name)],
        };
        Derived::Average {
            name: format!("{}_avg", spec.name),
            sum,
            count,
        }
    }

    /// Share of good ratings of a rated Web Vital (`<M>_good_pct`)
    pub fn vital_good_pct(spec: &VitalSpec) -> Self {
        let total: Vec<String> = ["good", "impr", "poor"]
            .iter()
            .map(|b| format!("{}_{}", spec.name, b))
            .collect();
        Derived::RatePct {
            name: format!("{}_good_pct", spec.name),
            part: format!("{}_good", spec.name),
            total,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Derived::Average { name, .. } | Derived::RatePct { name, .. } => name,
        }
    }

    fn inputs(&self) -> Vec<&str> {
        match self {
            Derived::Average { sum, count, .. } => {
                std::iter::once(sum.as_str()).chain(count.iter().map(String::as_str)).collect()
            },
            Derived::RatePct { part, total, .. } => {
                std::iter::once(part.as_str()).chain(total.iter().map(String::as_str)).collect()
            },
        }
    }

    /// Evaluate against summed counters; `None` when the denominator is zero
    pub fn evaluate(&self, sums: &BTreeMap<String, i64>) -> Option<f64> {
        let get = |c: &str| sums.get(c).copied().unwrap_or(0);
        let (numerator, denominator, scale) = match self {
            Derived::Average { sum, count, .. } => {
                (get(sum), count.iter().map(|c| get(c)).sum::<i64>(), 1.0)
            },
            Derived::RatePct { part, total, .. } => {
                (get(part), total.iter().map(|c| get(c)).sum::<i64>(), 100.0)
            },
        };
        if denominator == 0 {
            None
        } else {
            Some(scale * numerator as f64 / denominator as f64)
        }
    }
}

/// Grouped aggregate query
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateQuery {
    pub table: Table,
    pub group_by: Vec<String>,
    pub filters: Vec<(String, DimValue)>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub measures: Vec<String>,
    /// Keep only groups with `SUM(hit) > min_hits`
    pub min_hits: Option<i64>,
    pub derived: Vec<Derived>,
}

impl AggregateQuery {
    pub fn new(table: Table) -> Self {
        Self {
            table,
            group_by: Vec::new(),
            filters: Vec::new(),
            from: None,
            to: None,
            measures: Vec::new(),
            min_hits: None,
            derived: Vec::new(),
        }
    }

    pub fn group_by(mut self, dimension: &str) -> Self {
        self.group_by.push(dimension.to_string());
        self
    }

    pub fn filter(mut self, dimension: &str, value: impl Into<DimValue>) -> Self {
        self.filters.push((dimension.to_string(), value.into()));
        self
    }

    /// Inclusive date range
    pub fn between(mut self, from: NaiveDate, to: NaiveDate) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    pub fn sum(mut self, column: &str) -> Self {
        if !self.measures.iter().any(|m| m == column) {
            self.measures.push(column.to_string());
        }
        self
    }

    pub fn min_hits(mut self, floor: i64) -> Self {
        self.min_hits = Some(floor);
        self
    }

    /// Add a derived computation, summing whatever columns it reads
    pub fn derive(mut self, derived: Derived) -> Self {
        for input in derived.inputs() {
            if !self.measures.iter().any(|m| m == input) {
                self.measures.push(input.to_string());
            }
        }
        self.derived.push(derived);
        self
    }

    /// Columns summed by the backend, `hit` always first
    pub fn summed_columns(&self) -> Vec<&str> {
        let mut columns = vec!["hit"];
        columns.extend(self.measures.iter().map(String::as_str).filter(|m| *m != "hit"));
        columns
    }

    /// Reject column names the table does not have.
    ///
    /// Backends interpolate validated names into SQL, so this must pass first.
    pub fn validate(&self) -> Result<()> {
        for dim in self.group_by.iter().chain(self.filters.iter().map(|(d, _)| d)) {
            if !self.table.is_dimension(dim) {
                return Err(PerfError::storage(format!("'{}' is not a dimension of {}", dim, self.table)));
            }
        }
        for column in &self.measures {
            if self.table.column(column).is_none() {
                return Err(PerfError::storage(format!("'{}' is not a column of {}", column, self.table)));
            }
        }
        Ok(())
    }
}

/// One result group
#[derive(Debug, Clone, PartialEq)]
pub struct GroupRow {
    pub dimensions: BTreeMap<String, DimValue>,
    pub sums: BTreeMap<String, i64>,
    pub derived: BTreeMap<String, Option<f64>>,
}

impl GroupRow {
    pub fn hits(&self) -> i64 {
        self.sums.get("hit").copied().unwrap_or(0)
    }

    pub fn sum(&self, column: &str) -> i64 {
        self.sums.get(column).copied().unwrap_or(0)
    }

    pub fn derived(&self, name: &str) -> Option<f64> {
        self.derived.get(name).copied().flatten()
    }
}

/// Fill in derived values and order groups by hits, busiest first
pub fn finish_groups(query: &AggregateQuery, mut groups: Vec<GroupRow>) -> Vec<GroupRow> {
    for group in &mut groups {
        for derived in &query.derived {
            group
                .derived
                .insert(derived.name().to_string(), derived.evaluate(&group.sums));
        }
    }
    groups.sort_by(|a, b| b.hits().cmp(&a.hits()).then_with(|| a.dimensions.cmp(&b.dimensions)));
    groups
}
