//! Aggregation store behaviour across backends.

mod common;

use common::{build, day, resource_beacon, vital_beacon};
use perftail_lib::core::MetricRecord;
use perftail_lib::receiver::catalog;
use perftail_lib::storage::{
    AggregateBackend, AggregateQuery, AggregationStore, Derived, GroupRow, MemoryBackend, SqliteBackend, Table,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;

fn stores(dir: &tempfile::TempDir) -> Vec<AggregationStore> {
    let sqlite = SqliteBackend::open(&dir.path().join("aggregates.db")).unwrap();
    let backends: Vec<Arc<dyn AggregateBackend>> = vec![Arc::new(MemoryBackend::new()), Arc::new(sqlite)];
    backends
        .into_iter()
        .map(|backend| AggregationStore::new(backend, 30, 2))
        .collect()
}

fn vitals() -> Vec<MetricRecord> {
    vec![
        build(&vital_beacon("/blog/a", &[("LCP", 2.1), ("CLS", 0.05)]), day(20)),
        build(&vital_beacon("/blog/a", &[("LCP", 3.0)]), day(20)),
        build(&vital_beacon("/blog/a", &[("LCP", 4.5), ("CLS", 0.3)]), day(20)),
        build(&vital_beacon("/shop", &[("LCP", 1.2)]), day(20)),
        build(&vital_beacon("/shop", &[("INP", 0.15)]), day(19)),
    ]
}

fn by_endpoint() -> AggregateQuery {
    AggregateQuery::new(Table::Statistics)
        .group_by("endpoint")
        .sum("LCP_sum")
        .sum("LCP_good")
        .sum("CLS_sum")
}

fn totals(rows: &[GroupRow]) -> Vec<(String, i64, i64, i64, i64)> {
    let mut totals: Vec<_> = rows
        .iter()
        .map(|row| {
            (
                format!("{:?}", row.dimensions),
                row.hits(),
                row.sum("LCP_sum"),
                row.sum("LCP_good"),
                row.sum("CLS_sum"),
            )
        })
        .collect();
    totals.sort();
    totals
}

#[test]
fn test_flush_order_does_not_matter() {
    let dir = tempfile::tempdir().unwrap();
    let records = vitals();
    let mut reversed = records.clone();
    reversed.reverse();

    let expected = {
        let store = AggregationStore::new(Arc::new(MemoryBackend::new()), 30, 2);
        for record in &records {
            store.flush_at(std::slice::from_ref(record), day(20));
        }
        totals(&store.query(&by_endpoint()).unwrap())
    };

    for store in stores(&dir) {
        let (left, right) = reversed.split_at(2);
        store.flush_at(right, day(20));
        store.flush_at(left, day(20));
        assert_eq!(totals(&store.query(&by_endpoint()).unwrap()), expected, "{}", store.backend_name());
    }

    let blog = expected.iter().find(|t| t.0.contains("/blog")).unwrap();
    assert_eq!(blog.1, 3);
    assert_eq!(blog.2, 2100 + 3000 + 4500);
    assert_eq!(blog.3, 1);
    assert_eq!(blog.4, 5000 + 30000);
}

#[test]
fn test_repeated_resource_collapses_to_one_row() {
    let dir = tempfile::tempdir().unwrap();
    for store in stores(&dir) {
        let first = build(&resource_beacon("https://cdn.example.com/img/logo.png", 0.12), day(20));
        let second = build(&resource_beacon("https://cdn.example.com/img/logo.png", 0.5), day(20));
        store.flush_at(&[first], day(20));
        let report = store.flush_at(&[second], day(20));
        assert_eq!(report.upserted.get(&Table::Resources), Some(&1));

        let rows = store
            .query(&AggregateQuery::new(Table::Resources).group_by("authority").sum("load"))
            .unwrap();
        assert_eq!(rows.len(), 1, "{}", store.backend_name());
        assert_eq!(rows[0].hits(), 2);
        // fixed columns keep the first observed value
        assert_eq!(rows[0].sum("load"), 120);
    }
}

#[test]
fn test_retention_keeps_boundary_day() {
    let dir = tempfile::tempdir().unwrap();
    for store in stores(&dir) {
        let records = vec![
            build(&resource_beacon("https://cdn.example.com/a.js", 0.1), day(17)),
            build(&resource_beacon("https://cdn.example.com/b.js", 0.1), day(18)),
            build(&resource_beacon("https://cdn.example.com/c.js", 0.1), day(20)),
        ];
        store.flush_at(&records, day(17));
        assert_eq!(store.oldest_date(Table::Resources).unwrap(), Some(day(17)));

        // two days of retention on the 20th: the 18th survives, the 17th goes
        let report = store.flush_at(&[], day(20));
        assert_eq!(report.purged.get(&Table::Resources), Some(&1), "{}", store.backend_name());
        assert_eq!(store.oldest_date(Table::Resources).unwrap(), Some(day(18)));
    }
}

#[test]
fn test_derived_vital_values() {
    let dir = tempfile::tempdir().unwrap();
    let lcp = catalog::vital("LCP").unwrap();
    for store in stores(&dir) {
        store.flush_at(&vitals(), day(20));
        let query = AggregateQuery::new(Table::Statistics)
            .group_by("endpoint")
            .between(day(20), day(20))
            .derive(Derived::vital_average(lcp))
            .derive(Derived::vital_good_pct(lcp))
            .min_hits(1);
        let rows = store.query(&query).unwrap();

        assert_eq!(rows.len(), 1, "{}", store.backend_name());
        assert_eq!(rows[0].hits(), 3);
        assert_eq!(rows[0].derived("LCP_avg"), Some(3200.0));
        let good = rows[0].derived("LCP_good_pct").unwrap();
        assert!((good - 100.0 / 3.0).abs() < 1e-9);
    }
}

#[test]
fn test_unknown_column_rejected() {
    let store = AggregationStore::new(Arc::new(MemoryBackend::new()), 30, 2);
    assert!(store
        .query(&AggregateQuery::new(Table::Resources).group_by("country"))
        .is_err());
    assert!(store.query(&AggregateQuery::new(Table::Statistics).sum("nope")).is_err());
}

#[test]
fn test_concurrent_flushes_through_two_connections() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shared.db");
    let stores: Vec<Arc<AggregationStore>> = (0..2)
        .map(|_| Arc::new(AggregationStore::new(Arc::new(SqliteBackend::open(&path).unwrap()), 30, 2)))
        .collect();

    let handles: Vec<_> = (0..6)
        .map(|i| {
            let store = Arc::clone(&stores[i % 2]);
            std::thread::spawn(move || {
                let record = build(&vital_beacon("/same", &[("LCP", 1.0)]), day(20));
                for _ in 0..20 {
                    let report = store.flush_at(std::slice::from_ref(&record), day(20));
                    assert!(report.failed.is_empty());
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let rows = stores[0]
        .query(&AggregateQuery::new(Table::Statistics).sum("LCP_sum"))
        .unwrap();
    assert_eq!(rows[0].hits(), 120);
    assert_eq!(rows[0].sum("LCP_sum"), 120 * 1000);
}
