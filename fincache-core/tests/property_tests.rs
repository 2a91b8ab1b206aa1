//! Property tests for cache and indicator invariants.
//!
//! Uses proptest to verify:
//! 1. Round-trip: `put` then `get` returns the table unchanged, from the
//!    session and from disk in a fresh session
//! 2. Moving averages never mutate their input and are idempotent
//! 3. `MA{w}` is null for the first `w-1` rows and the trailing mean after

use chrono::{Duration, NaiveDate};
use fincache_core::indicators::with_moving_averages;
use fincache_core::remote::OfflineSource;
use fincache_core::{
    CacheKey, Column, ColumnKind, CsvStore, DataTable, Provenance, Scalar, SessionScope,
    TieredDataCache,
};
use proptest::prelude::*;
use std::collections::BTreeSet;

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_float_cell() -> impl Strategy<Value = Scalar> {
    prop_oneof![
        1 => Just(Scalar::Null),
        6 => (-1.0e12..1.0e12_f64).prop_map(Scalar::Float),
    ]
}

fn arb_text_cell() -> impl Strategy<Value = Scalar> {
    prop_oneof![
        1 => Just(Scalar::Null),
        1 => Just(Scalar::Text(String::new())),
        4 => "[ A-Za-z0-9,;\"]{0,12}".prop_map(Scalar::Text),
    ]
}

/// A sorted statement table: unique report dates plus a float and a text column.
fn arb_statement() -> impl Strategy<Value = DataTable> {
    prop::collection::btree_set(0i64..4000, 1..24).prop_flat_map(|days: BTreeSet<i64>| {
        let n = days.len();
        (
            Just(days),
            prop::collection::vec(arb_float_cell(), n),
            prop::collection::vec(arb_text_cell(), n),
        )
            .prop_map(|(days, floats, texts)| {
                let base = NaiveDate::from_ymd_opt(2000, 1, 1).unwrap();
                let rows = days
                    .into_iter()
                    .zip(floats)
                    .zip(texts)
                    .map(|((d, f), t)| vec![Scalar::Date(base + Duration::days(d)), f, t])
                    .collect();
                DataTable::new(
                    vec![
                        Column::new("Report Date", ColumnKind::Date),
                        Column::new("Revenue", ColumnKind::Float),
                        Column::new("Currency", ColumnKind::Text),
                    ],
                    rows,
                    "Report Date",
                )
                .unwrap()
            })
    })
}

fn arb_closes() -> impl Strategy<Value = Vec<Option<f64>>> {
    prop::collection::vec(
        prop_oneof![1 => Just(None), 9 => (1.0..1000.0_f64).prop_map(Some)],
        0..120,
    )
}

fn price_table(closes: &[Option<f64>]) -> DataTable {
    let base = NaiveDate::from_ymd_opt(2020, 1, 2).unwrap();
    let rows = closes
        .iter()
        .enumerate()
        .map(|(i, c)| {
            vec![
                Scalar::Date(base + Duration::days(i as i64)),
                c.map_or(Scalar::Null, Scalar::Float),
            ]
        })
        .collect();
    DataTable::new(
        vec![
            Column::new("Date", ColumnKind::Date),
            Column::new("Close", ColumnKind::Float),
        ],
        rows,
        "Date",
    )
    .unwrap()
}

// ── 1. Round-trip ────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn put_get_roundtrip(table in arb_statement()) {
        let dir = tempfile::tempdir().unwrap();
        let cache = TieredDataCache::new(CsvStore::new(dir.path()), Box::new(OfflineSource));
        let key = CacheKey::parse("MSFT", "income", "quarterly").unwrap();

        let session = SessionScope::new();
        cache.put(&session, &key, table.clone()).unwrap();

        let hit = cache.get(&session, &key, false).unwrap();
        prop_assert_eq!(hit.provenance, Provenance::Session);
        prop_assert_eq!(&*hit.table, &table);

        let hit = cache.get(&SessionScope::new(), &key, false).unwrap();
        prop_assert_eq!(hit.provenance, Provenance::Disk);
        prop_assert_eq!(&*hit.table, &table);
    }
}

// ── 2. Purity and idempotence ────────────────────────────────────────

proptest! {
    #[test]
    fn moving_averages_are_pure_and_idempotent(
        closes in arb_closes(),
        windows in prop::collection::vec(0usize..30, 0..4),
    ) {
        let table = price_table(&closes);
        let snapshot = table.clone();

        let once = with_moving_averages(&table, &windows).unwrap();
        prop_assert_eq!(&table, &snapshot);

        let twice = with_moving_averages(&once, &windows).unwrap();
        prop_assert_eq!(&once, &twice);
    }
}

// ── 3. Trailing mean ─────────────────────────────────────────────────

proptest! {
    #[test]
    fn moving_average_is_trailing_mean(closes in arb_closes(), w in 1usize..25) {
        let out = with_moving_averages(&price_table(&closes), &[w]).unwrap();
        let ma = out.float_column(&format!("MA{w}")).unwrap();
        prop_assert_eq!(ma.len(), closes.len());

        for (i, value) in ma.iter().enumerate() {
            if i + 1 < w {
                prop_assert!(value.is_none(), "row {} should be null", i);
                continue;
            }
            let window: Option<Vec<f64>> = closes[i + 1 - w..=i].iter().copied().collect();
            match (window, value) {
                (None, v) => prop_assert!(v.is_none(), "null in window but row {} has {:?}", i, v),
                (Some(vals), Some(v)) => {
                    let expected = vals.iter().sum::<f64>() / w as f64;
                    prop_assert!(
                        (v - expected).abs() <= 1e-9 * expected.abs().max(1.0),
                        "row {}: {} != {}", i, v, expected
                    );
                }
                (Some(_), None) => prop_assert!(false, "row {} unexpectedly null", i),
            }
        }
    }
}
