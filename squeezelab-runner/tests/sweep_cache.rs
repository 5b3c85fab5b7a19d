//! End-to-end sweep behavior: cache idempotence, schema rotation and
//! concurrent appends through one shared store.

use std::sync::Arc;

use chrono::NaiveDate;
use squeezelab_core::domain::Bar;
use squeezelab_core::engine::{EngineConfig, MarketData};
use squeezelab_runner::store::FINGERPRINT_COLUMN;
use squeezelab_runner::{
    fingerprint, Partition, ResultRecord, ResultStore, RunOptions, SqueezeParams, SweepRunner,
    SweepSpec,
};
use squeezelab_runner::params::ParamRange;
use tempfile::TempDir;

fn trending_data(bars: usize) -> MarketData {
    let t0 = NaiveDate::from_ymd_opt(2023, 3, 1)
        .unwrap()
        .and_hms_opt(9, 0, 0)
        .unwrap();
    let bars = (0..bars)
        .map(|i| {
            // Quiet stretch, breakout, fade: enough movement for signals.
            let close = if i < bars / 2 {
                100.0 + 0.02 * (i % 3) as f64
            } else {
                100.0 + 1.5 * (i - bars / 2) as f64
            };
            Bar {
                symbol: "BTC".into(),
                timestamp: t0 + chrono::Duration::minutes(5 * i as i64),
                open: close,
                high: close + 1.0,
                low: close - 1.0,
                close,
                volume: 1_000.0,
            }
        })
        .collect();
    MarketData::from_bars(bars)
}

fn partition() -> Partition {
    Partition {
        strategy: "squeeze".into(),
        symbol: "BTC".into(),
        start: NaiveDate::from_ymd_opt(2023, 3, 1)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap(),
        end: NaiveDate::from_ymd_opt(2023, 3, 3)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap(),
    }
}

fn sweep_combos() -> Vec<SqueezeParams> {
    SweepSpec {
        tp_atr_multiplier: ParamRange::Many(vec![2.0, 2.3, 2.6]),
        max_trade_duration: ParamRange::Many(vec![6, 9]),
        ..SweepSpec::default()
    }
    .expand()
}

#[test]
fn rerunning_a_sweep_computes_nothing() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(ResultStore::new(dir.path()));
    let data = trending_data(120);
    let combos = sweep_combos();

    let runner = SweepRunner::new(RunOptions::default()).with_store(Arc::clone(&store));
    let first = runner.run(&partition(), &combos, &data, &EngineConfig::default());
    assert_eq!(first.iter().filter(|i| i.is_computed()).count(), combos.len());

    let runner = SweepRunner::new(RunOptions::default()).with_store(store);
    let second = runner.run(&partition(), &combos, &data, &EngineConfig::default());
    assert_eq!(second.iter().filter(|i| i.is_computed()).count(), 0);
    assert_eq!(second.iter().filter(|i| i.is_cached()).count(), combos.len());
}

#[test]
fn run_options_do_not_change_the_cache_key() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(ResultStore::new(dir.path()));
    let data = trending_data(120);
    let combos = sweep_combos();

    let runner = SweepRunner::new(RunOptions::default()).with_store(Arc::clone(&store));
    let first = runner.run(&partition(), &combos, &data, &EngineConfig::default());

    // Different execution knobs, same parameters: every row must hit.
    let runner = SweepRunner::new(RunOptions {
        threads: 3,
        save_results: false,
        use_cache: true,
    })
    .with_store(store);
    let second = runner.run(&partition(), &combos, &data, &EngineConfig::default());

    assert_eq!(second.iter().filter(|i| i.is_cached()).count(), combos.len());
    for (a, b) in first.iter().zip(&second) {
        assert_eq!(a.fingerprint, b.fingerprint);
    }
}

#[test]
fn cached_rows_survive_a_schema_rotation() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(ResultStore::new(dir.path()));
    let data = trending_data(120);
    let p = partition();
    let combos = sweep_combos();

    let runner = SweepRunner::new(RunOptions::default()).with_store(Arc::clone(&store));
    runner.run(&p, &combos, &data, &EngineConfig::default());

    // A record with an extra column forces the next file number.
    let rotated = store
        .append(
            &p,
            &ResultRecord {
                fields: vec![
                    (FINGERPRINT_COLUMN.to_string(), "manual".to_string()),
                    ("note".to_string(), "hand-written".to_string()),
                ],
            },
        )
        .unwrap();
    assert!(rotated.ends_with("results_2.csv"));

    // Old rows are still found and a rerun still computes nothing.
    let fp = fingerprint::digest(&combos[0]);
    assert!(store.lookup(&p, &fp).unwrap().is_some());

    let runner = SweepRunner::new(RunOptions::default()).with_store(store);
    let rerun = runner.run(&p, &combos, &data, &EngineConfig::default());
    assert!(rerun.iter().all(|i| i.is_cached()));
}

#[test]
fn parallel_sweep_appends_every_row_exactly_once() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(ResultStore::new(dir.path()));
    let data = trending_data(120);
    let p = partition();
    let combos = sweep_combos();

    let runner = SweepRunner::new(RunOptions {
        threads: 4,
        ..RunOptions::default()
    })
    .with_store(Arc::clone(&store));
    runner.run(&p, &combos, &data, &EngineConfig::default());

    // Every combination has exactly one row under its fingerprint.
    for params in &combos {
        let fp = fingerprint::digest(params);
        assert!(store.lookup(&p, &fp).unwrap().is_some());
    }

    // And the file holds one data row per combination, no duplicates.
    let file = p.dir(dir.path()).join("results_1.csv");
    let mut reader = csv::Reader::from_path(file).unwrap();
    assert_eq!(reader.records().count(), combos.len());
}
