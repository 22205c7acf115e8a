//! Integration tests for the update path: rate computation, primary value
//! production, and consolidation into archives.

use std::sync::Arc;

use rrdb::{ArcDef, ConsolidationFn, DsDef, DsType, FetchRequest, RrdDb, RrdDef, RrdError};
use tempfile::tempdir;

fn stored_rows(db: &RrdDb, arc: usize, ds: usize) -> Vec<f64> {
    db.snapshot().unwrap().archives[arc].states[ds].values.clone()
}

fn assert_rows(actual: &[f64], expected: &[f64]) {
    assert_eq!(actual.len(), expected.len(), "row count");
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        if e.is_nan() {
            assert!(a.is_nan(), "row {i}: expected NaN, got {a}");
        } else {
            assert!((a - e).abs() < 1e-9, "row {i}: expected {e}, got {a}");
        }
    }
}

#[test]
fn test_gauge_rows_wrap_around() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("gauge.rrdb");

    let mut def = RrdDef::new(&path, 0, 300);
    def.add_datasource(DsDef::new("value", DsType::Gauge, 600, None, None).unwrap())
        .unwrap();
    def.add_archive(ArcDef::new(ConsolidationFn::Average, 0.5, 1, 3).unwrap())
        .unwrap();
    let db = RrdDb::create(&def).unwrap();

    db.update_values(300, &[10.0]).unwrap();
    db.update_values(600, &[20.0]).unwrap();
    db.update_values(900, &[30.0]).unwrap();

    let request = FetchRequest::new(ConsolidationFn::Average, 300, 900).unwrap();
    let data = db.fetch(&request).unwrap();
    assert_eq!(data.timestamps(), &[300, 600, 900]);
    assert_rows(data.values_by_name("value").unwrap(), &[10.0, 20.0, 30.0]);

    db.update_values(1200, &[40.0]).unwrap();
    assert_rows(&stored_rows(&db, 0, 0), &[20.0, 30.0, 40.0]);

    let request = FetchRequest::new(ConsolidationFn::Average, 600, 1200).unwrap();
    let data = db.fetch(&request).unwrap();
    assert_eq!(data.timestamps(), &[600, 900, 1200]);
    assert_rows(data.values_by_name("value").unwrap(), &[20.0, 30.0, 40.0]);
    assert_eq!(db.last_update_time().unwrap(), 1200);
    assert_eq!(db.last_archive_update_time().unwrap(), 1200);
}

#[test]
fn test_counter_wraparound() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("counter.rrdb");

    let mut def = RrdDef::new(&path, 0, 1);
    def.add_datasource(DsDef::new("packets", DsType::Counter, 10, None, None).unwrap())
        .unwrap();
    def.add_archive(ArcDef::new(ConsolidationFn::Last, 0.5, 1, 5).unwrap())
        .unwrap();
    let db = RrdDb::create(&def).unwrap();

    db.update_values(1, &[4_294_967_286.0]).unwrap();
    db.update_values(2, &[5.0]).unwrap();

    let rows = stored_rows(&db, 0, 0);
    assert!(rows[3].is_nan(), "first counter reading has no rate");
    assert_eq!(rows[4], 15.0);
}

#[test]
fn test_rates_outside_bounds_are_unknown() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("bounds.rrdb");

    let mut def = RrdDef::new(&path, 0, 60);
    def.add_datasource(DsDef::new("pct", DsType::Gauge, 120, Some(0.0), Some(100.0)).unwrap())
        .unwrap();
    def.add_archive(ArcDef::new(ConsolidationFn::Max, 0.5, 1, 3).unwrap())
        .unwrap();
    let db = RrdDb::create(&def).unwrap();

    db.update_values(60, &[50.0]).unwrap();
    db.update_values(120, &[150.0]).unwrap();
    db.update_values(180, &[-1.0]).unwrap();

    assert_rows(&stored_rows(&db, 0, 0), &[50.0, f64::NAN, f64::NAN]);
    assert_eq!(db.last_datasource_values().unwrap(), vec![-1.0]);
}

#[test]
fn test_xff_threshold() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("xff.rrdb");

    let mut def = RrdDef::new(&path, 0, 300);
    def.add_datasource(DsDef::new("value", DsType::Gauge, 600, None, None).unwrap())
        .unwrap();
    def.add_archive(ArcDef::new(ConsolidationFn::Average, 0.5, 4, 2).unwrap())
        .unwrap();
    let db = RrdDb::create(&def).unwrap();

    // One unknown primary value out of four: averaged over the known ones.
    db.update_values(300, &[f64::NAN]).unwrap();
    db.update_values(600, &[10.0]).unwrap();
    db.update_values(900, &[20.0]).unwrap();
    db.update_values(1200, &[30.0]).unwrap();

    // Three out of four: the row is unknown.
    db.update_values(1500, &[f64::NAN]).unwrap();
    db.update_values(1800, &[f64::NAN]).unwrap();
    db.update_values(2100, &[f64::NAN]).unwrap();
    db.update_values(2400, &[40.0]).unwrap();

    assert_rows(&stored_rows(&db, 0, 0), &[20.0, f64::NAN]);
}

#[test]
fn test_gap_fills_rows_in_bulk() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("gap.rrdb");

    let mut def = RrdDef::new(&path, 0, 300);
    def.add_datasource(DsDef::new("value", DsType::Gauge, 3600, None, None).unwrap())
        .unwrap();
    def.add_archive(ArcDef::new(ConsolidationFn::Average, 0.5, 1, 4).unwrap())
        .unwrap();
    let db = RrdDb::create(&def).unwrap();

    db.update_values(300, &[1.0]).unwrap();
    // Within the heartbeat: every skipped step gets the same rate.
    db.update_values(1500, &[5.0]).unwrap();

    assert_rows(&stored_rows(&db, 0, 0), &[5.0, 5.0, 5.0, 5.0]);
}

#[test]
fn test_force_zeros_replaces_unknown_primary_values() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("zeros.rrdb");

    let mut def = RrdDef::new(&path, 0, 300);
    def.add_datasource(
        DsDef::new("errors", DsType::Gauge, 600, None, None)
            .unwrap()
            .with_force_zeros(true),
    )
    .unwrap();
    def.add_archive(ArcDef::new(ConsolidationFn::Total, 0.5, 1, 2).unwrap())
        .unwrap();
    let db = RrdDb::create(&def).unwrap();

    db.update_values(300, &[3.0]).unwrap();
    db.update_values(600, &[f64::NAN]).unwrap();

    assert_rows(&stored_rows(&db, 0, 0), &[3.0, 0.0]);
}

#[test]
fn test_sample_api_and_ordering() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("sample.rrdb");

    let mut def = RrdDef::new(&path, 1_000, 10);
    def.add_datasource(DsDef::new("in", DsType::Gauge, 20, None, None).unwrap())
        .unwrap();
    def.add_datasource(DsDef::new("out", DsType::Gauge, 20, None, None).unwrap())
        .unwrap();
    def.add_archive(ArcDef::new(ConsolidationFn::Average, 0.5, 1, 10).unwrap())
        .unwrap();
    let db = RrdDb::create(&def).unwrap();

    let mut sample = db.create_sample(1_010).unwrap();
    assert_eq!(sample.ds_names(), &["in".to_string(), "out".to_string()]);
    sample.set_value_by_name("out", 2.0).unwrap();
    db.update(&sample).unwrap();

    let err = db.update(&sample).unwrap_err();
    assert!(matches!(err, RrdError::State(_)));

    sample.parse_template("1020:1:U").unwrap();
    db.update(&sample).unwrap();
    let last = db.last_datasource_values().unwrap();
    assert_eq!(last[0], 1.0);
    assert!(last[1].is_nan());
}

#[test]
fn test_concurrent_updates_and_reads() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("shared.rrdb");

    let mut def = RrdDef::new(&path, 0, 60);
    def.add_datasource(DsDef::new("value", DsType::Gauge, 120, None, None).unwrap())
        .unwrap();
    def.add_archive(ArcDef::new(ConsolidationFn::Average, 0.5, 1, 100).unwrap())
        .unwrap();
    let db = Arc::new(RrdDb::create(&def).unwrap());

    let writer = {
        let db = Arc::clone(&db);
        std::thread::spawn(move || {
            for i in 1..=200 {
                db.update_values(i * 60, &[1.0]).unwrap();
            }
        })
    };
    let readers: Vec<_> = (0..3)
        .map(|_| {
            let db = Arc::clone(&db);
            std::thread::spawn(move || {
                for _ in 0..100 {
                    let request = FetchRequest::new(ConsolidationFn::Average, 0, 12_000).unwrap();
                    let data = db.fetch(&request).unwrap();
                    assert_eq!(data.ds_names(), &["value".to_string()]);
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }

    assert_eq!(db.last_update_time().unwrap(), 12_000);
    assert!(stored_rows(&db, 0, 0).iter().all(|&v| v == 1.0));
}
