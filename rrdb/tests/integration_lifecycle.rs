//! Integration tests for the database lifecycle: create, reopen, close,
//! validation of stored images, tuning, dumps, state copy, and import.

use rrdb::error::{BackendError, DefinitionError, StateError};
use rrdb::{
    ArcDef, ConsolidationFn, DsDef, DsType, FileBackendFactory, MemoryBackendFactory, RrdDb,
    RrdDef, RrdError, RrdSnapshot,
};
use std::path::Path;
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;
use tempfile::tempdir;

fn traffic_def(path: &Path) -> RrdDef {
    let mut def = RrdDef::new(path, 1_000, 60);
    def.info = "edge router".to_string();
    def.add_datasource(DsDef::new("in", DsType::Counter, 120, Some(0.0), None).unwrap())
        .unwrap();
    def.add_datasource(DsDef::new("temp", DsType::Gauge, 120, None, Some(90.0)).unwrap())
        .unwrap();
    def.add_archive(ArcDef::new(ConsolidationFn::Average, 0.5, 1, 10).unwrap())
        .unwrap();
    def.add_archive(ArcDef::new(ConsolidationFn::Max, 0.5, 5, 4).unwrap())
        .unwrap();
    def
}

fn feed(db: &RrdDb, from: i64, count: i64) {
    for i in 0..count {
        let t = from + i * 60;
        #[allow(clippy::cast_precision_loss)]
        let counter = (t * 100) as f64;
        db.update_values(t, &[counter, 40.0 + (i % 3) as f64]).unwrap();
    }
}

#[test]
fn test_create_reopen_and_persist() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("traffic.rrdb");
    let def = traffic_def(&path);

    {
        let db = RrdDb::create(&def).unwrap();
        assert_eq!(
            std::fs::metadata(&path).unwrap().len(),
            def.estimated_size()
        );
        feed(&db, 1_060, 12);
        db.close().unwrap();
        assert!(db.is_closed());
    }

    let db = RrdDb::open(&path, false).unwrap();
    assert_eq!(db.step().unwrap(), 60);
    assert_eq!(db.last_update_time().unwrap(), 1_720);
    assert_eq!(db.info().unwrap(), "edge router");
    assert_eq!(db.ds_names().unwrap(), vec!["in", "temp"]);
    assert_eq!(db.arc_index(ConsolidationFn::Max, 5).unwrap(), 1);

    let mut reopened = db.rrd_def().unwrap();
    reopened.start_time = def.start_time;
    assert_eq!(reopened, def);

    // Updates continue where the previous session stopped.
    feed(&db, 1_780, 1);
    assert_eq!(db.last_update_time().unwrap(), 1_780);
}

#[test]
fn test_read_only_open_rejects_writes() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("ro.rrdb");
    RrdDb::create(&traffic_def(&path)).unwrap().close().unwrap();

    let db = RrdDb::open(&path, true).unwrap();
    let err = db.update_values(1_060, &[1.0, 1.0]).unwrap_err();
    assert!(matches!(err, RrdError::Backend(BackendError::ReadOnly { .. })));
    assert!(db.set_info("x").is_err());
    assert_eq!(db.last_update_time().unwrap(), 1_000);
}

#[test]
fn test_open_rejects_missing_and_corrupted_files() {
    let temp_dir = tempdir().unwrap();

    let missing = temp_dir.path().join("missing.rrdb");
    assert!(RrdDb::open(&missing, true).unwrap_err().is_not_found());

    let short = temp_dir.path().join("short.rrdb");
    std::fs::write(&short, b"RRDB").unwrap();
    assert!(matches!(
        RrdDb::open(&short, true).unwrap_err(),
        RrdError::Backend(BackendError::Corrupted { .. })
    ));

    let garbage = temp_dir.path().join("garbage.rrdb");
    std::fs::write(&garbage, vec![0u8; 512]).unwrap();
    assert!(matches!(
        RrdDb::open(&garbage, true).unwrap_err(),
        RrdError::Backend(BackendError::Corrupted { .. })
    ));

    // A valid header with its archives cut off.
    let truncated = temp_dir.path().join("truncated.rrdb");
    RrdDb::create(&traffic_def(&truncated)).unwrap().close().unwrap();
    let file = std::fs::OpenOptions::new()
        .write(true)
        .open(&truncated)
        .unwrap();
    file.set_len(400).unwrap();
    drop(file);
    assert!(matches!(
        RrdDb::open(&truncated, true).unwrap_err(),
        RrdError::Backend(BackendError::Corrupted { .. })
    ));
}

#[test]
fn test_create_rejects_unsupported_version() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("future.rrdb");
    let mut def = traffic_def(&path);
    def.version = 7;

    assert!(matches!(
        RrdDb::create(&def).unwrap_err(),
        RrdError::Definition(DefinitionError::UnsupportedVersion {
            version: 7,
            supported: 1
        })
    ));
    assert!(!path.exists());

    def.version = 1;
    RrdDb::create(&def).unwrap().close().unwrap();
    RrdDb::open(&path, false).unwrap();
}

#[test]
fn test_create_overwrites_existing_file() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("overwrite.rrdb");
    std::fs::write(&path, vec![0xAB; 10_000]).unwrap();

    let def = traffic_def(&path);
    RrdDb::create(&def).unwrap().close().unwrap();
    assert_eq!(
        std::fs::metadata(&path).unwrap().len(),
        def.estimated_size()
    );
    let db = RrdDb::open(&path, true).unwrap();
    assert!(db.last_datasource_values().unwrap().iter().all(|v| v.is_nan()));
}

#[test]
fn test_closed_database() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("closed.rrdb");
    let db = RrdDb::create(&traffic_def(&path)).unwrap();
    db.close().unwrap();
    db.close().unwrap();

    for err in [
        db.update_values(1_060, &[1.0, 1.0]).unwrap_err(),
        db.ds_names().unwrap_err(),
        db.set_heartbeat("in", 10).unwrap_err(),
        db.dump().unwrap_err(),
    ] {
        assert!(matches!(err, RrdError::State(StateError::Closed { .. })));
    }
}

#[test]
fn test_ds_type_change_resets_state() {
    let factory = MemoryBackendFactory::new();
    let db = RrdDb::create_with_factory(&traffic_def(Path::new("retype")), &factory).unwrap();
    feed(&db, 1_060, 3);

    // Unchanged type keeps the state.
    db.set_ds_type("temp", DsType::Gauge).unwrap();
    assert!(!db.last_datasource_values().unwrap()[1].is_nan());

    db.set_ds_type("temp", DsType::Derive).unwrap();
    let snapshot = db.snapshot().unwrap();
    assert!(snapshot.datasources[1].last_value.is_nan());
    assert_eq!(snapshot.datasources[1].accum_value, 0.0);
    assert!(snapshot.archives[1].states[1].accum_value.is_nan());
    // The other datasource is untouched.
    assert!(!snapshot.archives[1].states[0].accum_value.is_nan());
}

#[test]
fn test_text_dump() {
    let factory = MemoryBackendFactory::new();
    let db = RrdDb::create_with_factory(&traffic_def(Path::new("dump")), &factory).unwrap();
    feed(&db, 1_060, 2);

    let dump = db.dump().unwrap();
    assert!(dump.contains("step = 60"));
    assert!(dump.contains("last_update = 1120"));
    assert!(dump.contains("ds[in].type = COUNTER"));
    assert!(dump.contains("ds[temp].max = 90"));
    assert!(dump.contains("ds[in].max = U"));
    assert!(dump.contains("rra[1].cf = MAX"));
    assert!(dump.contains("  1020: NaN 40"));
}

#[test]
fn test_copy_state_matches_by_name_and_archive() {
    let factory = MemoryBackendFactory::new();
    let source = RrdDb::create_with_factory(&traffic_def(Path::new("src")), &factory).unwrap();
    feed(&source, 1_060, 8);

    let mut def = RrdDef::new("dst", 0, 60);
    def.add_datasource(DsDef::new("temp", DsType::Gauge, 120, None, None).unwrap())
        .unwrap();
    def.add_datasource(DsDef::new("new", DsType::Gauge, 120, None, None).unwrap())
        .unwrap();
    def.add_archive(ArcDef::new(ConsolidationFn::Average, 0.5, 1, 5).unwrap())
        .unwrap();
    def.add_archive(ArcDef::new(ConsolidationFn::Min, 0.5, 1, 5).unwrap())
        .unwrap();
    let destination = RrdDb::create_with_factory(&def, &factory).unwrap();

    source.copy_state_to(&destination).unwrap();
    assert_eq!(destination.last_update_time().unwrap(), 1_480);

    let src = source.snapshot().unwrap();
    let dst = destination.snapshot().unwrap();
    let src_temp = &src.archives[0].states[1].values;
    assert_eq!(dst.archives[0].states[0].values, src_temp[5..].to_vec());
    assert!(dst.archives[0].states[1].values.iter().all(|v| v.is_nan()));
    assert!(dst.archives[1].states[0].values.iter().all(|v| v.is_nan()));
    assert_eq!(dst.datasources[0].last_value, src.datasources[1].last_value);

    // Type mismatch on a matched name.
    let mut def = RrdDef::new("mismatch", 0, 60);
    def.add_datasource(DsDef::new("in", DsType::Gauge, 120, None, None).unwrap())
        .unwrap();
    def.add_archive(ArcDef::new(ConsolidationFn::Average, 0.5, 1, 5).unwrap())
        .unwrap();
    let mismatch = RrdDb::create_with_factory(&def, &factory).unwrap();
    assert!(matches!(
        source.copy_state_to(&mismatch).unwrap_err(),
        RrdError::Definition(DefinitionError::IncompatibleState { .. })
    ));
}

#[test]
fn test_copy_state_into_identical_definition() {
    let factory = MemoryBackendFactory::new();
    let source = RrdDb::create_with_factory(&traffic_def(Path::new("a")), &factory).unwrap();
    let destination = RrdDb::create_with_factory(&traffic_def(Path::new("b")), &factory).unwrap();

    // Samples at :40 leave every interval half open.
    feed(&source, 1_060, 8);
    let expected = source.snapshot().unwrap();
    assert_eq!(expected.datasources[0].accum_value, 4_000.0);
    assert_eq!(expected.datasources[1].accum_value, 40.0 * 41.0);
    // Four of five steps of the open MAX bucket are in.
    assert_eq!(expected.archives[1].states[0].accum_value, 100.0);
    assert_eq!(expected.archives[1].states[0].unknown_steps, 0);

    source.copy_state_to(&destination).unwrap();
    let copied = destination.snapshot().unwrap();
    assert_eq!(copied.last_update_time, expected.last_update_time);
    for (dst, src) in copied.datasources.iter().zip(&expected.datasources) {
        assert_eq!(dst.accum_value, src.accum_value);
        assert_eq!(dst.unknown_seconds, src.unknown_seconds);
        assert_eq!(dst.last_value, src.last_value);
    }
    for (dst, src) in copied.archives.iter().zip(&expected.archives) {
        for (dst, src) in dst.states.iter().zip(&src.states) {
            assert_eq!(dst.accum_value.to_bits(), src.accum_value.to_bits());
            assert_eq!(dst.unknown_steps, src.unknown_steps);
        }
    }
    assert_eq!(
        serde_json::to_string(&copied).unwrap(),
        serde_json::to_string(&expected).unwrap()
    );

    // Both continue identically.
    feed(&source, 1_540, 5);
    feed(&destination, 1_540, 5);
    assert_eq!(destination.dump().unwrap(), source.dump().unwrap());
}

#[test]
fn test_opposite_copies_on_two_threads() {
    let factory = MemoryBackendFactory::new();
    let a = Arc::new(RrdDb::create_with_factory(&traffic_def(Path::new("a")), &factory).unwrap());
    let b = Arc::new(RrdDb::create_with_factory(&traffic_def(Path::new("b")), &factory).unwrap());
    feed(&a, 1_060, 3);

    let (done, finished) = mpsc::channel();
    for (from, to) in [(Arc::clone(&a), Arc::clone(&b)), (Arc::clone(&b), Arc::clone(&a))] {
        let done = done.clone();
        thread::spawn(move || {
            for _ in 0..2_000 {
                from.copy_state_to(&to).unwrap();
            }
            done.send(()).unwrap();
        });
    }

    for _ in 0..2 {
        finished
            .recv_timeout(Duration::from_secs(30))
            .expect("copies in opposite directions did not finish");
    }
    assert_eq!(a.last_update_time().unwrap(), b.last_update_time().unwrap());
}

#[test]
fn test_snapshot_json_import_round_trip() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("original.rrdb");
    let original = RrdDb::create(&traffic_def(&path)).unwrap();
    feed(&original, 1_060, 17);

    let snapshot = original.snapshot().unwrap();
    let json = serde_json::to_string(&snapshot).unwrap();
    let parsed: RrdSnapshot = serde_json::from_str(&json).unwrap();

    let factory = MemoryBackendFactory::new();
    let from_json = RrdDb::import("from_json", &parsed, &factory).unwrap();
    assert_eq!(
        serde_json::to_string(&from_json.snapshot().unwrap()).unwrap(),
        serde_json::to_string(&parsed).unwrap()
    );

    let imported = RrdDb::import("imported", &snapshot, &factory).unwrap();
    assert_eq!(imported.dump().unwrap(), original.dump().unwrap());

    // Both continue identically.
    feed(&original, 2_080, 3);
    feed(&imported, 2_080, 3);
    assert_eq!(imported.dump().unwrap(), original.dump().unwrap());
}

#[test]
fn test_import_rejects_mismatched_rows_before_creating() {
    let temp_dir = tempdir().unwrap();
    let factory = MemoryBackendFactory::new();
    let source = RrdDb::create_with_factory(&traffic_def(Path::new("rows")), &factory).unwrap();
    feed(&source, 1_060, 4);

    let mut snapshot = source.snapshot().unwrap();
    snapshot.archives[1].states[0].values.pop();

    let path = temp_dir.path().join("short-rows.rrdb");
    assert!(matches!(
        RrdDb::import(&path, &snapshot, &FileBackendFactory).unwrap_err(),
        RrdError::Definition(DefinitionError::IncompatibleState { .. })
    ));
    assert!(!path.exists());

    snapshot.archives[1].states[0].values.push(f64::NAN);
    RrdDb::import(&path, &snapshot, &FileBackendFactory)
        .unwrap()
        .close()
        .unwrap();
    assert!(path.exists());
}
