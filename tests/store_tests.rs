use std::sync::Arc;

use tabseal_core::prelude::*;
use tabseal_exec::{Recorder, RunOptions, RunStatus};
use tabseal_seal::VerifyMode;
use tabseal_store::{build_store_from_config, FsStore, Store};

fn orders(rows: &[(i64, &str)]) -> Arc<dyn Dataset> {
    Arc::new(
        Table::from_rows(
            Schema::new(vec![
                Field::new("order_id", DataType::Int64, false),
                Field::new("state", DataType::Utf8, true),
            ]),
            rows.iter()
                .map(|(id, s)| vec![Scalar::I64(*id), Scalar::Str(s.to_string())])
                .collect(),
        )
        .expect("table"),
    )
}

fn config() -> RecorderConfig {
    let mut cfg = RecorderConfig::default();
    cfg.diff = cfg.diff.with_primary_key(["order_id"]);
    cfg
}

#[test]
fn test_file_store_run_verifies_after_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store_cfg = StoreConfig {
        uri: None,
        root: dir.path().to_string_lossy().to_string(),
    };
    let rec = Recorder::with_store_config("shop", "orders", config(), &store_cfg).expect("recorder");
    let mut run = rec
        .start_run(RunOptions::default().with_run_id("nightly-01"))
        .expect("run");
    let raw = orders(&[(1, "new"), (2, "new")]);
    let mut s = run.step("ingest", None).expect("ingest");
    s.set_output(Arc::clone(&raw)).expect("output");
    s.close().expect("close");
    let mut s = run.step("ship", Some(raw)).expect("ship");
    s.set_output(orders(&[(1, "shipped"), (2, "new")])).expect("output");
    s.close().expect("close");
    let summary = run.finish().expect("finish");
    assert_eq!(summary.status, RunStatus::Finished);
    let head = summary.chain_head.expect("head");

    // A fresh store over the same directory sees the same run.
    let reopened = Recorder::new(
        "shop",
        "orders",
        config(),
        Arc::new(FsStore::new(dir.path())),
    )
    .expect("recorder");
    let report = reopened
        .verify_run("nightly-01", VerifyMode::Deep, Some(&head))
        .expect("verify");
    assert!(report.ok, "{}", report.detail);

    let run_report = reopened.load_run_report("nightly-01").expect("report");
    assert_eq!(run_report.steps.len(), 2);
    assert_eq!(run_report.run.chain_head, Some(head));

    // Reusing a run id is refused.
    assert!(reopened
        .start_run(RunOptions::default().with_run_id("nightly-01"))
        .is_err());
}

#[test]
fn test_file_uri_builder_write_read() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cfg = StoreConfig {
        uri: Some(format!("file://{}", dir.path().display())),
        root: "ignored".into(),
    };
    let store = build_store_from_config(&cfg).expect("fs store");
    store.put("runs/a/chain.json", b"{}").expect("put");
    assert_eq!(store.get("runs/a/chain.json").expect("get"), b"{}");
    assert!(dir.path().join("runs/a/chain.json").exists());
    assert_eq!(store.list("runs/").expect("list"), vec!["runs/a/chain.json"]);
}

#[test]
fn test_memory_uri_and_invalid_scheme() {
    let cfg = StoreConfig {
        uri: Some("memory://".into()),
        root: String::new(),
    };
    let store = build_store_from_config(&cfg).expect("memory store");
    assert!(!store.exists("x").expect("exists"));
    store.put("x", b"1").expect("put");
    assert_eq!(store.size("x").expect("size"), 1);

    let cfg = StoreConfig {
        uri: Some("ftp://example.com/runs".into()),
        root: String::new(),
    };
    let err = build_store_from_config(&cfg).err().expect("should fail");
    assert!(err.to_string().contains("unsupported store scheme"));
}

#[test]
fn test_missing_object_is_an_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = FsStore::new(dir.path());
    assert!(store.get("nope.json").is_err());
    assert!(!store.exists("nope.json").expect("exists"));
}
