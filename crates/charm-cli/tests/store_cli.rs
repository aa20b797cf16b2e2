use assert_cmd::prelude::*;
use charm_store::{Changeset, LockPolicy, Notice, ObserverRef, SqliteStore, StateKey, Store};
use charm_value::Value;
use predicates::prelude::*;
use std::collections::BTreeMap;
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

fn notice(seq: u64, kind: &str, handler: &str) -> Notice {
    Notice {
        sequence_id: seq,
        event_kind: kind.into(),
        source_path: "Charm".into(),
        snapshot: Value::Map(BTreeMap::from([(
            "unit".to_string(),
            Value::Text("app/0".into()),
        )])),
        observer: ObserverRef::new("Charm", handler),
    }
}

fn seed(db: &Path) {
    let mut store = SqliteStore::open(db, LockPolicy::FailFast).expect("open store");
    store
        .commit(Changeset {
            state_writes: vec![(
                StateKey::new("Charm", "_stored"),
                Value::Map(BTreeMap::from([
                    ("count".to_string(), Value::Int(2)),
                    ("leader".to_string(), Value::Bool(true)),
                ])),
            )],
            notices_added: vec![
                notice(1, "start", "on_start"),
                notice(4, "config-changed", "on_config"),
                notice(7, "start", "on_start"),
            ],
            next_sequence: 10,
            ..Changeset::default()
        })
        .expect("seed commit");
}

fn charm(db: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("charm"));
    cmd.env_remove("CHARM_STATE_DB")
        .env_remove("CHARM_LOCK_TIMEOUT_MS")
        .arg("--db")
        .arg(db);
    cmd
}

fn json_data(cmd: &mut Command) -> serde_json::Value {
    let assert = cmd.arg("--json").assert().success();
    let output = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let json: serde_json::Value = serde_json::from_str(&output).expect("json");
    json["data"].clone()
}

#[test]
fn notices_lists_queue_in_delivery_order() {
    let tmp = TempDir::new().expect("tmpdir");
    let db = tmp.path().join("state.db");
    seed(&db);

    let data = json_data(charm(&db).arg("notices"));
    let arr = data.as_array().cloned().unwrap_or_default();
    let seqs: Vec<u64> = arr
        .iter()
        .map(|n| n["sequence_id"].as_u64().unwrap())
        .collect();
    assert_eq!(seqs, vec![1, 4, 7]);
    assert_eq!(arr[1]["event_kind"], "config-changed");
    assert_eq!(arr[1]["observer_handler_name"], "on_config");
    assert_eq!(arr[0]["snapshot"]["unit"], "app/0");

    charm(&db)
        .arg("notices")
        .assert()
        .success()
        .stdout(predicate::str::contains("#4 config-changed from Charm -> Charm.on_config"));
}

#[test]
fn state_list_and_get_read_stored_bags() {
    let tmp = TempDir::new().expect("tmpdir");
    let db = tmp.path().join("state.db");
    seed(&db);

    let keys = json_data(charm(&db).args(["state", "list"]));
    assert_eq!(
        keys,
        serde_json::json!([{ "owner_path": "Charm", "name": "_stored" }])
    );

    let bag = json_data(charm(&db).args(["state", "get", "Charm", "_stored"]));
    assert_eq!(bag, serde_json::json!({ "count": 2, "leader": true }));

    charm(&db)
        .args(["state", "get", "Charm", "missing"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no stored state for Charm:missing"));
}

#[test]
fn ack_drops_only_that_observers_notices() {
    let tmp = TempDir::new().expect("tmpdir");
    let db = tmp.path().join("state.db");
    seed(&db);

    let data = json_data(charm(&db).args(["ack", "Charm", "on_start"]));
    assert_eq!(data["removed"], 2);
    assert_eq!(data["observer"], "Charm.on_start");

    let mut store = SqliteStore::open(&db, LockPolicy::FailFast).unwrap();
    let remaining = store.load_notices().unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].notice.observer.handler_name, "on_config");
    assert_eq!(store.next_sequence().unwrap(), 10, "ack must not rewind ids");
    store.rollback().unwrap();

    let data = json_data(charm(&db).args(["ack", "Charm", "on_start"]));
    assert_eq!(data["removed"], 0);
}

#[test]
fn missing_database_is_not_created() {
    let tmp = TempDir::new().expect("tmpdir");
    let db = tmp.path().join("absent.db");

    charm(&db)
        .arg("notices")
        .assert()
        .failure()
        .stderr(predicate::str::contains("no state database"));
    assert!(!db.exists());
}

#[test]
fn help_lists_commands_and_flags() {
    let output = Command::new(assert_cmd::cargo::cargo_bin!("charm"))
        .arg("--help")
        .output()
        .expect("run help");
    assert!(output.status.success(), "--help should succeed");
    let text = String::from_utf8_lossy(&output.stdout);
    for needle in ["notices", "state", "ack", "--db", "--json", "--lock-timeout-ms"] {
        assert!(
            text.contains(needle),
            "help output should contain '{needle}'"
        );
    }
}
