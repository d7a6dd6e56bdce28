//! File-level diff engine coverage over persisted recordings.

use retrace::config::{BASELINE_PATH_ENV, MODE_ENV};
use retrace::diff::{has_drift, Diff};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

fn write_recording(dir: &Path, name: &str, document: &Value) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, serde_json::to_string(document).expect("encode recording"))
        .expect("write recording");
    path
}

fn query_recording(table: &str) -> Value {
    json!([
        {
            "type": "QueryRecord",
            "params": {"sql": "SELECT * FROM t"},
            "result": {"table": table},
            "seq": 0,
        },
    ])
}

#[test]
fn reordered_table_rows_are_not_drift() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let current = write_recording(
        dir.path(),
        "current.json",
        &query_recording(r#"[{"a": 5}, {"b": 7}]"#),
    );
    let previous = write_recording(
        dir.path(),
        "previous.json",
        &query_recording(r#"[{"b": 7}, {"a": 5}]"#),
    );

    let document = Diff::new(&current, &previous)
        .calculate_diff()
        .expect("calculate diff");
    assert_eq!(document, json!({"QueryRecord": {}}));
    assert!(!has_drift(&document));
}

#[test]
fn one_changed_table_value_is_reported_at_its_exact_path() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let current = write_recording(
        dir.path(),
        "current.json",
        &query_recording(r#"[{"a": 5}, {"b": 7}]"#),
    );
    let previous = write_recording(
        dir.path(),
        "previous.json",
        &query_recording(r#"[{"a": 5}, {"b": 10}]"#),
    );

    let document = Diff::new(&current, &previous)
        .calculate_diff()
        .expect("calculate diff");
    assert_eq!(
        document,
        json!({
            "QueryRecord": {
                "values_changed": {
                    "root[0]['result']['table'][1]['b']": {"new_value": 7, "old_value": 10}
                }
            }
        })
    );
    assert!(has_drift(&document));
}

#[test]
fn recorder_environment_variables_are_not_drift() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let current = write_recording(
        dir.path(),
        "current.json",
        &json!([
            {
                "type": "GetEnvRecord",
                "params": {},
                "result": {"env": {
                    MODE_ENV: "diff",
                    BASELINE_PATH_ENV: "previous.json",
                    "HOME": "/home/runner",
                }},
                "seq": 0,
            },
        ]),
    );
    let previous = write_recording(
        dir.path(),
        "previous.json",
        &json!([
            {
                "type": "GetEnvRecord",
                "params": {},
                "result": {"env": {
                    MODE_ENV: "record",
                    "HOME": "/home/runner",
                }},
                "seq": 0,
            },
        ]),
    );

    let document = Diff::new(&current, &previous)
        .calculate_diff()
        .expect("calculate diff");
    assert_eq!(document, json!({"GetEnvRecord": {}}));
}

#[test]
fn mixed_persisted_forms_compare_cleanly() {
    let dir = tempfile::tempdir().expect("create temp dir");
    // Current run wrote the flat sequenced form; the baseline is a legacy
    // kind-map recording.
    let current = write_recording(
        dir.path(),
        "current.json",
        &json!([
            {"type": "LoadFileRecord", "params": {"path": "a.txt", "strip": true}, "result": {"contents": "A"}, "seq": 0},
            {"type": "WriteFileRecord", "params": {"path": "out.txt", "contents": "x"}, "result": null, "seq": 1},
        ]),
    );
    let previous = write_recording(
        dir.path(),
        "previous.json",
        &json!({
            "LoadFileRecord": [
                {"params": {"path": "a.txt", "strip": true}, "result": {"contents": "A"}},
            ],
            "WriteFileRecord": [
                {"params": {"path": "out.txt", "contents": "x"}},
            ],
        }),
    );

    let document = Diff::new(&current, &previous)
        .calculate_diff()
        .expect("calculate diff");
    assert_eq!(
        document,
        json!({"LoadFileRecord": {}, "WriteFileRecord": {}})
    );
}

#[test]
fn extra_recorded_call_shows_up_as_an_added_item() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let current = write_recording(
        dir.path(),
        "current.json",
        &json!([
            {"type": "FetchRecord", "params": {"key": "a"}, "result": {"value": "1"}, "seq": 0},
            {"type": "FetchRecord", "params": {"key": "b"}, "result": {"value": "2"}, "seq": 1},
        ]),
    );
    let previous = write_recording(
        dir.path(),
        "previous.json",
        &json!([
            {"type": "FetchRecord", "params": {"key": "a"}, "result": {"value": "1"}, "seq": 0},
        ]),
    );

    let document = Diff::new(&current, &previous)
        .calculate_diff()
        .expect("calculate diff");
    assert_eq!(
        document,
        json!({
            "FetchRecord": {
                "iterable_item_added": {
                    "root[1]": {"params": {"key": "b"}, "result": {"value": "2"}}
                }
            }
        })
    );
}

#[test]
fn write_persists_the_diff_document() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let current = write_recording(dir.path(), "current.json", &json!([]));
    let previous = write_recording(dir.path(), "previous.json", &json!([]));
    let out = dir.path().join("diff.json");

    Diff::new(&current, &previous)
        .write(&out)
        .expect("write diff");
    let document: Value =
        serde_json::from_str(&std::fs::read_to_string(&out).expect("read diff"))
            .expect("parse diff");
    assert_eq!(document, json!({}));
}
