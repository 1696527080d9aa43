//! Manifest load errors, validation and atomic save.

use assert_fs::prelude::*;
use predicates::prelude::predicate;
use troupe_core::{AgentId, Manifest, ManifestError, MANIFEST_FILE};

// ---------------------------------------------------------------------------
// 1. Load error messages
// ---------------------------------------------------------------------------

#[test]
fn load_corrupt_yaml_returns_parse_error_with_path() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let file = dir.child(MANIFEST_FILE);
    file.write_str(": : corrupt : yaml : !!!\n  - broken: [unclosed")
        .expect("write");

    let err = Manifest::load(file.path()).unwrap_err();
    assert!(matches!(err, ManifestError::Parse { .. }), "got: {err}");
    assert!(err.to_string().contains(MANIFEST_FILE));
}

#[test]
fn load_wrong_shape_returns_parse_error() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let file = dir.child(MANIFEST_FILE);
    file.write_str("- this is a list, not a mapping\n").expect("write");

    let err = Manifest::load(file.path()).unwrap_err();
    assert!(matches!(err, ManifestError::Parse { .. }), "got: {err}");
}

#[test]
fn load_json_manifest_by_extension() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let file = dir.child("agents.json");
    file.write_str(
        r#"{
  "project_path": "game",
  "agents": [
    { "id": "core_systems",
      "tasks": [ { "type": "testing", "title": "Run suite", "test_target": "all" } ] }
  ]
}"#,
    )
    .expect("write");

    let manifest = Manifest::load(file.path()).expect("load json");
    let agent = manifest
        .agent(&AgentId::from("core_systems"))
        .expect("agent present");
    assert_eq!(agent.tasks.len(), 1);
    assert_eq!(agent.tasks[0].str_field("test_target"), Some("all"));
    assert_eq!(manifest.project_root(file.path()), dir.path().join("game"));
}

#[test]
fn malformed_json_reports_json_error() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let file = dir.child("agents.json");
    file.write_str("{ \"agents\": [ ").expect("write");

    let err = Manifest::load(file.path()).unwrap_err();
    assert!(matches!(err, ManifestError::Json { .. }), "got: {err}");
}

// ---------------------------------------------------------------------------
// 2. Validation
// ---------------------------------------------------------------------------

#[test]
fn empty_task_type_is_rejected_on_load() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let file = dir.child(MANIFEST_FILE);
    file.write_str(
        "agents:\n  - id: a\n    tasks:\n      - type: ''\n        title: nothing\n",
    )
    .expect("write");

    let err = Manifest::load(file.path()).unwrap_err();
    assert!(matches!(err, ManifestError::Invalid(_)), "got: {err}");
    assert!(err.to_string().contains("empty type"));
}

#[test]
fn empty_agent_id_is_rejected() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let file = dir.child(MANIFEST_FILE);
    file.write_str("agents:\n  - id: '  '\n    tasks: []\n")
        .expect("write");

    let err = Manifest::load(file.path()).unwrap_err();
    assert!(err.to_string().contains("must not be empty"), "got: {err}");
}

// ---------------------------------------------------------------------------
// 3. Save
// ---------------------------------------------------------------------------

#[test]
fn save_then_load_preserves_agents() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let file = dir.child(MANIFEST_FILE);
    Manifest::demo().save(file.path(), false).expect("save");

    file.assert(predicate::path::exists());
    file.assert(predicate::str::contains("demo_agent_2"));
    let loaded = Manifest::load(file.path()).expect("load");
    assert_eq!(loaded, Manifest::demo());
}

#[test]
fn save_creates_missing_parent_dirs() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let file = dir.child("nested/deeper").child(MANIFEST_FILE);
    Manifest::demo().save(file.path(), false).expect("save");
    file.assert(predicate::path::exists());
}

#[cfg(unix)]
#[test]
fn saved_manifest_is_owner_only() {
    use std::os::unix::fs::PermissionsExt;

    let dir = assert_fs::TempDir::new().expect("tempdir");
    let file = dir.child(MANIFEST_FILE);
    Manifest::demo().save(file.path(), false).expect("save");

    let mode = std::fs::metadata(file.path()).expect("meta").permissions().mode();
    assert_eq!(mode & 0o777, 0o600);
}
