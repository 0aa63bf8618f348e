//! CLI integration tests for datamigrate.
//!
//! These tests verify argument parsing, exit codes, and full migrations
//! between JSON directory stores in a scratch directory.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

/// Get a command for the datamigrate binary, run inside `dir`.
fn cmd(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("datamigrate").unwrap();
    cmd.current_dir(dir).env_remove("RUST_LOG");
    cmd
}

/// Lay out a config with a seeded `legacy` store and an empty `warehouse`.
fn workspace() -> TempDir {
    let dir = TempDir::new().unwrap();
    let legacy = dir.path().join("legacy");
    std::fs::create_dir_all(&legacy).unwrap();
    std::fs::write(
        legacy.join("users.json"),
        r#"[{"id": 1, "name": "Ada"}, {"id": 2, "name": "Grace"}, {"id": 3, "name": "Edsger"}]"#,
    )
    .unwrap();
    std::fs::write(
        legacy.join("orders.json"),
        r#"[{"id": 10, "total": 9.5}, {"id": 11, "total": 12.0}, {"id": 12, "total": 3.25}, {"id": 13, "total": null}]"#,
    )
    .unwrap();

    std::fs::write(
        dir.path().join("config.yaml"),
        r#"
stores:
  legacy:
    kind: json_dir
    path: ./legacy
  warehouse:
    kind: json_dir
    path: ./warehouse

migration:
  workers: 2
  batch_size: 2
  primary_keys:
    users: id
    orders: id
"#,
    )
    .unwrap();

    dir
}

fn read_rows(path: &Path) -> Vec<serde_json::Value> {
    let content = std::fs::read_to_string(path).unwrap();
    serde_json::from_str(&content).unwrap()
}

// =============================================================================
// Help and Version Tests
// =============================================================================

#[test]
fn test_help_shows_flags() {
    let dir = TempDir::new().unwrap();
    cmd(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--source"))
        .stdout(predicate::str::contains("--rollback"))
        .stdout(predicate::str::contains("--list-snapshots"))
        .stdout(predicate::str::contains("--cleanup-snapshots"))
        .stdout(predicate::str::contains("--dry-run"));
}

#[test]
fn test_version_flag() {
    let dir = TempDir::new().unwrap();
    cmd(dir.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("datamigrate"));
}

// =============================================================================
// Argument and Config Errors
// =============================================================================

#[test]
fn test_invalid_mode_rejected() {
    let dir = TempDir::new().unwrap();
    cmd(dir.path())
        .args(["--mode", "sideways"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("sideways"));
}

#[test]
fn test_invalid_cleanup_age_rejected() {
    let dir = TempDir::new().unwrap();
    cmd(dir.path())
        .args(["--cleanup-snapshots", "10w"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown unit"));
}

#[test]
fn test_missing_config_file() {
    let dir = TempDir::new().unwrap();
    cmd(dir.path())
        .args(["--config", "nope.yaml", "--source", "a", "--target", "b"])
        .assert()
        .failure();
}

#[test]
fn test_missing_source() {
    let dir = workspace();
    cmd(dir.path())
        .args(["--target", "warehouse"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("--source is required"));
}

#[test]
fn test_unknown_store() {
    let dir = workspace();
    cmd(dir.path())
        .args(["--source", "mainframe", "--target", "warehouse"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("unknown store 'mainframe'"));
}

#[test]
fn test_incremental_mode_not_supported() {
    let dir = workspace();
    cmd(dir.path())
        .args(["--source", "legacy", "--target", "warehouse", "--mode", "incremental"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("not supported"));
    assert!(!dir.path().join("warehouse").join("users.json").exists());
}

// =============================================================================
// Snapshots
// =============================================================================

#[test]
fn test_list_snapshots_empty() {
    let dir = TempDir::new().unwrap();
    cmd(dir.path())
        .arg("--list-snapshots")
        .assert()
        .success()
        .stdout(predicate::str::contains("No snapshots found"));
}

#[test]
fn test_rollback_unknown_snapshot() {
    let dir = workspace();
    cmd(dir.path())
        .args(["--rollback", "migration_legacy_to_warehouse_0_deadbeef"])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_cleanup_snapshots_empty_dir() {
    let dir = TempDir::new().unwrap();
    cmd(dir.path())
        .args(["--cleanup-snapshots", "1h30m"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed 0 snapshot(s)"));
}

// =============================================================================
// End-to-end
// =============================================================================

#[test]
fn test_dry_run_writes_nothing() {
    let dir = workspace();
    cmd(dir.path())
        .args(["--source", "legacy", "--target", "warehouse", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Dry run"))
        .stdout(predicate::str::contains("users (3 rows)"));
    assert!(!dir.path().join("warehouse").join("users.json").exists());
}

#[test]
fn test_migration_and_rollback() {
    let dir = workspace();

    let output = cmd(dir.path())
        .args([
            "--source",
            "legacy",
            "--target",
            "warehouse",
            "--tables",
            "users,orders",
            "--backup",
            "--output-json",
        ])
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let result: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(result["success"], true);
    assert_eq!(result["rows_migrated"], 7);
    assert_eq!(result["tables_processed"], 2);

    let warehouse = dir.path().join("warehouse");
    assert_eq!(read_rows(&warehouse.join("users.json")).len(), 3);
    assert_eq!(read_rows(&warehouse.join("orders.json")).len(), 4);

    let snapshot_id = result["snapshot_id"].as_str().unwrap().to_string();
    assert!(snapshot_id.starts_with("migration_legacy_to_warehouse_"));

    cmd(dir.path())
        .arg("--list-snapshots")
        .assert()
        .success()
        .stdout(predicate::str::contains(snapshot_id.as_str()))
        .stdout(predicate::str::contains("completed"));

    cmd(dir.path())
        .args(["--rollback", snapshot_id.as_str()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Rolled back"));
    assert!(read_rows(&warehouse.join("users.json")).is_empty());
    assert!(read_rows(&warehouse.join("orders.json")).is_empty());

    cmd(dir.path())
        .args(["--rollback", snapshot_id.as_str()])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("already been rolled back"));
}

#[test]
fn test_tables_discovered_from_source() {
    let dir = workspace();
    cmd(dir.path())
        .args(["--source", "legacy", "--target", "warehouse", "--concurrent=false"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Rows: 7"));
}

#[test]
fn test_validation_failure_exit_code() {
    let dir = workspace();
    cmd(dir.path())
        .args(["--source", "legacy", "--target", "warehouse", "--tables", "users,ghosts"])
        .assert()
        .code(3)
        .stdout(predicate::str::contains("ghosts"));
    assert!(!dir.path().join("warehouse").join("users.json").exists());
}
