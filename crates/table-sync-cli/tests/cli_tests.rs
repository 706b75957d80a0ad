//! CLI integration tests for table-sync.
//!
//! These tests verify command-line argument parsing, help output,
//! exit codes and the database-free `check` command.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::io::Write;
use std::path::Path;

/// Get a command for the table-sync binary.
fn cmd() -> Command {
    Command::cargo_bin("table-sync").unwrap()
}

/// Write a one-table config reading `<dir>/Accounts.csv`.
fn write_config(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("config.yaml");
    let yaml = format!(
        r#"target:
  type: postgres
  connection_env: TABLE_SYNC_CLI_TEST_UNSET
sync:
  data_dir: "{}"
tables:
  - name: Accounts
    primary_key: AccountId
    columns:
      - {{ name: AccountId, type: integer, nullable: false }}
      - AccountName
"#,
        dir.display()
    );
    fs::write(&path, yaml).unwrap();
    path
}

// =============================================================================
// Help and Version Tests
// =============================================================================

#[test]
fn test_help_shows_all_commands() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("check"))
        .stdout(predicate::str::contains("health-check"));
}

#[test]
fn test_run_subcommand_help() {
    cmd()
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--data-dir"))
        .stdout(predicate::str::contains("--table"));
}

#[test]
fn test_version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("table-sync"));
}

#[test]
fn test_global_flag_defaults() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("[default: config.yaml]"))
        .stdout(predicate::str::contains("--output-json"))
        .stdout(predicate::str::contains("[default: text]"))
        .stdout(predicate::str::contains("[default: info]"));
}

#[test]
fn test_no_subcommand_shows_help() {
    cmd()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage:"));
}

// =============================================================================
// Exit Code Tests
// =============================================================================

#[test]
fn test_missing_config_exits_with_code_7() {
    // Missing file is an IO error (code 7), not config error (code 1)
    cmd()
        .args(["--config", "nonexistent_config_file.yaml", "check"])
        .assert()
        .code(7);
}

#[test]
fn test_invalid_yaml_exits_with_code_1() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "invalid: yaml: content: [").unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "check"])
        .assert()
        .code(1);
}

#[test]
fn test_missing_required_fields_exits_with_code_1() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "target:").unwrap();
    writeln!(file, "  type: mssql").unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "check"])
        .assert()
        .code(1);
}

#[test]
fn test_unknown_table_exits_with_code_1() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());

    cmd()
        .args(["--config", config.to_str().unwrap(), "run", "--table", "Orders"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("unknown table: Orders"));
}

#[test]
fn test_unset_connection_env_exits_with_code_2() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());

    cmd()
        .env_remove("TABLE_SYNC_CLI_TEST_UNSET")
        .args(["--config", config.to_str().unwrap(), "run"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("TABLE_SYNC_CLI_TEST_UNSET"));
}

// =============================================================================
// Check Command Tests
// =============================================================================

#[test]
fn test_check_reports_rows_and_duplicates() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());
    fs::write(
        dir.path().join("Accounts.csv"),
        "AccountId,AccountName\n1,Acme\n1,Acme\n2,Globex\n",
    )
    .unwrap();

    cmd()
        .args(["--config", config.to_str().unwrap(), "check"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Accounts: 3 rows read, 1 duplicates removed",
        ));
}

#[test]
fn test_check_output_json() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());
    fs::write(dir.path().join("Accounts.csv"), "AccountId,AccountName\n1,Acme\n").unwrap();

    let output = cmd()
        .args(["--config", config.to_str().unwrap(), "--output-json", "check"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let reports: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(reports[0]["table"], "Accounts");
    assert_eq!(reports[0]["rows_read"], 1);
}

#[test]
fn test_check_missing_source_exits_with_code_3() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());

    cmd()
        .args(["--config", config.to_str().unwrap(), "check"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Accounts.csv"));
}

#[test]
fn test_check_duplicate_key_exits_with_code_3() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());
    fs::write(
        dir.path().join("Accounts.csv"),
        "AccountId,AccountName\n1,Acme\n1,Acme Corp\n",
    )
    .unwrap();

    cmd()
        .args(["--config", config.to_str().unwrap(), "check"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Duplicate primary key"));
}

#[test]
fn test_check_data_dir_override() {
    let config_dir = tempfile::tempdir().unwrap();
    let data_dir = tempfile::tempdir().unwrap();
    let config = write_config(config_dir.path());
    fs::write(data_dir.path().join("Accounts.csv"), "AccountId,AccountName\n5,Initech\n").unwrap();

    cmd()
        .args([
            "--config",
            config.to_str().unwrap(),
            "check",
            "--data-dir",
            data_dir.path().to_str().unwrap(),
        ])
        .assert()
        .success();
}
