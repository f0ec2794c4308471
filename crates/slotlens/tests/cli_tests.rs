use assert_cmd::Command;
use predicates::prelude::*;
use tracing::info;

const TX: &str = "0x0000000000000000000000000000000000000000000000000000000000000001";

#[test]
fn test_help_command() {
    slotlens_common::logging::ensure_test_logging(None);
    info!("Testing CLI help command");

    let mut cmd = Command::cargo_bin("slotlens").unwrap();
    cmd.arg("--help").assert().success().stdout(predicate::str::contains("Solidity contract storage"));
}

#[test]
fn test_version_command() {
    slotlens_common::logging::ensure_test_logging(None);
    info!("Running test");
    let mut cmd = Command::cargo_bin("slotlens").unwrap();
    cmd.arg("--version").assert().success().stdout(predicate::str::contains("slotlens"));
}

#[test]
fn test_state_subcommand_help() {
    slotlens_common::logging::ensure_test_logging(None);
    info!("Running test");
    let mut cmd = Command::cargo_bin("slotlens").unwrap();
    cmd.arg("state")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("before a transaction"))
        .stdout(predicate::str::contains("--solc-output"));
}

#[test]
fn test_invalid_tx_hash() {
    slotlens_common::logging::ensure_test_logging(None);
    info!("Running test");
    let mut cmd = Command::cargo_bin("slotlens").unwrap();
    cmd.args(["state", "--tx", "invalid_hash", "--contract", "Token", "--solc-output", "out.json"])
        .assert()
        .failure();
}

#[test]
fn test_missing_solc_output() {
    slotlens_common::logging::ensure_test_logging(None);
    info!("Running test");
    let mut cmd = Command::cargo_bin("slotlens").unwrap();
    cmd.args(["state", "--tx", TX, "--contract", "Token"])
        .args(["--solc-output", "/nonexistent/solc-output.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read solc output"));
}

#[test]
fn test_unknown_contract() {
    slotlens_common::logging::ensure_test_logging(None);
    info!("Running test");
    let file = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(file.path(), r#"{"sources": {}, "contracts": {}}"#).unwrap();

    let mut cmd = Command::cargo_bin("slotlens").unwrap();
    cmd.args(["state", "--tx", TX, "--contract", "Token", "--solc-output"])
        .arg(file.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("contract Token not found"));
}

#[test]
fn test_missing_subcommand() {
    slotlens_common::logging::ensure_test_logging(None);
    info!("Running test");
    let mut cmd = Command::cargo_bin("slotlens").unwrap();
    cmd.assert().failure().stderr(predicate::str::contains("Usage"));
}
