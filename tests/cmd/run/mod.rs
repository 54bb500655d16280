use assert_fs::TempDir;
use predicates::str::contains;
use toolchain_harness::{Args, ToolchainCommand};

use crate::{config, instance};

#[test]
fn run_prints_every_line() {
    let app = instance("MultiLineApp");

    let result = ToolchainCommand::run(config())
        .with_working_directory(app.root())
        .execute_captured(Args::new())
        .unwrap();

    result
        .assert()
        .passed()
        .stdout_contains("first line")
        .stdout_contains("second line");

    assert!(result.stderr().is_empty(), "{result}");
}

#[test]
fn run_without_build_fails() {
    let app = instance("MultiLineApp");

    ToolchainCommand::run(config())
        .with_working_directory(app.root())
        .no_build()
        .execute_captured(Args::new())
        .unwrap()
        .assert()
        .failed()
        .stderr_contains("does not exist");
}

#[test]
fn run_missing_assembly_fails() {
    let dir = TempDir::new().unwrap();

    crate::cli!()
        .arg("Missing.dll")
        .current_dir(dir.path())
        .assert()
        .failure()
        .stderr(contains("Missing.dll"));
}
