use assert_fs::TempDir;
use predicates::str::contains;
use similar_asserts::assert_eq;
use toolchain_harness::{Args, ToolchainCommand};

use crate::{config, instance, read_assets};

#[test]
fn restore_is_idempotent() {
    let app = instance("ConsoleApp");

    let restore = ToolchainCommand::restore(config()).with_working_directory(app.root());

    restore.execute_captured(Args::new()).unwrap().assert().passed();
    let first = read_assets(app.root());

    restore.execute_captured(Args::new()).unwrap().assert().passed();
    let second = read_assets(app.root());

    assert_eq!(first, second);
}

#[test]
fn restore_records_runtime_target() {
    let app = instance("ConsoleApp");

    ToolchainCommand::restore(config())
        .with_working_directory(app.root())
        .with_runtime_identifier(Some("linux-x64"))
        .execute_captured(Args::new())
        .unwrap()
        .assert()
        .passed();

    let assets = read_assets(app.root());

    assert!(assets.contains("\"net8.0\""), "{assets}");
    assert!(assets.contains("\"net8.0/linux-x64\""), "{assets}");
}

#[test]
fn restore_matches_staged_restore_files() {
    let restored = instance("ConsoleApp");
    let staged = instance("ConsoleApp").with_restore_files().unwrap();

    ToolchainCommand::restore(config())
        .with_working_directory(restored.root())
        .execute_captured(Args::new())
        .unwrap()
        .assert()
        .passed();

    assert_eq!(read_assets(restored.root()), read_assets(staged.root()));
}

#[test]
fn restore_without_project_fails() {
    let dir = TempDir::new().unwrap();

    crate::cli!()
        .arg("restore")
        .current_dir(dir.path())
        .assert()
        .failure()
        .stdout(contains("MSB1003"));
}
