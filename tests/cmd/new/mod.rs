use std::collections::BTreeSet;

use assert_fs::{prelude::*, TempDir};
use predicates::{
    path::{exists, missing},
    str::contains,
};
use pretty_assertions::assert_eq;
use toolchain_harness::{
    assert::assert_has_file,
    layout::{OutputLayout, ASSETS_FILE, INTERMEDIATE_DIRECTORY, MISSING_INPUT_CODE},
    Args, ToolchainCommand,
};

use crate::{config, store};

#[test]
fn scaffold_then_run() {
    let dir = store().empty_directory("console", None).unwrap();

    ToolchainCommand::scaffold(config())
        .with_working_directory(dir.root())
        .execute_captured(["console", "--name", "Scaffolded"])
        .unwrap()
        .assert()
        .passed();

    assert_eq!(
        dir.files().unwrap(),
        BTreeSet::from(["Program.cs".to_owned(), "Scaffolded.csproj".to_owned()])
    );
    assert_has_file(dir.join([INTERMEDIATE_DIRECTORY]), ASSETS_FILE);

    ToolchainCommand::run(config())
        .with_working_directory(dir.root())
        .execute_captured(Args::new())
        .unwrap()
        .assert()
        .passed()
        .stdout_contains("Hello World");
}

#[test]
fn publish_without_build_after_scaffold() {
    let dir = store().empty_directory("console", Some("no-restore")).unwrap();

    ToolchainCommand::scaffold(config())
        .with_working_directory(dir.root())
        .execute_captured(Args::parse("console --no-restore").unwrap())
        .unwrap()
        .assert()
        .passed();

    ToolchainCommand::publish(config())
        .with_working_directory(dir.root())
        .no_build()
        .execute_captured(Args::new())
        .unwrap()
        .assert()
        .failed()
        .stdout_contains(MISSING_INPUT_CODE);
}

#[test]
fn unknown_template_fails() {
    let dir = store().empty_directory("unknown", None).unwrap();

    ToolchainCommand::scaffold(config())
        .with_working_directory(dir.root())
        .execute_captured(["no-such-template"])
        .unwrap()
        .assert()
        .failed()
        .stderr_contains("No templates found");
}

#[test]
fn scaffold_into_output_directory() {
    let dir = TempDir::new().unwrap();

    crate::cli!()
        .args(["new", "console", "--output", "App", "--no-restore"])
        .current_dir(dir.path())
        .assert()
        .success()
        .stdout(contains("created successfully"));

    dir.child("App").child("App.csproj").assert(exists());
    dir.child("App").child("Program.cs").assert(exists());
    dir.child("App")
        .child(OutputLayout::assets_file())
        .assert(missing());
}
