use toolchain_harness::{
    assert::{assert_has_file, assert_only_files},
    layout::{self, ASSETS_FILE, MISSING_INPUT_CODE},
    Args, ToolchainCommand,
};

use crate::{config, instance, output_layout, FRAMEWORK};

#[test]
fn framework_dependent_publish() {
    let app = instance("ConsoleApp");

    ToolchainCommand::publish(config())
        .with_working_directory(app.root())
        .with_framework(FRAMEWORK)
        .self_contained(false)
        .execute_captured(Args::new())
        .unwrap()
        .assert()
        .passed();

    let publish_dir = app.join([output_layout(None).publish_dir()]);

    assert_only_files(&publish_dir, layout::framework_dependent_files("ConsoleApp"));

    ToolchainCommand::generic(config())
        .with_working_directory(&publish_dir)
        .execute_captured([layout::assembly_name("ConsoleApp")])
        .unwrap()
        .assert()
        .passed()
        .stdout_contains("Hello World");
}

#[test]
fn self_contained_publish_adds_executable() {
    let app = instance("ConsoleApp");

    ToolchainCommand::publish(config())
        .with_working_directory(app.root())
        .with_framework(FRAMEWORK)
        .with_runtime_identifier(Some("linux-x64"))
        .self_contained(true)
        .execute_captured(Args::new())
        .unwrap()
        .assert()
        .passed();

    assert_only_files(
        app.join([output_layout(Some("linux-x64")).publish_dir()]),
        layout::self_contained_files("ConsoleApp"),
    );
}

#[test]
fn publish_to_output_directory() {
    let app = instance("ConsoleApp");

    ToolchainCommand::publish(config())
        .with_working_directory(app.root())
        .with_output("out")
        .execute_captured(Args::new())
        .unwrap()
        .assert()
        .passed();

    assert_only_files(app.join(["out"]), layout::framework_dependent_files("ConsoleApp"));
}

#[test]
fn no_build_without_prior_build_fails() {
    let app = instance("ConsoleApp");

    ToolchainCommand::publish(config())
        .with_working_directory(app.root())
        .with_framework(FRAMEWORK)
        .no_build()
        .execute_captured(Args::new())
        .unwrap()
        .assert()
        .failed()
        .stdout_contains(MISSING_INPUT_CODE);
}

#[test]
fn no_build_for_other_runtime_fails() {
    let app = instance("ConsoleApp");

    ToolchainCommand::build(config())
        .with_working_directory(app.root())
        .with_framework(FRAMEWORK)
        .with_runtime_identifier(Some("linux-x64"))
        .execute_captured(Args::new())
        .unwrap()
        .assert()
        .passed();

    ToolchainCommand::publish(config())
        .with_working_directory(app.root())
        .with_framework(FRAMEWORK)
        .with_runtime_identifier(Some("win-x64"))
        .no_build()
        .execute_captured(Args::new())
        .unwrap()
        .assert()
        .failed();
}

#[test]
fn no_build_after_build_reuses_outputs() {
    let app = instance("ConsoleApp");

    ToolchainCommand::build(config())
        .with_working_directory(app.root())
        .execute_captured(Args::new())
        .unwrap()
        .assert()
        .passed();

    ToolchainCommand::publish(config())
        .with_working_directory(app.root())
        .no_build()
        .execute_captured(Args::new())
        .unwrap()
        .assert()
        .passed();

    assert_has_file(app.join([output_layout(None).publish_dir()]), "ConsoleApp.dll");
}

#[test]
fn no_restore_without_restore_names_assets_file() {
    let app = instance("ConsoleApp");

    ToolchainCommand::publish(config())
        .with_working_directory(app.root())
        .with_framework(FRAMEWORK)
        .no_restore()
        .execute_captured(Args::new())
        .unwrap()
        .assert()
        .failed()
        .stdout_contains(ASSETS_FILE);
}

#[test]
fn no_restore_with_restore_files() {
    let app = instance("ConsoleApp").with_restore_files().unwrap();

    ToolchainCommand::publish(config())
        .with_working_directory(app.root())
        .with_framework(FRAMEWORK)
        .no_restore()
        .execute_captured(Args::new())
        .unwrap()
        .assert()
        .passed();

    assert_only_files(
        app.join([output_layout(None).publish_dir()]),
        layout::framework_dependent_files("ConsoleApp"),
    );
}

#[test]
fn self_contained_requires_runtime() {
    let app = instance("ConsoleApp");

    ToolchainCommand::publish(config())
        .with_working_directory(app.root())
        .self_contained(true)
        .execute_captured(Args::new())
        .unwrap()
        .assert()
        .failed()
        .stdout_contains("RuntimeIdentifier");
}
