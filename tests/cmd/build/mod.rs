use toolchain_harness::{
    assert::{assert_has_file, check_has_file},
    layout::{OutputLayout, MISSING_TARGET_CODE},
    Args, ToolchainCommand,
};

use crate::{config, instance, output_layout, FRAMEWORK};

#[test]
fn build_writes_intermediate_and_output() {
    let app = instance("ConsoleApp");

    ToolchainCommand::build(config())
        .with_working_directory(app.root())
        .execute_captured(Args::new())
        .unwrap()
        .assert()
        .passed()
        .stdout_contains("Build succeeded");

    let layout = output_layout(None);

    assert_has_file(app.join([layout.intermediate_dir()]), "ConsoleApp.dll");
    assert_has_file(app.join([layout.output_dir()]), "ConsoleApp.dll");
    assert_has_file(app.join([layout.output_dir()]), "ConsoleApp.runtimeconfig.json");
}

#[test]
fn build_honors_configuration() {
    let app = instance("ConsoleApp");

    ToolchainCommand::build(config())
        .with_working_directory(app.root())
        .with_configuration("Release")
        .execute_captured(Args::new())
        .unwrap()
        .assert()
        .passed();

    let release = OutputLayout::new("Release", FRAMEWORK);

    assert_has_file(app.join([release.output_dir()]), "ConsoleApp.dll");
    assert!(check_has_file(app.join([output_layout(None).output_dir()]), "ConsoleApp.dll").is_err());
}

#[test]
fn build_for_unrestored_runtime_fails() {
    let app = instance("ConsoleApp").with_restore_files().unwrap();

    ToolchainCommand::build(config())
        .with_working_directory(app.root())
        .with_runtime_identifier(Some("linux-x64"))
        .no_restore()
        .execute_captured(Args::new())
        .unwrap()
        .assert()
        .failed()
        .stdout_contains(MISSING_TARGET_CODE);
}

#[test]
fn build_inherits_streams() {
    let app = instance("ConsoleApp");

    let result = ToolchainCommand::build(config())
        .with_working_directory(app.root())
        .execute(Args::new())
        .unwrap();

    assert!(result.success());
    assert_eq!(result.exit_code(), 0);
}
