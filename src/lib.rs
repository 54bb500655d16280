// (c) Copyright 2023 Helsing GmbH. All rights reserved.

#![doc = include_str!("../README.md")]

/// Expectations over results and directories
pub mod assert;
/// Toolchain invocations
pub mod command;
/// Harness configuration
pub mod config;
/// Isolated test directories
pub mod directory;
/// Harness errors
pub mod errors;
/// Fixture catalog and isolated copies
pub mod fixture;
/// Output layouts and toolchain contract strings
pub mod layout;
/// Results of toolchain invocations
pub mod output;

pub use command::{Args, Operation, ToolchainCommand};
pub use config::HarnessConfig;
pub use directory::{Subdirectory, TestDirectory};
pub use fixture::{FixtureStore, Template, TestInstance};
pub use output::{CapturedResult, ExecResult};

/// Environment variable selecting the harness log level
pub const LOG_ENV_VAR: &str = "HARNESS_LOG";

/// Install a tracing subscriber writing into the captured test output
///
/// Logs at `info` unless `HARNESS_LOG` names another level. Calling this
/// more than once is harmless.
pub fn init_tracing() {
    let level = std::env::var(LOG_ENV_VAR)
        .ok()
        .and_then(|level| level.parse::<tracing::Level>().ok())
        .unwrap_or(tracing::Level::INFO);

    tracing_subscriber::fmt()
        .compact()
        .without_time()
        .with_target(false)
        .with_max_level(level)
        .with_test_writer()
        .try_init()
        .ok();
}
