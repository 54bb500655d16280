use std::{path::PathBuf, time::Duration};

use miette::Diagnostic;

/// Error for when a template is not part of the fixture catalog.
#[derive(thiserror::Error, Diagnostic, Debug)]
#[error("fixture `{name}` not found{}", in_category(.category))]
#[diagnostic(
    code(harness::fixture_not_found),
    help("declare the template in the fixture catalog")
)]
pub struct FixtureNotFound {
    /// Requested template name
    pub name: String,
    /// Requested category, if any
    pub category: Option<String>,
}

fn in_category(category: &Option<String>) -> String {
    category
        .as_ref()
        .map(|c| format!(" in category `{c}`"))
        .unwrap_or_default()
}

/// Error for when a template name is declared in more than one category
/// and the lookup did not name one.
#[derive(thiserror::Error, Diagnostic, Debug)]
#[error("fixture `{name}` exists in several categories: {}", .categories.join(", "))]
#[diagnostic(
    code(harness::ambiguous_fixture),
    help("pass a category to disambiguate")
)]
pub struct AmbiguousFixture {
    /// Requested template name
    pub name: String,
    /// Categories declaring that name
    pub categories: Vec<String>,
}

/// Error for when a directory expected by a test does not exist.
#[derive(thiserror::Error, Diagnostic, Debug, Clone, PartialEq, Eq)]
#[error("directory `{}` does not exist", .0.display())]
#[diagnostic(code(harness::directory_not_found))]
pub struct DirectoryNotFound(pub PathBuf);

/// Failures to list the files of a directory.
#[derive(thiserror::Error, Diagnostic, Debug, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    /// The directory does not exist
    #[error(transparent)]
    #[diagnostic(transparent)]
    NotFound(#[from] DirectoryNotFound),
    /// An entry of the directory could not be read
    #[error("failed to list `{}`: {reason}", .path.display())]
    #[diagnostic(code(harness::directory_unreadable))]
    Unreadable {
        /// Inspected directory
        path: PathBuf,
        /// Rendered io error
        reason: String,
    },
}

/// Error for when the toolchain outlives its bounded wait.
#[derive(thiserror::Error, Diagnostic, Debug)]
#[error("`{command}` did not exit within {}s and was killed", .timeout.as_secs_f64())]
#[diagnostic(
    code(harness::process_timeout),
    help("raise the timeout in .harness/config.toml or via HARNESS_TIMEOUT_SECS")
)]
pub struct ProcessTimeout {
    /// Rendered command line
    pub command: String,
    /// The wait that elapsed
    pub timeout: Duration,
}

/// Harness-level failures of a toolchain invocation.
///
/// A non-zero exit code is never one of these; it is reported through the
/// result of the invocation.
#[derive(thiserror::Error, Diagnostic, Debug)]
pub enum CommandError {
    /// The executable could not be found
    #[error("toolchain executable `{}` not found", .0.display())]
    #[diagnostic(
        code(harness::toolchain_not_found),
        help("set HARNESS_TOOLCHAIN or [toolchain] path in .harness/config.toml")
    )]
    ToolchainNotFound(PathBuf),
    /// The working directory does not exist
    #[error("working directory `{}` does not exist", .0.display())]
    #[diagnostic(code(harness::working_directory_not_found))]
    WorkingDirectoryNotFound(PathBuf),
    /// A raw argument string is not valid shell syntax
    #[error("invalid argument string `{raw}`")]
    #[diagnostic(
        code(harness::invalid_arguments),
        help("close every quote or pass the arguments as a list")
    )]
    InvalidArguments {
        /// The string that failed to split
        raw: String,
        /// Underlying parse error
        #[source]
        source: shell_words::ParseError,
    },
    /// Any other failure to start the process
    #[error("failed to spawn `{command}`")]
    #[diagnostic(code(harness::spawn_failed))]
    Spawn {
        /// Rendered command line
        command: String,
        /// Underlying io error
        #[source]
        source: std::io::Error,
    },
    /// Waiting for the process or reading its output failed
    #[error("failed to wait for `{command}`")]
    #[diagnostic(code(harness::wait_failed))]
    Wait {
        /// Rendered command line
        command: String,
        /// Underlying io error
        #[source]
        source: std::io::Error,
    },
    /// The process did not exit in time
    #[error(transparent)]
    #[diagnostic(transparent)]
    Timeout(#[from] ProcessTimeout),
}
