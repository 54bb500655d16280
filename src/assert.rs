// Copyright 2023 Helsing GmbH
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Expectations over captured results and output directories.
//!
//! The `assert_*` functions panic with the expected and actual state and,
//! where a process was involved, its full output. The `check_*` functions
//! report the same mismatches as values.

use std::{collections::BTreeSet, path::Path, path::PathBuf};

use miette::Diagnostic;

use crate::{directory::list_files, errors::DirectoryError, output::CapturedResult};

/// A mismatch between expected and actual state
#[derive(thiserror::Error, Diagnostic, Debug, Clone, PartialEq, Eq)]
pub enum AssertionFailure {
    /// The process was expected to exit with code zero
    #[error("expected the command to pass, but it exited with {exit_code}")]
    #[diagnostic(code(harness::expected_pass))]
    ExpectedPass {
        /// Actual exit code
        exit_code: i32,
    },
    /// The process was expected to exit with a non-zero code
    #[error("expected the command to fail, but it exited with 0")]
    #[diagnostic(code(harness::expected_failure))]
    ExpectedFailure,
    /// An output stream lacks a substring
    #[error("expected {stream} to contain {needle:?}")]
    #[diagnostic(code(harness::missing_output))]
    MissingOutput {
        /// `stdout` or `stderr`
        stream: &'static str,
        /// The substring that was looked for
        needle: String,
    },
    /// A directory does not hold exactly the expected files
    #[error(
        "files in {} differ from the expected set\n  missing:    {missing:?}\n  unexpected: {unexpected:?}\n  actual:     {actual:?}",
        .directory.display()
    )]
    #[diagnostic(code(harness::file_set_mismatch))]
    FileSet {
        /// Inspected directory
        directory: PathBuf,
        /// Expected but absent
        missing: BTreeSet<String>,
        /// Present but not expected
        unexpected: BTreeSet<String>,
        /// Everything that is present
        actual: BTreeSet<String>,
    },
    /// A directory lacks a file
    #[error("expected {} to contain the file {name:?}, found {actual:?}", .directory.display())]
    #[diagnostic(code(harness::missing_file))]
    MissingFile {
        /// Inspected directory
        directory: PathBuf,
        /// The file that was looked for
        name: String,
        /// Everything that is present
        actual: BTreeSet<String>,
    },
    /// The directory to inspect does not exist or cannot be read
    #[error(transparent)]
    #[diagnostic(transparent)]
    Directory(#[from] DirectoryError),
}

/// Passes iff the process exited with code zero
pub fn check_passed(result: &CapturedResult) -> Result<(), AssertionFailure> {
    if result.success() {
        Ok(())
    } else {
        Err(AssertionFailure::ExpectedPass {
            exit_code: result.exit_code(),
        })
    }
}

/// Passes iff the process exited with a non-zero code
pub fn check_failed(result: &CapturedResult) -> Result<(), AssertionFailure> {
    if result.success() {
        Err(AssertionFailure::ExpectedFailure)
    } else {
        Ok(())
    }
}

/// Passes iff stdout contains `needle`, case-sensitive
pub fn check_stdout_contains(result: &CapturedResult, needle: &str) -> Result<(), AssertionFailure> {
    contains("stdout", result.stdout(), needle)
}

/// Passes iff stderr contains `needle`, case-sensitive
pub fn check_stderr_contains(result: &CapturedResult, needle: &str) -> Result<(), AssertionFailure> {
    contains("stderr", result.stderr(), needle)
}

/// Passes iff `directory` directly contains a file called `name`
pub fn check_has_file(directory: impl AsRef<Path>, name: &str) -> Result<(), AssertionFailure> {
    let directory = directory.as_ref();
    let actual = list_files(directory)?;

    if actual.contains(name) {
        Ok(())
    } else {
        Err(AssertionFailure::MissingFile {
            directory: directory.to_owned(),
            name: name.to_owned(),
            actual,
        })
    }
}

/// Passes iff the files directly inside `directory` are exactly `expected`
///
/// Order is irrelevant; extra and missing files fail alike.
pub fn check_only_files<I, S>(directory: impl AsRef<Path>, expected: I) -> Result<(), AssertionFailure>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let directory = directory.as_ref();
    let actual = list_files(directory)?;
    let expected: BTreeSet<String> = expected.into_iter().map(Into::into).collect();

    let missing: BTreeSet<String> = expected.difference(&actual).cloned().collect();
    let unexpected: BTreeSet<String> = actual.difference(&expected).cloned().collect();

    if missing.is_empty() && unexpected.is_empty() {
        Ok(())
    } else {
        Err(AssertionFailure::FileSet {
            directory: directory.to_owned(),
            missing,
            unexpected,
            actual,
        })
    }
}

/// Fails the test unless the process exited with code zero
#[track_caller]
pub fn assert_passed(result: &CapturedResult) {
    if let Err(failure) = check_passed(result) {
        fail(failure, Some(result));
    }
}

/// Fails the test unless the process exited with a non-zero code
#[track_caller]
pub fn assert_failed(result: &CapturedResult) {
    if let Err(failure) = check_failed(result) {
        fail(failure, Some(result));
    }
}

/// Fails the test unless stdout contains `needle`
#[track_caller]
pub fn assert_stdout_contains(result: &CapturedResult, needle: &str) {
    if let Err(failure) = check_stdout_contains(result, needle) {
        fail(failure, Some(result));
    }
}

/// Fails the test unless stderr contains `needle`
#[track_caller]
pub fn assert_stderr_contains(result: &CapturedResult, needle: &str) {
    if let Err(failure) = check_stderr_contains(result, needle) {
        fail(failure, Some(result));
    }
}

/// Fails the test unless `directory` directly contains a file called `name`
#[track_caller]
pub fn assert_has_file(directory: impl AsRef<Path>, name: &str) {
    if let Err(failure) = check_has_file(directory, name) {
        fail(failure, None);
    }
}

/// Fails the test unless the files directly inside `directory` are exactly `expected`
#[track_caller]
pub fn assert_only_files<I, S>(directory: impl AsRef<Path>, expected: I)
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    if let Err(failure) = check_only_files(directory, expected) {
        fail(failure, None);
    }
}

/// Chained expectations on one result
///
/// ```ignore
/// command
///     .execute_captured(["--no-build"])?
///     .assert()
///     .failed()
///     .stdout_contains("MSB3030");
/// ```
#[derive(Debug, Clone, Copy)]
pub struct ResultAssert<'a> {
    result: &'a CapturedResult,
}

impl CapturedResult {
    /// Start a chain of expectations on this result
    pub fn assert(&self) -> ResultAssert<'_> {
        ResultAssert { result: self }
    }
}

impl<'a> ResultAssert<'a> {
    /// See [`assert_passed`]
    #[track_caller]
    pub fn passed(self) -> Self {
        assert_passed(self.result);
        self
    }

    /// See [`assert_failed`]
    #[track_caller]
    pub fn failed(self) -> Self {
        assert_failed(self.result);
        self
    }

    /// See [`assert_stdout_contains`]
    #[track_caller]
    pub fn stdout_contains(self, needle: &str) -> Self {
        assert_stdout_contains(self.result, needle);
        self
    }

    /// See [`assert_stderr_contains`]
    #[track_caller]
    pub fn stderr_contains(self, needle: &str) -> Self {
        assert_stderr_contains(self.result, needle);
        self
    }

    /// The result under test
    pub fn result(&self) -> &'a CapturedResult {
        self.result
    }
}

fn contains(stream: &'static str, haystack: &str, needle: &str) -> Result<(), AssertionFailure> {
    if haystack.contains(needle) {
        Ok(())
    } else {
        Err(AssertionFailure::MissingOutput {
            stream,
            needle: needle.to_owned(),
        })
    }
}

#[track_caller]
fn fail(failure: AssertionFailure, result: Option<&CapturedResult>) -> ! {
    match result {
        Some(result) => panic!("{failure}\n{result}"),
        None => panic!("{failure}"),
    }
}
