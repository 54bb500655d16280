use std::fmt;

/// Outcome of an invocation whose output streams were inherited
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecResult {
    exit_code: i32,
}

impl ExecResult {
    pub(crate) fn new(exit_code: i32) -> Self {
        Self { exit_code }
    }

    /// Exit code of the process
    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    /// Whether the process exited with code zero
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Outcome of an invocation with fully buffered output streams
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedResult {
    exit_code: i32,
    stdout: String,
    stderr: String,
}

impl CapturedResult {
    /// Record an outcome
    ///
    /// Invalid UTF-8 in either stream is replaced, see
    /// [`String::from_utf8_lossy`].
    pub fn new(exit_code: i32, stdout: &[u8], stderr: &[u8]) -> Self {
        Self {
            exit_code,
            stdout: String::from_utf8_lossy(stdout).into_owned(),
            stderr: String::from_utf8_lossy(stderr).into_owned(),
        }
    }

    /// Exit code of the process
    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    /// Everything the process wrote to stdout
    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    /// Everything the process wrote to stderr
    pub fn stderr(&self) -> &str {
        &self.stderr
    }

    /// Whether the process exited with code zero
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

impl fmt::Display for CapturedResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "exit code: {}", self.exit_code)?;
        writeln!(f, "-- stdout --")?;
        writeln!(f, "{}", self.stdout.trim_end())?;
        writeln!(f, "-- stderr --")?;
        write!(f, "{}", self.stderr.trim_end())
    }
}
