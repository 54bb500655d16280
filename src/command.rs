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

use std::{
    collections::BTreeMap,
    ffi::{OsStr, OsString},
    future::Future,
    io::ErrorKind,
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
    time::{Duration, Instant},
};

use strum::{Display, EnumString};
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::{Child, Command},
};

use crate::{
    config::HarnessConfig,
    errors::{CommandError, ProcessTimeout},
    output::{CapturedResult, ExecResult},
};

/// Grace period for reading output after the process exited
const DRAIN_TIMEOUT: Duration = Duration::from_millis(250);

/// Sub-operations of the toolchain
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Operation {
    /// Resolve dependencies and write the lock artifact
    Restore,
    /// Compile a project
    Build,
    /// Build and lay out a deployable output directory
    Publish,
    /// Build and execute a project
    Run,
    /// Scaffold a project from a template
    New,
    /// No subcommand, the caller supplies the whole argument list
    Generic,
}

impl Operation {
    /// Token injected ahead of all other arguments
    pub fn subcommand(self) -> Option<&'static str> {
        match self {
            Operation::Restore => Some("restore"),
            Operation::Build => Some("build"),
            Operation::Publish => Some("publish"),
            Operation::Run => Some("run"),
            Operation::New => Some("new"),
            Operation::Generic => None,
        }
    }

    /// Whether the operation produces configuration specific outputs
    fn takes_configuration(self) -> bool {
        matches!(self, Operation::Build | Operation::Publish | Operation::Run)
    }
}

/// Ordered argument list passed to the toolchain verbatim
///
/// ```
/// use toolchain_harness::command::Args;
///
/// let args = Args::parse(r#"--framework net8.0 -p:Title="My App""#)?;
/// assert_eq!(args.len(), 3);
/// # Ok::<(), toolchain_harness::errors::CommandError>(())
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Args(Vec<OsString>);

impl Args {
    /// Empty argument list
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one argument
    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.0.push(arg.as_ref().to_owned());
        self
    }

    /// Append several arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.0
            .extend(args.into_iter().map(|arg| arg.as_ref().to_owned()));
        self
    }

    /// Split a raw argument string the way a POSIX shell would
    ///
    /// Quotes group characters into one argument and backslashes escape the
    /// next character. An unterminated quote is an error.
    pub fn parse(raw: &str) -> Result<Self, CommandError> {
        let words = shell_words::split(raw).map_err(|source| CommandError::InvalidArguments {
            raw: raw.to_owned(),
            source,
        })?;

        Ok(Self::new().args(words))
    }

    /// Number of arguments
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no arguments
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over the arguments
    pub fn iter(&self) -> impl Iterator<Item = &OsStr> {
        self.0.iter().map(OsString::as_os_str)
    }
}

impl TryFrom<&str> for Args {
    type Error = CommandError;

    fn try_from(raw: &str) -> Result<Self, Self::Error> {
        Self::parse(raw)
    }
}

impl TryFrom<String> for Args {
    type Error = CommandError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(&raw)
    }
}

impl<S: AsRef<OsStr>, const N: usize> From<[S; N]> for Args {
    fn from(args: [S; N]) -> Self {
        Self::new().args(args)
    }
}

impl<S: AsRef<OsStr>> From<Vec<S>> for Args {
    fn from(args: Vec<S>) -> Self {
        Self::new().args(args)
    }
}

impl IntoIterator for Args {
    type Item = OsString;
    type IntoIter = std::vec::IntoIter<OsString>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// An invocation of the toolchain
///
/// Every named operation is a preset of the same primitive; they differ only
/// in the subcommand token and the options injected ahead of the caller's
/// arguments. A non-zero exit code is reported through the result, only a
/// failure to run the process at all is an error.
#[derive(Debug, Clone)]
pub struct ToolchainCommand {
    operation: Operation,
    program: PathBuf,
    working_directory: Option<PathBuf>,
    default_args: Vec<String>,
    configuration: Option<String>,
    framework: Option<String>,
    runtime: Option<String>,
    self_contained: Option<bool>,
    output: Option<PathBuf>,
    no_restore: bool,
    no_build: bool,
    env: BTreeMap<OsString, OsString>,
    timeout: Duration,
}

impl ToolchainCommand {
    /// Invocation of `operation` using the toolchain from `config`
    pub fn new(config: &HarnessConfig, operation: Operation) -> Self {
        Self {
            operation,
            program: config.toolchain().to_owned(),
            working_directory: None,
            default_args: config.default_args(operation),
            configuration: operation
                .takes_configuration()
                .then(|| config.configuration().to_owned()),
            framework: None,
            runtime: None,
            self_contained: None,
            output: None,
            no_restore: false,
            no_build: false,
            env: config
                .environment()
                .iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
            timeout: config.timeout(),
        }
    }

    /// `restore`
    pub fn restore(config: &HarnessConfig) -> Self {
        Self::new(config, Operation::Restore)
    }

    /// `build`
    pub fn build(config: &HarnessConfig) -> Self {
        Self::new(config, Operation::Build)
    }

    /// `publish`
    pub fn publish(config: &HarnessConfig) -> Self {
        Self::new(config, Operation::Publish)
    }

    /// `run`
    pub fn run(config: &HarnessConfig) -> Self {
        Self::new(config, Operation::Run)
    }

    /// `new`
    pub fn scaffold(config: &HarnessConfig) -> Self {
        Self::new(config, Operation::New)
    }

    /// The bare toolchain, e.g. to execute a published assembly
    pub fn generic(config: &HarnessConfig) -> Self {
        Self::new(config, Operation::Generic)
    }

    /// The operation this invocation performs
    pub fn operation(&self) -> Operation {
        self.operation
    }

    /// Run in `path` instead of the current directory
    pub fn with_working_directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(path.into());
        self
    }

    /// Set or clear the runtime identifier (`--runtime`)
    pub fn with_runtime_identifier(mut self, runtime: Option<&str>) -> Self {
        self.runtime = runtime.map(str::to_owned);
        self
    }

    /// Target framework (`--framework`)
    pub fn with_framework(mut self, framework: impl Into<String>) -> Self {
        self.framework = Some(framework.into());
        self
    }

    /// Build configuration (`--configuration`), overriding the resolved one
    pub fn with_configuration(mut self, configuration: impl Into<String>) -> Self {
        self.configuration = Some(configuration.into());
        self
    }

    /// Output directory (`--output`)
    pub fn with_output(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = Some(output.into());
        self
    }

    /// Publish with or without a bundled runtime (`--self-contained`)
    pub fn self_contained(mut self, self_contained: bool) -> Self {
        self.self_contained = Some(self_contained);
        self
    }

    /// Skip the implicit restore (`--no-restore`)
    pub fn no_restore(mut self) -> Self {
        self.no_restore = true;
        self
    }

    /// Skip the implicit build (`--no-build`)
    pub fn no_build(mut self) -> Self {
        self.no_build = true;
        self
    }

    /// Set an environment variable for the child process
    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        self.env
            .insert(key.as_ref().to_owned(), value.as_ref().to_owned());
        self
    }

    /// Override the bounded wait
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The complete argument vector for `args`, without the program
    pub fn argv(&self, args: impl Into<Args>) -> Vec<OsString> {
        let mut argv: Vec<OsString> = Vec::new();

        if let Some(subcommand) = self.operation.subcommand() {
            argv.push(subcommand.into());
        }

        argv.extend(self.default_args.iter().map(OsString::from));

        let mut option = |name: &str, value: &OsStr| {
            argv.push(name.into());
            argv.push(value.to_owned());
        };

        if let Some(framework) = &self.framework {
            option("--framework", OsStr::new(framework));
        }

        if let Some(runtime) = &self.runtime {
            option("--runtime", OsStr::new(runtime));
        }

        if let Some(configuration) = &self.configuration {
            option("--configuration", OsStr::new(configuration));
        }

        if let Some(self_contained) = self.self_contained {
            let value = if self_contained { "true" } else { "false" };
            option("--self-contained", OsStr::new(value));
        }

        if let Some(output) = &self.output {
            option("--output", output.as_os_str());
        }

        if self.no_restore {
            argv.push("--no-restore".into());
        }

        if self.no_build {
            argv.push("--no-build".into());
        }

        let args: Args = args.into();
        argv.extend(args);
        argv
    }

    /// Run to completion with inherited output streams
    pub fn execute(&self, args: impl Into<Args>) -> Result<ExecResult, CommandError> {
        let argv = self.argv(args);
        let rendered = self.render(&argv);
        let mut command = self.command(&argv)?;
        command
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        tracing::info!(":: running `{rendered}` in {}", self.cwd().display());
        let started = Instant::now();

        let status = block_on(&rendered, async {
            let mut child = match command.spawn() {
                Ok(child) => child,
                Err(err) => return Err(self.spawn_error(&rendered, err)),
            };

            let waited = tokio::time::timeout(self.timeout, child.wait()).await;

            match waited {
                Ok(status) => status.map_err(|source| CommandError::Wait {
                    command: rendered.clone(),
                    source,
                }),
                Err(_) => {
                    child.kill().await.ok();
                    Err(self.timed_out(&rendered))
                }
            }
        })??;

        let exit_code = exit_code(status);
        tracing::debug!(
            ":: `{rendered}` exited with {exit_code} after {:?}",
            started.elapsed()
        );

        Ok(ExecResult::new(exit_code))
    }

    /// Run to completion, buffering stdout and stderr separately
    pub fn execute_captured(&self, args: impl Into<Args>) -> Result<CapturedResult, CommandError> {
        let argv = self.argv(args);
        let rendered = self.render(&argv);
        let mut command = self.command(&argv)?;
        command.stdout(Stdio::piped()).stderr(Stdio::piped());

        tracing::info!(":: running `{rendered}` in {}", self.cwd().display());
        let started = Instant::now();

        let (status, stdout, stderr) = block_on(&rendered, async {
            let child = match command.spawn() {
                Ok(child) => child,
                Err(err) => return Err(self.spawn_error(&rendered, err)),
            };

            self.wait_captured(&rendered, child).await
        })??;

        let exit_code = exit_code(status);
        tracing::debug!(
            ":: `{rendered}` exited with {exit_code} after {:?} ({} bytes stdout, {} bytes stderr)",
            started.elapsed(),
            stdout.len(),
            stderr.len()
        );

        Ok(CapturedResult::new(exit_code, &stdout, &stderr))
    }

    /// Wait for `child` to exit while draining both pipes
    ///
    /// The bounded wait covers the process only. Descendants that inherited
    /// the pipes may keep them open after the process exited, so the readers
    /// get [`DRAIN_TIMEOUT`] to finish and whatever they read by then is kept.
    async fn wait_captured(
        &self,
        rendered: &str,
        mut child: Child,
    ) -> Result<(ExitStatus, Vec<u8>, Vec<u8>), CommandError> {
        let wait_error = |source: std::io::Error| CommandError::Wait {
            command: rendered.to_owned(),
            source,
        };

        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        let status = {
            let reading = async {
                tokio::try_join!(
                    read_stream(stdout_pipe, &mut stdout),
                    read_stream(stderr_pipe, &mut stderr)
                )
            };
            tokio::pin!(reading);

            let deadline = tokio::time::sleep(self.timeout);
            tokio::pin!(deadline);

            let mut closed = false;

            let status = loop {
                tokio::select! {
                    status = child.wait() => break status.map_err(wait_error)?,
                    read = &mut reading, if !closed => {
                        read.map_err(wait_error)?;
                        closed = true;
                    }
                    _ = &mut deadline => {
                        child.kill().await.ok();
                        return Err(self.timed_out(rendered));
                    }
                }
            };

            if !closed {
                match tokio::time::timeout(DRAIN_TIMEOUT, &mut reading).await {
                    Ok(read) => {
                        read.map_err(wait_error)?;
                    }
                    Err(_) => tracing::debug!(
                        ":: `{rendered}` exited but its output is still held open, keeping what was read"
                    ),
                }
            }

            status
        };

        Ok((status, stdout, stderr))
    }

    fn command(&self, argv: &[OsString]) -> Result<Command, CommandError> {
        let mut command = Command::new(&self.program);

        command
            .args(argv)
            .envs(&self.env)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        if let Some(dir) = &self.working_directory {
            if !dir.is_dir() {
                return Err(CommandError::WorkingDirectoryNotFound(dir.clone()));
            }

            command.current_dir(dir);
        }

        Ok(command)
    }

    fn cwd(&self) -> &Path {
        self.working_directory
            .as_deref()
            .unwrap_or_else(|| Path::new("."))
    }

    fn render(&self, argv: &[OsString]) -> String {
        shell_words::join(
            std::iter::once(self.program.as_os_str())
                .chain(argv.iter().map(OsString::as_os_str))
                .map(OsStr::to_string_lossy),
        )
    }

    fn spawn_error(&self, rendered: &str, err: std::io::Error) -> CommandError {
        if err.kind() == ErrorKind::NotFound {
            CommandError::ToolchainNotFound(self.program.clone())
        } else {
            CommandError::Spawn {
                command: rendered.to_owned(),
                source: err,
            }
        }
    }

    fn timed_out(&self, rendered: &str) -> CommandError {
        tracing::warn!(
            ":: `{rendered}` exceeded {:?}, killing it",
            self.timeout
        );

        ProcessTimeout {
            command: rendered.to_owned(),
            timeout: self.timeout,
        }
        .into()
    }
}

/// Drive `future` to completion on a private current-thread runtime
///
/// Inside an async context the runtime lives on a scoped thread, a runtime
/// cannot be started on a thread that already drives one.
fn block_on<F>(rendered: &str, future: F) -> Result<F::Output, CommandError>
where
    F: Future + Send,
    F::Output: Send,
{
    let run = move || -> Result<F::Output, CommandError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|source| CommandError::Spawn {
                command: rendered.to_owned(),
                source,
            })?;

        Ok(runtime.block_on(future))
    };

    if tokio::runtime::Handle::try_current().is_err() {
        return run();
    }

    std::thread::scope(|scope| match scope.spawn(run).join() {
        Ok(output) => output,
        Err(panic) => std::panic::resume_unwind(panic),
    })
}

/// Append everything `stream` yields to `buffer`
///
/// Reads chunk by chunk so a cancelled read keeps what arrived before.
async fn read_stream<R>(stream: Option<R>, buffer: &mut Vec<u8>) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let Some(mut stream) = stream else {
        return Ok(());
    };

    let mut chunk = [0u8; 8192];

    loop {
        let read = stream.read(&mut chunk).await?;

        if read == 0 {
            return Ok(());
        }

        buffer.extend_from_slice(&chunk[..read]);
    }
}

/// Exit code of a terminated process, `128 + signal` for signalled ones
fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;

        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    -1
}
