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

use crate::command::Operation;
use miette::{bail, ensure, miette, Context, IntoDiagnostic};
use std::{
    collections::{BTreeMap, HashMap},
    path::{Path, PathBuf},
    sync::OnceLock,
    time::Duration,
};

// Location of the configuration file
const CONFIG_FILE: &str = ".harness/config.toml";

/// Executable invoked when nothing else is configured
pub const DEFAULT_TOOLCHAIN: &str = "dotnet";
/// Build configuration used when `CONFIGURATION` is unset
pub const DEFAULT_CONFIGURATION: &str = "Debug";
/// Bounded wait applied to every toolchain invocation
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);
/// Fixture directory, relative to the project root
pub const DEFAULT_FIXTURE_DIRECTORY: &str = "fixtures";
/// Scratch directory name below the system temp directory
const SCRATCH_DIRECTORY: &str = "toolchain-harness";

/// Overrides the toolchain executable
pub const TOOLCHAIN_ENV_VAR: &str = "HARNESS_TOOLCHAIN";
/// Overrides the build configuration name
pub const CONFIGURATION_ENV_VAR: &str = "CONFIGURATION";
/// Overrides the scratch root
pub const SCRATCH_ENV_VAR: &str = "HARNESS_SCRATCH_ROOT";
/// Overrides the fixture root
pub const FIXTURES_ENV_VAR: &str = "HARNESS_FIXTURES";
/// Overrides the timeout, in seconds
pub const TIMEOUT_ENV_VAR: &str = "HARNESS_TIMEOUT_SECS";
/// Keeps isolated instances on disk after the test
pub const KEEP_ENV_VAR: &str = "HARNESS_KEEP";

static GLOBAL: OnceLock<HarnessConfig> = OnceLock::new();

/// Representation of the .harness/config.toml configuration file
///
/// # Example
///
/// ```toml
/// [toolchain]
/// path = "dotnet"
/// configuration = "Release"
/// timeout_secs = 600
///
/// [fixtures]
/// root = "fixtures"
/// scratch = "target/harness"
/// keep = false
///
/// [environment]
/// DOTNET_CLI_TELEMETRY_OPTOUT = "1"
///
/// [commands.publish]
/// default_args = ["--nologo"]
/// ```
///
/// Values from the environment take precedence over the file, see
/// [`HarnessConfig::resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessConfig {
    /// Path to the configuration file
    config_path: Option<PathBuf>,

    /// Toolchain executable, either a bare name looked up on `PATH` or a path
    toolchain: PathBuf,

    /// Build configuration name used to compose output paths
    configuration: String,

    /// Shared root below which isolated instances are allocated
    scratch_root: PathBuf,

    /// Directory holding the fixture catalog
    fixture_root: PathBuf,

    /// Bounded wait for a single invocation
    timeout: Duration,

    /// Leave isolated instances on disk for inspection
    keep_instances: bool,

    /// Extra environment passed to every invocation
    environment: BTreeMap<String, String>,

    /// Default arguments for commands
    command_defaults: HashMap<String, Vec<String>>,
}

impl HarnessConfig {
    /// Configuration with default values, rooted at `base`
    pub fn defaults(base: &Path) -> Self {
        Self {
            config_path: None,
            toolchain: PathBuf::from(DEFAULT_TOOLCHAIN),
            configuration: DEFAULT_CONFIGURATION.to_owned(),
            scratch_root: std::env::temp_dir().join(SCRATCH_DIRECTORY),
            fixture_root: base.join(DEFAULT_FIXTURE_DIRECTORY),
            timeout: DEFAULT_TIMEOUT,
            keep_instances: false,
            environment: BTreeMap::new(),
            command_defaults: HashMap::new(),
        }
    }

    /// Create a new configuration from the configuration file, if any
    ///
    /// # Arguments
    /// * `cwd` - Starting directory to search for the configuration file
    pub fn new(cwd: &Path) -> miette::Result<Self> {
        match Self::locate_config(cwd) {
            Some(config_path) => Self::new_from_config_file(&config_path),
            None => Ok(Self::defaults(cwd)),
        }
    }

    /// Resolve the configuration from the configuration file and the environment
    ///
    /// `lookup` is consulted once per supported variable; empty values count
    /// as unset.
    pub fn resolve(
        cwd: &Path,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> miette::Result<Self> {
        let mut config = Self::new(cwd)?;
        config.apply_environment(lookup)?;
        Ok(config)
    }

    /// The process wide configuration
    ///
    /// Resolved from the current directory and the process environment on
    /// first use and never reassigned afterwards.
    pub fn global() -> miette::Result<&'static Self> {
        if let Some(config) = GLOBAL.get() {
            return Ok(config);
        }

        let cwd = std::env::current_dir()
            .into_diagnostic()
            .wrap_err("failed to access current directory")?;

        let config = Self::resolve(&cwd, |key| std::env::var(key).ok())?;

        tracing::debug!(":: resolved harness configuration: {config:?}");

        Ok(GLOBAL.get_or_init(|| config))
    }

    /// Path to the configuration file this was loaded from
    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Toolchain executable
    pub fn toolchain(&self) -> &Path {
        &self.toolchain
    }

    /// Build configuration name, `Debug` unless overridden
    pub fn configuration(&self) -> &str {
        &self.configuration
    }

    /// Shared scratch root
    pub fn scratch_root(&self) -> &Path {
        &self.scratch_root
    }

    /// Fixture root holding the catalog
    pub fn fixture_root(&self) -> &Path {
        &self.fixture_root
    }

    /// Bounded wait for a single invocation
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether isolated instances survive the test
    pub fn keep_instances(&self) -> bool {
        self.keep_instances
    }

    /// Extra environment passed to every invocation
    pub fn environment(&self) -> &BTreeMap<String, String> {
        &self.environment
    }

    /// Get the default arguments for a specific operation
    ///
    /// # Returns
    /// A vector of default arguments for the specified operation
    pub fn default_args(&self, operation: Operation) -> Vec<String> {
        self.command_defaults
            .get(&operation.to_string())
            .cloned()
            .unwrap_or_default()
    }

    /// Use another toolchain executable
    pub fn with_toolchain(mut self, toolchain: impl Into<PathBuf>) -> Self {
        self.toolchain = toolchain.into();
        self
    }

    /// Use another build configuration name
    pub fn with_configuration(mut self, configuration: impl Into<String>) -> Self {
        self.configuration = configuration.into();
        self
    }

    /// Use another scratch root
    pub fn with_scratch_root(mut self, scratch_root: impl Into<PathBuf>) -> Self {
        self.scratch_root = scratch_root.into();
        self
    }

    /// Use another fixture root
    pub fn with_fixture_root(mut self, fixture_root: impl Into<PathBuf>) -> Self {
        self.fixture_root = fixture_root.into();
        self
    }

    /// Use another timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Keep isolated instances on disk
    pub fn with_keep_instances(mut self, keep: bool) -> Self {
        self.keep_instances = keep;
        self
    }

    /// Pass an additional environment variable to every invocation
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    /// Set the default arguments of an operation
    pub fn with_default_args<I, S>(mut self, operation: Operation, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command_defaults.insert(
            operation.to_string(),
            args.into_iter().map(Into::into).collect(),
        );
        self
    }

    /// Apply environment overrides on top of the current values
    fn apply_environment(&mut self, lookup: impl Fn(&str) -> Option<String>) -> miette::Result<()> {
        let var = |key: &str| lookup(key).filter(|value| !value.is_empty());

        if let Some(toolchain) = var(TOOLCHAIN_ENV_VAR) {
            self.toolchain = PathBuf::from(toolchain);
        }

        if let Some(configuration) = var(CONFIGURATION_ENV_VAR) {
            self.configuration = configuration;
        }

        if let Some(scratch) = var(SCRATCH_ENV_VAR) {
            self.scratch_root = PathBuf::from(scratch);
        }

        if let Some(fixtures) = var(FIXTURES_ENV_VAR) {
            self.fixture_root = PathBuf::from(fixtures);
        }

        if let Some(timeout) = var(TIMEOUT_ENV_VAR) {
            let secs = timeout
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .ok_or_else(|| {
                    miette!("{TIMEOUT_ENV_VAR} must be a positive number of seconds, found '{timeout}'")
                })?;
            self.timeout = Duration::from_secs(secs);
        }

        if let Some(keep) = var(KEEP_ENV_VAR) {
            self.keep_instances = parse_flag(&keep)
                .ok_or_else(|| miette!("{KEEP_ENV_VAR} must be a boolean, found '{keep}'"))?;
        }

        Ok(())
    }

    /// Locate the configuration file in the current directory or any parent directories
    ///
    /// # Returns
    /// Some(PathBuf) if the configuration file is found, None otherwise
    fn locate_config(cwd: &Path) -> Option<PathBuf> {
        let mut current_dir = cwd.to_owned();

        loop {
            let config_path = current_dir.join(CONFIG_FILE);
            if config_path.exists() {
                return Some(config_path);
            }

            if !current_dir.pop() {
                break;
            }
        }

        None
    }

    /// Create configuration from a TOML file
    ///
    /// Relative paths in the file resolve against the directory that
    /// contains `.harness/`.
    fn new_from_config_file(config_path: &Path) -> miette::Result<Self> {
        let base = config_path
            .parent()
            .and_then(Path::parent)
            .ok_or_else(|| miette!("invalid config location: {}", config_path.display()))?;

        let config = std::fs::read_to_string(config_path)
            .into_diagnostic()
            .wrap_err(miette!(
                "failed to read config file: {}",
                config_path.display()
            ))?;
        let config: toml::Value = toml::from_str(&config).into_diagnostic().wrap_err(miette!(
            "failed to parse config file: {}",
            config_path.display()
        ))?;

        let mut result = Self::defaults(base);
        result.config_path = Some(config_path.to_owned());

        let string = |table: &str, key: &str| -> miette::Result<Option<String>> {
            match config.get(table).and_then(|t| t.get(key)) {
                None => Ok(None),
                Some(value) => value
                    .as_str()
                    .map(|s| Some(s.to_owned()))
                    .ok_or_else(|| miette!("[{table}] {key} must be a string"))
                    .wrap_err(miette!("in config file: {}", config_path.display())),
            }
        };

        // Load toolchain settings from [toolchain]
        if let Some(path) = string("toolchain", "path")? {
            result.toolchain = resolve_executable(base, &path);
        }

        if let Some(configuration) = string("toolchain", "configuration")? {
            result.configuration = configuration;
        }

        if let Some(timeout) = config.get("toolchain").and_then(|t| t.get("timeout_secs")) {
            let secs = timeout
                .as_integer()
                .filter(|secs| *secs > 0)
                .ok_or_else(|| miette!("[toolchain] timeout_secs must be a positive integer"))
                .wrap_err(miette!("in config file: {}", config_path.display()))?;
            result.timeout = Duration::from_secs(secs as u64);
        }

        // Load fixture locations from [fixtures]
        if let Some(root) = string("fixtures", "root")? {
            result.fixture_root = base.join(root);
        }

        if let Some(scratch) = string("fixtures", "scratch")? {
            result.scratch_root = base.join(scratch);
        }

        if let Some(keep) = config.get("fixtures").and_then(|t| t.get("keep")) {
            result.keep_instances = keep
                .as_bool()
                .ok_or_else(|| miette!("[fixtures] keep must be a boolean"))
                .wrap_err(miette!("in config file: {}", config_path.display()))?;
        }

        // Load extra variables from [environment]
        if let Some(environment) = config.get("environment") {
            let Some(environment) = environment.as_table() else {
                bail!(
                    "[environment] must be a table in config file: {}",
                    config_path.display()
                );
            };

            for (key, value) in environment {
                let value = value
                    .as_str()
                    .ok_or_else(|| miette!("environment variable '{key}' must be a string"))
                    .wrap_err(miette!("in config file: {}", config_path.display()))?;
                result.environment.insert(key.clone(), value.to_owned());
            }
        }

        // Parse command-specific default arguments from [commands.*] sections
        result.command_defaults = config
            .get("commands")
            .and_then(|commands| commands.as_table())
            .map(|commands| {
                commands
                    .iter()
                    .map(|(command, settings)| {
                        ensure!(
                            command.parse::<Operation>().is_ok(),
                            "unknown command '{}' in [commands]",
                            command
                        );

                        let default_args = settings
                            .get("default_args")
                            .and_then(|args| args.as_array())
                            .map(|args| {
                                args.iter()
                                    .filter_map(|arg| arg.as_str().map(|s| s.to_string()))
                                    .collect::<Vec<String>>()
                            })
                            .unwrap_or_default();
                        Ok((command.to_string(), default_args))
                    })
                    .collect::<miette::Result<HashMap<String, Vec<String>>>>()
            })
            .unwrap_or_else(|| Ok(HashMap::new()))
            .wrap_err(miette!(
                "failed to load command defaults from config file: {}",
                config_path.display()
            ))?;

        Ok(result)
    }
}

/// Bare executable names stay subject to `PATH` lookup, anything with a
/// separator is anchored at the project root.
fn resolve_executable(base: &Path, path: &str) -> PathBuf {
    let path = Path::new(path);

    if path.is_absolute() || path.components().count() == 1 {
        path.to_owned()
    } else {
        base.join(path)
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
