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
    path::{Path, PathBuf},
    process::ExitCode,
};

use clap::{Args, Parser, Subcommand};
use miette::{bail, miette, Context as _, IntoDiagnostic};
use toolchain_harness::layout::OutputLayout;

mod project;

use project::{Failure, Project, DEFAULT_FRAMEWORK};

/// Environment variable enabling debug logs on stderr
const LOG_ENV_VAR: &str = "STUB_TOOLCHAIN_LOG";
const DEFAULT_CONFIGURATION: &str = "Debug";

/// Deterministic stand-in for the build toolchain
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Suppress the banner
    #[clap(long, global = true)]
    nologo: bool,
    /// Output verbosity, accepted and ignored
    #[clap(long, short, global = true)]
    verbosity: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Clone)]
struct BuildOptions {
    /// Target framework, defaults to the one of the project
    #[clap(long, short)]
    framework: Option<String>,
    /// Target runtime identifier
    #[clap(long, short)]
    runtime: Option<String>,
    /// Build configuration
    #[clap(long, short, default_value = DEFAULT_CONFIGURATION)]
    configuration: String,
    /// Fail instead of restoring implicitly
    #[clap(long)]
    no_restore: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Creates a project from a template
    New {
        /// Template short name
        template: String,
        /// Directory to create the project in
        #[clap(long, short)]
        output: Option<PathBuf>,
        /// Project name, defaults to the directory name
        #[clap(long, short)]
        name: Option<String>,
        /// Target framework of the new project
        #[clap(long, short, default_value = DEFAULT_FRAMEWORK)]
        framework: String,
        /// Skip the implicit restore
        #[clap(long)]
        no_restore: bool,
    },

    /// Writes the dependency lock artifact
    Restore {
        /// Target runtime identifier
        #[clap(long, short)]
        runtime: Option<String>,
    },

    /// Compiles the project
    Build {
        #[command(flatten)]
        options: BuildOptions,
    },

    /// Lays out the project for deployment
    Publish {
        #[command(flatten)]
        options: BuildOptions,
        /// Publish what a previous build left behind
        #[clap(long)]
        no_build: bool,
        /// Include the runtime and a native entry point
        #[arg(long, num_args = 0..=1, default_missing_value = "true")]
        self_contained: Option<bool>,
        /// Publish directory
        #[clap(long, short)]
        output: Option<PathBuf>,
    },

    /// Builds and runs the project
    Run {
        #[command(flatten)]
        options: BuildOptions,
        /// Run what a previous build left behind
        #[clap(long)]
        no_build: bool,
    },

    /// Runs a built assembly
    #[command(external_subcommand)]
    Exec(Vec<String>),
}

fn main() -> ExitCode {
    human_panic::setup_panic!();

    let level = match std::env::var_os(LOG_ENV_VAR) {
        Some(_) => tracing::Level::DEBUG,
        None => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .compact()
        .without_time()
        .with_level(false)
        .with_target(false)
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .try_init()
        .ok();

    let cli = Cli::parse();

    tracing::debug!(":: nologo={} verbosity={:?}", cli.nologo, cli.verbosity);

    let result = std::env::current_dir()
        .into_diagnostic()
        .wrap_err("failed to determine the working directory")
        .and_then(|cwd| dispatch(cli.command, &cwd));

    let Err(report) = result else {
        return ExitCode::SUCCESS;
    };

    // toolchain diagnostics belong on stdout, everything else on stderr
    match report.downcast_ref::<Failure>() {
        Some(failure) => println!("{failure}"),
        None => {
            eprintln!("error: {report}");
            for cause in report.chain().skip(1) {
                eprintln!("  caused by: {cause}");
            }
        }
    }

    ExitCode::FAILURE
}

fn dispatch(command: Command, cwd: &Path) -> miette::Result<()> {
    match command {
        Command::New {
            template,
            output,
            name,
            framework,
            no_restore,
        } => {
            if template != "console" {
                bail!("No templates found matching: '{template}'.");
            }

            let dir = match output {
                Some(output) => cwd.join(output),
                None => cwd.to_owned(),
            };

            let name = match name {
                Some(name) => name,
                None => dir
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .ok_or_else(|| miette!("cannot derive a project name from {}", dir.display()))?,
            };

            Project::scaffold(&dir, &name, &framework)?;

            println!("The template \"Console App\" was created successfully.");

            if !no_restore {
                let project = Project::discover(&dir)?;
                project.restore(&OutputLayout::new(DEFAULT_CONFIGURATION, framework))?;
            }

            Ok(())
        }
        Command::Restore { runtime } => {
            let project = Project::discover(cwd)?;
            let layout = OutputLayout::new(DEFAULT_CONFIGURATION, project.framework())
                .with_runtime(runtime.as_deref());

            project.restore(&layout)
        }
        Command::Build { options } => {
            let project = Project::discover(cwd)?;
            compile(&project, &options)?;
            Ok(())
        }
        Command::Publish {
            options,
            no_build,
            self_contained,
            output,
        } => {
            let project = Project::discover(cwd)?;

            let layout = if no_build {
                layout_for(&project, &options)
            } else {
                compile(&project, &options)?
            };

            project.publish(&layout, self_contained.unwrap_or(false), output.as_deref())?;

            Ok(())
        }
        Command::Run { options, no_build } => {
            let project = Project::discover(cwd)?;

            let layout = if no_build {
                layout_for(&project, &options)
            } else {
                compile(&project, &options)?
            };

            println!("{}", project.built_message(&layout)?);

            Ok(())
        }
        Command::Exec(args) => {
            let Some(target) = args.first() else {
                bail!("missing command");
            };

            if !target.ends_with(".dll") {
                bail!("Could not execute because the specified command or file was not found: '{target}'.");
            }

            println!("{}", project::read_assembly(&cwd.join(target))?);

            Ok(())
        }
    }
}

fn layout_for(project: &Project, options: &BuildOptions) -> OutputLayout {
    let framework = options
        .framework
        .as_deref()
        .unwrap_or_else(|| project.framework());

    OutputLayout::new(&options.configuration, framework).with_runtime(options.runtime.as_deref())
}

/// Restore unless told otherwise, then build
fn compile(project: &Project, options: &BuildOptions) -> miette::Result<OutputLayout> {
    let layout = layout_for(project, options);

    tracing::debug!(":: building {} for {}", project.name(), layout.target());

    if !options.no_restore {
        project.restore(&layout)?;
    }

    project.build(&layout)?;

    Ok(layout)
}
