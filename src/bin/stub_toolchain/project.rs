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
    collections::BTreeSet,
    fs,
    path::{Path, PathBuf},
};

use miette::{bail, miette, Context, Diagnostic, IntoDiagnostic};
use serde::{Deserialize, Serialize};
use serde_json::json;
use toolchain_harness::layout::{
    self, OutputLayout, MISSING_ASSETS_CODE, MISSING_INPUT_CODE, MISSING_TARGET_CODE,
};

/// Extension of project files
pub const PROJECT_EXTENSION: &str = "csproj";
/// Source file whose `WriteLine` calls make up the program output
pub const PROGRAM_FILE: &str = "Program.cs";
/// Framework written by `new` unless one is requested
pub const DEFAULT_FRAMEWORK: &str = "net8.0";

const ASSEMBLY_MAGIC: &str = "STUB-ASSEMBLY";
const ASSEMBLY_VERSION: &str = "1.0.0";
const NO_PROJECT_CODE: &str = "MSB1003";
const MULTIPLE_PROJECTS_CODE: &str = "MSB1011";
const SELF_CONTAINED_CODE: &str = "NETSDK1031";

/// A diagnostic reported by the toolchain itself, as opposed to a failure of
/// the stub
#[derive(thiserror::Error, Diagnostic, Debug)]
#[error("error {code}: {message}")]
pub struct Failure {
    code: &'static str,
    message: String,
}

impl Failure {
    fn new(code: &'static str, message: impl Into<String>) -> miette::Report {
        Self {
            code,
            message: message.into(),
        }
        .into()
    }
}

/// Dependency lock artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Assets {
    version: u32,
    project: String,
    targets: BTreeSet<String>,
}

/// The parts of a project file the stub reads
#[derive(Debug, Deserialize)]
struct ProjectFile {
    #[serde(rename = "PropertyGroup", default)]
    property_groups: Vec<PropertyGroup>,
}

#[derive(Debug, Deserialize)]
struct PropertyGroup {
    #[serde(rename = "TargetFramework", default)]
    target_framework: Vec<String>,
    #[serde(rename = "TargetFrameworks", default)]
    target_frameworks: Vec<String>,
}

/// The single project inside a working directory
#[derive(Debug)]
pub struct Project {
    dir: PathBuf,
    name: String,
    framework: String,
    message: String,
}

impl Project {
    /// Locate the project file in `dir`
    pub fn discover(dir: &Path) -> miette::Result<Self> {
        let entries = fs::read_dir(dir)
            .into_diagnostic()
            .wrap_err(miette!("failed to read {}", dir.display()))?;

        let mut projects: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == PROJECT_EXTENSION))
            .collect();

        let file = match projects.len() {
            0 => {
                return Err(Failure::new(
                    NO_PROJECT_CODE,
                    "Specify a project or solution file. The current working directory does not contain a project or solution file.",
                ))
            }
            1 => projects.remove(0),
            _ => {
                return Err(Failure::new(
                    MULTIPLE_PROJECTS_CODE,
                    "Specify which project or solution file to use because this folder contains more than one project or solution file.",
                ))
            }
        };

        let name = file
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .ok_or_else(|| miette!("invalid project file name: {}", file.display()))?;

        let contents = fs::read_to_string(&file)
            .into_diagnostic()
            .wrap_err(miette!("failed to read {}", file.display()))?;

        let framework = target_framework(&contents)
            .wrap_err(miette!("failed to parse {}", file.display()))?
            .ok_or_else(|| miette!("{} does not declare a TargetFramework", file.display()))?;

        let program = dir.join(PROGRAM_FILE);
        let message = match fs::read_to_string(&program) {
            Ok(source) => written_lines(&source).join("\n"),
            Err(_) => String::new(),
        };

        tracing::debug!(":: discovered project {name} ({framework}) in {}", dir.display());

        Ok(Self {
            dir: dir.to_owned(),
            name,
            framework,
            message,
        })
    }

    /// Write a console project into `dir`
    pub fn scaffold(dir: &Path, name: &str, framework: &str) -> miette::Result<()> {
        let project = format!(
            "<Project Sdk=\"Microsoft.NET.Sdk\">\n\n  <PropertyGroup>\n    <OutputType>Exe</OutputType>\n    <TargetFramework>{framework}</TargetFramework>\n  </PropertyGroup>\n\n</Project>\n"
        );

        let program = "using System;\n\nnamespace ConsoleApp\n{\n    class Program\n    {\n        static void Main(string[] args)\n        {\n            Console.WriteLine(\"Hello World\");\n        }\n    }\n}\n";

        write(&dir.join(format!("{name}.{PROJECT_EXTENSION}")), project)?;
        write(&dir.join(PROGRAM_FILE), program)
    }

    /// Name of the project, and of its assemblies
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Framework declared by the project file
    pub fn framework(&self) -> &str {
        &self.framework
    }

    /// Write the dependency lock artifact for the given target
    ///
    /// The output only depends on the project and the target, so restoring
    /// twice yields identical bytes.
    pub fn restore(&self, layout: &OutputLayout) -> miette::Result<()> {
        let mut targets = BTreeSet::from([layout.framework().to_owned()]);
        targets.insert(layout.target());

        let assets = Assets {
            version: 3,
            project: self.name.clone(),
            targets,
        };

        let contents = serde_json::to_string_pretty(&assets)
            .into_diagnostic()
            .wrap_err("failed to serialize assets")?;

        write(&self.assets_path(), contents)?;

        println!("  Restored {}", self.project_path().display());

        Ok(())
    }

    /// Compile the project into intermediate and output directories
    pub fn build(&self, layout: &OutputLayout) -> miette::Result<()> {
        let assets = self.assets()?;

        if !assets.targets.contains(&layout.target()) {
            return Err(Failure::new(
                MISSING_TARGET_CODE,
                format!(
                    "Assets file '{}' doesn't have a target for '{}'. Ensure that restore has run and that you have included '{}' in the TargetFrameworks of your project. [{}]",
                    self.assets_path().display(),
                    layout.target(),
                    layout.framework(),
                    self.project_path().display()
                ),
            ));
        }

        let assembly = format!("{ASSEMBLY_MAGIC}\n{}\n", self.message);
        let intermediate = self.dir.join(layout.intermediate_dir());

        write(&intermediate.join(layout::assembly_name(&self.name)), &assembly)?;
        write(&intermediate.join(self.symbols_name()), ASSEMBLY_MAGIC)?;

        let output = self.dir.join(layout.output_dir());
        self.lay_out(&intermediate, &output, layout, layout.runtime().is_some())?;

        println!(
            "  {} -> {}",
            self.name,
            output.join(layout::assembly_name(&self.name)).display()
        );
        println!("\nBuild succeeded.");

        Ok(())
    }

    /// Copy build results into the publish directory
    ///
    /// Expects `build` to have produced the intermediate assembly.
    pub fn publish(
        &self,
        layout: &OutputLayout,
        self_contained: bool,
        output: Option<&Path>,
    ) -> miette::Result<PathBuf> {
        if self_contained && layout.runtime().is_none() {
            return Err(Failure::new(
                SELF_CONTAINED_CODE,
                "It is not supported to build or publish a self-contained application without specifying a RuntimeIdentifier. You must either specify a RuntimeIdentifier or set SelfContained to false.",
            ));
        }

        let intermediate = self.dir.join(layout.intermediate_dir());
        let destination = match output {
            Some(output) => self.dir.join(output),
            None => self.dir.join(layout.publish_dir()),
        };

        self.lay_out(&intermediate, &destination, layout, self_contained)?;

        println!("  {} -> {}", self.name, destination.display());

        Ok(destination)
    }

    /// Message printed by the assembly in the output directory
    pub fn built_message(&self, layout: &OutputLayout) -> miette::Result<String> {
        let assembly = self
            .dir
            .join(layout.output_dir())
            .join(layout::assembly_name(&self.name));

        read_assembly(&assembly)
    }

    fn lay_out(
        &self,
        intermediate: &Path,
        destination: &Path,
        layout: &OutputLayout,
        executable: bool,
    ) -> miette::Result<()> {
        for file in [layout::assembly_name(&self.name), self.symbols_name()] {
            let source = intermediate.join(&file);

            if !source.is_file() {
                let relative = source.strip_prefix(&self.dir).unwrap_or(&source);

                return Err(Failure::new(
                    MISSING_INPUT_CODE,
                    format!(
                        "Could not copy the file \"{}\" because it was not found. [{}]",
                        relative.display(),
                        self.project_path().display()
                    ),
                ));
            }

            fs::create_dir_all(destination)
                .into_diagnostic()
                .wrap_err(miette!("failed to create {}", destination.display()))?;

            fs::copy(&source, destination.join(&file))
                .into_diagnostic()
                .wrap_err(miette!("failed to copy {}", source.display()))?;
        }

        let library = format!("{}/{ASSEMBLY_VERSION}", self.name);
        let target = layout.target();
        let assembly = layout::assembly_name(&self.name);

        let deps = json!({
            "runtimeTarget": { "name": target.clone() },
            "targets": {
                target: {
                    library.clone(): {
                        "runtime": { assembly: {} }
                    }
                }
            },
            "libraries": {
                library: { "type": "project", "serviceable": false }
            }
        });

        let runtime_config = if executable {
            json!({
                "runtimeOptions": {
                    "tfm": layout.framework(),
                    "includedFrameworks": [{ "name": "Stub.App", "version": ASSEMBLY_VERSION }]
                }
            })
        } else {
            json!({
                "runtimeOptions": {
                    "tfm": layout.framework(),
                    "framework": { "name": "Stub.App", "version": ASSEMBLY_VERSION }
                }
            })
        };

        write_json(&destination.join(format!("{}.deps.json", self.name)), &deps)?;
        write_json(
            &destination.join(format!("{}.runtimeconfig.json", self.name)),
            &runtime_config,
        )?;

        if executable {
            write(
                &destination.join(layout::executable_name(&self.name)),
                ASSEMBLY_MAGIC,
            )?;
        }

        Ok(())
    }

    fn assets(&self) -> miette::Result<Assets> {
        let path = self.assets_path();

        let Ok(contents) = fs::read_to_string(&path) else {
            return Err(Failure::new(
                MISSING_ASSETS_CODE,
                format!(
                    "Assets file '{}' not found. Run a NuGet package restore to generate this file. [{}]",
                    path.display(),
                    self.project_path().display()
                ),
            ));
        };

        serde_json::from_str(&contents)
            .into_diagnostic()
            .wrap_err(miette!("failed to parse {}", path.display()))
    }

    fn assets_path(&self) -> PathBuf {
        self.dir.join(OutputLayout::assets_file())
    }

    fn project_path(&self) -> PathBuf {
        self.dir.join(format!("{}.{PROJECT_EXTENSION}", self.name))
    }

    fn symbols_name(&self) -> String {
        format!("{}.pdb", self.name)
    }
}

/// Message recorded in a stub assembly
pub fn read_assembly(path: &Path) -> miette::Result<String> {
    let contents = fs::read_to_string(path)
        .into_diagnostic()
        .wrap_err(miette!(
            "The application to execute does not exist: '{}'.",
            path.display()
        ))?;

    let Some(message) = contents.strip_prefix(ASSEMBLY_MAGIC) else {
        bail!("'{}' is not a valid assembly", path.display());
    };

    Ok(message.trim_matches('\n').to_owned())
}

/// Framework a project file builds for
///
/// A `TargetFramework` property wins over the first entry of
/// `TargetFrameworks`.
fn target_framework(xml: &str) -> miette::Result<Option<String>> {
    let project: ProjectFile = quick_xml::de::from_str(xml).into_diagnostic()?;
    let groups = &project.property_groups;

    let single = groups
        .iter()
        .flat_map(|group| &group.target_framework)
        .map(|framework| framework.trim())
        .find(|framework| !framework.is_empty());

    let multiple = || {
        groups
            .iter()
            .flat_map(|group| &group.target_frameworks)
            .flat_map(|frameworks| frameworks.split(';'))
            .map(str::trim)
            .find(|framework| !framework.is_empty())
    };

    Ok(single.or_else(multiple).map(str::to_owned))
}

/// String literals passed to `WriteLine`, in source order
fn written_lines(source: &str) -> Vec<String> {
    const CALL: &str = "WriteLine(\"";

    source
        .match_indices(CALL)
        .filter_map(|(index, _)| {
            let rest = &source[index + CALL.len()..];
            rest.find('"').map(|end| rest[..end].to_owned())
        })
        .collect()
}

fn write(path: &Path, contents: impl AsRef<[u8]>) -> miette::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .into_diagnostic()
            .wrap_err(miette!("failed to create {}", parent.display()))?;
    }

    fs::write(path, contents)
        .into_diagnostic()
        .wrap_err(miette!("failed to write {}", path.display()))
}

fn write_json(path: &Path, value: &serde_json::Value) -> miette::Result<()> {
    let contents = serde_json::to_string_pretty(value)
        .into_diagnostic()
        .wrap_err(miette!("failed to serialize {}", path.display()))?;

    write(path, contents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_target_framework() {
        let xml = "<Project Sdk=\"Microsoft.NET.Sdk\">\n  <PropertyGroup>\n    <OutputType>Exe</OutputType>\n    <TargetFramework> net8.0 </TargetFramework>\n  </PropertyGroup>\n</Project>";

        assert_eq!(target_framework(xml).unwrap().as_deref(), Some("net8.0"));
    }

    #[test]
    fn reads_conditional_framework_and_skips_comments() {
        let xml = r#"<Project Sdk="Microsoft.NET.Sdk">
  <!-- <TargetFramework>net6.0</TargetFramework> -->
  <PropertyGroup Condition="'$(Configuration)' == 'Debug'">
    <DebugType>full</DebugType>
  </PropertyGroup>
  <ItemGroup>
    <Compile Include="Program.cs" />
  </ItemGroup>
  <PropertyGroup>
    <TargetFramework Condition="'$(OS)' != ''">net9.0</TargetFramework>
  </PropertyGroup>
</Project>"#;

        assert_eq!(target_framework(xml).unwrap().as_deref(), Some("net9.0"));
    }

    #[test]
    fn falls_back_to_first_of_target_frameworks() {
        let xml = "<Project><PropertyGroup><TargetFrameworks>net8.0;net48</TargetFrameworks></PropertyGroup></Project>";

        assert_eq!(target_framework(xml).unwrap().as_deref(), Some("net8.0"));
    }

    #[test]
    fn missing_framework_is_none() {
        let xml = "<Project><PropertyGroup><OutputType>Exe</OutputType></PropertyGroup></Project>";

        assert_eq!(target_framework(xml).unwrap(), None);
        assert!(target_framework("<Project><PropertyGroup>").is_err());
    }

    #[test]
    fn collects_written_lines() {
        let source = "Console.WriteLine(\"Hello World\");\nConsole.WriteLine(\"Bye\");";

        assert_eq!(written_lines(source), vec!["Hello World", "Bye"]);
        assert!(written_lines("return 0;").is_empty());
    }
}
