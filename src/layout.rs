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

use std::{collections::BTreeSet, path::PathBuf};

/// Dependency lock artifact written by the restore step
pub const ASSETS_FILE: &str = "project.assets.json";
/// Directory holding intermediate build state and the assets file
pub const INTERMEDIATE_DIRECTORY: &str = "obj";
/// Directory holding build outputs
pub const OUTPUT_DIRECTORY: &str = "bin";
/// Leaf directory of publish outputs
pub const PUBLISH_DIRECTORY: &str = "publish";

/// Diagnostic code reported when an input file of a copy step is missing
pub const MISSING_INPUT_CODE: &str = "MSB3030";
/// Diagnostic code reported when the assets file is missing
pub const MISSING_ASSETS_CODE: &str = "NETSDK1004";
/// Diagnostic code reported when the assets file lacks the requested target
pub const MISSING_TARGET_CODE: &str = "NETSDK1047";

/// Output layout of one project for one configuration and framework
///
/// ```
/// use toolchain_harness::layout::OutputLayout;
///
/// let layout = OutputLayout::new("Debug", "net8.0").with_runtime(Some("linux-x64"));
/// assert!(layout.publish_dir().ends_with("linux-x64/publish"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    configuration: String,
    framework: String,
    runtime: Option<String>,
}

impl OutputLayout {
    /// Layout without a runtime identifier segment
    pub fn new(configuration: impl Into<String>, framework: impl Into<String>) -> Self {
        Self {
            configuration: configuration.into(),
            framework: framework.into(),
            runtime: None,
        }
    }

    /// Set or clear the runtime identifier segment
    pub fn with_runtime(mut self, runtime: Option<&str>) -> Self {
        self.runtime = runtime.map(str::to_owned);
        self
    }

    /// Configuration segment
    pub fn configuration(&self) -> &str {
        &self.configuration
    }

    /// Framework segment
    pub fn framework(&self) -> &str {
        &self.framework
    }

    /// Runtime identifier segment, if any
    pub fn runtime(&self) -> Option<&str> {
        self.runtime.as_deref()
    }

    /// `bin/<configuration>/<framework>[/<rid>]`
    pub fn output_dir(&self) -> PathBuf {
        self.under(OUTPUT_DIRECTORY)
    }

    /// `bin/<configuration>/<framework>[/<rid>]/publish`
    pub fn publish_dir(&self) -> PathBuf {
        self.output_dir().join(PUBLISH_DIRECTORY)
    }

    /// `obj/<configuration>/<framework>[/<rid>]`
    pub fn intermediate_dir(&self) -> PathBuf {
        self.under(INTERMEDIATE_DIRECTORY)
    }

    /// `obj/project.assets.json`
    pub fn assets_file() -> PathBuf {
        PathBuf::from(INTERMEDIATE_DIRECTORY).join(ASSETS_FILE)
    }

    /// The restore target this layout requires, `<framework>[/<rid>]`
    pub fn target(&self) -> String {
        match &self.runtime {
            Some(runtime) => format!("{}/{runtime}", self.framework),
            None => self.framework.clone(),
        }
    }

    fn under(&self, root: &str) -> PathBuf {
        let mut path = PathBuf::from(root);
        path.push(&self.configuration);
        path.push(&self.framework);
        if let Some(runtime) = &self.runtime {
            path.push(runtime);
        }
        path
    }
}

/// Name of the managed assembly of `app`
pub fn assembly_name(app: &str) -> String {
    format!("{app}.dll")
}

/// Name of the native entry point of `app` on this platform
pub fn executable_name(app: &str) -> String {
    format!("{app}{}", std::env::consts::EXE_SUFFIX)
}

/// Files of a framework-dependent publish
pub fn framework_dependent_files(app: &str) -> BTreeSet<String> {
    [
        assembly_name(app),
        format!("{app}.pdb"),
        format!("{app}.deps.json"),
        format!("{app}.runtimeconfig.json"),
    ]
    .into_iter()
    .collect()
}

/// Files of a self-contained publish: the framework-dependent set plus the
/// native entry point
pub fn self_contained_files(app: &str) -> BTreeSet<String> {
    let mut files = framework_dependent_files(app);
    files.insert(executable_name(app));
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn framework_dependent_publish_dir_has_no_runtime_segment() {
        let layout = OutputLayout::new("Debug", "net8.0");

        assert_eq!(
            layout.publish_dir(),
            Path::new("bin").join("Debug").join("net8.0").join("publish")
        );
        assert_eq!(layout.target(), "net8.0");
    }

    #[test]
    fn runtime_segment_precedes_publish() {
        let layout = OutputLayout::new("Release", "net8.0").with_runtime(Some("win-x64"));

        assert_eq!(
            layout.publish_dir(),
            Path::new("bin")
                .join("Release")
                .join("net8.0")
                .join("win-x64")
                .join("publish")
        );
        assert_eq!(
            layout.intermediate_dir(),
            Path::new("obj").join("Release").join("net8.0").join("win-x64")
        );
        assert_eq!(layout.target(), "net8.0/win-x64");
    }

    #[test]
    fn framework_dependent_set_has_no_executable() {
        let files = framework_dependent_files("App");

        assert_eq!(files.len(), 4);
        assert!(files.contains("App.dll"));
        assert!(files.contains("App.pdb"));
        assert!(files.contains("App.deps.json"));
        assert!(files.contains("App.runtimeconfig.json"));
    }

    #[test]
    fn self_contained_set_adds_platform_executable() {
        let files = self_contained_files("App");

        assert_eq!(files.len(), 5);
        assert!(files.contains(&executable_name("App")));

        #[cfg(windows)]
        assert_eq!(executable_name("App"), "App.exe");
        #[cfg(not(windows))]
        assert_eq!(executable_name("App"), "App");
    }
}
