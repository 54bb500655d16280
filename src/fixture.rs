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
    ops::Deref,
    path::{Path, PathBuf},
};

use fs_extra::dir::CopyOptions;
use miette::{bail, ensure, miette, Context, IntoDiagnostic};
use serde::Deserialize;

use crate::{
    config::HarnessConfig,
    directory::TestDirectory,
    errors::{AmbiguousFixture, FixtureNotFound},
};

/// Scratch subdirectory for instances that do not start from a template
const EMPTY_DIRECTORY: &str = ".empty";

/// A read-only sample project declared in the fixture catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    name: String,
    category: Option<String>,
    source: PathBuf,
    restore: Option<PathBuf>,
}

impl Template {
    /// Name of the template
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Category of the template, if any
    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    /// Directory whose contents make up the template
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Directory of precomputed restore files, if any
    pub fn restore_source(&self) -> Option<&Path> {
        self.restore.as_deref()
    }
}

#[derive(Debug, Deserialize)]
struct RawCatalog {
    #[serde(default, rename = "template")]
    templates: Vec<RawTemplate>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTemplate {
    name: String,
    category: Option<String>,
    path: PathBuf,
    restore: Option<PathBuf>,
}

/// Catalog of templates and factory of isolated copies
///
/// The catalog lives in `<fixture root>/catalog.toml`:
///
/// ```toml
/// [[template]]
/// name = "ConsoleApp"
/// category = "TestProjects"
/// path = "TestProjects/ConsoleApp"
/// restore = "TestProjects/ConsoleApp.restore"
/// ```
#[derive(Debug, Clone)]
pub struct FixtureStore {
    root: PathBuf,
    scratch: PathBuf,
    keep: bool,
    templates: Vec<Template>,
}

impl FixtureStore {
    /// Name of the catalog file inside the fixture root
    pub const CATALOG_FILE: &'static str = "catalog.toml";

    /// Load the catalog from the fixture root of `config`
    pub fn open(config: &HarnessConfig) -> miette::Result<Self> {
        let root = config.fixture_root().to_owned();
        let catalog_path = root.join(Self::CATALOG_FILE);

        let catalog = std::fs::read_to_string(&catalog_path)
            .into_diagnostic()
            .wrap_err(miette!(
                "failed to read fixture catalog: {}",
                catalog_path.display()
            ))?;

        let catalog: RawCatalog = toml::from_str(&catalog).into_diagnostic().wrap_err(miette!(
            "failed to parse fixture catalog: {}",
            catalog_path.display()
        ))?;

        let mut seen = BTreeSet::new();
        let mut templates = Vec::with_capacity(catalog.templates.len());

        for raw in catalog.templates {
            ensure!(
                seen.insert((raw.category.clone(), raw.name.clone())),
                "fixture `{}` is declared twice in {}",
                raw.name,
                catalog_path.display()
            );

            let source = root.join(&raw.path);
            ensure!(
                source.is_dir(),
                "source of fixture `{}` is not a directory: {}",
                raw.name,
                source.display()
            );

            let restore = raw.restore.map(|restore| root.join(restore));
            if let Some(restore) = &restore {
                ensure!(
                    restore.is_dir(),
                    "restore files of fixture `{}` are not a directory: {}",
                    raw.name,
                    restore.display()
                );
            }

            templates.push(Template {
                name: raw.name,
                category: raw.category,
                source,
                restore,
            });
        }

        tracing::debug!(
            ":: loaded {} fixtures from {}",
            templates.len(),
            catalog_path.display()
        );

        Ok(Self {
            root,
            scratch: config.scratch_root().to_owned(),
            keep: config.keep_instances(),
            templates,
        })
    }

    /// Fixture root holding the catalog
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// All declared templates
    pub fn templates(&self) -> &[Template] {
        &self.templates
    }

    /// Look up a template by name and optional category
    ///
    /// Without a category the name must be unique across the catalog.
    pub fn get(&self, name: &str, category: Option<&str>) -> miette::Result<&Template> {
        let mut candidates = self
            .templates
            .iter()
            .filter(|t| t.name == name)
            .filter(|t| category.is_none() || t.category.as_deref() == category);

        let Some(first) = candidates.next() else {
            return Err(FixtureNotFound {
                name: name.to_owned(),
                category: category.map(str::to_owned),
            }
            .into());
        };

        let rest: Vec<_> = candidates.collect();
        if !rest.is_empty() {
            let categories = std::iter::once(first)
                .chain(rest)
                .map(|t| t.category.clone().unwrap_or_else(|| "<none>".to_owned()))
                .collect();

            return Err(AmbiguousFixture {
                name: name.to_owned(),
                categories,
            }
            .into());
        }

        Ok(first)
    }

    /// Materialize an isolated, writable copy of `template`
    ///
    /// The copy lives at `<scratch>/<category>/<name>/<identifier>-<salt>`;
    /// `identifier` tells parameterized variants of one test apart in the
    /// scratch tree, the random salt keeps every instance unique.
    pub fn instantiate(
        &self,
        template: &Template,
        identifier: Option<&str>,
    ) -> miette::Result<TestInstance> {
        let mut parent = self.scratch.clone();
        if let Some(category) = &template.category {
            parent.push(sanitize(category));
        }
        parent.push(sanitize(&template.name));

        let directory = TestDirectory::allocate(&parent, &prefix(identifier), self.keep)?;

        copy_contents(&template.source, directory.root()).wrap_err(miette!(
            "failed to instantiate fixture `{}`",
            template.name
        ))?;

        tracing::debug!(
            ":: instantiated fixture {} into {}",
            template.name,
            directory.root().display()
        );

        Ok(TestInstance {
            template: template.name.clone(),
            restore: template.restore.clone(),
            directory,
        })
    }

    /// A fresh empty directory, for flows that scaffold their own project
    pub fn empty_directory(
        &self,
        name: &str,
        identifier: Option<&str>,
    ) -> miette::Result<TestDirectory> {
        let parent = self.scratch.join(EMPTY_DIRECTORY).join(sanitize(name));

        TestDirectory::allocate(&parent, &prefix(identifier), self.keep)
    }
}

/// An isolated copy of a template
#[derive(Debug)]
pub struct TestInstance {
    template: String,
    restore: Option<PathBuf>,
    directory: TestDirectory,
}

impl TestInstance {
    /// Name of the template this was copied from
    pub fn template(&self) -> &str {
        &self.template
    }

    /// The directory owning the copy
    pub fn directory(&self) -> &TestDirectory {
        &self.directory
    }

    /// Stage the template's precomputed restore files into the copy
    ///
    /// Lets operations that require a prior restore run with `--no-restore`.
    pub fn with_restore_files(self) -> miette::Result<Self> {
        let Some(restore) = &self.restore else {
            bail!("fixture `{}` has no restore files", self.template);
        };

        copy_contents(restore, self.directory.root()).wrap_err(miette!(
            "failed to stage restore files of fixture `{}`",
            self.template
        ))?;

        Ok(self)
    }

    /// Leave the copy on disk for inspection and return its path
    pub fn keep(self) -> PathBuf {
        self.directory.keep()
    }
}

impl Deref for TestInstance {
    type Target = TestDirectory;

    fn deref(&self) -> &Self::Target {
        &self.directory
    }
}

fn copy_contents(from: &Path, to: &Path) -> miette::Result<()> {
    fs_extra::dir::copy(
        from,
        to,
        &CopyOptions {
            overwrite: true,
            skip_exist: false,
            buffer_size: 64000,
            copy_inside: true,
            content_only: true,
            depth: 0,
        },
    )
    .into_diagnostic()
    .wrap_err(miette!(
        "failed to copy {} to {}",
        from.display(),
        to.display()
    ))?;

    Ok(())
}

fn prefix(identifier: Option<&str>) -> String {
    format!("{}-", sanitize(identifier.unwrap_or("instance")))
}

/// Restrict a name to characters that are safe as a single path segment
fn sanitize(segment: &str) -> String {
    segment
        .chars()
        .map(|c| match c {
            c if c.is_ascii_alphanumeric() => c,
            '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect()
}
