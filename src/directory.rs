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
    path::{Component, Path, PathBuf},
};

use miette::{miette, Context, IntoDiagnostic};
use tempfile::TempDir;
use walkdir::WalkDir;

use crate::errors::{DirectoryError, DirectoryNotFound};

/// A disposable directory owning every file created during one test
///
/// The directory is removed when this value is dropped, unless it was
/// created to be kept or [`TestDirectory::keep`] was called.
#[derive(Debug)]
pub struct TestDirectory {
    root: PathBuf,
    guard: Option<TempDir>,
}

impl TestDirectory {
    /// Allocate a uniquely named directory below `parent`
    ///
    /// The name starts with `prefix` and ends with a random suffix; the
    /// directory is created atomically so concurrent callers never share it.
    pub(crate) fn allocate(parent: &Path, prefix: &str, keep: bool) -> miette::Result<Self> {
        std::fs::create_dir_all(parent)
            .into_diagnostic()
            .wrap_err(miette!("failed to create {} directory", parent.display()))?;

        let dir = tempfile::Builder::new()
            .prefix(prefix)
            .rand_bytes(8)
            .tempdir_in(parent)
            .into_diagnostic()
            .wrap_err(miette!(
                "failed to allocate a test directory in {}",
                parent.display()
            ))?;

        // canonical roots keep comparisons with toolchain output stable
        let root = dir
            .path()
            .canonicalize()
            .into_diagnostic()
            .wrap_err("failed to canonicalize test directory")?;

        tracing::debug!(":: allocated test directory {}", root.display());

        if keep {
            let _ = dir.keep();
            Ok(Self { root, guard: None })
        } else {
            Ok(Self {
                root,
                guard: Some(dir),
            })
        }
    }

    /// Absolute root path
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Join path segments onto the root
    ///
    /// ```ignore
    /// let dll = dir.join(["bin", "Debug", "net8.0", "publish", "App.dll"]);
    /// ```
    ///
    /// # Panics
    ///
    /// If a segment is absolute or contains `..`, since the result would
    /// leave the directory.
    #[track_caller]
    pub fn join<I, S>(&self, segments: I) -> PathBuf
    where
        I: IntoIterator<Item = S>,
        S: AsRef<Path>,
    {
        join_all(&self.root, segments)
    }

    /// Navigate to an existing directory below the root
    #[track_caller]
    pub fn sub_directory<I, S>(&self, segments: I) -> Result<Subdirectory, DirectoryNotFound>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<Path>,
    {
        Subdirectory::open(self.join(segments))
    }

    /// Names of the files directly inside the root
    pub fn files(&self) -> Result<BTreeSet<String>, DirectoryError> {
        list_files(&self.root)
    }

    /// Leave the directory on disk for inspection and return its path
    pub fn keep(mut self) -> PathBuf {
        if let Some(guard) = self.guard.take() {
            let _ = guard.keep();
        }

        tracing::info!(":: keeping test directory {}", self.root.display());

        self.root.clone()
    }
}

impl Drop for TestDirectory {
    fn drop(&mut self) {
        if let Some(guard) = self.guard.take() {
            let path = guard.path().to_owned();

            if let Err(err) = guard.close() {
                tracing::warn!(":: failed to clean up {}: {err}", path.display());
            }
        }
    }
}

/// An existing directory inside a [`TestDirectory`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subdirectory {
    path: PathBuf,
}

impl Subdirectory {
    /// Open `path`, failing if it is not a directory
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, DirectoryNotFound> {
        let path = path.into();

        if !path.is_dir() {
            return Err(DirectoryNotFound(path));
        }

        Ok(Self { path })
    }

    /// Path of the directory
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Join path segments onto this directory
    ///
    /// # Panics
    ///
    /// Under the same conditions as [`TestDirectory::join`].
    #[track_caller]
    pub fn join<I, S>(&self, segments: I) -> PathBuf
    where
        I: IntoIterator<Item = S>,
        S: AsRef<Path>,
    {
        join_all(&self.path, segments)
    }

    /// Navigate further down
    #[track_caller]
    pub fn sub_directory<I, S>(&self, segments: I) -> Result<Subdirectory, DirectoryNotFound>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<Path>,
    {
        Subdirectory::open(self.join(segments))
    }

    /// Names of the files directly inside this directory
    pub fn files(&self) -> Result<BTreeSet<String>, DirectoryError> {
        list_files(&self.path)
    }
}

impl AsRef<Path> for Subdirectory {
    fn as_ref(&self) -> &Path {
        &self.path
    }
}

impl AsRef<Path> for TestDirectory {
    fn as_ref(&self) -> &Path {
        &self.root
    }
}

#[track_caller]
fn join_all<I, S>(base: &Path, segments: I) -> PathBuf
where
    I: IntoIterator<Item = S>,
    S: AsRef<Path>,
{
    segments.into_iter().fold(base.to_owned(), |path, segment| {
        let segment = segment.as_ref();

        assert!(
            segment
                .components()
                .all(|component| matches!(component, Component::Normal(_) | Component::CurDir)),
            "path segment {} escapes {}",
            segment.display(),
            base.display()
        );

        path.join(segment)
    })
}

/// Names of the files directly inside `dir`, non recursive
///
/// Symbolic links count as files unless they resolve to a directory.
pub(crate) fn list_files(dir: &Path) -> Result<BTreeSet<String>, DirectoryError> {
    if !dir.is_dir() {
        return Err(DirectoryNotFound(dir.to_owned()).into());
    }

    let mut files = BTreeSet::new();

    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|err| DirectoryError::Unreadable {
            path: dir.to_owned(),
            reason: err.to_string(),
        })?;

        let file_type = entry.file_type();

        if file_type.is_file() || (file_type.is_symlink() && !entry.path().is_dir()) {
            files.insert(entry.file_name().to_string_lossy().into_owned());
        }
    }

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn allocations_never_collide() {
        let scratch = tempfile::tempdir().unwrap();

        let a = TestDirectory::allocate(scratch.path(), "same-", false).unwrap();
        let b = TestDirectory::allocate(scratch.path(), "same-", false).unwrap();

        assert_ne!(a.root(), b.root());
        assert!(a.root().is_dir());
        assert!(b.root().is_dir());
    }

    #[test]
    fn drop_removes_directory_unless_kept() {
        let scratch = tempfile::tempdir().unwrap();

        let dropped = TestDirectory::allocate(scratch.path(), "drop-", false).unwrap();
        let dropped_root = dropped.root().to_owned();
        drop(dropped);
        assert!(!dropped_root.exists());

        let kept = TestDirectory::allocate(scratch.path(), "keep-", false)
            .unwrap()
            .keep();
        assert!(kept.is_dir());

        let configured = TestDirectory::allocate(scratch.path(), "conf-", true).unwrap();
        let configured_root = configured.root().to_owned();
        drop(configured);
        assert!(configured_root.is_dir());
    }

    #[test]
    fn navigation_joins_segments_and_checks_existence() {
        let scratch = tempfile::tempdir().unwrap();
        let dir = TestDirectory::allocate(scratch.path(), "nav-", false).unwrap();

        let nested = dir.join(["bin", "Debug", "net8.0"]);
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("App.dll"), "").unwrap();
        fs::create_dir(nested.join("publish")).unwrap();

        let sub = dir.sub_directory(["bin", "Debug", "net8.0"]).unwrap();
        assert_eq!(sub.path(), nested);
        assert_eq!(sub.files().unwrap(), BTreeSet::from(["App.dll".to_owned()]));
        assert!(sub.sub_directory(["publish"]).unwrap().files().unwrap().is_empty());

        let err = dir.sub_directory(["bin", "Release"]).unwrap_err();
        assert_eq!(err, DirectoryNotFound(dir.join(["bin", "Release"])));
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_files_are_listed() {
        use std::os::unix::fs::symlink;

        let scratch = tempfile::tempdir().unwrap();
        let dir = TestDirectory::allocate(scratch.path(), "links-", false).unwrap();

        fs::write(dir.join(["App.dll"]), "").unwrap();
        fs::create_dir(dir.join(["runtimes"])).unwrap();
        symlink(dir.join(["App.dll"]), dir.join(["Extra.dll"])).unwrap();
        symlink(dir.join(["missing.dll"]), dir.join(["Dangling.dll"])).unwrap();
        symlink(dir.join(["runtimes"]), dir.join(["linked-runtimes"])).unwrap();

        assert_eq!(
            dir.files().unwrap(),
            BTreeSet::from([
                "App.dll".to_owned(),
                "Dangling.dll".to_owned(),
                "Extra.dll".to_owned(),
            ])
        );
    }

    #[test]
    fn missing_directory_is_not_listed() {
        let scratch = tempfile::tempdir().unwrap();
        let missing = scratch.path().join("missing");

        assert_eq!(
            list_files(&missing),
            Err(DirectoryError::NotFound(DirectoryNotFound(missing.clone())))
        );
    }

    #[test]
    #[should_panic(expected = "escapes")]
    fn join_rejects_parent_segments() {
        let scratch = tempfile::tempdir().unwrap();
        let dir = TestDirectory::allocate(scratch.path(), "escape-", false).unwrap();

        dir.join(["bin", "../../outside"]);
    }

    #[test]
    #[should_panic(expected = "escapes")]
    fn join_rejects_absolute_segments() {
        let scratch = tempfile::tempdir().unwrap();
        let dir = TestDirectory::allocate(scratch.path(), "absolute-", false).unwrap();

        dir.join([std::env::temp_dir()]);
    }
}
