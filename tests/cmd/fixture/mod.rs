use std::{collections::BTreeSet, fs, thread};

use pretty_assertions::assert_eq;
use toolchain_harness::errors::FixtureNotFound;

use crate::{instance, store};

#[test]
fn instances_are_disjoint() {
    let template = store().get("ConsoleApp", Some("TestProjects")).unwrap();

    let first = store().instantiate(template, Some("same")).unwrap();
    let second = store().instantiate(template, Some("same")).unwrap();

    assert_ne!(first.root(), second.root());

    fs::write(first.join(["marker.txt"]), "first").unwrap();

    assert!(first.files().unwrap().contains("marker.txt"));
    assert!(!second.files().unwrap().contains("marker.txt"));
    assert!(!template.source().join("marker.txt").exists());
}

#[test]
fn concurrent_instances_are_unique() {
    let roots: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| scope.spawn(|| instance("ConsoleApp").keep()))
            .collect();

        handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect()
    });

    let unique: BTreeSet<_> = roots.iter().collect();
    assert_eq!(unique.len(), roots.len());

    for root in roots {
        assert!(root.join("ConsoleApp.csproj").is_file());
        fs::remove_dir_all(root).unwrap();
    }
}

#[test]
fn instance_copies_template_files() {
    let app = instance("ConsoleApp");

    assert_eq!(
        app.files().unwrap(),
        BTreeSet::from(["ConsoleApp.csproj".to_owned(), "Program.cs".to_owned()])
    );
    assert!(app.sub_directory(["obj"]).is_err());
}

#[test]
fn restore_files_are_staged() {
    let app = instance("ConsoleApp").with_restore_files().unwrap();

    let obj = app.sub_directory(["obj"]).unwrap();

    assert!(obj.files().unwrap().contains("project.assets.json"));
}

#[test]
fn template_without_restore_files() {
    assert!(instance("MultiLineApp").with_restore_files().is_err());
}

#[test]
fn dropped_instance_is_removed() {
    let app = instance("ConsoleApp");
    let root = app.root().to_owned();

    assert!(root.is_dir());
    drop(app);
    assert!(!root.exists());
}

#[test]
fn unknown_fixture() {
    let err = store().get("DoesNotExist", None).unwrap_err();

    assert!(err.downcast_ref::<FixtureNotFound>().is_some(), "{err:?}");
}

#[test]
fn lookup_without_category() {
    let template = store().get("MultiLineApp", None).unwrap();

    assert_eq!(template.name(), "MultiLineApp");
    assert_eq!(template.category(), Some("TestProjects"));
}
