use pg_workspace::{
    SnapshotOutcome, SnapshotWorkspace, Workspace, WorkspaceError, open_workspace,
};
use std::fs;
use tempfile::tempdir;

#[test]
fn identical_content_is_stored_once_across_snapshots() {
    let dir = tempdir().expect("tempdir should be created");
    fs::write(dir.path().join("a.txt"), "same bytes\n").expect("write");
    fs::create_dir_all(dir.path().join("nested")).expect("mkdir");
    fs::write(dir.path().join("nested/copy.txt"), "same bytes\n").expect("write");
    let workspace = SnapshotWorkspace::new(dir.path());

    workspace.snapshot("first").expect("first snapshot");
    assert_eq!(workspace.object_count().expect("count"), 1);

    workspace.snapshot("second").expect("second snapshot");
    assert_eq!(workspace.object_count().expect("count"), 1);

    let first = workspace.load_manifest("first").expect("manifest");
    let second = workspace.load_manifest("second").expect("manifest");
    assert_eq!(first.files, second.files);
    assert_eq!(first.files["a.txt"], first.files["nested/copy.txt"]);

    fs::write(dir.path().join("a.txt"), "changed\n").expect("write");
    workspace.snapshot("third").expect("third snapshot");
    assert_eq!(workspace.object_count().expect("count"), 2);
}

#[test]
fn restore_replays_manifest_and_recreates_directories() {
    let dir = tempdir().expect("tempdir should be created");
    fs::create_dir_all(dir.path().join("src/deep")).expect("mkdir");
    fs::write(dir.path().join("src/deep/mod.rs"), "pub fn v1() {}\n").expect("write");
    fs::write(dir.path().join("README"), "readme\n").expect("write");
    let workspace = SnapshotWorkspace::new(dir.path());

    let outcome = workspace.snapshot("baseline").expect("snapshot");
    match outcome {
        SnapshotOutcome::Created(info) => {
            assert_eq!(info.label, "baseline");
            assert_eq!(info.files, Some(2));
        }
        SnapshotOutcome::Clean => panic!("snapshot store always captures files"),
    }

    fs::remove_dir_all(dir.path().join("src")).expect("remove");
    fs::write(dir.path().join("README"), "edited\n").expect("write");

    workspace.restore("baseline").expect("restore should succeed");
    assert_eq!(
        fs::read_to_string(dir.path().join("src/deep/mod.rs")).expect("restored file"),
        "pub fn v1() {}\n"
    );
    assert_eq!(
        fs::read_to_string(dir.path().join("README")).expect("restored file"),
        "readme\n"
    );
}

#[test]
fn restore_unknown_label_and_missing_object_fail() {
    let dir = tempdir().expect("tempdir should be created");
    fs::write(dir.path().join("a.txt"), "a\n").expect("write");
    let workspace = SnapshotWorkspace::new(dir.path());

    assert!(matches!(
        workspace.restore("nope"),
        Err(WorkspaceError::SnapshotNotFound(label)) if label == "nope"
    ));

    workspace.snapshot("s").expect("snapshot");
    for entry in fs::read_dir(workspace.objects_dir()).expect("objects dir") {
        fs::remove_file(entry.expect("entry").path()).expect("remove object");
    }
    fs::write(dir.path().join("a.txt"), "local edit\n").expect("write");

    assert!(matches!(
        workspace.restore("s"),
        Err(WorkspaceError::ObjectMissing(_))
    ));
    assert_eq!(
        fs::read_to_string(dir.path().join("a.txt")).expect("file"),
        "local edit\n"
    );
}

#[test]
fn diff_compares_against_latest_snapshot() {
    let dir = tempdir().expect("tempdir should be created");
    fs::write(dir.path().join("notes.txt"), "alpha\nbeta\n").expect("write");
    let workspace = SnapshotWorkspace::new(dir.path());

    assert_eq!(
        workspace.diff("notes.txt").expect("diff"),
        "--- /dev/null\n+++ notes.txt\n@@ -0,0 +1,2 @@\n+alpha\n+beta\n"
    );

    workspace.snapshot("s1").expect("snapshot");
    assert_eq!(workspace.diff("notes.txt").expect("diff"), "");

    fs::write(dir.path().join("notes.txt"), "alpha\ngamma\n").expect("write");
    assert_eq!(
        workspace.diff("notes.txt").expect("diff"),
        "--- notes.txt\n+++ notes.txt\n@@ -1,2 +1,2 @@\n alpha\n-beta\n+gamma\n"
    );

    fs::remove_file(dir.path().join("notes.txt")).expect("remove");
    assert!(workspace.diff("notes.txt").expect("diff").contains("+++ /dev/null"));
    assert!(matches!(
        workspace.diff("never.txt"),
        Err(WorkspaceError::FileNotFound(_))
    ));
}

#[test]
fn list_snapshots_reports_labels_in_creation_order() {
    let dir = tempdir().expect("tempdir should be created");
    fs::write(dir.path().join("a.txt"), "a\n").expect("write");
    let workspace = SnapshotWorkspace::new(dir.path());
    workspace.snapshot("zeta").expect("snapshot");
    std::thread::sleep(std::time::Duration::from_millis(5));
    workspace.snapshot("alpha").expect("snapshot");

    let labels: Vec<String> = workspace
        .list_snapshots()
        .expect("list")
        .into_iter()
        .map(|info| info.label)
        .collect();
    assert_eq!(labels, vec!["zeta", "alpha"]);
}

#[test]
fn open_workspace_without_git_uses_snapshot_store() {
    let dir = tempdir().expect("tempdir should be created");
    let workspace = open_workspace(dir.path());
    assert!(!workspace.is_vcs_backed());
    assert_eq!(workspace.kind(), "snapshot");
    assert_eq!(workspace.root(), dir.path());
}
