mod common;

use repoyard::*;

fn forked(dir: &std::path::Path) -> (Engine, Workspace, Workspace) {
    let (engine, source) = common::engine_with_repo(dir);
    let fork = engine
        .fork_repository(&source.repo_ref(), "user2")
        .unwrap();
    (engine, source, fork)
}

#[test]
fn fresh_fork_has_not_diverged() {
    let dir = tempfile::tempdir().unwrap();
    let (_engine, source, fork) = forked(dir.path());

    let d = fork.divergence().unwrap();
    assert!(!d.diverged);
    assert_eq!((d.ahead, d.behind), (0, 0));
    assert_eq!(d.source_head, d.target_head);
    assert_eq!(d.source_head, source.history().head().unwrap());
    assert!(d.diff.is_empty());
}

#[test]
fn fork_commit_diverges_with_diff() {
    let dir = tempfile::tempdir().unwrap();
    let (_engine, _source, fork) = forked(dir.path());
    fork.update_file("README.txt", b"hello", "edit readme").unwrap();
    fork.update_file("new.txt", b"new", "add file").unwrap();

    let d = fork.divergence().unwrap();
    assert!(d.diverged);
    assert_eq!((d.ahead, d.behind), (2, 0));
    assert_eq!(
        d.diff,
        vec![
            DiffEntry {
                kind: ChangeKind::Modified,
                path: "README.txt".into(),
                old_path: None,
            },
            DiffEntry {
                kind: ChangeKind::Added,
                path: "new.txt".into(),
                old_path: None,
            },
        ]
    );
}

#[test]
fn source_only_commits_do_not_diverge() {
    let dir = tempfile::tempdir().unwrap();
    let (_engine, source, fork) = forked(dir.path());
    source.update_file("README.txt", b"upstream", "upstream").unwrap();

    let d = fork.divergence().unwrap();
    assert!(!d.diverged);
    assert_eq!((d.ahead, d.behind), (0, 1));
    assert!(d.diff.is_empty());
}

#[test]
fn both_sides_committed() {
    let dir = tempfile::tempdir().unwrap();
    let (_engine, source, fork) = forked(dir.path());
    source.update_file("up.txt", b"u", "upstream").unwrap();
    fork.update_file("down.txt", b"d", "downstream").unwrap();

    let d = fork.divergence().unwrap();
    assert!(d.diverged);
    assert_eq!((d.ahead, d.behind), (1, 1));
    let paths: Vec<_> = d.diff.iter().map(|e| (e.kind, e.path.as_str())).collect();
    assert_eq!(
        paths,
        vec![(ChangeKind::Added, "down.txt"), (ChangeKind::Deleted, "up.txt")]
    );
}

#[test]
fn comparison_does_not_touch_either_repository() {
    let dir = tempfile::tempdir().unwrap();
    let (_engine, source, fork) = forked(dir.path());
    source.update_file("up.txt", b"u", "upstream").unwrap();
    fork.update_file("down.txt", b"d", "downstream").unwrap();

    fork.divergence().unwrap();
    assert!(!fork.root().join(".git/objects/info/alternates").exists());
    // The fork still cannot see the source's new commit by itself.
    let upstream = source.history().head().unwrap();
    assert!(matches!(
        fork.history().snapshot_at(upstream.as_str()),
        Err(Error::UnknownCommit(_))
    ));
}

#[test]
fn non_fork_has_no_comparison() {
    let dir = tempfile::tempdir().unwrap();
    let (_engine, source, _fork) = forked(dir.path());
    let err = source.divergence().unwrap_err();
    assert!(matches!(err, Error::ComparisonUnavailable(_)));
}

#[test]
fn each_side_uses_its_own_default_branch() {
    let dir = tempfile::tempdir().unwrap();
    let (_engine, source, fork) = forked(dir.path());
    source.branches().rename("main", "trunk").unwrap();

    // The source now defaults to trunk, which the fork never had.
    let d = fork.divergence().unwrap();
    assert!(!d.diverged);
}

#[test]
fn missing_default_branch_has_no_comparison() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _source, fork) = forked(dir.path());

    let mut record = fork.repository().clone();
    record.default_branch = "gone".into();
    engine.catalog().update(record).unwrap();

    let err = fork.divergence().unwrap_err();
    assert!(matches!(err, Error::ComparisonUnavailable(_)));
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn deleted_source_has_no_comparison() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, source, fork) = forked(dir.path());
    engine.delete_repository(&source.repo_ref()).unwrap();
    let err = fork.divergence().unwrap_err();
    assert!(matches!(err, Error::ComparisonUnavailable(_)));
}
