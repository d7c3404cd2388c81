mod common;

use repoyard::*;

// ---------------------------------------------------------------------------
// create_repository
// ---------------------------------------------------------------------------

#[test]
fn create_makes_initial_commit_with_empty_readme() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, ws) = common::engine_with_repo(dir.path());

    assert!(ws.root().join(".git").is_dir());
    assert_eq!(ws.read_file("README.txt").unwrap(), b"");
    assert_eq!(ws.tree(None).unwrap(), common::tree(r#"{"README.txt":"blob"}"#));

    let log = ws.history().log().unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].message, "initial commit");
    assert!(log[0].parents.is_empty());

    assert_eq!(ws.branches().active().unwrap(), "main");
    assert!(!ws.is_dirty().unwrap());

    let record = engine
        .catalog()
        .get(&RepoRef::new("user1", "test_repo"))
        .unwrap()
        .unwrap();
    assert!(!record.fork);
    assert_eq!(record.default_branch, "main");
    assert_eq!(record.path, ws.root());
}

#[test]
fn create_duplicate_fails() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _ws) = common::engine_with_repo(dir.path());
    let err = engine.create_repository("user1", "test_repo").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);
}

#[test]
fn create_over_existing_directory_fails_and_keeps_it() {
    let dir = tempfile::tempdir().unwrap();
    let engine = common::create_engine(dir.path());
    let stray = engine.locator().root().join("user1").join("stray");
    std::fs::create_dir_all(&stray).unwrap();
    std::fs::write(stray.join("keep.txt"), b"x").unwrap();

    let err = engine.create_repository("user1", "stray").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    assert!(stray.join("keep.txt").exists());
    assert!(engine
        .catalog()
        .get(&RepoRef::new("user1", "stray"))
        .unwrap()
        .is_none());
}

#[test]
fn create_rejects_traversal() {
    let dir = tempfile::tempdir().unwrap();
    let engine = common::create_engine(dir.path());
    for (owner, name) in [("..", "x"), ("user1", "../escape"), ("user1", ".git")] {
        let err = engine.create_repository(owner, name).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PathEscape, "{}/{}", owner, name);
    }
    assert!(!dir.path().join("escape").exists());
}

#[test]
fn create_with_custom_options() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::open(EngineOptions {
        default_branch: "trunk".into(),
        initial_file: None,
        initial_message: "root".into(),
        ..common::options(dir.path())
    })
    .unwrap();
    let ws = engine.create_repository("u", "r").unwrap();
    assert_eq!(ws.branches().active().unwrap(), "trunk");
    assert_eq!(ws.tree(None).unwrap(), TreeNode::empty());
    assert_eq!(ws.history().log().unwrap()[0].message, "root");
}

#[test]
fn open_rejects_bad_default_branch() {
    let dir = tempfile::tempdir().unwrap();
    let err = Engine::open(EngineOptions {
        default_branch: "bad name".into(),
        ..common::options(dir.path())
    })
    .unwrap_err();
    assert!(matches!(err, Error::InvalidRefName(_)));
}

// ---------------------------------------------------------------------------
// workspace lookup
// ---------------------------------------------------------------------------

#[test]
fn workspace_of_unknown_repository() {
    let dir = tempfile::tempdir().unwrap();
    let engine = common::create_engine(dir.path());
    let err = engine.workspace("nobody", "nothing").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn workspace_with_escaping_catalog_path() {
    let dir = tempfile::tempdir().unwrap();
    let engine = common::create_engine(dir.path());
    engine
        .catalog()
        .insert(Repository {
            owner: "evil".into(),
            name: "repo".into(),
            path: dir.path().join("outside"),
            fork: false,
            star_count: 0,
            tags: Default::default(),
            default_branch: "main".into(),
        })
        .unwrap();
    let err = engine.workspace("evil", "repo").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PathEscape);
}

// ---------------------------------------------------------------------------
// fork_repository
// ---------------------------------------------------------------------------

#[test]
fn fork_clones_full_history() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, ws) = common::engine_with_repo(dir.path());
    ws.update_file("README.txt", b"hello", "m1").unwrap();
    ws.branches().create("feature", "branch").unwrap();
    ws.branches().checkout("main", "back").unwrap();

    let fork = engine
        .fork_repository(&RepoRef::new("user1", "test_repo"), "user2")
        .unwrap();
    assert_eq!(fork.repo_ref(), RepoRef::new("user2", "test_repo"));
    assert!(fork.repository().fork);
    assert_eq!(fork.repository().default_branch, "main");
    assert_eq!(common::log_hashes(&fork), common::log_hashes(&ws));
    assert_eq!(fork.read_file("README.txt").unwrap(), b"hello");
    assert_eq!(fork.branches().list().unwrap(), vec!["feature", "main"]);

    let relation = engine
        .catalog()
        .fork_source(&RepoRef::new("user2", "test_repo"))
        .unwrap()
        .unwrap();
    assert_eq!(relation.source, RepoRef::new("user1", "test_repo"));
    assert_eq!(relation.created_by, "user2");
}

#[test]
fn fork_into_same_owner_fails() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _ws) = common::engine_with_repo(dir.path());
    let err = engine
        .fork_repository(&RepoRef::new("user1", "test_repo"), "user1")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);
}

#[test]
fn fork_of_unknown_source() {
    let dir = tempfile::tempdir().unwrap();
    let engine = common::create_engine(dir.path());
    let err = engine
        .fork_repository(&RepoRef::new("user1", "missing"), "user2")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

// ---------------------------------------------------------------------------
// delete_repository
// ---------------------------------------------------------------------------

#[test]
fn delete_removes_directory_then_record() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, ws) = common::engine_with_repo(dir.path());
    let root = ws.root().to_path_buf();

    engine
        .delete_repository(&RepoRef::new("user1", "test_repo"))
        .unwrap();
    assert!(!root.exists());
    assert!(engine
        .catalog()
        .get(&RepoRef::new("user1", "test_repo"))
        .unwrap()
        .is_none());

    // The name is free again.
    engine.create_repository("user1", "test_repo").unwrap();
}

#[test]
fn deleted_repositories_release_their_lock_slots() {
    let dir = tempfile::tempdir().unwrap();
    let engine = common::create_engine(dir.path());

    for i in 0..5 {
        let name = format!("scratch{}", i);
        let ws = engine.create_repository("user1", &name).unwrap();
        ws.update_file("a.txt", b"a", "edit").unwrap();
        engine.delete_repository(&ws.repo_ref()).unwrap();
    }
    assert_eq!(engine.locks().tracked(), 0);

    let kept = engine.create_repository("user1", "kept").unwrap();
    assert_eq!(engine.locks().tracked(), 1);
    assert!(!engine.locks().is_locked(kept.root()));
}

#[test]
fn delete_source_drops_fork_relation() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _ws) = common::engine_with_repo(dir.path());
    let fork = engine
        .fork_repository(&RepoRef::new("user1", "test_repo"), "user2")
        .unwrap();
    engine
        .delete_repository(&RepoRef::new("user1", "test_repo"))
        .unwrap();

    assert!(engine.catalog().fork_source(&fork.repo_ref()).unwrap().is_none());
    assert!(fork.root().exists());
}

#[test]
fn delete_unknown_repository() {
    let dir = tempfile::tempdir().unwrap();
    let engine = common::create_engine(dir.path());
    let err = engine
        .delete_repository(&RepoRef::new("user1", "missing"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

// ---------------------------------------------------------------------------
// retrieve
// ---------------------------------------------------------------------------

#[test]
fn retrieve_plain_repository() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _ws) = common::engine_with_repo(dir.path());
    let detail = engine.retrieve(&RepoRef::new("user1", "test_repo")).unwrap();
    assert_eq!(detail.branch, "main");
    assert_eq!(detail.tree, common::tree(r#"{"README.txt":"blob"}"#));
    assert_eq!(detail.pull_request, None);
}

#[test]
fn retrieve_fork_reports_pull_request() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _ws) = common::engine_with_repo(dir.path());
    let fork = engine
        .fork_repository(&RepoRef::new("user1", "test_repo"), "user2")
        .unwrap();

    let detail = engine.retrieve(&fork.repo_ref()).unwrap();
    assert_eq!(detail.pull_request, Some(false));

    fork.update_file("README.txt", b"change", "fork change").unwrap();
    let detail = engine.retrieve(&fork.repo_ref()).unwrap();
    assert_eq!(detail.pull_request, Some(true));
}

#[test]
fn retrieve_softens_missing_branch() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _ws) = common::engine_with_repo(dir.path());
    let fork = engine
        .fork_repository(&RepoRef::new("user1", "test_repo"), "user2")
        .unwrap();

    // Point the fork's record at a branch that does not exist.
    let mut record = fork.repository().clone();
    record.default_branch = "gone".into();
    engine.catalog().update(record).unwrap();

    let detail = engine.retrieve(&fork.repo_ref()).unwrap();
    assert_eq!(detail.pull_request, None);
}

// ---------------------------------------------------------------------------
// catalog persistence
// ---------------------------------------------------------------------------

#[test]
fn catalog_survives_save_and_load() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = std::sync::Arc::new(InMemoryCatalog::new());
    let engine = Engine::with_parts(
        common::options(dir.path()),
        GitAdapter::new(),
        catalog.clone(),
    )
    .unwrap();
    engine.create_repository("user1", "a").unwrap();
    engine
        .fork_repository(&RepoRef::new("user1", "a"), "user2")
        .unwrap();

    let path = dir.path().join("catalog.json");
    catalog.save(&path).unwrap();

    let loaded = std::sync::Arc::new(InMemoryCatalog::load(&path).unwrap());
    let engine = Engine::with_parts(common::options(dir.path()), GitAdapter::new(), loaded).unwrap();
    let fork = engine.workspace("user2", "a").unwrap();
    assert!(!fork.divergence().unwrap().diverged);
}
