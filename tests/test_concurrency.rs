mod common;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use repoyard::*;

/// Wraps [`GitAdapter`] and records whether two mutating calls ever run on
/// the same workspace at once.
#[derive(Default)]
struct CountingAdapter {
    inner: GitAdapter,
    inside: Mutex<HashMap<PathBuf, usize>>,
    overlaps: AtomicUsize,
    mutations: AtomicUsize,
}

impl CountingAdapter {
    fn mutate<T>(&self, root: &Path, f: impl FnOnce() -> Result<T>) -> Result<T> {
        {
            let mut inside = self.inside.lock().unwrap();
            let n = inside.entry(root.to_path_buf()).or_insert(0);
            *n += 1;
            if *n > 1 {
                self.overlaps.fetch_add(1, Ordering::SeqCst);
            }
        }
        self.mutations.fetch_add(1, Ordering::SeqCst);
        // Widen the window a racing caller would need.
        std::thread::sleep(Duration::from_millis(5));
        let result = f();
        *self.inside.lock().unwrap().get_mut(root).unwrap() -= 1;
        result
    }
}

impl Vcs for CountingAdapter {
    fn init(&self, root: &Path, branch: &str) -> Result<()> {
        self.inner.init(root, branch)
    }
    fn clone_from(&self, src: &Path, dst: &Path) -> Result<()> {
        self.inner.clone_from(src, dst)
    }
    fn stage_all(&self, root: &Path) -> Result<()> {
        self.mutate(root, || self.inner.stage_all(root))
    }
    fn commit(&self, root: &Path, message: &str, signature: &Signature) -> Result<CommitRef> {
        self.mutate(root, || self.inner.commit(root, message, signature))
    }
    fn list_branches(&self, root: &Path) -> Result<Vec<String>> {
        self.inner.list_branches(root)
    }
    fn create_branch(&self, root: &Path, name: &str) -> Result<()> {
        self.mutate(root, || self.inner.create_branch(root, name))
    }
    fn delete_branch(&self, root: &Path, name: &str) -> Result<()> {
        self.mutate(root, || self.inner.delete_branch(root, name))
    }
    fn rename_branch(&self, root: &Path, old: &str, new: &str) -> Result<()> {
        self.mutate(root, || self.inner.rename_branch(root, old, new))
    }
    fn checkout(&self, root: &Path, name: &str) -> Result<()> {
        self.mutate(root, || self.inner.checkout(root, name))
    }
    fn active_branch(&self, root: &Path) -> Result<String> {
        self.inner.active_branch(root)
    }
    fn branch_head(&self, root: &Path, name: &str) -> Result<Option<CommitRef>> {
        self.inner.branch_head(root, name)
    }
    fn resolve_commit(&self, root: &Path, hash: &str) -> Result<Option<CommitRef>> {
        self.inner.resolve_commit(root, hash)
    }
    fn log(&self, root: &Path) -> Result<Vec<CommitInfo>> {
        self.inner.log(root)
    }
    fn snapshot(&self, root: &Path, commit: &CommitRef) -> Result<TreeNode> {
        self.inner.snapshot(root, commit)
    }
    fn hard_reset(&self, root: &Path, commit: &CommitRef) -> Result<()> {
        self.mutate(root, || self.inner.hard_reset(root, commit))
    }
    fn restore_head(&self, root: &Path, commit: &CommitRef) -> Result<()> {
        self.inner.restore_head(root, commit)
    }
    fn is_dirty(&self, root: &Path) -> Result<bool> {
        self.inner.is_dirty(root)
    }
    fn is_ancestor(&self, root: &Path, ancestor: &CommitRef, descendant: &CommitRef) -> Result<bool> {
        self.inner.is_ancestor(root, ancestor, descendant)
    }
    fn compare(
        &self,
        target_root: &Path,
        target_head: &CommitRef,
        source_root: &Path,
        source_head: &CommitRef,
    ) -> Result<HeadComparison> {
        self.inner
            .compare(target_root, target_head, source_root, source_head)
    }
}

fn counting_engine(dir: &Path, timeout: Duration) -> Engine<CountingAdapter> {
    Engine::with_parts(
        EngineOptions {
            lock_timeout: timeout,
            ..common::options(dir)
        },
        CountingAdapter::default(),
        Arc::new(InMemoryCatalog::new()),
    )
    .unwrap()
}

// ---------------------------------------------------------------------------
// mutual exclusion
// ---------------------------------------------------------------------------

#[test]
fn same_repository_mutations_never_overlap() {
    let dir = tempfile::tempdir().unwrap();
    let engine = counting_engine(dir.path(), Duration::from_secs(60));
    engine.create_repository("user1", "shared").unwrap();

    let handles: Vec<_> = (0..6)
        .map(|i| {
            let engine = engine.clone();
            std::thread::spawn(move || {
                let ws = engine.workspace("user1", "shared").unwrap();
                let path = format!("file{}.txt", i);
                ws.update_file(&path, path.as_bytes(), &format!("write {}", i))
                    .unwrap();
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(engine.vcs().overlaps.load(Ordering::SeqCst), 0);
    assert!(engine.vcs().mutations.load(Ordering::SeqCst) >= 12);

    let ws = engine.workspace("user1", "shared").unwrap();
    // initial commit plus one per writer
    assert_eq!(ws.history().log().unwrap().len(), 7);
    assert!(!ws.is_dirty().unwrap());
}

#[test]
fn other_repositories_are_not_blocked() {
    let dir = tempfile::tempdir().unwrap();
    let engine = counting_engine(dir.path(), Duration::from_millis(200));
    let a = engine.create_repository("user1", "a").unwrap();
    let b = engine.create_repository("user1", "b").unwrap();

    let _held = engine.locks().acquire(a.root(), &CancelToken::new()).unwrap();
    b.update_file("README.txt", b"b", "b moves on").unwrap();

    let err = a.update_file("README.txt", b"a", "a waits").unwrap_err();
    assert!(matches!(err, Error::Busy(_)));
    assert_eq!(err.kind(), ErrorKind::Busy);
    assert_eq!(a.history().log().unwrap().len(), 1);
}

#[test]
fn fork_pair_is_not_blocked() {
    let dir = tempfile::tempdir().unwrap();
    let engine = counting_engine(dir.path(), Duration::from_millis(200));
    let source = engine.create_repository("user1", "r").unwrap();
    let fork = engine.fork_repository(&source.repo_ref(), "user2").unwrap();

    let _held = engine
        .locks()
        .acquire(source.root(), &CancelToken::new())
        .unwrap();
    fork.update_file("README.txt", b"fork", "fork edit").unwrap();
    // Divergence is read-only and ignores the source's lock.
    assert!(fork.divergence().unwrap().diverged);
}

#[test]
fn reads_do_not_take_the_lock() {
    let dir = tempfile::tempdir().unwrap();
    let engine = counting_engine(dir.path(), Duration::from_millis(100));
    let ws = engine.create_repository("user1", "r").unwrap();

    let _held = engine.locks().acquire(ws.root(), &CancelToken::new()).unwrap();
    assert_eq!(ws.history().log().unwrap().len(), 1);
    assert_eq!(ws.branches().list().unwrap(), vec!["main"]);
    assert_eq!(ws.tree(None).unwrap(), common::tree(r#"{"README.txt":"blob"}"#));
}

// ---------------------------------------------------------------------------
// cancellation
// ---------------------------------------------------------------------------

#[test]
fn cancelled_request_never_mutates() {
    let dir = tempfile::tempdir().unwrap();
    let engine = counting_engine(dir.path(), Duration::from_secs(5));
    engine.create_repository("user1", "r").unwrap();
    let before = engine.vcs().mutations.load(Ordering::SeqCst);

    let token = CancelToken::new();
    token.cancel();
    let cancelled = engine.with_cancel(token);
    let ws = cancelled.workspace("user1", "r").unwrap();

    let err = ws.update_file("README.txt", b"x", "m").unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    let err = ws.branches().create("b", "m").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    let err = cancelled.create_repository("user1", "other").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);

    assert_eq!(engine.vcs().mutations.load(Ordering::SeqCst), before);
    assert_eq!(ws.read_file("README.txt").unwrap(), b"");
    assert!(!engine.locator().root().join("user1").join("other").exists());
}

#[test]
fn cancel_while_waiting_for_lock() {
    let dir = tempfile::tempdir().unwrap();
    let engine = counting_engine(dir.path(), Duration::from_secs(30));
    let ws = engine.create_repository("user1", "r").unwrap();
    let held = engine.locks().acquire(ws.root(), &CancelToken::new()).unwrap();

    let token = CancelToken::new();
    let waiter = {
        let engine = engine.with_cancel(token.clone());
        std::thread::spawn(move || {
            let ws = engine.workspace("user1", "r").unwrap();
            ws.update_file("README.txt", b"late", "late")
        })
    };
    std::thread::sleep(Duration::from_millis(100));
    token.cancel();
    let result = waiter.join().unwrap();
    assert!(matches!(result, Err(Error::Cancelled)));
    drop(held);

    assert_eq!(ws.history().log().unwrap().len(), 1);
}
