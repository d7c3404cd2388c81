use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use fs2::FileExt;

use crate::error::{Error, Result};

/// Longest single wait before re-checking cancellation.
const WAIT_SLICE: Duration = Duration::from_millis(50);

/// Backoff bounds when polling the cross-process file lock.
const FILE_BACKOFF_MIN: Duration = Duration::from_millis(5);
const FILE_BACKOFF_MAX: Duration = Duration::from_millis(200);

/// Name of the advisory lock file inside `<workspace>/.git`.
pub const LOCK_FILE_NAME: &str = "repoyard.lock";

/// Cooperative cancellation flag shared between a request and the engine.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Default)]
struct Slot {
    held: Mutex<bool>,
    released: Condvar,
}

impl Slot {
    fn release(&self) {
        // A poisoned flag still has to be cleared or the repository stays locked.
        let mut held = match self.held.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *held = false;
        drop(held);
        self.released.notify_one();
    }
}

/// Per-repository mutual exclusion, keyed by canonical workspace root.
///
/// Repositories never contend with each other: each root gets its own slot.
/// Within one process a slot is a mutex-guarded flag with a condition
/// variable; across processes an `fs2` advisory lock on
/// `<root>/.git/repoyard.lock` is taken as well once the workspace exists.
#[derive(Debug)]
pub struct LockRegistry {
    slots: DashMap<PathBuf, Arc<Slot>>,
    timeout: Duration,
}

impl LockRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            slots: DashMap::new(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Block until the lock for `root` is held, the timeout expires
    /// ([`Error::Busy`]), or `cancel` fires ([`Error::Cancelled`]).
    pub fn acquire(&self, root: &Path, cancel: &CancelToken) -> Result<RepoGuard> {
        cancel.check()?;
        let deadline = Instant::now() + self.timeout;

        let slot = Arc::clone(
            self.slots
                .entry(root.to_path_buf())
                .or_insert_with(|| Arc::new(Slot::default()))
                .value(),
        );

        {
            let mut held = slot.held.lock().map_err(|e| Error::git_msg(e.to_string()))?;
            while *held {
                cancel.check()?;
                let now = Instant::now();
                if now >= deadline {
                    return Err(Error::busy(format!(
                        "timed out after {:?} waiting for {}",
                        self.timeout,
                        root.display()
                    )));
                }
                let wait = (deadline - now).min(WAIT_SLICE);
                let (guard, _) = slot
                    .released
                    .wait_timeout(held, wait)
                    .map_err(|e| Error::git_msg(e.to_string()))?;
                held = guard;
            }
            *held = true;
        }

        // From here on the guard owns the slot and releases it on every path.
        let mut guard = RepoGuard {
            slot,
            file: None,
            root: root.to_path_buf(),
        };
        guard.file = lock_file(root, deadline, cancel)?;
        cancel.check()?;

        log::debug!("locked {}", root.display());
        Ok(guard)
    }

    /// Run `f` while holding the lock for `root`.
    ///
    /// # Arguments
    /// * `root` - Canonical workspace root; the registry key.
    /// * `cancel` - Checked before and while waiting.
    /// * `f` - Closure to execute while the lock is held.
    ///
    /// # Errors
    /// [`Error::Busy`] on timeout, [`Error::Cancelled`] when `cancel` fires,
    /// otherwise whatever `f` returns.
    pub fn with_lock<F, T>(&self, root: &Path, cancel: &CancelToken, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        let _guard = self.acquire(root, cancel)?;
        f()
        // _guard drops here, releasing the lock
    }

    /// Drop the slot for `root` unless a guard or a waiter still refers to it.
    ///
    /// Called once a workspace is gone so the registry does not grow with
    /// every repository ever locked. Returns whether a slot was removed.
    pub fn forget(&self, root: &Path) -> bool {
        // Acquirers clone the slot under the same shard lock, so a count of
        // one means nobody holds or waits on it.
        let removed = self
            .slots
            .remove_if(root, |_, slot| Arc::strong_count(slot) == 1)
            .is_some();
        if removed {
            log::debug!("forgot lock slot for {}", root.display());
        }
        removed
    }

    /// Number of roots with a slot.
    pub fn tracked(&self) -> usize {
        self.slots.len()
    }

    /// Whether a slot for `root` is currently held in this process.
    pub fn is_locked(&self, root: &Path) -> bool {
        self.slots
            .get(root)
            .map(|slot| slot.held.lock().map(|held| *held).unwrap_or(true))
            .unwrap_or(false)
    }
}

/// Take the cross-process lock file, polling with backoff until `deadline`.
///
/// Returns `Ok(None)` when the workspace has no git directory yet (creation
/// and deletion of the directory itself are covered by the in-process slot).
fn lock_file(root: &Path, deadline: Instant, cancel: &CancelToken) -> Result<Option<File>> {
    let gitdir = root.join(".git");
    if !gitdir.is_dir() {
        return Ok(None);
    }
    let path = gitdir.join(LOCK_FILE_NAME);
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&path)
        .map_err(|e| Error::io(&path, e))?;

    let mut backoff = FILE_BACKOFF_MIN;
    loop {
        match file.try_lock_exclusive() {
            Ok(()) => return Ok(Some(file)),
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.raw_os_error() == fs2::lock_contended_error().raw_os_error() =>
            {
                cancel.check()?;
                let now = Instant::now();
                if now >= deadline {
                    return Err(Error::busy(format!(
                        "{} is held by another process",
                        path.display()
                    )));
                }
                std::thread::sleep(backoff.min(deadline - now));
                backoff = (backoff * 2).min(FILE_BACKOFF_MAX);
            }
            Err(e) => return Err(Error::io(&path, e)),
        }
    }
}

/// RAII guard for a repository lock. Dropping it releases the file lock and
/// wakes one waiter.
#[derive(Debug)]
pub struct RepoGuard {
    slot: Arc<Slot>,
    file: Option<File>,
    root: PathBuf,
}

impl RepoGuard {
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Drop for RepoGuard {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = FileExt::unlock(&file);
        }
        self.slot.release();
        log::debug!("unlocked {}", self.root.display());
    }
}
