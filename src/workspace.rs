use std::path::Path;

use crate::branch::Branches;
use crate::divergence;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::git::GitAdapter;
use crate::history::History;
use crate::journal::{FileSource, Journal};
use crate::locator::WorkspaceRoot;
use crate::paths::normalize_file_path;
use crate::reconcile::{self, commit_changes};
use crate::types::{CommitRef, Divergence, RepoRef, Repository, TreeNode};
use crate::vcs::Vcs;

/// One repository's working tree, history and branches.
///
/// Obtained from [`Engine::workspace`], [`Engine::create_repository`] or
/// [`Engine::fork_repository`]. Mutating methods take the repository lock;
/// reads do not.
pub struct Workspace<V: Vcs = GitAdapter> {
    pub(crate) engine: Engine<V>,
    repository: Repository,
    root: WorkspaceRoot,
}

impl<V: Vcs> Clone for Workspace<V> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            repository: self.repository.clone(),
            root: self.root.clone(),
        }
    }
}

impl<V: Vcs> std::fmt::Debug for Workspace<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workspace")
            .field("repository", &self.repository.repo_ref())
            .field("root", &self.root.path())
            .finish()
    }
}

impl<V: Vcs> Workspace<V> {
    pub(crate) fn new(engine: Engine<V>, repository: Repository, root: WorkspaceRoot) -> Self {
        Self {
            engine,
            repository,
            root,
        }
    }

    /// The catalog record this workspace was opened from.
    pub fn repository(&self) -> &Repository {
        &self.repository
    }

    pub fn repo_ref(&self) -> RepoRef {
        self.repository.repo_ref()
    }

    /// The workspace directory (holding `.git`).
    pub fn root(&self) -> &Path {
        self.root.path()
    }

    pub(crate) fn vcs(&self) -> &V {
        self.engine.vcs()
    }

    pub(crate) fn locked<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        self.engine.locked(self.root.path(), f)
    }

    /// The current catalog record; the cached one may predate a branch rename.
    pub(crate) fn fresh_record(&self) -> Result<Repository> {
        self.engine
            .locator()
            .lookup(self.engine.catalog(), &self.repository.repo_ref())
    }

    /// Branch operations for this repository.
    pub fn branches(&self) -> Branches<'_, V> {
        Branches::new(self)
    }

    /// Commit log, snapshots and rollback.
    pub fn history(&self) -> History<'_, V> {
        History::new(self)
    }

    /// Compare this fork's default branch with its source's.
    ///
    /// # Errors
    /// [`Error::ComparisonUnavailable`] if this repository is not a fork or
    /// either default branch has no head.
    pub fn divergence(&self) -> Result<Divergence> {
        divergence::compute(&self.engine, &self.repository)
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// The working tree, or the snapshot of `commit` when given.
    ///
    /// # Errors
    /// [`Error::UnknownCommit`] if `commit` does not resolve, or an I/O
    /// error while walking the working tree.
    pub fn tree(&self, commit: Option<&str>) -> Result<TreeNode> {
        match commit {
            Some(hash) => self.history().snapshot_at(hash),
            None => reconcile::read_worktree(self.root.path()),
        }
    }

    /// Read a file of the working tree.
    ///
    /// # Errors
    /// [`Error::NotFound`] if there is no such file, [`Error::PathEscape`]
    /// or [`Error::InvalidPath`] for a path that cannot name one.
    pub fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let rel = normalize_file_path(path)?;
        let full = self.root.path().join(&rel);
        match std::fs::read(&full) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::not_found(format!("{} in {}", rel, self.repo_ref())))
            }
            Err(e) => Err(Error::io(&full, e)),
        }
    }

    /// Whether the working tree differs from the active head. Untracked and
    /// ignored files count.
    ///
    /// # Errors
    /// Returns an adapter error if the status cannot be computed.
    pub fn is_dirty(&self) -> Result<bool> {
        self.vcs().is_dirty(self.root.path())
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Write `data` to `path` without committing. Missing parent directories
    /// are created.
    ///
    /// # Errors
    /// [`Error::InvalidPath`] if `path` names a directory or passes through a
    /// file, [`Error::PathEscape`] for traversal.
    pub fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
        let rel = normalize_file_path(path)?;
        self.locked(|| {
            let mut journal = Journal::new(self.root.path());
            match write_into(&mut journal, &rel, data) {
                Ok(()) => {
                    journal.commit();
                    log::debug!("wrote {} in {}", rel, self.repo_ref());
                    Ok(())
                }
                Err(e) => {
                    journal.rollback();
                    Err(e)
                }
            }
        })
    }

    /// Write `data` to `path`, stage and commit.
    ///
    /// Writing identical content makes no commit and returns the current head.
    /// Ignore rules do not apply: the file is committed even if a
    /// `.gitignore` matches it.
    ///
    /// # Arguments
    /// * `path` - Path inside the workspace; parents are created.
    /// * `data` - New file content.
    /// * `message` - Commit message.
    ///
    /// # Errors
    /// * [`Error::PathEscape`] for traversal or a `.git` segment.
    /// * [`Error::InvalidPath`] if `path` names a directory or passes
    ///   through a file.
    /// * An adapter error if staging or committing fails; the file change is
    ///   undone first.
    pub fn update_file(&self, path: &str, data: &[u8], message: &str) -> Result<CommitRef> {
        let rel = normalize_file_path(path)?;
        let commit = self.locked(|| {
            let mut journal = Journal::new(self.root.path());
            if let Err(e) = write_into(&mut journal, &rel, data) {
                journal.rollback();
                return Err(e);
            }
            commit_changes(
                self.vcs(),
                self.root.path(),
                journal,
                message,
                &self.engine.options().signature,
            )
        })?;
        log::info!("updated {} in {} at {}", rel, self.repo_ref(), commit.short());
        Ok(commit)
    }

    /// Make the working tree match `desired`, stage and commit.
    ///
    /// Every desired blob must already have content somewhere in the working
    /// tree: at the same path, or under the same name elsewhere (moved or
    /// copied from there).
    ///
    /// # Errors
    /// [`Error::InvalidTree`] or [`Error::MissingSource`] before anything is
    /// changed; an adapter error after the changes have been undone.
    pub fn update_structure(&self, desired: &TreeNode, message: &str) -> Result<CommitRef> {
        let commit = self.locked(|| {
            reconcile::reconcile(
                self.vcs(),
                self.root.path(),
                desired,
                message,
                &self.engine.options().signature,
            )
        })?;
        log::info!("restructured {} at {}", self.repo_ref(), commit.short());
        Ok(commit)
    }

    /// Move the file or directory `old` to `new`, stage and commit.
    /// Directories left empty by the move are removed.
    ///
    /// # Errors
    /// [`Error::NotFound`] if `old` does not exist, [`Error::AlreadyExists`]
    /// if `new` does, [`Error::InvalidPath`] when moving a directory into
    /// itself.
    pub fn rename_entry(&self, old: &str, new: &str, message: &str) -> Result<CommitRef> {
        let from = normalize_file_path(old)?;
        let to = normalize_file_path(new)?;
        if to.starts_with(&format!("{}/", from)) {
            return Err(Error::invalid_path(format!("cannot move {} into itself", from)));
        }

        let commit = self.locked(|| {
            let root = self.root.path();
            if std::fs::symlink_metadata(root.join(&from)).is_err() {
                return Err(Error::not_found(format!("{} in {}", from, self.repo_ref())));
            }
            if std::fs::symlink_metadata(root.join(&to)).is_ok() {
                return Err(Error::already_exists(format!("{} in {}", to, self.repo_ref())));
            }

            let mut journal = Journal::new(root);
            let moved = journal
                .make_parents(&to)
                .and_then(|()| journal.rename(&from, &to))
                .and_then(|()| journal.remove_empty_parents(&from));
            if let Err(e) = moved {
                journal.rollback();
                return Err(e);
            }
            commit_changes(
                self.vcs(),
                root,
                journal,
                message,
                &self.engine.options().signature,
            )
        })?;
        log::info!("renamed {} -> {} in {}", from, to, self.repo_ref());
        Ok(commit)
    }
}

fn write_into(journal: &mut Journal, rel: &str, data: &[u8]) -> Result<()> {
    journal.make_parents(rel)?;
    journal.write(
        rel,
        &FileSource::Data {
            data: data.to_vec(),
            permissions: None,
        },
    )
}
