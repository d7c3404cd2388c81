use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use crate::catalog::{Catalog, InMemoryCatalog};
use crate::config::EngineOptions;
use crate::error::{Error, Result};
use crate::git::GitAdapter;
use crate::lock::{CancelToken, LockRegistry};
use crate::locator::{Locator, WorkspaceRoot};
use crate::paths::{normalize_file_path, validate_ref_name};
use crate::types::{ForkRelation, RepoRef, Repository, RepositoryDetail};
use crate::vcs::Vcs;
use crate::workspace::Workspace;

/// Orchestrates repository workspaces under one storage root.
///
/// Cheap to clone (`Arc` internally). Clones share the catalog, the adapter
/// and the lock registry; [`with_cancel`](Engine::with_cancel) returns a clone
/// whose operations observe a request's [`CancelToken`].
pub struct Engine<V: Vcs = GitAdapter> {
    pub(crate) inner: Arc<EngineInner<V>>,
    cancel: CancelToken,
}

pub(crate) struct EngineInner<V> {
    pub(crate) options: EngineOptions,
    pub(crate) vcs: V,
    pub(crate) catalog: Arc<dyn Catalog>,
    pub(crate) locator: Locator,
    pub(crate) locks: LockRegistry,
}

impl<V: Vcs> Clone for Engine<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            cancel: self.cancel.clone(),
        }
    }
}

impl<V: Vcs> std::fmt::Debug for Engine<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("root", &self.inner.locator.root())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl Engine<GitAdapter> {
    /// Open an engine backed by libgit2 and a process-local catalog.
    ///
    /// # Errors
    /// Same as [`Engine::with_parts`].
    pub fn open(options: EngineOptions) -> Result<Self> {
        Self::with_parts(options, GitAdapter::new(), Arc::new(InMemoryCatalog::new()))
    }
}

impl<V: Vcs> Engine<V> {
    /// Assemble an engine from its collaborators.
    ///
    /// # Errors
    /// [`Error::InvalidRefName`] for a bad default branch,
    /// [`Error::InvalidPath`] for a bad initial file name, or an I/O error if
    /// the storage root cannot be created.
    pub fn with_parts(options: EngineOptions, vcs: V, catalog: Arc<dyn Catalog>) -> Result<Self> {
        validate_ref_name(&options.default_branch)?;
        if let Some(ref file) = options.initial_file {
            normalize_file_path(file)?;
        }
        let locator = Locator::new(&options.storage_root)?;
        let locks = LockRegistry::new(options.lock_timeout);
        log::debug!("engine rooted at {}", locator.root().display());
        Ok(Self {
            inner: Arc::new(EngineInner {
                options,
                vcs,
                catalog,
                locator,
                locks,
            }),
            cancel: CancelToken::new(),
        })
    }

    /// A view of this engine whose operations stop at `cancel`.
    pub fn with_cancel(&self, cancel: CancelToken) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            cancel,
        }
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn options(&self) -> &EngineOptions {
        &self.inner.options
    }

    pub fn catalog(&self) -> &dyn Catalog {
        self.inner.catalog.as_ref()
    }

    pub fn locator(&self) -> &Locator {
        &self.inner.locator
    }

    pub fn vcs(&self) -> &V {
        &self.inner.vcs
    }

    pub fn locks(&self) -> &LockRegistry {
        &self.inner.locks
    }

    /// Run `f` holding the lock of the workspace at `root`.
    pub(crate) fn locked<T, F>(&self, root: &Path, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        self.inner.locks.with_lock(root, &self.cancel, f)
    }

    // -----------------------------------------------------------------------
    // Repository lifecycle
    // -----------------------------------------------------------------------

    /// Open the workspace of a cataloged repository.
    ///
    /// # Errors
    /// [`Error::NotFound`] if the catalog has no such repository,
    /// [`Error::PathEscape`] if its path lies outside the storage root.
    pub fn workspace(&self, owner: &str, name: &str) -> Result<Workspace<V>> {
        let repository = self
            .locator()
            .lookup(self.catalog(), &RepoRef::new(owner, name))?;
        let root = self.locator().contain(&repository.path)?;
        Ok(Workspace::new(self.clone(), repository, root))
    }

    /// Create an empty repository with an initial commit.
    ///
    /// The workspace gets the configured initial file (empty) committed on
    /// the default branch. The catalog record is written last; if that fails
    /// the workspace directory is removed again.
    ///
    /// # Errors
    /// [`Error::AlreadyExists`] if `owner` already has a repository `name`
    /// or its directory exists, [`Error::PathEscape`] for traversal-shaped
    /// names.
    pub fn create_repository(&self, owner: &str, name: &str) -> Result<Workspace<V>> {
        let root = self.locator().workspace_path(owner, name)?;
        let repo_ref = RepoRef::new(owner, name);
        if self.catalog().get(&repo_ref)?.is_some() {
            return Err(Error::already_exists(format!("repository '{}'", repo_ref)));
        }

        let repository = self.locked(root.path(), || {
            if root.path().exists() {
                return Err(Error::already_exists(root.path().display().to_string()));
            }
            if let Err(e) = self.init_workspace(root.path()) {
                discard_workspace(&root);
                return Err(e);
            }

            let repository = Repository {
                owner: owner.to_string(),
                name: name.to_string(),
                path: root.path().to_path_buf(),
                fork: false,
                star_count: 0,
                tags: BTreeSet::new(),
                default_branch: self.options().default_branch.clone(),
            };
            if let Err(e) = self.catalog().insert(repository.clone()) {
                discard_workspace(&root);
                return Err(e);
            }
            Ok(repository)
        })?;

        log::info!("created repository {}", repo_ref);
        Ok(Workspace::new(self.clone(), repository, root))
    }

    fn init_workspace(&self, root: &Path) -> Result<()> {
        let options = self.options();
        std::fs::create_dir_all(root).map_err(|e| Error::io(root, e))?;
        self.vcs().init(root, &options.default_branch)?;
        if let Some(ref file) = options.initial_file {
            let path = root.join(normalize_file_path(file)?);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
            }
            std::fs::write(&path, b"").map_err(|e| Error::io(&path, e))?;
        }
        self.vcs().stage_all(root)?;
        self.vcs()
            .commit(root, &options.initial_message, &options.signature)?;
        Ok(())
    }

    /// Fork `source` into `new_owner`'s namespace under the same name.
    ///
    /// The fork is a full-history clone with the source's default branch and
    /// a fork relation recorded in the catalog.
    ///
    /// # Errors
    /// [`Error::NotFound`] if `source` is not cataloged,
    /// [`Error::AlreadyExists`] if `new_owner` already has a repository of
    /// that name.
    pub fn fork_repository(&self, source: &RepoRef, new_owner: &str) -> Result<Workspace<V>> {
        let source_repo = self.locator().lookup(self.catalog(), source)?;
        let source_root = self.locator().contain(&source_repo.path)?;
        let root = self.locator().workspace_path(new_owner, &source.name)?;
        let target = RepoRef::new(new_owner, source.name.clone());
        if self.catalog().get(&target)?.is_some() {
            return Err(Error::already_exists(format!("repository '{}'", target)));
        }

        let repository = self.locked(root.path(), || {
            if root.path().exists() {
                return Err(Error::already_exists(root.path().display().to_string()));
            }
            if let Err(e) = self.vcs().clone_from(source_root.path(), root.path()) {
                discard_workspace(&root);
                return Err(e);
            }

            let repository = Repository {
                owner: new_owner.to_string(),
                name: source.name.clone(),
                path: root.path().to_path_buf(),
                fork: true,
                star_count: 0,
                tags: BTreeSet::new(),
                default_branch: source_repo.default_branch.clone(),
            };
            if let Err(e) = self.catalog().insert(repository.clone()) {
                discard_workspace(&root);
                return Err(e);
            }
            let relation = ForkRelation {
                source: source.clone(),
                target: target.clone(),
                created_by: new_owner.to_string(),
            };
            if let Err(e) = self.catalog().insert_fork(relation) {
                if let Err(undo) = self.catalog().remove(&target) {
                    log::warn!("could not remove catalog entry {}: {}", target, undo);
                }
                discard_workspace(&root);
                return Err(e);
            }
            Ok(repository)
        })?;

        log::info!("forked {} into {}", source, target);
        Ok(Workspace::new(self.clone(), repository, root))
    }

    /// Delete a repository: the workspace directory first, then its catalog
    /// record and fork relations.
    ///
    /// If the directory cannot be removed the catalog is left untouched.
    /// The repository's lock slot is dropped once the deletion is done.
    ///
    /// # Errors
    /// [`Error::NotFound`] if `repo` is not cataloged, [`Error::Busy`] or
    /// [`Error::Cancelled`] while waiting for the lock, [`Error::Io`] if the
    /// directory cannot be removed.
    pub fn delete_repository(&self, repo: &RepoRef) -> Result<()> {
        let record = self.locator().lookup(self.catalog(), repo)?;
        let root = self.locator().contain(&record.path)?;

        self.locked(root.path(), || {
            match std::fs::remove_dir_all(root.path()) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(Error::io(root.path(), e)),
            }
            self.catalog().remove(repo)?;
            Ok(())
        })?;
        self.inner.locks.forget(root.path());

        log::info!("deleted repository {}", repo);
        Ok(())
    }

    /// The record, active branch and working tree of a repository, plus the
    /// pull-request flag of a fork.
    ///
    /// A divergence that cannot be computed shows as `pull_request: None`
    /// instead of failing the retrieval.
    ///
    /// # Errors
    /// [`Error::NotFound`] if `repo` is not cataloged, [`Error::PathEscape`]
    /// if its path lies outside the storage root.
    pub fn retrieve(&self, repo: &RepoRef) -> Result<RepositoryDetail> {
        let ws = self.workspace(&repo.owner, &repo.name)?;
        let branch = ws.branches().active()?;
        let tree = ws.tree(None)?;

        let pull_request = if ws.repository().fork {
            match ws.divergence() {
                Ok(divergence) => Some(divergence.diverged),
                Err(Error::ComparisonUnavailable(msg)) => {
                    log::debug!("no comparison for {}: {}", repo, msg);
                    None
                }
                Err(e) => {
                    log::warn!("divergence of {} failed: {}", repo, e);
                    None
                }
            }
        } else {
            None
        };

        Ok(RepositoryDetail {
            repository: ws.repository().clone(),
            branch,
            tree,
            pull_request,
        })
    }
}

/// Best-effort removal of a half-created workspace.
fn discard_workspace(root: &WorkspaceRoot) {
    log::warn!("discarding workspace {}", root.path().display());
    if let Err(e) = std::fs::remove_dir_all(root.path()) {
        if e.kind() != std::io::ErrorKind::NotFound {
            log::warn!("could not remove {}: {}", root.path().display(), e);
        }
    }
}
