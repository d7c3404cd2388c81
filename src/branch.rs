use crate::error::{Error, Result};
use crate::journal::Journal;
use crate::paths::validate_ref_name;
use crate::reconcile::commit_changes;
use crate::types::CommitRef;
use crate::vcs::Vcs;
use crate::workspace::Workspace;

/// A transient, borrowed view over the branches of one workspace.
///
/// `workspace.branches()` returns this. Exactly one branch is active at a
/// time; it can be renamed but never deleted, and the repository's default
/// branch cannot be deleted either.
pub struct Branches<'a, V: Vcs> {
    ws: &'a Workspace<V>,
}

impl<'a, V: Vcs> Branches<'a, V> {
    pub(crate) fn new(ws: &'a Workspace<V>) -> Self {
        Self { ws }
    }

    /// Branch names, sorted.
    ///
    /// # Errors
    /// Returns an adapter error if the references cannot be read.
    pub fn list(&self) -> Result<Vec<String>> {
        self.ws.vcs().list_branches(self.ws.root())
    }

    /// The checked-out branch.
    ///
    /// # Errors
    /// Returns an adapter error if `HEAD` is unreadable or detached.
    pub fn active(&self) -> Result<String> {
        self.ws.vcs().active_branch(self.ws.root())
    }

    pub fn contains(&self, name: &str) -> Result<bool> {
        Ok(self.ws.vcs().branch_head(self.ws.root(), name)?.is_some())
    }

    /// Head commit of `name`.
    ///
    /// # Errors
    /// [`Error::NotFound`] if the branch does not exist.
    pub fn head(&self, name: &str) -> Result<CommitRef> {
        self.ws
            .vcs()
            .branch_head(self.ws.root(), name)?
            .ok_or_else(|| self.missing(name))
    }

    fn missing(&self, name: &str) -> Error {
        Error::not_found(format!("branch '{}' in {}", name, self.ws.repo_ref()))
    }

    /// Create `name` at the active head and switch to it.
    ///
    /// # Arguments
    /// * `name` - New branch name; must be a valid git ref name.
    /// * `message` - Message of the commit for pending changes.
    ///
    /// Uncommitted changes carry over and are committed on the new branch
    /// with `message`; with nothing to stage no commit is made. Returns the
    /// new branch's head.
    ///
    /// # Errors
    /// [`Error::InvalidRefName`] or [`Error::AlreadyExists`]. If the switch
    /// or the commit fails, the new branch is removed and the previous one
    /// is active again.
    pub fn create(&self, name: &str, message: &str) -> Result<CommitRef> {
        validate_ref_name(name)?;
        let root = self.ws.root();
        let vcs = self.ws.vcs();

        let head = self.ws.locked(|| {
            if vcs.branch_head(root, name)?.is_some() {
                return Err(Error::already_exists(format!(
                    "branch '{}' in {}",
                    name,
                    self.ws.repo_ref()
                )));
            }
            let previous = vcs.active_branch(root)?;
            vcs.create_branch(root, name)?;
            if let Err(e) = vcs.checkout(root, name) {
                if let Err(undo) = vcs.delete_branch(root, name) {
                    log::warn!("could not remove branch '{}': {}", name, undo);
                }
                return Err(e);
            }
            log::debug!("switched {} from '{}' to '{}'", self.ws.repo_ref(), previous, name);
            let committed = commit_changes(
                vcs,
                root,
                Journal::new(root),
                message,
                &self.ws.engine.options().signature,
            );
            if committed.is_err() {
                // Both branches still share a head, so pending changes survive
                // the switch back.
                let undo = vcs
                    .checkout(root, &previous)
                    .and_then(|()| vcs.delete_branch(root, name));
                if let Err(undo) = undo {
                    log::warn!("could not undo branch '{}': {}", name, undo);
                }
            }
            committed
        })?;

        log::info!("created branch '{}' in {}", name, self.ws.repo_ref());
        Ok(head)
    }

    /// Make `name` the active branch and update the working tree.
    ///
    /// `message` is recorded in the log only; a checkout never commits.
    ///
    /// # Errors
    /// [`Error::NotFound`] if the branch does not exist,
    /// [`Error::DirtyWorkingTree`] if there are uncommitted changes
    /// (untracked files included).
    pub fn checkout(&self, name: &str, message: &str) -> Result<()> {
        validate_ref_name(name)?;
        let root = self.ws.root();
        let vcs = self.ws.vcs();

        self.ws.locked(|| {
            if vcs.branch_head(root, name)?.is_none() {
                return Err(self.missing(name));
            }
            if vcs.active_branch(root)? == name {
                return Ok(());
            }
            if vcs.is_dirty(root)? {
                return Err(Error::DirtyWorkingTree(self.ws.repo_ref().to_string()));
            }
            vcs.checkout(root, name)
        })?;

        log::info!("checked out '{}' in {}: {}", name, self.ws.repo_ref(), message);
        Ok(())
    }

    /// Rename `old` to `new`. The active branch may be renamed; renaming the
    /// default branch updates the catalog record.
    ///
    /// # Errors
    /// [`Error::NotFound`] if `old` is missing, [`Error::AlreadyExists`] if
    /// `new` is taken, [`Error::InvalidRefName`] for a bad `new`.
    pub fn rename(&self, old: &str, new: &str) -> Result<()> {
        validate_ref_name(old)?;
        validate_ref_name(new)?;
        let root = self.ws.root();
        let vcs = self.ws.vcs();

        self.ws.locked(|| {
            if vcs.branch_head(root, old)?.is_none() {
                return Err(self.missing(old));
            }
            if old == new {
                return Ok(());
            }
            if vcs.branch_head(root, new)?.is_some() {
                return Err(Error::already_exists(format!(
                    "branch '{}' in {}",
                    new,
                    self.ws.repo_ref()
                )));
            }
            vcs.rename_branch(root, old, new)?;

            let mut record = self.ws.fresh_record()?;
            if record.default_branch == old {
                record.default_branch = new.to_string();
                if let Err(e) = self.ws.engine.catalog().update(record) {
                    if let Err(undo) = vcs.rename_branch(root, new, old) {
                        log::warn!("could not rename '{}' back to '{}': {}", new, old, undo);
                    }
                    return Err(e);
                }
            }
            Ok(())
        })?;

        log::info!("renamed branch '{}' to '{}' in {}", old, new, self.ws.repo_ref());
        Ok(())
    }

    /// Delete `name`.
    ///
    /// # Errors
    /// [`Error::NotFound`], [`Error::CannotDeleteActive`] for the checked-out
    /// branch, [`Error::CannotDeleteDefault`] for the default branch.
    pub fn delete(&self, name: &str) -> Result<()> {
        validate_ref_name(name)?;
        let root = self.ws.root();
        let vcs = self.ws.vcs();

        self.ws.locked(|| {
            if vcs.branch_head(root, name)?.is_none() {
                return Err(self.missing(name));
            }
            if vcs.active_branch(root)? == name {
                return Err(Error::CannotDeleteActive(name.to_string()));
            }
            if self.ws.fresh_record()?.default_branch == name {
                return Err(Error::CannotDeleteDefault(name.to_string()));
            }
            vcs.delete_branch(root, name)
        })?;

        log::info!("deleted branch '{}' in {}", name, self.ws.repo_ref());
        Ok(())
    }
}
