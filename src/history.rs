use crate::error::{Error, Result};
use crate::reconcile::active_head;
use crate::types::{CommitInfo, CommitRef, TreeNode};
use crate::vcs::Vcs;
use crate::workspace::Workspace;

/// A transient, borrowed view over the history of a workspace's active
/// branch.
pub struct History<'a, V: Vcs> {
    ws: &'a Workspace<V>,
}

impl<'a, V: Vcs> History<'a, V> {
    pub(crate) fn new(ws: &'a Workspace<V>) -> Self {
        Self { ws }
    }

    /// Commits of the active branch, newest first.
    ///
    /// # Errors
    /// Returns an adapter error if the repository cannot be read.
    pub fn log(&self) -> Result<Vec<CommitInfo>> {
        self.ws.vcs().log(self.ws.root())
    }

    /// Head of the active branch.
    ///
    /// # Errors
    /// [`Error::NotFound`] if the branch has no commits.
    pub fn head(&self) -> Result<CommitRef> {
        active_head(self.ws.vcs(), self.ws.root())?
            .ok_or_else(|| Error::not_found(format!("{} has no commits", self.ws.repo_ref())))
    }

    /// Resolve a full or abbreviated (at least 4 hex digits) commit hash.
    ///
    /// # Errors
    /// [`Error::UnknownCommit`] if `hash` names no commit of this repository.
    pub fn resolve(&self, hash: &str) -> Result<CommitRef> {
        self.ws
            .vcs()
            .resolve_commit(self.ws.root(), hash)?
            .ok_or_else(|| Error::unknown_commit(hash))
    }

    /// The tree recorded by commit `hash`.
    ///
    /// # Arguments
    /// * `hash` - Full or abbreviated commit hash.
    ///
    /// # Errors
    /// [`Error::UnknownCommit`] if `hash` names no commit of this repository.
    pub fn snapshot_at(&self, hash: &str) -> Result<TreeNode> {
        let commit = self.resolve(hash)?;
        self.ws.vcs().snapshot(self.ws.root(), &commit)
    }

    /// Move the active branch back to `hash`, discarding every later commit
    /// and every uncommitted change.
    ///
    /// This is destructive: descendants of `hash` on the branch are no longer
    /// reachable from it, and the working tree is forced to the target
    /// snapshot (untracked files are deleted). No revert commit is made;
    /// `message` is only logged. Returns the new head.
    ///
    /// # Arguments
    /// * `hash` - Full or abbreviated hash of the target commit.
    /// * `message` - Reason recorded in the log.
    ///
    /// # Errors
    /// * [`Error::UnknownCommit`] if `hash` does not resolve.
    /// * [`Error::NotAncestor`] if it is neither the head nor one of its
    ///   ancestors. Both are checked before anything changes.
    /// * An adapter error if the reset fails; the previous head is restored.
    pub fn rollback(&self, hash: &str, message: &str) -> Result<CommitRef> {
        let root = self.ws.root();
        let vcs = self.ws.vcs();

        let target = self.ws.locked(|| {
            let target = self.resolve(hash)?;
            let head = self.head()?;
            if !vcs.is_ancestor(root, &target, &head)? {
                return Err(Error::NotAncestor(target.to_string()));
            }

            if let Err(e) = vcs.hard_reset(root, &target) {
                log::warn!(
                    "rollback of {} to {} failed, restoring {}",
                    self.ws.repo_ref(),
                    target.short(),
                    head.short()
                );
                if let Err(undo) = vcs.restore_head(root, &head) {
                    log::warn!("could not restore {}: {}", head.short(), undo);
                }
                return Err(e);
            }
            Ok(target)
        })?;

        log::info!(
            "rolled back {} to {}: {}",
            self.ws.repo_ref(),
            target.short(),
            message
        );
        Ok(target)
    }
}
