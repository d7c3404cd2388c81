use std::path::Path;

use crate::error::Result;
use crate::types::{CommitInfo, CommitRef, HeadComparison, Signature, TreeNode};

/// The version-control primitives the engine orchestrates.
///
/// Every method addresses a workspace by its root directory (the directory
/// holding `.git`). Implementations are trusted to be correct; the engine
/// validates intents and serializes mutations before calling in.
pub trait Vcs: Send + Sync {
    /// Create an empty repository at `root` whose unborn HEAD is `branch`.
    fn init(&self, root: &Path, branch: &str) -> Result<()>;

    /// Clone the full history of `src` into `dst`, with a local branch for
    /// every branch of `src`.
    fn clone_from(&self, src: &Path, dst: &Path) -> Result<()>;

    /// Stage every addition, modification and deletion in the working tree.
    fn stage_all(&self, root: &Path) -> Result<()>;

    /// Commit the index on the active branch.
    fn commit(&self, root: &Path, message: &str, signature: &Signature) -> Result<CommitRef>;

    /// Local branch names, sorted.
    fn list_branches(&self, root: &Path) -> Result<Vec<String>>;

    /// Create `name` at the active head.
    fn create_branch(&self, root: &Path, name: &str) -> Result<()>;

    fn delete_branch(&self, root: &Path, name: &str) -> Result<()>;

    /// Rename `old` to `new`; HEAD follows if `old` was active.
    fn rename_branch(&self, root: &Path, old: &str, new: &str) -> Result<()>;

    /// Make `name` the active branch and update the working tree.
    fn checkout(&self, root: &Path, name: &str) -> Result<()>;

    fn active_branch(&self, root: &Path) -> Result<String>;

    /// Head commit of `name`, `None` if the branch does not exist.
    fn branch_head(&self, root: &Path, name: &str) -> Result<Option<CommitRef>>;

    /// Resolve a (possibly abbreviated) hash to a commit of this repository.
    fn resolve_commit(&self, root: &Path, hash: &str) -> Result<Option<CommitRef>>;

    /// Commits of the active branch, newest first.
    fn log(&self, root: &Path) -> Result<Vec<CommitInfo>>;

    /// The tree recorded by `commit`.
    fn snapshot(&self, root: &Path, commit: &CommitRef) -> Result<TreeNode>;

    /// Move the active branch back to `commit`, discarding the working tree
    /// (untracked files included). Rejects non-ancestors.
    fn hard_reset(&self, root: &Path, commit: &CommitRef) -> Result<()>;

    /// Force the active branch and working tree back to `commit` with no
    /// ancestry check. Only used to undo a failed [`hard_reset`](Vcs::hard_reset).
    fn restore_head(&self, root: &Path, commit: &CommitRef) -> Result<()>;

    /// Whether the working tree or index differs from HEAD, counting
    /// untracked files.
    fn is_dirty(&self, root: &Path) -> Result<bool>;

    /// Whether `ancestor` is reachable from `descendant` (or equal to it).
    fn is_ancestor(&self, root: &Path, ancestor: &CommitRef, descendant: &CommitRef) -> Result<bool>;

    /// Compare a head in `target_root` against a head in `source_root`
    /// without writing to either repository.
    fn compare(
        &self,
        target_root: &Path,
        target_head: &CommitRef,
        source_root: &Path,
        source_head: &CommitRef,
    ) -> Result<HeadComparison>;
}
