//! Tree reconciliation: make a working tree match a desired [`TreeNode`].
//!
//! Reconciliation runs in three phases. Validation rejects malformed
//! descriptions before anything is touched. Planning walks the current and
//! desired trees side by side and reads every source blob into memory.
//! Application replays the plan through a [`Journal`] so a failure part-way
//! can be unwound.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::error::{Error, Result};
use crate::journal::{FileSource, Journal};
use crate::paths::{join, validate_entry_name};
use crate::types::{CommitRef, Signature, TreeNode};
use crate::vcs::Vcs;

// ---------------------------------------------------------------------------
// Reading the working tree
// ---------------------------------------------------------------------------

/// Describe the working tree at `root` (the `.git` directory excluded).
///
/// Symlinks are leaves; empty directories appear as empty trees.
pub fn read_worktree(root: &Path) -> Result<TreeNode> {
    walk_disk(root, root)
}

fn walk_disk(root: &Path, dir: &Path) -> Result<TreeNode> {
    let mut children = BTreeMap::new();
    let read_dir = std::fs::read_dir(dir).map_err(|e| Error::io(dir, e))?;

    for entry in read_dir {
        let entry = entry.map_err(|e| Error::io(dir, e))?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        if dir == root && name == ".git" {
            continue;
        }
        let meta = std::fs::symlink_metadata(&path).map_err(|e| Error::io(&path, e))?;
        if meta.is_dir() {
            children.insert(name, walk_disk(root, &path)?);
        } else {
            children.insert(name, TreeNode::Blob);
        }
    }
    Ok(TreeNode::Tree(children))
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Check a desired tree before any mutation.
///
/// # Errors
/// [`Error::InvalidTree`] if the root is a blob, an entry name is invalid
/// or `.git`, or a sub-tree is empty.
pub fn validate(desired: &TreeNode) -> Result<()> {
    let children = desired
        .children()
        .ok_or_else(|| Error::invalid_tree("the root must be a tree"))?;
    validate_children(children, "")
}

fn validate_children(children: &BTreeMap<String, TreeNode>, prefix: &str) -> Result<()> {
    for (name, node) in children {
        validate_entry_name(name)?;
        if name == ".git" {
            return Err(Error::invalid_tree(format!("{} is reserved", join(prefix, name))));
        }
        if let TreeNode::Tree(sub) = node {
            let path = join(prefix, name);
            if sub.is_empty() {
                return Err(Error::invalid_tree(format!("{} is an empty directory", path)));
            }
            validate_children(sub, &path)?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

/// One filesystem step of a reconciliation.
#[derive(Debug, Clone)]
pub enum Step {
    /// Delete a file or a whole directory.
    Remove(String),
    /// Create a directory whose parent exists.
    MakeDir(String),
    /// Create a file from content read while planning.
    Write {
        path: String,
        source: String,
        content: FileSource,
    },
}

/// Ordered steps: every removal precedes every creation.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub steps: Vec<Step>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }
}

struct Planner<'a> {
    root: &'a Path,
    /// Current blob paths grouped by entry name.
    by_name: BTreeMap<String, Vec<String>>,
    /// Current blob paths that are not blobs in the desired tree.
    vanishing: BTreeSet<String>,
    removals: Vec<Step>,
    creations: Vec<Step>,
}

/// Compute the steps that turn `current` into `desired`.
///
/// Sources of new blobs are read from disk here, before anything changes.
///
/// # Errors
/// [`Error::MissingSource`] if a desired blob has no content anywhere in the
/// current tree.
pub fn plan(root: &Path, current: &TreeNode, desired: &TreeNode) -> Result<Plan> {
    let empty = BTreeMap::new();
    let current_children = current.children().unwrap_or(&empty);
    let desired_children = desired
        .children()
        .ok_or_else(|| Error::invalid_tree("the root must be a tree"))?;

    let mut by_name: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut vanishing = BTreeSet::new();
    for path in current.blob_paths() {
        let name = path.rsplit('/').next().unwrap_or(&path).to_string();
        if !desired.get(&path).map_or(false, TreeNode::is_blob) {
            vanishing.insert(path.clone());
        }
        by_name.entry(name).or_default().push(path);
    }

    let mut planner = Planner {
        root,
        by_name,
        vanishing,
        removals: Vec::new(),
        creations: Vec::new(),
    };
    planner.diff(current_children, desired_children, "")?;

    let mut steps = planner.removals;
    steps.extend(planner.creations);
    Ok(Plan { steps })
}

impl Planner<'_> {
    fn diff(
        &mut self,
        current: &BTreeMap<String, TreeNode>,
        desired: &BTreeMap<String, TreeNode>,
        prefix: &str,
    ) -> Result<()> {
        for name in current.keys() {
            if !desired.contains_key(name) {
                self.removals.push(Step::Remove(join(prefix, name)));
            }
        }

        for (name, want) in desired {
            let path = join(prefix, name);
            match (current.get(name), want) {
                (None, _) => self.create(&path, want)?,
                (Some(TreeNode::Blob), TreeNode::Blob) => {}
                (Some(TreeNode::Tree(have)), TreeNode::Tree(want)) => {
                    self.diff(have, want, &path)?;
                }
                (Some(_), _) => {
                    self.removals.push(Step::Remove(path.clone()));
                    self.create(&path, want)?;
                }
            }
        }
        Ok(())
    }

    fn create(&mut self, path: &str, node: &TreeNode) -> Result<()> {
        match node {
            TreeNode::Blob => {
                let source = self.source_for(path)?;
                let content = FileSource::read(&self.root.join(&source))?;
                self.creations.push(Step::Write {
                    path: path.to_string(),
                    source,
                    content,
                });
            }
            TreeNode::Tree(children) => {
                self.creations.push(Step::MakeDir(path.to_string()));
                for (name, child) in children {
                    self.create(&join(path, name), child)?;
                }
            }
        }
        Ok(())
    }

    /// Pick the current blob a new blob at `path` is copied from: a blob
    /// with the same name that is going away wins, then the first by path.
    fn source_for(&self, path: &str) -> Result<String> {
        let name = path.rsplit('/').next().unwrap_or(path);
        let candidates = self
            .by_name
            .get(name)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| Error::missing_source(path))?;
        let chosen = candidates
            .iter()
            .find(|c| self.vanishing.contains(*c))
            .unwrap_or(&candidates[0]);
        Ok(chosen.clone())
    }
}

// ---------------------------------------------------------------------------
// Application
// ---------------------------------------------------------------------------

/// Replay `plan` through `journal`. On error the journal still holds every
/// step that succeeded.
pub fn apply(journal: &mut Journal, plan: &Plan) -> Result<()> {
    for step in &plan.steps {
        match step {
            Step::Remove(path) => journal.remove(path)?,
            Step::MakeDir(path) => journal.make_dir(path)?,
            Step::Write { path, content, .. } => journal.write(path, content)?,
        }
    }
    Ok(())
}

/// Head of the active branch, `None` while it has no commits.
pub(crate) fn active_head<V: Vcs + ?Sized>(vcs: &V, root: &Path) -> Result<Option<CommitRef>> {
    let branch = vcs.active_branch(root)?;
    vcs.branch_head(root, &branch)
}

/// Stage the journaled changes and commit them.
///
/// If staging leaves nothing to commit, no commit is made and the current
/// head is returned. On failure the journal is unwound and the index is
/// re-synchronized best-effort before the error is returned.
pub(crate) fn commit_changes<V: Vcs + ?Sized>(
    vcs: &V,
    root: &Path,
    journal: Journal,
    message: &str,
    signature: &Signature,
) -> Result<CommitRef> {
    match stage_and_commit(vcs, root, message, signature) {
        Ok(commit) => {
            journal.commit();
            Ok(commit)
        }
        Err(e) => {
            journal.rollback();
            if let Err(restage) = vcs.stage_all(root) {
                log::warn!("could not re-stage {}: {}", root.display(), restage);
            }
            Err(e)
        }
    }
}

fn stage_and_commit<V: Vcs + ?Sized>(
    vcs: &V,
    root: &Path,
    message: &str,
    signature: &Signature,
) -> Result<CommitRef> {
    vcs.stage_all(root)?;
    let head = active_head(vcs, root)?;
    if let Some(head) = head {
        if !vcs.is_dirty(root)? {
            log::debug!("nothing to commit in {}", root.display());
            return Ok(head);
        }
    }
    vcs.commit(root, message, signature)
}

/// Make the working tree at `root` match `desired`, then stage and commit.
///
/// # Errors
/// [`Error::InvalidTree`] and [`Error::MissingSource`] before any change;
/// adapter and I/O failures after best-effort compensation.
pub fn reconcile<V: Vcs + ?Sized>(
    vcs: &V,
    root: &Path,
    desired: &TreeNode,
    message: &str,
    signature: &Signature,
) -> Result<CommitRef> {
    validate(desired)?;
    let current = read_worktree(root)?;
    let plan = plan(root, &current, desired)?;
    log::debug!("reconcile {}: {} step(s)", root.display(), plan.len());
    for step in &plan.steps {
        match step {
            Step::Remove(path) => log::debug!("  remove {}", path),
            Step::MakeDir(path) => log::debug!("  mkdir {}", path),
            Step::Write { path, source, .. } => log::debug!("  copy {} -> {}", source, path),
        }
    }

    let mut journal = Journal::new(root);
    if let Err(e) = apply(&mut journal, &plan) {
        journal.rollback();
        return Err(e);
    }
    commit_changes(vcs, root, journal, message, signature)
}
