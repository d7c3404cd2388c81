use std::collections::BTreeMap;
use std::path::Path;

use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{
    BranchType, Delta, ErrorCode, IndexAddOption, ObjectType, Oid, Repository,
    RepositoryInitOptions, ResetType, Sort, StatusOptions,
};

use crate::error::{Error, Result};
use crate::types::{
    ChangeKind, CommitInfo, CommitRef, DiffEntry, HeadComparison, Signature, TreeNode,
};
use crate::vcs::Vcs;

/// [`Vcs`] over libgit2 working-tree repositories.
///
/// Stateless: every call opens the repository afresh, so one adapter can be
/// shared by any number of threads.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitAdapter;

impl GitAdapter {
    pub fn new() -> Self {
        Self
    }

    fn open(root: &Path) -> Result<Repository> {
        Repository::open(root).map_err(Error::git)
    }
}

fn oid(commit: &CommitRef) -> Result<Oid> {
    Oid::from_str(commit.as_str()).map_err(Error::git)
}

fn commit_ref(id: Oid) -> CommitRef {
    CommitRef::new(id.to_string())
}

/// Head commit of the active branch, `None` while the branch is unborn.
fn head_oid(repo: &Repository) -> Result<Option<Oid>> {
    match repo.head() {
        Ok(head) => Ok(head.target()),
        Err(e) if e.code() == ErrorCode::UnbornBranch || e.code() == ErrorCode::NotFound => {
            Ok(None)
        }
        Err(e) => Err(Error::git(e)),
    }
}

fn tree_node(repo: &Repository, tree: &git2::Tree<'_>) -> Result<TreeNode> {
    let mut children = BTreeMap::new();
    for entry in tree.iter() {
        let name = match entry.name() {
            Some(name) => name.to_string(),
            None => String::from_utf8_lossy(entry.name_bytes()).into_owned(),
        };
        match entry.kind() {
            Some(ObjectType::Tree) => {
                let sub = repo.find_tree(entry.id()).map_err(Error::git)?;
                children.insert(name, tree_node(repo, &sub)?);
            }
            Some(ObjectType::Blob) => {
                children.insert(name, TreeNode::Blob);
            }
            // Submodule links carry no content of their own.
            _ => {}
        }
    }
    Ok(TreeNode::Tree(children))
}

/// Remove untracked and ignored entries so the working tree equals HEAD.
fn clean_untracked(repo: &Repository, root: &Path) -> Result<()> {
    let mut opts = StatusOptions::new();
    opts.include_untracked(true)
        .include_ignored(true)
        .recurse_untracked_dirs(false);
    let statuses = repo.statuses(Some(&mut opts)).map_err(Error::git)?;

    for entry in statuses.iter() {
        let status = entry.status();
        if !(status.is_wt_new() || status.is_ignored()) {
            continue;
        }
        let Some(rel) = entry.path() else { continue };
        let full = root.join(rel.trim_end_matches('/'));
        let meta = match std::fs::symlink_metadata(&full) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(Error::io(&full, e)),
        };
        if meta.is_dir() {
            std::fs::remove_dir_all(&full).map_err(|e| Error::io(&full, e))?;
        } else {
            std::fs::remove_file(&full).map_err(|e| Error::io(&full, e))?;
        }
    }
    Ok(())
}

/// Point the active branch at `target` and make the working tree match it.
fn force_reset(repo: &Repository, root: &Path, target: Oid) -> Result<()> {
    let object = repo.find_commit(target).map_err(Error::git)?;
    repo.reset(object.as_object(), ResetType::Hard, None)
        .map_err(Error::git)?;
    clean_untracked(repo, root)
}

fn change_kind(status: Delta) -> Option<ChangeKind> {
    match status {
        Delta::Added | Delta::Copied => Some(ChangeKind::Added),
        Delta::Deleted => Some(ChangeKind::Deleted),
        Delta::Modified => Some(ChangeKind::Modified),
        Delta::Renamed => Some(ChangeKind::Renamed),
        Delta::Typechange => Some(ChangeKind::TypeChanged),
        _ => None,
    }
}

fn path_string(path: Option<&Path>) -> Option<String> {
    path.map(|p| p.to_string_lossy().replace('\\', "/"))
}

impl Vcs for GitAdapter {
    fn init(&self, root: &Path, branch: &str) -> Result<()> {
        let mut opts = RepositoryInitOptions::new();
        opts.initial_head(branch).mkpath(true);
        Repository::init_opts(root, &opts).map_err(Error::git)?;
        Ok(())
    }

    fn clone_from(&self, src: &Path, dst: &Path) -> Result<()> {
        let url = src
            .to_str()
            .ok_or_else(|| Error::invalid_path(src.display().to_string()))?;
        let repo = RepoBuilder::new().clone(url, dst).map_err(Error::git)?;

        // A clone only checks out the remote HEAD; mirror every other branch
        // locally so the fork starts with the same branch set.
        let mut remote = Vec::new();
        for item in repo.branches(Some(BranchType::Remote)).map_err(Error::git)? {
            let (branch, _) = item.map_err(Error::git)?;
            let Some(full) = branch.name().map_err(Error::git)? else {
                continue;
            };
            let Some(short) = full.strip_prefix("origin/") else {
                continue;
            };
            if let (false, Some(id)) = (short == "HEAD", branch.get().target()) {
                remote.push((short.to_string(), id));
            }
        }
        for (name, id) in remote {
            if repo.find_branch(&name, BranchType::Local).is_ok() {
                continue;
            }
            let commit = repo.find_commit(id).map_err(Error::git)?;
            repo.branch(&name, &commit, false).map_err(Error::git)?;
        }
        Ok(())
    }

    fn stage_all(&self, root: &Path) -> Result<()> {
        let repo = Self::open(root)?;
        let mut index = repo.index().map_err(Error::git)?;
        // The working tree is the source of truth; ignore rules do not apply.
        index
            .add_all(["*"].iter(), IndexAddOption::FORCE, None)
            .map_err(Error::git)?;
        index.update_all(["*"].iter(), None).map_err(Error::git)?;
        index.write().map_err(Error::git)?;
        Ok(())
    }

    fn commit(&self, root: &Path, message: &str, signature: &Signature) -> Result<CommitRef> {
        let repo = Self::open(root)?;
        let mut index = repo.index().map_err(Error::git)?;
        let tree_oid = index.write_tree().map_err(Error::git)?;
        let tree = repo.find_tree(tree_oid).map_err(Error::git)?;
        let sig = git2::Signature::now(&signature.name, &signature.email).map_err(Error::git)?;

        let parent = match head_oid(&repo)? {
            Some(id) => Some(repo.find_commit(id).map_err(Error::git)?),
            None => None,
        };
        let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();

        let id = repo
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
            .map_err(Error::git)?;
        Ok(commit_ref(id))
    }

    fn list_branches(&self, root: &Path) -> Result<Vec<String>> {
        let repo = Self::open(root)?;
        let mut names = Vec::new();
        for item in repo.branches(Some(BranchType::Local)).map_err(Error::git)? {
            let (branch, _) = item.map_err(Error::git)?;
            if let Some(name) = branch.name().map_err(Error::git)? {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn create_branch(&self, root: &Path, name: &str) -> Result<()> {
        let repo = Self::open(root)?;
        let head = head_oid(&repo)?
            .ok_or_else(|| Error::not_found("active branch has no commits"))?;
        let commit = repo.find_commit(head).map_err(Error::git)?;
        repo.branch(name, &commit, false).map_err(Error::git)?;
        Ok(())
    }

    fn delete_branch(&self, root: &Path, name: &str) -> Result<()> {
        let repo = Self::open(root)?;
        let mut branch = repo
            .find_branch(name, BranchType::Local)
            .map_err(Error::git)?;
        branch.delete().map_err(Error::git)?;
        Ok(())
    }

    fn rename_branch(&self, root: &Path, old: &str, new: &str) -> Result<()> {
        let repo = Self::open(root)?;
        let mut branch = repo
            .find_branch(old, BranchType::Local)
            .map_err(Error::git)?;
        branch.rename(new, false).map_err(Error::git)?;
        Ok(())
    }

    fn checkout(&self, root: &Path, name: &str) -> Result<()> {
        let repo = Self::open(root)?;
        let refname = format!("refs/heads/{}", name);
        let target = repo.revparse_single(&refname).map_err(Error::git)?;
        let mut builder = CheckoutBuilder::new();
        builder.safe();
        repo.checkout_tree(&target, Some(&mut builder))
            .map_err(Error::git)?;
        repo.set_head(&refname).map_err(Error::git)?;
        Ok(())
    }

    fn active_branch(&self, root: &Path) -> Result<String> {
        let repo = Self::open(root)?;
        let head = repo.find_reference("HEAD").map_err(Error::git)?;
        let target = head
            .symbolic_target()
            .ok_or_else(|| Error::git_msg("HEAD is detached"))?;
        Ok(target
            .strip_prefix("refs/heads/")
            .unwrap_or(target)
            .to_string())
    }

    fn branch_head(&self, root: &Path, name: &str) -> Result<Option<CommitRef>> {
        let repo = Self::open(root)?;
        let result = match repo.find_branch(name, BranchType::Local) {
            Ok(branch) => Ok(branch.get().target().map(commit_ref)),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(Error::git(e)),
        };
        result
    }

    fn resolve_commit(&self, root: &Path, hash: &str) -> Result<Option<CommitRef>> {
        if hash.len() < 4 || hash.len() > 40 || !hash.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Ok(None);
        }
        let repo = Self::open(root)?;
        let object = match repo.revparse_single(hash) {
            Ok(object) => object,
            Err(e) if e.code() == ErrorCode::NotFound || e.code() == ErrorCode::Ambiguous => {
                return Ok(None)
            }
            Err(e) => return Err(Error::git(e)),
        };
        let result = match object.peel_to_commit() {
            Ok(commit) => Ok(Some(commit_ref(commit.id()))),
            Err(_) => Ok(None),
        };
        result
    }

    fn log(&self, root: &Path) -> Result<Vec<CommitInfo>> {
        let repo = Self::open(root)?;
        let Some(head) = head_oid(&repo)? else {
            return Ok(Vec::new());
        };

        let mut walk = repo.revwalk().map_err(Error::git)?;
        walk.set_sorting(Sort::TOPOLOGICAL | Sort::TIME)
            .map_err(Error::git)?;
        walk.push(head).map_err(Error::git)?;

        let mut out = Vec::new();
        for id in walk {
            let id = id.map_err(Error::git)?;
            let commit = repo.find_commit(id).map_err(Error::git)?;
            let author = commit.author();
            out.push(CommitInfo {
                commit_hash: commit_ref(id),
                message: commit
                    .message()
                    .unwrap_or_default()
                    .trim_end_matches('\n')
                    .to_string(),
                author_name: author.name().unwrap_or_default().to_string(),
                author_email: author.email().unwrap_or_default().to_string(),
                time: commit.time().seconds(),
                parents: commit.parent_ids().map(commit_ref).collect(),
            });
        }
        Ok(out)
    }

    fn snapshot(&self, root: &Path, commit: &CommitRef) -> Result<TreeNode> {
        let repo = Self::open(root)?;
        let commit = repo.find_commit(oid(commit)?).map_err(Error::git)?;
        let tree = commit.tree().map_err(Error::git)?;
        tree_node(&repo, &tree)
    }

    fn hard_reset(&self, root: &Path, commit: &CommitRef) -> Result<()> {
        let repo = Self::open(root)?;
        let target = oid(commit)?;
        let head = head_oid(&repo)?
            .ok_or_else(|| Error::not_found("active branch has no commits"))?;
        if head != target && !repo.graph_descendant_of(head, target).map_err(Error::git)? {
            return Err(Error::NotAncestor(commit.to_string()));
        }

        force_reset(&repo, root, target)
    }

    fn restore_head(&self, root: &Path, commit: &CommitRef) -> Result<()> {
        let repo = Self::open(root)?;
        force_reset(&repo, root, oid(commit)?)
    }

    fn is_dirty(&self, root: &Path) -> Result<bool> {
        let repo = Self::open(root)?;
        let mut opts = StatusOptions::new();
        opts.include_untracked(true)
            .include_ignored(true)
            .recurse_untracked_dirs(false);
        let statuses = repo.statuses(Some(&mut opts)).map_err(Error::git)?;
        Ok(!statuses.is_empty())
    }

    fn is_ancestor(&self, root: &Path, ancestor: &CommitRef, descendant: &CommitRef) -> Result<bool> {
        if ancestor == descendant {
            return Ok(true);
        }
        let repo = Self::open(root)?;
        repo.graph_descendant_of(oid(descendant)?, oid(ancestor)?)
            .map_err(Error::git)
    }

    fn compare(
        &self,
        target_root: &Path,
        target_head: &CommitRef,
        source_root: &Path,
        source_head: &CommitRef,
    ) -> Result<HeadComparison> {
        let repo = Self::open(target_root)?;

        // Make the source objects visible to this handle only; nothing is
        // written to either repository.
        let objects = source_root.join(".git").join("objects");
        let objects_str = objects
            .to_str()
            .ok_or_else(|| Error::invalid_path(objects.display().to_string()))?;
        let odb = repo.odb().map_err(Error::git)?;
        odb.add_disk_alternate(objects_str).map_err(Error::git)?;

        let target = oid(target_head)?;
        let source = oid(source_head)?;
        let (ahead, behind) = repo.graph_ahead_behind(target, source).map_err(Error::git)?;

        let old_tree = repo
            .find_commit(source)
            .and_then(|c| c.tree())
            .map_err(Error::git)?;
        let new_tree = repo
            .find_commit(target)
            .and_then(|c| c.tree())
            .map_err(Error::git)?;
        let mut diff = repo
            .diff_tree_to_tree(Some(&old_tree), Some(&new_tree), None)
            .map_err(Error::git)?;
        diff.find_similar(None).map_err(Error::git)?;

        let mut entries = Vec::new();
        for delta in diff.deltas() {
            let Some(kind) = change_kind(delta.status()) else {
                continue;
            };
            let old_path = path_string(delta.old_file().path());
            let new_path = path_string(delta.new_file().path());
            let (path, old_path) = match kind {
                ChangeKind::Deleted => (old_path.unwrap_or_default(), None),
                ChangeKind::Renamed => (new_path.unwrap_or_default(), old_path),
                _ => (new_path.or(old_path).unwrap_or_default(), None),
            };
            entries.push(DiffEntry {
                kind,
                path,
                old_path,
            });
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));

        Ok(HeadComparison {
            ahead,
            behind,
            diff: entries,
        })
    }
}
