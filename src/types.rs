use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

use serde::de::{self, MapAccess, Unexpected, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// TreeNode
// ---------------------------------------------------------------------------

/// A tree description: either a file leaf or a directory of named children.
///
/// Used both as the desired state for reconciliation and as the snapshot of a
/// commit. The JSON form writes a leaf as the string `"blob"` and a directory
/// as an object, e.g. `{"README.txt": "blob", "docs": {"a.md": "blob"}}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TreeNode {
    Blob,
    Tree(BTreeMap<String, TreeNode>),
}

impl TreeNode {
    /// An empty directory node.
    pub fn empty() -> Self {
        Self::Tree(BTreeMap::new())
    }

    /// Build a tree from slash-separated file paths.
    pub fn from_paths<I, S>(paths: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut root = Self::empty();
        for path in paths {
            root.insert_blob(path.as_ref())?;
        }
        Ok(root)
    }

    /// Parse the JSON form of a tree description.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::invalid_tree(e.to_string()))
    }

    /// Render the JSON form (entries sorted by name).
    pub fn to_json(&self) -> String {
        // Serializing a string or string-keyed map cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn is_blob(&self) -> bool {
        matches!(self, Self::Blob)
    }

    pub fn is_tree(&self) -> bool {
        matches!(self, Self::Tree(_))
    }

    /// Children of a directory node, `None` for a blob.
    pub fn children(&self) -> Option<&BTreeMap<String, TreeNode>> {
        match self {
            Self::Tree(children) => Some(children),
            Self::Blob => None,
        }
    }

    /// Look up the node at a slash-separated path. The empty path is `self`.
    pub fn get(&self, path: &str) -> Option<&TreeNode> {
        let mut node = self;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            node = node.children()?.get(segment)?;
        }
        Some(node)
    }

    /// Insert a blob at `path`, creating intermediate directories.
    ///
    /// # Errors
    /// Returns [`Error::InvalidTree`] if an intermediate segment is a blob.
    pub fn insert_blob(&mut self, path: &str) -> Result<()> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let (last, dirs) = segments
            .split_last()
            .ok_or_else(|| Error::invalid_tree("empty path"))?;

        let mut node = self;
        for dir in dirs {
            let children = match node {
                Self::Tree(children) => children,
                Self::Blob => return Err(Error::invalid_tree(format!("{} is a blob", path))),
            };
            node = children
                .entry((*dir).to_string())
                .or_insert_with(TreeNode::empty);
        }
        match node {
            Self::Tree(children) => {
                children.insert((*last).to_string(), TreeNode::Blob);
                Ok(())
            }
            Self::Blob => Err(Error::invalid_tree(format!("{} is a blob", path))),
        }
    }

    /// All blob paths under this node, sorted.
    pub fn blob_paths(&self) -> Vec<String> {
        let mut out = Vec::new();
        collect_blob_paths(self, "", &mut out);
        out
    }
}

fn collect_blob_paths(node: &TreeNode, prefix: &str, out: &mut Vec<String>) {
    match node {
        TreeNode::Blob => out.push(prefix.to_string()),
        TreeNode::Tree(children) => {
            for (name, child) in children {
                let path = if prefix.is_empty() {
                    name.clone()
                } else {
                    format!("{}/{}", prefix, name)
                };
                collect_blob_paths(child, &path, out);
            }
        }
    }
}

impl Serialize for TreeNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Blob => serializer.serialize_str("blob"),
            Self::Tree(children) => children.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for TreeNode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(TreeNodeVisitor)
    }
}

struct TreeNodeVisitor;

impl<'de> Visitor<'de> for TreeNodeVisitor {
    type Value = TreeNode;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("\"blob\" or a map of entry names to tree nodes")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<TreeNode, E> {
        if v == "blob" {
            Ok(TreeNode::Blob)
        } else {
            Err(E::invalid_value(Unexpected::Str(v), &self))
        }
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<TreeNode, A::Error> {
        let mut children = BTreeMap::new();
        while let Some((name, node)) = map.next_entry::<String, TreeNode>()? {
            if children.contains_key(&name) {
                return Err(de::Error::custom(format!("duplicate entry '{}'", name)));
            }
            children.insert(name, node);
        }
        Ok(TreeNode::Tree(children))
    }
}

// ---------------------------------------------------------------------------
// Commits
// ---------------------------------------------------------------------------

/// A full commit hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommitRef(String);

impl CommitRef {
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First seven hex digits; the whole value if it is shorter or does not
    /// split on a character boundary there.
    pub fn short(&self) -> &str {
        self.0.get(..7).unwrap_or(&self.0)
    }
}

impl fmt::Display for CommitRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CommitRef {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// One entry of a commit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub commit_hash: CommitRef,
    pub message: String,
    pub author_name: String,
    pub author_email: String,
    /// Seconds since the epoch.
    pub time: i64,
    pub parents: Vec<CommitRef>,
}

/// Author/committer identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub name: String,
    pub email: String,
}

impl Default for Signature {
    fn default() -> Self {
        Self {
            name: "repoyard".into(),
            email: "repoyard@localhost".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Diff / divergence
// ---------------------------------------------------------------------------

/// Kinds of file-level change between two commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
    Renamed,
    TypeChanged,
}

/// A single file-level change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffEntry {
    pub kind: ChangeKind,
    pub path: String,
    /// Previous path for renames.
    pub old_path: Option<String>,
}

/// Raw head comparison returned by the adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadComparison {
    /// Commits on the target head not reachable from the source head.
    pub ahead: usize,
    /// Commits on the source head not reachable from the target head.
    pub behind: usize,
    /// Changes from the source head to the target head.
    pub diff: Vec<DiffEntry>,
}

/// Divergence of a fork's default branch from its source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Divergence {
    pub diverged: bool,
    pub ahead: usize,
    pub behind: usize,
    pub source_head: CommitRef,
    pub target_head: CommitRef,
    pub diff: Vec<DiffEntry>,
}

// ---------------------------------------------------------------------------
// Catalog records
// ---------------------------------------------------------------------------

/// Identifies a repository by owner and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Catalog entry for a hosted repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub owner: String,
    pub name: String,
    pub path: PathBuf,
    pub fork: bool,
    pub star_count: u64,
    pub tags: BTreeSet<String>,
    pub default_branch: String,
}

impl Repository {
    pub fn repo_ref(&self) -> RepoRef {
        RepoRef::new(self.owner.clone(), self.name.clone())
    }
}

/// A fork edge: `target` was cloned from `source` by `created_by`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForkRelation {
    pub source: RepoRef,
    pub target: RepoRef,
    pub created_by: String,
}

/// What a repository retrieval shows: the record, the active branch, the
/// tree at its head, and whether a fork has changes to offer upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryDetail {
    pub repository: Repository,
    pub branch: String,
    pub tree: TreeNode,
    /// `None` when the repository is not a fork or no comparison is possible.
    pub pull_request: Option<bool>,
}
