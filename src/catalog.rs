use std::collections::BTreeMap;
use std::path::Path;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{ForkRelation, RepoRef, Repository};

/// Repository metadata and fork relations, owned by a collaborator.
///
/// The engine only needs point lookups and single-record writes; listing,
/// search, stars and tags are the catalog's own business.
pub trait Catalog: Send + Sync {
    /// Look up a repository by owner and name.
    fn get(&self, repo: &RepoRef) -> Result<Option<Repository>>;

    /// Insert a new repository.
    ///
    /// # Errors
    /// [`Error::AlreadyExists`] if the owner already has a repository with
    /// that name.
    fn insert(&self, repository: Repository) -> Result<()>;

    /// Replace an existing record.
    fn update(&self, repository: Repository) -> Result<()>;

    /// Remove a repository together with every fork relation touching it.
    fn remove(&self, repo: &RepoRef) -> Result<Option<Repository>>;

    /// Record a fork relation.
    fn insert_fork(&self, relation: ForkRelation) -> Result<()>;

    /// The relation whose target is `repo`, if `repo` is a fork.
    fn fork_source(&self, repo: &RepoRef) -> Result<Option<ForkRelation>>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CatalogState {
    repositories: BTreeMap<String, Repository>,
    forks: Vec<ForkRelation>,
}

fn key(repo: &RepoRef) -> String {
    format!("{}/{}", repo.owner, repo.name)
}

/// A process-local [`Catalog`], optionally persisted as JSON.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    state: RwLock<CatalogState>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a catalog previously written by [`save`](Self::save).
    /// A missing file yields an empty catalog.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let data = std::fs::read(path).map_err(|e| Error::io(path, e))?;
        let state: CatalogState = serde_json::from_slice(&data).map_err(|e| {
            Error::io(path, std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;
        Ok(Self {
            state: RwLock::new(state),
        })
    }

    /// Write the catalog as JSON, replacing `path` atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        let state = self.state.read().map_err(|e| Error::git_msg(e.to_string()))?;
        let data = serde_json::to_vec_pretty(&*state).map_err(|e| {
            Error::io(path, std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, data).map_err(|e| Error::io(&tmp, e))?;
        std::fs::rename(&tmp, path).map_err(|e| Error::io(path, e))?;
        Ok(())
    }

    /// Every repository owned by `owner`, sorted by name.
    pub fn list(&self, owner: &str) -> Result<Vec<Repository>> {
        let state = self.state.read().map_err(|e| Error::git_msg(e.to_string()))?;
        Ok(state
            .repositories
            .values()
            .filter(|r| r.owner == owner)
            .cloned()
            .collect())
    }
}

impl Catalog for InMemoryCatalog {
    fn get(&self, repo: &RepoRef) -> Result<Option<Repository>> {
        let state = self.state.read().map_err(|e| Error::git_msg(e.to_string()))?;
        Ok(state.repositories.get(&key(repo)).cloned())
    }

    fn insert(&self, repository: Repository) -> Result<()> {
        let mut state = self.state.write().map_err(|e| Error::git_msg(e.to_string()))?;
        let k = key(&repository.repo_ref());
        if state.repositories.contains_key(&k) {
            return Err(Error::already_exists(format!("repository '{}'", k)));
        }
        if state.repositories.values().any(|r| r.path == repository.path) {
            return Err(Error::already_exists(format!(
                "workspace {}",
                repository.path.display()
            )));
        }
        state.repositories.insert(k, repository);
        Ok(())
    }

    fn update(&self, repository: Repository) -> Result<()> {
        let mut state = self.state.write().map_err(|e| Error::git_msg(e.to_string()))?;
        let k = key(&repository.repo_ref());
        match state.repositories.get_mut(&k) {
            Some(slot) => {
                *slot = repository;
                Ok(())
            }
            None => Err(Error::not_found(format!("repository '{}'", k))),
        }
    }

    fn remove(&self, repo: &RepoRef) -> Result<Option<Repository>> {
        let mut state = self.state.write().map_err(|e| Error::git_msg(e.to_string()))?;
        let removed = state.repositories.remove(&key(repo));
        state
            .forks
            .retain(|f| &f.source != repo && &f.target != repo);
        Ok(removed)
    }

    fn insert_fork(&self, relation: ForkRelation) -> Result<()> {
        let mut state = self.state.write().map_err(|e| Error::git_msg(e.to_string()))?;
        if state.forks.iter().any(|f| f.target == relation.target) {
            return Err(Error::already_exists(format!(
                "fork relation for '{}'",
                relation.target
            )));
        }
        state.forks.push(relation);
        Ok(())
    }

    fn fork_source(&self, repo: &RepoRef) -> Result<Option<ForkRelation>> {
        let state = self.state.read().map_err(|e| Error::git_msg(e.to_string()))?;
        Ok(state.forks.iter().find(|f| &f.target == repo).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::path::PathBuf;

    fn record(owner: &str, name: &str) -> Repository {
        Repository {
            owner: owner.into(),
            name: name.into(),
            path: PathBuf::from(format!("/srv/{}/{}", owner, name)),
            fork: false,
            star_count: 0,
            tags: BTreeSet::new(),
            default_branch: "main".into(),
        }
    }

    #[test]
    fn insert_get_remove() {
        let catalog = InMemoryCatalog::new();
        catalog.insert(record("u", "r")).unwrap();
        assert!(catalog.get(&RepoRef::new("u", "r")).unwrap().is_some());
        assert!(catalog.insert(record("u", "r")).is_err());
        assert!(catalog.remove(&RepoRef::new("u", "r")).unwrap().is_some());
        assert!(catalog.get(&RepoRef::new("u", "r")).unwrap().is_none());
    }

    #[test]
    fn remove_drops_fork_edges() {
        let catalog = InMemoryCatalog::new();
        catalog.insert(record("u1", "r")).unwrap();
        catalog.insert(record("u2", "r")).unwrap();
        catalog
            .insert_fork(ForkRelation {
                source: RepoRef::new("u1", "r"),
                target: RepoRef::new("u2", "r"),
                created_by: "u2".into(),
            })
            .unwrap();
        assert!(catalog.fork_source(&RepoRef::new("u2", "r")).unwrap().is_some());
        catalog.remove(&RepoRef::new("u1", "r")).unwrap();
        assert!(catalog.fork_source(&RepoRef::new("u2", "r")).unwrap().is_none());
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        let catalog = InMemoryCatalog::new();
        catalog.insert(record("u", "r")).unwrap();
        catalog.save(&path).unwrap();

        let loaded = InMemoryCatalog::load(&path).unwrap();
        assert_eq!(loaded.list("u").unwrap().len(), 1);
        assert!(InMemoryCatalog::load(&dir.path().join("none.json")).unwrap().list("u").unwrap().is_empty());
    }
}
