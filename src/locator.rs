use std::path::{Component, Path, PathBuf};

use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::paths::validate_component;
use crate::types::{RepoRef, Repository};

/// A workspace directory proven to lie strictly under the storage root.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkspaceRoot(PathBuf);

impl WorkspaceRoot {
    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl AsRef<Path> for WorkspaceRoot {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

/// Maps `(owner, name)` to a workspace directory under a fixed storage root.
#[derive(Debug, Clone)]
pub struct Locator {
    root: PathBuf,
}

impl Locator {
    /// Create the storage root if needed and pin its canonical form.
    pub fn new(storage_root: impl AsRef<Path>) -> Result<Self> {
        let storage_root = storage_root.as_ref();
        std::fs::create_dir_all(storage_root).map_err(|e| Error::io(storage_root, e))?;
        let root = storage_root
            .canonicalize()
            .map_err(|e| Error::io(storage_root, e))?;
        Ok(Self { root })
    }

    /// The canonical storage root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Compute the workspace path for a repository that may not exist yet.
    ///
    /// # Errors
    /// [`Error::PathEscape`] for traversal-shaped owner or repository names.
    pub fn workspace_path(&self, owner: &str, name: &str) -> Result<WorkspaceRoot> {
        validate_component(owner)?;
        validate_component(name)?;
        self.contain(&self.root.join(owner).join(name))
    }

    /// Resolve a cataloged repository to its workspace root.
    ///
    /// # Errors
    /// [`Error::NotFound`] if the catalog has no such repository,
    /// [`Error::PathEscape`] if its recorded path is outside the storage root.
    pub fn resolve(&self, catalog: &dyn Catalog, owner: &str, name: &str) -> Result<WorkspaceRoot> {
        let repository = self.lookup(catalog, &RepoRef::new(owner, name))?;
        self.contain(&repository.path)
    }

    /// Fetch the catalog record, mapping absence to [`Error::NotFound`].
    pub fn lookup(&self, catalog: &dyn Catalog, repo: &RepoRef) -> Result<Repository> {
        catalog
            .get(repo)?
            .ok_or_else(|| Error::not_found(format!("repository '{}'", repo)))
    }

    /// Check that `path` is a strict descendant of the storage root.
    ///
    /// The check is lexical first (no `..`, relative paths are taken as
    /// relative to the root) and then, for paths that exist, repeated on the
    /// canonical path so symlinks cannot point outside.
    pub fn contain(&self, path: &Path) -> Result<WorkspaceRoot> {
        let full = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };

        if full
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::CurDir))
        {
            return Err(Error::path_escape(full.display().to_string()));
        }

        match full.strip_prefix(&self.root) {
            Ok(rest) if rest.components().next().is_some() => {}
            _ => return Err(Error::path_escape(full.display().to_string())),
        }

        if full.exists() {
            let canonical = full.canonicalize().map_err(|e| Error::io(&full, e))?;
            if !canonical.starts_with(&self.root) || canonical == self.root {
                return Err(Error::path_escape(full.display().to_string()));
            }
        }

        Ok(WorkspaceRoot(full))
    }
}
