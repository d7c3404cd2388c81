//! A workspace engine for multi-tenant, forkable git repositories.
//!
//! `repoyard` keeps each hosted repository's working tree, commit history,
//! branch set and fork divergence consistent while many request handlers
//! edit repositories concurrently. Callers state intents ("make the tree look
//! like this", "roll back to that commit", "rename this branch") and the
//! engine turns them into ordered git operations under a per-repository
//! lock.
//!
//! # Key types
//!
//! - [`Engine`]: owns the storage root, the catalog and the lock registry;
//!   creates, forks, deletes and retrieves repositories.
//! - [`Workspace`]: one repository's working tree. Reads the tree, writes
//!   files, reconciles the tree against a desired [`TreeNode`], renames
//!   entries.
//! - [`Branches`] and [`History`]: borrowed views for branch lifecycle and
//!   for log, snapshots and rollback.
//! - [`Vcs`]: the git primitives the engine orchestrates, implemented by
//!   [`GitAdapter`] over libgit2.
//! - [`Catalog`]: repository records and fork relations, with
//!   [`InMemoryCatalog`] as a process-local implementation.
//!
//! # Quick example
//!
//! ```rust,no_run
//! use repoyard::{Engine, EngineOptions, TreeNode};
//!
//! let engine = Engine::open(EngineOptions::new("/srv/repos")).unwrap();
//! let ws = engine.create_repository("alice", "notes").unwrap();
//!
//! ws.update_file("README.txt", b"hello", "say hello").unwrap();
//! let desired = TreeNode::from_json(r#"{"README.txt":"blob","docs":{"README.txt":"blob"}}"#).unwrap();
//! ws.update_structure(&desired, "add docs").unwrap();
//! assert_eq!(ws.tree(None).unwrap(), desired);
//!
//! let first = ws.history().log().unwrap().last().unwrap().commit_hash.clone();
//! ws.history().rollback(first.as_str(), "start over").unwrap();
//! ```

pub mod branch;
pub mod catalog;
pub mod config;
mod divergence;
pub mod engine;
pub mod error;
pub mod git;
pub mod history;
pub mod journal;
pub mod locator;
pub mod lock;
pub mod paths;
pub mod reconcile;
pub mod types;
pub mod vcs;
pub mod workspace;

// Re-export primary public types at crate root.
pub use branch::Branches;
pub use catalog::{Catalog, InMemoryCatalog};
pub use config::{EngineOptions, DEFAULT_LOCK_TIMEOUT};
pub use engine::Engine;
pub use error::{Error, ErrorKind, Result};
pub use git::GitAdapter;
pub use history::History;
pub use locator::{Locator, WorkspaceRoot};
pub use lock::{CancelToken, LockRegistry, RepoGuard};
pub use types::*;
pub use vcs::Vcs;
pub use workspace::Workspace;
