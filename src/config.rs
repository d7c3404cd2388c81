use std::path::PathBuf;
use std::time::Duration;

use crate::types::Signature;

/// Default time a mutating operation waits for the repository lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// Options for opening an [`Engine`](crate::Engine).
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Directory under which every workspace lives (`<root>/<owner>/<name>`).
    pub storage_root: PathBuf,
    /// Branch created by create-repository.
    pub default_branch: String,
    /// Upper bound on waiting for a repository lock.
    pub lock_timeout: Duration,
    /// Identity used for every commit the engine makes.
    pub signature: Signature,
    /// File committed (empty) in a new repository's initial commit.
    pub initial_file: Option<String>,
    /// Message of the initial commit.
    pub initial_message: String,
}

impl EngineOptions {
    pub fn new(storage_root: impl Into<PathBuf>) -> Self {
        Self {
            storage_root: storage_root.into(),
            ..Self::default()
        }
    }
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("repos"),
            default_branch: "main".into(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            signature: Signature::default(),
            initial_file: Some("README.txt".into()),
            initial_message: "initial commit".into(),
        }
    }
}
