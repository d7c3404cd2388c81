use std::path::PathBuf;

/// Coarse classification of every [`Error`], for callers that map failures
/// onto transport-level conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    Conflict,
    PathEscape,
    Busy,
    Cancelled,
    InvalidInput,
    AdapterFailure,
}

/// All errors produced by repoyard.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("no source content for {0}")]
    MissingSource(String),

    #[error("working tree has uncommitted changes: {0}")]
    DirtyWorkingTree(String),

    #[error("cannot delete the active branch '{0}'")]
    CannotDeleteActive(String),

    #[error("cannot delete the default branch '{0}'")]
    CannotDeleteDefault(String),

    #[error("unknown commit: {0}")]
    UnknownCommit(String),

    #[error("commit {0} is not an ancestor of the active head")]
    NotAncestor(String),

    #[error("comparison unavailable: {0}")]
    ComparisonUnavailable(String),

    #[error("path escapes the storage root: {0}")]
    PathEscape(String),

    #[error("repository busy: {0}")]
    Busy(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid ref name: {0}")]
    InvalidRefName(String),

    #[error("invalid tree: {0}")]
    InvalidTree(String),

    #[error("git error: {0}")]
    Git(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

// ---------------------------------------------------------------------------
// Convenience constructors
// ---------------------------------------------------------------------------

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn already_exists(what: impl Into<String>) -> Self {
        Self::AlreadyExists(what.into())
    }

    pub fn missing_source(path: impl Into<String>) -> Self {
        Self::MissingSource(path.into())
    }

    pub fn unknown_commit(hash: impl Into<String>) -> Self {
        Self::UnknownCommit(hash.into())
    }

    pub fn comparison_unavailable(msg: impl Into<String>) -> Self {
        Self::ComparisonUnavailable(msg.into())
    }

    pub fn path_escape(path: impl Into<String>) -> Self {
        Self::PathEscape(path.into())
    }

    pub fn busy(msg: impl Into<String>) -> Self {
        Self::Busy(msg.into())
    }

    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath(path.into())
    }

    pub fn invalid_ref_name(name: impl Into<String>) -> Self {
        Self::InvalidRefName(name.into())
    }

    pub fn invalid_tree(msg: impl Into<String>) -> Self {
        Self::InvalidTree(msg.into())
    }

    pub fn git(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Git(Box::new(err))
    }

    pub fn git_msg(msg: impl Into<String>) -> Self {
        Self::Git(msg.into().into())
    }

    pub fn io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        Self::Io(std::io::Error::new(
            err.kind(),
            format!("{}: {}", path.into().display(), err),
        ))
    }

    /// The taxonomy bucket this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_)
            | Self::MissingSource(_)
            | Self::UnknownCommit(_)
            | Self::ComparisonUnavailable(_) => ErrorKind::NotFound,
            Self::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Self::DirtyWorkingTree(_)
            | Self::CannotDeleteActive(_)
            | Self::CannotDeleteDefault(_)
            | Self::NotAncestor(_) => ErrorKind::Conflict,
            Self::PathEscape(_) => ErrorKind::PathEscape,
            Self::Busy(_) => ErrorKind::Busy,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::InvalidPath(_) | Self::InvalidRefName(_) | Self::InvalidTree(_) => {
                ErrorKind::InvalidInput
            }
            Self::Git(_) | Self::Io(_) => ErrorKind::AdapterFailure,
        }
    }
}
