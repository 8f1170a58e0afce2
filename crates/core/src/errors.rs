//! Error types for the gitpub core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.
//!
//! The taxonomy matters: map integrity violations ([`MapError`]) are fatal
//! and never retried, while per-document fetch failures are logged and
//! skipped by the endpoint rather than surfaced here.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Map(#[from] MapError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Document(#[from] DocumentError),
}

// ---------------------------------------------------------------------------
// Git errors
// ---------------------------------------------------------------------------

/// Errors from git CLI operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// The `git` binary was not found on `$PATH`.
    #[error("git binary not found: {0}")]
    BinaryNotFound(String),

    /// A `git` command exited with a non-zero status.
    #[error("git command failed ({command}, exit {exit_code}): {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    /// The repository root does not exist or has no `.git` directory.
    #[error("git repository not found at '{0}'")]
    RepositoryNotFound(String),

    /// `git` produced output we could not interpret.
    #[error("failed to parse git output: {0}")]
    ParseError(String),

    /// Generic I/O wrapper.
    #[error("git I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Document map errors
// ---------------------------------------------------------------------------

/// Errors from the document map and its diff algorithm.
///
/// The first four variants are integrity violations: the local map and the
/// remote state have diverged in a way that requires manual reconciliation.
#[derive(Debug, Error)]
pub enum MapError {
    /// Two live records claim the same remote document ID.
    #[error("remote ID '{0}' is already mapped to another path")]
    DuplicateRemoteId(String),

    /// A record carries a remote ID that no baseline index has ever seen.
    #[error("document '{path}' has remote ID '{remote_id}' unknown to the baseline map")]
    UnknownRemoteId { path: String, remote_id: String },

    /// The same path carries different remote IDs in the two snapshots.
    #[error(
        "document '{path}' changed remote ID between snapshots ('{baseline_id}' -> '{new_id}')"
    )]
    MismatchedRemoteId {
        path: String,
        new_id: String,
        baseline_id: String,
    },

    /// A move-registry entry records more than one rename for one old path.
    #[error("ambiguous rename history for '{old_path}' in the move registry")]
    AmbiguousMove { old_path: String },

    /// JSON (de)serialization failure for a persisted map or registry file.
    #[error("map file parse error: {0}")]
    ParseError(#[from] serde_json::Error),

    /// Generic I/O error reading or writing a map file.
    #[error("map I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl MapError {
    /// True for violations that indicate local/remote divergence requiring
    /// manual reconciliation (never auto-retried).
    pub fn is_integrity_violation(&self) -> bool {
        matches!(
            self,
            Self::DuplicateRemoteId(_)
                | Self::UnknownRemoteId { .. }
                | Self::MismatchedRemoteId { .. }
                | Self::AmbiguousMove { .. }
        )
    }
}

// ---------------------------------------------------------------------------
// Remote backend errors
// ---------------------------------------------------------------------------

/// Errors from remote backend plugins.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// HTTP-level transport error (network, TLS, etc.).
    #[error("remote HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// The backend API returned a non-success status code.
    #[error("remote API error (HTTP {status}): {body}")]
    ApiError { status: u16, body: String },

    /// The backend has no document with the given ID.
    #[error("remote document not found: {0}")]
    NotFound(String),

    /// The backend rejected the document content.
    #[error("remote rejected document '{remote_id}': {detail}")]
    Rejected { remote_id: String, detail: String },

    /// Response body could not be interpreted.
    #[error("remote response parse error: {0}")]
    ParseError(String),
}

// ---------------------------------------------------------------------------
// Synchronization errors
// ---------------------------------------------------------------------------

/// Errors from push/fetch synchronization and the tracking branch.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The remote's plugin does not implement single-document retrieval.
    #[error("remote '{0}' does not support fetch")]
    FetchUnsupported(String),

    /// The remote's plugin does not expose per-document revision history.
    #[error("remote '{0}' does not support history import")]
    HistoryUnsupported(String),

    /// The reference-resolution loop stopped making progress.
    #[error("unresolved cross-document references remain for: {}", titles.join(", "))]
    UnresolvedReferences { titles: Vec<String> },

    /// `commit` was asked to consume the staging buffer, but nothing is staged.
    #[error("no staged changes to commit")]
    NothingToCommit,

    /// An operation referenced a path the map does not track.
    #[error("path '{0}' is not tracked by this remote")]
    NotTracked(String),

    /// Map integrity or persistence failure.
    #[error(transparent)]
    Map(#[from] MapError),

    /// Underlying git failure.
    #[error(transparent)]
    Git(#[from] GitError),

    /// Backend plugin failure.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Backend construction or configuration failure.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Local document failure.
    #[error(transparent)]
    Document(#[from] DocumentError),

    /// Generic I/O error (import directory creation, file writes).
    #[error("sync I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and the backend registry.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// The `remoteType` string names no registered backend.
    #[error("unknown remote type '{0}'")]
    UnknownRemoteType(String),

    /// A config or `repoArgs` value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Document errors
// ---------------------------------------------------------------------------

/// Errors from loading and writing local documents.
#[derive(Debug, Error)]
pub enum DocumentError {
    /// The document file does not exist under the repository root.
    #[error("document not found: {0}")]
    NotFound(String),

    /// A text document was not valid UTF-8.
    #[error("document '{0}' is not valid UTF-8")]
    NotUtf8(String),

    /// Generic I/O wrapper.
    #[error("document I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = MapError::DuplicateRemoteId("post:7".into());
        assert_eq!(
            err.to_string(),
            "remote ID 'post:7' is already mapped to another path"
        );

        let err = GitError::CommandFailed {
            command: "git checkout main".into(),
            exit_code: 128,
            stderr: "fatal: not a git repository".into(),
        };
        assert!(err.to_string().contains("exit 128"));

        let err = SyncError::UnresolvedReferences {
            titles: vec!["First Post".into(), "Second Post".into()],
        };
        assert!(err.to_string().contains("First Post, Second Post"));
    }

    #[test]
    fn test_integrity_violation_classification() {
        assert!(MapError::AmbiguousMove { old_path: "a.md".into() }.is_integrity_violation());
        assert!(MapError::DuplicateRemoteId("x".into()).is_integrity_violation());
        let io = MapError::IoError(std::io::Error::other("x"));
        assert!(!io.is_integrity_violation());
    }

    #[test]
    fn test_core_error_from_subsystem() {
        let map_err = MapError::DuplicateRemoteId("id".into());
        let core_err: CoreError = map_err.into();
        assert!(matches!(core_err, CoreError::Map(_)));

        let sync_err = SyncError::NothingToCommit;
        let core_err: CoreError = sync_err.into();
        assert!(matches!(core_err, CoreError::Sync(_)));
    }
}
