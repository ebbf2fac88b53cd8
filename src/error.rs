//! Error types for the staging store, collections, and the publish protocol.
//!
//! Precondition failures in the editorial state machine are *not* errors:
//! collection operations report them as `Ok(false)` so callers can show a
//! plain rejection. The variants here are reserved for faults (I/O, corrupt
//! state) and for workflow contract violations.

use std::path::PathBuf;

use thiserror::Error;

/// Failures from a content store.
#[derive(Error, Debug)]
pub enum ContentError {
    #[error("unsafe content uri: {uri}")]
    UnsafeUri { uri: String },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),
}

impl ContentError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ContentError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Failures from collection operations and the collection registry.
#[derive(Error, Debug)]
pub enum CollectionError {
    #[error(transparent)]
    Content(#[from] ContentError),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid collection description {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Reviewing content that has no completion on record means the
    /// complete step was bypassed.
    #[error("no COMPLETED event recorded for {uri} in collection {collection}")]
    MissingCompletion { collection: String, uri: String },

    #[error("not a valid collection at {path}: missing {missing}")]
    Invalid { path: PathBuf, missing: String },

    #[error("collection not found: {0}")]
    NotFound(String),

    #[error("a collection named '{0}' already exists")]
    NameConflict(String),

    #[error("{0} may not edit collections")]
    PermissionDenied(String),

    #[error("collection name must not be empty")]
    EmptyName,

    #[error("scheduled collection '{0}' needs a publish date")]
    MissingPublishDate(String),

    #[error("collection {id} still holds {count} content item(s)")]
    NotEmpty { id: String, count: usize },

    #[error("bundle error for {uri}: {message}")]
    Bundle { uri: String, message: String },
}

impl CollectionError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CollectionError::Io {
            path: path.into(),
            source,
        }
    }
}

/// A failed call against one publish target.
#[derive(Error, Debug, Clone)]
pub enum PublishError {
    #[error("{host}: begin failed: {message}")]
    Begin { host: String, message: String },

    #[error("{host} [{transaction}]: {operation} failed: {message}")]
    Remote {
        host: String,
        transaction: String,
        operation: &'static str,
        message: String,
    },

    #[error("{host} [{transaction}]: commit reported errors: {message}")]
    Commit {
        host: String,
        transaction: String,
        message: String,
    },

    #[error("publish task failed: {0}")]
    Task(String),
}

/// Failure to take the cross-process advisory lock.
#[derive(Error, Debug)]
pub enum LockError {
    #[error("lock held by another process: {0}")]
    Contended(PathBuf),

    #[error("I/O error locking {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
