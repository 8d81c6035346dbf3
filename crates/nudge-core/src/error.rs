//! Core error types for nudge-core.
//!
//! Mirrors the layering of the library: validation failures are rejected
//! before anything is written, store and config errors are local, transport
//! and auth errors come from the remote side of a sync pass.

use std::path::PathBuf;
use thiserror::Error;

use crate::sync::SyncError;

/// Core error type for nudge-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Local store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Input rejected before entering the core
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Credential errors surfaced to the host for re-authentication
    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    /// Remote store errors outside of a sync pass
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    /// Sync pass aborted
    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),
}

/// Local SQLite store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Failed to open the database file
    #[error("Failed to open store at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Migration failed
    #[error("Store migration failed: {0}")]
    MigrationFailed(String),

    /// Database is locked by another writer
    #[error("Store is locked")]
    Locked,

    /// A stored value could not be encoded or decoded
    #[error("Corrupt stored value in {column}: {message}")]
    Codec { column: &'static str, message: String },
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    #[error("Missing required configuration key: {0}")]
    MissingKey(String),
}

/// Validation errors for user input and remote records.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Title must not be empty")]
    EmptyTitle,

    #[error("Tag name must not be empty")]
    EmptyTagName,

    #[error("Weekday {0} is out of range (1 = Sunday ... 7 = Saturday)")]
    WeekdayOutOfRange(u8),

    #[error("Day of month {0} is out of range (1..=31)")]
    MonthDayOutOfRange(u8),

    #[error("Unknown reminder: {0}")]
    UnknownReminder(String),

    #[error("Unknown tag: {0}")]
    UnknownTag(String),
}

/// Credential errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The request chain cannot be authorized; the host should prompt sign-in.
    #[error("Unauthorized")]
    Unauthorized,

    #[error("No refresh credential stored")]
    MissingCredential,

    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("Credential store error: {0}")]
    Credential(String),
}

/// Network-level failures of a single remote call.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The server answered 401.
    #[error("Server rejected credentials")]
    Unauthorized,

    #[error("Remote record not found")]
    NotFound,

    #[error("Unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    Decode(String),
}

/// Error from an authorized remote call: either the gate gave up or the
/// transport failed.
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl RemoteError {
    /// Whether the server reported the record as already gone.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::Transport(TransportError::NotFound))
    }
}

/// The alert collaborator rejected a single request. Logged and skipped,
/// never propagated out of a reschedule.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Alert '{id}' rejected: {reason}")]
pub struct AlertIssuanceError {
    pub id: String,
    pub reason: String,
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(failure, msg) => {
                if failure.code == rusqlite::ErrorCode::DatabaseLocked
                    || failure.code == rusqlite::ErrorCode::DatabaseBusy
                {
                    StoreError::Locked
                } else {
                    match msg {
                        Some(msg) => StoreError::QueryFailed(format!("{failure}: {msg}")),
                        None => StoreError::QueryFailed(failure.to_string()),
                    }
                }
            }
            _ => StoreError::QueryFailed(err.to_string()),
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        CoreError::Store(err.into())
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
