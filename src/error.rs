//! Error taxonomy for the synchronization layer.
//!
//! Every fallible path in the crate resolves to one of these variants so
//! callers can tell a marketplace failure from a peer-host failure from a
//! locally-rejected input. Fetch and mutation failures additionally land on
//! the affected cache entry as an `error` status; nothing in the sync core
//! escapes as an unclassified panic or a bare string.

use thiserror::Error;

/// Errors produced by the synchronization layer and its collaborators.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
  /// The marketplace API failed or returned something unusable.
  #[error("marketplace fetch failed: {0}")]
  UpstreamFetch(String),

  /// The peer host rejected a subscribe, scry, or poke.
  #[error("peer subscription failed: {0}")]
  Subscription(String),

  /// The wallet provider refused a connection or signature.
  #[error("wallet rejected: {0}")]
  Wallet(String),

  /// Input failed a locally-declared constraint; never reaches the cache.
  #[error("invalid input: {0}")]
  Validation(String),

  /// The local key-value store failed.
  #[error("local store error: {0}")]
  Store(String),

  /// Configuration file missing, unreadable, or malformed.
  #[error("configuration error: {0}")]
  Config(String),
}

impl SyncError {
  /// Shorthand for an upstream failure with a formatted message.
  pub fn upstream(msg: impl Into<String>) -> Self {
    SyncError::UpstreamFetch(msg.into())
  }
}

impl From<reqwest::Error> for SyncError {
  fn from(err: reqwest::Error) -> Self {
    SyncError::UpstreamFetch(err.to_string())
  }
}

impl From<rusqlite::Error> for SyncError {
  fn from(err: rusqlite::Error) -> Self {
    SyncError::Store(err.to_string())
  }
}

impl From<serde_json::Error> for SyncError {
  fn from(err: serde_json::Error) -> Self {
    SyncError::UpstreamFetch(format!("malformed payload: {}", err))
  }
}

/// Crate-wide result alias.
pub type SyncResult<T> = Result<T, SyncError>;
