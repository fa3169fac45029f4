//! Cache entry states and the view handed to readers.

use std::time::Duration;
use tokio::time::Instant;

/// Lifecycle state of one cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
  /// A wanted fetch is in flight for this key.
  Loading,
  /// Data is current: fetched and neither aged out nor invalidated.
  Fresh,
  /// Known to require refetching; previous data may still be present.
  Stale,
  /// The last fetch or mutation failed; last-known-good data is kept.
  Error,
}

/// Snapshot of one entry as observed by a reader.
///
/// `data` and `status` travel together so a consumer can render stale or
/// errored data with an affordance instead of flickering to empty.
#[derive(Debug, Clone)]
pub struct EntryView<T> {
  pub data: Option<T>,
  pub status: QueryStatus,
  pub error: Option<String>,
  pub fetched_at: Option<Instant>,
}

impl<T> EntryView<T> {
  pub fn is_loading(&self) -> bool {
    self.status == QueryStatus::Loading
  }

  pub fn is_fresh(&self) -> bool {
    self.status == QueryStatus::Fresh
  }

  pub fn is_error(&self) -> bool {
    self.status == QueryStatus::Error
  }

  pub fn data(&self) -> Option<&T> {
    self.data.as_ref()
  }

  pub fn error(&self) -> Option<&str> {
    self.error.as_deref()
  }
}

/// Per-read options.
#[derive(Debug, Clone, Copy)]
pub struct ReadOptions {
  /// When false, skip fetching entirely and return whatever is cached.
  /// Used to gate queries on parameters that are not available yet.
  pub enabled: bool,
  /// Age after which a successful entry counts as stale. `None` means age
  /// never stales it; only explicit invalidation does.
  pub stale_after: Option<Duration>,
  /// Return stale data immediately and revalidate in the background
  /// instead of holding the caller until the refetch settles.
  pub serve_stale: bool,
}

impl Default for ReadOptions {
  fn default() -> Self {
    Self {
      enabled: true,
      stale_after: None,
      serve_stale: false,
    }
  }
}

impl ReadOptions {
  pub fn disabled() -> Self {
    Self {
      enabled: false,
      ..Self::default()
    }
  }

  /// Set the age threshold for staleness.
  pub fn with_stale_after(mut self, age: Duration) -> Self {
    self.stale_after = Some(age);
    self
  }

  /// Serve stale data while revalidating instead of blocking on it.
  pub fn with_serve_stale(mut self) -> Self {
    self.serve_stale = true;
    self
  }
}
