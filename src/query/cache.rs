//! Keyed, deduplicated, stale-aware query cache.
//!
//! The cache is the single point of truth mapping a [`QueryKey`] to one
//! entry. Reads go through a caller-supplied async fetcher; concurrent
//! reads for the same key share a single in-flight fetch. Invalidation
//! marks entries stale and revalidates the observed ones. Payloads are
//! stored type-erased as JSON values, the same shape the storage layer
//! used in earlier iterations of this design, which keeps optimistic
//! snapshots deep-comparable and lets unrelated resource types share one
//! registry.
//!
//! Re-entrancy is guarded with a per-key generation: every fetch start,
//! direct write, or abort bumps the generation, and a fetch result whose
//! generation is no longer current is discarded instead of clobbering
//! newer data.

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::{SyncError, SyncResult};

use super::entry::{EntryView, QueryStatus, ReadOptions};
use super::key::QueryKey;

/// Type-erased fetcher kept on an entry so invalidation can revalidate it.
type StoredFetcher = Arc<dyn Fn() -> BoxFuture<'static, SyncResult<Value>> + Send + Sync>;

struct Entry {
  data: Option<Value>,
  status: QueryStatus,
  error: Option<String>,
  fetched_at: Option<Instant>,
  stale_after: Option<Duration>,
  /// Bumped on every fetch start, direct write, abort, and rollback.
  generation: u64,
  /// Generation of the one outstanding fetch whose result is still wanted.
  fetching: Option<u64>,
  /// The in-flight fetch was started by invalidation, not by a read.
  revalidating: bool,
  /// Invalidated while a read-started fetch was in flight; one follow-up
  /// refetch starts when it settles.
  dirty: bool,
  fetcher: Option<StoredFetcher>,
  /// Notifies parked readers whenever the entry settles or is superseded.
  wake: watch::Sender<u64>,
}

impl Entry {
  fn new() -> Self {
    let (wake, _) = watch::channel(0);
    Self {
      data: None,
      status: QueryStatus::Stale,
      error: None,
      fetched_at: None,
      stale_after: None,
      generation: 0,
      fetching: None,
      revalidating: false,
      dirty: false,
      fetcher: None,
      wake,
    }
  }

  fn view(&self) -> EntryView<Value> {
    EntryView {
      data: self.data.clone(),
      status: self.status,
      error: self.error.clone(),
      fetched_at: self.fetched_at,
    }
  }

  /// Fresh data that has outlived its age threshold counts as stale.
  fn aged_out(&self) -> bool {
    match (self.stale_after, self.fetched_at) {
      (Some(age), Some(at)) => at.elapsed() > age,
      _ => false,
    }
  }
}

struct CacheInner {
  entries: Mutex<HashMap<QueryKey, Entry>>,
}

impl CacheInner {
  fn lock_entries(&self) -> MutexGuard<'_, HashMap<QueryKey, Entry>> {
    self.entries.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Start a fetch for `entry` under the caller's lock. The result is
  /// applied by [`settle`] only if the generation still matches.
  fn start_fetch(
    self: &Arc<Self>,
    key: &QueryKey,
    entry: &mut Entry,
    fetcher: StoredFetcher,
    revalidating: bool,
  ) {
    entry.generation += 1;
    let generation = entry.generation;
    entry.fetching = Some(generation);
    entry.revalidating = revalidating;
    entry.dirty = false;
    entry.status = QueryStatus::Loading;
    debug!(key = %key, generation, revalidating, "starting fetch");

    let inner = Arc::clone(self);
    let key = key.clone();
    tokio::spawn(async move {
      let result = fetcher().await;
      inner.settle(&key, generation, result);
    });
  }

  fn settle(self: &Arc<Self>, key: &QueryKey, generation: u64, result: SyncResult<Value>) {
    let mut entries = self.lock_entries();
    let Some(entry) = entries.get_mut(key) else {
      return;
    };
    if entry.fetching != Some(generation) {
      warn!(key = %key, generation, "discarding superseded fetch result");
      return;
    }
    entry.fetching = None;
    entry.revalidating = false;
    match result {
      Ok(value) => {
        entry.data = Some(value);
        entry.status = QueryStatus::Fresh;
        entry.error = None;
        entry.fetched_at = Some(Instant::now());
      }
      Err(err) => {
        // Last-known-good data stays; consumers render it with the error.
        entry.status = QueryStatus::Error;
        entry.error = Some(err.to_string());
      }
    }
    if entry.dirty {
      match entry.fetcher.clone() {
        Some(fetcher) => self.start_fetch(key, entry, fetcher, true),
        None => {
          entry.dirty = false;
          entry.status = QueryStatus::Stale;
        }
      }
    }
    entry.wake.send_replace(entry.generation);
  }
}

/// Shared, clonable handle to the session's query cache.
pub struct QueryCache {
  inner: Arc<CacheInner>,
}

impl Clone for QueryCache {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

impl Default for QueryCache {
  fn default() -> Self {
    Self::new()
  }
}

impl QueryCache {
  pub fn new() -> Self {
    Self {
      inner: Arc::new(CacheInner {
        entries: Mutex::new(HashMap::new()),
      }),
    }
  }

  /// Read one key through the cache.
  ///
  /// Triggers the fetcher when the entry is absent, stale (by age or by
  /// invalidation), or errored; otherwise serves the cached value. While a
  /// fetch is in flight, further reads for the same key park on it and
  /// share its result rather than issuing their own. The fetcher is kept
  /// on the entry so a later invalidation can revalidate it.
  pub async fn read<T, F, Fut>(&self, key: &QueryKey, options: ReadOptions, fetcher: F) -> EntryView<T>
  where
    T: Serialize + DeserializeOwned,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = SyncResult<T>> + Send + 'static,
  {
    let stored: StoredFetcher = Arc::new(move || {
      let fut = fetcher();
      Box::pin(async move {
        let value = fut.await?;
        serde_json::to_value(value).map_err(SyncError::from)
      })
    });

    let mut wake = {
      let mut entries = self.inner.lock_entries();
      let entry = entries.entry(key.clone()).or_insert_with(Entry::new);
      entry.stale_after = options.stale_after;

      if !options.enabled {
        return decode_view(entry.view());
      }
      entry.fetcher = Some(Arc::clone(&stored));

      let current = entry.status == QueryStatus::Fresh && !entry.aged_out();
      if current {
        return decode_view(entry.view());
      }

      if entry.fetching.is_none() {
        self.inner.start_fetch(key, entry, stored, false);
      }
      if options.serve_stale && entry.data.is_some() {
        return decode_view(entry.view());
      }
      entry.wake.subscribe()
    };

    // Park until no fetch is outstanding for this key. A follow-up
    // refetch chained by invalidation keeps the reader parked so it only
    // ever observes a settled entry.
    loop {
      {
        let entries = self.inner.lock_entries();
        match entries.get(key) {
          Some(entry) if entry.fetching.is_none() => return decode_view(entry.view()),
          Some(_) => {}
          None => {
            return EntryView {
              data: None,
              status: QueryStatus::Error,
              error: Some("cache entry dropped mid-read".to_string()),
              fetched_at: None,
            }
          }
        }
      }
      if wake.changed().await.is_err() {
        let entries = self.inner.lock_entries();
        return match entries.get(key) {
          Some(entry) => decode_view(entry.view()),
          None => EntryView {
            data: None,
            status: QueryStatus::Error,
            error: Some("cache entry dropped mid-read".to_string()),
            fetched_at: None,
          },
        };
      }
    }
  }

  /// Mark every entry whose key starts with `prefix` as stale and
  /// revalidate the observed ones. Returns immediately; refetches run in
  /// the background.
  ///
  /// An invalidation landing while any fetch is in flight queues exactly
  /// one follow-up refetch: the in-flight fetch started earlier and
  /// cannot have observed whatever prompted the invalidation. Repeat
  /// invalidations during one flight collapse into that single follow-up.
  pub fn invalidate(&self, prefix: &QueryKey) {
    let mut entries = self.inner.lock_entries();
    let matching: Vec<QueryKey> = entries
      .keys()
      .filter(|key| key.starts_with(prefix))
      .cloned()
      .collect();
    debug!(prefix = %prefix, matched = matching.len(), "invalidating");

    for key in matching {
      let Some(entry) = entries.get_mut(&key) else {
        continue;
      };
      if entry.fetching.is_some() {
        entry.dirty = true;
        continue;
      }
      // An errored entry keeps its error marker until a refetch settles;
      // only fresh data is downgraded.
      if entry.status == QueryStatus::Fresh {
        entry.status = QueryStatus::Stale;
      }
      if let Some(fetcher) = entry.fetcher.clone() {
        self.inner.start_fetch(&key, entry, fetcher, true);
      }
    }
  }

  /// Current data for a key without triggering a fetch.
  pub fn snapshot<T: DeserializeOwned>(&self, key: &QueryKey) -> Option<T> {
    self
      .snapshot_value(key)
      .and_then(|value| serde_json::from_value(value).ok())
  }

  /// Current entry view for a key without triggering a fetch.
  pub fn peek<T: DeserializeOwned>(&self, key: &QueryKey) -> Option<EntryView<T>> {
    let entries = self.inner.lock_entries();
    entries.get(key).map(|entry| decode_view(entry.view()))
  }

  /// Direct cache write. Used for optimistic updates: the value is visible
  /// to readers synchronously, before any network call is issued, and any
  /// in-flight fetch for the key is superseded so it cannot clobber it.
  pub fn write<T: Serialize>(&self, key: &QueryKey, value: &T) -> SyncResult<()> {
    let value = serde_json::to_value(value)?;
    let mut entries = self.inner.lock_entries();
    let entry = entries.entry(key.clone()).or_insert_with(Entry::new);
    entry.generation += 1;
    entry.fetching = None;
    entry.revalidating = false;
    entry.dirty = false;
    entry.data = Some(value);
    entry.status = QueryStatus::Fresh;
    entry.error = None;
    entry.fetched_at = Some(Instant::now());
    entry.wake.send_replace(entry.generation);
    Ok(())
  }

  /// Number of entries ever materialized this session. Entries are kept
  /// for the life of the session; teardown drops the whole cache.
  pub fn len(&self) -> usize {
    self.inner.lock_entries().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub(crate) fn snapshot_value(&self, key: &QueryKey) -> Option<Value> {
    let entries = self.inner.lock_entries();
    entries.get(key).and_then(|entry| entry.data.clone())
  }

  /// Supersede any in-flight fetch for `key` so its result is discarded.
  /// A mutation calls this before writing optimistically.
  pub(crate) fn abort_fetch(&self, key: &QueryKey) {
    let mut entries = self.inner.lock_entries();
    let Some(entry) = entries.get_mut(key) else {
      return;
    };
    if entry.fetching.take().is_some() {
      entry.generation += 1;
      entry.revalidating = false;
      entry.dirty = false;
      entry.status = QueryStatus::Stale;
      entry.wake.send_replace(entry.generation);
      debug!(key = %key, "aborted in-flight fetch");
    }
  }

  /// Restore a pre-mutation snapshot exactly and record the failure on
  /// the entry. `None` restores the entry to holding no data at all.
  pub(crate) fn rollback(&self, key: &QueryKey, snapshot: Option<Value>, error: &SyncError) {
    let mut entries = self.inner.lock_entries();
    let entry = entries.entry(key.clone()).or_insert_with(Entry::new);
    entry.generation += 1;
    entry.fetching = None;
    entry.revalidating = false;
    entry.dirty = false;
    entry.data = snapshot;
    entry.status = QueryStatus::Error;
    entry.error = Some(error.to_string());
    entry.wake.send_replace(entry.generation);
  }
}

fn decode_view<T: DeserializeOwned>(view: EntryView<Value>) -> EntryView<T> {
  let EntryView {
    data,
    status,
    error,
    fetched_at,
  } = view;
  match data {
    None => EntryView {
      data: None,
      status,
      error,
      fetched_at,
    },
    Some(value) => match serde_json::from_value(value) {
      Ok(decoded) => EntryView {
        data: Some(decoded),
        status,
        error,
        fetched_at,
      },
      Err(err) => EntryView {
        data: None,
        status: QueryStatus::Error,
        error: Some(format!("malformed cache payload: {}", err)),
        fetched_at,
      },
    },
  }
}
