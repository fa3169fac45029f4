//! Continuation flattening for cursor-paginated listings.
//!
//! Upstream list endpoints return at most one page per call plus an
//! opaque continuation token. Callers here never see pages: [`drain`]
//! walks the whole chain eagerly and hands back a single ordered vec, or
//! the first error with nothing at all.

use serde::{Deserialize, Serialize};
use std::future::Future;
use tracing::debug;

use crate::error::SyncResult;

/// Opaque resumption token issued by the server. Only ever threaded back
/// into the next page request, never inspected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Continuation(String);

impl Continuation {
  pub fn new(token: impl Into<String>) -> Self {
    Self(token.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl From<&str> for Continuation {
  fn from(token: &str) -> Self {
    Self(token.to_string())
  }
}

impl From<String> for Continuation {
  fn from(token: String) -> Self {
    Self(token)
  }
}

/// One page of a listing: its items plus the token for the next page, if
/// the server issued one.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
  pub items: Vec<T>,
  pub next: Option<Continuation>,
}

impl<T> Page<T> {
  pub fn last(items: Vec<T>) -> Self {
    Self { items, next: None }
  }

  pub fn with_next(items: Vec<T>, next: impl Into<Continuation>) -> Self {
    Self {
      items,
      next: Some(next.into()),
    }
  }
}

/// Fetch every page of a listing and return the concatenated items in
/// server order.
///
/// The first call passes no continuation; each later call passes the
/// token from the page before it. The walk stops when the server stops
/// issuing tokens, or early when a page comes back shorter than
/// `page_size`, which a full collection never does. Any page failing
/// fails the whole drain; no partial result is returned.
pub async fn drain<T, F, Fut>(page_size: usize, mut fetch_page: F) -> SyncResult<Vec<T>>
where
  F: FnMut(Option<Continuation>) -> Fut,
  Fut: Future<Output = SyncResult<Page<T>>>,
{
  let mut items = Vec::new();
  let mut cursor: Option<Continuation> = None;
  let mut pages = 0u32;

  loop {
    let page = fetch_page(cursor.take()).await?;
    pages += 1;
    let short = page.items.len() < page_size;
    items.extend(page.items);
    match page.next {
      Some(next) if !short => cursor = Some(next),
      _ => break,
    }
  }

  debug!(pages, total = items.len(), "drained continuation chain");
  Ok(items)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::SyncError;
  use futures::future;

  #[tokio::test]
  async fn test_drain_walks_every_page_in_order() {
    let mut calls = 0u32;
    let items = drain(50, |cursor| {
      calls += 1;
      let page = match cursor.as_ref().map(Continuation::as_str) {
        None => Page::with_next((0..50).collect(), "c1"),
        Some("c1") => Page::with_next((50..100).collect(), "c2"),
        Some("c2") => Page::last((100..120).collect()),
        Some(other) => panic!("unexpected cursor {other}"),
      };
      future::ready(Ok(page))
    })
    .await
    .unwrap();

    assert_eq!(calls, 3);
    assert_eq!(items, (0..120).collect::<Vec<u32>>());
  }

  #[tokio::test]
  async fn test_empty_collection_costs_one_call() {
    let mut calls = 0u32;
    let items: Vec<u32> = drain(50, |_| {
      calls += 1;
      future::ready(Ok(Page::last(Vec::new())))
    })
    .await
    .unwrap();

    assert_eq!(calls, 1);
    assert!(items.is_empty());
  }

  #[tokio::test]
  async fn test_short_page_stops_despite_token() {
    let mut calls = 0u32;
    let items = drain(50, |_| {
      calls += 1;
      future::ready(Ok(Page::with_next(vec![1u32, 2, 3], "more")))
    })
    .await
    .unwrap();

    assert_eq!(calls, 1);
    assert_eq!(items, vec![1, 2, 3]);
  }

  #[tokio::test]
  async fn test_full_page_without_token_stops() {
    let mut calls = 0u32;
    let items = drain(3, |_| {
      calls += 1;
      future::ready(Ok(Page::last(vec![1u32, 2, 3])))
    })
    .await
    .unwrap();

    assert_eq!(calls, 1);
    assert_eq!(items, vec![1, 2, 3]);
  }

  #[tokio::test]
  async fn test_mid_chain_error_discards_earlier_pages() {
    let mut calls = 0u32;
    let result: SyncResult<Vec<u32>> = drain(2, |cursor| {
      calls += 1;
      future::ready(match cursor {
        None => Ok(Page::with_next(vec![1, 2], "c1")),
        Some(_) => Err(SyncError::upstream("listing cursor expired")),
      })
    })
    .await;

    assert_eq!(calls, 2);
    assert!(matches!(result, Err(SyncError::UpstreamFetch(_))));
  }
}
