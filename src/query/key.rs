//! Structural cache keys.
//!
//! A `QueryKey` names exactly one cached result as an ordered tuple of
//! primitive segments. Keys compare structurally: two keys are equal iff
//! their segment tuples are deep-equal. Invalidation may address a whole
//! family of keys by a shared leading sub-tuple, so segments stay
//! structured instead of being hashed down to one string.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One element of a key tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Segment {
  /// Free-form text: resource names, addresses, opaque identifiers.
  Text(String),
  /// Numeric identifiers.
  Num(u64),
}

impl fmt::Display for Segment {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Segment::Text(s) => f.write_str(s),
      Segment::Num(n) => write!(f, "{}", n),
    }
  }
}

impl From<&str> for Segment {
  fn from(s: &str) -> Self {
    Segment::Text(s.to_string())
  }
}

impl From<String> for Segment {
  fn from(s: String) -> Self {
    Segment::Text(s)
  }
}

impl From<u64> for Segment {
  fn from(n: u64) -> Self {
    Segment::Num(n)
  }
}

/// Ordered, structurally-comparable cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueryKey {
  segments: Vec<Segment>,
}

impl QueryKey {
  /// Start a key from its leading segment.
  pub fn new(first: impl Into<Segment>) -> Self {
    Self {
      segments: vec![first.into()],
    }
  }

  /// Append one segment, builder-style.
  pub fn with(mut self, next: impl Into<Segment>) -> Self {
    self.segments.push(next.into());
    self
  }

  /// The raw segment tuple.
  pub fn segments(&self) -> &[Segment] {
    &self.segments
  }

  pub fn len(&self) -> usize {
    self.segments.len()
  }

  pub fn is_empty(&self) -> bool {
    self.segments.is_empty()
  }

  /// True when `prefix` is a leading sub-tuple of this key.
  ///
  /// Every key is a prefix of itself, so exact-key invalidation is the
  /// degenerate case of prefix invalidation.
  pub fn starts_with(&self, prefix: &QueryKey) -> bool {
    self.segments.len() >= prefix.segments.len()
      && self.segments[..prefix.segments.len()] == prefix.segments[..]
  }
}

impl fmt::Display for QueryKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (i, seg) in self.segments.iter().enumerate() {
      if i > 0 {
        f.write_str(":")?;
      }
      write!(f, "{}", seg)?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_structural_equality() {
    let a = QueryKey::new("market").with("items").with("c1");
    let b = QueryKey::new("market").with("items").with("c1");
    let c = QueryKey::new("market").with("items").with("c2");
    assert_eq!(a, b);
    assert_ne!(a, c);
  }

  #[test]
  fn test_text_and_num_segments_differ() {
    let text = QueryKey::new("boards").with("10");
    let num = QueryKey::new("boards").with(10u64);
    assert_ne!(text, num);
  }

  #[test]
  fn test_prefix_matching() {
    let key = QueryKey::new("market").with("bids").with("by-maker").with("0xabc");
    let family = QueryKey::new("market").with("bids");
    let other = QueryKey::new("market").with("items");

    assert!(key.starts_with(&family));
    assert!(key.starts_with(&key));
    assert!(!key.starts_with(&other));
    // A longer key is never a prefix of a shorter one.
    assert!(!family.starts_with(&key));
  }

  #[test]
  fn test_display_joins_segments() {
    let key = QueryKey::new("market").with("item").with(7u64);
    assert_eq!(key.to_string(), "market:item:7");
  }
}
