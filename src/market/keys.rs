//! Cache key constructors for marketplace reads.
//!
//! All keys are built here so prefix relationships stay consistent:
//! the settlement fan-out and the event bridge invalidate by the
//! prefixes these functions define.

use crate::query::QueryKey;
use crate::wallet::Address;

use super::types::{CollectionId, ItemId};

pub fn items_root() -> QueryKey {
  QueryKey::new("items")
}

pub fn bids_root() -> QueryKey {
  QueryKey::new("bids")
}

pub fn items_by_collection(collection: &CollectionId) -> QueryKey {
  items_root().with("by-collection").with(collection.as_str())
}

pub fn items_by_owner(owner: &Address) -> QueryKey {
  items_root().with("by-owner").with(owner.as_str())
}

/// Prefix covering every viewer's state for one item.
pub fn item_state_prefix(item: &ItemId) -> QueryKey {
  QueryKey::new("item-state").with(item.as_str())
}

/// Item detail state is viewer-scoped: the embedded `offer` field differs
/// per wallet, so an anonymous viewer and each connected address get
/// distinct entries under the same item prefix.
pub fn item_state(item: &ItemId, viewer: Option<&Address>) -> QueryKey {
  let key = item_state_prefix(item);
  match viewer {
    Some(address) => key.with(address.as_str()),
    None => key.with("anon"),
  }
}

pub fn ownerships_by_item(item: &ItemId) -> QueryKey {
  QueryKey::new("ownerships").with("by-item").with(item.as_str())
}

pub fn bids_by_maker(maker: &Address) -> QueryKey {
  bids_root().with("by-maker").with(maker.as_str())
}

pub fn bids_by_item(item: &ItemId) -> QueryKey {
  bids_root().with("by-item").with(item.as_str())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_listing_keys_sit_under_their_roots() {
    let collection = CollectionId::new("0xc0ffee");
    let owner = Address::new("0xabc");
    assert!(items_by_collection(&collection).starts_with(&items_root()));
    assert!(items_by_owner(&owner).starts_with(&items_root()));
    assert!(bids_by_maker(&owner).starts_with(&bids_root()));
  }

  #[test]
  fn test_item_state_keys_share_the_item_prefix() {
    let item = ItemId::new("0xc0ffee:42");
    let viewer = Address::new("0xabc");
    let anon = item_state(&item, None);
    let scoped = item_state(&item, Some(&viewer));

    assert_ne!(anon, scoped);
    assert!(anon.starts_with(&item_state_prefix(&item)));
    assert!(scoped.starts_with(&item_state_prefix(&item)));
  }

  #[test]
  fn test_distinct_items_never_prefix_collide() {
    let a = item_state_prefix(&ItemId::new("0xc0ffee:4"));
    let b = item_state_prefix(&ItemId::new("0xc0ffee:42"));
    assert!(!b.starts_with(&a));
  }
}
