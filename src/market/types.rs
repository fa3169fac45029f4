//! Domain types for marketplace state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::wallet::Address;

/// Collection identifier, usually a contract address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionId(String);

impl CollectionId {
  pub fn new(id: impl Into<String>) -> Self {
    Self(id.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for CollectionId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// Item identifier in `contract:tokenId` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemId(String);

impl ItemId {
  pub fn new(id: impl Into<String>) -> Self {
    Self(id.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for ItemId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// Server-assigned order identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderId(String);

impl OrderId {
  pub fn new(id: impl Into<String>) -> Self {
    Self(id.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for OrderId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// Decimal amount in the currency's display unit. The server's string is
/// kept verbatim to avoid float drift; it is parsed only for ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
  pub amount: String,
  pub currency: String,
}

impl Price {
  pub fn new(amount: impl Into<String>, currency: impl Into<String>) -> Self {
    Self {
      amount: amount.into(),
      currency: currency.into(),
    }
  }

  /// Amount as a finite number, for comparisons only.
  pub fn numeric(&self) -> Option<f64> {
    self.amount.parse::<f64>().ok().filter(|v| v.is_finite())
  }
}

impl fmt::Display for Price {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} {}", self.amount, self.currency)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BidStatus {
  Active,
  Filled,
  Cancelled,
}

/// One bid order against an item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bid {
  pub order: OrderId,
  pub maker: Address,
  pub price: Price,
  pub status: BidStatus,
  pub created_at: Option<DateTime<Utc>>,
}

/// Best-order summary attached to an item by the listing API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBrief {
  pub id: OrderId,
  pub maker: Address,
  pub price: Price,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
  pub id: ItemId,
  pub collection: CollectionId,
  pub name: Option<String>,
  pub supply: u64,
  pub best_sell: Option<OrderBrief>,
  pub best_bid: Option<OrderBrief>,
}

/// Who holds an item and how many editions of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ownership {
  pub item: ItemId,
  pub owner: Address,
  pub quantity: u64,
}

/// Everything one item detail view needs: the item with its best orders,
/// the live bid book, and the viewer's own active bid if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemMarketState {
  pub item: Item,
  pub bids: Vec<Bid>,
  pub offer: Option<Bid>,
}

/// Highest active bid by parsed amount. Bids whose amount does not parse
/// rank below every bid that does.
pub fn highest_active_bid(bids: &[Bid]) -> Option<&Bid> {
  bids
    .iter()
    .filter(|bid| bid.status == BidStatus::Active)
    .max_by(|a, b| {
      let av = a.price.numeric().unwrap_or(f64::MIN);
      let bv = b.price.numeric().unwrap_or(f64::MIN);
      av.partial_cmp(&bv).unwrap_or(std::cmp::Ordering::Equal)
    })
}

#[cfg(test)]
mod tests {
  use super::*;

  fn bid(order: &str, amount: &str, status: BidStatus) -> Bid {
    Bid {
      order: OrderId::new(order),
      maker: Address::new("0xabc"),
      price: Price::new(amount, "ETH"),
      status,
      created_at: None,
    }
  }

  #[test]
  fn test_highest_active_bid_compares_decimal_strings() {
    let bids = vec![
      bid("o1", "0.95", BidStatus::Active),
      bid("o2", "1.2", BidStatus::Active),
      bid("o3", "1.05", BidStatus::Active),
    ];
    assert_eq!(highest_active_bid(&bids).unwrap().order.as_str(), "o2");
  }

  #[test]
  fn test_highest_active_bid_skips_inactive() {
    let bids = vec![
      bid("o1", "5.0", BidStatus::Cancelled),
      bid("o2", "4.0", BidStatus::Filled),
      bid("o3", "0.5", BidStatus::Active),
    ];
    assert_eq!(highest_active_bid(&bids).unwrap().order.as_str(), "o3");
  }

  #[test]
  fn test_unparseable_amount_ranks_last() {
    let bids = vec![
      bid("o1", "not-a-number", BidStatus::Active),
      bid("o2", "0.1", BidStatus::Active),
    ];
    assert_eq!(highest_active_bid(&bids).unwrap().order.as_str(), "o2");
  }

  #[test]
  fn test_no_active_bids_yields_none() {
    let bids = vec![bid("o1", "1.0", BidStatus::Cancelled)];
    assert!(highest_active_bid(&bids).is_none());
    assert!(highest_active_bid(&[]).is_none());
  }
}
