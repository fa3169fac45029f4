//! Serde types matching marketplace API payloads.
//!
//! Wire shapes live here so deserialization stays mechanical; domain
//! types in `types` carry only what the sync layer needs, produced by
//! the conversions at the bottom.

use serde::{Deserialize, Serialize};

use crate::wallet::Address;

use super::types::{Bid, BidStatus, CollectionId, Item, ItemId, OrderBrief, OrderId, Ownership, Price};

fn default_currency() -> String {
  "ETH".to_string()
}

// ============================================================================
// Shared fragments
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiPrice {
  pub amount: String,
  #[serde(default = "default_currency")]
  pub currency: String,
}

#[derive(Debug, Deserialize)]
pub struct ApiOrder {
  pub id: String,
  pub maker: String,
  pub price: ApiPrice,
  #[serde(default)]
  pub status: Option<String>,
  #[serde(rename = "createdAt")]
  pub created_at: Option<String>,
}

// ============================================================================
// Listing envelopes - every listing endpoint pages the same way
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiItemsPage {
  #[serde(default)]
  pub items: Vec<ApiItem>,
  pub continuation: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApiOrdersPage {
  #[serde(default)]
  pub orders: Vec<ApiOrder>,
  pub continuation: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApiOwnershipsPage {
  #[serde(default)]
  pub ownerships: Vec<ApiOwnership>,
  pub continuation: Option<String>,
}

// ============================================================================
// Entities
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiItemMeta {
  pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApiItem {
  pub id: String,
  pub collection: String,
  pub meta: Option<ApiItemMeta>,
  #[serde(default)]
  pub supply: u64,
  #[serde(rename = "bestSellOrder")]
  pub best_sell_order: Option<ApiOrder>,
  #[serde(rename = "bestBidOrder")]
  pub best_bid_order: Option<ApiOrder>,
}

#[derive(Debug, Deserialize)]
pub struct ApiOwnership {
  #[serde(rename = "itemId")]
  pub item_id: String,
  pub owner: String,
  #[serde(default)]
  pub value: u64,
}

// ============================================================================
// Mutation bodies and responses
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ApiBidBody {
  #[serde(rename = "itemId")]
  pub item_id: String,
  pub maker: String,
  pub price: ApiPrice,
}

#[derive(Debug, Serialize)]
pub struct ApiBidUpdateBody {
  pub price: ApiPrice,
}

#[derive(Debug, Serialize)]
pub struct ApiBuyBody {
  pub buyer: String,
}

/// Response to every order action. `status: "pending"` with a tx hash
/// means on-chain confirmation is still outstanding.
#[derive(Debug, Deserialize)]
pub struct ApiOrderActionResponse {
  #[serde(rename = "orderId")]
  pub order_id: Option<String>,
  #[serde(rename = "txHash")]
  pub tx_hash: Option<String>,
  #[serde(default)]
  pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct ApiTxStatus {
  pub status: String,
}

// ============================================================================
// Conversions to domain types
// ============================================================================

fn parse_status(status: Option<&str>) -> BidStatus {
  // Anything the server does not clearly mark active or filled is
  // treated as inactive.
  match status.map(str::to_ascii_lowercase).as_deref() {
    Some("active") | None => BidStatus::Active,
    Some("filled") | Some("matched") => BidStatus::Filled,
    _ => BidStatus::Cancelled,
  }
}

impl From<ApiPrice> for Price {
  fn from(price: ApiPrice) -> Self {
    Price::new(price.amount, price.currency)
  }
}

impl From<Price> for ApiPrice {
  fn from(price: Price) -> Self {
    ApiPrice {
      amount: price.amount,
      currency: price.currency,
    }
  }
}

impl From<ApiOrder> for Bid {
  fn from(order: ApiOrder) -> Self {
    let status = parse_status(order.status.as_deref());
    let created_at = order
      .created_at
      .as_deref()
      .and_then(|raw| chrono::DateTime::parse_from_rfc3339(raw).ok())
      .map(|dt| dt.with_timezone(&chrono::Utc));
    Bid {
      order: OrderId::new(order.id),
      maker: Address::new(order.maker),
      price: order.price.into(),
      status,
      created_at,
    }
  }
}

impl From<ApiOrder> for OrderBrief {
  fn from(order: ApiOrder) -> Self {
    OrderBrief {
      id: OrderId::new(order.id),
      maker: Address::new(order.maker),
      price: order.price.into(),
    }
  }
}

impl From<ApiItem> for Item {
  fn from(item: ApiItem) -> Self {
    Item {
      id: ItemId::new(item.id),
      collection: CollectionId::new(item.collection),
      name: item.meta.and_then(|meta| meta.name),
      supply: item.supply,
      best_sell: item.best_sell_order.map(OrderBrief::from),
      best_bid: item.best_bid_order.map(OrderBrief::from),
    }
  }
}

impl From<ApiOwnership> for Ownership {
  fn from(ownership: ApiOwnership) -> Self {
    Ownership {
      item: ItemId::new(ownership.item_id),
      owner: Address::new(ownership.owner),
      quantity: ownership.value,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_items_page_deserializes_camel_case() {
    let raw = r#"{
      "items": [
        {
          "id": "0xc0ffee:42",
          "collection": "0xc0ffee",
          "meta": { "name": "Curio #42" },
          "supply": 1,
          "bestSellOrder": {
            "id": "sell-1",
            "maker": "0xSeller",
            "price": { "amount": "2.5" }
          },
          "bestBidOrder": null
        }
      ],
      "continuation": "abc123"
    }"#;

    let page: ApiItemsPage = serde_json::from_str(raw).unwrap();
    assert_eq!(page.continuation.as_deref(), Some("abc123"));
    let item: Item = page.items.into_iter().next().unwrap().into();
    assert_eq!(item.name.as_deref(), Some("Curio #42"));
    let best_sell = item.best_sell.unwrap();
    assert_eq!(best_sell.price.amount, "2.5");
    assert_eq!(best_sell.price.currency, "ETH");
    assert!(item.best_bid.is_none());
  }

  #[test]
  fn test_order_status_mapping() {
    assert_eq!(parse_status(Some("ACTIVE")), BidStatus::Active);
    assert_eq!(parse_status(None), BidStatus::Active);
    assert_eq!(parse_status(Some("filled")), BidStatus::Filled);
    assert_eq!(parse_status(Some("CANCELLED")), BidStatus::Cancelled);
    assert_eq!(parse_status(Some("weird")), BidStatus::Cancelled);
  }

  #[test]
  fn test_order_converts_with_rfc3339_timestamp() {
    let raw = r#"{
      "id": "bid-1",
      "maker": "0xMaker",
      "price": { "amount": "0.4", "currency": "WETH" },
      "status": "active",
      "createdAt": "2024-03-01T12:00:00Z"
    }"#;
    let bid: Bid = serde_json::from_str::<ApiOrder>(raw).unwrap().into();
    assert_eq!(bid.status, BidStatus::Active);
    assert_eq!(bid.price.currency, "WETH");
    assert_eq!(bid.created_at.unwrap().to_rfc3339(), "2024-03-01T12:00:00+00:00");
  }

  #[test]
  fn test_malformed_timestamp_becomes_none() {
    let raw = r#"{
      "id": "bid-1",
      "maker": "0xMaker",
      "price": { "amount": "0.4" },
      "createdAt": "yesterday-ish"
    }"#;
    let bid: Bid = serde_json::from_str::<ApiOrder>(raw).unwrap().into();
    assert!(bid.created_at.is_none());
  }

  #[test]
  fn test_bid_body_serializes_camel_case() {
    let body = ApiBidBody {
      item_id: "0xc0ffee:42".to_string(),
      maker: "0xabc".to_string(),
      price: ApiPrice {
        amount: "1.5".to_string(),
        currency: "ETH".to_string(),
      },
    };
    let json = serde_json::to_value(&body).unwrap();
    assert_eq!(json["itemId"], "0xc0ffee:42");
    assert_eq!(json["price"]["amount"], "1.5");
  }
}
