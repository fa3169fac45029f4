//! Marketplace API surface: domain types, wire types, cache keys, and
//! the client contract with its HTTP implementation.

pub mod api_types;
mod client;
pub mod keys;
mod types;

pub use client::HttpMarketClient;
pub use types::{
  highest_active_bid, Bid, BidStatus, CollectionId, Item, ItemId, ItemMarketState, OrderBrief,
  OrderId, Ownership, Price,
};

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::future::Future;

use crate::error::SyncResult;
use crate::pager::{Continuation, Page};
use crate::wallet::Address;

/// What a mutating order call settles to. Both arms carry the receipt;
/// the pending arm additionally carries the wait for on-chain finality.
pub enum TradeOutcome {
  Settled(TradeReceipt),
  Pending {
    receipt: TradeReceipt,
    confirmation: Confirmation,
  },
}

impl TradeOutcome {
  pub fn receipt(&self) -> &TradeReceipt {
    match self {
      TradeOutcome::Settled(receipt) => receipt,
      TradeOutcome::Pending { receipt, .. } => receipt,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeReceipt {
  pub order: Option<OrderId>,
  pub tx_hash: Option<String>,
}

impl TradeReceipt {
  pub fn empty() -> Self {
    Self {
      order: None,
      tx_hash: None,
    }
  }
}

/// Deferred on-chain confirmation for a pending trade.
pub struct Confirmation(BoxFuture<'static, SyncResult<()>>);

impl Confirmation {
  pub fn ready() -> Self {
    Self(Box::pin(futures::future::ready(Ok(()))))
  }

  pub fn from_future<F>(fut: F) -> Self
  where
    F: Future<Output = SyncResult<()>> + Send + 'static,
  {
    Self(Box::pin(fut))
  }

  pub async fn wait(self) -> SyncResult<()> {
    self.0.await
  }
}

#[derive(Debug, Clone)]
pub struct BidRequest {
  pub item: ItemId,
  pub maker: Address,
  pub price: Price,
}

#[derive(Debug, Clone)]
pub struct BidUpdateRequest {
  pub order: OrderId,
  pub price: Price,
}

#[derive(Debug, Clone)]
pub struct BuyRequest {
  pub order: OrderId,
  pub buyer: Address,
}

/// Everything the sync layer asks of the marketplace API.
///
/// Listing calls return one page per call; [`crate::pager::drain`] walks
/// them. Order calls return a [`TradeOutcome`]; callers go through the
/// mutation coordinator rather than invoking these directly.
#[async_trait]
pub trait MarketClient: Send + Sync {
  async fn items_by_collection(
    &self,
    collection: &CollectionId,
    cursor: Option<Continuation>,
    page_size: usize,
  ) -> SyncResult<Page<Item>>;

  async fn items_by_owner(
    &self,
    owner: &Address,
    cursor: Option<Continuation>,
    page_size: usize,
  ) -> SyncResult<Page<Item>>;

  async fn item_by_id(&self, item: &ItemId) -> SyncResult<Item>;

  async fn ownerships_by_item(
    &self,
    item: &ItemId,
    cursor: Option<Continuation>,
    page_size: usize,
  ) -> SyncResult<Page<Ownership>>;

  async fn bids_by_maker(
    &self,
    maker: &Address,
    cursor: Option<Continuation>,
    page_size: usize,
  ) -> SyncResult<Page<Bid>>;

  async fn bids_by_item(
    &self,
    item: &ItemId,
    cursor: Option<Continuation>,
    page_size: usize,
  ) -> SyncResult<Page<Bid>>;

  async fn place_bid(&self, request: &BidRequest) -> SyncResult<TradeOutcome>;

  async fn update_bid(&self, request: &BidUpdateRequest) -> SyncResult<TradeOutcome>;

  async fn cancel_order(&self, order: &OrderId) -> SyncResult<TradeOutcome>;

  async fn accept_bid(&self, order: &OrderId) -> SyncResult<TradeOutcome>;

  async fn buy(&self, request: &BuyRequest) -> SyncResult<TradeOutcome>;
}
