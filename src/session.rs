//! Per-session context object.
//!
//! One [`Session`] is created per connected user session and owns the
//! whole sync layer: the query cache, the event bridge, the mutation
//! coordinator, and handles to the external collaborators. Views talk
//! to the session; nothing below it is shared implicitly. Tearing the
//! session down ([`Session::shutdown`]) unbinds every live topic.

use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use crate::bridge::EventBridge;
use crate::config::Config;
use crate::error::{SyncError, SyncResult};
use crate::market::keys;
use crate::market::{
  highest_active_bid, Bid, BidRequest, BidStatus, BidUpdateRequest, BuyRequest, CollectionId, Item,
  ItemId, ItemMarketState, MarketClient, OrderId, Ownership, Price, TradeReceipt,
};
use crate::mutation::{MutationCoordinator, MutationKind, MutationTarget};
use crate::pager;
use crate::peer::{PeerIdentity, PeerTransport, Topic};
use crate::query::{EntryView, QueryCache, QueryKey, ReadOptions};
use crate::store::{KvStore, StoreScope};
use crate::wallet::{Address, WalletConnector};

/// Store slot recording which wallet address an identity paired with.
const LINKED_WALLET_SLOT: &str = "linked-wallet";

/// Poke mark the peer-host agent expects for wallet pairings.
const WALLET_LINK_MARK: &str = "curio-wallet-link";

/// Session-wide sync context.
pub struct Session {
  /// Application configuration
  config: Config,

  /// Keyed request/response cache
  cache: QueryCache,

  /// Push-invalidation bridge from the peer host
  bridge: EventBridge,

  /// Optimistic-mutation coordinator
  coordinator: MutationCoordinator,

  /// Marketplace API client
  market: Arc<dyn MarketClient>,

  /// Wallet connector
  wallet: Arc<dyn WalletConnector>,

  /// Peer-host transport
  peer: Arc<dyn PeerTransport>,

  /// Local persistent store
  store: Arc<dyn KvStore>,
}

impl Session {
  pub fn new(
    config: Config,
    market: Arc<dyn MarketClient>,
    wallet: Arc<dyn WalletConnector>,
    peer: Arc<dyn PeerTransport>,
    store: Arc<dyn KvStore>,
  ) -> Self {
    let cache = QueryCache::new();
    let bridge = EventBridge::new(cache.clone(), Arc::clone(&peer), config.sync.debounce_window());
    let coordinator = MutationCoordinator::new(cache.clone(), config.sync.settlement_lag());

    Self {
      config,
      cache,
      bridge,
      coordinator,
      market,
      wallet,
      peer,
      store,
    }
  }

  pub fn cache(&self) -> &QueryCache {
    &self.cache
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn wallet(&self) -> &Arc<dyn WalletConnector> {
    &self.wallet
  }

  /// Unbind every live topic. The cache itself needs no teardown.
  pub async fn shutdown(&self) {
    info!("session shutting down");
    self.bridge.shutdown().await;
  }

  fn page_size(&self) -> usize {
    self.config.market.page_size
  }

  fn read_options(&self) -> ReadOptions {
    match self.config.sync.stale_after() {
      Some(age) => ReadOptions::default().with_stale_after(age),
      None => ReadOptions::default(),
    }
  }

  fn require_wallet(&self) -> SyncResult<Address> {
    self
      .wallet
      .address()
      .ok_or_else(|| SyncError::Wallet("no wallet connected".to_string()))
  }

  // ==========================================================================
  // Read-through market state
  // ==========================================================================

  /// Every item in a collection, drained across all listing pages.
  pub async fn collection_items(&self, collection: &CollectionId) -> EntryView<Vec<Item>> {
    let key = keys::items_by_collection(collection);
    let market = Arc::clone(&self.market);
    let collection = collection.clone();
    let page_size = self.page_size();

    self
      .cache
      .read(&key, self.read_options(), move || {
        let market = Arc::clone(&market);
        let collection = collection.clone();
        async move {
          pager::drain(page_size, move |cursor| {
            let market = Arc::clone(&market);
            let collection = collection.clone();
            async move { market.items_by_collection(&collection, cursor, page_size).await }
          })
          .await
        }
      })
      .await
  }

  /// Every item an address holds.
  pub async fn owner_items(&self, owner: &Address) -> EntryView<Vec<Item>> {
    let key = keys::items_by_owner(owner);
    let market = Arc::clone(&self.market);
    let owner = owner.clone();
    let page_size = self.page_size();

    self
      .cache
      .read(&key, self.read_options(), move || {
        let market = Arc::clone(&market);
        let owner = owner.clone();
        async move {
          pager::drain(page_size, move |cursor| {
            let market = Arc::clone(&market);
            let owner = owner.clone();
            async move { market.items_by_owner(&owner, cursor, page_size).await }
          })
          .await
        }
      })
      .await
  }

  /// Items held by the connected wallet. Without a wallet the query is
  /// disabled: the entry reads back empty and no fetch is issued.
  pub async fn my_items(&self) -> EntryView<Vec<Item>> {
    match self.wallet.address() {
      Some(owner) => self.owner_items(&owner).await,
      None => {
        self
          .cache
          .read(&keys::items_root(), ReadOptions::disabled(), || async {
            Ok(Vec::<Item>::new())
          })
          .await
      }
    }
  }

  /// Full market state for one item: the item itself, its live bid book,
  /// and the viewer's own best active bid if a wallet is connected. Keyed
  /// per viewer so two accounts never share an `offer`.
  pub async fn item_state(&self, item: &ItemId) -> EntryView<ItemMarketState> {
    let viewer = self.wallet.address();
    let key = keys::item_state(item, viewer.as_ref());
    let market = Arc::clone(&self.market);
    let item = item.clone();
    let page_size = self.page_size();

    self
      .cache
      .read(&key, self.read_options(), move || {
        let market = Arc::clone(&market);
        let item = item.clone();
        let viewer = viewer.clone();
        async move {
          let detail = market.item_by_id(&item).await?;
          let bids = pager::drain(page_size, move |cursor| {
            let market = Arc::clone(&market);
            let item = item.clone();
            async move { market.bids_by_item(&item, cursor, page_size).await }
          })
          .await?;

          let offer = viewer.as_ref().and_then(|addr| {
            let mine: Vec<Bid> = bids.iter().filter(|bid| &bid.maker == addr).cloned().collect();
            highest_active_bid(&mine).cloned()
          });

          Ok(ItemMarketState {
            item: detail,
            bids,
            offer,
          })
        }
      })
      .await
  }

  /// Every current holder of an item.
  pub async fn item_ownerships(&self, item: &ItemId) -> EntryView<Vec<Ownership>> {
    let key = keys::ownerships_by_item(item);
    let market = Arc::clone(&self.market);
    let item = item.clone();
    let page_size = self.page_size();

    self
      .cache
      .read(&key, self.read_options(), move || {
        let market = Arc::clone(&market);
        let item = item.clone();
        async move {
          pager::drain(page_size, move |cursor| {
            let market = Arc::clone(&market);
            let item = item.clone();
            async move { market.ownerships_by_item(&item, cursor, page_size).await }
          })
          .await
        }
      })
      .await
  }

  /// Live bid book for one item, viewer-independent.
  pub async fn item_bids(&self, item: &ItemId) -> EntryView<Vec<Bid>> {
    let key = keys::bids_by_item(item);
    let market = Arc::clone(&self.market);
    let item = item.clone();
    let page_size = self.page_size();

    self
      .cache
      .read(&key, self.read_options(), move || {
        let market = Arc::clone(&market);
        let item = item.clone();
        async move {
          pager::drain(page_size, move |cursor| {
            let market = Arc::clone(&market);
            let item = item.clone();
            async move { market.bids_by_item(&item, cursor, page_size).await }
          })
          .await
        }
      })
      .await
  }

  /// Every bid an address has placed.
  pub async fn maker_bids(&self, maker: &Address) -> EntryView<Vec<Bid>> {
    let key = keys::bids_by_maker(maker);
    let market = Arc::clone(&self.market);
    let maker = maker.clone();
    let page_size = self.page_size();

    self
      .cache
      .read(&key, self.read_options(), move || {
        let market = Arc::clone(&market);
        let maker = maker.clone();
        async move {
          pager::drain(page_size, move |cursor| {
            let market = Arc::clone(&market);
            let maker = maker.clone();
            async move { market.bids_by_maker(&maker, cursor, page_size).await }
          })
          .await
        }
      })
      .await
  }

  /// Bids placed by the connected wallet; disabled without one.
  pub async fn my_bids(&self) -> EntryView<Vec<Bid>> {
    match self.wallet.address() {
      Some(maker) => self.maker_bids(&maker).await,
      None => {
        self
          .cache
          .read(&keys::bids_root(), ReadOptions::disabled(), || async {
            Ok(Vec::<Bid>::new())
          })
          .await
      }
    }
  }

  // ==========================================================================
  // Topic watching
  // ==========================================================================

  /// Bind the collection's delta topic to its listing key.
  pub async fn watch_collection(&self, collection: &CollectionId) -> SyncResult<()> {
    let topic = Topic::new(
      &self.config.peer.app,
      format!("/market/collection/{collection}"),
    );
    self.bridge.bind(topic, keys::items_by_collection(collection)).await
  }

  /// Bind the item's delta topic to its state keys. The prefix covers
  /// every viewer variant of the item-state key.
  pub async fn watch_item(&self, item: &ItemId) -> SyncResult<()> {
    let topic = Topic::new(&self.config.peer.app, format!("/market/item/{item}"));
    self.bridge.bind(topic, keys::item_state_prefix(item)).await
  }

  /// Bind the connected wallet's activity topic to its bid listing.
  pub async fn watch_wallet(&self) -> SyncResult<()> {
    let address = self.require_wallet()?;
    let topic = Topic::new(&self.config.peer.app, format!("/market/wallet/{address}"));
    self.bridge.bind(topic, keys::bids_by_maker(&address)).await
  }

  // ==========================================================================
  // Wallet pairing
  // ==========================================================================

  /// Identity of the peer host this session runs against.
  pub async fn identity(&self) -> SyncResult<PeerIdentity> {
    let value = self.peer.scry(&self.config.peer.app, "/identity").await?;
    value
      .as_str()
      .map(PeerIdentity::new)
      .ok_or_else(|| SyncError::Subscription("identity scry returned a non-string payload".to_string()))
  }

  /// Connect the wallet and pair it with the host identity: sign a
  /// pairing message, poke the association to the host, and persist it
  /// locally so a returning session can skip re-linking.
  pub async fn link_wallet(&self) -> SyncResult<Address> {
    let address = self.wallet.connect().await?;
    let identity = self.identity().await?;

    let message = format!("curio-wallet-link:{}:{}", identity.as_str(), address.as_str());
    let signature = self.wallet.sign_message(&message).await?;

    self
      .peer
      .poke(
        &self.config.peer.app,
        WALLET_LINK_MARK,
        json!({
          "address": address.as_str(),
          "signature": signature.as_str(),
        }),
      )
      .await?;

    let scope = StoreScope::new(identity.as_str(), &self.config.peer.app);
    self
      .store
      .set(&scope, LINKED_WALLET_SLOT, &Value::String(address.as_str().to_string()))?;

    info!(identity = %identity.as_str(), address = %address, "wallet linked");
    Ok(address)
  }

  /// Address this host identity last paired with, if any.
  pub async fn linked_wallet(&self) -> SyncResult<Option<Address>> {
    let identity = self.identity().await?;
    let scope = StoreScope::new(identity.as_str(), &self.config.peer.app);
    let slot = self.store.get(&scope, LINKED_WALLET_SLOT)?;
    Ok(slot.and_then(|value| value.as_str().map(Address::new)))
  }

  // ==========================================================================
  // Mutations
  // ==========================================================================

  /// Place a bid on an item. The viewer's offer appears in the cached
  /// item state immediately; a failure puts back exactly what was there.
  pub async fn place_bid(&self, item: &ItemId, price: Price) -> SyncResult<TradeReceipt> {
    let maker = self.require_wallet()?;
    validate_price(&price)?;

    let target = MutationTarget::new(item.clone(), maker.clone());
    let optimistic = self.optimistic_state(&target.primary_key(), |state| {
      state.offer = Some(Bid {
        order: OrderId::new("pending"),
        maker: maker.clone(),
        price: price.clone(),
        status: BidStatus::Active,
        created_at: None,
      });
    })?;

    let market = Arc::clone(&self.market);
    let request = BidRequest {
      item: item.clone(),
      maker,
      price,
    };
    self
      .coordinator
      .execute(MutationKind::PlaceBid, target, optimistic, move || async move {
        market.place_bid(&request).await
      })
      .await
  }

  /// Raise or lower an existing bid.
  pub async fn update_bid(&self, item: &ItemId, order: &OrderId, price: Price) -> SyncResult<TradeReceipt> {
    let maker = self.require_wallet()?;
    validate_price(&price)?;

    let target = MutationTarget::new(item.clone(), maker);
    let updated = order.clone();
    let new_price = price.clone();
    let optimistic = self.optimistic_state(&target.primary_key(), |state| {
      if let Some(offer) = state.offer.as_mut() {
        if offer.order == updated {
          offer.price = new_price.clone();
        }
      }
    })?;

    let market = Arc::clone(&self.market);
    let request = BidUpdateRequest {
      order: order.clone(),
      price,
    };
    self
      .coordinator
      .execute(MutationKind::UpdateBid, target, optimistic, move || async move {
        market.update_bid(&request).await
      })
      .await
  }

  /// Withdraw one of the viewer's bids.
  pub async fn cancel_bid(&self, item: &ItemId, order: &OrderId) -> SyncResult<TradeReceipt> {
    let maker = self.require_wallet()?;

    let target = MutationTarget::new(item.clone(), maker);
    let cancelled = order.clone();
    let optimistic = self.optimistic_state(&target.primary_key(), |state| {
      state.offer = state.offer.take().filter(|offer| offer.order != cancelled);
    })?;

    let market = Arc::clone(&self.market);
    let order = order.clone();
    self
      .coordinator
      .execute(MutationKind::CancelBid, target, optimistic, move || async move {
        market.cancel_order(&order).await
      })
      .await
  }

  /// Accept someone else's bid on an item the viewer holds. No optimistic
  /// patch: the resulting ownership split is not knowable locally, so the
  /// entry updates on the settlement refetch.
  pub async fn accept_bid(&self, item: &ItemId, order: &OrderId) -> SyncResult<TradeReceipt> {
    let seller = self.require_wallet()?;

    let target = MutationTarget::new(item.clone(), seller);
    let market = Arc::clone(&self.market);
    let order = order.clone();
    self
      .coordinator
      .execute(MutationKind::AcceptBid, target, None, move || async move {
        market.accept_bid(&order).await
      })
      .await
  }

  /// Buy an item at its listed sell order.
  pub async fn buy(&self, item: &ItemId, order: &OrderId) -> SyncResult<TradeReceipt> {
    let buyer = self.require_wallet()?;

    let target = MutationTarget::new(item.clone(), buyer.clone());
    let market = Arc::clone(&self.market);
    let request = BuyRequest {
      order: order.clone(),
      buyer,
    };
    self
      .coordinator
      .execute(MutationKind::Buy, target, None, move || async move {
        market.buy(&request).await
      })
      .await
  }

  /// Patch the cached item state for an optimistic write. Absent entry
  /// means nothing to patch, which the coordinator treats as "no
  /// optimistic value".
  fn optimistic_state<F>(&self, key: &QueryKey, patch: F) -> SyncResult<Option<Value>>
  where
    F: FnOnce(&mut ItemMarketState),
  {
    self
      .cache
      .snapshot::<ItemMarketState>(key)
      .map(|mut state| {
        patch(&mut state);
        serde_json::to_value(state).map_err(SyncError::from)
      })
      .transpose()
  }
}

/// Local price check; bad input never reaches the cache or the wire.
fn validate_price(price: &Price) -> SyncResult<()> {
  match price.numeric() {
    Some(amount) if amount > 0.0 => Ok(()),
    _ => Err(SyncError::Validation(format!(
      "bid price must be a positive decimal, got {:?}",
      price.amount
    ))),
  }
}
