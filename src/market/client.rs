//! HTTP implementation of the marketplace client.
//!
//! Listing endpoints are plain GETs with cursor parameters. Order
//! actions are POSTs whose exact JSON body is signed by the connected
//! wallet; the server verifies the signature against the maker address.
//! Actions answered with `status: "pending"` hand back a confirmation
//! that polls the transaction until the chain settles it.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::config::MarketConfig;
use crate::error::{SyncError, SyncResult};
use crate::pager::{Continuation, Page};
use crate::wallet::{Address, WalletConnector};

use super::api_types::{
  ApiBidBody, ApiBidUpdateBody, ApiBuyBody, ApiItem, ApiItemsPage, ApiOrderActionResponse,
  ApiOrdersPage, ApiOwnershipsPage, ApiTxStatus,
};
use super::types::{Bid, CollectionId, Item, ItemId, OrderId, Ownership};
use super::{
  BidRequest, BidUpdateRequest, BuyRequest, Confirmation, MarketClient, TradeOutcome, TradeReceipt,
};

const API_KEY_HEADER: &str = "X-API-KEY";
const SIGNATURE_HEADER: &str = "X-ORDER-SIGNATURE";

pub struct HttpMarketClient {
  http: reqwest::Client,
  base: Url,
  api_key: Option<String>,
  wallet: Arc<dyn WalletConnector>,
  confirm_poll: Duration,
  confirm_attempts: u32,
}

impl HttpMarketClient {
  pub fn new(
    config: &MarketConfig,
    api_key: Option<String>,
    wallet: Arc<dyn WalletConnector>,
  ) -> SyncResult<Self> {
    let mut base_url = config.base_url.clone();
    if !base_url.ends_with('/') {
      base_url.push('/');
    }
    let base = Url::parse(&base_url)
      .map_err(|e| SyncError::Config(format!("invalid market base_url {base_url}: {e}")))?;
    let http = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.request_timeout_secs))
      .build()
      .map_err(|e| SyncError::Config(format!("http client: {e}")))?;

    Ok(Self {
      http,
      base,
      api_key,
      wallet,
      confirm_poll: Duration::from_secs(2),
      confirm_attempts: 150,
    })
  }

  /// Override how the pending-transaction poll paces itself.
  pub fn with_confirm_poll(mut self, interval: Duration, attempts: u32) -> Self {
    self.confirm_poll = interval;
    self.confirm_attempts = attempts;
    self
  }

  fn endpoint(&self, path: &str) -> SyncResult<Url> {
    self
      .base
      .join(path)
      .map_err(|e| SyncError::upstream(format!("bad endpoint {path}: {e}")))
  }

  async fn get_json<T: DeserializeOwned>(
    &self,
    path: &str,
    params: &[(&str, String)],
  ) -> SyncResult<T> {
    let mut url = self.endpoint(path)?;
    if !params.is_empty() {
      let mut pairs = url.query_pairs_mut();
      for (name, value) in params {
        pairs.append_pair(name, value);
      }
    }
    let mut request = self.http.get(url);
    if let Some(key) = &self.api_key {
      request = request.header(API_KEY_HEADER, key);
    }
    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
      return Err(SyncError::UpstreamFetch(format!("GET {path} returned {status}")));
    }
    Ok(response.json().await?)
  }

  async fn post_signed<B: Serialize, T: DeserializeOwned>(
    &self,
    path: &str,
    body: &B,
  ) -> SyncResult<T> {
    let payload = serde_json::to_string(body)?;
    // Sign the exact bytes that go on the wire.
    let signature = self.wallet.sign_message(&payload).await?;
    let url = self.endpoint(path)?;
    let mut request = self
      .http
      .post(url)
      .header(CONTENT_TYPE, "application/json")
      .header(SIGNATURE_HEADER, signature.as_str())
      .body(payload);
    if let Some(key) = &self.api_key {
      request = request.header(API_KEY_HEADER, key);
    }
    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
      return Err(SyncError::UpstreamFetch(format!("POST {path} returned {status}")));
    }
    Ok(response.json().await?)
  }

  fn page_params(cursor: Option<Continuation>, page_size: usize) -> Vec<(&'static str, String)> {
    let mut params = vec![("size", page_size.to_string())];
    if let Some(cursor) = cursor {
      params.push(("continuation", cursor.as_str().to_string()));
    }
    params
  }

  fn outcome_from(&self, response: ApiOrderActionResponse) -> TradeOutcome {
    let receipt = TradeReceipt {
      order: response.order_id.map(OrderId::new),
      tx_hash: response.tx_hash.clone(),
    };
    match (response.status.as_str(), response.tx_hash) {
      ("pending", Some(tx_hash)) => TradeOutcome::Pending {
        receipt,
        confirmation: self.confirmation_for(tx_hash),
      },
      _ => TradeOutcome::Settled(receipt),
    }
  }

  fn confirmation_for(&self, tx_hash: String) -> Confirmation {
    let http = self.http.clone();
    let base = self.base.clone();
    let api_key = self.api_key.clone();
    let interval = self.confirm_poll;
    let attempts = self.confirm_attempts;

    Confirmation::from_future(async move {
      let url = base
        .join(&format!("transactions/{tx_hash}"))
        .map_err(|e| SyncError::upstream(format!("bad tx endpoint: {e}")))?;
      for _ in 0..attempts {
        tokio::time::sleep(interval).await;
        let mut request = http.get(url.clone());
        if let Some(key) = &api_key {
          request = request.header(API_KEY_HEADER, key);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
          return Err(SyncError::UpstreamFetch(format!("tx status returned {status}")));
        }
        let tx: ApiTxStatus = response.json().await?;
        match tx.status.as_str() {
          "confirmed" => {
            debug!(tx = %tx_hash, "transaction confirmed");
            return Ok(());
          }
          "failed" | "reverted" => {
            return Err(SyncError::upstream(format!("transaction {tx_hash} failed on chain")))
          }
          _ => {}
        }
      }
      Err(SyncError::upstream(format!(
        "transaction {tx_hash} unconfirmed after {attempts} checks"
      )))
    })
  }
}

#[async_trait]
impl MarketClient for HttpMarketClient {
  async fn items_by_collection(
    &self,
    collection: &CollectionId,
    cursor: Option<Continuation>,
    page_size: usize,
  ) -> SyncResult<Page<Item>> {
    let mut params = Self::page_params(cursor, page_size);
    params.push(("collection", collection.as_str().to_string()));
    let page: ApiItemsPage = self.get_json("items/byCollection", &params).await?;
    Ok(Page {
      items: page.items.into_iter().map(Item::from).collect(),
      next: page.continuation.map(Continuation::from),
    })
  }

  async fn items_by_owner(
    &self,
    owner: &Address,
    cursor: Option<Continuation>,
    page_size: usize,
  ) -> SyncResult<Page<Item>> {
    let mut params = Self::page_params(cursor, page_size);
    params.push(("owner", owner.as_str().to_string()));
    let page: ApiItemsPage = self.get_json("items/byOwner", &params).await?;
    Ok(Page {
      items: page.items.into_iter().map(Item::from).collect(),
      next: page.continuation.map(Continuation::from),
    })
  }

  async fn item_by_id(&self, item: &ItemId) -> SyncResult<Item> {
    let api_item: ApiItem = self
      .get_json(&format!("items/{}", item.as_str()), &[])
      .await?;
    Ok(api_item.into())
  }

  async fn ownerships_by_item(
    &self,
    item: &ItemId,
    cursor: Option<Continuation>,
    page_size: usize,
  ) -> SyncResult<Page<Ownership>> {
    let mut params = Self::page_params(cursor, page_size);
    params.push(("itemId", item.as_str().to_string()));
    let page: ApiOwnershipsPage = self.get_json("ownerships/byItem", &params).await?;
    Ok(Page {
      items: page.ownerships.into_iter().map(Ownership::from).collect(),
      next: page.continuation.map(Continuation::from),
    })
  }

  async fn bids_by_maker(
    &self,
    maker: &Address,
    cursor: Option<Continuation>,
    page_size: usize,
  ) -> SyncResult<Page<Bid>> {
    let mut params = Self::page_params(cursor, page_size);
    params.push(("maker", maker.as_str().to_string()));
    let page: ApiOrdersPage = self.get_json("orders/bids/byMaker", &params).await?;
    Ok(Page {
      items: page.orders.into_iter().map(Bid::from).collect(),
      next: page.continuation.map(Continuation::from),
    })
  }

  async fn bids_by_item(
    &self,
    item: &ItemId,
    cursor: Option<Continuation>,
    page_size: usize,
  ) -> SyncResult<Page<Bid>> {
    let mut params = Self::page_params(cursor, page_size);
    params.push(("itemId", item.as_str().to_string()));
    let page: ApiOrdersPage = self.get_json("orders/bids/byItem", &params).await?;
    Ok(Page {
      items: page.orders.into_iter().map(Bid::from).collect(),
      next: page.continuation.map(Continuation::from),
    })
  }

  async fn place_bid(&self, request: &BidRequest) -> SyncResult<TradeOutcome> {
    debug!(item = %request.item, price = %request.price, "placing bid");
    let body = ApiBidBody {
      item_id: request.item.as_str().to_string(),
      maker: request.maker.as_str().to_string(),
      price: request.price.clone().into(),
    };
    let response: ApiOrderActionResponse = self.post_signed("orders/bids", &body).await?;
    Ok(self.outcome_from(response))
  }

  async fn update_bid(&self, request: &BidUpdateRequest) -> SyncResult<TradeOutcome> {
    debug!(order = %request.order, price = %request.price, "updating bid");
    let body = ApiBidUpdateBody {
      price: request.price.clone().into(),
    };
    let response: ApiOrderActionResponse = self
      .post_signed(&format!("orders/bids/{}/update", request.order.as_str()), &body)
      .await?;
    Ok(self.outcome_from(response))
  }

  async fn cancel_order(&self, order: &OrderId) -> SyncResult<TradeOutcome> {
    debug!(order = %order, "cancelling order");
    let response: ApiOrderActionResponse = self
      .post_signed(
        &format!("orders/{}/cancel", order.as_str()),
        &serde_json::json!({}),
      )
      .await?;
    Ok(self.outcome_from(response))
  }

  async fn accept_bid(&self, order: &OrderId) -> SyncResult<TradeOutcome> {
    debug!(order = %order, "accepting bid");
    let response: ApiOrderActionResponse = self
      .post_signed(
        &format!("orders/{}/accept", order.as_str()),
        &serde_json::json!({}),
      )
      .await?;
    Ok(self.outcome_from(response))
  }

  async fn buy(&self, request: &BuyRequest) -> SyncResult<TradeOutcome> {
    debug!(order = %request.order, "buying");
    let body = ApiBuyBody {
      buyer: request.buyer.as_str().to_string(),
    };
    let response: ApiOrderActionResponse = self
      .post_signed(&format!("orders/{}/buy", request.order.as_str()), &body)
      .await?;
    Ok(self.outcome_from(response))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::wallet::OfflineWallet;

  fn test_config(base_url: &str) -> MarketConfig {
    MarketConfig {
      base_url: base_url.to_string(),
      api_key: None,
      page_size: 50,
      request_timeout_secs: 5,
    }
  }

  fn test_client(base_url: &str) -> SyncResult<HttpMarketClient> {
    let wallet = Arc::new(OfflineWallet::connected(Address::new("0xabc")));
    HttpMarketClient::new(&test_config(base_url), None, wallet)
  }

  #[test]
  fn test_base_url_gains_trailing_slash() {
    let client = test_client("https://api.example-market.io/v0.1").unwrap();
    let url = client.endpoint("items/byCollection").unwrap();
    assert_eq!(
      url.as_str(),
      "https://api.example-market.io/v0.1/items/byCollection"
    );
  }

  #[test]
  fn test_invalid_base_url_is_a_config_error() {
    let result = test_client("not a url");
    assert!(matches!(result, Err(SyncError::Config(_))));
  }

  #[test]
  fn test_page_params_thread_the_cursor() {
    let first = HttpMarketClient::page_params(None, 50);
    assert_eq!(first, vec![("size", "50".to_string())]);

    let later = HttpMarketClient::page_params(Some(Continuation::new("c1")), 25);
    assert_eq!(
      later,
      vec![("size", "25".to_string()), ("continuation", "c1".to_string())]
    );
  }

  #[test]
  fn test_outcome_mapping_pending_vs_settled() {
    let client = test_client("https://api.example-market.io/v0.1").unwrap();

    let settled = client.outcome_from(ApiOrderActionResponse {
      order_id: Some("o1".to_string()),
      tx_hash: None,
      status: "settled".to_string(),
    });
    assert!(matches!(settled, TradeOutcome::Settled(_)));
    assert_eq!(settled.receipt().order, Some(OrderId::new("o1")));

    let pending = client.outcome_from(ApiOrderActionResponse {
      order_id: Some("o2".to_string()),
      tx_hash: Some("0xdeadbeef".to_string()),
      status: "pending".to_string(),
    });
    assert!(matches!(pending, TradeOutcome::Pending { .. }));
    assert_eq!(pending.receipt().tx_hash.as_deref(), Some("0xdeadbeef"));
  }
}
