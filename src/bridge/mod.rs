//! Remote event bridge: push subscriptions in, debounced invalidations out.
//!
//! Each bound topic holds at most one live subscription for the whole
//! session. Binding registers the topic synchronously in a provisional
//! pending state before the subscribe round-trip starts, so concurrent
//! binds for the same topic converge on one subscription instead of
//! racing. Every acknowledged binding gets a pump task reading its event
//! feed and a debouncer collapsing bursts into a leading and a trailing
//! cache invalidation of the bound key prefix.
//!
//! Bindings are epoch-stamped. An acknowledgement that arrives after its
//! binding was torn down is recognized by epoch mismatch and discarded,
//! and the handle it carries is unsubscribed so the host does not keep
//! feeding a channel nobody reads.

mod debounce;

pub use debounce::Debouncer;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::SyncResult;
use crate::peer::{EventReceiver, PeerTransport, SubscriptionId, Topic};
use crate::query::{QueryCache, QueryKey};

enum Binding {
  /// Subscribe request issued, acknowledgement still in flight.
  Pending { epoch: u64 },
  Active {
    epoch: u64,
    id: SubscriptionId,
    prefix: QueryKey,
    debouncer: Debouncer,
    pump: JoinHandle<()>,
  },
}

impl Binding {
  fn epoch(&self) -> u64 {
    match self {
      Binding::Pending { epoch } => *epoch,
      Binding::Active { epoch, .. } => *epoch,
    }
  }
}

#[derive(Default)]
struct Registry {
  bindings: HashMap<Topic, Binding>,
  next_epoch: u64,
}

pub struct EventBridge {
  cache: QueryCache,
  transport: Arc<dyn PeerTransport>,
  window: Duration,
  registry: Mutex<Registry>,
}

impl EventBridge {
  pub fn new(cache: QueryCache, transport: Arc<dyn PeerTransport>, window: Duration) -> Self {
    Self {
      cache,
      transport,
      window,
      registry: Mutex::new(Registry::default()),
    }
  }

  fn lock_registry(&self) -> MutexGuard<'_, Registry> {
    self.registry.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Bind `topic` so its pushed events invalidate every cache key under
  /// `prefix`.
  ///
  /// The first call for a topic subscribes and resolves once the host
  /// acknowledges; a subscribe failure is returned to that caller and the
  /// binding is discarded. Any later call for an already pending or
  /// active topic returns at once without touching the host.
  pub async fn bind(&self, topic: Topic, prefix: QueryKey) -> SyncResult<()> {
    let epoch = {
      let mut registry = self.lock_registry();
      if registry.bindings.contains_key(&topic) {
        return Ok(());
      }
      registry.next_epoch += 1;
      let epoch = registry.next_epoch;
      registry.bindings.insert(topic.clone(), Binding::Pending { epoch });
      epoch
    };
    debug!(topic = %topic, prefix = %prefix, epoch, "subscribing");

    match self.transport.subscribe(&topic).await {
      Ok((id, events)) => {
        {
          let mut registry = self.lock_registry();
          if registry.bindings.get(&topic).map(Binding::epoch) == Some(epoch) {
            let debouncer = Debouncer::spawn(self.window, {
              let cache = self.cache.clone();
              let prefix = prefix.clone();
              move || {
                debug!(prefix = %prefix, "remote-event invalidation");
                cache.invalidate(&prefix);
              }
            });
            let pump = spawn_pump(topic.clone(), events, debouncer.clone());
            registry.bindings.insert(
              topic,
              Binding::Active {
                epoch,
                id,
                prefix,
                debouncer,
                pump,
              },
            );
            return Ok(());
          }
        }
        // Torn down while the acknowledgement was in flight. The handle
        // must never invalidate anything, and the host-side channel is
        // closed so it stops feeding us.
        warn!(topic = %topic, %id, "acknowledgement for torn-down binding");
        if let Err(err) = self.transport.unsubscribe(id).await {
          warn!(topic = %topic, error = %err, "cleanup unsubscribe failed");
        }
        Ok(())
      }
      Err(err) => {
        let mut registry = self.lock_registry();
        if registry.bindings.get(&topic).map(Binding::epoch) == Some(epoch) {
          registry.bindings.remove(&topic);
        }
        Err(err)
      }
    }
  }

  /// Tear down the binding for `topic`: stop its pump, discard any
  /// pending trailing invalidation, and unsubscribe from the host.
  /// Unbinding a topic that was never bound is a no-op.
  pub async fn unbind(&self, topic: &Topic) -> SyncResult<()> {
    let removed = self.lock_registry().bindings.remove(topic);
    match removed {
      None => Ok(()),
      Some(Binding::Pending { .. }) => {
        // The acknowledgement path sees the missing epoch and cleans up
        // host-side once the handle arrives.
        debug!(topic = %topic, "cancelled pending subscription");
        Ok(())
      }
      Some(Binding::Active { id, prefix, pump, debouncer, .. }) => {
        pump.abort();
        drop(debouncer);
        debug!(topic = %topic, %id, prefix = %prefix, "unsubscribing");
        self.transport.unsubscribe(id).await
      }
    }
  }

  pub fn is_bound(&self, topic: &Topic) -> bool {
    self.lock_registry().bindings.contains_key(topic)
  }

  pub fn binding_count(&self) -> usize {
    self.lock_registry().bindings.len()
  }

  /// Unbind every topic. Host-side failures are logged and do not stop
  /// the sweep.
  pub async fn shutdown(&self) {
    let topics: Vec<Topic> = self.lock_registry().bindings.keys().cloned().collect();
    for topic in topics {
      if let Err(err) = self.unbind(&topic).await {
        warn!(topic = %topic, error = %err, "unsubscribe during shutdown failed");
      }
    }
  }
}

fn spawn_pump(topic: Topic, mut events: EventReceiver, debouncer: Debouncer) -> JoinHandle<()> {
  tokio::spawn(async move {
    while let Some(event) = events.recv().await {
      trace!(topic = %topic, payload = %event.payload, "remote event");
      debouncer.observe();
    }
    debug!(topic = %topic, "event feed closed");
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::SyncError;
  use crate::peer::RemoteEvent;
  use crate::query::ReadOptions;
  use async_trait::async_trait;
  use serde_json::{json, Value};
  use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
  use tokio::sync::mpsc;

  const WINDOW: Duration = Duration::from_millis(300);

  struct FakeTransport {
    subscribes: AtomicU32,
    unsubscribes: AtomicU32,
    next_id: AtomicU64,
    ack_delay: Option<Duration>,
    fail_subscribe: AtomicBool,
    feeds: Mutex<HashMap<String, mpsc::UnboundedSender<RemoteEvent>>>,
  }

  impl FakeTransport {
    fn new() -> Arc<Self> {
      Self::with_ack_delay(None)
    }

    fn with_ack_delay(delay: Option<Duration>) -> Arc<Self> {
      Arc::new(Self {
        subscribes: AtomicU32::new(0),
        unsubscribes: AtomicU32::new(0),
        next_id: AtomicU64::new(1),
        ack_delay: delay,
        fail_subscribe: AtomicBool::new(false),
        feeds: Mutex::new(HashMap::new()),
      })
    }

    fn push(&self, topic: &Topic) {
      let feeds = self.feeds.lock().unwrap();
      if let Some(tx) = feeds.get(&topic.to_string()) {
        let _ = tx.send(RemoteEvent::new(json!({ "delta": "changed" })));
      }
    }
  }

  #[async_trait]
  impl PeerTransport for FakeTransport {
    async fn scry(&self, _app: &str, _path: &str) -> SyncResult<Value> {
      Ok(Value::Null)
    }

    async fn subscribe(&self, topic: &Topic) -> SyncResult<(SubscriptionId, EventReceiver)> {
      self.subscribes.fetch_add(1, Ordering::SeqCst);
      if let Some(delay) = self.ack_delay {
        tokio::time::sleep(delay).await;
      }
      if self.fail_subscribe.load(Ordering::SeqCst) {
        return Err(SyncError::Subscription(format!("host refused {}", topic)));
      }
      let (tx, rx) = mpsc::unbounded_channel();
      self.feeds.lock().unwrap().insert(topic.to_string(), tx);
      let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
      Ok((id, rx))
    }

    async fn unsubscribe(&self, _id: SubscriptionId) -> SyncResult<()> {
      self.unsubscribes.fetch_add(1, Ordering::SeqCst);
      Ok(())
    }

    async fn poke(&self, _app: &str, _mark: &str, _payload: Value) -> SyncResult<()> {
      Ok(())
    }
  }

  fn bridge_with(transport: Arc<FakeTransport>) -> (EventBridge, QueryCache) {
    let cache = QueryCache::new();
    let bridge = EventBridge::new(cache.clone(), transport, WINDOW);
    (bridge, cache)
  }

  async fn tick() {
    tokio::time::sleep(Duration::from_millis(5)).await;
  }

  #[tokio::test(start_paused = true)]
  async fn test_concurrent_binds_converge_on_one_subscription() {
    let transport = FakeTransport::with_ack_delay(Some(Duration::from_millis(50)));
    let (bridge, _cache) = bridge_with(transport.clone());
    let topic = Topic::new("exchange", "/bids");
    let prefix = QueryKey::new("bids");

    let (a, b) = tokio::join!(
      bridge.bind(topic.clone(), prefix.clone()),
      bridge.bind(topic.clone(), prefix)
    );
    a.unwrap();
    b.unwrap();

    assert_eq!(transport.subscribes.load(Ordering::SeqCst), 1);
    assert!(bridge.is_bound(&topic));
  }

  #[tokio::test(start_paused = true)]
  async fn test_rebinding_active_topic_is_a_no_op() {
    let transport = FakeTransport::new();
    let (bridge, _cache) = bridge_with(transport.clone());
    let topic = Topic::new("exchange", "/bids");

    bridge.bind(topic.clone(), QueryKey::new("bids")).await.unwrap();
    bridge.bind(topic.clone(), QueryKey::new("bids")).await.unwrap();

    assert_eq!(transport.subscribes.load(Ordering::SeqCst), 1);
    assert_eq!(bridge.binding_count(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_event_invalidates_bound_prefix() {
    let transport = FakeTransport::new();
    let (bridge, cache) = bridge_with(transport.clone());
    let topic = Topic::new("exchange", "/bids/item-7");
    let key = QueryKey::new("bids").with("by-item").with("item-7");
    cache.write(&key, &vec![1u32, 2]).unwrap();

    bridge.bind(topic.clone(), QueryKey::new("bids")).await.unwrap();
    transport.push(&topic);
    tick().await;

    let view = cache.peek::<Vec<u32>>(&key).unwrap();
    assert_eq!(view.status, crate::query::QueryStatus::Stale);
  }

  #[tokio::test(start_paused = true)]
  async fn test_burst_invalidates_leading_and_trailing_only() {
    let transport = FakeTransport::new();
    let (bridge, cache) = bridge_with(transport.clone());
    let topic = Topic::new("exchange", "/bids/item-7");
    let key = QueryKey::new("bids").with("by-item").with("item-7");

    let fetches = Arc::new(AtomicU32::new(0));
    let fetcher = {
      let fetches = Arc::clone(&fetches);
      move || {
        fetches.fetch_add(1, Ordering::SeqCst);
        futures::future::ready(Ok::<_, SyncError>(vec![1u32]))
      }
    };
    cache.read::<Vec<u32>, _, _>(&key, ReadOptions::default(), fetcher).await;
    assert_eq!(fetches.load(Ordering::SeqCst), 1);

    bridge.bind(topic.clone(), key.clone()).await.unwrap();

    transport.push(&topic);
    tick().await;
    assert_eq!(fetches.load(Ordering::SeqCst), 2, "leading refetch");

    transport.push(&topic);
    tick().await;
    transport.push(&topic);
    tick().await;

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(fetches.load(Ordering::SeqCst), 3, "one trailing refetch");

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(fetches.load(Ordering::SeqCst), 3);
  }

  #[tokio::test(start_paused = true)]
  async fn test_unbind_stops_invalidation_flow() {
    let transport = FakeTransport::new();
    let (bridge, cache) = bridge_with(transport.clone());
    let topic = Topic::new("exchange", "/bids/item-7");
    let key = QueryKey::new("bids").with("by-item").with("item-7");
    cache.write(&key, &1u32).unwrap();

    bridge.bind(topic.clone(), QueryKey::new("bids")).await.unwrap();
    bridge.unbind(&topic).await.unwrap();

    assert!(!bridge.is_bound(&topic));
    assert_eq!(transport.unsubscribes.load(Ordering::SeqCst), 1);

    transport.push(&topic);
    tokio::time::sleep(Duration::from_secs(1)).await;
    let view = cache.peek::<u32>(&key).unwrap();
    assert!(view.is_fresh());
  }

  #[tokio::test(start_paused = true)]
  async fn test_ack_after_unbind_is_discarded_and_cleaned_up() {
    let transport = FakeTransport::with_ack_delay(Some(Duration::from_millis(100)));
    let (bridge, cache) = bridge_with(transport.clone());
    let bridge = Arc::new(bridge);
    let topic = Topic::new("exchange", "/bids");
    let key = QueryKey::new("bids").with("all");
    cache.write(&key, &1u32).unwrap();

    let binding = {
      let bridge = Arc::clone(&bridge);
      let topic = topic.clone();
      tokio::spawn(async move { bridge.bind(topic, QueryKey::new("bids")).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(bridge.is_bound(&topic), "provisional binding registered before ack");

    bridge.unbind(&topic).await.unwrap();
    binding.await.unwrap().unwrap();

    assert!(!bridge.is_bound(&topic));
    assert_eq!(transport.subscribes.load(Ordering::SeqCst), 1);
    assert_eq!(transport.unsubscribes.load(Ordering::SeqCst), 1);

    transport.push(&topic);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(cache.peek::<u32>(&key).unwrap().is_fresh());
  }

  #[tokio::test(start_paused = true)]
  async fn test_subscribe_failure_surfaces_and_allows_retry() {
    let transport = FakeTransport::new();
    transport.fail_subscribe.store(true, Ordering::SeqCst);
    let (bridge, _cache) = bridge_with(transport.clone());
    let topic = Topic::new("exchange", "/bids");

    let err = bridge
      .bind(topic.clone(), QueryKey::new("bids"))
      .await
      .unwrap_err();
    assert!(matches!(err, SyncError::Subscription(_)));
    assert!(!bridge.is_bound(&topic));

    transport.fail_subscribe.store(false, Ordering::SeqCst);
    bridge.bind(topic.clone(), QueryKey::new("bids")).await.unwrap();
    assert!(bridge.is_bound(&topic));
    assert_eq!(transport.subscribes.load(Ordering::SeqCst), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_rebind_after_unbind_uses_fresh_feed() {
    let transport = FakeTransport::new();
    let (bridge, cache) = bridge_with(transport.clone());
    let topic = Topic::new("exchange", "/items");
    let key = QueryKey::new("items").with("by-collection").with("c1");
    cache.write(&key, &1u32).unwrap();

    bridge.bind(topic.clone(), QueryKey::new("items")).await.unwrap();
    bridge.unbind(&topic).await.unwrap();
    bridge.bind(topic.clone(), QueryKey::new("items")).await.unwrap();
    assert_eq!(transport.subscribes.load(Ordering::SeqCst), 2);

    transport.push(&topic);
    tick().await;
    let view = cache.peek::<u32>(&key).unwrap();
    assert_eq!(view.status, crate::query::QueryStatus::Stale);
  }

  #[tokio::test(start_paused = true)]
  async fn test_shutdown_unbinds_everything() {
    let transport = FakeTransport::new();
    let (bridge, _cache) = bridge_with(transport.clone());

    bridge
      .bind(Topic::new("exchange", "/bids"), QueryKey::new("bids"))
      .await
      .unwrap();
    bridge
      .bind(Topic::new("exchange", "/items"), QueryKey::new("items"))
      .await
      .unwrap();
    assert_eq!(bridge.binding_count(), 2);

    bridge.shutdown().await;
    assert_eq!(bridge.binding_count(), 0);
    assert_eq!(transport.unsubscribes.load(Ordering::SeqCst), 2);
  }
}
