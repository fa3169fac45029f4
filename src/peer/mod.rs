//! Peer-host RPC contract.
//!
//! The peer host is a personal server the user runs elsewhere; it speaks
//! a four-verb RPC surface. `scry` is a one-shot read, `poke` a
//! fire-and-forget command, and `subscribe`/`unsubscribe` manage
//! persistent push channels addressed by agent app and path. This crate
//! only consumes that surface; transports implement [`PeerTransport`]
//! and deliver pushed events through a channel.

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use tokio::sync::mpsc;

use crate::error::SyncResult;

/// Identity the peer host answers as, e.g. `~sampel-palnet`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct PeerIdentity(String);

impl PeerIdentity {
  pub fn new(name: impl Into<String>) -> Self {
    Self(name.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for PeerIdentity {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// One push channel on the peer host: an agent app plus a path within it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic {
  app: String,
  path: String,
}

impl Topic {
  pub fn new(app: impl Into<String>, path: impl Into<String>) -> Self {
    Self {
      app: app.into(),
      path: path.into(),
    }
  }

  pub fn app(&self) -> &str {
    &self.app
  }

  pub fn path(&self) -> &str {
    &self.path
  }
}

impl fmt::Display for Topic {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}{}", self.app, self.path)
  }
}

/// Server-assigned handle for one acknowledged subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "sub-{}", self.0)
  }
}

/// One pushed delta. The payload shape belongs to the emitting agent;
/// the sync layer never interprets it, it only reacts to arrival.
#[derive(Debug, Clone)]
pub struct RemoteEvent {
  pub payload: Value,
}

impl RemoteEvent {
  pub fn new(payload: Value) -> Self {
    Self { payload }
  }
}

pub type EventReceiver = mpsc::UnboundedReceiver<RemoteEvent>;

/// Transport to the peer host.
///
/// `subscribe` resolves once the host acknowledges the channel, handing
/// back the id needed for `unsubscribe` and the receiving end of the
/// event feed. The feed closes when the host drops the channel.
#[async_trait]
pub trait PeerTransport: Send + Sync {
  async fn scry(&self, app: &str, path: &str) -> SyncResult<Value>;

  async fn subscribe(&self, topic: &Topic) -> SyncResult<(SubscriptionId, EventReceiver)>;

  async fn unsubscribe(&self, id: SubscriptionId) -> SyncResult<()>;

  async fn poke(&self, app: &str, mark: &str, payload: Value) -> SyncResult<()>;
}
