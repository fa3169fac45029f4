//! Mutation coordination: optimistic writes, exact rollback, and the
//! settlement invalidation fan-out.
//!
//! Every order action runs through [`MutationCoordinator::execute`],
//! which walks one invocation through pending, success or error, and
//! settled. Entering pending aborts any in-flight fetch for the target
//! entry, snapshots it, and applies the caller's optimistic value so
//! readers see the intent synchronously. Failure restores the snapshot
//! verbatim. Settlement always runs exactly once, on success and on
//! failure alike, invalidating the key set the mutation kind declares.

use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::SyncResult;
use crate::market::keys;
use crate::market::{ItemId, TradeOutcome, TradeReceipt};
use crate::query::{QueryCache, QueryKey};
use crate::wallet::Address;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
  PlaceBid,
  UpdateBid,
  CancelBid,
  AcceptBid,
  Buy,
}

/// Phases of one mutation invocation, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
  Pending,
  Success,
  Error,
  Settled,
}

/// The item an action targets and the wallet performing it. Together
/// they determine the primary cache entry and the settlement scope.
#[derive(Debug, Clone)]
pub struct MutationTarget {
  pub item: ItemId,
  pub viewer: Address,
}

impl MutationTarget {
  pub fn new(item: ItemId, viewer: Address) -> Self {
    Self { item, viewer }
  }

  /// The entry that receives the optimistic write and the rollback.
  pub fn primary_key(&self) -> QueryKey {
    keys::item_state(&self.item, Some(&self.viewer))
  }
}

impl MutationKind {
  /// Which cached reads a settled mutation can have perturbed.
  ///
  /// The mapping is declared here, kind by kind, rather than inferred:
  /// every kind touches the item's state family and the bid listings it
  /// belongs to; ownership-transferring kinds additionally touch the
  /// viewer's holdings and the item's ownership roster.
  pub fn settlement_scope(&self, target: &MutationTarget) -> Vec<QueryKey> {
    let bid_scope = vec![
      keys::item_state_prefix(&target.item),
      keys::bids_by_item(&target.item),
      keys::bids_by_maker(&target.viewer),
    ];
    match self {
      MutationKind::PlaceBid | MutationKind::UpdateBid | MutationKind::CancelBid => bid_scope,
      MutationKind::AcceptBid | MutationKind::Buy => {
        let mut scope = bid_scope;
        scope.push(keys::items_by_owner(&target.viewer));
        scope.push(keys::ownerships_by_item(&target.item));
        scope
      }
    }
  }
}

pub struct MutationCoordinator {
  cache: QueryCache,
  settlement_lag: Duration,
}

impl MutationCoordinator {
  pub fn new(cache: QueryCache, settlement_lag: Duration) -> Self {
    Self {
      cache,
      settlement_lag,
    }
  }

  /// Run one order action against the cache.
  ///
  /// `optimistic`, when given, is written to the target's primary entry
  /// before `op` is even called. `op` performs the upstream call. On
  /// error the primary entry is restored to its pre-mutation value and
  /// the error is returned after the settlement fan-out. An outcome that
  /// is pending on-chain confirmation is awaited; a confirmation failure
  /// is logged and settlement proceeds with the receipt already in hand.
  /// The settlement lag then holds the fan-out back long enough for the
  /// upstream read replica to catch up.
  pub async fn execute<F, Fut>(
    &self,
    kind: MutationKind,
    target: MutationTarget,
    optimistic: Option<Value>,
    op: F,
  ) -> SyncResult<TradeReceipt>
  where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = SyncResult<TradeOutcome>>,
  {
    let primary = target.primary_key();
    debug!(?kind, item = %target.item, phase = ?Phase::Pending, "mutation started");

    self.cache.abort_fetch(&primary);
    let snapshot = self.cache.snapshot_value(&primary);
    if let Some(value) = &optimistic {
      self.cache.write(&primary, value)?;
    }

    let outcome = match op().await {
      Ok(outcome) => outcome,
      Err(err) => {
        debug!(?kind, item = %target.item, phase = ?Phase::Error, error = %err, "mutation failed");
        self.cache.rollback(&primary, snapshot, &err);
        self.settle(kind, &target);
        return Err(err);
      }
    };

    let receipt = match outcome {
      TradeOutcome::Settled(receipt) => receipt,
      TradeOutcome::Pending { receipt, confirmation } => {
        if let Err(err) = confirmation.wait().await {
          warn!(?kind, error = %err, "confirmation wait failed; settling with known result");
        }
        if !self.settlement_lag.is_zero() {
          debug!(lag = ?self.settlement_lag, "holding settlement for read-replica lag");
          tokio::time::sleep(self.settlement_lag).await;
        }
        receipt
      }
    };

    debug!(?kind, item = %target.item, phase = ?Phase::Success, "mutation succeeded");
    self.settle(kind, &target);
    Ok(receipt)
  }

  fn settle(&self, kind: MutationKind, target: &MutationTarget) {
    let scope = kind.settlement_scope(target);
    debug!(?kind, keys = scope.len(), phase = ?Phase::Settled, "settlement fan-out");
    for key in &scope {
      self.cache.invalidate(key);
    }
  }
}
