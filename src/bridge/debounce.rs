//! Leading-plus-trailing debounce for remote event bursts.
//!
//! Remote deltas arrive in bursts during settlement churn. Each bound
//! topic routes its events through one [`Debouncer`], which fires its
//! action immediately on the first event of a burst, swallows the rest,
//! and fires once more one window after the last event, so consumers see
//! the earliest possible refresh and the final state without the
//! flapping in between.
//!
//! The machine is state-first rather than timer-first: every transition
//! is written out below. An event already queued when the window expires
//! still belongs to the burst, so it extends the window instead of
//! opening a new one.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::time::Instant;
use tracing::trace;

/// Where a debouncer sits between bursts.
///
/// `Idle` --event--> fire now, `LeadingFired`
/// `LeadingFired` --event--> `TrailingPending` (window restarts)
/// `LeadingFired` --window expiry--> `Idle` (lone event, no second fire)
/// `TrailingPending` --event--> `TrailingPending` (window restarts)
/// `TrailingPending` --window expiry--> fire now, `Idle`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DebounceState {
  Idle,
  LeadingFired,
  TrailingPending,
}

/// Handle feeding events into one spawned debounce loop. Dropping every
/// handle stops the loop; a trailing fire still pending at that point is
/// discarded, since teardown means nobody is watching the result.
#[derive(Clone)]
pub struct Debouncer {
  tx: mpsc::UnboundedSender<()>,
}

impl Debouncer {
  /// Spawn a debounce loop that invokes `on_fire` per the machine above.
  pub fn spawn<F>(window: Duration, mut on_fire: F) -> Self
  where
    F: FnMut() + Send + 'static,
  {
    let (tx, mut rx) = mpsc::unbounded_channel::<()>();

    tokio::spawn(async move {
      let mut state = DebounceState::Idle;
      let mut deadline = Instant::now();

      loop {
        match state {
          DebounceState::Idle => match rx.recv().await {
            Some(()) => {
              on_fire();
              state = DebounceState::LeadingFired;
              deadline = Instant::now() + window;
              trace!("leading fire");
            }
            None => break,
          },
          DebounceState::LeadingFired | DebounceState::TrailingPending => {
            tokio::select! {
              biased;
              _ = tokio::time::sleep_until(deadline) => {
                // An event queued before the expiry was observed is part
                // of the burst: consume it and keep the window open.
                match rx.try_recv() {
                  Ok(()) => {
                    state = DebounceState::TrailingPending;
                    deadline = Instant::now() + window;
                  }
                  Err(TryRecvError::Empty) => {
                    if state == DebounceState::TrailingPending {
                      on_fire();
                      trace!("trailing fire");
                    }
                    state = DebounceState::Idle;
                  }
                  Err(TryRecvError::Disconnected) => break,
                }
              }
              event = rx.recv() => match event {
                Some(()) => {
                  state = DebounceState::TrailingPending;
                  deadline = Instant::now() + window;
                }
                None => break,
              },
            }
          }
        }
      }
    });

    Self { tx }
  }

  /// Feed one event into the window. Events after shutdown are dropped.
  pub fn observe(&self) {
    let _ = self.tx.send(());
  }
}
