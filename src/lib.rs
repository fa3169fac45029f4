//! Subscription-synchronized data layer for NFT marketplace clients.
//!
//! The layer keeps a keyed request/response cache ([`query::QueryCache`])
//! in step with a remote marketplace: a push-event bridge
//! ([`bridge::EventBridge`]) turns peer-host notifications into debounced
//! invalidations, a pagination flattener ([`pager::drain`]) assembles
//! complete listings from cursor-paged endpoints, and a mutation
//! coordinator ([`mutation::MutationCoordinator`]) wraps order actions
//! with optimistic writes, exact rollback, and settlement fan-out.
//! [`session::Session`] wires the parts together for one user session.

pub mod bridge;
pub mod config;
pub mod error;
pub mod market;
pub mod mutation;
pub mod pager;
pub mod peer;
pub mod query;
pub mod session;
pub mod store;
pub mod wallet;

pub use error::{SyncError, SyncResult};
pub use session::Session;
