//! Wallet connector contract.
//!
//! The wallet is an external provider: it owns the private key, exposes
//! the connected address, and signs messages on request. Signing and
//! connection can both be refused by the user, which surfaces as
//! [`SyncError::Wallet`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{SyncError, SyncResult};

/// Account address. Normalized to lowercase so checksummed and plain
/// spellings of the same account compare equal and build the same cache
/// keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address(String);

impl Address {
  pub fn new(address: impl Into<String>) -> Self {
    Self(address.into().to_ascii_lowercase())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for Address {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature(String);

impl Signature {
  pub fn new(signature: impl Into<String>) -> Self {
    Self(signature.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for Signature {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

#[async_trait]
pub trait WalletConnector: Send + Sync {
  /// Prompt the provider for a connection; resolves to the account the
  /// user approved.
  async fn connect(&self) -> SyncResult<Address>;

  async fn disconnect(&self) -> SyncResult<()>;

  /// Currently connected account, if any.
  fn address(&self) -> Option<Address>;

  fn is_connected(&self) -> bool {
    self.address().is_some()
  }

  async fn sign_message(&self, message: &str) -> SyncResult<Signature>;
}

/// Deterministic signer for tests and offline development.
///
/// Signatures are a hex digest over the address and message, stable
/// across runs, with no provider round-trip and nothing resembling a
/// real key.
pub struct OfflineWallet {
  address: Address,
  connected: AtomicBool,
}

impl OfflineWallet {
  pub fn new(address: Address) -> Self {
    Self {
      address,
      connected: AtomicBool::new(false),
    }
  }

  pub fn connected(address: Address) -> Self {
    Self {
      address,
      connected: AtomicBool::new(true),
    }
  }
}

#[async_trait]
impl WalletConnector for OfflineWallet {
  async fn connect(&self) -> SyncResult<Address> {
    self.connected.store(true, Ordering::SeqCst);
    Ok(self.address.clone())
  }

  async fn disconnect(&self) -> SyncResult<()> {
    self.connected.store(false, Ordering::SeqCst);
    Ok(())
  }

  fn address(&self) -> Option<Address> {
    if self.connected.load(Ordering::SeqCst) {
      Some(self.address.clone())
    } else {
      None
    }
  }

  async fn sign_message(&self, message: &str) -> SyncResult<Signature> {
    if !self.is_connected() {
      return Err(SyncError::Wallet("wallet not connected".to_string()));
    }
    let mut hasher = Sha256::new();
    hasher.update(self.address.as_str().as_bytes());
    hasher.update([0x1f]);
    hasher.update(message.as_bytes());
    let digest = hex::encode(hasher.finalize());
    Ok(Signature::new(format!("0x{digest}")))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_address_normalizes_case() {
    let a = Address::new("0xAbCd");
    let b = Address::new("0xabcd");
    assert_eq!(a, b);
    assert_eq!(a.as_str(), "0xabcd");
  }

  #[tokio::test]
  async fn test_connect_exposes_address() {
    let wallet = OfflineWallet::new(Address::new("0xabc"));
    assert!(!wallet.is_connected());
    assert!(wallet.address().is_none());

    let address = wallet.connect().await.unwrap();
    assert_eq!(address, Address::new("0xabc"));
    assert!(wallet.is_connected());

    wallet.disconnect().await.unwrap();
    assert!(wallet.address().is_none());
  }

  #[tokio::test]
  async fn test_signatures_are_deterministic_per_message() {
    let wallet = OfflineWallet::connected(Address::new("0xabc"));
    let first = wallet.sign_message("hello").await.unwrap();
    let again = wallet.sign_message("hello").await.unwrap();
    let other = wallet.sign_message("world").await.unwrap();

    assert_eq!(first, again);
    assert_ne!(first, other);
    assert!(first.as_str().starts_with("0x"));
  }

  #[tokio::test]
  async fn test_signing_requires_connection() {
    let wallet = OfflineWallet::new(Address::new("0xabc"));
    let err = wallet.sign_message("hello").await.unwrap_err();
    assert!(matches!(err, SyncError::Wallet(_)));
  }
}
