//! Ledger primitives: transaction ids, tags, token amounts and signing.
//!
//! Everything that crosses the wire to a gateway lives under this module.
//! Binary values are carried as base64url without padding.

pub mod client;
pub mod data_item;
pub mod merkle;
pub mod tags;
pub mod transaction;

use crate::error::{Result, SyncError};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

pub use client::{GatewayClient, LedgerClient, RequestError, TxStatus};
pub use data_item::DataItem;
pub use tags::{EntityTags, TagBuilder};
pub use transaction::{SignedTransaction, TransactionDraft, TransactionHeader};

pub fn b64url(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn b64url_decode(text: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(text)
        .map_err(|e| SyncError::malformed("base64url value", e.to_string()))
}

pub(crate) fn sha256(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

// =============================================================================
// Transaction ids
// =============================================================================

/// 32-byte ledger id, rendered as 43 base64url characters.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TxId([u8; 32]);

impl TxId {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Ids are the SHA-256 of the signature.
    pub fn from_signature(signature: &[u8]) -> Self {
        Self(sha256(&[signature]))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&b64url(&self.0))
    }
}

impl fmt::Debug for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxId({})", self)
    }
}

impl FromStr for TxId {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        let raw = b64url_decode(s)?;
        let bytes: [u8; 32] = raw
            .try_into()
            .map_err(|v: Vec<u8>| SyncError::malformed("transaction id", format!("{} bytes", v.len())))?;
        Ok(Self(bytes))
    }
}

impl Serialize for TxId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for TxId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Tags
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    pub value: String,
}

impl Tag {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

// =============================================================================
// Token amounts
// =============================================================================

pub const WINSTON_PER_AR: u64 = 1_000_000_000_000;

/// Smallest token unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Winston(pub u64);

impl Winston {
    pub const ZERO: Winston = Winston(0);

    pub fn to_ar(self) -> f64 {
        self.0 as f64 / WINSTON_PER_AR as f64
    }

    pub fn saturating_add(self, other: Winston) -> Winston {
        Winston(self.0.saturating_add(other.0))
    }
}

impl fmt::Display for Winston {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Signing capability
// =============================================================================

/// Wallet capability. Key material never leaves the implementation.
pub trait Signer: Send + Sync {
    /// Public key (RSA modulus for ledger wallets).
    fn owner(&self) -> &[u8];

    fn sign(&self, message: &[u8]) -> Result<Vec<u8>>;

    /// Wallet address derived from the owner key.
    fn address(&self) -> String {
        b64url(&sha256(&[self.owner()]))
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tx_id_text_form() {
        let id = TxId::from_signature(b"signature");
        let text = id.to_string();
        assert_eq!(text.len(), 43);
        assert!(!text.contains('='));
        assert_eq!(text.parse::<TxId>().unwrap(), id);
    }

    #[test]
    fn test_tx_id_rejects_wrong_length() {
        let short = b64url(&[1, 2, 3]);
        assert!(short.parse::<TxId>().is_err());
        assert!("not base64!".parse::<TxId>().is_err());
    }

    #[test]
    fn test_tx_id_serde_as_string() {
        let id = TxId::from_bytes([9u8; 32]);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));
        let back: TxId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_winston_to_ar() {
        assert_eq!(Winston(WINSTON_PER_AR).to_ar(), 1.0);
        assert_eq!(Winston(500_000_000_000).to_ar(), 0.5);
        assert_eq!(Winston(u64::MAX).saturating_add(Winston(1)), Winston(u64::MAX));
    }
}
