//! Shared fixtures for the integration tests: an in-process gateway, a
//! deterministic wallet and a toy cipher.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use filetime::FileTime;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};
use uuid::Uuid;
use weavesync::crypto::{Encrypted, Encryptor, Key, KeyDerivation};
use weavesync::ledger::transaction::ChunkPayload;
use weavesync::ledger::{
    b64url_decode, LedgerClient, RequestError, Signer, Tag, TransactionHeader, TxId, TxStatus,
    Winston,
};
use weavesync::model::CipherInfo;
use weavesync::price::{PriceOracle, TipOracle, TokenHolder};
use weavesync::SyncConfig;

/// Write `contents` and backdate the file so the scanner treats it as settled.
pub fn write_settled(path: &Path, contents: impl AsRef<[u8]>) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, contents).unwrap();
    let past = SystemTime::now() - Duration::from_secs(120);
    filetime::set_file_mtime(path, FileTime::from_system_time(past)).unwrap();
}

/// Config tuned for tests: no retry sleeps, small bundles.
pub fn test_config() -> SyncConfig {
    let mut config = SyncConfig::default();
    config.gateway_url = "https://gateway.test".to_string();
    config.upload.retry_delay_ms = 0;
    config.upload.max_errors = 3;
    config.bundle.max_bytes = 1024 * 1024;
    config.bundle.max_items = 50;
    config
}

pub fn tag<'a>(tags: &'a [Tag], name: &str) -> Option<&'a str> {
    tags.iter()
        .find(|t| t.name == name)
        .map(|t| t.value.as_str())
}

// =============================================================================
// Gateway
// =============================================================================

pub struct MockGateway {
    headers: Mutex<Vec<TransactionHeader>>,
    inline: Mutex<HashMap<TxId, Bytes>>,
    chunks: Mutex<HashMap<String, BTreeMap<u64, Bytes>>>,
    statuses: Mutex<HashMap<TxId, TxStatus>>,
    default_status: Mutex<TxStatus>,
    rejecting: Mutex<bool>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            headers: Mutex::new(Vec::new()),
            inline: Mutex::new(HashMap::new()),
            chunks: Mutex::new(HashMap::new()),
            statuses: Mutex::new(HashMap::new()),
            default_status: Mutex::new(TxStatus::Pending),
            rejecting: Mutex::new(false),
        }
    }

    /// Answer every header post with a non-retryable error.
    pub fn reject_all(&self, reject: bool) {
        *self.rejecting.lock() = reject;
    }

    pub fn confirm_all(&self, confirmations: u64) {
        *self.default_status.lock() = TxStatus::Mined { confirmations };
    }

    pub fn set_status(&self, id: TxId, status: TxStatus) {
        self.statuses.lock().insert(id, status);
    }

    pub fn posted(&self) -> Vec<TransactionHeader> {
        self.headers.lock().clone()
    }

    pub fn body(&self, id: &TxId) -> Option<Bytes> {
        if let Some(data) = self.inline.lock().get(id) {
            return Some(data.clone());
        }
        let header = self.headers.lock().iter().find(|h| h.id == *id)?.clone();
        let chunks = self.chunks.lock();
        let parts = chunks.get(&header.data_root)?;
        Some(Bytes::from(
            parts
                .values()
                .flat_map(|c| c.iter().copied())
                .collect::<Vec<u8>>(),
        ))
    }
}

#[async_trait]
impl LedgerClient for MockGateway {
    async fn post_transaction(
        &self,
        header: &TransactionHeader,
        data: Option<&Bytes>,
    ) -> Result<(), RequestError> {
        if *self.rejecting.lock() {
            return Err(RequestError::Structured {
                status: 400,
                code: "invalid_json".into(),
            });
        }
        self.headers.lock().push(header.clone());
        if let Some(data) = data {
            self.inline.lock().insert(header.id, data.clone());
        }
        Ok(())
    }

    async fn post_chunk(&self, chunk: &ChunkPayload) -> Result<(), RequestError> {
        let malformed = || RequestError::Structured {
            status: 400,
            code: "invalid_json".into(),
        };
        let offset: u64 = chunk.offset.parse().map_err(|_| malformed())?;
        let bytes = b64url_decode(&chunk.chunk).map_err(|_| malformed())?;
        self.chunks
            .lock()
            .entry(chunk.data_root.clone())
            .or_default()
            .insert(offset, Bytes::from(bytes));
        Ok(())
    }

    async fn transaction_status(&self, id: &TxId) -> Result<TxStatus, RequestError> {
        let status = self.statuses.lock().get(id).copied();
        Ok(status.unwrap_or(*self.default_status.lock()))
    }

    async fn tx_anchor(&self) -> Result<String, RequestError> {
        Ok("test-anchor".to_string())
    }
}

// =============================================================================
// Wallet and oracles
// =============================================================================

pub struct HashSigner {
    owner: Vec<u8>,
}

impl HashSigner {
    pub fn new() -> Self {
        Self {
            owner: vec![42u8; 64],
        }
    }
}

impl Signer for HashSigner {
    fn owner(&self) -> &[u8] {
        &self.owner
    }

    fn sign(&self, message: &[u8]) -> weavesync::Result<Vec<u8>> {
        let digest = Sha256::new()
            .chain_update(&self.owner)
            .chain_update(message)
            .finalize();
        Ok(digest.to_vec())
    }
}

/// One winston per byte.
pub struct FlatPrice;

#[async_trait]
impl PriceOracle for FlatPrice {
    async fn winston_for_bytes(&self, bytes: u64) -> weavesync::Result<Winston> {
        Ok(Winston(bytes))
    }
}

/// Fixed tip paid to a single holder.
pub struct FixedTip {
    pub holder: Option<TokenHolder>,
}

impl FixedTip {
    pub fn to(address: &str) -> Self {
        Self {
            holder: Some(TokenHolder {
                address: address.to_string(),
                weight: 1,
            }),
        }
    }

    pub fn none() -> Self {
        Self { holder: None }
    }
}

#[async_trait]
impl TipOracle for FixedTip {
    async fn community_tip(&self, _cost: Winston) -> weavesync::Result<Winston> {
        Ok(Winston(1_000))
    }

    async fn select_token_holder(&self) -> weavesync::Result<Option<TokenHolder>> {
        Ok(self.holder.clone())
    }
}

// =============================================================================
// Private drives
// =============================================================================

pub struct DerivedKeys;

impl KeyDerivation for DerivedKeys {
    fn drive_key(&self, drive_id: &Uuid) -> weavesync::Result<Key> {
        Ok(Key::new(Sha256::digest(drive_id.as_bytes()).to_vec()))
    }

    fn file_key(&self, drive_key: &Key, file_id: &Uuid) -> weavesync::Result<Key> {
        let digest = Sha256::new()
            .chain_update(drive_key.as_bytes())
            .chain_update(file_id.as_bytes())
            .finalize();
        Ok(Key::new(digest.to_vec()))
    }
}

/// XOR with the repeating key. Only good enough to tell ciphertext apart.
pub struct XorCipher;

impl XorCipher {
    pub fn apply(key: &Key, data: &[u8]) -> Vec<u8> {
        let key = key.as_bytes();
        data.iter()
            .enumerate()
            .map(|(i, b)| b ^ key[i % key.len()])
            .collect()
    }
}

impl Encryptor for XorCipher {
    fn encrypt(&self, key: &Key, plaintext: &[u8]) -> weavesync::Result<Encrypted> {
        Ok(Encrypted {
            ciphertext: Bytes::from(Self::apply(key, plaintext)),
            cipher: CipherInfo {
                cipher: "XOR-TEST".to_string(),
                iv: "AAAA".to_string(),
            },
        })
    }
}
