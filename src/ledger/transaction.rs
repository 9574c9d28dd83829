//! Signed ledger transactions.
//!
//! A `TransactionDraft` collects payload, tags, reward and anchor; signing
//! it yields an immutable `SignedTransaction`. Chunk payloads for the wire
//! are derived on demand from the Merkle layout, so a large transaction
//! holds its data exactly once.

use super::merkle::ChunkLayout;
use super::{b64url, sha256, Signer, Tag, TxId, Winston};
use crate::error::Result;
use bytes::Bytes;
use serde::ser::SerializeSeq;
use serde::{Serialize, Serializer};
use std::sync::Arc;

pub const TX_FORMAT: u8 = 2;

/// Transaction header as posted to `/tx`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionHeader {
    pub format: u8,
    pub id: TxId,
    pub last_tx: String,
    pub owner: String,
    #[serde(serialize_with = "encode_tags")]
    pub tags: Vec<Tag>,
    pub target: String,
    pub quantity: String,
    pub data_root: String,
    pub data_size: String,
    pub reward: String,
    pub signature: String,
}

/// Tag names and values are base64url on the wire.
fn encode_tags<S: Serializer>(tags: &[Tag], serializer: S) -> std::result::Result<S::Ok, S::Error> {
    #[derive(Serialize)]
    struct WireTag {
        name: String,
        value: String,
    }

    let mut seq = serializer.serialize_seq(Some(tags.len()))?;
    for tag in tags {
        seq.serialize_element(&WireTag {
            name: b64url(tag.name.as_bytes()),
            value: b64url(tag.value.as_bytes()),
        })?;
    }
    seq.end()
}

/// One chunk as posted to `/chunk`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkPayload {
    pub data_root: String,
    pub data_size: String,
    pub data_path: String,
    pub offset: String,
    pub chunk: String,
}

/// Unsigned transaction.
#[derive(Debug, Clone)]
pub struct TransactionDraft {
    pub data: Bytes,
    pub tags: Vec<Tag>,
    /// Recipient address for a token transfer (the tip holder).
    pub target: Option<String>,
    pub quantity: Winston,
    pub reward: Winston,
    pub last_tx: String,
}

impl TransactionDraft {
    pub fn new(data: Bytes, tags: Vec<Tag>) -> Self {
        Self {
            data,
            tags,
            target: None,
            quantity: Winston::ZERO,
            reward: Winston::ZERO,
            last_tx: String::new(),
        }
    }

    pub fn with_transfer(mut self, target: String, quantity: Winston) -> Self {
        self.target = Some(target);
        self.quantity = quantity;
        self
    }

    pub fn with_reward(mut self, reward: Winston) -> Self {
        self.reward = reward;
        self
    }

    pub fn with_anchor(mut self, last_tx: String) -> Self {
        self.last_tx = last_tx;
        self
    }

    pub fn sign(self, signer: &dyn Signer) -> Result<SignedTransaction> {
        let layout = ChunkLayout::new(&self.data);
        self.sign_with_layout(layout, signer)
    }

    /// Like `sign`, chunking and hashing the payload on the blocking pool.
    pub async fn sign_async(self, signer: &dyn Signer) -> Result<SignedTransaction> {
        let data = self.data.clone();
        let layout = tokio::task::spawn_blocking(move || ChunkLayout::new(&data)).await?;
        self.sign_with_layout(layout, signer)
    }

    fn sign_with_layout(self, layout: ChunkLayout, signer: &dyn Signer) -> Result<SignedTransaction> {
        let data_root = layout.data_root.map(|root| b64url(&root)).unwrap_or_default();
        let owner = b64url(signer.owner());
        let target = self.target.unwrap_or_default();

        let message = signature_message(&SignatureFields {
            owner: signer.owner(),
            target: &target,
            quantity: self.quantity,
            reward: self.reward,
            last_tx: &self.last_tx,
            tags: &self.tags,
            data_size: self.data.len(),
            data_root: &data_root,
        });
        let signature = signer.sign(&message)?;

        let header = TransactionHeader {
            format: TX_FORMAT,
            id: TxId::from_signature(&signature),
            last_tx: self.last_tx,
            owner,
            tags: self.tags,
            target,
            quantity: self.quantity.to_string(),
            data_root,
            data_size: self.data.len().to_string(),
            reward: self.reward.to_string(),
            signature: b64url(&signature),
        };

        Ok(SignedTransaction {
            header,
            data: self.data,
            layout: Arc::new(layout),
        })
    }
}

struct SignatureFields<'a> {
    owner: &'a [u8],
    target: &'a str,
    quantity: Winston,
    reward: Winston,
    last_tx: &'a str,
    tags: &'a [Tag],
    data_size: usize,
    data_root: &'a str,
}

/// Digest over every header field, each length-prefixed so no two field
/// sequences share an encoding.
fn signature_message(fields: &SignatureFields<'_>) -> [u8; 32] {
    fn field(buf: &mut Vec<u8>, value: &[u8]) {
        buf.extend_from_slice(&(value.len() as u64).to_be_bytes());
        buf.extend_from_slice(value);
    }

    let mut buf = Vec::with_capacity(256);
    field(&mut buf, TX_FORMAT.to_string().as_bytes());
    field(&mut buf, fields.owner);
    field(&mut buf, fields.target.as_bytes());
    field(&mut buf, fields.quantity.to_string().as_bytes());
    field(&mut buf, fields.reward.to_string().as_bytes());
    field(&mut buf, fields.last_tx.as_bytes());
    buf.extend_from_slice(&(fields.tags.len() as u64).to_be_bytes());
    for tag in fields.tags {
        field(&mut buf, tag.name.as_bytes());
        field(&mut buf, tag.value.as_bytes());
    }
    field(&mut buf, fields.data_size.to_string().as_bytes());
    field(&mut buf, fields.data_root.as_bytes());
    sha256(&[&buf])
}

/// Immutable signed transaction plus its chunk layout.
#[derive(Debug, Clone)]
pub struct SignedTransaction {
    header: TransactionHeader,
    data: Bytes,
    layout: Arc<ChunkLayout>,
}

impl SignedTransaction {
    pub fn header(&self) -> &TransactionHeader {
        &self.header
    }

    pub fn id(&self) -> TxId {
        self.header.id
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn data_size(&self) -> usize {
        self.data.len()
    }

    pub fn chunk_count(&self) -> usize {
        self.layout.chunk_count()
    }

    /// Wire form of chunk `index`, or `None` past the last chunk.
    pub fn chunk(&self, index: usize) -> Option<ChunkPayload> {
        let boundary = self.layout.chunks.get(index)?;
        let proof = self.layout.proofs.get(index)?;
        Some(ChunkPayload {
            data_root: self.header.data_root.clone(),
            data_size: self.header.data_size.clone(),
            data_path: b64url(&proof.proof),
            offset: proof.offset.to_string(),
            chunk: b64url(&self.data[boundary.min_byte_range..boundary.max_byte_range]),
        })
    }
}
