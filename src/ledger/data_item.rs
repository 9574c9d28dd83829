//! Signed data items and the binary bundle that aggregates them.
//!
//! Wire format of a data item: multi-byte integers are big-endian, variable
//! fields are length-prefixed.
//!
//! ```text
//! sig_type:u16 | sig_len:u16 sig | owner_len:u16 owner
//! | has_target:u8 [target:32] | has_anchor:u8 [anchor:32]
//! | tag_count:u16 (name_len:u16 name value_len:u16 value)*
//! | data_len:u64 data
//! ```
//!
//! A bundle starts with the item count as a 32-byte little-endian integer,
//! then one `(size:32 LE, id:32)` pair per item, then the items back to back.

use super::{sha256, Signer, Tag, TxId};
use crate::error::{Result, SyncError};
use bytes::{Buf, BufMut, Bytes, BytesMut};

pub const SIGNATURE_TYPE_LEDGER: u16 = 1;
const WORD: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataItem {
    pub id: TxId,
    pub signature: Bytes,
    pub owner: Bytes,
    pub target: Option<[u8; 32]>,
    pub anchor: Option<[u8; 32]>,
    pub tags: Vec<Tag>,
    pub data: Bytes,
}

impl DataItem {
    pub fn sign(signer: &dyn Signer, data: Bytes, tags: Vec<Tag>) -> Result<Self> {
        let digest = sha256(&[&data[..]]);
        Self::sign_digested(signer, data, digest, tags)
    }

    /// Like `sign`, hashing the payload on the blocking pool.
    pub async fn sign_async(signer: &dyn Signer, data: Bytes, tags: Vec<Tag>) -> Result<Self> {
        let payload = data.clone();
        let digest = tokio::task::spawn_blocking(move || sha256(&[&payload[..]])).await?;
        Self::sign_digested(signer, data, digest, tags)
    }

    fn sign_digested(
        signer: &dyn Signer,
        data: Bytes,
        data_digest: [u8; 32],
        tags: Vec<Tag>,
    ) -> Result<Self> {
        let owner = Bytes::copy_from_slice(signer.owner());
        let message = signing_message(&owner, None, None, &tags, &data_digest);
        let signature = Bytes::from(signer.sign(&message)?);
        Ok(Self {
            id: TxId::from_signature(&signature),
            signature,
            owner,
            target: None,
            anchor: None,
            tags,
            data,
        })
    }

    pub fn encoded_len(&self) -> usize {
        let tags: usize = self
            .tags
            .iter()
            .map(|t| 4 + t.name.len() + t.value.len())
            .sum();
        2 + 2
            + self.signature.len()
            + 2
            + self.owner.len()
            + 1
            + self.target.map_or(0, |_| WORD)
            + 1
            + self.anchor.map_or(0, |_| WORD)
            + 2
            + tags
            + 8
            + self.data.len()
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf.freeze()
    }

    fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_u16(SIGNATURE_TYPE_LEDGER);
        buf.put_u16(self.signature.len() as u16);
        buf.put_slice(&self.signature);
        buf.put_u16(self.owner.len() as u16);
        buf.put_slice(&self.owner);
        put_optional(buf, self.target.as_ref());
        put_optional(buf, self.anchor.as_ref());
        buf.put_u16(self.tags.len() as u16);
        for tag in &self.tags {
            buf.put_u16(tag.name.len() as u16);
            buf.put_slice(tag.name.as_bytes());
            buf.put_u16(tag.value.len() as u16);
            buf.put_slice(tag.value.as_bytes());
        }
        buf.put_u64(self.data.len() as u64);
        buf.put_slice(&self.data);
    }

    pub fn decode(mut payload: Bytes) -> Result<Self> {
        if payload.remaining() < 4 {
            return Err(truncated("header"));
        }
        let sig_type = payload.get_u16();
        if sig_type != SIGNATURE_TYPE_LEDGER {
            return Err(SyncError::malformed(
                "data item",
                format!("unknown signature type {}", sig_type),
            ));
        }
        let signature = take_prefixed(&mut payload, "signature")?;
        let owner = take_prefixed(&mut payload, "owner")?;
        let target = take_optional(&mut payload, "target")?;
        let anchor = take_optional(&mut payload, "anchor")?;

        if payload.remaining() < 2 {
            return Err(truncated("tag count"));
        }
        let tag_count = payload.get_u16() as usize;
        let mut tags = Vec::with_capacity(tag_count);
        for _ in 0..tag_count {
            let name = take_string(&mut payload, "tag name")?;
            let value = take_string(&mut payload, "tag value")?;
            tags.push(Tag { name, value });
        }

        if payload.remaining() < 8 {
            return Err(truncated("data length"));
        }
        let data_len = payload.get_u64() as usize;
        if payload.remaining() < data_len {
            return Err(truncated("data"));
        }
        let data = payload.copy_to_bytes(data_len);

        Ok(Self {
            id: TxId::from_signature(&signature),
            signature,
            owner,
            target,
            anchor,
            tags,
            data,
        })
    }
}

fn signing_message(
    owner: &[u8],
    target: Option<&[u8; 32]>,
    anchor: Option<&[u8; 32]>,
    tags: &[Tag],
    data_digest: &[u8; 32],
) -> [u8; 32] {
    let mut buf = BytesMut::with_capacity(128 + owner.len());
    buf.put_slice(b"dataitem");
    buf.put_u16(SIGNATURE_TYPE_LEDGER);
    buf.put_u16(owner.len() as u16);
    buf.put_slice(owner);
    put_optional(&mut buf, target);
    put_optional(&mut buf, anchor);
    buf.put_u16(tags.len() as u16);
    for tag in tags {
        buf.put_u16(tag.name.len() as u16);
        buf.put_slice(tag.name.as_bytes());
        buf.put_u16(tag.value.len() as u16);
        buf.put_slice(tag.value.as_bytes());
    }
    buf.put_slice(data_digest);
    sha256(&[&buf])
}

fn put_optional(buf: &mut BytesMut, value: Option<&[u8; 32]>) {
    match value {
        Some(bytes) => {
            buf.put_u8(1);
            buf.put_slice(bytes);
        }
        None => buf.put_u8(0),
    }
}

fn truncated(field: &str) -> SyncError {
    SyncError::malformed("data item", format!("truncated {}", field))
}

fn take_prefixed(payload: &mut Bytes, field: &str) -> Result<Bytes> {
    if payload.remaining() < 2 {
        return Err(truncated(field));
    }
    let len = payload.get_u16() as usize;
    if payload.remaining() < len {
        return Err(truncated(field));
    }
    Ok(payload.copy_to_bytes(len))
}

fn take_string(payload: &mut Bytes, field: &str) -> Result<String> {
    let raw = take_prefixed(payload, field)?;
    String::from_utf8(raw.to_vec())
        .map_err(|_| SyncError::malformed("data item", format!("invalid UTF-8 in {}", field)))
}

fn take_optional(payload: &mut Bytes, field: &str) -> Result<Option<[u8; 32]>> {
    if payload.remaining() < 1 {
        return Err(truncated(field));
    }
    match payload.get_u8() {
        0 => Ok(None),
        1 => {
            if payload.remaining() < WORD {
                return Err(truncated(field));
            }
            let mut value = [0u8; 32];
            payload.copy_to_slice(&mut value);
            Ok(Some(value))
        }
        flag => Err(SyncError::malformed(
            "data item",
            format!("invalid {} flag {}", field, flag),
        )),
    }
}

// =============================================================================
// Bundles
// =============================================================================

fn put_word(buf: &mut BytesMut, value: u64) {
    buf.put_u64_le(value);
    buf.put_bytes(0, WORD - 8);
}

fn get_word(payload: &mut Bytes) -> Result<u64> {
    if payload.remaining() < WORD {
        return Err(SyncError::malformed("bundle", "truncated header"));
    }
    let value = payload.get_u64_le();
    let high = payload.copy_to_bytes(WORD - 8);
    if high.iter().any(|b| *b != 0) {
        return Err(SyncError::malformed("bundle", "size field overflows u64"));
    }
    Ok(value)
}

/// Serialize `items` into one bundle payload, preserving their order.
pub fn encode_bundle(items: &[DataItem]) -> Bytes {
    let body: usize = items.iter().map(DataItem::encoded_len).sum();
    let mut buf = BytesMut::with_capacity(WORD + items.len() * 2 * WORD + body);

    put_word(&mut buf, items.len() as u64);
    for item in items {
        put_word(&mut buf, item.encoded_len() as u64);
        buf.put_slice(item.id.as_bytes());
    }
    for item in items {
        item.encode_into(&mut buf);
    }
    buf.freeze()
}

/// Bundle bytes ahead of the index: the item count.
pub const BUNDLE_HEADER_LEN: usize = WORD;

/// Index bytes per item: its size and its id.
pub const BUNDLE_ENTRY_LEN: usize = 2 * WORD;

/// Bytes `item` adds to a bundle, index entry included.
pub fn bundled_len(item: &DataItem) -> usize {
    BUNDLE_ENTRY_LEN + item.encoded_len()
}

/// Byte size of the bundle `encode_bundle` would produce.
pub fn bundle_len(items: &[DataItem]) -> usize {
    BUNDLE_HEADER_LEN + items.iter().map(bundled_len).sum::<usize>()
}

/// Split a bundle back into its items, checking each id against the index.
pub fn decode_bundle(mut payload: Bytes) -> Result<Vec<DataItem>> {
    let count = get_word(&mut payload)? as usize;
    let mut index = Vec::with_capacity(count.min(4096));
    for _ in 0..count {
        let size = get_word(&mut payload)? as usize;
        if payload.remaining() < WORD {
            return Err(SyncError::malformed("bundle", "truncated item id"));
        }
        let mut id = [0u8; 32];
        payload.copy_to_slice(&mut id);
        index.push((size, TxId::from_bytes(id)));
    }

    let mut items = Vec::with_capacity(index.len());
    for (size, id) in index {
        if payload.remaining() < size {
            return Err(SyncError::malformed("bundle", "truncated item body"));
        }
        let item = DataItem::decode(payload.split_to(size))?;
        if item.id != id {
            return Err(SyncError::malformed(
                "bundle",
                format!("item id mismatch: index says {}, item is {}", id, item.id),
            ));
        }
        items.push(item);
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::testing::TestSigner;

    fn item(data: &[u8], tags: Vec<Tag>) -> DataItem {
        DataItem::sign(&TestSigner::new(), Bytes::copy_from_slice(data), tags).unwrap()
    }

    #[test]
    fn test_item_encode_decode() {
        let original = item(
            b"{\"name\":\"a.txt\"}",
            vec![Tag::new("Entity-Type", "file"), Tag::new("Content-Type", "application/json")],
        );
        let encoded = original.encode();
        assert_eq!(encoded.len(), original.encoded_len());

        let decoded = DataItem::decode(encoded).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_signature_covers_tags_and_data() {
        let a = item(b"same", vec![Tag::new("k", "v1")]);
        let b = item(b"same", vec![Tag::new("k", "v2")]);
        let c = item(b"different", vec![Tag::new("k", "v1")]);
        assert_ne!(a.id, b.id);
        assert_ne!(a.id, c.id);
    }

    #[tokio::test]
    async fn test_offloaded_signing_matches_inline() {
        let tags = vec![Tag::new("Content-Type", "text/plain")];
        let data = Bytes::from(vec![5u8; 70_000]);
        let inline = DataItem::sign(&TestSigner::new(), data.clone(), tags.clone()).unwrap();
        let offloaded = DataItem::sign_async(&TestSigner::new(), data, tags).await.unwrap();
        assert_eq!(offloaded, inline);
    }

    #[test]
    fn test_decode_rejects_truncation() {
        let encoded = item(b"payload", vec![]).encode();
        let cut = encoded.slice(..encoded.len() - 3);
        assert!(DataItem::decode(cut).is_err());
        assert!(DataItem::decode(Bytes::from_static(&[0, 9, 0, 0])).is_err());
    }

    #[test]
    fn test_bundle_preserves_order() {
        let items: Vec<DataItem> = (0..5)
            .map(|i| item(format!("item {}", i).as_bytes(), vec![Tag::new("n", i.to_string())]))
            .collect();

        let bundle = encode_bundle(&items);
        assert_eq!(bundle.len(), bundle_len(&items));
        assert_eq!(&bundle[..8], &5u64.to_le_bytes());

        let decoded = decode_bundle(bundle).unwrap();
        let ids: Vec<TxId> = decoded.iter().map(|i| i.id).collect();
        let expected: Vec<TxId> = items.iter().map(|i| i.id).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_empty_bundle() {
        let bundle = encode_bundle(&[]);
        assert_eq!(bundle.len(), 32);
        assert!(decode_bundle(bundle).unwrap().is_empty());
    }
}
