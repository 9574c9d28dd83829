//! Merkle chunking of transaction payloads.
//!
//! Payloads are split into 256 KiB chunks. When the remainder after a full
//! chunk would be smaller than 32 KiB, the last two chunks are rebalanced
//! to roughly equal halves. Each chunk gets a proof (`data_path`) that
//! links it to the transaction's `data_root`.
//!
//! Hashing (all SHA-256, `H(a, b)` means hash of the concatenation):
//! - leaf id:   `H(H(data_hash), H(note(max)))`
//! - branch id: `H(H(left), H(right), H(note(left.max)))`
//!
//! where `note(n)` is `n` as a 32-byte big-endian integer.

use super::sha256;

pub const MAX_CHUNK_SIZE: usize = 256 * 1024;
pub const MIN_CHUNK_SIZE: usize = 32 * 1024;
const NOTE_SIZE: usize = 32;

pub type Hash = [u8; 32];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkBoundary {
    pub data_hash: Hash,
    pub min_byte_range: usize,
    pub max_byte_range: usize,
}

impl ChunkBoundary {
    pub fn len(&self) -> usize {
        self.max_byte_range - self.min_byte_range
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkProof {
    /// Last byte offset covered by the chunk.
    pub offset: usize,
    pub proof: Vec<u8>,
}

/// Chunk boundaries, proofs and root of one payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkLayout {
    /// `None` for an empty payload.
    pub data_root: Option<Hash>,
    pub chunks: Vec<ChunkBoundary>,
    pub proofs: Vec<ChunkProof>,
}

impl ChunkLayout {
    pub fn new(data: &[u8]) -> Self {
        let chunks = chunk_boundaries(data);
        let leaves: Vec<Node> = chunks.iter().map(Node::leaf).collect();
        match build_root(leaves) {
            Some(root) => {
                let mut proofs = Vec::with_capacity(chunks.len());
                collect_proofs(&root, Vec::new(), &mut proofs);
                Self {
                    data_root: Some(root.id()),
                    chunks,
                    proofs,
                }
            }
            None => Self {
                data_root: None,
                chunks: Vec::new(),
                proofs: Vec::new(),
            },
        }
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }
}

fn note(value: usize) -> [u8; NOTE_SIZE] {
    let mut buf = [0u8; NOTE_SIZE];
    buf[NOTE_SIZE - 8..].copy_from_slice(&(value as u64).to_be_bytes());
    buf
}

/// Split `data` into chunk boundaries. An empty payload has no chunks.
pub fn chunk_boundaries(data: &[u8]) -> Vec<ChunkBoundary> {
    let mut chunks = Vec::with_capacity(data.len() / MAX_CHUNK_SIZE + 1);
    let mut rest = data;
    let mut cursor = 0;

    while rest.len() >= MAX_CHUNK_SIZE {
        let mut chunk_size = MAX_CHUNK_SIZE;

        // Avoid a tiny trailing chunk
        let next_chunk_size = rest.len() - MAX_CHUNK_SIZE;
        if next_chunk_size > 0 && next_chunk_size < MIN_CHUNK_SIZE {
            chunk_size = rest.len().div_ceil(2);
        }

        let (chunk, tail) = rest.split_at(chunk_size);
        chunks.push(ChunkBoundary {
            data_hash: sha256(&[chunk]),
            min_byte_range: cursor,
            max_byte_range: cursor + chunk_size,
        });
        cursor += chunk_size;
        rest = tail;
    }

    if !rest.is_empty() {
        chunks.push(ChunkBoundary {
            data_hash: sha256(&[rest]),
            min_byte_range: cursor,
            max_byte_range: cursor + rest.len(),
        });
    }

    chunks
}

// =============================================================================
// Tree
// =============================================================================

enum Node {
    Leaf {
        id: Hash,
        data_hash: Hash,
        max_byte_range: usize,
    },
    Branch {
        id: Hash,
        byte_range: usize,
        max_byte_range: usize,
        left: Box<Node>,
        right: Box<Node>,
    },
}

impl Node {
    fn leaf(chunk: &ChunkBoundary) -> Self {
        let id = sha256(&[
            &sha256(&[&chunk.data_hash]),
            &sha256(&[&note(chunk.max_byte_range)]),
        ]);
        Node::Leaf {
            id,
            data_hash: chunk.data_hash,
            max_byte_range: chunk.max_byte_range,
        }
    }

    fn branch(left: Node, right: Node) -> Self {
        let byte_range = left.max_byte_range();
        let id = sha256(&[
            &sha256(&[&left.id()]),
            &sha256(&[&right.id()]),
            &sha256(&[&note(byte_range)]),
        ]);
        Node::Branch {
            id,
            byte_range,
            max_byte_range: right.max_byte_range(),
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    fn id(&self) -> Hash {
        match self {
            Node::Leaf { id, .. } | Node::Branch { id, .. } => *id,
        }
    }

    fn max_byte_range(&self) -> usize {
        match self {
            Node::Leaf { max_byte_range, .. } | Node::Branch { max_byte_range, .. } => {
                *max_byte_range
            }
        }
    }
}

/// Pair nodes layer by layer; an odd node is promoted unchanged.
fn build_root(mut nodes: Vec<Node>) -> Option<Node> {
    while nodes.len() > 1 {
        let mut next = Vec::with_capacity(nodes.len().div_ceil(2));
        let mut iter = nodes.into_iter();
        while let Some(left) = iter.next() {
            match iter.next() {
                Some(right) => next.push(Node::branch(left, right)),
                None => next.push(left),
            }
        }
        nodes = next;
    }
    nodes.pop()
}

fn collect_proofs(node: &Node, prefix: Vec<u8>, out: &mut Vec<ChunkProof>) {
    match node {
        Node::Leaf {
            data_hash,
            max_byte_range,
            ..
        } => {
            let mut proof = prefix;
            proof.extend_from_slice(data_hash);
            proof.extend_from_slice(&note(*max_byte_range));
            out.push(ChunkProof {
                offset: max_byte_range - 1,
                proof,
            });
        }
        Node::Branch {
            byte_range,
            left,
            right,
            ..
        } => {
            let mut partial = prefix;
            partial.extend_from_slice(&left.id());
            partial.extend_from_slice(&right.id());
            partial.extend_from_slice(&note(*byte_range));
            collect_proofs(left, partial.clone(), out);
            collect_proofs(right, partial, out);
        }
    }
}
