//! Tree nodes and domain-separated node hashing
//!
//! Nodes are immutable once built and shared between tree versions through
//! `Arc` handles; a new version copies only the nodes on the modified path.

use crate::types::{sha256, Commitment, Hash, Index};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const EMPTY_IDENTIFIER: &[u8] = b"E";
const LEAF_IDENTIFIER: &[u8] = b"L";

/// Hash of an unoccupied subtree at `level` whose path is `prefix`
pub fn empty_hash(nonce: &Hash, prefix: &Index, level: u32) -> Hash {
    sha256(&[
        EMPTY_IDENTIFIER,
        nonce,
        prefix.as_bytes(),
        &level.to_be_bytes(),
    ])
}

/// Hash of a leaf holding `commitment` for `index` at `level`
pub fn leaf_hash(nonce: &Hash, index: &Index, level: u32, commitment: &Hash) -> Hash {
    sha256(&[
        LEAF_IDENTIFIER,
        nonce,
        index.as_bytes(),
        &level.to_be_bytes(),
        commitment,
    ])
}

/// Hash of an interior node
pub fn interior_hash(left: &Hash, right: &Hash) -> Hash {
    sha256(&[left, right])
}

/// A committed binding as stored in a leaf. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafEntry {
    /// VRF-derived index of the bound name
    pub index: Index,

    /// Commitment to the name-to-key binding
    pub commitment: Commitment,

    /// Bound key material
    #[serde(with = "crate::types::serde_b64::bytes")]
    pub key: Vec<u8>,

    /// Epoch whose snapshot first contains this leaf
    pub epoch_added: u64,
}

#[derive(Debug)]
pub(crate) enum Node {
    Interior {
        left: Arc<Node>,
        right: Arc<Node>,
        hash: Hash,
    },
    Leaf {
        entry: LeafEntry,
        level: u32,
        hash: Hash,
    },
    Empty {
        level: u32,
        hash: Hash,
    },
}

impl Node {
    pub(crate) fn interior(left: Arc<Node>, right: Arc<Node>) -> Arc<Node> {
        let hash = interior_hash(left.hash(), right.hash());
        Arc::new(Node::Interior { left, right, hash })
    }

    pub(crate) fn leaf(nonce: &Hash, entry: LeafEntry, level: u32) -> Arc<Node> {
        let hash = leaf_hash(nonce, &entry.index, level, &entry.commitment.value);
        Arc::new(Node::Leaf { entry, level, hash })
    }

    pub(crate) fn empty(nonce: &Hash, prefix: &Index, level: u32) -> Arc<Node> {
        let hash = empty_hash(nonce, &prefix.prefix(level), level);
        Arc::new(Node::Empty { level, hash })
    }

    pub(crate) fn hash(&self) -> &Hash {
        match self {
            Node::Interior { hash, .. } | Node::Leaf { hash, .. } | Node::Empty { hash, .. } => {
                hash
            }
        }
    }
}
