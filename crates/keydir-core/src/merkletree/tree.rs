//! Persistent Merkle prefix tree
//!
//! A binary tree keyed by VRF indices. Each leaf sits at the shallowest
//! level at which its index prefix is unique, so the shape depends only on
//! the set of leaves. Inserting returns a new version; untouched subtrees
//! are shared with the version it was derived from.

use super::node::{LeafEntry, Node};
use super::proof::{AuthenticationPath, Opening, ProofNode};
use crate::error::{KeydirError, Result};
use crate::types::{Hash, Index, INDEX_BITS};
use rand::{rngs::OsRng, RngCore};
use std::sync::Arc;

/// Result of looking an index up in one tree version
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Membership {
    /// A leaf with exactly this index exists
    Present(LeafEntry),
    /// No leaf with this index exists
    Absent,
}

impl Membership {
    /// Whether the index is present
    pub fn is_present(&self) -> bool {
        matches!(self, Membership::Present(_))
    }
}

/// One immutable version of the tree
#[derive(Debug, Clone)]
pub struct MerkleTree {
    nonce: Hash,
    root: Arc<Node>,
}

impl MerkleTree {
    /// Create an empty tree whose hashes are bound to `nonce`
    pub fn new(nonce: Hash) -> Self {
        let zero = Index::from_bytes([0u8; 32]);
        let left = Node::empty(&nonce, &zero, 1);
        let right = Node::empty(&nonce, &zero.with_bit(0, true), 1);
        Self {
            nonce,
            root: Node::interior(left, right),
        }
    }

    /// Create an empty tree with a fresh random nonce
    pub fn with_random_nonce() -> Self {
        let mut nonce = [0u8; 32];
        OsRng.fill_bytes(&mut nonce);
        Self::new(nonce)
    }

    /// Nonce mixed into leaf and empty-node hashes
    pub fn nonce(&self) -> &Hash {
        &self.nonce
    }

    /// Root hash of this version
    pub fn root_hash(&self) -> Hash {
        *self.root.hash()
    }

    /// Return a new version containing `entry`.
    ///
    /// An existing leaf with the same index is replaced; a leaf with a
    /// different index on the same path is pushed down until the two
    /// indices diverge.
    pub fn insert(&self, entry: LeafEntry) -> Result<MerkleTree> {
        let root = insert_at(&self.nonce, &self.root, entry, 0)?;
        Ok(MerkleTree {
            nonce: self.nonce,
            root,
        })
    }

    /// Look up `index`, always returning a proof.
    ///
    /// The proof ends at a leaf with this index (inclusion), or at an empty
    /// node or a leaf with a different index on the lookup path (absence).
    pub fn lookup(&self, index: &Index) -> (Membership, AuthenticationPath) {
        let mut siblings = Vec::new();
        let mut node = &self.root;
        let mut depth = 0u32;

        let (membership, terminal) = loop {
            match node.as_ref() {
                Node::Interior { left, right, .. } => {
                    if index.bit(depth) {
                        siblings.push(*left.hash());
                        node = right;
                    } else {
                        siblings.push(*right.hash());
                        node = left;
                    }
                    depth += 1;
                }
                Node::Leaf { entry, level, .. } => {
                    if entry.index == *index {
                        let terminal = ProofNode::Leaf {
                            index: entry.index,
                            level: *level,
                            commitment: entry.commitment.value,
                            opening: Some(Opening {
                                salt: entry.commitment.salt,
                                key: entry.key.clone(),
                            }),
                        };
                        break (Membership::Present(entry.clone()), terminal);
                    }
                    let terminal = ProofNode::Leaf {
                        index: entry.index,
                        level: *level,
                        commitment: entry.commitment.value,
                        opening: None,
                    };
                    break (Membership::Absent, terminal);
                }
                Node::Empty { level, .. } => {
                    break (Membership::Absent, ProofNode::Empty { level: *level });
                }
            }
        };

        let path = AuthenticationPath {
            tree_nonce: self.nonce,
            lookup_index: *index,
            vrf_proof: None,
            siblings,
            terminal,
        };
        (membership, path)
    }

    /// All leaves in index order
    pub fn leaves(&self) -> Vec<LeafEntry> {
        let mut out = Vec::new();
        collect_leaves(&self.root, &mut out);
        out
    }

    /// Number of leaves
    pub fn len(&self) -> usize {
        count_leaves(&self.root)
    }

    /// Whether the tree holds no leaves
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn insert_at(nonce: &Hash, node: &Arc<Node>, entry: LeafEntry, level: u32) -> Result<Arc<Node>> {
    match node.as_ref() {
        Node::Interior { left, right, .. } => {
            if level >= INDEX_BITS {
                return Err(KeydirError::TreeDepthExceeded);
            }
            if entry.index.bit(level) {
                let right = insert_at(nonce, right, entry, level + 1)?;
                Ok(Node::interior(Arc::clone(left), right))
            } else {
                let left = insert_at(nonce, left, entry, level + 1)?;
                Ok(Node::interior(left, Arc::clone(right)))
            }
        }
        Node::Empty { .. } => Ok(Node::leaf(nonce, entry, level)),
        Node::Leaf { entry: existing, .. } => {
            if existing.index == entry.index {
                Ok(Node::leaf(nonce, entry, level))
            } else {
                split(nonce, existing.clone(), entry, level)
            }
        }
    }
}

/// Build the subtree replacing `existing` at `level` once `incoming` collides with it
fn split(nonce: &Hash, existing: LeafEntry, incoming: LeafEntry, level: u32) -> Result<Arc<Node>> {
    if level >= INDEX_BITS {
        return Err(KeydirError::TreeDepthExceeded);
    }

    let existing_bit = existing.index.bit(level);
    let incoming_bit = incoming.index.bit(level);

    if existing_bit == incoming_bit {
        let empty = Node::empty(
            nonce,
            &existing.index.with_bit(level, !existing_bit),
            level + 1,
        );
        let child = split(nonce, existing, incoming, level + 1)?;
        Ok(if existing_bit {
            Node::interior(empty, child)
        } else {
            Node::interior(child, empty)
        })
    } else {
        let existing = Node::leaf(nonce, existing, level + 1);
        let incoming = Node::leaf(nonce, incoming, level + 1);
        Ok(if incoming_bit {
            Node::interior(existing, incoming)
        } else {
            Node::interior(incoming, existing)
        })
    }
}

fn collect_leaves(node: &Arc<Node>, out: &mut Vec<LeafEntry>) {
    match node.as_ref() {
        Node::Interior { left, right, .. } => {
            collect_leaves(left, out);
            collect_leaves(right, out);
        }
        Node::Leaf { entry, .. } => out.push(entry.clone()),
        Node::Empty { .. } => {}
    }
}

fn count_leaves(node: &Arc<Node>) -> usize {
    match node.as_ref() {
        Node::Interior { left, right, .. } => count_leaves(left) + count_leaves(right),
        Node::Leaf { .. } => 1,
        Node::Empty { .. } => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merkletree::proof::ProofType;
    use crate::types::Commitment;

    fn index_with_prefix(first: u8, second: u8) -> Index {
        let mut bytes = [0x5Au8; 32];
        bytes[0] = first;
        bytes[1] = second;
        Index::from_bytes(bytes)
    }

    fn entry(index: Index, name: &str, key: &[u8]) -> LeafEntry {
        LeafEntry {
            index,
            commitment: Commitment::new(name, key),
            key: key.to_vec(),
            epoch_added: 1,
        }
    }

    #[test]
    fn test_empty_tree_lookup_is_absence() {
        let tree = MerkleTree::new([1u8; 32]);
        let index = index_with_prefix(0x80, 0);

        let (membership, path) = tree.lookup(&index);
        assert_eq!(membership, Membership::Absent);
        assert_eq!(path.proof_type(), ProofType::Absence);
        assert_eq!(path.siblings.len(), 1);
        assert_eq!(path.compute_root().unwrap(), tree.root_hash());
    }

    #[test]
    fn test_insert_then_lookup_present() {
        let tree = MerkleTree::new([1u8; 32]);
        let index = index_with_prefix(0x00, 0x00);
        let updated = tree.insert(entry(index, "alice", b"k1")).unwrap();

        let (membership, path) = updated.lookup(&index);
        assert!(membership.is_present());
        assert_eq!(path.proof_type(), ProofType::Inclusion);
        assert_eq!(path.compute_root().unwrap(), updated.root_hash());
    }

    #[test]
    fn test_insert_leaves_previous_version_untouched() {
        let tree = MerkleTree::new([1u8; 32]);
        let before = tree.root_hash();
        let index = index_with_prefix(0xF0, 0x00);

        let updated = tree.insert(entry(index, "alice", b"k1")).unwrap();
        assert_ne!(updated.root_hash(), before);
        assert_eq!(tree.root_hash(), before);
        assert!(!tree.lookup(&index).0.is_present());
    }

    #[test]
    fn test_collision_extends_depth_until_bits_differ() {
        // Same first 12 bits, differ at bit 12.
        let a = index_with_prefix(0xAB, 0xC0);
        let b = index_with_prefix(0xAB, 0xC8);

        let tree = MerkleTree::new([2u8; 32])
            .insert(entry(a, "a", b"ka"))
            .unwrap()
            .insert(entry(b, "b", b"kb"))
            .unwrap();

        let (_, path_a) = tree.lookup(&a);
        let (_, path_b) = tree.lookup(&b);
        assert_eq!(path_a.terminal.level(), 13);
        assert_eq!(path_b.terminal.level(), 13);
        assert_eq!(path_a.compute_root().unwrap(), tree.root_hash());
        assert_eq!(path_b.compute_root().unwrap(), tree.root_hash());
    }

    #[test]
    fn test_absence_through_foreign_leaf() {
        let a = index_with_prefix(0x00, 0x00);
        let tree = MerkleTree::new([3u8; 32]).insert(entry(a, "a", b"ka")).unwrap();

        let probe = index_with_prefix(0x01, 0x00);
        let (membership, path) = tree.lookup(&probe);
        assert_eq!(membership, Membership::Absent);
        assert_eq!(path.proof_type(), ProofType::Absence);
        assert!(matches!(path.terminal, ProofNode::Leaf { opening: None, .. }));
        assert_eq!(path.compute_root().unwrap(), tree.root_hash());
    }

    #[test]
    fn test_shape_is_independent_of_insertion_order() {
        let nonce = [4u8; 32];
        let entries: Vec<LeafEntry> = (0u8..20)
            .map(|i| entry(index_with_prefix(i.wrapping_mul(37), i), &format!("n{}", i), &[i]))
            .collect();

        let mut forward = MerkleTree::new(nonce);
        for e in entries.iter().cloned() {
            forward = forward.insert(e).unwrap();
        }
        let mut backward = MerkleTree::new(nonce);
        for e in entries.iter().rev().cloned() {
            backward = backward.insert(e).unwrap();
        }

        assert_eq!(forward.root_hash(), backward.root_hash());
        assert_eq!(forward.len(), 20);
        assert_eq!(forward.leaves(), backward.leaves());
    }

    #[test]
    fn test_reinserting_same_entry_is_idempotent() {
        let index = index_with_prefix(0x42, 0x42);
        let e = entry(index, "alice", b"k1");
        let once = MerkleTree::new([5u8; 32]).insert(e.clone()).unwrap();
        let twice = once.insert(e).unwrap();
        assert_eq!(once.root_hash(), twice.root_hash());
    }
}
