//! Merkle prefix tree with per-epoch snapshots

mod node;
mod pad;
mod proof;
mod tree;

pub use node::{empty_hash, interior_hash, leaf_hash, LeafEntry};
pub use pad::{Pad, Snapshot};
pub use proof::{AuthenticationPath, Opening, ProofFailure, ProofNode, ProofType};
pub use tree::{Membership, MerkleTree};
