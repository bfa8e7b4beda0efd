//! # Keydir Core
//!
//! Authenticated key directory: publishes verifiable, non-equivocable
//! name-to-key bindings and the client-side checks that detect a directory
//! misbehaving.
//!
//! ## Key Concepts
//!
//! - **VRF**: Derives each name's tree index privately, with a public proof
//! - **PAD**: Versioned Merkle prefix tree giving presence/absence proofs per epoch
//! - **STR**: Signed tree root sealing one epoch's snapshot, hash-chained to its predecessor
//! - **Directory**: Stages registrations and publishes them at the next epoch
//! - **Consistency checks**: Client engine that trusts only verified, forward-moving state
//!
//! ## Guarantees
//!
//! 1. **Append-only history**: exactly one signed root per epoch, each linking to the last
//! 2. **Non-equivocation**: a verified binding never changes in a later epoch
//! 3. **Fail-closed clients**: trust state advances only on fully verified responses

pub mod client;
pub mod crypto;
pub mod directory;
pub mod error;
pub mod merkletree;
pub mod protocol;
pub mod signed_root;
pub mod types;
pub mod vrf;

pub use client::{Binding, CheckError, ClientState, ConsistencyChecks, StrFailure};
pub use crypto::{CoseSigned, KeyPair, PublicKey, SerializablePublicKey};
pub use directory::{Directory, DirectoryConfig, DirectoryState, PendingBinding};
pub use error::{KeydirError, Result};
pub use merkletree::{
    AuthenticationPath, LeafEntry, Membership, MerkleTree, Pad, ProofFailure, ProofNode,
    ProofType, Snapshot,
};
pub use protocol::{
    DirectoryResponse, RequestKind, ResponseCode, SignedPromise, TemporaryBinding,
};
pub use signed_root::{SignedTreeRoot, StrChain, TreeRoot};
pub use types::{Commitment, Hash, Index, Policies, ZERO_HASH};
pub use vrf::{VrfProof, VrfPublicKey, VrfSecretKey};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get the library version
pub fn version() -> &'static str {
    VERSION
}
