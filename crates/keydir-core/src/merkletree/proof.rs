//! Authentication paths and their verification
//!
//! Verification is a pure function of the path, the looked-up name, the VRF
//! public key and a claimed root hash; any party can run it.

use super::node::{empty_hash, interior_hash, leaf_hash};
use crate::types::{Commitment, Hash, Index, INDEX_BITS};
use crate::vrf::{VrfProof, VrfPublicKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a proof was rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProofFailure {
    /// The response carried no proof, or the proof carried no VRF proof
    #[error("Proof missing")]
    MissingProof,

    /// The VRF proof does not match the name and lookup index
    #[error("Invalid VRF proof")]
    InvalidVrfProof,

    /// The terminal node is not on the lookup index's path
    #[error("Terminal node does not match the lookup index")]
    BadLookupIndex,

    /// The revealed commitment does not open to the name and key
    #[error("Commitment does not open to the claimed binding")]
    BadCommitment,

    /// The recomputed root does not match the signed tree root
    #[error("Authentication path does not reach the signed root")]
    BadAuthPath,

    /// An inclusion proof arrived where absence was claimed, or the reverse
    #[error("Unexpected proof type")]
    UnexpectedProofType,
}

/// Kind of statement a proof makes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProofType {
    Inclusion,
    Absence,
}

/// Commitment opening revealed by an inclusion proof
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Opening {
    #[serde(with = "crate::types::serde_b64::array")]
    pub salt: Hash,

    #[serde(with = "crate::types::serde_b64::bytes")]
    pub key: Vec<u8>,
}

/// Node at which the lookup descent stopped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProofNode {
    /// A leaf, either the looked-up one (opening present) or a foreign
    /// leaf sharing the lookup prefix (opening absent)
    Leaf {
        index: Index,
        level: u32,
        #[serde(with = "crate::types::serde_b64::array")]
        commitment: Hash,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        opening: Option<Opening>,
    },
    /// An empty subtree on the lookup path
    Empty { level: u32 },
}

impl ProofNode {
    /// Depth of the terminal node
    pub fn level(&self) -> u32 {
        match self {
            ProofNode::Leaf { level, .. } | ProofNode::Empty { level } => *level,
        }
    }
}

/// Path from the root to the node where a lookup terminated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticationPath {
    /// Nonce of the tree the path was taken from
    #[serde(with = "crate::types::serde_b64::array")]
    pub tree_nonce: Hash,

    /// Index the lookup descended along
    pub lookup_index: Index,

    /// Proof that `lookup_index` was derived from the looked-up name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vrf_proof: Option<VrfProof>,

    /// Sibling hashes, root first
    #[serde(with = "sibling_list")]
    pub siblings: Vec<Hash>,

    /// Terminal node
    pub terminal: ProofNode,
}

impl AuthenticationPath {
    /// Attach the VRF proof for the lookup index
    pub fn with_vrf_proof(mut self, proof: VrfProof) -> Self {
        self.vrf_proof = Some(proof);
        self
    }

    /// Whether this path proves inclusion or absence of `lookup_index`
    pub fn proof_type(&self) -> ProofType {
        match &self.terminal {
            ProofNode::Leaf { index, .. } if *index == self.lookup_index => ProofType::Inclusion,
            _ => ProofType::Absence,
        }
    }

    /// Key revealed by an inclusion proof
    pub fn key(&self) -> Option<&[u8]> {
        match &self.terminal {
            ProofNode::Leaf {
                opening: Some(opening),
                ..
            } => Some(&opening.key),
            _ => None,
        }
    }

    /// Recompute the root hash by folding siblings from the terminal upward
    pub fn compute_root(&self) -> Result<Hash, ProofFailure> {
        let level = self.terminal.level();
        if level == 0 || level > INDEX_BITS || level as usize != self.siblings.len() {
            return Err(ProofFailure::BadAuthPath);
        }

        let mut hash = match &self.terminal {
            ProofNode::Leaf {
                index, commitment, ..
            } => {
                if !index.shares_prefix(&self.lookup_index, level) {
                    return Err(ProofFailure::BadLookupIndex);
                }
                leaf_hash(&self.tree_nonce, index, level, commitment)
            }
            ProofNode::Empty { .. } => {
                empty_hash(&self.tree_nonce, &self.lookup_index.prefix(level), level)
            }
        };

        for depth in (0..level).rev() {
            let sibling = &self.siblings[depth as usize];
            hash = if self.lookup_index.bit(depth) {
                interior_hash(sibling, &hash)
            } else {
                interior_hash(&hash, sibling)
            };
        }
        Ok(hash)
    }

    /// Verify the path for `name` against `root`.
    ///
    /// Checks the VRF proof for the lookup index, the commitment opening of
    /// an inclusion proof, and that the recomputed root equals `root`.
    pub fn verify(
        &self,
        name: &str,
        vrf_public_key: &VrfPublicKey,
        root: &Hash,
    ) -> Result<ProofType, ProofFailure> {
        let vrf_proof = self.vrf_proof.as_ref().ok_or(ProofFailure::MissingProof)?;
        vrf_public_key
            .verify_index(name, &self.lookup_index, vrf_proof)
            .map_err(|_| ProofFailure::InvalidVrfProof)?;

        let proof_type = self.proof_type();
        if let ProofNode::Leaf {
            commitment,
            opening,
            ..
        } = &self.terminal
        {
            match (proof_type, opening) {
                (ProofType::Inclusion, Some(opening)) => {
                    let opened = Commitment::with_salt(opening.salt, name, &opening.key);
                    if opened.value != *commitment {
                        return Err(ProofFailure::BadCommitment);
                    }
                }
                (ProofType::Inclusion, None) => return Err(ProofFailure::BadCommitment),
                (ProofType::Absence, _) => {}
            }
        }

        if self.compute_root()? != *root {
            return Err(ProofFailure::BadAuthPath);
        }
        Ok(proof_type)
    }
}

mod sibling_list {
    use crate::types::Hash;
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(siblings: &[Hash], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(siblings.iter().map(|h| STANDARD.encode(h)))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<Hash>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = Vec::<String>::deserialize(deserializer)?;
        encoded
            .into_iter()
            .map(|s| {
                let bytes = STANDARD.decode(&s).map_err(serde::de::Error::custom)?;
                bytes
                    .try_into()
                    .map_err(|_| serde::de::Error::custom("sibling hash must be 32 bytes"))
            })
            .collect()
    }
}
