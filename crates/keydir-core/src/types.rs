//! Common types used across the key directory

use crate::error::{KeydirError, Result};
use crate::vrf::VrfPublicKey;
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Size in bytes of every hash, index and salt
pub const HASH_SIZE: usize = 32;

/// Number of bits in an index, which bounds the tree depth
pub const INDEX_BITS: u32 = (HASH_SIZE * 8) as u32;

/// SHA-256 output
pub type Hash = [u8; HASH_SIZE];

/// All-zero hash stands in for "no previous STR"
pub const ZERO_HASH: Hash = [0u8; HASH_SIZE];

/// SHA-256 over the concatenation of `parts`
pub fn sha256(parts: &[&[u8]]) -> Hash {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Lookup index derived from a name through the VRF.
///
/// Bits are read most-significant first; bit `i` selects the child taken at
/// tree level `i`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Index(#[serde(with = "serde_b64::array")] Hash);

impl Index {
    /// Wrap raw index bytes
    pub fn from_bytes(bytes: Hash) -> Self {
        Self(bytes)
    }

    /// Raw index bytes
    pub fn as_bytes(&self) -> &Hash {
        &self.0
    }

    /// Bit at position `i` (0 = most significant bit of byte 0)
    pub fn bit(&self, i: u32) -> bool {
        let byte = self.0[(i / 8) as usize];
        (byte >> (7 - (i % 8))) & 1 == 1
    }

    /// Copy of the index keeping only the first `level` bits
    pub fn prefix(&self, level: u32) -> Index {
        let mut out = [0u8; HASH_SIZE];
        let full = (level / 8) as usize;
        out[..full.min(HASH_SIZE)].copy_from_slice(&self.0[..full.min(HASH_SIZE)]);
        let rem = level % 8;
        if rem != 0 && full < HASH_SIZE {
            out[full] = self.0[full] & (0xFFu8 << (8 - rem));
        }
        Index(out)
    }

    /// Copy of the index with bit `i` set to `value`
    pub fn with_bit(&self, i: u32, value: bool) -> Index {
        let mut out = self.0;
        let mask = 1u8 << (7 - (i % 8));
        if value {
            out[(i / 8) as usize] |= mask;
        } else {
            out[(i / 8) as usize] &= !mask;
        }
        Index(out)
    }

    /// Whether the first `level` bits of both indices agree
    pub fn shares_prefix(&self, other: &Index, level: u32) -> bool {
        self.prefix(level) == other.prefix(level)
    }
}

impl fmt::Debug for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Index({})", hex::encode(&self.0[..8]))
    }
}

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Hiding commitment to a name-to-key binding
///
/// `value = H(salt ‖ len(name) ‖ name ‖ key)`. The salt is revealed only
/// in inclusion proofs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commitment {
    /// Random blinding salt
    #[serde(with = "serde_b64::array")]
    pub salt: Hash,

    /// Commitment hash stored in the leaf
    #[serde(with = "serde_b64::array")]
    pub value: Hash,
}

impl Commitment {
    /// Commit to `key` under `name` with a fresh random salt
    pub fn new(name: &str, key: &[u8]) -> Self {
        let mut salt = [0u8; HASH_SIZE];
        OsRng.fill_bytes(&mut salt);
        Self::with_salt(salt, name, key)
    }

    /// Commit with a caller-supplied salt
    pub fn with_salt(salt: Hash, name: &str, key: &[u8]) -> Self {
        let value = commitment_hash(&salt, name, key);
        Self { salt, value }
    }

    /// Check that the commitment opens to `(name, key)`
    pub fn verify(&self, name: &str, key: &[u8]) -> bool {
        commitment_hash(&self.salt, name, key) == self.value
    }
}

fn commitment_hash(salt: &Hash, name: &str, key: &[u8]) -> Hash {
    let name_len = (name.len() as u64).to_be_bytes();
    sha256(&[salt, &name_len, name.as_bytes(), key])
}

/// Directory policies committed by hash in every signed tree root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policies {
    /// Policy/protocol version string
    pub version: String,

    /// Hash algorithm used for tree and chain hashing
    pub hash_algorithm: String,

    /// Public key for verifying lookup indices
    pub vrf_public_key: VrfPublicKey,

    /// Target epoch length in seconds (0 means manual epochs)
    pub epoch_deadline: u64,
}

impl Policies {
    /// Create policies with the default version and hash algorithm
    pub fn new(vrf_public_key: VrfPublicKey, epoch_deadline: u64) -> Self {
        Self {
            version: crate::VERSION.to_string(),
            hash_algorithm: "SHA-256".to_string(),
            vrf_public_key,
            epoch_deadline,
        }
    }

    /// Set the version string
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Hash committed in signed tree roots
    pub fn hash(&self) -> Result<Hash> {
        let bytes = serde_json::to_vec(self).map_err(KeydirError::from)?;
        Ok(sha256(&[&bytes]))
    }
}

/// Base64 serialization helpers for byte fields
pub(crate) mod serde_b64 {
    pub mod bytes {
        use base64::{engine::general_purpose::STANDARD, Engine};
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            serializer.serialize_str(&STANDARD.encode(bytes))
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
        where
            D: Deserializer<'de>,
        {
            let s = String::deserialize(deserializer)?;
            STANDARD.decode(&s).map_err(serde::de::Error::custom)
        }
    }

    pub mod array {
        use base64::{engine::general_purpose::STANDARD, Engine};
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S, const N: usize>(bytes: &[u8; N], serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            serializer.serialize_str(&STANDARD.encode(bytes))
        }

        pub fn deserialize<'de, D, const N: usize>(deserializer: D) -> Result<[u8; N], D::Error>
        where
            D: Deserializer<'de>,
        {
            let s = String::deserialize(deserializer)?;
            let bytes = STANDARD.decode(&s).map_err(serde::de::Error::custom)?;
            let len = bytes.len();
            bytes.try_into().map_err(|_| {
                serde::de::Error::custom(format!("expected {} bytes, got {}", N, len))
            })
        }
    }
}
