//! Verifiable random function for lookup index derivation
//!
//! ECVRF over edwards25519 with SHA-512 and try-and-increment hashing to
//! the curve. The directory holds the secret key and derives each name's
//! index together with a proof; anyone holding the public key can check
//! that the index was honestly derived without learning the secret.
//!
//! Proof layout: `Gamma (32) ‖ c (16) ‖ s (32)`.

use crate::error::{KeydirError, Result};
use crate::types::{Index, HASH_SIZE};
use curve25519_dalek::{
    edwards::{CompressedEdwardsY, EdwardsPoint},
    scalar::Scalar,
    traits::IsIdentity,
};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};

const SUITE: u8 = 0x03;
const CHALLENGE_LEN: usize = 16;

/// Length in bytes of a serialized VRF proof
pub const PROOF_LEN: usize = 32 + CHALLENGE_LEN + 32;

/// VRF secret key
#[derive(Clone)]
pub struct VrfSecretKey {
    seed: [u8; 32],
    scalar: Scalar,
    nonce_prefix: [u8; 32],
    public: VrfPublicKey,
}

impl std::fmt::Debug for VrfSecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VrfSecretKey")
            .field("public", &self.public)
            .finish()
    }
}

/// VRF public key (compressed edwards25519 point)
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VrfPublicKey(#[serde(with = "crate::types::serde_b64::array")] [u8; 32]);

impl std::fmt::Debug for VrfPublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "VrfPublicKey({})", hex::encode(&self.0[..8]))
    }
}

/// Proof that an index was derived from a name under a VRF key
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VrfProof(#[serde(with = "crate::types::serde_b64::bytes")] Vec<u8>);

impl std::fmt::Debug for VrfProof {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "VrfProof({} bytes)", self.0.len())
    }
}

impl VrfProof {
    /// Wrap raw proof bytes
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Raw proof bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl VrfSecretKey {
    /// Generate a new random key
    pub fn generate() -> Self {
        let mut seed = [0u8; 32];
        OsRng.fill_bytes(&mut seed);
        Self::from_seed(&seed)
    }

    /// Deterministically expand a 32-byte seed into a key
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let mut expanded = [0u8; 64];
        expanded.copy_from_slice(&Sha512::digest(seed));
        let mut scalar_bytes = [0u8; 32];
        scalar_bytes.copy_from_slice(&expanded[..32]);
        scalar_bytes[0] &= 248;
        scalar_bytes[31] &= 127;
        scalar_bytes[31] |= 64;
        let scalar = Scalar::from_bytes_mod_order(scalar_bytes);

        let mut nonce_prefix = [0u8; 32];
        nonce_prefix.copy_from_slice(&expanded[32..]);

        let public = VrfPublicKey(EdwardsPoint::mul_base(&scalar).compress().to_bytes());

        Self {
            seed: *seed,
            scalar,
            nonce_prefix,
            public,
        }
    }

    /// Seed bytes this key was expanded from
    pub fn seed_bytes(&self) -> [u8; 32] {
        self.seed
    }

    /// Matching public key
    pub fn public_key(&self) -> VrfPublicKey {
        self.public
    }

    /// Derive the lookup index for `name` together with its proof.
    ///
    /// Deterministic: the same name always yields the same index and proof.
    pub fn derive_index(&self, name: &str) -> Result<(Index, VrfProof)> {
        let alpha = name.as_bytes();
        let h = hash_to_curve(&self.public.0, alpha)?;
        let h_bytes = h.compress().to_bytes();
        let gamma = self.scalar * h;

        let k = nonce(&self.nonce_prefix, &h_bytes);
        let u = EdwardsPoint::mul_base(&k);
        let v = k * h;
        let c = challenge(&self.public.0, &h, &gamma, &u, &v);
        let s = k + challenge_scalar(&c) * self.scalar;

        let mut proof = Vec::with_capacity(PROOF_LEN);
        proof.extend_from_slice(&gamma.compress().to_bytes());
        proof.extend_from_slice(&c);
        proof.extend_from_slice(&s.to_bytes());

        Ok((gamma_to_index(&gamma), VrfProof(proof)))
    }

    /// Derive just the index for `name`
    pub fn index(&self, name: &str) -> Result<Index> {
        self.derive_index(name).map(|(index, _)| index)
    }
}

impl VrfPublicKey {
    /// Create a public key from raw bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw compressed point bytes
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0
    }

    /// Check `proof` and return the index it commits to
    pub fn proof_to_index(&self, name: &str, proof: &VrfProof) -> Result<Index> {
        let bytes = proof.as_bytes();
        if bytes.len() != PROOF_LEN {
            return Err(KeydirError::InvalidVrfProof);
        }

        let y = decompress(&self.0).ok_or(KeydirError::InvalidVrfProof)?;
        if y.is_small_order() {
            return Err(KeydirError::InvalidVrfProof);
        }

        let mut gamma_bytes = [0u8; 32];
        gamma_bytes.copy_from_slice(&bytes[..32]);
        let gamma = decompress(&gamma_bytes).ok_or(KeydirError::InvalidVrfProof)?;

        let mut c = [0u8; CHALLENGE_LEN];
        c.copy_from_slice(&bytes[32..32 + CHALLENGE_LEN]);

        let mut s_bytes = [0u8; 32];
        s_bytes.copy_from_slice(&bytes[32 + CHALLENGE_LEN..]);
        let s: Scalar = Option::from(Scalar::from_canonical_bytes(s_bytes))
            .ok_or(KeydirError::InvalidVrfProof)?;

        let h = hash_to_curve(&self.0, name.as_bytes())?;
        let c_scalar = challenge_scalar(&c);
        let u = EdwardsPoint::mul_base(&s) - c_scalar * y;
        let v = s * h - c_scalar * gamma;

        if challenge(&self.0, &h, &gamma, &u, &v) != c {
            return Err(KeydirError::InvalidVrfProof);
        }

        Ok(gamma_to_index(&gamma))
    }

    /// Verify that `index` was honestly derived from `name`.
    ///
    /// Fails with `InvalidVrfProof` on any mismatch.
    pub fn verify_index(&self, name: &str, index: &Index, proof: &VrfProof) -> Result<()> {
        let derived = self.proof_to_index(name, proof)?;
        if &derived != index {
            return Err(KeydirError::InvalidVrfProof);
        }
        Ok(())
    }
}

fn decompress(bytes: &[u8; 32]) -> Option<EdwardsPoint> {
    CompressedEdwardsY(*bytes).decompress()
}

/// Try-and-increment: hash with a counter until the digest decodes to a
/// point whose cofactor-cleared multiple is not the identity.
fn hash_to_curve(public: &[u8; 32], alpha: &[u8]) -> Result<EdwardsPoint> {
    for ctr in 0u8..=255 {
        let digest = Sha512::new()
            .chain_update([SUITE, 0x01])
            .chain_update(public)
            .chain_update(alpha)
            .chain_update([ctr, 0x00])
            .finalize();
        let mut candidate = [0u8; 32];
        candidate.copy_from_slice(&digest[..32]);
        if let Some(point) = decompress(&candidate) {
            let cleared = point.mul_by_cofactor();
            if !cleared.is_identity() {
                return Ok(cleared);
            }
        }
    }
    Err(KeydirError::CryptoError("hash to curve exhausted counter".into()))
}

fn nonce(prefix: &[u8; 32], h_bytes: &[u8; 32]) -> Scalar {
    let digest = Sha512::new()
        .chain_update(prefix)
        .chain_update(h_bytes)
        .finalize();
    let mut wide = [0u8; 64];
    wide.copy_from_slice(&digest);
    Scalar::from_bytes_mod_order_wide(&wide)
}

fn challenge(
    public: &[u8; 32],
    h: &EdwardsPoint,
    gamma: &EdwardsPoint,
    u: &EdwardsPoint,
    v: &EdwardsPoint,
) -> [u8; CHALLENGE_LEN] {
    let digest = Sha512::new()
        .chain_update([SUITE, 0x02])
        .chain_update(public)
        .chain_update(h.compress().as_bytes())
        .chain_update(gamma.compress().as_bytes())
        .chain_update(u.compress().as_bytes())
        .chain_update(v.compress().as_bytes())
        .chain_update([0x00])
        .finalize();
    let mut c = [0u8; CHALLENGE_LEN];
    c.copy_from_slice(&digest[..CHALLENGE_LEN]);
    c
}

fn challenge_scalar(c: &[u8; CHALLENGE_LEN]) -> Scalar {
    let mut bytes = [0u8; 32];
    bytes[..CHALLENGE_LEN].copy_from_slice(c);
    Scalar::from_bytes_mod_order(bytes)
}

fn gamma_to_index(gamma: &EdwardsPoint) -> Index {
    let digest = Sha512::new()
        .chain_update([SUITE, 0x03])
        .chain_update(gamma.mul_by_cofactor().compress().as_bytes())
        .chain_update([0x00])
        .finalize();
    let mut out = [0u8; HASH_SIZE];
    out.copy_from_slice(&digest[..HASH_SIZE]);
    Index::from_bytes(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_index_is_deterministic() {
        let key = VrfSecretKey::from_seed(&[9u8; 32]);
        let (i1, p1) = key.derive_index("alice").unwrap();
        let (i2, p2) = key.derive_index("alice").unwrap();
        assert_eq!(i1, i2);
        assert_eq!(p1, p2);
    }

    #[test]
    fn test_distinct_names_distinct_indices() {
        let key = VrfSecretKey::generate();
        assert_ne!(key.index("alice").unwrap(), key.index("bob").unwrap());
    }

    #[test]
    fn test_verify_accepts_own_proof() {
        let key = VrfSecretKey::generate();
        let (index, proof) = key.derive_index("alice").unwrap();
        assert_eq!(proof.as_bytes().len(), PROOF_LEN);
        key.public_key().verify_index("alice", &index, &proof).unwrap();
    }

    #[test]
    fn test_verify_rejects_other_name() {
        let key = VrfSecretKey::generate();
        let (index, proof) = key.derive_index("alice").unwrap();
        let result = key.public_key().verify_index("bob", &index, &proof);
        assert!(matches!(result, Err(KeydirError::InvalidVrfProof)));
    }

    #[test]
    fn test_verify_rejects_wrong_public_key() {
        let key = VrfSecretKey::generate();
        let other = VrfSecretKey::generate();
        let (index, proof) = key.derive_index("alice").unwrap();
        assert!(other.public_key().verify_index("alice", &index, &proof).is_err());
    }

    #[test]
    fn test_verify_rejects_tampered_proof() {
        let key = VrfSecretKey::generate();
        let (index, proof) = key.derive_index("alice").unwrap();

        let mut bytes = proof.as_bytes().to_vec();
        bytes[40] ^= 0x01;
        let tampered = VrfProof::from_bytes(bytes);
        assert!(key.public_key().verify_index("alice", &index, &tampered).is_err());

        let truncated = VrfProof::from_bytes(proof.as_bytes()[..64].to_vec());
        assert!(key.public_key().verify_index("alice", &index, &truncated).is_err());
    }

    #[test]
    fn test_verify_rejects_substituted_index() {
        let key = VrfSecretKey::generate();
        let (_, proof) = key.derive_index("alice").unwrap();
        let other_index = key.index("bob").unwrap();
        assert!(key.public_key().verify_index("alice", &other_index, &proof).is_err());
    }

    #[test]
    fn test_seed_roundtrip() {
        let key = VrfSecretKey::generate();
        let restored = VrfSecretKey::from_seed(&key.seed_bytes());
        assert_eq!(restored.public_key(), key.public_key());
        assert_eq!(restored.index("carol").unwrap(), key.index("carol").unwrap());
    }
}
