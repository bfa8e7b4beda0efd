//! Cryptographic primitives for directory signing
//!
//! This module implements COSE_Sign1 signing using Ed25519 keys. Every
//! structure the directory vouches for (signed tree roots, temporary
//! bindings) is wrapped in a `CoseSigned<T>` whose payload is the JSON
//! encoding of `T`.
//!
//! Key types:
//! - `KeyPair`: Ed25519 key pair held by the directory
//! - `PublicKey`: Ed25519 public key for verification by clients
//! - `CoseSigned<T>`: COSE_Sign1 wrapped payload

use crate::error::{KeydirError, Result};
use crate::types::{sha256, Hash};
use coset::{iana, CborSerializable, CoseSign1, CoseSign1Builder, HeaderBuilder};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize, Serializer};
use std::marker::PhantomData;

/// COSE algorithm identifier for EdDSA (Ed25519)
const EDDSA_ALG: iana::Algorithm = iana::Algorithm::EdDSA;

/// A signed COSE_Sign1 structure carrying a JSON-encoded `T`
#[derive(Debug)]
pub struct CoseSigned<T> {
    /// The COSE_Sign1 structure
    cose: CoseSign1,
    /// Phantom type marker
    _marker: PhantomData<T>,
}

impl<T> Clone for CoseSigned<T> {
    fn clone(&self) -> Self {
        Self {
            cose: self.cose.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> CoseSigned<T> {
    /// Get the raw COSE_Sign1 structure
    pub fn cose(&self) -> &CoseSign1 {
        &self.cose
    }

    /// Get the key ID from the protected header
    pub fn kid(&self) -> Option<String> {
        let kid = &self.cose.protected.header.key_id;
        if kid.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(kid).to_string())
        }
    }

    /// Get the signature bytes
    pub fn signature(&self) -> &[u8] {
        &self.cose.signature
    }

    /// Serialize to CBOR bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.cose.clone().to_vec().map_err(KeydirError::from)
    }

    /// Deserialize from CBOR bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let cose = CoseSign1::from_slice(bytes).map_err(KeydirError::from)?;
        Ok(Self {
            cose,
            _marker: PhantomData,
        })
    }

    /// Get the payload bytes
    pub fn payload(&self) -> Option<&[u8]> {
        self.cose.payload.as_deref()
    }

    /// SHA-256 over the CBOR encoding, signature included
    pub fn digest(&self) -> Result<Hash> {
        let bytes = self.to_bytes()?;
        Ok(sha256(&[&bytes]))
    }
}

impl<T: DeserializeOwned> CoseSigned<T> {
    /// Extract and deserialize the payload
    ///
    /// Note: This does NOT verify the signature. Use `PublicKey::verify` for that.
    pub fn extract(&self) -> Result<T> {
        let payload = self
            .payload()
            .ok_or(KeydirError::MissingField("payload".into()))?;
        serde_json::from_slice(payload).map_err(KeydirError::from)
    }
}

impl<T> PartialEq for CoseSigned<T> {
    fn eq(&self, other: &Self) -> bool {
        match (self.to_bytes(), other.to_bytes()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}

impl<T> Eq for CoseSigned<T> {}

impl<T> Serialize for CoseSigned<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        use base64::{engine::general_purpose::STANDARD, Engine};
        let bytes = self.to_bytes().map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&STANDARD.encode(bytes))
    }
}

impl<'de, T> Deserialize<'de> for CoseSigned<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        use base64::{engine::general_purpose::STANDARD, Engine};
        let s = String::deserialize(deserializer)?;
        let bytes = STANDARD.decode(&s).map_err(serde::de::Error::custom)?;
        CoseSigned::from_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}

/// Ed25519 key pair for signing directory commitments
#[derive(Clone)]
pub struct KeyPair {
    /// Key identifier
    kid: String,
    /// Ed25519 signing key (private)
    signing_key: SigningKey,
    /// Ed25519 verifying key (public)
    verifying_key: VerifyingKey,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("kid", &self.kid)
            .field("verifying_key", &"[redacted]")
            .finish()
    }
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate(kid: impl Into<String>) -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self::from_signing_key(kid, signing_key)
    }

    /// Create a key pair from an existing signing key
    pub fn from_signing_key(kid: impl Into<String>, signing_key: SigningKey) -> Self {
        let verifying_key = signing_key.verifying_key();
        Self {
            kid: kid.into(),
            signing_key,
            verifying_key,
        }
    }

    /// Create a key pair from raw secret key bytes
    pub fn from_bytes(kid: impl Into<String>, bytes: &[u8; 32]) -> Self {
        Self::from_signing_key(kid, SigningKey::from_bytes(bytes))
    }

    /// Get the key identifier
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Get the public key
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            kid: self.kid.clone(),
            verifying_key: self.verifying_key,
        }
    }

    /// Get the raw signing key bytes
    pub fn signing_key_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    /// Sign a payload and wrap in COSE_Sign1
    pub fn sign<T: Serialize>(&self, payload: &T) -> Result<CoseSigned<T>> {
        let bytes = serde_json::to_vec(payload).map_err(KeydirError::from)?;
        let cose = self.sign_cose(&bytes)?;
        Ok(CoseSigned {
            cose,
            _marker: PhantomData,
        })
    }

    fn sign_cose(&self, payload: &[u8]) -> Result<CoseSign1> {
        let protected = HeaderBuilder::new()
            .algorithm(EDDSA_ALG)
            .key_id(self.kid.as_bytes().to_vec())
            .build();

        let builder = CoseSign1Builder::new()
            .protected(protected)
            .payload(payload.to_vec());

        let signed_builder = builder.try_create_signature(&[], |data| {
            let signature = self.signing_key.sign(data);
            Ok::<_, KeydirError>(signature.to_bytes().to_vec())
        })?;

        Ok(signed_builder.build())
    }
}

/// Ed25519 public key for verification
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey {
    /// Key identifier
    kid: String,
    /// Ed25519 verifying key
    verifying_key: VerifyingKey,
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublicKey").field("kid", &self.kid).finish()
    }
}

impl PublicKey {
    /// Create a public key from raw bytes
    pub fn from_bytes(kid: impl Into<String>, bytes: &[u8; 32]) -> Result<Self> {
        let verifying_key = VerifyingKey::from_bytes(bytes)
            .map_err(|e| KeydirError::CryptoError(e.to_string()))?;
        Ok(Self {
            kid: kid.into(),
            verifying_key,
        })
    }

    /// Get the key identifier
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Get the raw verifying key bytes
    pub fn to_bytes(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }

    /// Verify a signed payload and extract it
    pub fn verify<T: DeserializeOwned>(&self, signed: &CoseSigned<T>) -> Result<T> {
        self.verify_cose(&signed.cose)?;
        signed.extract()
    }

    fn verify_cose(&self, cose: &CoseSign1) -> Result<()> {
        let kid = &cose.protected.header.key_id;
        if !kid.is_empty() {
            let kid_str = String::from_utf8_lossy(kid);
            if kid_str != self.kid {
                return Err(KeydirError::CryptoError(format!(
                    "Key ID mismatch: expected '{}', got '{}'",
                    self.kid, kid_str
                )));
            }
        }

        let sig_structure = cose.tbs_data(&[]);

        let signature_bytes: [u8; 64] = cose
            .signature
            .as_slice()
            .try_into()
            .map_err(|_| KeydirError::CryptoError("Invalid signature length".into()))?;
        let signature = Signature::from_bytes(&signature_bytes);

        self.verifying_key
            .verify(&sig_structure, &signature)
            .map_err(|e| KeydirError::CryptoError(e.to_string()))
    }
}

/// Serializable public key for configuration and transmission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializablePublicKey {
    /// Key identifier
    pub kid: String,
    /// Base64-encoded public key bytes
    pub key: String,
}

impl From<&PublicKey> for SerializablePublicKey {
    fn from(pk: &PublicKey) -> Self {
        use base64::{engine::general_purpose::STANDARD, Engine};
        Self {
            kid: pk.kid.clone(),
            key: STANDARD.encode(pk.to_bytes()),
        }
    }
}

impl TryFrom<SerializablePublicKey> for PublicKey {
    type Error = KeydirError;

    fn try_from(spk: SerializablePublicKey) -> Result<Self> {
        use base64::{engine::general_purpose::STANDARD, Engine};
        let bytes = STANDARD
            .decode(&spk.key)
            .map_err(|e| KeydirError::CryptoError(e.to_string()))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| KeydirError::CryptoError("Invalid key length".into()))?;
        PublicKey::from_bytes(spk.kid, &bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Payload {
        epoch: u64,
        note: String,
    }

    fn payload() -> Payload {
        Payload {
            epoch: 7,
            note: "root".into(),
        }
    }

    #[test]
    fn test_keypair_generation() {
        let kp = KeyPair::generate("directory-1");
        assert_eq!(kp.kid(), "directory-1");
        assert_eq!(kp.public_key().kid(), "directory-1");
    }

    #[test]
    fn test_sign_and_verify() {
        let kp = KeyPair::generate("directory-1");
        let signed = kp.sign(&payload()).unwrap();
        assert_eq!(signed.kid().as_deref(), Some("directory-1"));

        let verified = kp.public_key().verify(&signed).unwrap();
        assert_eq!(verified, payload());
    }

    #[test]
    fn test_verification_fails_with_wrong_key() {
        let kp1 = KeyPair::generate("directory-1");
        let kp2 = KeyPair::generate("directory-1");

        let signed = kp1.sign(&payload()).unwrap();
        assert!(kp2.public_key().verify(&signed).is_err());
    }

    #[test]
    fn test_verification_fails_with_kid_mismatch() {
        let kp = KeyPair::generate("directory-1");
        let renamed = KeyPair::from_bytes("directory-2", &kp.signing_key_bytes());

        let signed = kp.sign(&payload()).unwrap();
        assert!(renamed.public_key().verify(&signed).is_err());
    }

    #[test]
    fn test_cose_serialization_roundtrip() {
        let kp = KeyPair::generate("directory-1");
        let signed = kp.sign(&payload()).unwrap();

        let bytes = signed.to_bytes().unwrap();
        let restored: CoseSigned<Payload> = CoseSigned::from_bytes(&bytes).unwrap();
        assert_eq!(restored, signed);
        assert_eq!(restored.digest().unwrap(), signed.digest().unwrap());
        assert_eq!(kp.public_key().verify(&restored).unwrap(), payload());
    }

    #[test]
    fn test_signing_is_deterministic() {
        let kp = KeyPair::generate("directory-1");
        let a = kp.sign(&payload()).unwrap();
        let b = kp.sign(&payload()).unwrap();
        assert_eq!(a.digest().unwrap(), b.digest().unwrap());
    }

    #[test]
    fn test_public_key_serialization() {
        let pk = KeyPair::generate("test").public_key();
        let serializable: SerializablePublicKey = (&pk).into();
        let restored: PublicKey = serializable.try_into().unwrap();
        assert_eq!(restored, pk);
    }

    #[test]
    fn test_signature_bytes_accessible() {
        let kp = KeyPair::generate("test");
        let signed = kp.sign(&payload()).unwrap();
        assert_eq!(signed.signature().len(), 64);
    }
}
