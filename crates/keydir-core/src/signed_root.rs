//! Signed tree roots and the hash-chained epoch ledger
//!
//! Each epoch's snapshot root is sealed into a `TreeRoot`, signed as
//! COSE_Sign1 by the directory key, and linked to its predecessor through
//! the SHA-256 digest of the predecessor's encoded COSE structure.

use crate::crypto::{CoseSigned, KeyPair, PublicKey};
use crate::error::{KeydirError, Result};
use crate::merkletree::Snapshot;
use crate::types::{Hash, Policies, ZERO_HASH};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Body of a signed tree root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeRoot {
    /// Epoch this root seals
    pub epoch: u64,

    /// Root hash of the epoch's snapshot
    #[serde(with = "crate::types::serde_b64::array")]
    pub tree_hash: Hash,

    /// Digest of the previous signed tree root (zero for genesis)
    #[serde(with = "crate::types::serde_b64::array")]
    pub previous_str_hash: Hash,

    /// Hash of the directory policies in force
    #[serde(with = "crate::types::serde_b64::array")]
    pub policies_hash: Hash,
}

/// A `TreeRoot` together with its COSE signature.
///
/// Serializes as the signed structure alone; the body and digest are
/// recomputed on decode. Decoding does not check the signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "CoseSigned<TreeRoot>", into = "CoseSigned<TreeRoot>")]
pub struct SignedTreeRoot {
    signed: CoseSigned<TreeRoot>,
    body: TreeRoot,
    digest: Hash,
}

impl SignedTreeRoot {
    /// Decode the body of a signed root
    pub fn from_signed(signed: CoseSigned<TreeRoot>) -> Result<Self> {
        let body = signed.extract()?;
        let digest = signed.digest()?;
        Ok(Self {
            signed,
            body,
            digest,
        })
    }

    pub fn epoch(&self) -> u64 {
        self.body.epoch
    }

    pub fn tree_hash(&self) -> &Hash {
        &self.body.tree_hash
    }

    pub fn previous_str_hash(&self) -> &Hash {
        &self.body.previous_str_hash
    }

    pub fn policies_hash(&self) -> &Hash {
        &self.body.policies_hash
    }

    pub fn body(&self) -> &TreeRoot {
        &self.body
    }

    pub fn signed(&self) -> &CoseSigned<TreeRoot> {
        &self.signed
    }

    /// Digest the next root links to
    pub fn digest(&self) -> &Hash {
        &self.digest
    }

    /// Check the signature and that the signed payload is this body
    pub fn verify(&self, public_key: &PublicKey) -> Result<()> {
        let verified = public_key.verify(&self.signed)?;
        if verified != self.body {
            return Err(KeydirError::CryptoError(
                "Signed payload does not match tree root".into(),
            ));
        }
        Ok(())
    }

    /// Whether `self` directly follows `previous`
    pub fn follows(&self, previous: &SignedTreeRoot) -> bool {
        previous.epoch().checked_add(1) == Some(self.epoch())
            && self.previous_str_hash() == previous.digest()
    }
}

impl TryFrom<CoseSigned<TreeRoot>> for SignedTreeRoot {
    type Error = KeydirError;

    fn try_from(signed: CoseSigned<TreeRoot>) -> Result<Self> {
        SignedTreeRoot::from_signed(signed)
    }
}

impl From<SignedTreeRoot> for CoseSigned<TreeRoot> {
    fn from(root: SignedTreeRoot) -> Self {
        root.signed
    }
}

/// Verify signatures and links of a contiguous chain starting at epoch 0
pub fn verify_chain(strs: &[SignedTreeRoot], public_key: &PublicKey) -> Result<()> {
    let mut previous: Option<&SignedTreeRoot> = None;
    for root in strs {
        root.verify(public_key)?;
        match previous {
            None => {
                if root.epoch() != 0 || root.previous_str_hash() != &ZERO_HASH {
                    return Err(KeydirError::StateMismatch(
                        "Chain does not start at a genesis root".into(),
                    ));
                }
            }
            Some(prev) => {
                if !root.follows(prev) {
                    return Err(KeydirError::StateMismatch(format!(
                        "Root for epoch {} does not link to epoch {}",
                        root.epoch(),
                        prev.epoch()
                    )));
                }
            }
        }
        previous = Some(root);
    }
    Ok(())
}

/// Append-only chain of signed tree roots, one per epoch
#[derive(Debug)]
pub struct StrChain {
    signing_key: Option<KeyPair>,
    public_key: PublicKey,
    strs: Vec<SignedTreeRoot>,
}

impl StrChain {
    /// Create an empty chain signed by `signing_key`
    pub fn new(signing_key: KeyPair) -> Self {
        Self {
            public_key: signing_key.public_key(),
            signing_key: Some(signing_key),
            strs: Vec::new(),
        }
    }

    /// Rebuild a chain from persisted roots, verifying every link
    pub fn from_parts(
        public_key: PublicKey,
        signing_key: Option<KeyPair>,
        strs: Vec<SignedTreeRoot>,
    ) -> Result<Self> {
        let signing_key = signing_key
            .map(|key| {
                adopt_kid(key, &public_key).ok_or_else(|| {
                    KeydirError::StateMismatch(
                        "Signing key does not match the chain's public key".into(),
                    )
                })
            })
            .transpose()?;
        verify_chain(&strs, &public_key)?;
        Ok(Self {
            signing_key,
            public_key,
            strs,
        })
    }

    /// Seal `snapshot` as the next epoch and append the signed root.
    ///
    /// Fails with `SigningUnavailable` when no signing key is loaded and
    /// with `OutOfOrderEpoch` unless the snapshot follows the last root.
    pub fn advance_epoch(
        &mut self,
        snapshot: &Snapshot,
        policies: &Policies,
    ) -> Result<SignedTreeRoot> {
        let expected = self.next_epoch();
        if snapshot.epoch() != expected {
            return Err(KeydirError::OutOfOrderEpoch {
                expected,
                actual: snapshot.epoch(),
            });
        }

        let signing_key = self.signing_key.as_ref().ok_or_else(|| {
            warn!(epoch = expected, "Cannot advance epoch without a signing key");
            KeydirError::SigningUnavailable
        })?;

        let body = TreeRoot {
            epoch: expected,
            tree_hash: snapshot.root_hash(),
            previous_str_hash: self.strs.last().map_or(ZERO_HASH, |s| *s.digest()),
            policies_hash: policies.hash()?,
        };
        let signed = SignedTreeRoot::from_signed(signing_key.sign(&body)?)?;
        self.strs.push(signed.clone());

        info!(
            epoch = expected,
            tree_hash = %hex::encode(body.tree_hash),
            "Signed tree root"
        );
        Ok(signed)
    }

    /// Epoch the next root will seal
    pub fn next_epoch(&self) -> u64 {
        self.strs.len() as u64
    }

    pub fn get(&self, epoch: u64) -> Option<&SignedTreeRoot> {
        usize::try_from(epoch).ok().and_then(|i| self.strs.get(i))
    }

    pub fn latest(&self) -> Option<&SignedTreeRoot> {
        self.strs.last()
    }

    /// Roots for `from..=to`, clamped to the published range
    pub fn range(&self, from: u64, to: u64) -> Vec<SignedTreeRoot> {
        let Some(latest) = self.latest().map(SignedTreeRoot::epoch) else {
            return Vec::new();
        };
        let to = to.min(latest);
        if from > to {
            return Vec::new();
        }
        self.strs[from as usize..=to as usize].to_vec()
    }

    pub fn strs(&self) -> &[SignedTreeRoot] {
        &self.strs
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn has_signing_key(&self) -> bool {
        self.signing_key.is_some()
    }

    /// Sign an arbitrary payload with the directory key
    pub fn sign<T: Serialize>(&self, payload: &T) -> Result<CoseSigned<T>> {
        self.signing_key
            .as_ref()
            .ok_or(KeydirError::SigningUnavailable)?
            .sign(payload)
    }

    /// Remove the signing key, returning it
    pub fn unload_signing_key(&mut self) -> Option<KeyPair> {
        let key = self.signing_key.take();
        if key.is_some() {
            info!(kid = %self.public_key.kid(), "Signing key unloaded");
        }
        key
    }

    /// Install a signing key; it must match the chain's public key
    pub fn load_signing_key(&mut self, key: KeyPair) -> Result<()> {
        let supplied = key.kid().to_string();
        let key = adopt_kid(key, &self.public_key).ok_or_else(|| {
            KeydirError::CryptoError(format!(
                "Key '{}' does not match directory key '{}'",
                supplied,
                self.public_key.kid()
            ))
        })?;
        info!(kid = %key.kid(), "Signing key loaded");
        self.signing_key = Some(key);
        Ok(())
    }
}

/// `key` re-labelled with the chain's kid, if its key bytes match.
///
/// The kid is a label carried in every signature header, so a key that
/// comes back under another label must keep signing under the chain's.
fn adopt_kid(key: KeyPair, public_key: &PublicKey) -> Option<KeyPair> {
    if key.public_key().to_bytes() != public_key.to_bytes() {
        return None;
    }
    if key.kid() == public_key.kid() {
        return Some(key);
    }
    debug!(supplied = %key.kid(), kid = %public_key.kid(), "Signing key adopts the chain's kid");
    Some(KeyPair::from_bytes(public_key.kid(), &key.signing_key_bytes()))
}
