//! Directory service
//!
//! Owns the PAD, the STR chain and the key material. Registrations are
//! staged and committed together at the next `tick`, the single point at
//! which published state changes. Lookups answer from immutable snapshots.
//!
//! Lock order: `staging` before `ledger`.

use crate::crypto::{KeyPair, PublicKey, SerializablePublicKey};
use crate::error::{KeydirError, Result};
use crate::merkletree::{LeafEntry, MerkleTree, Pad, Snapshot};
use crate::protocol::{DirectoryResponse, ResponseCode, SignedPromise, TemporaryBinding};
use crate::signed_root::{SignedTreeRoot, StrChain};
use crate::types::{Commitment, Hash, Index, Policies};
use crate::vrf::{VrfProof, VrfPublicKey, VrfSecretKey};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Default number of snapshots kept for historical lookups
pub const DEFAULT_RETENTION_WINDOW: u64 = 64;

/// Default epoch length in seconds
pub const DEFAULT_EPOCH_DEADLINE: u64 = 60;

/// Directory tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// Number of most recent snapshots answerable by `lookup_in_epoch`
    pub retention_window: u64,

    /// Target epoch length in seconds, advertised in the policies
    pub epoch_deadline: u64,

    /// Policy version string
    pub policy_version: String,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            retention_window: DEFAULT_RETENTION_WINDOW,
            epoch_deadline: DEFAULT_EPOCH_DEADLINE,
            policy_version: crate::VERSION.to_string(),
        }
    }
}

impl DirectoryConfig {
    pub fn with_retention_window(mut self, window: u64) -> Self {
        self.retention_window = window.max(1);
        self
    }

    pub fn with_epoch_deadline(mut self, seconds: u64) -> Self {
        self.epoch_deadline = seconds;
        self
    }
}

/// A registration waiting for the next epoch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingBinding {
    pub index: Index,

    pub vrf_proof: VrfProof,

    #[serde(with = "crate::types::serde_b64::bytes")]
    pub key: Vec<u8>,

    /// Promise returned to the registrant
    pub promise: SignedPromise,
}

/// Everything needed to restore a directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryState {
    pub public_key: SerializablePublicKey,

    pub policies: Policies,

    #[serde(with = "crate::types::serde_b64::array")]
    pub tree_nonce: Hash,

    /// Full chain from genesis
    pub strs: Vec<SignedTreeRoot>,

    /// Committed leaves of the latest snapshot
    pub leaves: Vec<LeafEntry>,

    pub pending: BTreeMap<String, PendingBinding>,
}

#[derive(Debug)]
struct Ledger {
    pad: Pad,
    chain: StrChain,
}

impl Ledger {
    fn latest(&self) -> Result<(Snapshot, SignedTreeRoot)> {
        let snapshot = self
            .pad
            .latest()
            .cloned()
            .ok_or(KeydirError::EpochNotPublished(0))?;
        let root = self
            .chain
            .get(snapshot.epoch())
            .cloned()
            .ok_or(KeydirError::EpochNotPublished(snapshot.epoch()))?;
        Ok((snapshot, root))
    }

    /// Roots to deliver with a response answered at the latest epoch
    fn strs_since(&self, since: Option<u64>) -> Vec<SignedTreeRoot> {
        let latest = self.chain.next_epoch().saturating_sub(1);
        let from = match since {
            Some(since) => since.saturating_add(1).min(latest),
            None => latest,
        };
        self.chain.range(from, latest)
    }
}

/// Key-transparency directory
pub struct Directory {
    vrf: VrfSecretKey,
    policies: Policies,
    config: DirectoryConfig,
    ledger: RwLock<Ledger>,
    staging: Mutex<BTreeMap<String, PendingBinding>>,
}

impl std::fmt::Debug for Directory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Directory")
            .field("policies", &self.policies)
            .field("config", &self.config)
            .field("epoch", &self.current_epoch())
            .finish()
    }
}

impl Directory {
    /// Create a directory and publish the genesis epoch
    pub fn new(signing_key: KeyPair, vrf: VrfSecretKey, config: DirectoryConfig) -> Result<Self> {
        let policies = Policies::new(vrf.public_key(), config.epoch_deadline)
            .with_version(config.policy_version.clone());

        let mut pad = Pad::new(MerkleTree::with_random_nonce(), config.retention_window);
        let mut chain = StrChain::new(signing_key);

        let genesis = pad.next_snapshot();
        chain.advance_epoch(&genesis, &policies)?;
        pad.publish(genesis)?;

        info!(
            kid = %chain.public_key().kid(),
            retention_window = pad.retention_window(),
            "Directory initialized at genesis epoch"
        );

        Ok(Self {
            vrf,
            policies,
            config,
            ledger: RwLock::new(Ledger { pad, chain }),
            staging: Mutex::new(BTreeMap::new()),
        })
    }

    /// Restore a directory from exported state.
    ///
    /// Every epoch is replayed from the committed leaves and its root is
    /// checked against the persisted chain.
    pub fn restore(
        state: DirectoryState,
        signing_key: Option<KeyPair>,
        vrf: VrfSecretKey,
        config: DirectoryConfig,
    ) -> Result<Self> {
        if vrf.public_key() != state.policies.vrf_public_key {
            return Err(KeydirError::StateMismatch(
                "VRF key does not match the persisted policies".into(),
            ));
        }

        let public_key = PublicKey::try_from(state.public_key)?;
        let chain = StrChain::from_parts(public_key, signing_key, state.strs)?;
        let latest = chain
            .latest()
            .ok_or_else(|| KeydirError::StateMismatch("Persisted chain is empty".into()))?;
        if latest.policies_hash() != &state.policies.hash()? {
            return Err(KeydirError::StateMismatch(
                "Persisted policies are not the ones committed in the chain".into(),
            ));
        }

        let mut by_epoch: BTreeMap<u64, Vec<LeafEntry>> = BTreeMap::new();
        for leaf in state.leaves {
            by_epoch.entry(leaf.epoch_added).or_default().push(leaf);
        }

        let mut pad = Pad::new(MerkleTree::new(state.tree_nonce), config.retention_window);
        for root in chain.strs() {
            for leaf in by_epoch.remove(&root.epoch()).unwrap_or_default() {
                pad.insert(leaf)?;
            }
            if pad.root() != *root.tree_hash() {
                return Err(KeydirError::StateMismatch(format!(
                    "Rebuilt root for epoch {} does not match the signed root",
                    root.epoch()
                )));
            }
            pad.advance_epoch()?;
        }
        if let Some(epoch) = by_epoch.keys().next() {
            return Err(KeydirError::StateMismatch(format!(
                "Leaf added at unpublished epoch {}",
                epoch
            )));
        }

        info!(
            epoch = chain.next_epoch().saturating_sub(1),
            pending = state.pending.len(),
            "Directory restored"
        );

        Ok(Self {
            vrf,
            policies: state.policies,
            config,
            ledger: RwLock::new(Ledger { pad, chain }),
            staging: Mutex::new(state.pending),
        })
    }

    /// Export state for persistence
    pub fn export_state(&self) -> Result<DirectoryState> {
        let pending = self.staging.lock();
        let ledger = self.ledger.read();
        let leaves = ledger
            .pad
            .latest()
            .map(|s| s.tree().leaves())
            .unwrap_or_default();

        Ok(DirectoryState {
            public_key: SerializablePublicKey::from(ledger.chain.public_key()),
            policies: self.policies.clone(),
            tree_nonce: *ledger.pad.working().nonce(),
            strs: ledger.chain.strs().to_vec(),
            leaves,
            pending: pending.clone(),
        })
    }

    pub fn policies(&self) -> &Policies {
        &self.policies
    }

    pub fn config(&self) -> &DirectoryConfig {
        &self.config
    }

    pub fn vrf_public_key(&self) -> VrfPublicKey {
        self.vrf.public_key()
    }

    /// Key clients verify signed tree roots and promises with
    pub fn public_key(&self) -> PublicKey {
        self.ledger.read().chain.public_key().clone()
    }

    /// Latest published epoch
    pub fn current_epoch(&self) -> u64 {
        self.ledger.read().chain.next_epoch().saturating_sub(1)
    }

    /// Signed root for `epoch`, if published
    pub fn get_str(&self, epoch: u64) -> Option<SignedTreeRoot> {
        self.ledger.read().chain.get(epoch).cloned()
    }

    /// Signed roots for `from..=to` in epoch order
    pub fn str_range(&self, from: u64, to: u64) -> Vec<SignedTreeRoot> {
        self.ledger.read().chain.range(from, to)
    }

    /// Number of registrations awaiting the next epoch
    pub fn pending_count(&self) -> usize {
        self.staging.lock().len()
    }

    pub fn has_signing_key(&self) -> bool {
        self.ledger.read().chain.has_signing_key()
    }

    /// Remove the signing key; reads keep working, writes fail
    pub fn unload_signing_key(&self) -> Option<KeyPair> {
        self.ledger.write().chain.unload_signing_key()
    }

    pub fn load_signing_key(&self, key: KeyPair) -> Result<()> {
        self.ledger.write().chain.load_signing_key(key)
    }

    /// Register `key` under `name`
    pub fn register(&self, name: &str, key: &[u8]) -> Result<DirectoryResponse> {
        self.register_since(name, key, None)
    }

    /// Register, delivering every signed root after `since`.
    ///
    /// An unbound name is staged for the next epoch and answered with an
    /// absence proof and a signed promise. A bound or pending name is
    /// answered with `NameExisted` and the existing key.
    pub fn register_since(
        &self,
        name: &str,
        key: &[u8],
        since: Option<u64>,
    ) -> Result<DirectoryResponse> {
        validate_name(name)?;
        if key.is_empty() {
            return Err(KeydirError::MalformedRequest("key must not be empty".into()));
        }
        let (index, vrf_proof) = self.vrf.derive_index(name)?;

        let mut staging = self.staging.lock();
        let ledger = self.ledger.read();
        let (snapshot, latest) = ledger.latest()?;
        let strs = ledger.strs_since(since);
        let (membership, path) = snapshot.lookup(&index);
        let proof = Some(path.with_vrf_proof(vrf_proof.clone()));

        if membership.is_present() {
            debug!(name = %name, "Registration refused, name already bound");
            return Ok(self.respond(ResponseCode::NameExisted, proof, strs, None));
        }

        if let Some(pending) = staging.get(name) {
            debug!(name = %name, "Registration refused, name already pending");
            let promise = Some(pending.promise.clone());
            return Ok(self.respond(ResponseCode::NameExisted, proof, strs, promise));
        }

        let promise = ledger.chain.sign(&TemporaryBinding {
            epoch: latest.epoch(),
            index,
            key: key.to_vec(),
            str_hash: *latest.digest(),
        })?;
        drop(ledger);

        staging.insert(
            name.to_string(),
            PendingBinding {
                index,
                vrf_proof,
                key: key.to_vec(),
                promise: promise.clone(),
            },
        );
        info!(name = %name, epoch = latest.epoch(), "Registration staged");

        Ok(self.respond(ResponseCode::Success, proof, strs, Some(promise)))
    }

    /// Look `name` up in the latest epoch
    pub fn lookup(&self, name: &str) -> Result<DirectoryResponse> {
        self.lookup_since(name, None)
    }

    /// Look up in the latest epoch, delivering every signed root after `since`
    pub fn lookup_since(&self, name: &str, since: Option<u64>) -> Result<DirectoryResponse> {
        validate_name(name)?;
        let (index, vrf_proof) = self.vrf.derive_index(name)?;

        let (snapshot, strs) = {
            let ledger = self.ledger.read();
            let (snapshot, _) = ledger.latest()?;
            (snapshot, ledger.strs_since(since))
        };

        Ok(self.answer(&snapshot, &index, vrf_proof, strs))
    }

    /// Look `name` up in a historical epoch.
    ///
    /// The response carries the roots from `epoch` to the latest. Epochs
    /// outside the retention window answer `EpochTooOld`; future epochs fail
    /// with `EpochNotPublished`.
    pub fn lookup_in_epoch(&self, name: &str, epoch: u64) -> Result<DirectoryResponse> {
        validate_name(name)?;
        let (index, vrf_proof) = self.vrf.derive_index(name)?;

        let (snapshot, strs) = {
            let ledger = self.ledger.read();
            let snapshot = ledger.pad.snapshot(epoch)?;
            let latest = ledger.chain.next_epoch().saturating_sub(1);
            (snapshot, ledger.chain.range(epoch, latest))
        };

        match snapshot {
            Some(snapshot) => Ok(self.answer(&snapshot, &index, vrf_proof, strs)),
            None => {
                debug!(name = %name, epoch, "Historical lookup outside retention window");
                Ok(self.respond(ResponseCode::EpochTooOld, None, strs, None))
            }
        }
    }

    /// Commit every staged registration and publish the next epoch.
    ///
    /// Nothing is published unless the new root is signed; on failure the
    /// staged registrations are kept for the next attempt.
    pub fn tick(&self) -> Result<SignedTreeRoot> {
        let mut staging = self.staging.lock();

        let (base, epoch) = {
            let ledger = self.ledger.read();
            if !ledger.chain.has_signing_key() {
                warn!(pending = staging.len(), "Epoch advance refused, signing key unavailable");
                return Err(KeydirError::SigningUnavailable);
            }
            let next = ledger.pad.next_snapshot();
            (next.tree().clone(), next.epoch())
        };

        let mut tree = base;
        for (name, pending) in staging.iter() {
            tree = tree.insert(LeafEntry {
                index: pending.index,
                commitment: Commitment::new(name, &pending.key),
                key: pending.key.clone(),
                epoch_added: epoch,
            })?;
        }
        let snapshot = Snapshot::new(epoch, tree);

        let mut ledger = self.ledger.write();
        let root = ledger.chain.advance_epoch(&snapshot, &self.policies)?;
        ledger.pad.publish(snapshot)?;
        drop(ledger);

        let committed = staging.len();
        staging.clear();
        info!(epoch, committed, "Epoch advanced");
        Ok(root)
    }

    fn answer(
        &self,
        snapshot: &Snapshot,
        index: &Index,
        vrf_proof: VrfProof,
        strs: Vec<SignedTreeRoot>,
    ) -> DirectoryResponse {
        let (membership, path) = snapshot.lookup(index);
        let code = if membership.is_present() {
            ResponseCode::Success
        } else {
            ResponseCode::NameNotFound
        };
        self.respond(code, Some(path.with_vrf_proof(vrf_proof)), strs, None)
    }

    fn respond(
        &self,
        code: ResponseCode,
        proof: Option<crate::merkletree::AuthenticationPath>,
        strs: Vec<SignedTreeRoot>,
        promise: Option<SignedPromise>,
    ) -> DirectoryResponse {
        DirectoryResponse {
            code,
            proof,
            strs,
            promise,
            policies: self.policies.clone(),
        }
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(KeydirError::MalformedRequest("name must not be empty".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merkletree::ProofType;

    fn directory() -> Directory {
        Directory::new(
            KeyPair::generate("dir-1"),
            VrfSecretKey::generate(),
            DirectoryConfig::default(),
        )
        .unwrap()
    }

    fn verify(dir: &Directory, resp: &DirectoryResponse, name: &str) -> ProofType {
        let root = resp.strs.last().unwrap();
        resp.proof
            .as_ref()
            .unwrap()
            .verify(name, &dir.vrf_public_key(), root.tree_hash())
            .unwrap()
    }

    #[test]
    fn test_new_directory_publishes_genesis() {
        let dir = directory();
        assert_eq!(dir.current_epoch(), 0);
        let genesis = dir.get_str(0).unwrap();
        genesis.verify(&dir.public_key()).unwrap();
        assert_eq!(genesis.policies_hash(), &dir.policies().hash().unwrap());
    }

    #[test]
    fn test_registration_is_invisible_until_tick() {
        let dir = directory();
        let resp = dir.register("alice", b"k1").unwrap();
        assert_eq!(resp.code, ResponseCode::Success);
        assert!(resp.promise.is_some());
        assert_eq!(verify(&dir, &resp, "alice"), ProofType::Absence);

        let before = dir.lookup("alice").unwrap();
        assert_eq!(before.code, ResponseCode::NameNotFound);

        dir.tick().unwrap();
        let after = dir.lookup("alice").unwrap();
        assert_eq!(after.code, ResponseCode::Success);
        assert_eq!(after.key(), Some(b"k1".to_vec()));
        assert_eq!(verify(&dir, &after, "alice"), ProofType::Inclusion);
    }

    #[test]
    fn test_pending_name_reports_name_existed() {
        let dir = directory();
        dir.register("alice", b"k1").unwrap();
        let again = dir.register("alice", b"k2").unwrap();
        assert_eq!(again.code, ResponseCode::NameExisted);
        assert_eq!(again.key(), Some(b"k1".to_vec()));
        assert_eq!(dir.pending_count(), 1);
    }

    #[test]
    fn test_tick_without_signing_key_keeps_pending() {
        let dir = directory();
        dir.register("alice", b"k1").unwrap();
        let key = dir.unload_signing_key().unwrap();

        assert!(matches!(dir.tick(), Err(KeydirError::SigningUnavailable)));
        assert_eq!(dir.current_epoch(), 0);
        assert_eq!(dir.pending_count(), 1);
        assert!(matches!(
            dir.register("bob", b"k2"),
            Err(KeydirError::SigningUnavailable)
        ));
        assert_eq!(dir.lookup("alice").unwrap().code, ResponseCode::NameNotFound);

        dir.load_signing_key(key).unwrap();
        dir.tick().unwrap();
        assert_eq!(dir.lookup("alice").unwrap().code, ResponseCode::Success);
    }

    #[test]
    fn test_lookup_since_delivers_missing_roots() {
        let dir = directory();
        for _ in 0..3 {
            dir.tick().unwrap();
        }

        let resp = dir.lookup_since("alice", Some(0)).unwrap();
        let epochs: Vec<u64> = resp.strs.iter().map(|s| s.epoch()).collect();
        assert_eq!(epochs, vec![1, 2, 3]);

        let up_to_date = dir.lookup_since("alice", Some(3)).unwrap();
        assert_eq!(up_to_date.strs.len(), 1);
        assert_eq!(up_to_date.strs[0].epoch(), 3);
    }

    #[test]
    fn test_lookup_in_future_epoch_fails() {
        let dir = directory();
        assert!(matches!(
            dir.lookup_in_epoch("alice", 5),
            Err(KeydirError::EpochNotPublished(5))
        ));
    }

    #[test]
    fn test_empty_name_rejected() {
        let dir = directory();
        assert!(matches!(
            dir.lookup(""),
            Err(KeydirError::MalformedRequest(_))
        ));
        assert!(matches!(
            dir.register("alice", b""),
            Err(KeydirError::MalformedRequest(_))
        ));
    }

    #[test]
    fn test_export_restore_roundtrip() {
        let signing_key = KeyPair::generate("dir-1");
        let vrf = VrfSecretKey::generate();
        let dir = Directory::new(signing_key.clone(), vrf.clone(), DirectoryConfig::default())
            .unwrap();
        dir.register("alice", b"k1").unwrap();
        dir.tick().unwrap();
        dir.register("bob", b"k2").unwrap();
        dir.tick().unwrap();
        dir.register("carol", b"k3").unwrap();

        let state = dir.export_state().unwrap();
        let json = serde_json::to_string(&state).unwrap();
        let state: DirectoryState = serde_json::from_str(&json).unwrap();

        let restored =
            Directory::restore(state, Some(signing_key), vrf, DirectoryConfig::default()).unwrap();
        assert_eq!(restored.current_epoch(), 2);
        assert_eq!(restored.pending_count(), 1);
        assert_eq!(
            restored.get_str(2).unwrap().tree_hash(),
            dir.get_str(2).unwrap().tree_hash()
        );
        assert_eq!(restored.lookup("bob").unwrap().key(), Some(b"k2".to_vec()));
        assert_eq!(
            restored.lookup_in_epoch("bob", 1).unwrap().code,
            ResponseCode::NameNotFound
        );

        restored.tick().unwrap();
        assert_eq!(restored.lookup("carol").unwrap().key(), Some(b"k3".to_vec()));
    }

    #[test]
    fn test_restore_rejects_tampered_leaves() {
        let signing_key = KeyPair::generate("dir-1");
        let vrf = VrfSecretKey::generate();
        let dir = Directory::new(signing_key.clone(), vrf.clone(), DirectoryConfig::default())
            .unwrap();
        dir.register("alice", b"k1").unwrap();
        dir.tick().unwrap();

        let mut state = dir.export_state().unwrap();
        state.leaves[0].commitment = Commitment::new("alice", b"evil");

        let err = Directory::restore(state, Some(signing_key), vrf, DirectoryConfig::default())
            .unwrap_err();
        assert!(matches!(err, KeydirError::StateMismatch(_)));
    }
}
