//! Client-side consistency checks
//!
//! Verifies every directory response before trusting it: the signed root
//! chain must extend the last verified root, the proof must reach the
//! target root, and bindings must never change once verified. Trusted
//! state advances only when every check passes.

use crate::crypto::PublicKey;
use crate::error::{KeydirError, Result};
use crate::merkletree::{ProofFailure, ProofType};
use crate::protocol::{
    DirectoryResponse, RequestKind, ResponseCode, SignedPromise, TemporaryBinding,
};
use crate::signed_root::SignedTreeRoot;
use crate::types::{Index, ZERO_HASH};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash as _, Hasher};
use thiserror::Error;
use tracing::{debug, warn};

const SHARD_COUNT: usize = 16;

/// Why a response's signed tree roots were rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StrFailure {
    #[error("Response carries no signed tree root")]
    Missing,

    #[error("Signature on root for epoch {0} does not verify")]
    BadSignature(u64),

    #[error("Root for epoch {0} does not link to its predecessor")]
    BrokenLink(u64),

    #[error("Root for epoch {0} conflicts with the verified history")]
    Fork(u64),

    #[error("Response ends at epoch {latest}, before verified epoch {verified}")]
    Rollback { verified: u64, latest: u64 },

    #[error("Response skips from verified epoch {verified} to epoch {first}")]
    Gap { verified: u64, first: u64 },

    #[error("Genesis root does not carry the zero previous hash")]
    BadGenesis,

    #[error("Policies do not match the signed root")]
    PoliciesMismatch,
}

/// Outcome of a failed consistency check
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CheckError {
    #[error("Bad signed tree root: {0}")]
    BadStr(#[from] StrFailure),

    #[error("Bad proof: {0}")]
    BadProof(#[from] ProofFailure),

    #[error("Binding differs from the verified one")]
    BindingsDiffer,

    #[error("Registration promise does not verify")]
    BadPromise,

    #[error("Directory did not include a promised binding")]
    BrokenPromise,
}

/// A verified name-to-key binding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    #[serde(with = "crate::types::serde_b64::bytes")]
    pub key: Vec<u8>,

    /// Earliest epoch the binding was verified in
    pub epoch: u64,
}

/// Persisted client trust state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_verified_str: Option<SignedTreeRoot>,

    #[serde(default)]
    pub bindings: BTreeMap<String, Binding>,

    /// Promises not yet fulfilled
    #[serde(default)]
    pub promises: BTreeMap<String, SignedPromise>,
}

#[derive(Debug, Clone, Default)]
struct NameState {
    binding: Option<Binding>,
    promise: Option<(SignedPromise, TemporaryBinding)>,
}

/// Consistency-check engine for one client identity
#[derive(Debug)]
pub struct ConsistencyChecks {
    directory_key: PublicKey,
    saved_str: Mutex<Option<SignedTreeRoot>>,
    shards: Vec<Mutex<HashMap<String, NameState>>>,
}

impl ConsistencyChecks {
    /// Create an engine with empty trust state
    pub fn new(directory_key: PublicKey) -> Self {
        Self {
            directory_key,
            saved_str: Mutex::new(None),
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    /// Start from a root obtained out of band instead of trusting on first use
    pub fn with_pinned_str(self, root: SignedTreeRoot) -> std::result::Result<Self, CheckError> {
        root.verify(&self.directory_key)
            .map_err(|_| StrFailure::BadSignature(root.epoch()))?;
        *self.saved_str.lock() = Some(root);
        Ok(self)
    }

    /// Restore from persisted state, re-checking every signature
    pub fn from_state(directory_key: PublicKey, state: ClientState) -> Result<Self> {
        let engine = Self::new(directory_key);

        if let Some(root) = &state.last_verified_str {
            root.verify(&engine.directory_key).map_err(|_| {
                KeydirError::StateMismatch("Saved root does not verify".into())
            })?;
        }
        *engine.saved_str.lock() = state.last_verified_str;

        for (name, binding) in state.bindings {
            engine.shard(&name).lock().entry(name).or_default().binding = Some(binding);
        }
        for (name, signed) in state.promises {
            let tb = engine.directory_key.verify(&signed).map_err(|_| {
                KeydirError::StateMismatch(format!("Saved promise for '{}' does not verify", name))
            })?;
            engine.shard(&name).lock().entry(name).or_default().promise = Some((signed, tb));
        }
        Ok(engine)
    }

    /// Export trust state for persistence
    pub fn export_state(&self) -> ClientState {
        let mut state = ClientState {
            last_verified_str: self.saved_str.lock().clone(),
            ..ClientState::default()
        };
        for shard in &self.shards {
            for (name, entry) in shard.lock().iter() {
                if let Some(binding) = &entry.binding {
                    state.bindings.insert(name.clone(), binding.clone());
                }
                if let Some((signed, _)) = &entry.promise {
                    state.promises.insert(name.clone(), signed.clone());
                }
            }
        }
        state
    }

    pub fn directory_key(&self) -> &PublicKey {
        &self.directory_key
    }

    /// Most recent root this client has verified
    pub fn last_verified_str(&self) -> Option<SignedTreeRoot> {
        self.saved_str.lock().clone()
    }

    /// Epoch to pass as `since` so the directory sends the missing roots
    pub fn last_verified_epoch(&self) -> Option<u64> {
        self.saved_str.lock().as_ref().map(SignedTreeRoot::epoch)
    }

    /// Verified binding for `name`
    pub fn binding(&self, name: &str) -> Option<Binding> {
        self.shard(name)
            .lock()
            .get(name)
            .and_then(|s| s.binding.clone())
    }

    /// All verified bindings
    pub fn bindings(&self) -> BTreeMap<String, Binding> {
        let mut out = BTreeMap::new();
        for shard in &self.shards {
            for (name, entry) in shard.lock().iter() {
                if let Some(binding) = &entry.binding {
                    out.insert(name.clone(), binding.clone());
                }
            }
        }
        out
    }

    /// Outstanding registration promise for `name`
    pub fn promise(&self, name: &str) -> Option<TemporaryBinding> {
        self.shard(name)
            .lock()
            .get(name)
            .and_then(|s| s.promise.as_ref().map(|(_, tb)| tb.clone()))
    }

    /// Check a directory response and advance trust state on success.
    ///
    /// `expected` is the key the caller registered, or the key it expects a
    /// lookup to return. On any error the trust state is left unchanged.
    pub fn handle_response(
        &self,
        kind: RequestKind,
        response: &DirectoryResponse,
        name: &str,
        expected: Option<&[u8]>,
    ) -> std::result::Result<(), CheckError> {
        let result = self.check_and_commit(kind, response, name, expected);
        if let Err(e) = &result {
            warn!(name = %name, ?kind, error = %e, "Consistency check failed");
        }
        result
    }

    fn check_and_commit(
        &self,
        kind: RequestKind,
        response: &DirectoryResponse,
        name: &str,
        expected: Option<&[u8]>,
    ) -> std::result::Result<(), CheckError> {
        let mut shard = self.shard(name).lock();
        let saved = self.saved_str.lock().clone();

        verify_strs(saved.as_ref(), &response.strs, &self.directory_key)?;
        let target = response.target_str(kind).ok_or(StrFailure::Missing)?;
        let latest = response.strs.last().ok_or(StrFailure::Missing)?;
        let policies_hash = response
            .policies
            .hash()
            .map_err(|_| StrFailure::PoliciesMismatch)?;
        if &policies_hash != target.policies_hash() {
            return Err(StrFailure::PoliciesMismatch.into());
        }

        let current = shard.get(name).cloned().unwrap_or_default();
        let next = self.check_name(kind, response, name, expected, target, current)?;

        let mut saved_guard = self.saved_str.lock();
        if *saved_guard != saved {
            // Another response advanced trust meanwhile; this one must
            // extend the new anchor exactly as if it had arrived after it.
            verify_strs(saved_guard.as_ref(), &response.strs, &self.directory_key)?;
        }
        if saved_guard
            .as_ref()
            .map_or(true, |s| latest.epoch() > s.epoch())
        {
            *saved_guard = Some(latest.clone());
        }
        drop(saved_guard);

        shard.insert(name.to_string(), next);
        debug!(name = %name, ?kind, epoch = target.epoch(), "Response verified");
        Ok(())
    }

    fn check_name(
        &self,
        kind: RequestKind,
        response: &DirectoryResponse,
        name: &str,
        expected: Option<&[u8]>,
        target: &SignedTreeRoot,
        mut state: NameState,
    ) -> std::result::Result<NameState, CheckError> {
        if response.code == ResponseCode::EpochTooOld {
            if kind != RequestKind::KeyLookupInEpoch {
                return Err(ProofFailure::UnexpectedProofType.into());
            }
            return Ok(state);
        }

        let proof = response.proof.as_ref().ok_or(ProofFailure::MissingProof)?;
        let proof_type = proof.verify(name, &response.policies.vrf_public_key, target.tree_hash())?;

        let (claimed, needs_promise) = match (kind, response.code, proof_type) {
            (RequestKind::Registration, ResponseCode::Success, ProofType::Absence) => (None, true),
            (RequestKind::Registration, ResponseCode::NameExisted, ProofType::Inclusion) => {
                (proof.key(), false)
            }
            (RequestKind::Registration, ResponseCode::NameExisted, ProofType::Absence) => {
                (None, true)
            }
            (
                RequestKind::KeyLookup | RequestKind::KeyLookupInEpoch,
                ResponseCode::Success,
                ProofType::Inclusion,
            ) => (proof.key(), false),
            (
                RequestKind::KeyLookup | RequestKind::KeyLookupInEpoch,
                ResponseCode::NameNotFound,
                ProofType::Absence,
            ) => (None, false),
            _ => return Err(ProofFailure::UnexpectedProofType.into()),
        };

        // An outstanding promise must be kept once a later epoch is seen.
        if let Some((_, tb)) = &state.promise {
            if target.epoch() > tb.epoch {
                if claimed != Some(tb.key.as_slice()) {
                    return Err(CheckError::BrokenPromise);
                }
                state.promise = None;
            }
        }

        if needs_promise {
            let signed = response.promise.as_ref().ok_or(CheckError::BadPromise)?;
            let tb = self.verify_promise(signed, &proof.lookup_index, target)?;
            if response.code == ResponseCode::Success {
                if let Some(expected) = expected {
                    if tb.key != expected {
                        return Err(CheckError::BadPromise);
                    }
                }
            }
            state.promise = Some((signed.clone(), tb));
        }

        match claimed {
            Some(key) => {
                if let Some(binding) = &state.binding {
                    if binding.key != key {
                        return Err(CheckError::BindingsDiffer);
                    }
                }
                if kind != RequestKind::Registration {
                    if let Some(expected) = expected {
                        if expected != key {
                            return Err(CheckError::BindingsDiffer);
                        }
                    }
                }
                let epoch = state
                    .binding
                    .as_ref()
                    .map_or(target.epoch(), |b| b.epoch.min(target.epoch()));
                state.binding = Some(Binding {
                    key: key.to_vec(),
                    epoch,
                });
            }
            None => {
                if let Some(binding) = &state.binding {
                    if binding.epoch <= target.epoch() {
                        return Err(CheckError::BindingsDiffer);
                    }
                }
            }
        }

        Ok(state)
    }

    fn verify_promise(
        &self,
        signed: &SignedPromise,
        index: &Index,
        target: &SignedTreeRoot,
    ) -> std::result::Result<TemporaryBinding, CheckError> {
        let tb = self
            .directory_key
            .verify(signed)
            .map_err(|_| CheckError::BadPromise)?;
        if &tb.index != index || tb.epoch != target.epoch() || &tb.str_hash != target.digest() {
            return Err(CheckError::BadPromise);
        }
        Ok(tb)
    }

    fn shard(&self, name: &str) -> &Mutex<HashMap<String, NameState>> {
        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARD_COUNT]
    }
}

/// Check that `strs` are signed, contiguous, and extend `saved`
fn verify_strs(
    saved: Option<&SignedTreeRoot>,
    strs: &[SignedTreeRoot],
    directory_key: &PublicKey,
) -> std::result::Result<(), StrFailure> {
    let (first, last) = match (strs.first(), strs.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return Err(StrFailure::Missing),
    };

    for root in strs {
        root.verify(directory_key)
            .map_err(|_| StrFailure::BadSignature(root.epoch()))?;
    }
    for pair in strs.windows(2) {
        if !pair[1].follows(&pair[0]) {
            return Err(StrFailure::BrokenLink(pair[1].epoch()));
        }
    }
    if first.epoch() == 0 && first.previous_str_hash() != &ZERO_HASH {
        return Err(StrFailure::BadGenesis);
    }

    let Some(saved) = saved else {
        return Ok(());
    };

    if let Some(same) = strs.iter().find(|s| s.epoch() == saved.epoch()) {
        if same.digest() != saved.digest() {
            return Err(StrFailure::Fork(saved.epoch()));
        }
        return Ok(());
    }

    let next = saved.epoch().saturating_add(1);
    if first.epoch() == next {
        if first.previous_str_hash() != saved.digest() {
            return Err(StrFailure::Fork(first.epoch()));
        }
        Ok(())
    } else if first.epoch() > next {
        Err(StrFailure::Gap {
            verified: saved.epoch(),
            first: first.epoch(),
        })
    } else {
        Err(StrFailure::Rollback {
            verified: saved.epoch(),
            latest: last.epoch(),
        })
    }
}
