//! Request kinds, response codes and the directory response envelope

use crate::crypto::CoseSigned;
use crate::merkletree::AuthenticationPath;
use crate::signed_root::SignedTreeRoot;
use crate::types::{Hash, Index, Policies};
use serde::{Deserialize, Serialize};

/// Request a response answers; selects the target STR on the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Registration,
    KeyLookup,
    KeyLookupInEpoch,
}

/// Outcome of a directory request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseCode {
    /// Registration staged, or lookup found the name
    Success,
    /// Registration refused; the name is already bound or pending
    NameExisted,
    /// Lookup found no binding
    NameNotFound,
    /// Requested epoch is outside the retention window
    EpochTooOld,
}

/// Promise to include a binding in the epoch after `epoch`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemporaryBinding {
    /// Latest published epoch when the promise was issued
    pub epoch: u64,

    /// VRF index of the promised name
    pub index: Index,

    /// Promised key
    #[serde(with = "crate::types::serde_b64::bytes")]
    pub key: Vec<u8>,

    /// Digest of the signed tree root for `epoch`
    #[serde(with = "crate::types::serde_b64::array")]
    pub str_hash: Hash,
}

/// Signed registration promise
pub type SignedPromise = CoseSigned<TemporaryBinding>;

/// Directory answer to a registration or lookup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryResponse {
    pub code: ResponseCode,

    /// Inclusion or absence proof; omitted for `EpochTooOld`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof: Option<AuthenticationPath>,

    /// Signed tree roots in epoch order, ending with the latest
    pub strs: Vec<SignedTreeRoot>,

    /// Registration promise for a pending binding
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promise: Option<SignedPromise>,

    pub policies: Policies,
}

impl DirectoryResponse {
    /// Key carried by the response: the proven key, else the promised one
    pub fn key(&self) -> Option<Vec<u8>> {
        if let Some(key) = self.proof.as_ref().and_then(AuthenticationPath::key) {
            return Some(key.to_vec());
        }
        self.promise
            .as_ref()
            .and_then(|p| p.extract().ok())
            .map(|tb| tb.key)
    }

    /// Root the proof is checked against for this kind of request
    pub fn target_str(&self, kind: RequestKind) -> Option<&SignedTreeRoot> {
        match kind {
            RequestKind::KeyLookupInEpoch => self.strs.first(),
            RequestKind::Registration | RequestKind::KeyLookup => self.strs.last(),
        }
    }
}
