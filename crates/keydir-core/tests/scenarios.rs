//! Directory and Consistency-Check Scenarios
//!
//! End-to-end flows between a directory and client engines, including the
//! misbehaving-directory cases the engine must catch.

use keydir_core::{
    Binding, CheckError, ClientState, ConsistencyChecks, Directory, DirectoryConfig,
    DirectoryState, KeyPair, KeydirError, ProofType, RequestKind, ResponseCode, StrFailure,
    VrfSecretKey,
};
use std::collections::BTreeMap;

// =============================================================================
// Test Helpers
// =============================================================================

struct Fixture {
    signing_key: KeyPair,
    vrf: VrfSecretKey,
    dir: Directory,
}

impl Fixture {
    fn new() -> Self {
        Self::with_config(DirectoryConfig::default())
    }

    fn with_config(config: DirectoryConfig) -> Self {
        let signing_key = KeyPair::generate("directory-1");
        let vrf = VrfSecretKey::generate();
        let dir = Directory::new(signing_key.clone(), vrf.clone(), config)
            .expect("Failed to create directory");
        Self {
            signing_key,
            vrf,
            dir,
        }
    }

    fn client(&self) -> ConsistencyChecks {
        ConsistencyChecks::new(self.dir.public_key())
    }

    /// A second directory holding the same keys and history
    fn clone_directory(&self) -> Directory {
        Directory::restore(
            self.dir.export_state().expect("Failed to export state"),
            Some(self.signing_key.clone()),
            self.vrf.clone(),
            DirectoryConfig::default(),
        )
        .expect("Failed to restore directory")
    }
}

fn register(dir: &Directory, client: &ConsistencyChecks, name: &str, key: &[u8]) {
    let resp = dir
        .register_since(name, key, client.last_verified_epoch())
        .expect("Registration failed");
    client
        .handle_response(RequestKind::Registration, &resp, name, Some(key))
        .expect("Registration response should verify");
}

fn lookup(
    dir: &Directory,
    client: &ConsistencyChecks,
    name: &str,
) -> Result<Option<Vec<u8>>, CheckError> {
    let resp = dir
        .lookup_since(name, client.last_verified_epoch())
        .expect("Lookup failed");
    client.handle_response(RequestKind::KeyLookup, &resp, name, None)?;
    Ok(resp.key())
}

// =============================================================================
// Core Scenarios
// =============================================================================

#[test]
fn scenario_register_tick_lookup() {
    let fx = Fixture::new();
    let client = fx.client();

    register(&fx.dir, &client, "alice", b"K1");
    let root = fx.dir.tick().unwrap();
    assert_eq!(root.epoch(), 1);

    let resp = fx.dir.lookup("alice").unwrap();
    assert_eq!(resp.code, ResponseCode::Success);
    assert_eq!(resp.key(), Some(b"K1".to_vec()));

    let proof = resp.proof.as_ref().unwrap();
    let result = proof.verify("alice", &fx.dir.vrf_public_key(), fx.dir.get_str(1).unwrap().tree_hash());
    assert_eq!(result, Ok(ProofType::Inclusion));

    assert_eq!(lookup(&fx.dir, &client, "alice").unwrap(), Some(b"K1".to_vec()));
    assert_eq!(client.binding("alice").unwrap().key, b"K1".to_vec());
}

#[test]
fn scenario_second_registration_rejected() {
    let fx = Fixture::new();
    let client = fx.client();
    register(&fx.dir, &client, "alice", b"K1");
    fx.dir.tick().unwrap();

    let resp = fx
        .dir
        .register_since("alice", b"K2", client.last_verified_epoch())
        .unwrap();
    assert_eq!(resp.code, ResponseCode::NameExisted);
    assert_eq!(resp.key(), Some(b"K1".to_vec()));
    client
        .handle_response(RequestKind::Registration, &resp, "alice", Some(b"K2"))
        .unwrap();

    fx.dir.tick().unwrap();
    assert_eq!(lookup(&fx.dir, &client, "alice").unwrap(), Some(b"K1".to_vec()));
    assert_eq!(client.binding("alice").unwrap().key, b"K1".to_vec());
}

#[test]
fn scenario_lookup_in_genesis_epoch() {
    let fx = Fixture::new();
    let client = fx.client();

    let resp = fx.dir.lookup_in_epoch("alice", 0).unwrap();
    assert_eq!(resp.code, ResponseCode::NameNotFound);
    let proof = resp.proof.as_ref().unwrap();
    let genesis = fx.dir.get_str(0).unwrap();
    assert_eq!(
        proof.verify("alice", &fx.dir.vrf_public_key(), genesis.tree_hash()),
        Ok(ProofType::Absence)
    );

    client
        .handle_response(RequestKind::KeyLookupInEpoch, &resp, "alice", None)
        .unwrap();
    assert!(client.binding("alice").is_none());
}

#[test]
fn scenario_historical_lookup_after_registration() {
    let fx = Fixture::new();
    let client = fx.client();
    register(&fx.dir, &client, "alice", b"K1");
    fx.dir.tick().unwrap();
    fx.dir.tick().unwrap();

    let resp = fx.dir.lookup_in_epoch("alice", 0).unwrap();
    assert_eq!(resp.code, ResponseCode::NameNotFound);
    let epochs: Vec<u64> = resp.strs.iter().map(|s| s.epoch()).collect();
    assert_eq!(epochs, vec![0, 1, 2]);
    client
        .handle_response(RequestKind::KeyLookupInEpoch, &resp, "alice", None)
        .unwrap();

    let resp = fx.dir.lookup_in_epoch("alice", 1).unwrap();
    assert_eq!(resp.key(), Some(b"K1".to_vec()));
    client
        .handle_response(RequestKind::KeyLookupInEpoch, &resp, "alice", Some(b"K1"))
        .unwrap();
    assert_eq!(client.binding("alice").unwrap().epoch, 1);
    assert_eq!(client.last_verified_epoch(), Some(2));
}

#[test]
fn scenario_epoch_too_old() {
    let fx = Fixture::with_config(DirectoryConfig::default().with_retention_window(2));
    let client = fx.client();
    for _ in 0..4 {
        fx.dir.tick().unwrap();
    }

    let resp = fx.dir.lookup_in_epoch("alice", 1).unwrap();
    assert_eq!(resp.code, ResponseCode::EpochTooOld);
    assert!(resp.proof.is_none());
    client
        .handle_response(RequestKind::KeyLookupInEpoch, &resp, "alice", None)
        .unwrap();
    assert_eq!(client.last_verified_epoch(), Some(4));

    let resp = fx.dir.lookup_in_epoch("alice", 3).unwrap();
    assert_eq!(resp.code, ResponseCode::NameNotFound);
}

// =============================================================================
// Misbehaving Directory
// =============================================================================

/// Two directories holding the same keys publish different epoch 1 roots.
/// A client that verified one must reject the other.
#[test]
fn attack_forked_history_detected() {
    let fx = Fixture::new();
    let fork = fx.clone_directory();
    let client = fx.client();

    fx.dir.register("alice", b"K1").unwrap();
    fx.dir.tick().unwrap();
    fork.register("alice", b"K-evil").unwrap();
    fork.tick().unwrap();

    assert_eq!(lookup(&fx.dir, &client, "alice").unwrap(), Some(b"K1".to_vec()));
    let trusted = client.export_state();

    let err = lookup(&fork, &client, "alice").unwrap_err();
    assert_eq!(err, CheckError::BadStr(StrFailure::Fork(1)));
    assert_eq!(client.export_state(), trusted);
}

/// The fork is also caught when it is only visible through the link of the
/// next root.
#[test]
fn attack_forked_successor_detected() {
    let fx = Fixture::new();
    let fork = fx.clone_directory();
    let client = fx.client();

    fx.dir.tick().unwrap();
    fork.register("mallory", b"K-evil").unwrap();
    fork.tick().unwrap();
    fork.tick().unwrap();

    lookup(&fx.dir, &client, "alice").unwrap();
    assert_eq!(client.last_verified_epoch(), Some(1));

    let err = lookup(&fork, &client, "alice").unwrap_err();
    assert_eq!(err, CheckError::BadStr(StrFailure::Fork(2)));
}

#[test]
fn attack_roots_signed_by_other_key_rejected() {
    let fx = Fixture::new();
    let impostor = Fixture::new();
    let client = fx.client();

    let resp = impostor.dir.lookup("alice").unwrap();
    let err = client
        .handle_response(RequestKind::KeyLookup, &resp, "alice", None)
        .unwrap_err();
    assert_eq!(err, CheckError::BadStr(StrFailure::BadSignature(0)));
}

#[test]
fn attack_key_substitution_detected() {
    let fx = Fixture::new();
    fx.dir.register("alice", b"K1").unwrap();
    fx.dir.tick().unwrap();

    // The client verified a different key for alice earlier.
    let mut bindings = BTreeMap::new();
    bindings.insert(
        "alice".to_string(),
        Binding {
            key: b"K0".to_vec(),
            epoch: 1,
        },
    );
    let state = ClientState {
        bindings,
        ..ClientState::default()
    };
    let client = ConsistencyChecks::from_state(fx.dir.public_key(), state.clone()).unwrap();

    let err = lookup(&fx.dir, &client, "alice").unwrap_err();
    assert_eq!(err, CheckError::BindingsDiffer);
    assert_eq!(client.binding("alice").unwrap().key, b"K0".to_vec());
    assert_eq!(client.export_state(), state);
}

#[test]
fn attack_binding_removal_detected() {
    let fx = Fixture::new();
    let mut bindings = BTreeMap::new();
    bindings.insert(
        "bob".to_string(),
        Binding {
            key: b"K1".to_vec(),
            epoch: 0,
        },
    );
    let client = ConsistencyChecks::from_state(
        fx.dir.public_key(),
        ClientState {
            bindings,
            ..ClientState::default()
        },
    )
    .unwrap();

    let err = lookup(&fx.dir, &client, "bob").unwrap_err();
    assert_eq!(err, CheckError::BindingsDiffer);
}

#[test]
fn attack_unexpected_key_reported() {
    let fx = Fixture::new();
    let client = fx.client();
    fx.dir.register("alice", b"K1").unwrap();
    fx.dir.tick().unwrap();

    let resp = fx.dir.lookup("alice").unwrap();
    let err = client
        .handle_response(RequestKind::KeyLookup, &resp, "alice", Some(b"K2"))
        .unwrap_err();
    assert_eq!(err, CheckError::BindingsDiffer);
    assert!(client.binding("alice").is_none());
    assert!(client.last_verified_str().is_none());
}

#[test]
fn attack_proof_for_other_name_rejected() {
    let fx = Fixture::new();
    let client = fx.client();
    fx.dir.register("alice", b"K1").unwrap();
    fx.dir.tick().unwrap();

    let resp = fx.dir.lookup("alice").unwrap();
    let err = client
        .handle_response(RequestKind::KeyLookup, &resp, "bob", None)
        .unwrap_err();
    assert!(matches!(err, CheckError::BadProof(_)));
}

#[test]
fn attack_spliced_root_rejected() {
    let fx = Fixture::new();
    let client = fx.client();
    fx.dir.tick().unwrap();
    fx.dir.tick().unwrap();

    let mut resp = fx.dir.lookup_since("alice", Some(0)).unwrap();
    resp.strs.remove(0);
    resp.strs.insert(0, fx.dir.get_str(0).unwrap());
    let err = client
        .handle_response(RequestKind::KeyLookup, &resp, "alice", None)
        .unwrap_err();
    assert_eq!(err, CheckError::BadStr(StrFailure::BrokenLink(2)));
}

// =============================================================================
// Operational Behavior
// =============================================================================

#[test]
fn signing_unavailable_keeps_serving_reads() {
    let fx = Fixture::new();
    fx.dir.register("alice", b"K1").unwrap();
    fx.dir.tick().unwrap();
    let key = fx.dir.unload_signing_key().unwrap();

    assert!(matches!(fx.dir.tick(), Err(KeydirError::SigningUnavailable)));
    assert!(matches!(
        fx.dir.register("bob", b"K2"),
        Err(KeydirError::SigningUnavailable)
    ));
    assert_eq!(fx.dir.current_epoch(), 1);

    let client = fx.client();
    assert_eq!(lookup(&fx.dir, &client, "alice").unwrap(), Some(b"K1".to_vec()));

    fx.dir.load_signing_key(key).unwrap();
    assert_eq!(fx.dir.tick().unwrap().epoch(), 2);
}

#[test]
fn str_range_is_contiguous_and_linked() {
    let fx = Fixture::new();
    for i in 0..5 {
        fx.dir.register(&format!("user-{}", i), &[i as u8]).unwrap();
        fx.dir.tick().unwrap();
    }

    let strs = fx.dir.str_range(0, 5);
    assert_eq!(strs.len(), 6);
    for pair in strs.windows(2) {
        assert!(pair[1].follows(&pair[0]));
    }
    assert_eq!(fx.dir.str_range(3, 100).len(), 3);
}

#[test]
fn concurrent_registrations_and_checks() {
    let fx = Fixture::new();
    let client = fx.client();
    let names: Vec<String> = (0..32).map(|i| format!("user-{}", i)).collect();

    std::thread::scope(|s| {
        for name in &names {
            let dir = &fx.dir;
            let client = &client;
            s.spawn(move || {
                let resp = dir.register(name, name.as_bytes()).unwrap();
                client
                    .handle_response(RequestKind::Registration, &resp, name, Some(name.as_bytes()))
                    .unwrap();
            });
        }
    });
    fx.dir.tick().unwrap();

    std::thread::scope(|s| {
        for name in &names {
            let dir = &fx.dir;
            let client = &client;
            s.spawn(move || {
                let resp = dir.lookup_since(name, Some(0)).unwrap();
                client
                    .handle_response(RequestKind::KeyLookup, &resp, name, Some(name.as_bytes()))
                    .unwrap();
            });
        }
    });

    assert_eq!(client.bindings().len(), names.len());
    assert_eq!(client.last_verified_epoch(), Some(1));
}

// =============================================================================
// Persistence
// =============================================================================

#[test]
fn directory_and_client_state_survive_restart() {
    let fx = Fixture::new();
    let client = fx.client();
    register(&fx.dir, &client, "alice", b"K1");
    fx.dir.tick().unwrap();
    lookup(&fx.dir, &client, "alice").unwrap();
    register(&fx.dir, &client, "bob", b"K2");

    let dir_json = serde_json::to_string(&fx.dir.export_state().unwrap()).unwrap();
    let client_json = serde_json::to_string(&client.export_state()).unwrap();

    let dir_state: DirectoryState = serde_json::from_str(&dir_json).unwrap();
    let dir = Directory::restore(
        dir_state,
        Some(fx.signing_key.clone()),
        fx.vrf.clone(),
        DirectoryConfig::default(),
    )
    .unwrap();
    let client_state: ClientState = serde_json::from_str(&client_json).unwrap();
    let client = ConsistencyChecks::from_state(dir.public_key(), client_state).unwrap();

    dir.tick().unwrap();
    assert_eq!(lookup(&dir, &client, "bob").unwrap(), Some(b"K2".to_vec()));
    assert!(client.promise("bob").is_none());
    assert_eq!(client.binding("alice").unwrap().key, b"K1".to_vec());
}

#[test]
fn restore_with_wrong_vrf_key_rejected() {
    let fx = Fixture::new();
    let state = fx.dir.export_state().unwrap();
    let err = Directory::restore(
        state,
        Some(fx.signing_key.clone()),
        VrfSecretKey::generate(),
        DirectoryConfig::default(),
    )
    .unwrap_err();
    assert!(matches!(err, KeydirError::StateMismatch(_)));
}
