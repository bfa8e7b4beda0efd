//! Directory key material
//!
//! Holds the directory's two secrets:
//! - The Ed25519 key that signs tree roots and registration promises
//! - The VRF key that derives private tree indices from names

use keydir_core::{KeyPair, VrfSecretKey};
use tracing::{info, warn};

use crate::config::ServerConfig;

/// Signing and VRF keys for one directory
pub struct DirectoryKeys {
    signing: KeyPair,
    vrf: VrfSecretKey,
}

impl std::fmt::Debug for DirectoryKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryKeys")
            .field("kid", &self.signing.kid())
            .finish_non_exhaustive()
    }
}

impl DirectoryKeys {
    pub fn new(signing: KeyPair, vrf: VrfSecretKey) -> Self {
        info!(kid = %signing.kid(), "Directory keys initialized");
        Self { signing, vrf }
    }

    /// Generate fresh keys
    pub fn generate(kid: impl Into<String>) -> Self {
        Self::new(KeyPair::generate(kid), VrfSecretKey::generate())
    }

    /// Keys from the configured seeds, generating any that are missing.
    ///
    /// Generated keys do not survive a restart, so persisted state written
    /// with them cannot be restored.
    pub fn from_config(config: &ServerConfig) -> Self {
        let signing = match &config.signing_key_seed {
            Some(seed) => KeyPair::from_bytes(config.kid.clone(), seed),
            None => {
                warn!(kid = %config.kid, "No signing key configured, generating an ephemeral one");
                KeyPair::generate(config.kid.clone())
            }
        };
        let vrf = match &config.vrf_key_seed {
            Some(seed) => VrfSecretKey::from_seed(seed),
            None => {
                warn!("No VRF key configured, generating an ephemeral one");
                VrfSecretKey::generate()
            }
        };
        Self::new(signing, vrf)
    }

    pub fn kid(&self) -> &str {
        self.signing.kid()
    }

    pub fn signing_key(&self) -> &KeyPair {
        &self.signing
    }

    pub fn vrf(&self) -> &VrfSecretKey {
        &self.vrf
    }

    pub fn into_parts(self) -> (KeyPair, VrfSecretKey) {
        (self.signing, self.vrf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_keys_are_stable() {
        let config = ServerConfig {
            signing_key_seed: Some([1u8; 32]),
            vrf_key_seed: Some([2u8; 32]),
            kid: "dir-1".into(),
            ..Default::default()
        };

        let a = DirectoryKeys::from_config(&config);
        let b = DirectoryKeys::from_config(&config);

        assert_eq!(a.kid(), "dir-1");
        assert_eq!(a.signing_key().public_key(), b.signing_key().public_key());
        assert_eq!(a.vrf().public_key(), b.vrf().public_key());
    }

    #[test]
    fn test_missing_seeds_generate() {
        let config = ServerConfig::default();
        let a = DirectoryKeys::from_config(&config);
        let b = DirectoryKeys::from_config(&config);

        assert_ne!(a.signing_key().public_key(), b.signing_key().public_key());
        assert_ne!(a.vrf().public_key(), b.vrf().public_key());
    }
}
