//! Server configuration from environment variables
//!
//! | Variable | Default |
//! |---|---|
//! | `KEYDIR_PORT` | `8080` |
//! | `KEYDIR_LOG_LEVEL` | `info` |
//! | `KEYDIR_RETENTION_WINDOW` | `64` |
//! | `KEYDIR_EPOCH_DEADLINE_SECS` | `60` (0 disables the ticker) |
//! | `KEYDIR_STATE_PATH` | unset (in-memory state) |
//! | `KEYDIR_SIGNING_KEY` | unset (generated, hex seed otherwise) |
//! | `KEYDIR_VRF_KEY` | unset (generated, hex seed otherwise) |
//! | `KEYDIR_KID` | `keydir-<uuid>` |

use keydir_core::directory::{DEFAULT_EPOCH_DEADLINE, DEFAULT_RETENTION_WINDOW};
use keydir_core::DirectoryConfig;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub log_level: String,
    pub retention_window: u64,
    pub epoch_deadline: u64,
    pub state_path: Option<PathBuf>,
    pub signing_key_seed: Option<[u8; 32]>,
    pub vrf_key_seed: Option<[u8; 32]>,
    pub kid: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            log_level: "info".into(),
            retention_window: DEFAULT_RETENTION_WINDOW,
            epoch_deadline: DEFAULT_EPOCH_DEADLINE,
            state_path: None,
            signing_key_seed: None,
            vrf_key_seed: None,
            kid: format!("keydir-{}", uuid::Uuid::new_v4()),
        }
    }
}

impl ServerConfig {
    /// Read configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Read configuration through `lookup`, falling back to defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Ok(Self {
            port: parse_or(&lookup, "KEYDIR_PORT", defaults.port)?,
            log_level: lookup("KEYDIR_LOG_LEVEL").unwrap_or(defaults.log_level),
            retention_window: parse_or(
                &lookup,
                "KEYDIR_RETENTION_WINDOW",
                defaults.retention_window,
            )?
            .max(1),
            epoch_deadline: parse_or(
                &lookup,
                "KEYDIR_EPOCH_DEADLINE_SECS",
                defaults.epoch_deadline,
            )?,
            state_path: lookup("KEYDIR_STATE_PATH")
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
            signing_key_seed: seed(&lookup, "KEYDIR_SIGNING_KEY")?,
            vrf_key_seed: seed(&lookup, "KEYDIR_VRF_KEY")?,
            kid: lookup("KEYDIR_KID")
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.kid),
        })
    }

    /// Directory settings derived from this configuration
    pub fn directory_config(&self) -> DirectoryConfig {
        DirectoryConfig::default()
            .with_retention_window(self.retention_window)
            .with_epoch_deadline(self.epoch_deadline)
    }
}

fn parse_or<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn seed<F>(lookup: &F, var: &'static str) -> Result<Option<[u8; 32]>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(var).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    let bytes = hex::decode(raw.trim()).map_err(|e| ConfigError::Invalid {
        var,
        reason: e.to_string(),
    })?;
    let len = bytes.len();
    let seed: [u8; 32] = bytes.try_into().map_err(|_| ConfigError::Invalid {
        var,
        reason: format!("expected 32 bytes, got {}", len),
    })?;
    Ok(Some(seed))
}
