//! compose-secrets configuration
//!
//! Loaded from `~/.config/compose-secrets/config.yaml` when present, then
//! overridden by `COMPOSE_SECRETS_*` environment variables. Every field has a
//! default, so a missing file is never an error.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::paths::{expand_tilde, Paths};

/// Lock files live in shared scratch space so every user agrees on them
pub const DEFAULT_LOCK_DIR: &str = "/tmp";

/// Seconds to wait for an advisory lock before giving up
pub const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 10;

/// RSA modulus size for newly generated key pairs
pub const DEFAULT_KEY_SIZE: u32 = 8192;

/// Smallest RSA modulus accepted for key generation
pub const MIN_KEY_SIZE: u32 = 4096;

pub const ENV_LOCK_DIR: &str = "COMPOSE_SECRETS_LOCK_DIR";
pub const ENV_LOCK_TIMEOUT: &str = "COMPOSE_SECRETS_LOCK_TIMEOUT";
pub const ENV_KEY_SIZE: &str = "COMPOSE_SECRETS_KEY_SIZE";
pub const ENV_KEY_DIR: &str = "COMPOSE_SECRETS_KEY_DIR";

/// Tool configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding advisory lock files
    pub lock_dir: PathBuf,
    /// Lock acquisition timeout in seconds
    pub lock_timeout_secs: u64,
    /// Key size used by `generate-keypair` when `--bits` is not given
    pub key_size: u32,
    /// Default output directory for `generate-keypair`
    pub key_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lock_dir: PathBuf::from(DEFAULT_LOCK_DIR),
            lock_timeout_secs: DEFAULT_LOCK_TIMEOUT_SECS,
            key_size: DEFAULT_KEY_SIZE,
            key_dir: Paths::new().keys(),
        }
    }
}

impl Config {
    /// Load the user config file and apply environment overrides
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Paths::new().config_file())?;
        config.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Load config from a specific file; a missing file yields defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let mut config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.lock_dir = expand_tilde(&config.lock_dir);
        config.key_dir = expand_tilde(&config.key_dir);
        config.validate()?;

        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Apply `COMPOSE_SECRETS_*` overrides read through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(ENV_LOCK_DIR) {
            self.lock_dir = expand_tilde(dir);
        }

        if let Some(secs) = lookup(ENV_LOCK_TIMEOUT) {
            self.lock_timeout_secs = secs
                .trim()
                .parse()
                .with_context(|| format!("Invalid {}: {}", ENV_LOCK_TIMEOUT, secs))?;
        }

        if let Some(bits) = lookup(ENV_KEY_SIZE) {
            self.key_size = bits
                .trim()
                .parse()
                .with_context(|| format!("Invalid {}: {}", ENV_KEY_SIZE, bits))?;
        }

        if let Some(dir) = lookup(ENV_KEY_DIR) {
            self.key_dir = expand_tilde(dir);
        }

        self.validate()
    }

    /// Lock acquisition timeout
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.key_size < MIN_KEY_SIZE {
            bail!(
                "key_size must be at least {} bits, got {}",
                MIN_KEY_SIZE,
                self.key_size
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_when_file_missing() -> Result<()> {
        let tmp = TempDir::new()?;
        let config = Config::load_from(&tmp.path().join("config.yaml"))?;

        assert_eq!(config.lock_dir, PathBuf::from("/tmp"));
        assert_eq!(config.lock_timeout(), Duration::from_secs(10));
        assert_eq!(config.key_size, 8192);
        Ok(())
    }

    #[test]
    fn test_partial_file_keeps_defaults() -> Result<()> {
        let tmp = TempDir::new()?;
        let path = tmp.path().join("config.yaml");
        fs::write(&path, "---\nlock_timeout_secs: 3\n")?;

        let config = Config::load_from(&path)?;
        assert_eq!(config.lock_timeout_secs, 3);
        assert_eq!(config.key_size, DEFAULT_KEY_SIZE);
        assert_eq!(config.lock_dir, PathBuf::from(DEFAULT_LOCK_DIR));
        Ok(())
    }

    #[test]
    fn test_rejects_small_key_size() -> Result<()> {
        let tmp = TempDir::new()?;
        let path = tmp.path().join("config.yaml");
        fs::write(&path, "key_size: 2048\n")?;

        let err = Config::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("at least 4096"));
        Ok(())
    }

    #[test]
    fn test_env_overrides() -> Result<()> {
        let vars: HashMap<&str, &str> = [
            (ENV_LOCK_DIR, "/var/lock"),
            (ENV_LOCK_TIMEOUT, "25"),
            (ENV_KEY_SIZE, "4096"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|name| vars.get(name).map(|v| v.to_string()))?;

        assert_eq!(config.lock_dir, PathBuf::from("/var/lock"));
        assert_eq!(config.lock_timeout(), Duration::from_secs(25));
        assert_eq!(config.key_size, 4096);
        Ok(())
    }

    #[test]
    fn test_invalid_env_timeout() {
        let mut config = Config::default();
        let result = config.apply_overrides(|name| {
            (name == ENV_LOCK_TIMEOUT).then(|| "soon".to_string())
        });

        assert!(result.is_err());
    }
}
