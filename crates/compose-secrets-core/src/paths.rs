//! Standard paths used by compose-secrets

use std::path::{Path, PathBuf};

/// Application directory name under the platform config/data dirs
const APP_DIR: &str = "compose-secrets";

/// Standard compose-secrets paths
pub struct Paths {
    /// Data directory (~/.local/share/compose-secrets)
    pub data: PathBuf,
    /// Config directory (~/.config/compose-secrets)
    pub config: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}

impl Paths {
    pub fn new() -> Self {
        let data = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("~/.local/share"))
            .join(APP_DIR);

        let config = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join(APP_DIR);

        Self {
            data: expand_tilde(data),
            config: expand_tilde(config),
        }
    }

    /// Default directory for generated key pairs
    pub fn keys(&self) -> PathBuf {
        self.data.join("keys")
    }

    /// Path of the optional YAML config file
    pub fn config_file(&self) -> PathBuf {
        self.config.join("config.yaml")
    }
}

/// Expand a leading `~` to the current user's home directory.
///
/// Paths without a leading `~` component, and `~user` forms, are returned
/// unchanged.
pub fn expand_tilde<P: AsRef<Path>>(path: P) -> PathBuf {
    let path = path.as_ref();

    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) if rest.as_os_str().is_empty() => home,
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}
