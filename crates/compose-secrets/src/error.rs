//! Error type shared by every compose-secrets operation
//!
//! Messages are matched by callers and scripts, so their wording is stable.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Coarse classification of a [`SecretsError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    LockTimeout,
    KeyNotFound,
    DecryptionFailure,
    KeyMaterial,
    Encryption,
    Document,
    Io,
}

/// compose-secrets errors
#[derive(Error, Debug)]
pub enum SecretsError {
    #[error("{0}")]
    InvalidArgument(String),

    #[error("Timeout acquiring lock {} after {}s", path.display(), timeout.as_secs_f64())]
    LockTimeout { path: PathBuf, timeout: Duration },

    /// Raised by mutations (`remove`) on an absent key
    #[error("File {} doesn't contain secret \"{key}\"", path.display())]
    KeyNotFound { path: PathBuf, key: String },

    /// Raised by reads (`decrypt_one`, template references) on an absent key
    #[error("File path {} doesn't contain assignment for secret \"{key}\"", path.display())]
    Unassigned { path: PathBuf, key: String },

    #[error("Decryption failed")]
    Decryption,

    #[error("{0}")]
    KeyMaterial(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Invalid secrets file {}: {reason}", path.display())]
    Document { path: PathBuf, reason: String },

    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl SecretsError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::LockTimeout { .. } => ErrorKind::LockTimeout,
            Self::KeyNotFound { .. } | Self::Unassigned { .. } => ErrorKind::KeyNotFound,
            Self::Decryption => ErrorKind::DecryptionFailure,
            Self::KeyMaterial(_) => ErrorKind::KeyMaterial,
            Self::Encryption(_) => ErrorKind::Encryption,
            Self::Document { .. } => ErrorKind::Document,
            Self::Io { .. } => ErrorKind::Io,
        }
    }

    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn document(path: &Path, reason: impl Into<String>) -> Self {
        Self::Document {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }
}

pub type Result<T, E = SecretsError> = std::result::Result<T, E>;

/// Attach the offending path to an `io::Result`
pub(crate) trait IoResultExt<T> {
    fn at(self, path: &Path) -> Result<T>;
}

impl<T> IoResultExt<T> for io::Result<T> {
    fn at(self, path: &Path) -> Result<T> {
        self.map_err(|e| SecretsError::io(path, e))
    }
}
