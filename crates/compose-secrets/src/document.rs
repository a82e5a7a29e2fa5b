//! The YAML secrets document
//!
//! A flat mapping. Every stored secret `K` carries `K_updated_at` and
//! `K_updated_by` next to it, and the document-level `updated_at` holds the
//! unix time of the last mutation. Entries are kept sorted by key so that
//! rewrites produce stable diffs.

use chrono::{DateTime, Utc};
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{Result, SecretsError};

/// Document-level timestamp of the most recent mutation
pub const UPDATED_AT: &str = "updated_at";

pub const UPDATED_AT_SUFFIX: &str = "_updated_at";
pub const UPDATED_BY_SUFFIX: &str = "_updated_by";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

/// When and by whom a value was written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditStamp {
    /// Unix time of the write
    pub epoch: i64,
    /// `"YYYY-MM-DD HH:MM:SS UTC # <epoch>"`
    pub updated_at: String,
    /// `"user@host"`
    pub updated_by: String,
}

impl AuditStamp {
    /// Stamp for the current user and time
    pub fn now() -> Self {
        Self::at(Utc::now(), compose_secrets_core::host::user_at_host())
    }

    pub fn at(time: DateTime<Utc>, updated_by: String) -> Self {
        let epoch = time.timestamp();
        Self {
            epoch,
            updated_at: format!("{} # {}", time.format(TIMESTAMP_FORMAT), epoch),
            updated_by,
        }
    }
}

/// In-memory copy of a secrets file
#[derive(Debug, Clone)]
pub struct SecretsDocument {
    path: PathBuf,
    entries: BTreeMap<String, Value>,
}

impl SecretsDocument {
    /// An empty document that will be written to `path`
    pub fn empty(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            entries: BTreeMap::new(),
        }
    }

    /// Read `path`; a missing file is an empty document
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(text) => Self::parse(path, &text),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::empty(path)),
            Err(e) => Err(SecretsError::io(path, e)),
        }
    }

    /// Parse YAML text read from `path`
    pub fn parse(path: &Path, text: &str) -> Result<Self> {
        let mut document = Self::empty(path);
        if text.trim().is_empty() {
            return Ok(document);
        }

        let value: Value =
            serde_yaml::from_str(text).map_err(|e| SecretsError::document(path, e.to_string()))?;

        let mapping = match value {
            Value::Null => return Ok(document),
            Value::Mapping(mapping) => mapping,
            _ => return Err(SecretsError::document(path, "expected a mapping at the top level")),
        };

        for (key, value) in mapping {
            let key = match key {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                other => {
                    return Err(SecretsError::document(
                        path,
                        format!("unsupported key {:?}", other),
                    ))
                }
            };
            document.entries.insert(key, value);
        }

        Ok(document)
    }

    /// Serialize with an explicit document start, keys ascending
    pub fn to_yaml(&self) -> Result<String> {
        let body = serde_yaml::to_string(&self.entries)
            .map_err(|e| SecretsError::document(&self.path, e.to_string()))?;

        if body.starts_with("---") {
            Ok(body)
        } else {
            Ok(format!("---\n{}", body))
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// All keys, metadata included, in file order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Names of stored secrets, without metadata keys
    pub fn secret_names(&self) -> impl Iterator<Item = &str> {
        self.keys().filter(|key| !is_metadata_key(key))
    }

    /// Base64 ciphertext stored under `key`
    pub fn ciphertext(&self, key: &str) -> Result<&str> {
        match self.entries.get(key) {
            Some(Value::String(ciphertext)) => Ok(ciphertext),
            Some(_) => Err(SecretsError::document(
                &self.path,
                format!("value of \"{}\" is not an encrypted secret", key),
            )),
            None => Err(SecretsError::Unassigned {
                path: self.path.clone(),
                key: key.to_string(),
            }),
        }
    }

    /// Metadata string stored under `key`, if any
    pub fn metadata(&self, key: &str) -> Option<String> {
        match self.entries.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Insert or replace a secret together with its audit metadata
    pub fn upsert(&mut self, key: &str, ciphertext: String, stamp: &AuditStamp) {
        self.entries.insert(key.to_string(), Value::String(ciphertext));
        self.entries.insert(
            format!("{}{}", key, UPDATED_AT_SUFFIX),
            Value::String(stamp.updated_at.clone()),
        );
        self.entries.insert(
            format!("{}{}", key, UPDATED_BY_SUFFIX),
            Value::String(stamp.updated_by.clone()),
        );
        self.touch(stamp.epoch);
    }

    /// Drop a secret and whatever metadata it has.
    ///
    /// Returns false, leaving the document untouched, if `key` is absent.
    pub fn remove(&mut self, key: &str, epoch: i64) -> bool {
        if self.entries.remove(key).is_none() {
            return false;
        }

        self.entries.remove(&format!("{}{}", key, UPDATED_AT_SUFFIX));
        self.entries.remove(&format!("{}{}", key, UPDATED_BY_SUFFIX));
        self.touch(epoch);
        true
    }

    fn touch(&mut self, epoch: i64) {
        self.entries.insert(UPDATED_AT.to_string(), Value::Number(epoch.into()));
    }
}

/// Whether `key` is a reserved or per-secret metadata key
pub fn is_metadata_key(key: &str) -> bool {
    key == UPDATED_AT
        || [UPDATED_AT_SUFFIX, UPDATED_BY_SUFFIX]
            .iter()
            .any(|suffix| key.len() > suffix.len() && key.ends_with(suffix))
}
