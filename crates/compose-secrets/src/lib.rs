//! compose-secrets - encrypted secrets for compose files
//!
//! "Commit the ciphertext, render the plaintext only where it runs."
//!
//! Secret values are encrypted one by one with an RSA public key (OAEP,
//! SHA-256) and kept in a flat YAML file next to the compose project, each
//! annotated with when and by whom it was last written. Templates reference
//! them as `{{ secrets.NAME }}` and are rendered on the deployment host with
//! the private key.
//!
//! Every mutation of the secrets file and every render runs under an advisory
//! lock, and files are replaced atomically with owner-only permissions.

pub mod cipher;
pub mod document;
pub mod error;
pub mod fsutil;
pub mod keygen;
pub mod lock;
pub mod render;
pub mod store;

#[cfg(test)]
mod testutil;

pub use cipher::{decrypt_secret, encrypt_secret, PrivateKey, PublicKey};
pub use document::{AuditStamp, SecretsDocument};
pub use error::{ErrorKind, Result, SecretsError};
pub use keygen::{generate_key_pair, KeyPairPaths};
pub use lock::{FileLock, LockScope, LockSettings};
pub use render::{render_template, RenderRequest, SecretLookup, StoreLookup};
pub use store::{SecretInfo, SecretsStore};
