//! RSA key pair generation

use openssl::pkey::PKey;
use openssl::rsa::Rsa;
use openssl::symm::Cipher;
use std::fs::DirBuilder;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use compose_secrets_core::config::MIN_KEY_SIZE;
use compose_secrets_core::expand_tilde;

use crate::error::{IoResultExt, Result, SecretsError};
use crate::fsutil::{write_atomic, PRIVATE_MODE};

pub const PRIVATE_KEY_FILE: &str = "private_key.pem";
pub const PUBLIC_KEY_FILE: &str = "public_key.pem";

/// Where a generated key pair was written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPairPaths {
    pub private_key: PathBuf,
    pub public_key: PathBuf,
}

/// Generate a `bits`-bit RSA key pair into `dir`.
///
/// With a password the private key is written as AES-256-CBC encrypted
/// PKCS#8, otherwise in the traditional unencrypted RSA format. The public key
/// is SubjectPublicKeyInfo PEM. Existing key files are only replaced when
/// `overwrite` is set.
pub fn generate_key_pair(
    dir: &Path,
    password: Option<&str>,
    overwrite: bool,
    bits: u32,
) -> Result<KeyPairPaths> {
    if bits < MIN_KEY_SIZE {
        return Err(SecretsError::InvalidArgument(format!(
            "Key size must be at least {} bits, got {}",
            MIN_KEY_SIZE, bits
        )));
    }

    let dir = expand_tilde(dir);
    let paths = KeyPairPaths {
        private_key: dir.join(PRIVATE_KEY_FILE),
        public_key: dir.join(PUBLIC_KEY_FILE),
    };

    for path in [&paths.private_key, &paths.public_key] {
        if path.exists() && !overwrite {
            return Err(SecretsError::InvalidArgument(format!(
                "File {} exists and --overwrite flag was not used, aborting.",
                path.display()
            )));
        }
    }

    DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(&dir)
        .at(&dir)?;

    tracing::info!("Generating {} bit key pair, this may take a while...", bits);
    let generation = |e: openssl::error::ErrorStack| {
        SecretsError::KeyMaterial(format!("Failed to generate key pair: {}", e))
    };

    let rsa = Rsa::generate(bits).map_err(generation)?;
    let key = PKey::from_rsa(rsa).map_err(generation)?;

    let private_pem = match password.filter(|p| !p.is_empty()) {
        Some(password) => {
            key.private_key_to_pem_pkcs8_passphrase(Cipher::aes_256_cbc(), password.as_bytes())
        }
        None => key.rsa().and_then(|rsa| rsa.private_key_to_pem()),
    }
    .map_err(generation)?;
    let public_pem = key.public_key_to_pem().map_err(generation)?;

    write_atomic(&paths.private_key, PRIVATE_MODE, &private_pem)?;
    write_atomic(&paths.public_key, PRIVATE_MODE, &public_pem)?;

    tracing::info!("Private key saved to {}", paths.private_key.display());
    tracing::info!("Public key saved to {}", paths.public_key.display());
    Ok(paths)
}
