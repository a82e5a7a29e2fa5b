//! compose-secrets - encrypted secrets for compose files
//!
//! Commands:
//! - encrypt / decrypt: one-off value encryption with a key file
//! - set <KEY>: Encrypt and store a secret (prompts if no value)
//! - get <KEY>: Decrypt a stored secret
//! - remove <KEY>: Delete a secret and its metadata
//! - list: List stored secret names
//! - generate-keypair: Create an RSA key pair
//! - render: Render a template with decrypted secrets

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use compose_secrets::{
    decrypt_secret, encrypt_secret, generate_key_pair, render_template, LockSettings,
    RenderRequest, SecretsStore,
};
use compose_secrets_core::{expand_tilde, Config};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "compose-secrets")]
#[command(about = "Encrypted secrets for compose files - RSA encrypted values in YAML")]
#[command(version)]
#[command(after_help = r#"WORKFLOW:
    compose-secrets generate-keypair --path ~/.keys/app
    compose-secrets set --key-path ~/.keys/app/public_key.pem \
        --secrets-path secrets.yaml --key DB_PASSWORD
    compose-secrets render --key-path ~/.keys/app/private_key.pem \
        --secrets-path secrets.yaml \
        --template docker-compose.yml.j2 --destination docker-compose.yml

TEMPLATES:
    Reference secrets as {{ secrets.NAME }}. Filters, subscripts and blocks
    that use secrets are rejected; text that does not mention secrets
    (including other {{ ... }} expressions) is copied as is.

ENVIRONMENT:
    COMPOSE_SECRETS_LOCK_DIR      Directory for lock files (default /tmp)
    COMPOSE_SECRETS_LOCK_TIMEOUT  Seconds to wait for a lock (default 10)
    COMPOSE_SECRETS_KEY_SIZE      Default key size in bits (default 8192)
    COMPOSE_SECRETS_KEY_DIR       Default generate-keypair directory
    RUST_LOG                      Log filter, e.g. compose_secrets=debug"#)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encrypt a value and print the base64 ciphertext
    Encrypt {
        /// Public key file
        #[arg(long)]
        key_path: PathBuf,
        /// Value to encrypt (omit for secure hidden prompt)
        #[arg(long)]
        value: Option<String>,
    },

    /// Decrypt a base64 ciphertext and print the value
    Decrypt {
        /// Private key file
        #[arg(long)]
        key_path: PathBuf,
        /// Base64 ciphertext
        #[arg(long)]
        value: String,
        #[command(flatten)]
        password: PasswordArgs,
    },

    /// Encrypt and store a secret (prompts securely if value not provided)
    Set {
        /// Public key file
        #[arg(long)]
        key_path: PathBuf,
        /// Secrets file to update
        #[arg(long)]
        secrets_path: PathBuf,
        /// Secret name
        #[arg(long)]
        key: String,
        /// Secret value (omit for secure hidden prompt)
        #[arg(long)]
        value: Option<String>,
    },

    /// Decrypt and print a stored secret
    Get {
        /// Private key file
        #[arg(long)]
        key_path: PathBuf,
        /// Secrets file to read
        #[arg(long)]
        secrets_path: PathBuf,
        /// Secret name
        #[arg(long)]
        key: String,
        #[command(flatten)]
        password: PasswordArgs,
        /// Don't print trailing newline (useful for piping)
        #[arg(short = 'n')]
        no_newline: bool,
    },

    /// Remove a secret and its metadata
    Remove {
        /// Secrets file to update
        #[arg(long)]
        secrets_path: PathBuf,
        /// Secret name
        #[arg(long)]
        key: String,
    },

    /// List stored secret names (values hidden)
    List {
        /// Secrets file to read
        #[arg(long)]
        secrets_path: PathBuf,
        /// Output as JSON for scripting
        #[arg(long)]
        json: bool,
    },

    /// Generate an RSA key pair
    GenerateKeypair {
        /// Output directory (default from config)
        #[arg(long)]
        path: Option<PathBuf>,
        /// Key size in bits (default from config)
        #[arg(long)]
        bits: Option<u32>,
        #[command(flatten)]
        password: PasswordArgs,
        /// Replace existing key files
        #[arg(long)]
        overwrite: bool,
    },

    /// Render a template, replacing {{ secrets.NAME }} with decrypted values
    Render {
        /// Private key file
        #[arg(long)]
        key_path: PathBuf,
        /// Secrets file to read
        #[arg(long)]
        secrets_path: PathBuf,
        /// Template to render
        #[arg(long)]
        template: PathBuf,
        /// Where to write the rendered file
        #[arg(long)]
        destination: PathBuf,
        #[command(flatten)]
        password: PasswordArgs,
    },
}

/// Private key password, given inline or prompted for
#[derive(Args, Debug, Default)]
struct PasswordArgs {
    /// Private key password
    #[arg(long, conflicts_with = "ask_password")]
    password: Option<String>,
    /// Prompt for the private key password
    #[arg(long)]
    ask_password: bool,
}

impl PasswordArgs {
    fn resolve(self) -> Result<Option<String>> {
        if self.ask_password {
            let password =
                rpassword::prompt_password("Password: ").context("Failed to read password")?;
            return Ok(Some(password).filter(|p| !p.is_empty()));
        }
        Ok(self.password.filter(|p| !p.is_empty()))
    }

    /// Like `resolve`, but a prompted password must be typed twice
    fn resolve_new(self) -> Result<Option<String>> {
        if !self.ask_password {
            return self.resolve();
        }

        let password =
            rpassword::prompt_password("Password: ").context("Failed to read password")?;
        let confirm =
            rpassword::prompt_password("Repeat password: ").context("Failed to read password")?;
        if password != confirm {
            bail!("Passwords do not match");
        }
        Ok(Some(password).filter(|p| !p.is_empty()))
    }
}

fn main() {
    // Logs go to stderr; stdout carries command output
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(Cli::parse()) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let locking = LockSettings::from(&config);

    match cli.command {
        Commands::Encrypt { key_path, value } => cmd_encrypt(key_path, value),
        Commands::Decrypt {
            key_path,
            value,
            password,
        } => cmd_decrypt(key_path, &value, password),
        Commands::Set {
            key_path,
            secrets_path,
            key,
            value,
        } => cmd_set(SecretsStore::with_locking(secrets_path, locking), key_path, &key, value),
        Commands::Get {
            key_path,
            secrets_path,
            key,
            password,
            no_newline,
        } => cmd_get(
            SecretsStore::with_locking(secrets_path, locking),
            key_path,
            &key,
            password,
            no_newline,
        ),
        Commands::Remove { secrets_path, key } => {
            cmd_remove(SecretsStore::with_locking(secrets_path, locking), &key)
        }
        Commands::List { secrets_path, json } => {
            cmd_list(SecretsStore::with_locking(secrets_path, locking), json)
        }
        Commands::GenerateKeypair {
            path,
            bits,
            password,
            overwrite,
        } => cmd_generate_keypair(&config, path, bits, password, overwrite),
        Commands::Render {
            key_path,
            secrets_path,
            template,
            destination,
            password,
        } => {
            let request = RenderRequest::new(template, destination, key_path, secrets_path)
                .password(password.resolve()?)
                .locking(locking);
            cmd_render(&request)
        }
    }
}

/// Read a secret value, prompting when it was not given on the command line
fn value_or_prompt(value: Option<String>) -> Result<String> {
    match value {
        Some(v) => Ok(v),
        None => {
            let value = rpassword::prompt_password("Enter secret value: ")
                .context("Failed to read secret value")?;

            if value.is_empty() {
                bail!("Empty value not allowed");
            }

            Ok(value)
        }
    }
}

/// Encrypt a single value
fn cmd_encrypt(key_path: PathBuf, value: Option<String>) -> Result<()> {
    let value = value_or_prompt(value)?;
    println!("{}", encrypt_secret(&expand_tilde(key_path), &value)?);
    Ok(())
}

/// Decrypt a single value
fn cmd_decrypt(key_path: PathBuf, value: &str, password: PasswordArgs) -> Result<()> {
    let password = password.resolve()?;
    println!(
        "{}",
        decrypt_secret(&expand_tilde(key_path), value, password.as_deref())?
    );
    Ok(())
}

/// Store a secret
fn cmd_set(store: SecretsStore, key_path: PathBuf, key: &str, value: Option<String>) -> Result<()> {
    let value = value_or_prompt(value)?;

    store.set(&key_path, key, &value)?;

    println!("success: Secret stored: {}", key);
    Ok(())
}

/// Retrieve a secret
fn cmd_get(
    store: SecretsStore,
    key_path: PathBuf,
    key: &str,
    password: PasswordArgs,
    no_newline: bool,
) -> Result<()> {
    let password = password.resolve()?;
    let value = store.decrypt_one(&key_path, key, password.as_deref())?;

    if no_newline {
        print!("{}", value);
    } else {
        println!("{}", value);
    }

    Ok(())
}

/// Delete a secret
fn cmd_remove(store: SecretsStore, key: &str) -> Result<()> {
    store.remove(key)?;
    println!("success: Secret removed: {}", key);
    Ok(())
}

/// List all secrets
fn cmd_list(store: SecretsStore, json: bool) -> Result<()> {
    let secrets = store.list()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&secrets)?);
        return Ok(());
    }

    if secrets.is_empty() {
        println!("No secrets stored in {}", store.path().display());
        return Ok(());
    }

    for secret in &secrets {
        match (&secret.updated_at, &secret.updated_by) {
            (Some(at), Some(by)) => println!("  {}  ({} by {})", secret.name, at, by),
            _ => println!("  {}", secret.name),
        }
    }

    Ok(())
}

/// Generate a key pair
fn cmd_generate_keypair(
    config: &Config,
    path: Option<PathBuf>,
    bits: Option<u32>,
    password: PasswordArgs,
    overwrite: bool,
) -> Result<()> {
    let dir = path.unwrap_or_else(|| config.key_dir.clone());
    let bits = bits.unwrap_or(config.key_size);
    let password = password.resolve_new()?;

    let paths = generate_key_pair(&dir, password.as_deref(), overwrite, bits)?;

    println!("success: Key pair generated");
    println!("  Private key: {}", paths.private_key.display());
    println!("  Public key:  {}", paths.public_key.display());
    Ok(())
}

/// Render a template
fn cmd_render(request: &RenderRequest) -> Result<()> {
    let destination = render_template(request)?;
    println!("success: Rendered {}", destination.display());
    Ok(())
}
