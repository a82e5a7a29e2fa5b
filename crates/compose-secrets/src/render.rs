//! Template rendering
//!
//! Replaces `{{ secrets.NAME }}` references in a template with decrypted
//! values and writes the result atomically with owner-only permissions.
//!
//! This is not a template language. Expressions that do not mention
//! `secrets` (Go template labels such as `{{.Name}}`, for instance) are copied
//! through untouched, while any other use of `secrets` (filters, subscripts,
//! blocks) is rejected rather than written out unrendered.

use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};

use compose_secrets_core::expand_tilde;

use crate::error::{IoResultExt, Result, SecretsError};
use crate::fsutil::{write_atomic, PRIVATE_MODE};
use crate::lock::{resolve_target, LockScope, LockSettings};
use crate::store::SecretsStore;

/// Any `{{ ... }}` or `{% ... %}` expression
const EXPRESSION_PATTERN: &str = r"(?s)\{\{.*?\}\}|\{%.*?%\}";

/// The one supported form, matched against a whole expression
const REFERENCE_PATTERN: &str = r"^\{\{\s*secrets\.([A-Za-z_][A-Za-z0-9_]*)\s*\}\}$";

const SECRETS_PATTERN: &str = r"\bsecrets\b";

/// Source of the values behind `secrets.NAME` references
pub trait SecretLookup {
    fn resolve(&self, name: &str) -> Result<String>;
}

/// Lookup that decrypts every reference afresh from a secrets file
pub struct StoreLookup<'a> {
    store: &'a SecretsStore,
    private_key_path: &'a Path,
    password: Option<&'a str>,
}

impl<'a> StoreLookup<'a> {
    pub fn new(
        store: &'a SecretsStore,
        private_key_path: &'a Path,
        password: Option<&'a str>,
    ) -> Self {
        Self {
            store,
            private_key_path,
            password,
        }
    }
}

impl SecretLookup for StoreLookup<'_> {
    fn resolve(&self, name: &str) -> Result<String> {
        self.store.decrypt_one(self.private_key_path, name, self.password)
    }
}

/// Everything needed to render one template
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub template: PathBuf,
    pub destination: PathBuf,
    pub private_key_path: PathBuf,
    pub secrets_path: PathBuf,
    pub password: Option<String>,
    pub locking: LockSettings,
}

impl RenderRequest {
    pub fn new(
        template: impl AsRef<Path>,
        destination: impl AsRef<Path>,
        private_key_path: impl AsRef<Path>,
        secrets_path: impl AsRef<Path>,
    ) -> Self {
        Self {
            template: expand_tilde(template),
            destination: expand_tilde(destination),
            private_key_path: expand_tilde(private_key_path),
            secrets_path: expand_tilde(secrets_path),
            password: None,
            locking: LockSettings::default(),
        }
    }

    pub fn password(mut self, password: Option<String>) -> Self {
        self.password = password.filter(|p| !p.is_empty());
        self
    }

    pub fn locking(mut self, locking: LockSettings) -> Self {
        self.locking = locking;
        self
    }
}

/// Render `request.template` into `request.destination`.
///
/// The destination's template lock is held for the whole render, and a shared
/// lock on the secrets file keeps writers out while values are read. On any
/// failure the destination is left as it was.
pub fn render_template(request: &RenderRequest) -> Result<PathBuf> {
    if request.template == request.destination {
        return Err(same_path());
    }
    if request.destination == request.secrets_path {
        return Err(destination_is_secrets());
    }

    let destination = resolve_target(&request.destination)?;
    if resolve_target(&request.template)? == destination {
        return Err(same_path());
    }
    if resolve_target(&request.secrets_path)? == destination {
        return Err(destination_is_secrets());
    }

    let store = SecretsStore::with_locking(&request.secrets_path, request.locking.clone());

    let _destination_lock = request
        .locking
        .exclusive(LockScope::Template, &request.destination)?;
    let _secrets_lock = store.lock_shared()?;

    let template = fs::read_to_string(&request.template).at(&request.template)?;
    let lookup = StoreLookup::new(&store, &request.private_key_path, request.password.as_deref());
    let rendered = expand(&template, &lookup)?;

    write_atomic(&request.destination, PRIVATE_MODE, rendered.as_bytes())?;

    tracing::info!(
        "Rendered {} to {}",
        request.template.display(),
        request.destination.display()
    );
    Ok(request.destination.clone())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Segment<'t> {
    Text(&'t str),
    Secret(&'t str),
}

/// Split `template` into literal text and secret references.
///
/// Fails on the first expression that uses `secrets` in an unsupported way,
/// before any secret is decrypted.
fn parse(template: &str) -> Result<Vec<Segment<'_>>> {
    let compile = |pattern: &str| {
        Regex::new(pattern).map_err(|e| {
            SecretsError::InvalidArgument(format!("Invalid template pattern: {}", e))
        })
    };
    let expression = compile(EXPRESSION_PATTERN)?;
    let reference = compile(REFERENCE_PATTERN)?;
    let mentions_secrets = compile(SECRETS_PATTERN)?;

    let mut segments = Vec::new();
    let mut last = 0;

    for found in expression.find_iter(template) {
        let text = found.as_str();

        if let Some(name) = reference.captures(text).and_then(|caps| caps.get(1)) {
            segments.push(Segment::Text(&template[last..found.start()]));
            segments.push(Segment::Secret(name.as_str()));
            last = found.end();
        } else if mentions_secrets.is_match(text) {
            let line = template[..found.start()].matches('\n').count() + 1;
            return Err(SecretsError::InvalidArgument(format!(
                "Unsupported template expression on line {}: {} \
                 (secrets can only be referenced as {{{{ secrets.NAME }}}})",
                line, text
            )));
        }
    }
    segments.push(Segment::Text(&template[last..]));

    Ok(segments)
}

/// Substitute every secrets reference in `template`; the first failing
/// lookup aborts
pub fn expand(template: &str, lookup: &dyn SecretLookup) -> Result<String> {
    let mut rendered = String::with_capacity(template.len());

    for segment in parse(template)? {
        match segment {
            Segment::Text(text) => rendered.push_str(text),
            Segment::Secret(name) => rendered.push_str(&lookup.resolve(name)?),
        }
    }

    Ok(rendered)
}

fn same_path() -> SecretsError {
    SecretsError::InvalidArgument("Template and destination paths cannot be the same".to_string())
}

fn destination_is_secrets() -> SecretsError {
    SecretsError::InvalidArgument("Destination path cannot be the secrets file".to_string())
}
