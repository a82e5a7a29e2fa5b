//! Advisory locks derived from the path of the protected file
//!
//! A lock is an empty file in a shared scratch directory whose name is a hash
//! of the protected file's resolved path, held with `flock(2)`. Secrets files
//! and rendered outputs use separate name prefixes, so the same literal path
//! gives two independent locks.
//!
//! Locking is cooperative. A process that writes the secrets file without
//! deriving the same lock path is not excluded by anything here.

use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{MetadataExt, OpenOptionsExt};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use compose_secrets_core::config::{DEFAULT_LOCK_DIR, DEFAULT_LOCK_TIMEOUT_SECS};
use compose_secrets_core::{expand_tilde, Config};

use crate::error::{IoResultExt, Result, SecretsError};

/// How often a blocked acquisition retries
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Digest bytes kept in the lock file name
const TOKEN_BYTES: usize = 16;

/// What the lock protects; each scope has its own lock namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockScope {
    /// A secrets document
    Secrets,
    /// A rendered template destination
    Template,
}

impl LockScope {
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Secrets => "compose-secrets",
            Self::Template => "compose-template",
        }
    }
}

/// Where lock files live and how long to wait for them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockSettings {
    pub dir: PathBuf,
    pub timeout: Duration,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_LOCK_DIR),
            timeout: Duration::from_secs(DEFAULT_LOCK_TIMEOUT_SECS),
        }
    }
}

impl From<&Config> for LockSettings {
    fn from(config: &Config) -> Self {
        Self {
            dir: config.lock_dir.clone(),
            timeout: config.lock_timeout(),
        }
    }
}

impl LockSettings {
    pub fn new(dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            dir: dir.into(),
            timeout,
        }
    }

    /// Lock file protecting `target` in `scope`
    pub fn lock_path(&self, scope: LockScope, target: &Path) -> Result<PathBuf> {
        lock_path(&self.dir, scope, target)
    }

    /// Take the exclusive lock for `target`
    pub fn exclusive(&self, scope: LockScope, target: &Path) -> Result<FileLock> {
        FileLock::exclusive(&self.lock_path(scope, target)?, self.timeout)
    }

    /// Take a shared lock for `target`
    pub fn shared(&self, scope: LockScope, target: &Path) -> Result<FileLock> {
        FileLock::shared(&self.lock_path(scope, target)?, self.timeout)
    }
}

/// Absolute, symlink-resolved form of `path`.
///
/// A file that does not exist yet is resolved through its parent directory so
/// that it maps to the same lock before and after creation.
pub fn resolve_target(path: &Path) -> Result<PathBuf> {
    let path = expand_tilde(path);
    let absolute = if path.is_absolute() {
        path
    } else {
        std::env::current_dir().at(&path)?.join(path)
    };

    if let Ok(resolved) = absolute.canonicalize() {
        return Ok(resolved);
    }

    match (absolute.parent(), absolute.file_name()) {
        (Some(parent), Some(name)) => Ok(parent
            .canonicalize()
            .map(|p| p.join(name))
            .unwrap_or_else(|_| absolute.clone())),
        _ => Ok(absolute),
    }
}

/// `<dir>/<scope prefix>-<hash of resolved target>.lock`
pub fn lock_path(dir: &Path, scope: LockScope, target: &Path) -> Result<PathBuf> {
    let resolved = resolve_target(target)?;

    let mut hasher = Sha256::new();
    hasher.update(resolved.as_os_str().as_bytes());
    let token = hex::encode(&hasher.finalize()[..TOKEN_BYTES]);

    Ok(dir.join(format!("{}-{}.lock", scope.prefix(), token)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Shared,
    Exclusive,
}

impl Mode {
    fn operation(&self) -> libc::c_int {
        match self {
            Self::Shared => libc::LOCK_SH,
            Self::Exclusive => libc::LOCK_EX,
        }
    }
}

/// A held advisory lock, released (and its file removed) on drop
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    file: File,
    mode: Mode,
}

impl FileLock {
    /// Wait up to `timeout` for sole ownership of the lock at `path`
    pub fn exclusive(path: &Path, timeout: Duration) -> Result<Self> {
        Self::acquire(path, timeout, Mode::Exclusive)
    }

    /// Wait up to `timeout` for a lock shared with other readers
    pub fn shared(path: &Path, timeout: Duration) -> Result<Self> {
        Self::acquire(path, timeout, Mode::Shared)
    }

    /// Path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn acquire(path: &Path, timeout: Duration, mode: Mode) -> Result<Self> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).at(dir)?;
        }

        let deadline = Instant::now() + timeout;
        loop {
            let file = open_lock_file(path).at(path)?;

            // A releaser may have unlinked the file between our open and
            // flock; holding a lock on a detached inode protects nothing.
            if try_flock(&file, mode.operation()).at(path)? && is_current(&file, path).at(path)? {
                tracing::debug!("Acquired {:?} lock {}", mode, path.display());
                return Ok(Self {
                    path: path.to_path_buf(),
                    file,
                    mode,
                });
            }
            drop(file);

            let now = Instant::now();
            if now >= deadline {
                return Err(SecretsError::LockTimeout {
                    path: path.to_path_buf(),
                    timeout,
                });
            }
            thread::sleep(POLL_INTERVAL.min(deadline - now));
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        // Only the last holder may unlink; a shared holder proves it is last
        // by upgrading without blocking.
        let last_holder = match self.mode {
            Mode::Exclusive => true,
            Mode::Shared => try_flock(&self.file, libc::LOCK_EX).unwrap_or(false),
        };

        if last_holder && is_current(&self.file, &self.path).unwrap_or(false) {
            if let Err(e) = fs::remove_file(&self.path) {
                if e.kind() != io::ErrorKind::NotFound {
                    tracing::warn!("Failed to remove lock file {}: {}", self.path.display(), e);
                }
            }
        }

        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
        tracing::debug!("Released lock {}", self.path.display());
    }
}

fn open_lock_file(path: &Path) -> io::Result<File> {
    let opened = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .mode(0o644)
        .open(path);

    match opened {
        // Lock file created by another user; flock works on a read-only fd
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => File::open(path),
        other => other,
    }
}

/// Non-blocking flock; `Ok(false)` when someone else holds a conflicting lock
fn try_flock(file: &File, operation: libc::c_int) -> io::Result<bool> {
    let rc = unsafe { libc::flock(file.as_raw_fd(), operation | libc::LOCK_NB) };
    if rc == 0 {
        return Ok(true);
    }

    let err = io::Error::last_os_error();
    match err.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => Ok(false),
        _ => Err(err),
    }
}

/// Whether `path` still names the inode behind `file`
fn is_current(file: &File, path: &Path) -> io::Result<bool> {
    let held = file.metadata()?;
    match fs::metadata(path) {
        Ok(on_disk) => Ok(held.dev() == on_disk.dev() && held.ino() == on_disk.ino()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
