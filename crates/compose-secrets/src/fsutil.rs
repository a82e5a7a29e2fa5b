//! Crash-safe file writes
//!
//! [`write_atomic`] never exposes a partially written file: content goes to a
//! temporary file next to the destination, which is renamed over it only once
//! fully written and synced. [`BackupGuard`] keeps a private snapshot of a file
//! while it is being mutated and puts it back if the mutation does not commit.

use std::fs::{self, File, Permissions};
use std::io::{self, Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::{Builder, NamedTempFile};

use crate::error::{IoResultExt, Result, SecretsError};

/// Owner read/write only
pub const PRIVATE_MODE: u32 = 0o600;

/// Write `content` to `path` atomically, leaving it with exactly `mode`
pub fn write_atomic(path: &Path, mode: u32, content: &[u8]) -> Result<()> {
    write_atomic_with(path, mode, |file| file.write_all(content))
}

/// Atomic write where the caller streams the content into the temporary file.
///
/// If `write` fails the temporary file is removed and `path` is untouched.
pub fn write_atomic_with<F>(path: &Path, mode: u32, write: F) -> Result<()>
where
    F: FnOnce(&mut File) -> io::Result<()>,
{
    let dir = parent_dir(path)?;
    let file_name = path.file_name().ok_or_else(|| {
        SecretsError::InvalidArgument(format!("Not a file path: {}", path.display()))
    })?;

    let mut tmp = Builder::new()
        .prefix(&format!(".{}.", file_name.to_string_lossy()))
        .suffix(".tmp")
        .tempfile_in(&dir)
        .at(&dir)?;

    // Permissions go on before the first byte of content does
    tmp.as_file()
        .set_permissions(Permissions::from_mode(mode))
        .at(tmp.path())?;

    write(tmp.as_file_mut()).at(tmp.path())?;
    tmp.as_file_mut().flush().at(tmp.path())?;
    tmp.as_file().sync_all().at(tmp.path())?;

    // On failure the PersistError still owns the temp file and drops it
    tmp.persist(path).map_err(|e| SecretsError::io(path, e.error))?;

    fs::set_permissions(path, Permissions::from_mode(mode)).at(path)?;
    sync_dir(&dir);

    tracing::debug!("Wrote {} ({:o})", path.display(), mode);
    Ok(())
}

fn parent_dir(path: &Path) -> Result<PathBuf> {
    match path.parent() {
        Some(parent) if parent.as_os_str().is_empty() => Ok(PathBuf::from(".")),
        Some(parent) => Ok(parent.to_path_buf()),
        None => Err(SecretsError::InvalidArgument(format!(
            "Not a file path: {}",
            path.display()
        ))),
    }
}

/// Persist the rename itself; some filesystems refuse fsync on directories
fn sync_dir(dir: &Path) {
    if let Err(e) = File::open(dir).and_then(|d| d.sync_all()) {
        tracing::warn!("Failed to sync directory {}: {}", dir.display(), e);
    }
}

/// Snapshot of a file taken before a mutation.
///
/// Dropping the guard without calling [`BackupGuard::commit`] restores the
/// snapshot over the target (or removes the target if it did not exist when
/// the snapshot was taken). The snapshot file itself is always deleted.
pub struct BackupGuard {
    target: PathBuf,
    snapshot: Option<Snapshot>,
    committed: bool,
}

struct Snapshot {
    file: NamedTempFile,
    mode: u32,
}

impl BackupGuard {
    /// Copy `target` into a private temporary file, if it exists
    pub fn snapshot(target: &Path) -> Result<Self> {
        let snapshot = if target.is_file() {
            let mode = fs::metadata(target).at(target)?.permissions().mode() & 0o7777;

            let mut file = Builder::new()
                .prefix("compose-secrets-")
                .suffix(".bak")
                .tempfile()
                .at(&std::env::temp_dir())?;
            file.as_file()
                .set_permissions(Permissions::from_mode(PRIVATE_MODE))
                .at(file.path())?;

            let mut source = File::open(target).at(target)?;
            io::copy(&mut source, file.as_file_mut()).at(file.path())?;
            file.as_file().sync_all().at(file.path())?;

            tracing::debug!("Backed up {} to {}", target.display(), file.path().display());
            Some(Snapshot { file, mode })
        } else {
            None
        };

        Ok(Self {
            target: target.to_path_buf(),
            snapshot,
            committed: false,
        })
    }

    /// Location of the snapshot, if the target existed
    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot.as_ref().map(|s| s.file.path())
    }

    /// The mutation succeeded; discard the snapshot
    pub fn commit(mut self) {
        self.committed = true;
    }

    fn restore(&self) -> Result<()> {
        match &self.snapshot {
            Some(snapshot) => {
                let mut content = Vec::new();
                File::open(snapshot.file.path())
                    .and_then(|mut f| f.read_to_end(&mut content))
                    .at(snapshot.file.path())?;
                write_atomic(&self.target, snapshot.mode, &content)
            }
            None => match fs::remove_file(&self.target) {
                Err(e) if e.kind() != io::ErrorKind::NotFound => {
                    Err(SecretsError::io(&self.target, e))
                }
                _ => Ok(()),
            },
        }
    }
}

impl Drop for BackupGuard {
    fn drop(&mut self) {
        if self.committed {
            return;
        }

        match self.restore() {
            Ok(()) => tracing::warn!("Restored {} from backup", self.target.display()),
            Err(e) => tracing::error!(
                "Failed to restore {} from backup: {}",
                self.target.display(),
                e
            ),
        }
    }
}
