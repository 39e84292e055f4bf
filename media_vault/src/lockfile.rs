//! Media Vault - Process Lock File
//!
//! A single process owns a vault directory. The lock is an advisory
//! exclusive lock on `vault.lock`, held for the lifetime of [`VaultLockFile`].

use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use log::debug;

use crate::error::{VaultError, VaultResult};

/// Lock file name inside the vault directory
pub const LOCK_FILE_NAME: &str = "vault.lock";

/// Held exclusive lock on a vault directory
#[derive(Debug)]
pub struct VaultLockFile {
    file: File,
    path: PathBuf,
}

impl VaultLockFile {
    /// Try to lock the vault. Fails with [`VaultError::VaultInUse`] when
    /// another process (or another open vault) already holds it.
    pub fn acquire<P: AsRef<Path>>(vault_path: P) -> VaultResult<Self> {
        fs::create_dir_all(vault_path.as_ref())?;
        let path = vault_path.as_ref().join(LOCK_FILE_NAME);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        match file.try_lock_exclusive() {
            Ok(()) => {}
            Err(e) if is_contended(&e) => {
                return Err(VaultError::VaultInUse(vault_path.as_ref().display().to_string()));
            }
            Err(e) => return Err(e.into()),
        }

        debug!("Locked vault {}", vault_path.as_ref().display());

        Ok(Self { file, path })
    }

    /// Check whether a vault is currently locked, without keeping the lock
    pub fn is_locked<P: AsRef<Path>>(vault_path: P) -> bool {
        let path = vault_path.as_ref().join(LOCK_FILE_NAME);
        let Ok(file) = File::open(&path) else {
            return false;
        };

        match file.try_lock_exclusive() {
            Ok(()) => {
                let _ = FileExt::unlock(&file);
                false
            }
            Err(_) => true,
        }
    }

    /// Path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for VaultLockFile {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

fn is_contended(e: &std::io::Error) -> bool {
    e.kind() == ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}
