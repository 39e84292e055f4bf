//! Media Vault - Temporary Files
//!
//! Scratch files live under one directory and are named with a prefix
//! unique to this process execution plus a counter, so concurrent writers
//! never collide. Leftovers are wiped (zero-overwritten) before removal.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use log::{debug, warn};

use crate::error::VaultResult;

/// Wipe chunk size (1 MiB)
const WIPE_CHUNK: usize = 1024 * 1024;

/// Temporary files manager, owned by the vault
#[derive(Debug)]
pub struct TempFiles {
    /// Temp directory
    root: PathBuf,
    /// Execution-unique name prefix
    prefix: String,
    counter: AtomicU64,
}

impl TempFiles {
    /// Create the manager and its directory
    pub fn new<P: AsRef<Path>>(root: P) -> VaultResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;

        let prefix = format!("pmv_tmp_{}_", chrono::Utc::now().timestamp_millis());

        Ok(Self {
            root,
            prefix,
            counter: AtomicU64::new(0),
        })
    }

    /// Temp directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn next_name(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{}{}", self.prefix, n)
    }

    /// Unique temp file path (the file is not created)
    pub fn file_name(&self, extension: &str) -> PathBuf {
        let mut name = self.next_name();
        if !extension.is_empty() {
            name.push('.');
            name.push_str(extension);
        }
        self.root.join(name)
    }

    /// Create a unique temp folder
    pub fn create_folder(&self) -> VaultResult<PathBuf> {
        let path = self.root.join(self.next_name());
        fs::create_dir_all(&path)?;
        Ok(path)
    }

    /// Wipe everything under the temp directory
    pub fn clear(&self) -> VaultResult<()> {
        fs::create_dir_all(&self.root)?;

        let mut wiped = 0usize;
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.is_dir() {
                wipe_folder(&path);
            } else {
                wipe_file(&path);
            }
            wiped += 1;
        }

        if wiped > 0 {
            debug!("Cleared {} temporary entries from {}", wiped, self.root.display());
        }

        Ok(())
    }
}

/// Overwrite a file with zeros, then remove it. Best effort.
pub fn wipe_file(path: &Path) {
    if let Err(e) = overwrite_with_zeros(path) {
        warn!("Could not wipe {}: {}", path.display(), e);
    }

    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Could not remove {}: {}", path.display(), e);
        }
    }
}

fn overwrite_with_zeros(path: &Path) -> std::io::Result<()> {
    let mut file = OpenOptions::new().write(true).open(path)?;
    let size = file.metadata()?.len();

    let zeros = vec![0u8; WIPE_CHUNK];
    let mut remaining = size;
    while remaining > 0 {
        let n = remaining.min(WIPE_CHUNK as u64) as usize;
        file.write_all(&zeros[..n])?;
        remaining -= n as u64;
    }

    file.sync_all()
}

fn wipe_folder(path: &Path) {
    for entry in walkdir::WalkDir::new(path)
        .contents_first(true)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if entry.file_type().is_file() {
            wipe_file(entry.path());
        } else if entry.file_type().is_dir() {
            let _ = fs::remove_dir(entry.path());
        }
    }
}
