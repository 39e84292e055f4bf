//! Media Vault - Transactional Index
//!
//! Wraps an [`IndexedListFile`] with the two-phase lock. Writes go to a
//! scratch copy that replaces the original with a single rename once it is
//! complete and validated; a dropped or failed transaction leaves the
//! original untouched.

use std::fs;
use std::io::ErrorKind;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, warn};

use crate::error::VaultResult;
use crate::indexed_list::IndexedListFile;
use crate::rw_lock::{ReadGuard, ReadWriteLock, WriteIntent};
use crate::temp_files::TempFiles;

/// Main index or tag index of a vault
#[derive(Debug)]
pub struct VaultIndex {
    path: PathBuf,
    lock: Arc<ReadWriteLock>,
    temp: Arc<TempFiles>,
}

impl VaultIndex {
    /// Manage the index at `path`. Nothing is touched on disk.
    pub fn new<P: AsRef<Path>>(path: P, temp: Arc<TempFiles>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: ReadWriteLock::shared(),
            temp,
        }
    }

    /// Index file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The lock guarding this index
    pub fn lock(&self) -> &Arc<ReadWriteLock> {
        &self.lock
    }

    /// Create an empty index file if there is none
    pub fn initialize(&self) -> VaultResult<()> {
        if self.path.exists() {
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let write = self.start_write()?;
        write.commit()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // READ
    // ═══════════════════════════════════════════════════════════════════════

    /// Open the index for reading, holding a read section until dropped
    pub fn start_read(&self) -> VaultResult<IndexRead> {
        let guard = self.lock.start_read();
        let file = IndexedListFile::open_for_reading(&self.path)?;

        Ok(IndexRead {
            file,
            _guard: guard,
        })
    }

    /// Number of ids in the index
    pub fn count(&self) -> VaultResult<u64> {
        self.start_read()?.count()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // WRITE
    // ═══════════════════════════════════════════════════════════════════════

    /// Reserve the write intent and stage a scratch copy of the index
    pub fn start_write(&self) -> VaultResult<IndexWrite> {
        let intent = self.lock.request_write();
        let scratch = self.temp.file_name("index");

        // Intent is released by drop on any error below
        let mut write = IndexWrite {
            file: None,
            scratch,
            target: self.path.clone(),
            intent: Some(intent),
        };

        let file = if self.path.exists() {
            fs::copy(&self.path, &write.scratch)?;
            IndexedListFile::open_for_writing(&write.scratch)?
        } else {
            let mut file = IndexedListFile::open_for_writing(&write.scratch)?;
            file.initialize()?;
            file
        };
        write.file = Some(file);

        Ok(write)
    }

    /// Remove the index file
    pub fn delete(&self) -> VaultResult<()> {
        let _guard = self.lock.request_write().start_write();

        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Add one id. Returns whether it was added.
    pub fn add_element(&self, id: u64) -> VaultResult<bool> {
        let mut write = self.start_write()?;
        let (added, _) = write.add_value(id)?;

        if added {
            write.commit()?;
        }

        Ok(added)
    }

    /// Remove one id. Returns whether it was present.
    pub fn remove_element(&self, id: u64) -> VaultResult<bool> {
        let mut write = self.start_write()?;
        let (removed, _) = write.remove_value(id)?;

        if removed {
            write.commit()?;
        }

        Ok(removed)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// HANDLES
// ═══════════════════════════════════════════════════════════════════════════

/// Open index with an active read section
#[derive(Debug)]
pub struct IndexRead {
    // Closed before the read section ends
    file: IndexedListFile,
    _guard: ReadGuard,
}

impl Deref for IndexRead {
    type Target = IndexedListFile;

    fn deref(&self) -> &IndexedListFile {
        &self.file
    }
}

impl DerefMut for IndexRead {
    fn deref_mut(&mut self) -> &mut IndexedListFile {
        &mut self.file
    }
}

/// Pending write transaction over a scratch copy.
/// Dropping it without [`commit`](Self::commit) discards the changes.
pub struct IndexWrite {
    file: Option<IndexedListFile>,
    scratch: PathBuf,
    target: PathBuf,
    intent: Option<WriteIntent>,
}

impl IndexWrite {
    /// Scratch file holding the staged changes
    pub fn scratch_path(&self) -> &Path {
        &self.scratch
    }

    fn list(&mut self) -> &mut IndexedListFile {
        match self.file.as_mut() {
            Some(file) => file,
            None => unreachable!("index write used after commit"),
        }
    }

    /// Validate the scratch file and atomically replace the index with it
    pub fn commit(mut self) -> VaultResult<()> {
        {
            let file = self.list();
            file.sync()?;
            file.validate()?;
        }
        self.file = None;

        let intent = match self.intent.take() {
            Some(intent) => intent,
            None => unreachable!("index write committed twice"),
        };

        let guard = intent.start_write();
        let result = fs::rename(&self.scratch, &self.target);
        guard.end_write();

        result?;

        debug!("Index {} updated", self.target.display());

        Ok(())
    }

    /// Discard the staged changes
    pub fn cancel(self) {}
}

impl Deref for IndexWrite {
    type Target = IndexedListFile;

    fn deref(&self) -> &IndexedListFile {
        match self.file.as_ref() {
            Some(file) => file,
            None => unreachable!("index write used after commit"),
        }
    }
}

impl DerefMut for IndexWrite {
    fn deref_mut(&mut self) -> &mut IndexedListFile {
        self.list()
    }
}

impl Drop for IndexWrite {
    fn drop(&mut self) {
        self.file = None;

        // Still present unless the rename went through
        if let Err(e) = fs::remove_file(&self.scratch) {
            if e.kind() != ErrorKind::NotFound {
                warn!("Could not remove scratch index {}: {}", self.scratch.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;
    use tempfile::tempdir;

    fn new_index(dir: &Path) -> VaultIndex {
        let temp = Arc::new(TempFiles::new(dir.join("temp")).unwrap());
        let index = VaultIndex::new(dir.join("main.index"), temp);
        index.initialize().unwrap();
        index
    }

    #[test]
    fn test_initialize_creates_empty_index() {
        let dir = tempdir().unwrap();
        let index = new_index(dir.path());

        assert!(index.path().exists());
        assert_eq!(index.count().unwrap(), 0);

        // Existing file is kept
        index.add_element(3).unwrap();
        index.initialize().unwrap();
        assert_eq!(index.count().unwrap(), 1);
    }

    #[test]
    fn test_add_and_remove_elements() {
        let dir = tempdir().unwrap();
        let index = new_index(dir.path());

        assert!(index.add_element(5).unwrap());
        assert!(index.add_element(1).unwrap());
        assert!(!index.add_element(5).unwrap());
        assert!(index.remove_element(1).unwrap());
        assert!(!index.remove_element(1).unwrap());

        let mut read = index.start_read().unwrap();
        assert_eq!(read.list_values(0, 10).unwrap(), vec![5]);
    }

    #[test]
    fn test_dropped_write_leaves_original() {
        let dir = tempdir().unwrap();
        let index = new_index(dir.path());
        index.add_element(7).unwrap();

        let scratch = {
            let mut write = index.start_write().unwrap();
            write.add_value(8).unwrap();
            write.scratch_path().to_path_buf()
        };

        assert!(!scratch.exists());
        assert_eq!(index.count().unwrap(), 1);
        assert!(!index.lock().stats().intent_held);
    }

    #[test]
    fn test_failed_commit_keeps_original_bytes() {
        let dir = tempdir().unwrap();
        let index = new_index(dir.path());
        for id in [10, 20, 30] {
            index.add_element(id).unwrap();
        }
        let before = fs::read(index.path()).unwrap();

        let mut write = index.start_write().unwrap();
        write.add_value(25).unwrap();
        let scratch = write.scratch_path().to_path_buf();

        // Break the staged file between completion and rename
        fs::OpenOptions::new()
            .write(true)
            .open(&scratch)
            .unwrap()
            .set_len(13)
            .unwrap();

        assert!(write.commit().is_err());
        assert_eq!(fs::read(index.path()).unwrap(), before);
        assert!(!scratch.exists());

        let stats = index.lock().stats();
        assert!(!stats.intent_held);
        assert!(!stats.writing);
    }

    #[test]
    fn test_readers_see_old_version_until_commit() {
        let dir = tempdir().unwrap();
        let index = Arc::new(new_index(dir.path()));
        index.add_element(1).unwrap();

        let mut write = index.start_write().unwrap();
        write.add_value(2).unwrap();

        // Preparation does not block readers
        assert_eq!(index.count().unwrap(), 1);

        let reader = index.start_read().unwrap();
        let committer = thread::spawn(move || write.commit().unwrap());

        thread::sleep(Duration::from_millis(20));
        assert!(!committer.is_finished());
        drop(reader);

        committer.join().unwrap();
        assert_eq!(index.count().unwrap(), 2);
    }

    #[test]
    fn test_delete() {
        let dir = tempdir().unwrap();
        let index = new_index(dir.path());

        index.delete().unwrap();
        assert!(!index.path().exists());
        index.delete().unwrap();
        assert!(index.start_read().is_err());
    }
}
