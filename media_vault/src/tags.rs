//! Media Vault - Tag Manager
//!
//! Tag names live in an encrypted catalog (`tag_list.pmv`); each tag owns a
//! sorted index of media ids (`tags/tag_<id>.index`). Open tag indexes are
//! reference counted so every user of a tag shares one lock.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::ErrorKind;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, error};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::crypto::{decrypt_json, encrypt_json, VaultKey};
use crate::error::{VaultError, VaultResult};
use crate::index::VaultIndex;
use crate::rw_lock::{ReadWriteLock, WriteIntent};
use crate::temp_files::TempFiles;

/// Catalog file name
pub const TAG_LIST_FILE: &str = "tag_list.pmv";

/// Folder with the tag indexes
pub const TAGS_FOLDER: &str = "tags";

/// Normalise a tag name: CR removed, LF turned into spaces, outer spaces trimmed
pub fn parse_tag_name(name: &str) -> String {
    name.replace('\n', " ")
        .replace('\r', "")
        .trim_matches(' ')
        .to_string()
}

/// Path of the index file of a tag
pub fn tag_index_path(vault_path: &Path, tag_id: u64) -> PathBuf {
    vault_path
        .join(TAGS_FOLDER)
        .join(format!("tag_{}.index", tag_id))
}

// ═══════════════════════════════════════════════════════════════════════════
// CATALOG
// ═══════════════════════════════════════════════════════════════════════════

/// Decrypted tag catalog
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TagList {
    pub next_id: u64,
    pub tags: BTreeMap<u64, String>,
}

impl TagList {
    /// Find a tag by name, case-insensitively
    pub fn find_tag(&self, name: &str) -> Option<u64> {
        let wanted = parse_tag_name(name).to_lowercase();
        self.tags
            .iter()
            .find(|(_, tag)| tag.to_lowercase() == wanted)
            .map(|(id, _)| *id)
    }

    /// Name of a tag id
    pub fn name(&self, tag_id: u64) -> Option<&str> {
        self.tags.get(&tag_id).map(String::as_str)
    }
}

struct TagIndexEntry {
    count: usize,
    index: Arc<VaultIndex>,
    check_delete: bool,
}

/// Tag catalog plus the registry of open tag indexes
pub struct TagManager {
    path: PathBuf,
    catalog_file: PathBuf,
    catalog_lock: Arc<ReadWriteLock>,
    temp: Arc<TempFiles>,
    indexes: Mutex<HashMap<u64, TagIndexEntry>>,
}

impl TagManager {
    /// Create the manager for a vault, making the tags folder
    pub fn new<P: AsRef<Path>>(vault_path: P, temp: Arc<TempFiles>) -> VaultResult<Self> {
        let path = vault_path.as_ref().to_path_buf();
        fs::create_dir_all(path.join(TAGS_FOLDER))?;

        Ok(Self {
            catalog_file: path.join(TAG_LIST_FILE),
            path,
            catalog_lock: ReadWriteLock::shared(),
            temp,
            indexes: Mutex::new(HashMap::new()),
        })
    }

    fn read_data(&self, key: &VaultKey) -> VaultResult<TagList> {
        match fs::read(&self.catalog_file) {
            Ok(data) => decrypt_json(&data, key),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(TagList::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Read the catalog
    pub fn read_list(&self, key: &VaultKey) -> VaultResult<TagList> {
        let _guard = self.catalog_lock.start_read();
        self.read_data(key)
    }

    /// Find a tag id by name
    pub fn find_tag(&self, name: &str, key: &VaultKey) -> VaultResult<Option<u64>> {
        Ok(self.read_list(key)?.find_tag(name))
    }

    fn write_data(&self, intent: WriteIntent, data: &TagList, key: &VaultKey) -> VaultResult<()> {
        let encrypted = encrypt_json(data, key)?;

        let tmp = self.temp.file_name("pmv");
        fs::write(&tmp, encrypted)?;

        let guard = intent.start_write();
        let result = fs::rename(&tmp, &self.catalog_file);
        guard.end_write();

        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }

        Ok(result?)
    }

    /// Add a tag to the catalog. Returns its id, existing or new.
    pub fn add_tag_to_list(&self, name: &str, key: &VaultKey) -> VaultResult<u64> {
        let name = parse_tag_name(name);
        if name.is_empty() {
            return Err(VaultError::InvalidTagName(name));
        }

        let intent = self.catalog_lock.request_write();
        let mut data = self.read_data(key)?;

        if let Some(tag_id) = data.find_tag(&name) {
            return Ok(tag_id);
        }

        let tag_id = data.next_id;
        data.next_id += 1;
        data.tags.insert(tag_id, name);

        self.write_data(intent, &data, key)?;

        Ok(tag_id)
    }

    /// Remove a tag from the catalog (its index is left alone)
    pub fn remove_tag_from_list(&self, tag_id: u64, key: &VaultKey) -> VaultResult<()> {
        let intent = self.catalog_lock.request_write();
        let mut data = self.read_data(key)?;

        if data.tags.remove(&tag_id).is_none() {
            return Ok(());
        }

        self.write_data(intent, &data, key)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // INDEX REGISTRY
    // ═══════════════════════════════════════════════════════════════════════

    /// Acquire the shared index of a tag, creating the file when missing
    pub fn acquire_index<'a>(
        &'a self,
        tag_id: u64,
        key: &'a VaultKey,
    ) -> VaultResult<TagIndexHandle<'a>> {
        let mut indexes = self.indexes.lock();
        self.acquire_locked(&mut indexes, tag_id, key)
    }

    fn acquire_locked<'a>(
        &'a self,
        indexes: &mut HashMap<u64, TagIndexEntry>,
        tag_id: u64,
        key: &'a VaultKey,
    ) -> VaultResult<TagIndexHandle<'a>> {
        let index = match indexes.get_mut(&tag_id) {
            Some(entry) => {
                entry.count += 1;
                Arc::clone(&entry.index)
            }
            None => {
                let index = Arc::new(VaultIndex::new(
                    tag_index_path(&self.path, tag_id),
                    Arc::clone(&self.temp),
                ));
                index.initialize()?;

                indexes.insert(
                    tag_id,
                    TagIndexEntry {
                        count: 1,
                        index: Arc::clone(&index),
                        check_delete: false,
                    },
                );
                index
            }
        };

        Ok(TagIndexHandle {
            manager: self,
            tag_id,
            index,
            key,
            check_delete: false,
        })
    }

    fn release_index(&self, tag_id: u64, check_delete: bool, key: &VaultKey) {
        let mut indexes = self.indexes.lock();

        let Some(entry) = indexes.get_mut(&tag_id) else {
            return;
        };

        entry.count = entry.count.saturating_sub(1);
        entry.check_delete |= check_delete;

        if entry.count == 0 {
            if let Some(entry) = indexes.remove(&tag_id) {
                if entry.check_delete {
                    // Registry stays locked so nobody reopens the index meanwhile
                    self.remove_if_empty(tag_id, &entry.index, key);
                }
            }
        }
    }

    fn remove_if_empty(&self, tag_id: u64, index: &VaultIndex, key: &VaultKey) {
        let count = match index.count() {
            Ok(count) => count,
            Err(e) => {
                error!("Could not check tag index {}: {}", tag_id, e);
                return;
            }
        };

        if count > 0 {
            return;
        }

        if let Err(e) = self.remove_tag_from_list(tag_id, key) {
            error!("Could not remove empty tag {}: {}", tag_id, e);
            return;
        }

        if let Err(e) = index.delete() {
            error!("Could not delete tag index {}: {}", tag_id, e);
            return;
        }

        debug!("Removed empty tag {}", tag_id);
    }

    /// Number of tag indexes currently held
    pub fn open_indexes(&self) -> usize {
        self.indexes.lock().len()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // MEDIA TAGGING
    // ═══════════════════════════════════════════════════════════════════════

    /// Tag a media, creating the tag when needed. Returns the tag id.
    pub fn tag_media(&self, media_id: u64, tag_name: &str, key: &VaultKey) -> VaultResult<u64> {
        // Registry held: an empty tag cannot be dropped between the two steps
        let index = {
            let mut indexes = self.indexes.lock();
            let tag_id = self.add_tag_to_list(tag_name, key)?;
            self.acquire_locked(&mut indexes, tag_id, key)?
        };
        index.add_element(media_id)?;

        Ok(index.tag_id())
    }

    /// Remove a tag from a media. The tag disappears once no media has it.
    pub fn untag_media(&self, media_id: u64, tag_id: u64, key: &VaultKey) -> VaultResult<bool> {
        let mut index = self.acquire_index(tag_id, key)?;
        index.set_check_delete();

        index.remove_element(media_id)
    }

    /// Check whether a media has a tag
    pub fn check_media_tag(&self, media_id: u64, tag_name: &str, key: &VaultKey) -> VaultResult<bool> {
        let Some(tag_id) = self.find_tag(tag_name, key)? else {
            return Ok(false);
        };

        let index = self.acquire_index(tag_id, key)?;
        let mut read = index.start_read()?;
        let (found, _) = read.binary_search(media_id)?;

        Ok(found)
    }

    /// Page of the media ids with a tag
    pub fn list_tagged_media(
        &self,
        tag_name: &str,
        key: &VaultKey,
        skip: u64,
        limit: u64,
        reverse: bool,
    ) -> VaultResult<Vec<u64>> {
        let Some(tag_id) = self.find_tag(tag_name, key)? else {
            return Ok(Vec::new());
        };

        let index = self.acquire_index(tag_id, key)?;
        let mut read = index.start_read()?;

        if reverse {
            read.list_values_reverse(skip, limit)
        } else {
            read.list_values(skip, limit)
        }
    }

    /// Random sample of the media ids with a tag, plus the tag id
    pub fn random_tagged_media(
        &self,
        tag_name: &str,
        key: &VaultKey,
        seed: u64,
        limit: u64,
    ) -> VaultResult<(Vec<u64>, Option<u64>)> {
        let Some(tag_id) = self.find_tag(tag_name, key)? else {
            return Ok((Vec::new(), None));
        };

        let index = self.acquire_index(tag_id, key)?;
        let mut read = index.start_read()?;

        Ok((read.random_values(seed, limit)?, Some(tag_id)))
    }
}

/// Held tag index, released when dropped
pub struct TagIndexHandle<'a> {
    manager: &'a TagManager,
    tag_id: u64,
    index: Arc<VaultIndex>,
    key: &'a VaultKey,
    check_delete: bool,
}

impl TagIndexHandle<'_> {
    pub fn tag_id(&self) -> u64 {
        self.tag_id
    }

    /// Check on release whether the index became empty, and drop the tag if so
    pub fn set_check_delete(&mut self) {
        self.check_delete = true;
    }
}

impl Deref for TagIndexHandle<'_> {
    type Target = VaultIndex;

    fn deref(&self) -> &VaultIndex {
        &self.index
    }
}

impl Drop for TagIndexHandle<'_> {
    fn drop(&mut self) {
        self.manager
            .release_index(self.tag_id, self.check_delete, self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use tempfile::tempdir;

    fn setup(dir: &Path) -> (TagManager, VaultKey) {
        let temp = Arc::new(TempFiles::new(dir.join("temp")).unwrap());
        (TagManager::new(dir, temp).unwrap(), VaultKey::new([9u8; 32]))
    }

    #[test]
    fn test_parse_tag_name() {
        assert_eq!(parse_tag_name("  Summer\r\n2024 "), "Summer 2024");
        assert_eq!(parse_tag_name("\n"), "");
    }

    #[test]
    fn test_catalog_add_find_remove() {
        let dir = tempdir().unwrap();
        let (tags, key) = setup(dir.path());

        assert_eq!(tags.add_tag_to_list("Holidays", &key).unwrap(), 0);
        assert_eq!(tags.add_tag_to_list("family", &key).unwrap(), 1);
        assert_eq!(tags.add_tag_to_list(" HOLIDAYS ", &key).unwrap(), 0);
        assert!(matches!(
            tags.add_tag_to_list(" \r\n", &key),
            Err(VaultError::InvalidTagName(_))
        ));

        let list = tags.read_list(&key).unwrap();
        assert_eq!(list.next_id, 2);
        assert_eq!(list.name(0), Some("Holidays"));
        assert_eq!(tags.find_tag("Family", &key).unwrap(), Some(1));

        tags.remove_tag_from_list(0, &key).unwrap();
        tags.remove_tag_from_list(0, &key).unwrap();
        assert_eq!(tags.find_tag("holidays", &key).unwrap(), None);

        // Ids are never reused
        assert_eq!(tags.add_tag_to_list("again", &key).unwrap(), 2);
    }

    #[test]
    fn test_catalog_is_encrypted() {
        let dir = tempdir().unwrap();
        let (tags, key) = setup(dir.path());
        tags.add_tag_to_list("very-secret-tag", &key).unwrap();

        let raw = fs::read(dir.path().join(TAG_LIST_FILE)).unwrap();
        assert!(!String::from_utf8_lossy(&raw).contains("very-secret-tag"));

        let other = VaultKey::new([1u8; 32]);
        assert!(tags.read_list(&other).is_err());
    }

    #[test]
    fn test_tag_and_untag_media() {
        let dir = tempdir().unwrap();
        let (tags, key) = setup(dir.path());

        let tag_id = tags.tag_media(5, "cats", &key).unwrap();
        tags.tag_media(2, "Cats", &key).unwrap();
        tags.tag_media(9, "cats", &key).unwrap();

        assert!(tags.check_media_tag(5, "CATS", &key).unwrap());
        assert!(!tags.check_media_tag(6, "cats", &key).unwrap());
        assert!(!tags.check_media_tag(5, "dogs", &key).unwrap());

        assert_eq!(
            tags.list_tagged_media("cats", &key, 0, 10, false).unwrap(),
            vec![2, 5, 9]
        );
        assert_eq!(
            tags.list_tagged_media("cats", &key, 0, 2, true).unwrap(),
            vec![9, 5]
        );

        let (sample, sampled_tag) = tags.random_tagged_media("cats", &key, 1, 2).unwrap();
        assert_eq!(sample.len(), 2);
        assert_eq!(sampled_tag, Some(tag_id));

        assert!(tags.untag_media(5, tag_id, &key).unwrap());
        assert!(!tags.untag_media(5, tag_id, &key).unwrap());
        assert_eq!(tags.open_indexes(), 0);
    }

    #[test]
    fn test_empty_tag_removed_on_release() {
        let dir = tempdir().unwrap();
        let (tags, key) = setup(dir.path());

        let tag_id = tags.tag_media(1, "temporary", &key).unwrap();
        let path = tag_index_path(dir.path(), tag_id);
        assert!(path.exists());

        // Another holder delays the check until the last release
        let holder = tags.acquire_index(tag_id, &key).unwrap();
        tags.untag_media(1, tag_id, &key).unwrap();
        assert!(path.exists());
        assert_eq!(tags.open_indexes(), 1);

        drop(holder);
        assert!(!path.exists());
        assert_eq!(tags.find_tag("temporary", &key).unwrap(), None);
        assert_eq!(tags.open_indexes(), 0);
    }

    #[test]
    fn test_holders_share_one_index() {
        let dir = tempdir().unwrap();
        let (tags, key) = setup(dir.path());

        let a = tags.acquire_index(3, &key).unwrap();
        let b = tags.acquire_index(3, &key).unwrap();
        assert!(Arc::ptr_eq(a.lock(), b.lock()));
        assert_eq!(tags.open_indexes(), 1);

        drop(a);
        drop(b);
        assert_eq!(tags.open_indexes(), 0);
    }

    #[test]
    fn test_tagging_races_last_untag() {
        let dir = tempdir().unwrap();
        let (tags, key) = setup(dir.path());

        thread::scope(|s| {
            s.spawn(|| {
                for _ in 0..100 {
                    let tag_id = tags.tag_media(1, "shared", &key).unwrap();
                    tags.untag_media(1, tag_id, &key).unwrap();
                }
            });

            s.spawn(|| {
                for _ in 0..100 {
                    let tag_id = tags.tag_media(2, "shared", &key).unwrap();

                    // Media 2 keeps the tag alive, so the catalog must name it
                    assert_eq!(tags.read_list(&key).unwrap().name(tag_id), Some("shared"));
                    assert!(tags.check_media_tag(2, "shared", &key).unwrap());

                    tags.untag_media(2, tag_id, &key).unwrap();
                }
            });
        });

        assert!(tags.read_list(&key).unwrap().tags.is_empty());
        assert_eq!(tags.open_indexes(), 0);
    }
}
