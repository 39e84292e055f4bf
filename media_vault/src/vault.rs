//! Media Vault - Vault Facade
//!
//! Owns every component of an open vault: the process lock, temp files,
//! main index, tag manager and media manager. The vault key is supplied per
//! call and never stored.

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::crypto::{BlockDecryptReader, BlockEncryptWriter, VaultKey};
use crate::error::{VaultError, VaultResult};
use crate::index::VaultIndex;
use crate::lockfile::VaultLockFile;
use crate::maintenance::{self, SweepReport};
use crate::media::{AssetKind, MediaAssetManager, MediaHandle, MediaMetadata, MediaType, MEDIA_FOLDER};
use crate::scanner::{ScanQuery, VaultScanner, MAX_TAGS_FILTER_COUNT};
use crate::tags::{parse_tag_name, TagList, TagManager};
use crate::temp_files::TempFiles;

/// Main index file name
pub const MAIN_INDEX_FILE: &str = "main.index";

/// Default temp folder name inside the vault
pub const TEMP_FOLDER: &str = "temp";

/// Longest accepted tag name, in bytes
pub const MAX_TAG_NAME_LENGTH: usize = 255;

const COPY_CHUNK_SIZE: usize = 64 * 1024;

/// Vault configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VaultConfig {
    /// Vault folder
    pub path: PathBuf,
    /// Temp folder, `<path>/temp` when unset
    pub temp_path: Option<PathBuf>,
    /// Tag filters past this count are ignored
    pub max_tags_filter: usize,
    /// Wipe leftover temp files when opening
    pub clear_temp_on_open: bool,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./vault"),
            temp_path: None,
            max_tags_filter: MAX_TAGS_FILTER_COUNT,
            clear_temp_on_open: true,
        }
    }
}

impl VaultConfig {
    /// Default configuration for the vault at `path`
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    /// Load a JSON configuration file
    pub fn load<P: AsRef<Path>>(path: P) -> VaultResult<Self> {
        let data = fs::read(path)?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// Save as pretty JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> VaultResult<()> {
        fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    /// Effective temp folder
    pub fn temp_dir(&self) -> PathBuf {
        self.temp_path
            .clone()
            .unwrap_or_else(|| self.path.join(TEMP_FOLDER))
    }
}

/// One page of search results
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchPage {
    pub ids: Vec<u64>,
    /// Pass back as [`ScanQuery::continue_from`] for the next page
    pub continue_from: Option<u64>,
    /// Entries of the driving index scanned so far
    pub scanned: u64,
    /// Entries in the driving index
    pub total: u64,
}

/// Vault statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VaultStats {
    pub media_count: u64,
    pub tag_count: usize,
    pub open_media: usize,
    pub open_tag_indexes: usize,
}

/// An open vault. Only one process may hold it at a time.
pub struct Vault {
    config: VaultConfig,
    temp: Arc<TempFiles>,
    index: VaultIndex,
    tags: TagManager,
    media: MediaAssetManager,
    // Released last
    _lock_file: VaultLockFile,
}

impl Vault {
    /// Open a vault, creating its folder layout when missing
    pub fn open(config: VaultConfig) -> VaultResult<Self> {
        let path = config.path.clone();
        let lock_file = VaultLockFile::acquire(&path)?;

        fs::create_dir_all(path.join(MEDIA_FOLDER))?;

        let temp = Arc::new(TempFiles::new(config.temp_dir())?);
        if config.clear_temp_on_open {
            temp.clear()?;
        }

        let media = MediaAssetManager::new(&path, Arc::clone(&temp));

        let index = VaultIndex::new(path.join(MAIN_INDEX_FILE), Arc::clone(&temp));
        index.initialize()?;

        let tags = TagManager::new(&path, Arc::clone(&temp))?;

        info!("Vault opened at {}", path.display());

        Ok(Self {
            config,
            temp,
            index,
            tags,
            media,
            _lock_file: lock_file,
        })
    }

    /// Open the vault at `path` with the default configuration
    pub fn open_path<P: AsRef<Path>>(path: P) -> VaultResult<Self> {
        Self::open(VaultConfig::new(path))
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub fn index(&self) -> &VaultIndex {
        &self.index
    }

    pub fn tags(&self) -> &TagManager {
        &self.tags
    }

    pub fn media(&self) -> &MediaAssetManager {
        &self.media
    }

    pub fn temp(&self) -> &Arc<TempFiles> {
        &self.temp
    }

    // ═══════════════════════════════════════════════════════════════════════
    // MEDIA
    // ═══════════════════════════════════════════════════════════════════════

    /// Register a new media and return its id
    pub fn create_media(
        &self,
        media_type: MediaType,
        title: &str,
        key: &VaultKey,
    ) -> VaultResult<u64> {
        let media_id = self.media.next_media_id()?;

        {
            let media = self.media.acquire(media_id);
            media.create_metadata(&MediaMetadata::new(media_id, media_type, title), key)?;
        }

        self.index.add_element(media_id)?;

        info!("Created media {}", media_id);

        Ok(media_id)
    }

    /// Read the metadata of a media
    pub fn media_metadata(&self, media_id: u64, key: &VaultKey) -> VaultResult<Option<MediaMetadata>> {
        self.media.acquire(media_id).read_metadata(key)
    }

    /// Delete a media from every index and then from disk.
    /// Returns `None` when the media does not exist; otherwise the handle
    /// of the background removal of its folder.
    pub fn delete_media(&self, media_id: u64, key: &VaultKey) -> VaultResult<Option<JoinHandle<()>>> {
        let media = self.media.acquire(media_id);

        let Some(meta) = media.read_metadata(key)? else {
            return Ok(None);
        };

        self.index.remove_element(media_id)?;

        for tag_id in &meta.tags {
            self.tags.untag_media(media_id, *tag_id, key)?;
        }

        let deletion = media.delete();

        info!("Deleted media {}", media_id);

        Ok(Some(deletion))
    }

    /// Store the original file of a media as a block-encrypted asset.
    /// Returns `false` when the media does not exist or is being deleted.
    pub fn import_original<R: Read>(
        &self,
        media_id: u64,
        mut source: R,
        size: u64,
        extension: &str,
        key: &VaultKey,
    ) -> VaultResult<bool> {
        let media = self.media.acquire(media_id);
        let mut write = media.start_write(key)?;

        let Some(mut meta) = write.take() else {
            return Ok(false);
        };

        let asset_id = meta.allocate_asset_id();
        let Some(asset) = media.acquire_asset(asset_id, AssetKind::Single) else {
            return Ok(false);
        };

        let tmp = self.temp.file_name("pma");
        if let Err(e) = encrypt_to_file(&mut source, size, &tmp, key) {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }

        let guard = asset.lock().request_write().start_write();
        let result = fs::rename(&tmp, asset.path());
        guard.end_write();

        if let Err(e) = result {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }

        let previous = meta.original_ready.then_some(meta.original_asset);

        meta.original_ready = true;
        meta.original_asset = asset_id;
        meta.original_extension = extension.to_string();
        write.commit(&meta, key)?;
        drop(asset);

        debug!("Stored original of media {} ({} bytes)", media_id, size);

        // Metadata no longer names the old file
        if let Some(old_id) = previous {
            if let Some(old) = media.acquire_asset(old_id, AssetKind::Single) {
                let guard = old.lock().request_write().start_write();
                remove_asset_file(old.path());
                guard.end_write();
            }
        }

        Ok(true)
    }

    /// Decrypt the original file of a media into `out`.
    /// Returns the number of bytes written, `None` when there is no original.
    pub fn export_original<W: Write>(
        &self,
        media_id: u64,
        out: &mut W,
        key: &VaultKey,
    ) -> VaultResult<Option<u64>> {
        let media = self.media.acquire(media_id);

        let Some(meta) = media.read_metadata(key)? else {
            return Ok(None);
        };
        if !meta.original_ready {
            return Ok(None);
        }

        let Some(asset) = media.acquire_asset(meta.original_asset, AssetKind::Single) else {
            return Ok(None);
        };

        let _guard = asset.lock().start_read();
        let mut reader = BlockDecryptReader::open(asset.path(), key)?;
        let copied = io::copy(&mut reader, out)?;

        Ok(Some(copied))
    }

    fn update_metadata<F>(&self, media: &MediaHandle<'_>, key: &VaultKey, update: F) -> VaultResult<bool>
    where
        F: FnOnce(&mut MediaMetadata),
    {
        let mut write = media.start_write(key)?;

        let Some(mut meta) = write.take() else {
            write.cancel();
            return Ok(false);
        };

        update(&mut meta);
        write.commit(&meta, key)?;

        Ok(true)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // TAGS
    // ═══════════════════════════════════════════════════════════════════════

    /// Tag a media, creating the tag when needed. Returns the tag id.
    pub fn tag_media(&self, media_id: u64, tag_name: &str, key: &VaultKey) -> VaultResult<u64> {
        let name = parse_tag_name(tag_name);
        if name.is_empty() || name.len() > MAX_TAG_NAME_LENGTH {
            return Err(VaultError::InvalidTagName(name));
        }

        let tag_id = self.tags.tag_media(media_id, &name, key)?;

        let media = self.media.acquire(media_id);
        if !self.update_metadata(&media, key, |meta| meta.add_tag(tag_id))? {
            warn!("Tagged media {} has no metadata", media_id);
        }

        Ok(tag_id)
    }

    /// Remove a tag from a media. Returns whether the media had it.
    pub fn untag_media(&self, media_id: u64, tag_id: u64, key: &VaultKey) -> VaultResult<bool> {
        let removed = self.tags.untag_media(media_id, tag_id, key)?;

        let media = self.media.acquire(media_id);
        self.update_metadata(&media, key, |meta| meta.remove_tag(tag_id))?;

        Ok(removed)
    }

    /// Tag catalog
    pub fn tag_list(&self, key: &VaultKey) -> VaultResult<TagList> {
        self.tags.read_list(key)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // SEARCH
    // ═══════════════════════════════════════════════════════════════════════

    /// Start a filtered scan. `None` means nothing can match.
    pub fn scan<'a>(
        &'a self,
        query: &ScanQuery,
        key: &'a VaultKey,
    ) -> VaultResult<Option<VaultScanner<'a>>> {
        let mut query = query.clone();
        query.max_tags = query.max_tags.min(self.config.max_tags_filter);

        VaultScanner::new(&self.index, &self.tags, &query, key)
    }

    /// One page of a filtered scan
    pub fn search_page(&self, query: &ScanQuery, limit: usize, key: &VaultKey) -> VaultResult<SearchPage> {
        let Some(mut scanner) = self.scan(query, key)? else {
            return Ok(SearchPage::default());
        };

        let ids = scanner.next_page(limit)?;
        let (scanned, total) = scanner.progress();

        Ok(SearchPage {
            continue_from: ids.last().copied().or(query.continue_from),
            ids,
            scanned,
            total,
        })
    }

    /// Random sample of the whole vault or of one tag
    pub fn random_page(
        &self,
        tag: Option<&str>,
        seed: u64,
        limit: u64,
        key: &VaultKey,
    ) -> VaultResult<Vec<u64>> {
        match tag {
            Some(name) => Ok(self.tags.random_tagged_media(name, key, seed, limit)?.0),
            None => self.index.start_read()?.random_values(seed, limit),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // MAINTENANCE
    // ═══════════════════════════════════════════════════════════════════════

    /// Remove media folders that do not belong to the main index
    pub fn fix_consistency(&self) -> VaultResult<SweepReport> {
        maintenance::fix_consistency(self.path(), &self.index)
    }

    /// Index media folders missing from the main index
    pub fn recover_assets(&self) -> VaultResult<SweepReport> {
        maintenance::recover_assets(self.path(), &self.index)
    }

    /// Vault statistics
    pub fn stats(&self, key: &VaultKey) -> VaultResult<VaultStats> {
        Ok(VaultStats {
            media_count: self.index.count()?,
            tag_count: self.tags.read_list(key)?.tags.len(),
            open_media: self.media.open_media(),
            open_tag_indexes: self.tags.open_indexes(),
        })
    }
}

/// Block-encrypt exactly `size` bytes of `source` into a new file
pub fn encrypt_to_file<R: Read>(source: &mut R, size: u64, path: &Path, key: &VaultKey) -> VaultResult<()> {
    let mut writer = BlockEncryptWriter::create(path, size, key)?;
    let mut chunk = Zeroizing::new(vec![0u8; COPY_CHUNK_SIZE]);

    loop {
        let n = source.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        writer.write(&chunk[..n])?;
    }

    writer.close()
}

fn remove_asset_file(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!("Could not remove asset {}: {}", path.display(), e);
        }
    }
}

impl Drop for Vault {
    fn drop(&mut self) {
        if let Err(e) = self.temp.clear() {
            warn!("Could not clear temp files: {}", e);
        }
        info!("Vault closed at {}", self.config.path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::TagFilterMode;
    use std::thread;
    use std::time::Duration;
    use tempfile::tempdir;

    fn open(dir: &Path) -> (Vault, VaultKey) {
        let vault = Vault::open_path(dir.join("vault")).unwrap();
        (vault, VaultKey::generate())
    }

    fn query(mode: TagFilterMode, tags: &[&str]) -> ScanQuery {
        ScanQuery {
            mode,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_open_creates_layout() {
        let dir = tempdir().unwrap();
        let (vault, key) = open(dir.path());

        assert!(vault.path().join(MAIN_INDEX_FILE).exists());
        assert!(vault.path().join(MEDIA_FOLDER).is_dir());
        assert!(vault.path().join(TEMP_FOLDER).is_dir());
        assert_eq!(vault.stats(&key).unwrap(), VaultStats::default());
    }

    #[test]
    fn test_second_open_is_refused() {
        let dir = tempdir().unwrap();
        let (vault, _) = open(dir.path());

        let second = Vault::open_path(dir.path().join("vault"));
        assert!(matches!(second, Err(VaultError::VaultInUse(_))));

        drop(vault);
        assert!(Vault::open_path(dir.path().join("vault")).is_ok());
    }

    #[test]
    fn test_refused_open_leaves_tree_alone() {
        let dir = tempdir().unwrap();
        let (vault, _) = open(dir.path());
        let media_folder = vault.path().join(MEDIA_FOLDER);
        fs::remove_dir(&media_folder).unwrap();

        let second = Vault::open_path(dir.path().join("vault"));
        assert!(matches!(second, Err(VaultError::VaultInUse(_))));
        assert!(!media_folder.exists());
    }

    #[test]
    fn test_config_load() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("config.json");
        fs::write(&file, br#"{"path": "/data/vault", "max_tags_filter": 4}"#).unwrap();

        let config = VaultConfig::load(&file).unwrap();
        assert_eq!(config.path, PathBuf::from("/data/vault"));
        assert_eq!(config.max_tags_filter, 4);
        assert!(config.clear_temp_on_open);
        assert_eq!(config.temp_dir(), PathBuf::from("/data/vault").join(TEMP_FOLDER));

        config.save(&file).unwrap();
        assert_eq!(VaultConfig::load(&file).unwrap(), config);
    }

    #[test]
    fn test_create_and_tag_media() {
        let dir = tempdir().unwrap();
        let (vault, key) = open(dir.path());

        let id = vault.create_media(MediaType::Image, "beach", &key).unwrap();
        let tag_id = vault.tag_media(id, "  Summer\n", &key).unwrap();

        let meta = vault.media_metadata(id, &key).unwrap().unwrap();
        assert_eq!(meta.title, "beach");
        assert_eq!(meta.tags, vec![tag_id]);
        assert_eq!(vault.tag_list(&key).unwrap().name(tag_id), Some("Summer"));

        assert!(vault.untag_media(id, tag_id, &key).unwrap());
        let meta = vault.media_metadata(id, &key).unwrap().unwrap();
        assert!(meta.tags.is_empty());
        assert!(vault.tag_list(&key).unwrap().tags.is_empty());
    }

    #[test]
    fn test_invalid_tag_names() {
        let dir = tempdir().unwrap();
        let (vault, key) = open(dir.path());
        let id = vault.create_media(MediaType::Image, "x", &key).unwrap();

        assert!(matches!(
            vault.tag_media(id, " \r\n ", &key),
            Err(VaultError::InvalidTagName(_))
        ));
        assert!(matches!(
            vault.tag_media(id, &"a".repeat(MAX_TAG_NAME_LENGTH + 1), &key),
            Err(VaultError::InvalidTagName(_))
        ));
    }

    #[test]
    fn test_delete_media_clears_indexes() {
        let dir = tempdir().unwrap();
        let (vault, key) = open(dir.path());

        let a = vault.create_media(MediaType::Image, "a", &key).unwrap();
        let b = vault.create_media(MediaType::Video, "b", &key).unwrap();
        vault.tag_media(a, "x", &key).unwrap();
        vault.tag_media(b, "x", &key).unwrap();

        let folder = vault.media().resolve_media_path(a);
        vault.delete_media(a, &key).unwrap().unwrap().join().unwrap();

        assert!(!folder.exists());
        assert_eq!(vault.index().count().unwrap(), 1);
        let page = vault.search_page(&query(TagFilterMode::AllOf, &["x"]), 10, &key).unwrap();
        assert_eq!(page.ids, vec![b]);

        assert!(vault.delete_media(a, &key).unwrap().is_none());
    }

    #[test]
    fn test_search_pages() {
        let dir = tempdir().unwrap();
        let (vault, key) = open(dir.path());

        let ids: Vec<u64> = (0..5)
            .map(|i| vault.create_media(MediaType::Image, &format!("m{}", i), &key).unwrap())
            .collect();
        for id in &ids[1..] {
            vault.tag_media(*id, "kept", &key).unwrap();
        }

        let mut q = query(TagFilterMode::NoneOf, &["kept"]);
        let page = vault.search_page(&q, 10, &key).unwrap();
        assert_eq!(page.ids, vec![ids[0]]);

        q = query(TagFilterMode::AllOf, &[]);
        let first = vault.search_page(&q, 3, &key).unwrap();
        assert_eq!(first.ids, ids[..3].to_vec());
        assert_eq!(first.continue_from, Some(ids[2]));
        assert_eq!(first.total, 5);

        q.continue_from = first.continue_from;
        let second = vault.search_page(&q, 3, &key).unwrap();
        assert_eq!(second.ids, ids[3..].to_vec());

        let empty = vault
            .search_page(&query(TagFilterMode::AllOf, &["missing"]), 3, &key)
            .unwrap();
        assert_eq!(empty, SearchPage::default());
    }

    #[test]
    fn test_tag_filter_limit_from_config() {
        let dir = tempdir().unwrap();
        let mut config = VaultConfig::new(dir.path().join("vault"));
        config.max_tags_filter = 1;
        let vault = Vault::open(config).unwrap();
        let key = VaultKey::generate();

        let a = vault.create_media(MediaType::Image, "a", &key).unwrap();
        vault.tag_media(a, "one", &key).unwrap();

        // Second tag is dropped, so the unknown name does not empty the result
        let page = vault
            .search_page(&query(TagFilterMode::AllOf, &["one", "unknown"]), 10, &key)
            .unwrap();
        assert_eq!(page.ids, vec![a]);
    }

    #[test]
    fn test_random_page() {
        let dir = tempdir().unwrap();
        let (vault, key) = open(dir.path());

        let ids: Vec<u64> = (0..6)
            .map(|_| vault.create_media(MediaType::Audio, "", &key).unwrap())
            .collect();
        vault.tag_media(ids[2], "t", &key).unwrap();

        let sample = vault.random_page(None, 42, 4, &key).unwrap();
        assert_eq!(sample.len(), 4);
        assert!(sample.iter().all(|id| ids.contains(id)));
        assert_eq!(sample, vault.random_page(None, 42, 4, &key).unwrap());

        assert_eq!(vault.random_page(Some("t"), 1, 4, &key).unwrap(), vec![ids[2]]);
        assert!(vault.random_page(Some("nope"), 1, 4, &key).unwrap().is_empty());
    }

    #[test]
    fn test_import_and_export_original() {
        let dir = tempdir().unwrap();
        let (vault, key) = open(dir.path());
        let id = vault.create_media(MediaType::Video, "clip", &key).unwrap();

        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        assert!(vault
            .import_original(id, &data[..], data.len() as u64, "mp4", &key)
            .unwrap());

        let meta = vault.media_metadata(id, &key).unwrap().unwrap();
        assert!(meta.original_ready);
        assert_eq!(meta.original_extension, "mp4");
        let first_asset = meta.original_asset;

        let mut out = Vec::new();
        let copied = vault.export_original(id, &mut out, &key).unwrap();
        assert_eq!(copied, Some(data.len() as u64));
        assert_eq!(out, data);

        // Replacing the original drops the previous asset file
        vault.import_original(id, &b"short"[..], 5, "mp4", &key).unwrap();
        let media = vault.media().acquire(id);
        assert!(!media.asset_path(first_asset, AssetKind::Single).exists());
        drop(media);

        out.clear();
        vault.export_original(id, &mut out, &key).unwrap();
        assert_eq!(out, b"short");
    }

    #[test]
    fn test_replaced_original_waits_for_readers() {
        let dir = tempdir().unwrap();
        let (vault, key) = open(dir.path());
        let id = vault.create_media(MediaType::Video, "clip", &key).unwrap();
        vault.import_original(id, &b"first"[..], 5, "mp4", &key).unwrap();

        let first_asset = vault.media_metadata(id, &key).unwrap().unwrap().original_asset;
        let media = vault.media().acquire(id);
        let old = media.acquire_asset(first_asset, AssetKind::Single).unwrap();
        let old_path = old.path().to_path_buf();
        let reader = old.lock().start_read();

        thread::scope(|s| {
            let replace = s.spawn(|| vault.import_original(id, &b"second"[..], 6, "mp4", &key));

            thread::sleep(Duration::from_millis(50));
            assert!(!replace.is_finished());
            assert!(old_path.exists());

            // New metadata is already visible while the old file is still read
            let meta = vault.media_metadata(id, &key).unwrap().unwrap();
            assert_ne!(meta.original_asset, first_asset);

            drop(reader);
            assert!(replace.join().unwrap().unwrap());
        });

        assert!(!old_path.exists());
        drop(old);
        drop(media);

        let mut out = Vec::new();
        vault.export_original(id, &mut out, &key).unwrap();
        assert_eq!(out, b"second");
    }

    #[test]
    fn test_import_rejects_wrong_size() {
        let dir = tempdir().unwrap();
        let (vault, key) = open(dir.path());
        let id = vault.create_media(MediaType::Image, "x", &key).unwrap();

        let result = vault.import_original(id, &b"abc"[..], 10, "png", &key);
        assert!(matches!(result, Err(VaultError::StreamIncomplete { .. })));

        let meta = vault.media_metadata(id, &key).unwrap().unwrap();
        assert!(!meta.original_ready);
        assert_eq!(vault.export_original(id, &mut Vec::<u8>::new(), &key).unwrap(), None);
        assert!(!vault.import_original(999, &b""[..], 0, "png", &key).unwrap());
    }

    #[test]
    fn test_maintenance_wrappers() {
        let dir = tempdir().unwrap();
        let (vault, key) = open(dir.path());

        let id = vault.create_media(MediaType::Image, "a", &key).unwrap();
        vault.index().remove_element(id).unwrap();

        let report = vault.recover_assets().unwrap();
        assert_eq!(report.recovered, vec![id]);
        assert!(vault.fix_consistency().unwrap().is_clean());
    }
}
