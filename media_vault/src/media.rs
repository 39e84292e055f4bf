//! Media Vault - Media Assets
//!
//! Every media lives in `media/<hex(id % 256)>/<id>/` with an encrypted
//! `meta.pmv` and any number of asset files (`<kind>_<asset id>.pma`).
//! The [`MediaAssetManager`] hands out reference-counted handles so that
//! everyone working on the same media shares one lock.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, error, warn};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

use crate::crypto::{decrypt_json, encrypt_json, VaultKey};
use crate::error::VaultResult;
use crate::rw_lock::{ReadWriteLock, WriteGuard, WriteIntent};
use crate::temp_files::TempFiles;

/// Root folder of the media directories
pub const MEDIA_FOLDER: &str = "media";

/// Encrypted metadata file inside a media directory
pub const METADATA_FILE: &str = "meta.pmv";

/// Plain JSON file with the media id counter
pub const MEDIA_IDS_FILE: &str = "media_ids.json";

/// Directory of a media: `media/<hex(id % 256)>/<id>`
pub fn resolve_media_path(vault_path: &Path, media_id: u64) -> PathBuf {
    vault_path
        .join(MEDIA_FOLDER)
        .join(hex::encode([(media_id % 256) as u8]))
        .join(media_id.to_string())
}

// ═══════════════════════════════════════════════════════════════════════════
// METADATA
// ═══════════════════════════════════════════════════════════════════════════

/// Kind of media
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "u16", into = "u16")]
pub enum MediaType {
    /// Reserved for missing media
    #[default]
    Deleted,
    Image,
    Video,
    Audio,
}

impl From<u16> for MediaType {
    fn from(v: u16) -> Self {
        match v {
            1 => MediaType::Image,
            2 => MediaType::Video,
            3 => MediaType::Audio,
            _ => MediaType::Deleted,
        }
    }
}

impl From<MediaType> for u16 {
    fn from(t: MediaType) -> u16 {
        match t {
            MediaType::Deleted => 0,
            MediaType::Image => 1,
            MediaType::Video => 2,
            MediaType::Audio => 3,
        }
    }
}

/// Extra encoded resolution of a media
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MediaResolution {
    pub width: i32,
    pub height: i32,
    pub fps: i32,
    pub ready: bool,
    pub asset: u64,
    #[serde(rename = "ext")]
    pub extension: String,
    pub task_id: u64,
}

/// Subtitles track
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MediaSubtitle {
    /// Language code
    pub id: String,
    pub name: String,
    pub asset: u64,
}

/// Decrypted content of `meta.pmv`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MediaMetadata {
    pub id: u64,
    #[serde(rename = "type")]
    pub media_type: MediaType,
    pub title: String,
    pub description: String,
    /// Tag ids
    pub tags: Vec<u64>,
    /// Seconds
    pub duration: f64,
    pub width: i32,
    pub height: i32,
    pub fps: i32,
    /// Unix millis
    pub upload_time: i64,
    pub next_asset_id: u64,

    pub original_ready: bool,
    pub original_asset: u64,
    #[serde(rename = "original_ext")]
    pub original_extension: String,
    pub original_task: u64,
    pub original_encoded: bool,

    #[serde(rename = "thumb_ready")]
    pub thumbnail_ready: bool,
    #[serde(rename = "thumb_asset")]
    pub thumbnail_asset: u64,

    pub resolutions: Vec<MediaResolution>,
    pub subtitles: Vec<MediaSubtitle>,

    pub previews_ready: bool,
    pub previews_task: u64,
    pub previews_interval: f64,
    pub previews_asset: u64,

    pub force_start_beginning: bool,
}

impl MediaMetadata {
    /// Fresh metadata for a new upload
    pub fn new(id: u64, media_type: MediaType, title: impl Into<String>) -> Self {
        Self {
            id,
            media_type,
            title: title.into(),
            upload_time: chrono::Utc::now().timestamp_millis(),
            ..Default::default()
        }
    }

    /// Reserve the next asset id
    pub fn allocate_asset_id(&mut self) -> u64 {
        let id = self.next_asset_id;
        self.next_asset_id += 1;
        id
    }

    pub fn add_tag(&mut self, tag_id: u64) {
        if !self.tags.contains(&tag_id) {
            self.tags.push(tag_id);
        }
    }

    pub fn remove_tag(&mut self, tag_id: u64) {
        self.tags.retain(|t| *t != tag_id);
    }

    pub fn find_resolution(&self, width: i32, height: i32, fps: i32) -> Option<usize> {
        self.resolutions
            .iter()
            .position(|r| r.width == width && r.height == height && r.fps == fps)
    }

    pub fn remove_resolution(&mut self, index: usize) {
        if index < self.resolutions.len() {
            self.resolutions.remove(index);
        }
    }

    pub fn find_subtitle(&self, id: &str) -> Option<usize> {
        self.subtitles.iter().position(|s| s.id == id)
    }

    pub fn add_subtitle(&mut self, id: impl Into<String>, name: impl Into<String>, asset: u64) {
        self.subtitles.push(MediaSubtitle {
            id: id.into(),
            name: name.into(),
            asset,
        });
    }

    pub fn remove_subtitle(&mut self, index: usize) {
        if index < self.subtitles.len() {
            self.subtitles.remove(index);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// MEDIA ASSET
// ═══════════════════════════════════════════════════════════════════════════

/// Layout of an asset file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    /// One block-encrypted file
    Single,
    /// Pack of several encrypted files
    Multi,
}

impl AssetKind {
    pub fn prefix(self) -> &'static str {
        match self {
            AssetKind::Single => "s",
            AssetKind::Multi => "m",
        }
    }
}

#[derive(Debug)]
struct AssetFileEntry {
    count: usize,
    lock: Arc<ReadWriteLock>,
}

#[derive(Debug, Default)]
struct AssetFiles {
    deleting: bool,
    files: HashMap<u64, AssetFileEntry>,
}

/// One media of the vault
#[derive(Debug)]
pub struct MediaAsset {
    id: u64,
    path: PathBuf,
    lock: Arc<ReadWriteLock>,
    temp: Arc<TempFiles>,
    files: Mutex<AssetFiles>,
    /// Signalled when the last holder of an asset file releases it
    released: Condvar,
}

impl MediaAsset {
    fn new(id: u64, path: PathBuf, temp: Arc<TempFiles>) -> Self {
        Self {
            id,
            path,
            lock: ReadWriteLock::shared(),
            temp,
            files: Mutex::new(AssetFiles::default()),
            released: Condvar::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Media directory
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lock guarding the metadata and the media as a whole
    pub fn lock(&self) -> &Arc<ReadWriteLock> {
        &self.lock
    }

    fn metadata_path(&self) -> PathBuf {
        self.path.join(METADATA_FILE)
    }

    /// Path of an asset file
    pub fn asset_path(&self, asset_id: u64, kind: AssetKind) -> PathBuf {
        self.path
            .join(format!("{}_{}.pma", kind.prefix(), asset_id))
    }

    // ───────────────────────────────────────────────────────────────────────
    // Metadata
    // ───────────────────────────────────────────────────────────────────────

    fn read_data(&self, key: &VaultKey) -> VaultResult<Option<MediaMetadata>> {
        match fs::read(self.metadata_path()) {
            Ok(data) => Ok(Some(decrypt_json(&data, key)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Stage encrypted metadata in a temp file, then rename it in place under
    /// the exclusive section
    fn write_data(&self, guard: MetaLock, meta: &MediaMetadata, key: &VaultKey) -> VaultResult<()> {
        let encrypted = encrypt_json(meta, key)?;

        let tmp = self.temp.file_name("pmv");
        fs::write(&tmp, encrypted)?;

        let guard = match guard {
            MetaLock::Intent(intent) => intent.start_write(),
            MetaLock::Exclusive(guard) => guard,
        };
        let result = fs::rename(&tmp, self.metadata_path());
        guard.end_write();

        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }

        Ok(result?)
    }

    /// Create the media directory and its first metadata
    pub fn create_metadata(&self, meta: &MediaMetadata, key: &VaultKey) -> VaultResult<()> {
        fs::create_dir_all(&self.path)?;

        let intent = self.lock.request_write();
        self.write_data(MetaLock::Intent(intent), meta, key)
    }

    /// Read the metadata, `None` if the media does not exist
    pub fn read_metadata(&self, key: &VaultKey) -> VaultResult<Option<MediaMetadata>> {
        let _guard = self.lock.start_read();
        self.read_data(key)
    }

    /// Start a metadata update. Readers keep going until the commit.
    pub fn start_write(&self, key: &VaultKey) -> VaultResult<MetadataWrite<'_>> {
        let intent = self.lock.request_write();
        let current = self.read_data(key)?;

        Ok(MetadataWrite {
            media: self,
            lock: Some(MetaLock::Intent(intent)),
            current,
        })
    }

    /// Start a metadata update holding the exclusive section from the start
    pub fn start_write_with_full_lock(&self, key: &VaultKey) -> VaultResult<MetadataWrite<'_>> {
        let guard = self.lock.request_write().start_write();
        let current = self.read_data(key)?;

        Ok(MetadataWrite {
            media: self,
            lock: Some(MetaLock::Exclusive(guard)),
            current,
        })
    }

    // ───────────────────────────────────────────────────────────────────────
    // Asset files
    // ───────────────────────────────────────────────────────────────────────

    /// Acquire an asset file. `None` once the media is being deleted.
    pub fn acquire_asset(&self, asset_id: u64, kind: AssetKind) -> Option<AssetHandle<'_>> {
        let mut files = self.files.lock();

        if files.deleting {
            return None;
        }

        let entry = files
            .files
            .entry(asset_id)
            .or_insert_with(|| AssetFileEntry {
                count: 0,
                lock: ReadWriteLock::shared(),
            });
        entry.count += 1;

        Some(AssetHandle {
            media: self,
            asset_id,
            path: self.asset_path(asset_id, kind),
            lock: Arc::clone(&entry.lock),
        })
    }

    fn release_asset(&self, asset_id: u64) {
        let mut files = self.files.lock();

        let Some(entry) = files.files.get_mut(&asset_id) else {
            return;
        };

        entry.count = entry.count.saturating_sub(1);
        if entry.count == 0 {
            files.files.remove(&asset_id);
            if files.deleting {
                self.released.notify_all();
            }
        }
    }

    /// Number of asset files currently held
    pub fn open_assets(&self) -> usize {
        self.files.lock().files.len()
    }

    // ───────────────────────────────────────────────────────────────────────
    // Deletion
    // ───────────────────────────────────────────────────────────────────────

    /// Delete the media. The metadata goes at once; the directory is removed
    /// in the background after every asset file has been released.
    pub fn delete(self: &Arc<Self>) -> JoinHandle<()> {
        {
            let _guard = self.lock.request_write().start_write();
            if let Err(e) = fs::remove_file(self.metadata_path()) {
                if e.kind() != ErrorKind::NotFound {
                    warn!("Could not remove metadata of media {}: {}", self.id, e);
                }
            }
        }

        let media = Arc::clone(self);
        thread::spawn(move || media.delete_all())
    }

    fn delete_all(&self) {
        {
            let mut files = self.files.lock();
            if files.deleting {
                return;
            }
            files.deleting = true;

            while !files.files.is_empty() {
                self.released.wait(&mut files);
            }
        }

        let _guard = self.lock.request_write().start_write();
        match fs::remove_dir_all(&self.path) {
            Ok(()) => debug!("Deleted media {}", self.id),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => error!("Could not delete media folder {}: {}", self.path.display(), e),
        }
    }
}

enum MetaLock {
    Intent(WriteIntent),
    Exclusive(WriteGuard),
}

/// Pending metadata update. Dropping it cancels the update.
pub struct MetadataWrite<'a> {
    media: &'a MediaAsset,
    lock: Option<MetaLock>,
    current: Option<MediaMetadata>,
}

impl MetadataWrite<'_> {
    /// Metadata read at the start of the update
    pub fn current(&self) -> Option<&MediaMetadata> {
        self.current.as_ref()
    }

    /// Take the metadata read at the start of the update
    pub fn take(&mut self) -> Option<MediaMetadata> {
        self.current.take()
    }

    /// Persist new metadata and release the lock
    pub fn commit(mut self, meta: &MediaMetadata, key: &VaultKey) -> VaultResult<()> {
        match self.lock.take() {
            Some(lock) => self.media.write_data(lock, meta, key),
            None => Ok(()),
        }
    }

    /// Release the lock without writing
    pub fn cancel(self) {}
}

// ═══════════════════════════════════════════════════════════════════════════
// HANDLES
// ═══════════════════════════════════════════════════════════════════════════

/// Held asset file of a media, released when dropped
pub struct AssetHandle<'a> {
    media: &'a MediaAsset,
    asset_id: u64,
    path: PathBuf,
    lock: Arc<ReadWriteLock>,
}

impl AssetHandle<'_> {
    pub fn asset_id(&self) -> u64 {
        self.asset_id
    }

    /// Asset file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lock shared by every holder of this asset file
    pub fn lock(&self) -> &Arc<ReadWriteLock> {
        &self.lock
    }
}

impl Drop for AssetHandle<'_> {
    fn drop(&mut self) {
        self.media.release_asset(self.asset_id);
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// MANAGER
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default, Serialize, Deserialize)]
struct MediaIds {
    next_id: u64,
}

struct MediaEntry {
    count: usize,
    asset: Arc<MediaAsset>,
}

/// Registry of the media currently in use
pub struct MediaAssetManager {
    path: PathBuf,
    ids_file: PathBuf,
    ids_lock: Mutex<()>,
    temp: Arc<TempFiles>,
    assets: Mutex<HashMap<u64, MediaEntry>>,
}

impl MediaAssetManager {
    pub fn new<P: AsRef<Path>>(vault_path: P, temp: Arc<TempFiles>) -> Self {
        let path = vault_path.as_ref().to_path_buf();
        Self {
            ids_file: path.join(MEDIA_IDS_FILE),
            path,
            ids_lock: Mutex::new(()),
            temp,
            assets: Mutex::new(HashMap::new()),
        }
    }

    /// Reserve a new media id, persisted so it stays unique across restarts
    pub fn next_media_id(&self) -> VaultResult<u64> {
        let _lock = self.ids_lock.lock();

        let mut data: MediaIds = match fs::read(&self.ids_file) {
            Ok(raw) => serde_json::from_slice(&raw)?,
            Err(e) if e.kind() == ErrorKind::NotFound => MediaIds::default(),
            Err(e) => return Err(e.into()),
        };

        let media_id = data.next_id;
        data.next_id += 1;

        let tmp = self.temp.file_name("json");
        fs::write(&tmp, serde_json::to_vec(&data)?)?;
        if let Err(e) = fs::rename(&tmp, &self.ids_file) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }

        Ok(media_id)
    }

    /// Directory of a media
    pub fn resolve_media_path(&self, media_id: u64) -> PathBuf {
        resolve_media_path(&self.path, media_id)
    }

    /// Acquire a media. Concurrent holders of one id share the same asset.
    pub fn acquire(&self, media_id: u64) -> MediaHandle<'_> {
        let mut assets = self.assets.lock();

        let entry = assets.entry(media_id).or_insert_with(|| MediaEntry {
            count: 0,
            asset: Arc::new(MediaAsset::new(
                media_id,
                resolve_media_path(&self.path, media_id),
                Arc::clone(&self.temp),
            )),
        });
        entry.count += 1;

        MediaHandle {
            manager: self,
            asset: Arc::clone(&entry.asset),
        }
    }

    fn release(&self, media_id: u64) {
        let mut assets = self.assets.lock();

        let Some(entry) = assets.get_mut(&media_id) else {
            return;
        };

        entry.count = entry.count.saturating_sub(1);
        if entry.count == 0 {
            assets.remove(&media_id);
        }
    }

    /// Number of media currently held
    pub fn open_media(&self) -> usize {
        self.assets.lock().len()
    }
}

/// Held media, released when dropped
pub struct MediaHandle<'a> {
    manager: &'a MediaAssetManager,
    asset: Arc<MediaAsset>,
}

impl MediaHandle<'_> {
    /// Shared asset behind this handle
    pub fn asset(&self) -> &Arc<MediaAsset> {
        &self.asset
    }

    /// See [`MediaAsset::delete`]
    pub fn delete(&self) -> JoinHandle<()> {
        self.asset.delete()
    }
}

impl Deref for MediaHandle<'_> {
    type Target = MediaAsset;

    fn deref(&self) -> &MediaAsset {
        &self.asset
    }
}

impl Drop for MediaHandle<'_> {
    fn drop(&mut self) {
        self.manager.release(self.asset.id);
    }
}
