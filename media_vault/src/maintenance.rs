//! Media Vault - Consistency Sweeps
//!
//! Reconcile the media directories on disk with the main index after an
//! unclean shutdown. [`fix_consistency`] removes folders the index does not
//! know about; [`recover_assets`] does the opposite and re-indexes them.

use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};
use walkdir::WalkDir;

use crate::error::VaultResult;
use crate::index::VaultIndex;
use crate::media::MEDIA_FOLDER;

/// Findings of a sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Media folders inspected
    pub checked: usize,
    /// Folders whose bucket does not match their id
    pub misplaced: Vec<PathBuf>,
    /// Ids removed from disk because they were not indexed
    pub removed: Vec<u64>,
    /// Ids added back to the main index
    pub recovered: Vec<u64>,
}

impl SweepReport {
    /// Nothing was found
    pub fn is_clean(&self) -> bool {
        self.misplaced.is_empty() && self.removed.is_empty() && self.recovered.is_empty()
    }
}

struct MediaFolder {
    id: u64,
    bucket: String,
    path: PathBuf,
}

impl MediaFolder {
    fn is_well_placed(&self) -> bool {
        self.bucket == hex::encode([(self.id % 256) as u8])
    }

    fn display(&self) -> String {
        format!("{}/{}/{}", MEDIA_FOLDER, self.bucket, self.id)
    }
}

/// Every `media/<bucket>/<id>` directory with a numeric name
fn media_folders(vault_path: &Path) -> Vec<MediaFolder> {
    let root = vault_path.join(MEDIA_FOLDER);
    if !root.is_dir() {
        return Vec::new();
    }

    WalkDir::new(&root)
        .min_depth(2)
        .max_depth(2)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Could not read media folder: {}", e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_dir())
        .filter_map(|entry| {
            let id = entry.file_name().to_str()?.parse::<u64>().ok()?;
            let bucket = entry
                .path()
                .parent()?
                .file_name()?
                .to_str()?
                .to_string();
            Some(MediaFolder {
                id,
                bucket,
                path: entry.into_path(),
            })
        })
        .collect()
}

fn remove_folder(folder: &MediaFolder) {
    if let Err(e) = fs::remove_dir_all(&folder.path) {
        warn!("Could not remove {}: {}", folder.path.display(), e);
    }
}

/// Remove media folders that are misplaced or missing from the main index
pub fn fix_consistency(vault_path: &Path, main_index: &VaultIndex) -> VaultResult<SweepReport> {
    let mut report = SweepReport::default();
    let mut index = main_index.start_read()?;

    for folder in media_folders(vault_path) {
        report.checked += 1;

        if !folder.is_well_placed() {
            info!(
                "Found inconsistency: media folder prefix invalid '{}' (removing)",
                folder.display()
            );
            remove_folder(&folder);
            report.misplaced.push(folder.path);
            continue;
        }

        let (exists, _) = index.binary_search(folder.id)?;
        if !exists {
            info!(
                "Found inconsistency: media folder not indexed '{}' (removing)",
                folder.display()
            );
            remove_folder(&folder);
            report.removed.push(folder.id);
        }
    }

    Ok(report)
}

/// Add correctly placed but unindexed media folders back to the main index
pub fn recover_assets(vault_path: &Path, main_index: &VaultIndex) -> VaultResult<SweepReport> {
    let mut report = SweepReport::default();
    let mut write = main_index.start_write()?;

    for folder in media_folders(vault_path) {
        report.checked += 1;

        if !folder.is_well_placed() {
            continue;
        }

        let (added, _) = write.add_value(folder.id)?;
        if added {
            info!(
                "Found missing asset: media folder not indexed '{}' (adding)",
                folder.display()
            );
            report.recovered.push(folder.id);
        }
    }

    if report.recovered.is_empty() {
        write.cancel();
    } else {
        write.commit()?;
    }

    Ok(report)
}
