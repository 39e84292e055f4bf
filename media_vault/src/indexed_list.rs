//! Media Vault - Sorted Indexed List File
//!
//! ```text
//! [COUNT 8B][u64 big-endian]
//! [IDS count x 8B][u64 big-endian, strictly ascending]
//! ```
//!
//! Used for the main index and for every tag index. Inserts and removals
//! shift the tail of the file, which is fine at personal-vault scale.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{VaultError, VaultResult};

/// Size of the count header and of each entry
const ENTRY_SIZE: u64 = 8;

/// Sorted list of ids backed by a file
#[derive(Debug)]
pub struct IndexedListFile {
    file: File,
}

impl IndexedListFile {
    /// Open (creating if needed) for reading and writing
    pub fn open_for_writing<P: AsRef<Path>>(path: P) -> VaultResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.as_ref())?;
        Ok(Self { file })
    }

    /// Open an existing file read-only
    pub fn open_for_reading<P: AsRef<Path>>(path: P) -> VaultResult<Self> {
        let file = File::open(path.as_ref())?;
        Ok(Self { file })
    }

    /// Reset to an empty list
    pub fn initialize(&mut self) -> VaultResult<()> {
        self.file.set_len(ENTRY_SIZE)?;
        self.write_count(0)
    }

    /// Flush to disk
    pub fn sync(&mut self) -> VaultResult<()> {
        self.file.sync_all()?;
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // RAW ACCESS
    // ═══════════════════════════════════════════════════════════════════════

    fn read_u64_at(&mut self, offset: u64) -> VaultResult<u64> {
        let mut b = [0u8; 8];
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut b)?;
        Ok(u64::from_be_bytes(b))
    }

    fn write_u64_at(&mut self, offset: u64, value: u64) -> VaultResult<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(&value.to_be_bytes())?;
        Ok(())
    }

    fn write_count(&mut self, count: u64) -> VaultResult<()> {
        self.write_u64_at(0, count)
    }

    fn entry_offset(index: u64) -> VaultResult<u64> {
        index
            .checked_add(1)
            .and_then(|i| i.checked_mul(ENTRY_SIZE))
            .ok_or_else(|| VaultError::IndexCorrupted(format!("entry {} out of range", index)))
    }

    /// Read `n` consecutive entries starting at `index`.
    /// The range must lie inside the file, whatever the count header says.
    fn read_range(&mut self, index: u64, n: u64) -> VaultResult<Vec<u64>> {
        let start = Self::entry_offset(index)?;
        let len = self.file.metadata()?.len();
        let end = n
            .checked_mul(ENTRY_SIZE)
            .and_then(|size| size.checked_add(start))
            .filter(|end| *end <= len)
            .ok_or_else(|| {
                VaultError::IndexCorrupted(format!(
                    "{} entries at {} exceed file length {}",
                    n, index, len
                ))
            })?;

        let mut raw = vec![0u8; (end - start) as usize];
        self.file.seek(SeekFrom::Start(start))?;
        self.file.read_exact(&mut raw)?;

        Ok(raw
            .chunks_exact(ENTRY_SIZE as usize)
            .map(|c| {
                let mut b = [0u8; 8];
                b.copy_from_slice(c);
                u64::from_be_bytes(b)
            })
            .collect())
    }

    fn write_range(&mut self, index: u64, values: &[u64]) -> VaultResult<()> {
        let raw: Vec<u8> = values.iter().flat_map(|v| v.to_be_bytes()).collect();
        self.file.seek(SeekFrom::Start(Self::entry_offset(index)?))?;
        self.file.write_all(&raw)?;
        Ok(())
    }

    /// Number of ids
    pub fn count(&mut self) -> VaultResult<u64> {
        self.read_u64_at(0)
    }

    /// Id at a position
    pub fn read_value(&mut self, index: u64) -> VaultResult<u64> {
        self.read_u64_at(Self::entry_offset(index)?)
    }

    /// Overwrite the id at a position (caller keeps the order)
    pub fn write_value(&mut self, index: u64, value: u64) -> VaultResult<()> {
        self.write_u64_at(Self::entry_offset(index)?, value)
    }

    /// Check the file length against the count header
    pub fn validate(&mut self) -> VaultResult<u64> {
        let len = self.file.metadata()?.len();
        if len < ENTRY_SIZE {
            return Err(VaultError::IndexCorrupted(format!(
                "index file too short: {} bytes",
                len
            )));
        }

        let count = self.count()?;
        let expected = count
            .checked_mul(ENTRY_SIZE)
            .and_then(|n| n.checked_add(ENTRY_SIZE));
        if expected != Some(len) {
            return Err(VaultError::IndexCorrupted(format!(
                "count {} does not match file length {}",
                count, len
            )));
        }

        Ok(count)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // SEARCH
    // ═══════════════════════════════════════════════════════════════════════

    /// Find a value. Returns whether it is present and its insertion point.
    pub fn binary_search(&mut self, value: u64) -> VaultResult<(bool, u64)> {
        let count = self.count()?;
        self.binary_search_with_count(value, count)
    }

    /// Same as [`binary_search`](Self::binary_search) with a known count
    pub fn binary_search_with_count(&mut self, value: u64, count: u64) -> VaultResult<(bool, u64)> {
        let mut low = 0u64;
        let mut high = count;
        let mut found = false;

        while low < high {
            let mid = low + (high - low) / 2;
            let mid_value = self.read_value(mid)?;

            if mid_value < value {
                low = mid + 1;
            } else {
                // Ids are unique: once seen, the lower bound converges on it
                found |= mid_value == value;
                high = mid;
            }
        }

        Ok((found, low))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // MUTATION
    // ═══════════════════════════════════════════════════════════════════════

    /// Insert a value in order. Returns `(inserted, index)`.
    pub fn add_value(&mut self, value: u64) -> VaultResult<(bool, u64)> {
        let count = self.count()?;
        let (found, index) = self.binary_search_with_count(value, count)?;

        if found {
            return Ok((false, index));
        }

        let tail = self.read_range(index, count - index)?;

        self.file.set_len(ENTRY_SIZE + ENTRY_SIZE * (count + 1))?;
        self.write_range(index + 1, &tail)?;
        self.write_value(index, value)?;
        self.write_count(count + 1)?;

        Ok((true, index))
    }

    /// Remove a value. Returns `(removed, new_count)`.
    pub fn remove_value(&mut self, value: u64) -> VaultResult<(bool, u64)> {
        let count = self.count()?;
        let (found, index) = self.binary_search_with_count(value, count)?;

        if !found {
            return Ok((false, count));
        }

        let new_count = self.remove_index(index, count)?;

        Ok((true, new_count))
    }

    /// Remove the entry at `index`. Returns the new count.
    pub fn remove_index(&mut self, index: u64, count: u64) -> VaultResult<u64> {
        if index >= count {
            return Err(VaultError::IndexCorrupted(format!(
                "remove index {} out of range (count {})",
                index, count
            )));
        }

        let tail = self.read_range(index + 1, count - index - 1)?;
        self.write_range(index, &tail)?;

        self.file.set_len(ENTRY_SIZE + ENTRY_SIZE * (count - 1))?;
        self.write_count(count - 1)?;

        Ok(count - 1)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // LISTING
    // ═══════════════════════════════════════════════════════════════════════

    /// Ascending page
    pub fn list_values(&mut self, skip: u64, limit: u64) -> VaultResult<Vec<u64>> {
        let count = self.count()?;
        if limit == 0 || skip >= count {
            return Ok(Vec::new());
        }

        let n = (count - skip).min(limit);
        self.read_range(skip, n)
    }

    /// Descending page, `skip` counted from the largest id
    pub fn list_values_reverse(&mut self, skip: u64, limit: u64) -> VaultResult<Vec<u64>> {
        let count = self.count()?;
        if limit == 0 || skip >= count {
            return Ok(Vec::new());
        }

        let n = (count - skip).min(limit);
        let mut values = self.read_range(count - skip - n, n)?;
        values.reverse();

        Ok(values)
    }

    /// Deterministic sample without replacement.
    ///
    /// A colliding pick probes forward for a free slot and the sampling stops
    /// early if the probe wraps back to where it started, so fewer than
    /// `limit` ids may come back.
    pub fn random_values(&mut self, seed: u64, limit: u64) -> VaultResult<Vec<u64>> {
        let count = self.count()?;
        let wanted = limit.min(count);

        let mut rng = StdRng::seed_from_u64(seed);
        let mut picked: HashSet<u64> = HashSet::with_capacity(wanted as usize);
        let mut result = Vec::with_capacity(wanted as usize);

        'sampling: while (result.len() as u64) < wanted {
            let start = rng.gen_range(0..count);
            let mut index = start;

            while picked.contains(&index) {
                index = (index + 1) % count;
                if index == start {
                    break 'sampling;
                }
            }

            picked.insert(index);
            result.push(self.read_value(index)?);
        }

        Ok(result)
    }
}
