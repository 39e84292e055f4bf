//! Media Vault - Vault Scanner
//!
//! Walks one "driving" index and probes the other indexes of the filter with
//! binary search. All indexes stay open for reading while the scanner
//! lives; they are released in reverse acquisition order when it drops,
//! including when construction fails halfway.

use crate::crypto::VaultKey;
use crate::error::VaultResult;
use crate::index::{IndexRead, VaultIndex};
use crate::tags::{TagIndexHandle, TagManager};

/// Default cap on the number of tags in one filter
pub const MAX_TAGS_FILTER_COUNT: usize = 16;

/// How the tags of a filter combine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TagFilterMode {
    /// Media with every tag
    #[default]
    AllOf,
    /// Media with at least one tag
    AnyOf,
    /// Media with none of the tags
    NoneOf,
}

/// Search parameters
#[derive(Debug, Clone)]
pub struct ScanQuery {
    pub mode: TagFilterMode,
    pub tags: Vec<String>,
    pub reversed: bool,
    /// Resume after (or, reversed, before) this media id
    pub continue_from: Option<u64>,
    /// Tags past this count are ignored
    pub max_tags: usize,
}

impl Default for ScanQuery {
    fn default() -> Self {
        Self {
            mode: TagFilterMode::AllOf,
            tags: Vec::new(),
            reversed: false,
            continue_from: None,
            max_tags: MAX_TAGS_FILTER_COUNT,
        }
    }
}

struct TagScanEntry<'a> {
    count: u64,
    // Read section ends before the tag index is released
    file: IndexRead,
    _handle: TagIndexHandle<'a>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Driving {
    Main,
    Tag(usize),
}

/// Resumable filtered scan over the vault indexes
pub struct VaultScanner<'a> {
    mode: TagFilterMode,
    reversed: bool,
    main: Option<IndexRead>,
    /// Tag indexes in acquisition order
    tags: Vec<TagScanEntry<'a>>,
    /// Probe order: ascending count for ALL_OF, descending otherwise
    order: Vec<usize>,
    driving: Driving,
    total: u64,
    /// Forward: next position. Reversed: entries left below the cursor.
    cursor: u64,
}

impl<'a> VaultScanner<'a> {
    /// Prepare a scan. `None` means the result is known to be empty.
    pub fn new(
        main_index: &VaultIndex,
        tag_manager: &'a TagManager,
        query: &ScanQuery,
        key: &'a VaultKey,
    ) -> VaultResult<Option<Self>> {
        let tag_list = tag_manager.read_list(key)?;

        let mut tag_ids = Vec::new();
        for name in query.tags.iter().take(query.max_tags) {
            match tag_list.find_tag(name) {
                Some(id) => tag_ids.push(id),
                // One missing tag empties an intersection
                None if query.mode == TagFilterMode::AllOf => return Ok(None),
                None => {}
            }
        }

        // Every scanner locks tag indexes in ascending id order
        tag_ids.sort_unstable();
        tag_ids.dedup();

        if query.mode == TagFilterMode::AnyOf && tag_ids.is_empty() {
            return Ok(None);
        }

        let needs_main = match query.mode {
            TagFilterMode::NoneOf => true,
            TagFilterMode::AllOf => tag_ids.is_empty(),
            TagFilterMode::AnyOf => tag_ids.len() > 1,
        };

        let mut scanner = VaultScanner {
            mode: query.mode,
            reversed: query.reversed,
            main: None,
            tags: Vec::with_capacity(tag_ids.len()),
            order: Vec::new(),
            driving: Driving::Main,
            total: 0,
            cursor: 0,
        };

        // From here on, an early return drops the scanner, which unwinds
        // whatever was acquired so far
        if needs_main {
            let mut main = main_index.start_read()?;
            scanner.total = main.count()?;
            scanner.main = Some(main);
        }

        for tag_id in tag_ids {
            let handle = tag_manager.acquire_index(tag_id, key)?;
            let mut file = handle.start_read()?;
            let count = file.count()?;

            scanner.tags.push(TagScanEntry {
                count,
                file,
                _handle: handle,
            });
        }

        let mut order: Vec<usize> = (0..scanner.tags.len()).collect();
        if scanner.mode == TagFilterMode::AllOf {
            order.sort_by_key(|i| scanner.tags[*i].count);
        } else {
            order.sort_by_key(|i| std::cmp::Reverse(scanner.tags[*i].count));
        }
        scanner.order = order;

        if !needs_main {
            let first = scanner.order[0];
            scanner.driving = Driving::Tag(first);
            scanner.total = scanner.tags[first].count;
        }

        scanner.position(query.continue_from)?;

        Ok(Some(scanner))
    }

    fn driving_file(&mut self) -> &mut IndexRead {
        match self.driving {
            Driving::Tag(i) => &mut self.tags[i].file,
            Driving::Main => match self.main.as_mut() {
                Some(main) => main,
                None => unreachable!("main index not acquired"),
            },
        }
    }

    fn position(&mut self, continue_from: Option<u64>) -> VaultResult<()> {
        let Some(id) = continue_from else {
            self.cursor = if self.reversed { self.total } else { 0 };
            return Ok(());
        };

        let total = self.total;
        let (found, index) = self.driving_file().binary_search_with_count(id, total)?;

        self.cursor = if self.reversed {
            // Entries strictly below the id
            index
        } else if found {
            index + 1
        } else {
            index
        };

        Ok(())
    }

    fn probe(&mut self, slot: usize, id: u64) -> VaultResult<bool> {
        let entry = &mut self.tags[slot];
        let (found, _) = entry.file.binary_search_with_count(id, entry.count)?;
        Ok(found)
    }

    fn passes(&mut self, id: u64) -> VaultResult<bool> {
        match self.mode {
            TagFilterMode::AllOf => {
                // The driving index comes first in probe order
                for k in 1..self.order.len() {
                    if !self.probe(self.order[k], id)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            TagFilterMode::AnyOf => {
                for k in 0..self.order.len() {
                    if self.probe(self.order[k], id)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            TagFilterMode::NoneOf => {
                for k in 0..self.order.len() {
                    if self.probe(self.order[k], id)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
        }
    }

    /// Next matching media id, `None` at the end
    pub fn next_match(&mut self) -> VaultResult<Option<u64>> {
        loop {
            let position = if self.reversed {
                if self.cursor == 0 {
                    return Ok(None);
                }
                self.cursor -= 1;
                self.cursor
            } else {
                if self.cursor >= self.total {
                    return Ok(None);
                }
                self.cursor += 1;
                self.cursor - 1
            };

            let id = self.driving_file().read_value(position)?;

            if self.passes(id)? {
                return Ok(Some(id));
            }
        }
    }

    /// Up to `limit` matching ids
    pub fn next_page(&mut self, limit: usize) -> VaultResult<Vec<u64>> {
        let mut page = Vec::with_capacity(limit.min(1024));
        while page.len() < limit {
            match self.next_match()? {
                Some(id) => page.push(id),
                None => break,
            }
        }
        Ok(page)
    }

    /// `(scanned, total)` entries of the driving index
    pub fn progress(&self) -> (u64, u64) {
        let scanned = if self.reversed {
            self.total - self.cursor
        } else {
            self.cursor
        };
        (scanned, self.total)
    }
}

impl Iterator for VaultScanner<'_> {
    type Item = VaultResult<u64>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_match().transpose()
    }
}

impl Drop for VaultScanner<'_> {
    fn drop(&mut self) {
        while let Some(entry) = self.tags.pop() {
            drop(entry);
        }
        self.main = None;
    }
}
