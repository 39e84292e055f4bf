//! Media Vault - Block-Encrypted Streams
//!
//! Large assets are split in fixed-size blocks, each one stored as an
//! independent flat container, so a range of the plaintext can be read
//! without decrypting the whole file.
//!
//! ```text
//! [TOTAL SIZE 8B][u64 big-endian, plaintext size]
//! [BLOCK SIZE 8B][u64 big-endian]
//! [TABLE][block_count x (u64 offset, u64 length)]
//! [PAYLOAD][block_count flat containers]
//! ```

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use zeroize::Zeroizing;

use super::container;
use super::keys::VaultKey;
use crate::error::{VaultError, VaultResult};

/// Plaintext block size for new files (5 MiB)
pub const BLOCK_SIZE: u64 = 5 * 1024 * 1024;

/// Header size: TOTAL SIZE(8) + BLOCK SIZE(8)
const HEADER_SIZE: u64 = 16;

/// Size of one block table entry: OFFSET(8) + LENGTH(8)
const TABLE_ENTRY_SIZE: u64 = 16;

fn block_count_for(total_size: u64, block_size: u64) -> u64 {
    total_size.div_ceil(block_size)
}

// ═══════════════════════════════════════════════════════════════════════════
// WRITE STREAM
// ═══════════════════════════════════════════════════════════════════════════

/// Writes a block-encrypted file of a known plaintext size
pub struct BlockEncryptWriter {
    file: File,
    key: VaultKey,
    total_size: u64,
    block_size: u64,
    block_count: u64,
    /// Index of the next block to be written
    write_index: u64,
    /// File offset where the next block payload goes
    write_offset: u64,
    /// Plaintext bytes accepted so far
    written: u64,
    buf: Zeroizing<Vec<u8>>,
}

impl BlockEncryptWriter {
    /// Create the file and write the header plus a zeroed block table
    pub fn create<P: AsRef<Path>>(path: P, total_size: u64, key: &VaultKey) -> VaultResult<Self> {
        Self::create_with_block_size(path, total_size, BLOCK_SIZE, key)
    }

    pub(crate) fn create_with_block_size<P: AsRef<Path>>(
        path: P,
        total_size: u64,
        block_size: u64,
        key: &VaultKey,
    ) -> VaultResult<Self> {
        if block_size == 0 {
            return Err(VaultError::InvalidFormat("block size cannot be zero".into()));
        }

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())?;

        let mut writer = Self {
            file,
            key: key.clone(),
            total_size,
            block_size,
            block_count: block_count_for(total_size, block_size),
            write_index: 0,
            write_offset: 0,
            written: 0,
            buf: Zeroizing::new(Vec::new()),
        };

        writer.initialize()?;

        Ok(writer)
    }

    fn initialize(&mut self) -> VaultResult<()> {
        let table_end = HEADER_SIZE + TABLE_ENTRY_SIZE * self.block_count;

        self.file.set_len(table_end)?;
        self.file.seek(SeekFrom::Start(0))?;

        let mut header = Vec::with_capacity(table_end as usize);
        header.extend_from_slice(&self.total_size.to_be_bytes());
        header.extend_from_slice(&self.block_size.to_be_bytes());
        header.resize(table_end as usize, 0);
        self.file.write_all(&header)?;

        self.write_offset = table_end;

        Ok(())
    }

    /// Number of blocks the file will contain
    pub fn block_count(&self) -> u64 {
        self.block_count
    }

    /// Append plaintext. Every full block is encrypted and flushed immediately.
    pub fn write(&mut self, data: &[u8]) -> VaultResult<()> {
        if self.written + data.len() as u64 > self.total_size {
            return Err(VaultError::StreamOverflow {
                declared: self.total_size,
            });
        }

        self.written += data.len() as u64;
        self.buf.extend_from_slice(data);

        let block_size = self.block_size as usize;
        while self.buf.len() >= block_size {
            let rest = Zeroizing::new(self.buf.split_off(block_size));
            let block = std::mem::replace(&mut self.buf, rest);
            self.flush_block(&block)?;
        }

        Ok(())
    }

    /// Flush the trailing partial block and close the file
    pub fn close(mut self) -> VaultResult<()> {
        if self.written != self.total_size {
            return Err(VaultError::StreamIncomplete {
                declared: self.total_size,
                written: self.written,
            });
        }

        if !self.buf.is_empty() {
            let block = std::mem::take(&mut *self.buf);
            self.flush_block(&Zeroizing::new(block))?;
        }

        self.file.sync_all()?;

        Ok(())
    }

    fn flush_block(&mut self, block: &[u8]) -> VaultResult<()> {
        if self.write_index >= self.block_count {
            return Err(VaultError::StreamOverflow {
                declared: self.total_size,
            });
        }

        let content = container::encrypt(block, &self.key)?;

        // Table entry
        let mut entry = [0u8; TABLE_ENTRY_SIZE as usize];
        entry[..8].copy_from_slice(&self.write_offset.to_be_bytes());
        entry[8..].copy_from_slice(&(content.len() as u64).to_be_bytes());

        self.file
            .seek(SeekFrom::Start(HEADER_SIZE + self.write_index * TABLE_ENTRY_SIZE))?;
        self.file.write_all(&entry)?;

        // Payload
        self.file.seek(SeekFrom::Start(self.write_offset))?;
        self.file.write_all(&content)?;

        self.write_index += 1;
        self.write_offset += content.len() as u64;

        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// READ STREAM
// ═══════════════════════════════════════════════════════════════════════════

/// Random-access reader over the plaintext of a block-encrypted file
pub struct BlockDecryptReader {
    file: File,
    file_len: u64,
    key: VaultKey,
    total_size: u64,
    block_size: u64,
    block_count: u64,
    pos: u64,
    /// Most recently decrypted block
    cached: Option<(u64, Zeroizing<Vec<u8>>)>,
}

impl BlockDecryptReader {
    /// Open a block-encrypted file and parse its header
    pub fn open<P: AsRef<Path>>(path: P, key: &VaultKey) -> VaultResult<Self> {
        let mut file = File::open(path.as_ref())?;
        let file_len = file.metadata()?.len();

        let mut header = [0u8; HEADER_SIZE as usize];
        file.read_exact(&mut header).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => VaultError::InvalidFormat("truncated header".into()),
            _ => VaultError::IoError(e),
        })?;

        let total_size = u64::from_be_bytes(header[..8].try_into().unwrap_or_default());
        let block_size = u64::from_be_bytes(header[8..].try_into().unwrap_or_default());

        if block_size == 0 {
            return Err(VaultError::InvalidFormat("block size is zero".into()));
        }

        let block_count = block_count_for(total_size, block_size);

        let table_end = block_count
            .checked_mul(TABLE_ENTRY_SIZE)
            .and_then(|t| t.checked_add(HEADER_SIZE));
        if table_end.map_or(true, |end| end > file_len) {
            return Err(VaultError::InvalidFormat(format!(
                "block table for {} blocks does not fit in {} bytes",
                block_count, file_len
            )));
        }

        Ok(Self {
            file,
            file_len,
            key: key.clone(),
            total_size,
            block_size,
            block_count,
            pos: 0,
            cached: None,
        })
    }

    /// Plaintext size
    pub fn size(&self) -> u64 {
        self.total_size
    }

    /// Number of blocks in the file
    pub fn block_count(&self) -> u64 {
        self.block_count
    }

    /// Current logical position
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Read and decrypt one block, replacing the cached one
    fn fetch_block(&mut self, index: u64) -> VaultResult<()> {
        if index >= self.block_count {
            return Err(VaultError::BlockOutOfBounds {
                index,
                count: self.block_count,
            });
        }

        let mut entry = [0u8; TABLE_ENTRY_SIZE as usize];
        self.file
            .seek(SeekFrom::Start(HEADER_SIZE + index * TABLE_ENTRY_SIZE))?;
        self.file.read_exact(&mut entry)?;

        let offset = u64::from_be_bytes(entry[..8].try_into().unwrap_or_default());
        let length = u64::from_be_bytes(entry[8..].try_into().unwrap_or_default());

        let table_end = HEADER_SIZE + self.block_count * TABLE_ENTRY_SIZE;
        let in_bounds = offset >= table_end
            && offset
                .checked_add(length)
                .map_or(false, |end| end <= self.file_len);
        if length == 0 || !in_bounds {
            return Err(VaultError::InvalidFormat(format!(
                "block {} table entry ({}, {}) points outside the file",
                index, offset, length
            )));
        }

        let mut data = vec![0u8; length as usize];
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut data)?;

        let plain = Zeroizing::new(container::decrypt(&data, &self.key)?);

        let expected = if index + 1 == self.block_count {
            self.total_size - index * self.block_size
        } else {
            self.block_size
        };
        if plain.len() as u64 != expected {
            return Err(VaultError::InvalidFormat(format!(
                "block {} decrypted to {} bytes, expected {}",
                index,
                plain.len(),
                expected
            )));
        }

        self.cached = Some((index, plain));

        Ok(())
    }

    fn read_plain(&mut self, buf: &mut [u8]) -> VaultResult<usize> {
        let mut filled = 0;

        while filled < buf.len() && self.pos < self.total_size {
            let block_index = self.pos / self.block_size;
            let block_offset = (self.pos % self.block_size) as usize;

            if self.cached.as_ref().map(|(i, _)| *i) != Some(block_index) {
                self.fetch_block(block_index)?;
            }

            let Some((_, block)) = self.cached.as_ref() else {
                break;
            };

            let available = block.len() - block_offset;
            let n = available.min(buf.len() - filled);

            buf[filled..filled + n].copy_from_slice(&block[block_offset..block_offset + n]);

            filled += n;
            self.pos += n as u64;
        }

        Ok(filled)
    }
}

impl Read for BlockDecryptReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.read_plain(buf)?)
    }
}

impl Seek for BlockDecryptReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target: i128 = match pos {
            SeekFrom::Start(p) => p as i128,
            SeekFrom::Current(off) => self.pos as i128 + off as i128,
            SeekFrom::End(off) => self.total_size as i128 + off as i128,
        };

        if target < 0 || target > self.total_size as i128 {
            return Err(VaultError::SeekOutOfBounds {
                pos: target,
                size: self.total_size,
            }
            .into());
        }

        self.pos = target as u64;

        Ok(self.pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const SMALL_BLOCK: u64 = 1024;

    fn test_key() -> VaultKey {
        VaultKey::new([0x42u8; 32])
    }

    fn sample(size: usize) -> Vec<u8> {
        (0..size).map(|i| (i * 31 % 253) as u8).collect()
    }

    fn write_file(path: &Path, data: &[u8], block_size: u64, chunk: usize) {
        let key = test_key();
        let mut writer =
            BlockEncryptWriter::create_with_block_size(path, data.len() as u64, block_size, &key)
                .unwrap();
        for part in data.chunks(chunk.max(1)) {
            writer.write(part).unwrap();
        }
        writer.close().unwrap();
    }

    #[test]
    fn test_roundtrip_sizes() {
        let dir = tempdir().unwrap();
        let key = test_key();

        let sizes = [
            0usize,
            1,
            SMALL_BLOCK as usize,
            3 * SMALL_BLOCK as usize + 77,
        ];

        for size in sizes {
            let path = dir.path().join(format!("asset_{}.pma", size));
            let data = sample(size);
            write_file(&path, &data, SMALL_BLOCK, 333);

            let mut reader = BlockDecryptReader::open(&path, &key).unwrap();
            assert_eq!(reader.size(), size as u64);
            assert_eq!(reader.block_count(), block_count_for(size as u64, SMALL_BLOCK));

            let mut out = Vec::new();
            reader.read_to_end(&mut out).unwrap();
            assert_eq!(out, data, "size {}", size);
        }
    }

    #[test]
    fn test_default_block_size_single_block() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("one_block.pma");
        let key = test_key();
        let data = sample(BLOCK_SIZE as usize);

        let mut writer = BlockEncryptWriter::create(&path, data.len() as u64, &key).unwrap();
        assert_eq!(writer.block_count(), 1);
        writer.write(&data).unwrap();
        writer.close().unwrap();

        let mut reader = BlockDecryptReader::open(&path, &key).unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_header_and_table_layout() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("layout.pma");
        let data = sample(2 * SMALL_BLOCK as usize + 10);
        write_file(&path, &data, SMALL_BLOCK, 4096);

        let raw = std::fs::read(&path).unwrap();
        assert_eq!(u64::from_be_bytes(raw[0..8].try_into().unwrap()), data.len() as u64);
        assert_eq!(u64::from_be_bytes(raw[8..16].try_into().unwrap()), SMALL_BLOCK);

        // Entries are contiguous, non-overlapping and inside the file
        let mut expected_offset = HEADER_SIZE + 3 * TABLE_ENTRY_SIZE;
        for i in 0..3usize {
            let at = 16 + i * 16;
            let offset = u64::from_be_bytes(raw[at..at + 8].try_into().unwrap());
            let length = u64::from_be_bytes(raw[at + 8..at + 16].try_into().unwrap());
            assert_eq!(offset, expected_offset);
            assert!(length > 0);
            expected_offset += length;
        }
        assert_eq!(expected_offset, raw.len() as u64);
    }

    #[test]
    fn test_seek_and_range_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("range.pma");
        let key = test_key();
        let data = sample(5 * SMALL_BLOCK as usize + 123);
        write_file(&path, &data, SMALL_BLOCK, 700);

        let mut reader = BlockDecryptReader::open(&path, &key).unwrap();

        // Range crossing a block boundary
        let start = SMALL_BLOCK as usize - 10;
        reader.seek(SeekFrom::Start(start as u64)).unwrap();
        let mut buf = vec![0u8; 50];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf[..], &data[start..start + 50]);

        // Relative seek backwards
        let pos = reader.seek(SeekFrom::Current(-20)).unwrap();
        assert_eq!(pos, (start + 30) as u64);
        let mut buf = vec![0u8; 5];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf[..], &data[start + 30..start + 35]);

        // From the end
        let pos = reader.seek(SeekFrom::End(-3)).unwrap();
        assert_eq!(pos, data.len() as u64 - 3);
        let mut tail = Vec::new();
        reader.read_to_end(&mut tail).unwrap();
        assert_eq!(&tail[..], &data[data.len() - 3..]);

        // At the end, reads return 0
        assert_eq!(reader.read(&mut [0u8; 8]).unwrap(), 0);
    }

    #[test]
    fn test_seek_out_of_bounds() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bounds.pma");
        let key = test_key();
        write_file(&path, &sample(100), SMALL_BLOCK, 100);

        let mut reader = BlockDecryptReader::open(&path, &key).unwrap();
        assert!(reader.seek(SeekFrom::Start(101)).is_err());
        assert!(reader.seek(SeekFrom::Current(-1)).is_err());
        assert!(reader.seek(SeekFrom::End(1)).is_err());
        assert_eq!(reader.position(), 0);

        assert_eq!(reader.seek(SeekFrom::Start(100)).unwrap(), 100);
        assert_eq!(reader.seek(SeekFrom::End(-100)).unwrap(), 0);
    }

    #[test]
    fn test_write_beyond_declared_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("overflow.pma");
        let key = test_key();

        let mut writer =
            BlockEncryptWriter::create_with_block_size(&path, 10, SMALL_BLOCK, &key).unwrap();
        writer.write(&[1u8; 8]).unwrap();
        assert!(matches!(
            writer.write(&[1u8; 3]),
            Err(VaultError::StreamOverflow { declared: 10 })
        ));
    }

    #[test]
    fn test_close_short_of_declared_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("short.pma");
        let key = test_key();

        let mut writer =
            BlockEncryptWriter::create_with_block_size(&path, 10, SMALL_BLOCK, &key).unwrap();
        writer.write(&[1u8; 4]).unwrap();
        assert!(matches!(
            writer.close(),
            Err(VaultError::StreamIncomplete { declared: 10, written: 4 })
        ));
    }

    #[test]
    fn test_truncated_file_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("truncated.pma");
        let key = test_key();
        write_file(&path, &sample(3000), SMALL_BLOCK, 3000);

        std::fs::write(&path, &std::fs::read(&path).unwrap()[..10]).unwrap();
        let err = BlockDecryptReader::open(&path, &key).err().unwrap();
        assert!(err.is_format_error());

        // Header intact but payload cut off
        write_file(&path, &sample(3000), SMALL_BLOCK, 3000);
        let raw = std::fs::read(&path).unwrap();
        std::fs::write(&path, &raw[..raw.len() - 20]).unwrap();

        let mut reader = BlockDecryptReader::open(&path, &key).unwrap();
        reader.seek(SeekFrom::End(-1)).unwrap();
        assert!(reader.read(&mut [0u8; 1]).is_err());
    }
}
