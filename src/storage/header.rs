//! # HARE File Header
//!
//! Every HARE file begins with a 64-byte header occupying the start of
//! page 0. The header identifies the file, records its page accounting and
//! carries the integrity material used for crash detection:
//!
//! ```text
//! Offset  Size  Field        Description
//! ------  ----  -----------  ----------------------------------------
//! 0       4     magic        ASCII "HARE"
//! 4       4     file_type    Content tag (COL\0, ENT\0, IDX\0)
//! 8       1     version      Format version (currently 1)
//! 9       1     sanity       0 = clean, 1 = in use
//! 10      2     reserved
//! 12      8     pages        Number of data pages (page 0 excluded)
//! 20      4     freed        Number of freed data pages
//! 24      8     checksum     CRC32C over all data pages (widened)
//! 32      8     last_wal     Timestamp of the last WAL commit (millis)
//! 40      24    reserved
//! ```
//!
//! The checksum is only guaranteed current when `sanity` is clean: it is
//! written on close, and a reopen that finds `sanity` still in use
//! recomputes it over all data pages to detect torn writes.

use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::constants::FILE_HEADER_SIZE;
use crate::error::StorageError;
use std::path::Path;

pub const HARE_MAGIC: &[u8; 4] = b"HARE";
pub const HARE_VERSION: u8 = 1;

pub const SANITY_CLEAN: u8 = 0;
pub const SANITY_IN_USE: u8 = 1;

/// Content tag of a HARE file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    /// Column data file (`col_<name>.db`).
    Column,
    /// Entity header store (`index.db`).
    Entity,
    /// Secondary index file (`idx_<type>_<name>.db`).
    Index,
}

impl FileType {
    pub fn tag(&self) -> [u8; 4] {
        match self {
            FileType::Column => *b"COL\0",
            FileType::Entity => *b"ENT\0",
            FileType::Index => *b"IDX\0",
        }
    }

    pub fn from_tag(tag: &[u8; 4]) -> Option<Self> {
        match tag {
            b"COL\0" => Some(FileType::Column),
            b"ENT\0" => Some(FileType::Entity),
            b"IDX\0" => Some(FileType::Index),
            _ => None,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct FileHeader {
    magic: [u8; 4],
    file_type: [u8; 4],
    version: u8,
    sanity: u8,
    _pad: [u8; 2],
    pages: U64,
    freed: U32,
    checksum: U64,
    last_wal: U64,
    reserved: [u8; 24],
}

const _: () = assert!(std::mem::size_of::<FileHeader>() == FILE_HEADER_SIZE);

impl FileHeader {
    pub fn new(file_type: FileType) -> Self {
        Self {
            magic: *HARE_MAGIC,
            file_type: file_type.tag(),
            version: HARE_VERSION,
            sanity: SANITY_CLEAN,
            _pad: [0; 2],
            pages: U64::new(0),
            freed: U32::new(0),
            checksum: U64::new(0),
            last_wal: U64::new(0),
            reserved: [0; 24],
        }
    }

    /// Parses and validates a header read from page 0.
    pub fn from_bytes(bytes: &[u8], expected: FileType, path: &Path) -> Result<Self, StorageError> {
        let corrupt = |reason: String| StorageError::Corruption {
            path: path.to_path_buf(),
            reason,
        };

        if bytes.len() < FILE_HEADER_SIZE {
            return Err(corrupt(format!(
                "file too short for header: {} < {FILE_HEADER_SIZE}",
                bytes.len()
            )));
        }

        let header = Self::read_from_bytes(&bytes[..FILE_HEADER_SIZE])
            .map_err(|e| corrupt(format!("unreadable header: {e:?}")))?;

        if &header.magic != HARE_MAGIC {
            return Err(corrupt("invalid file identifier".to_string()));
        }
        if header.version != HARE_VERSION {
            return Err(corrupt(format!(
                "unsupported version {} (expected {HARE_VERSION})",
                header.version
            )));
        }
        match FileType::from_tag(&header.file_type) {
            Some(found) if found == expected => {}
            Some(found) => {
                return Err(corrupt(format!(
                    "file type mismatch: expected {expected:?}, found {found:?}"
                )))
            }
            None => return Err(corrupt("unknown file type tag".to_string())),
        }
        if u64::from(header.freed.get()) > header.pages.get() {
            return Err(corrupt(format!(
                "freed page count {} exceeds page count {}",
                header.freed.get(),
                header.pages.get()
            )));
        }

        Ok(header)
    }

    pub fn write_to(&self, out: &mut [u8]) {
        out[..FILE_HEADER_SIZE].copy_from_slice(self.as_bytes());
    }

    pub fn file_type(&self) -> Option<FileType> {
        FileType::from_tag(&self.file_type)
    }

    pub fn sanity(&self) -> u8 {
        self.sanity
    }

    pub fn set_sanity(&mut self, sanity: u8) {
        self.sanity = sanity;
    }

    pub fn pages(&self) -> u64 {
        self.pages.get()
    }

    pub fn set_pages(&mut self, pages: u64) {
        self.pages = U64::new(pages);
    }

    pub fn freed(&self) -> u32 {
        self.freed.get()
    }

    pub fn set_freed(&mut self, freed: u32) {
        self.freed = U32::new(freed);
    }

    pub fn checksum(&self) -> u64 {
        self.checksum.get()
    }

    pub fn set_checksum(&mut self, checksum: u64) {
        self.checksum = U64::new(checksum);
    }

    pub fn last_wal(&self) -> u64 {
        self.last_wal.get()
    }

    pub fn set_last_wal(&mut self, millis: u64) {
        self.last_wal = U64::new(millis);
    }
}
