//! # Column Header Record
//!
//! Record 1 of every column file holds the column's typed header. It lives
//! on data page 1, fully reserved for the purpose, so user records start at
//! tuple id 2 and the tuple-id arithmetic never has to special-case it.
//!
//! ```text
//! Offset  Size  Field         Description
//! ------  ----  ------------  -------------------------------------
//! 0       8     magic         ASCII "COTTONC\0"
//! 8       2     version       Format version (currently 1)
//! 10      2     type_tag      ColumnType tag (bijective with names)
//! 12      4     logical_size  Element count / max string bytes
//! 16      1     nullable      0 or 1
//! 17      3     reserved
//! 20      8     count         Live records (header record excluded)
//! 28      8     max_tid       Highest tuple id ever allocated (>= 1)
//! 36      8     created       Creation time, millis since epoch
//! 44      8     modified      Last modification time, millis
//! 52      12    reserved
//! ```

use zerocopy::little_endian::{U16, U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::constants::COLUMN_HEADER_SIZE;
use crate::error::DatabaseError;
use crate::types::ColumnType;

pub const COLUMN_MAGIC: &[u8; 8] = b"COTTONC\0";
pub const COLUMN_VERSION: u16 = 1;

/// Tuple id of the header record itself.
pub const HEADER_TID: u64 = 1;

/// Smallest tuple id a user record can have.
pub const MIN_USER_TID: u64 = 2;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct ColumnHeader {
    magic: [u8; 8],
    version: U16,
    type_tag: U16,
    logical_size: U32,
    nullable: u8,
    _pad: [u8; 3],
    count: U64,
    max_tid: U64,
    created: U64,
    modified: U64,
    reserved: [u8; 12],
}

const _: () = assert!(std::mem::size_of::<ColumnHeader>() == COLUMN_HEADER_SIZE);

impl ColumnHeader {
    pub fn new(column_type: ColumnType, logical_size: usize, nullable: bool, now: u64) -> Self {
        Self {
            magic: *COLUMN_MAGIC,
            version: U16::new(COLUMN_VERSION),
            type_tag: U16::new(column_type.tag()),
            logical_size: U32::new(logical_size as u32),
            nullable: u8::from(nullable),
            _pad: [0; 3],
            count: U64::new(0),
            max_tid: U64::new(HEADER_TID),
            created: U64::new(now),
            modified: U64::new(now),
            reserved: [0; 12],
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DatabaseError> {
        if bytes.len() < COLUMN_HEADER_SIZE {
            return Err(DatabaseError::Corruption(format!(
                "column header truncated: {} < {COLUMN_HEADER_SIZE}",
                bytes.len()
            )));
        }
        let header = Self::read_from_bytes(&bytes[..COLUMN_HEADER_SIZE])
            .map_err(|e| DatabaseError::Corruption(format!("unreadable column header: {e:?}")))?;

        if &header.magic != COLUMN_MAGIC {
            return Err(DatabaseError::Corruption(
                "invalid column header identifier".to_string(),
            ));
        }
        if header.version.get() != COLUMN_VERSION {
            return Err(DatabaseError::Corruption(format!(
                "unsupported column version {}",
                header.version.get()
            )));
        }
        if header.column_type().is_none() {
            return Err(DatabaseError::Corruption(format!(
                "unknown column type tag {}",
                header.type_tag.get()
            )));
        }
        if header.max_tid.get() < HEADER_TID {
            return Err(DatabaseError::Corruption(format!(
                "max tuple id {} below the header record",
                header.max_tid.get()
            )));
        }
        Ok(header)
    }

    pub fn write_to(&self, out: &mut [u8]) {
        out[..COLUMN_HEADER_SIZE].copy_from_slice(self.as_bytes());
    }

    pub fn column_type(&self) -> Option<ColumnType> {
        ColumnType::from_tag(self.type_tag.get())
    }

    pub fn logical_size(&self) -> usize {
        self.logical_size.get() as usize
    }

    pub fn nullable(&self) -> bool {
        self.nullable != 0
    }

    pub fn count(&self) -> u64 {
        self.count.get()
    }

    pub fn set_count(&mut self, count: u64) {
        self.count = U64::new(count);
    }

    pub fn max_tid(&self) -> u64 {
        self.max_tid.get()
    }

    pub fn set_max_tid(&mut self, tid: u64) {
        self.max_tid = U64::new(tid);
    }

    pub fn created(&self) -> u64 {
        self.created.get()
    }

    pub fn modified(&self) -> u64 {
        self.modified.get()
    }

    pub fn set_modified(&mut self, millis: u64) {
        self.modified = U64::new(millis);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_size_is_64() {
        assert_eq!(std::mem::size_of::<ColumnHeader>(), 64);
    }

    #[test]
    fn round_trip() {
        let mut header = ColumnHeader::new(ColumnType::FloatVector, 128, false, 1_000);
        header.set_count(42);
        header.set_max_tid(43);
        header.set_modified(2_000);

        let parsed = ColumnHeader::from_bytes(header.as_bytes()).unwrap();
        assert_eq!(parsed.column_type(), Some(ColumnType::FloatVector));
        assert_eq!(parsed.logical_size(), 128);
        assert!(!parsed.nullable());
        assert_eq!(parsed.count(), 42);
        assert_eq!(parsed.max_tid(), 43);
        assert_eq!(parsed.created(), 1_000);
        assert_eq!(parsed.modified(), 2_000);
    }

    #[test]
    fn rejects_bad_identifier() {
        let header = ColumnHeader::new(ColumnType::Int, 1, true, 0);
        let mut bytes = header.as_bytes().to_vec();
        bytes[0] = b'X';
        assert!(matches!(
            ColumnHeader::from_bytes(&bytes),
            Err(DatabaseError::Corruption(_))
        ));
    }

    #[test]
    fn rejects_unknown_type_tag() {
        let header = ColumnHeader::new(ColumnType::Int, 1, true, 0);
        let mut bytes = header.as_bytes().to_vec();
        bytes[10] = 0xFF;
        bytes[11] = 0xFF;
        assert!(matches!(
            ColumnHeader::from_bytes(&bytes),
            Err(DatabaseError::Corruption(_))
        ));
    }
}
