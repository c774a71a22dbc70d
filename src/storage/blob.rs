//! # Page-Spanning Blobs
//!
//! Small helper for structures that persist one variable-length byte string
//! through a page store: the entity header document and the hash-index
//! directory. The blob starts at data page 1 with a u64 length prefix and
//! spans as many pages as it needs; pages are allocated on demand and extra
//! trailing pages from a previously larger blob are left in place (their
//! bytes are ignored on read).
//!
//! ```text
//! page 1: [len: u64 LE][bytes ...          ]
//! page 2: [bytes ...                       ]
//! page n: [bytes ..., zero padding         ]
//! ```

use std::path::Path;

use crate::error::StorageError;

use super::buffer::BufferPool;
use super::disk::DiskManager;
use super::Page;

const LEN_PREFIX: usize = 8;

/// Writes `bytes` as the store's blob, allocating pages as needed.
pub fn write_blob<D: DiskManager>(
    pool: &BufferPool<D>,
    bytes: &[u8],
) -> Result<(), StorageError> {
    let page_size = pool.page_size();
    let total = LEN_PREFIX + bytes.len();
    let needed = total.div_ceil(page_size).max(1) as u64;

    while pool.page_count() < needed {
        pool.allocate(&Page::new(pool.page_shift()))?;
    }

    let mut cursor = 0usize;
    for id in 1..=needed {
        let guard = pool.get(id)?;
        let mut page = guard.write();
        let slice = page.as_mut_slice();
        slice.fill(0);

        let mut offset = 0usize;
        if id == 1 {
            slice[..LEN_PREFIX].copy_from_slice(&(bytes.len() as u64).to_le_bytes());
            offset = LEN_PREFIX;
        }
        let take = (page_size - offset).min(bytes.len() - cursor);
        slice[offset..offset + take].copy_from_slice(&bytes[cursor..cursor + take]);
        cursor += take;
    }
    Ok(())
}

/// Reads the store's blob. Returns `None` when the store has no pages yet.
pub fn read_blob<D: DiskManager>(
    pool: &BufferPool<D>,
    path: &Path,
) -> Result<Option<Vec<u8>>, StorageError> {
    if pool.page_count() == 0 {
        return Ok(None);
    }
    let page_size = pool.page_size();

    let guard = pool.get(1)?;
    let page = guard.read();
    let len = u64::from_le_bytes(page.as_slice()[..LEN_PREFIX].try_into().unwrap()) as usize;

    let max = pool.page_count() as usize * page_size;
    if LEN_PREFIX + len > max {
        return Err(StorageError::Corruption {
            path: path.to_path_buf(),
            reason: format!("blob length {len} exceeds store capacity {max}"),
        });
    }

    let mut bytes = Vec::with_capacity(len);
    let first = (page_size - LEN_PREFIX).min(len);
    bytes.extend_from_slice(&page.as_slice()[LEN_PREFIX..LEN_PREFIX + first]);
    drop(page);
    drop(guard);

    let mut id = 2u64;
    while bytes.len() < len {
        let guard = pool.get(id)?;
        let page = guard.read();
        let take = page_size.min(len - bytes.len());
        bytes.extend_from_slice(&page.as_slice()[..take]);
        id += 1;
    }
    Ok(Some(bytes))
}
