//! # Buffer Pool
//!
//! A fixed-capacity mapping from [`PageId`] to pinned in-memory page frames
//! sitting on top of one disk manager. All concurrent in-process access to a
//! HARE file flows through its pool:
//!
//! ```text
//! get(id) ──► hit: pin frame ───────────────► PageGuard
//!        └──► miss: evict victim (clock),
//!             write back if dirty,
//!             fault page in, pin ───────────► PageGuard
//! ```
//!
//! ## Pinning
//!
//! [`PageGuard`] is an RAII pin: the frame cannot be evicted while any guard
//! is alive. `read()`/`write()` hand out lock guards on the page bytes;
//! `write()` marks the frame dirty. Dirty frames are written back through
//! the disk manager on eviction and on `flush_all`.
//!
//! ## Eviction
//!
//! Clock second-chance over unpinned frames: a referenced bit is set on
//! every access and cleared as the hand sweeps past. When every frame is
//! pinned the pool fails with `BufferPoolExhausted` rather than waiting for
//! a pin that may never be released.
//!
//! ## Interaction with the WAL
//!
//! The pool is oblivious to the logging variant underneath: write-backs go
//! through `DiskManager::update`, which a [`WalDiskManager`](super::WalDiskManager)
//! turns into log appends. `commit` flushes all dirty frames and commits the
//! disk manager; `rollback` rolls the disk manager back and drops every
//! cached frame so logged-but-discarded pages cannot leak back out.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::StorageError;

use super::disk::DiskManager;
use super::{Page, PageId};

struct Frame {
    data: RwLock<Page>,
    pin_count: AtomicU32,
    dirty: AtomicBool,
    referenced: AtomicBool,
}

impl Frame {
    fn new(shift: u32) -> Self {
        Self {
            data: RwLock::new(Page::new(shift)),
            pin_count: AtomicU32::new(0),
            dirty: AtomicBool::new(false),
            referenced: AtomicBool::new(false),
        }
    }

    fn is_pinned(&self) -> bool {
        self.pin_count.load(Ordering::Acquire) > 0
    }
}

struct PoolState<D: DiskManager> {
    disk: D,
    table: HashMap<PageId, usize>,
    resident: Vec<Option<PageId>>,
    hand: usize,
}

/// Fixed-capacity page cache over one disk manager.
pub struct BufferPool<D: DiskManager> {
    frames: Vec<Arc<Frame>>,
    state: Mutex<PoolState<D>>,
    shift: u32,
}

/// A pinned page. Dropping the guard releases the pin.
pub struct PageGuard {
    frame: Arc<Frame>,
}

impl PageGuard {
    pub fn read(&self) -> RwLockReadGuard<'_, Page> {
        self.frame.data.read()
    }

    /// Grants mutable access to the page bytes and marks the frame dirty.
    pub fn write(&self) -> RwLockWriteGuard<'_, Page> {
        self.frame.dirty.store(true, Ordering::Release);
        self.frame.data.write()
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        let prev = self.frame.pin_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "unpin of an unpinned frame");
    }
}

impl<D: DiskManager> BufferPool<D> {
    /// Creates a pool of `capacity` frames over `disk`. The page shift must
    /// match the disk manager's page size.
    pub fn new(disk: D, capacity: usize, shift: u32) -> Self {
        assert!(capacity > 0, "buffer pool needs at least one frame");
        assert_eq!(disk.page_size(), 1usize << shift);
        let frames = (0..capacity).map(|_| Arc::new(Frame::new(shift))).collect();
        Self {
            frames,
            state: Mutex::new(PoolState {
                disk,
                table: HashMap::with_capacity(capacity),
                resident: vec![None; capacity],
                hand: 0,
            }),
            shift,
        }
    }

    /// Returns a pinned guard for page `id`, faulting it in if absent.
    pub fn get(&self, id: PageId) -> Result<PageGuard, StorageError> {
        let mut state = self.state.lock();

        if let Some(&idx) = state.table.get(&id) {
            let frame = &self.frames[idx];
            frame.pin_count.fetch_add(1, Ordering::AcqRel);
            frame.referenced.store(true, Ordering::Release);
            return Ok(PageGuard {
                frame: Arc::clone(frame),
            });
        }

        let idx = self.evict_into(&mut state)?;
        let frame = &self.frames[idx];
        {
            let mut page = frame.data.write();
            state.disk.read(id, &mut page)?;
        }
        frame.dirty.store(false, Ordering::Release);
        frame.referenced.store(true, Ordering::Release);
        frame.pin_count.fetch_add(1, Ordering::AcqRel);
        state.table.insert(id, idx);
        state.resident[idx] = Some(id);
        Ok(PageGuard {
            frame: Arc::clone(frame),
        })
    }

    /// Allocates a fresh page through the disk manager and caches it.
    pub fn allocate(&self, page: &Page) -> Result<PageId, StorageError> {
        let mut state = self.state.lock();
        let id = state.disk.allocate(page)?;

        if let Ok(idx) = self.evict_into(&mut state) {
            let mut data = self.frames[idx].data.write();
            data.as_mut_slice().copy_from_slice(page.as_slice());
            drop(data);
            self.frames[idx].dirty.store(false, Ordering::Release);
            self.frames[idx].referenced.store(true, Ordering::Release);
            state.table.insert(id, idx);
            state.resident[idx] = Some(id);
        }
        Ok(id)
    }

    /// Marks a page reusable through the disk manager and forgets any cached
    /// copy.
    pub fn free(&self, id: PageId) -> Result<(), StorageError> {
        let mut state = self.state.lock();
        if let Some(idx) = state.table.remove(&id) {
            if self.frames[idx].is_pinned() {
                state.table.insert(id, idx);
                return Err(StorageError::Unsupported("free of a pinned page"));
            }
            state.resident[idx] = None;
            self.frames[idx].dirty.store(false, Ordering::Release);
        }
        state.disk.free(id)
    }

    /// Picks a victim frame (free, or clock second-chance over unpinned
    /// frames), writing back its dirty content. The victim's mapping is
    /// removed; the caller reassigns it.
    fn evict_into(&self, state: &mut PoolState<D>) -> Result<usize, StorageError> {
        if let Some(idx) = state.resident.iter().position(Option::is_none) {
            return Ok(idx);
        }

        let capacity = self.frames.len();
        let mut swept_without_candidate = 0usize;
        loop {
            let idx = state.hand;
            state.hand = (state.hand + 1) % capacity;
            let frame = &self.frames[idx];

            if frame.is_pinned() {
                swept_without_candidate += 1;
                if swept_without_candidate >= capacity * 2 {
                    return Err(StorageError::BufferPoolExhausted { capacity });
                }
                continue;
            }
            if frame.referenced.swap(false, Ordering::AcqRel) {
                swept_without_candidate = 0;
                continue;
            }

            let victim = state.resident[idx].expect("resident frame without page id");
            if frame.dirty.swap(false, Ordering::AcqRel) {
                let page = frame.data.read();
                state.disk.update(victim, &page)?;
            }
            state.table.remove(&victim);
            state.resident[idx] = None;
            return Ok(idx);
        }
    }

    /// Writes every dirty frame back through the disk manager.
    pub fn flush_all(&self) -> Result<(), StorageError> {
        let mut state = self.state.lock();
        for (idx, slot) in state.resident.clone().iter().enumerate() {
            if let Some(id) = slot {
                let frame = &self.frames[idx];
                if frame.dirty.swap(false, Ordering::AcqRel) {
                    let page = frame.data.read();
                    state.disk.update(*id, &page)?;
                }
            }
        }
        Ok(())
    }

    /// Flushes all dirty frames and commits the disk manager.
    pub fn commit(&self) -> Result<(), StorageError> {
        self.flush_all()?;
        self.state.lock().disk.commit()
    }

    /// Rolls the disk manager back and drops every cached frame.
    pub fn rollback(&self) -> Result<(), StorageError> {
        let mut state = self.state.lock();
        for (idx, slot) in state.resident.iter_mut().enumerate() {
            if slot.take().is_some() {
                self.frames[idx].dirty.store(false, Ordering::Release);
            }
        }
        state.table.clear();
        state.disk.rollback()
    }

    /// Flushes, closes the disk manager and drops all frames.
    pub fn close(&self) -> Result<(), StorageError> {
        let mut state = self.state.lock();
        for (idx, slot) in state.resident.clone().iter().enumerate() {
            if let Some(id) = slot {
                let frame = &self.frames[idx];
                if frame.dirty.swap(false, Ordering::AcqRel) {
                    let page = frame.data.read();
                    state.disk.update(*id, &page)?;
                }
            }
        }
        state.disk.close()
    }

    pub fn page_count(&self) -> u64 {
        self.state.lock().disk.page_count()
    }

    pub fn page_size(&self) -> usize {
        1usize << self.shift
    }

    pub fn page_shift(&self) -> u32 {
        self.shift
    }

    pub fn capacity(&self) -> usize {
        self.frames.len()
    }

    /// Runs `f` with mutable access to the underlying disk manager.
    pub fn with_disk<R>(&self, f: impl FnOnce(&mut D) -> R) -> R {
        f(&mut self.state.lock().disk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::constants::DEFAULT_DATA_PAGE_SHIFT as SHIFT;
    use crate::storage::{FileType, WalDiskManager};
    use tempfile::tempdir;

    fn pool_with_pages(capacity: usize, pages: usize) -> (tempfile::TempDir, BufferPool<WalDiskManager>) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pool.db");
        let mut disk = WalDiskManager::open(&path, FileType::Column, SHIFT, 100).unwrap();
        for i in 0..pages {
            let mut page = Page::new(SHIFT);
            page.as_mut_slice().fill(i as u8 + 1);
            disk.allocate(&page).unwrap();
        }
        disk.commit().unwrap();
        (dir, BufferPool::new(disk, capacity, SHIFT))
    }

    #[test]
    fn hit_and_miss_round_trip() {
        let (_dir, pool) = pool_with_pages(4, 2);
        let guard = pool.get(1).unwrap();
        assert_eq!(guard.read().as_slice()[0], 1);
        drop(guard);
        let guard = pool.get(2).unwrap();
        assert_eq!(guard.read().as_slice()[0], 2);
    }

    #[test]
    fn eviction_writes_back_dirty_pages() {
        let (_dir, pool) = pool_with_pages(2, 3);
        {
            let guard = pool.get(1).unwrap();
            guard.write().as_mut_slice()[0] = 0xEE;
        }
        // Touch the other pages until page 1 is evicted.
        let _g2 = pool.get(2).unwrap();
        let _g3 = pool.get(3).unwrap();
        drop(_g2);
        drop(_g3);

        let guard = pool.get(1).unwrap();
        assert_eq!(guard.read().as_slice()[0], 0xEE, "write-back preserved the change");
    }

    #[test]
    fn exhausted_pool_fails_instead_of_hanging() {
        let (_dir, pool) = pool_with_pages(2, 3);
        let _g1 = pool.get(1).unwrap();
        let _g2 = pool.get(2).unwrap();
        assert!(matches!(
            pool.get(3),
            Err(StorageError::BufferPoolExhausted { capacity: 2 })
        ));
    }

    #[test]
    fn rollback_drops_cached_frames() {
        let (_dir, pool) = pool_with_pages(4, 1);
        {
            let guard = pool.get(1).unwrap();
            guard.write().as_mut_slice()[0] = 0x99;
        }
        pool.rollback().unwrap();
        let guard = pool.get(1).unwrap();
        assert_eq!(guard.read().as_slice()[0], 1, "rollback restored committed bytes");
    }

    #[test]
    fn commit_persists_through_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pool.db");
        {
            let disk = WalDiskManager::open(&path, FileType::Column, SHIFT, 100).unwrap();
            let pool = BufferPool::new(disk, 4, SHIFT);
            let mut page = Page::new(SHIFT);
            page.as_mut_slice().fill(0x5A);
            pool.allocate(&page).unwrap();
            pool.commit().unwrap();
            pool.close().unwrap();
        }
        let mut disk = WalDiskManager::open(&path, FileType::Column, SHIFT, 100).unwrap();
        assert_eq!(disk.page_count(), 1);
        let mut page = Page::new(SHIFT);
        disk.read(1, &mut page).unwrap();
        assert!(page.as_slice().iter().all(|&b| b == 0x5A));
        disk.close().unwrap();
    }
}
