//! # Engine Constants
//!
//! Central home for the layout and tuning constants shared across the
//! engine. Values that derive from each other are co-located and guarded by
//! compile-time assertions so a change to one cannot silently break another.
//!
//! ```text
//! DEFAULT_DATA_PAGE_SHIFT (12)
//!       │
//!       └─> default page size = 1 << 12 = 4096 bytes
//!             Page 0 of every file carries the 64-byte HARE header;
//!             pages 1.. are data pages addressed as `id << shift`.
//!
//! FILE_HEADER_SIZE (64)  ──  must fit inside the smallest allowed page
//! COLUMN_HEADER_SIZE (64) ── record 1 of every column file
//! WAL_ENTRY_HEADER_SIZE (12) ── {page_id: u64, length: u32} prefix
//! WAL_ENTRY_TRAILER_SIZE (8) ── {lsn: u64} suffix
//! ```

/// Default bit shift for the data page size (`1 << 12` = 4096 bytes).
pub const DEFAULT_DATA_PAGE_SHIFT: u32 = 12;

/// Smallest supported page shift (512-byte pages).
pub const MIN_DATA_PAGE_SHIFT: u32 = 9;

/// Largest supported page shift (64 KiB pages).
pub const MAX_DATA_PAGE_SHIFT: u32 = 16;

/// Size of the HARE file header at the start of page 0.
pub const FILE_HEADER_SIZE: usize = 64;

/// Size of the column header record stored at page 1 of a column file.
pub const COLUMN_HEADER_SIZE: usize = 64;

/// Fixed prefix of a WAL entry: page id (u64) + payload length (u32).
pub const WAL_ENTRY_HEADER_SIZE: usize = 12;

/// Fixed suffix of a WAL entry: the log sequence number (u64).
pub const WAL_ENTRY_TRAILER_SIZE: usize = 8;

/// Page id used by the WAL commit marker entry.
pub const WAL_COMMIT_MARKER: u64 = u64::MAX;

/// Default timeout for acquiring the exclusive file lock, in milliseconds.
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 1_000;

/// Poll interval while waiting for a contended file lock, in milliseconds.
pub const LOCK_POLL_INTERVAL_MS: u64 = 20;

/// Default number of frames in a buffer pool.
pub const DEFAULT_BUFFER_POOL_SIZE: usize = 64;

/// Default gRPC port of the external server boundary.
pub const DEFAULT_SERVER_PORT: u16 = 1865;

/// Default maximum message size of the external server boundary, in bytes.
pub const DEFAULT_MESSAGE_SIZE: usize = 524_288;

/// Default number of core worker threads for the execution engine.
pub const DEFAULT_CORE_THREADS: usize = 4;

/// Default maximum number of worker threads for the execution engine.
pub const DEFAULT_MAX_THREADS: usize = 8;

/// Default keep-alive for idle workers, in milliseconds.
pub const DEFAULT_KEEP_ALIVE_MS: u64 = 500;

/// Default task queue size of the execution engine.
pub const DEFAULT_QUEUE_SIZE: usize = 100;

const _: () = assert!(
    FILE_HEADER_SIZE <= (1 << MIN_DATA_PAGE_SHIFT),
    "file header must fit inside the smallest allowed page"
);

const _: () = assert!(
    COLUMN_HEADER_SIZE <= (1 << MIN_DATA_PAGE_SHIFT),
    "column header must fit inside the smallest allowed page"
);

const _: () = assert!(
    MIN_DATA_PAGE_SHIFT <= DEFAULT_DATA_PAGE_SHIFT
        && DEFAULT_DATA_PAGE_SHIFT <= MAX_DATA_PAGE_SHIFT,
    "default page shift must lie within the supported range"
);
