//! # Configuration
//!
//! Typed configuration for a Cottontail instance. The catalogue owns one
//! [`Config`] for its whole lifetime; nested blocks group the memory,
//! execution and server settings. All fields have working defaults and the
//! whole tree loads from a JSON document with camelCase keys:
//!
//! ```json
//! {
//!   "root": "/var/lib/cottontail",
//!   "lockTimeout": 1000,
//!   "memoryConfig": { "dataPageShift": 12 },
//!   "executionConfig": { "coreThreads": 4, "maxThreads": 8 },
//!   "serverConfig": { "port": 1865 }
//! }
//! ```

pub mod constants;

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::DatabaseError;
use constants::*;

/// Root configuration of a Cottontail instance.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Filesystem root under which all schema directories live.
    pub root: PathBuf,
    /// Timeout for acquiring exclusive file locks, in milliseconds.
    pub lock_timeout: u64,
    pub memory_config: MemoryConfig,
    pub execution_config: ExecutionConfig,
    pub server_config: ServerConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MemoryConfig {
    /// Bit shift determining the data page size (`1 << shift` bytes).
    pub data_page_shift: u32,
    /// Whether mapped files are forcefully unmapped on close.
    pub force_unmap_mapped_files: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutionConfig {
    pub core_threads: usize,
    pub max_threads: usize,
    /// Keep-alive for idle worker threads, in milliseconds.
    pub keep_alive_time: u64,
    pub queue_size: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    pub port: u16,
    /// Maximum message size in bytes.
    pub message_size: usize,
    pub cert_file: Option<PathBuf>,
    pub private_key: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./data"),
            lock_timeout: DEFAULT_LOCK_TIMEOUT_MS,
            memory_config: MemoryConfig::default(),
            execution_config: ExecutionConfig::default(),
            server_config: ServerConfig::default(),
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            data_page_shift: DEFAULT_DATA_PAGE_SHIFT,
            force_unmap_mapped_files: false,
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            core_threads: DEFAULT_CORE_THREADS,
            max_threads: DEFAULT_MAX_THREADS,
            keep_alive_time: DEFAULT_KEEP_ALIVE_MS,
            queue_size: DEFAULT_QUEUE_SIZE,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_SERVER_PORT,
            message_size: DEFAULT_MESSAGE_SIZE,
            cert_file: None,
            private_key: None,
        }
    }
}

impl Config {
    /// Loads a configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DatabaseError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| DatabaseError::InvalidFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let config: Config =
            serde_json::from_reader(BufReader::new(file)).map_err(|e| DatabaseError::InvalidFile {
                path: path.to_path_buf(),
                reason: format!("malformed configuration: {e}"),
            })?;
        config.validate(path)?;
        Ok(config)
    }

    fn validate(&self, path: &Path) -> Result<(), DatabaseError> {
        let shift = self.memory_config.data_page_shift;
        if !(MIN_DATA_PAGE_SHIFT..=MAX_DATA_PAGE_SHIFT).contains(&shift) {
            return Err(DatabaseError::InvalidFile {
                path: path.to_path_buf(),
                reason: format!(
                    "dataPageShift {shift} outside supported range {MIN_DATA_PAGE_SHIFT}..={MAX_DATA_PAGE_SHIFT}"
                ),
            });
        }
        Ok(())
    }

    /// Page size in bytes derived from the configured shift.
    pub fn page_size(&self) -> usize {
        1usize << self.memory_config.data_page_shift
    }

    /// TLS is enabled iff both certificate and private key are configured.
    pub fn tls_enabled(&self) -> bool {
        self.server_config.cert_file.is_some() && self.server_config.private_key.is_some()
    }
}
