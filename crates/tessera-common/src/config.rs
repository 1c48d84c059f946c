//! Configuration structures for Tessera.

use crate::error::{Result, TesseraError};
use crate::page::PAGE_SIZE;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Page store settings.
    pub storage: StorageConfig,
    /// Index encoding settings.
    pub index: IndexConfig,
}

impl EngineConfig {
    /// Checks the configuration for values the engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.storage.data_dir.as_os_str().is_empty() {
            return Err(TesseraError::Config("data_dir must not be empty".to_string()));
        }
        if self.index.max_key_size == 0 {
            return Err(TesseraError::Config("max_key_size must be positive".to_string()));
        }
        // Leaves must hold at least four entries so a split never produces an empty half.
        if self.index.max_key_size > MAX_INDEX_KEY_SIZE {
            return Err(TesseraError::Config(format!(
                "max_key_size {} exceeds {}",
                self.index.max_key_size, MAX_INDEX_KEY_SIZE
            )));
        }
        Ok(())
    }
}

/// Largest encoded key any index may be configured to accept.
pub const MAX_INDEX_KEY_SIZE: usize = PAGE_SIZE / 4 - 32;

/// Storage configuration for the page store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the database file.
    pub data_dir: PathBuf,
    /// Enable fsync after writes outside a write batch.
    pub fsync_enabled: bool,
    /// Encoded entry bytes an index keeps inline before moving to pages.
    pub inline_index_threshold: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            fsync_enabled: true,
            inline_index_threshold: 1024,
        }
    }
}

/// Text ordering used when encoding index keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Collation {
    /// Case-insensitive, accent-insensitive for Latin letters.
    #[default]
    General,
    /// Exact UTF-8 byte order.
    Binary,
}

impl Collation {
    /// Returns true if two texts differing only in case encode equally.
    pub fn folds_case(&self) -> bool {
        matches!(self, Collation::General)
    }
}

/// Index encoding configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Text collation for index keys.
    pub collation: Collation,
    /// Maximum encoded key size in bytes.
    pub max_key_size: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            collation: Collation::General,
            max_key_size: MAX_INDEX_KEY_SIZE,
        }
    }
}
