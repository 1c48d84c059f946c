//! Tessera common types, errors, and configuration.
//!
//! This crate provides shared definitions used across all Tessera components.

pub mod config;
pub mod error;
pub mod page;
pub mod types;

pub use config::{Collation, EngineConfig, IndexConfig, StorageConfig};
pub use error::{Result, TesseraError};
pub use page::{PAGE_SIZE, PageBuf, PageHeader, PageId, PageType};
pub use types::{DataType, Value};
