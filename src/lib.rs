//! # SectorKV
//!
//! A log-structured key-value store for raw NOR-style flash partitions:
//! - Append-only entries with magic markers and checksums
//! - Per-key transaction ids, so the newest version always wins on rescan
//! - Power-loss recovery by scanning the partition at startup
//! - Sector-granular garbage collection with wear-aware allocation
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  KeyValueStore (store)                       │
//! │        init / put / get / delete / garbage_collect           │
//! └──────┬──────────────────────┬───────────────────────┬───────┘
//!        │                      │                       │
//!        ▼                      ▼                       ▼
//! ┌─────────────┐       ┌───────────────┐       ┌──────────────┐
//! │KeyDirectory │       │ SectorManager │       │ EntryFormat  │
//! │ key → entry │       │ offsets, GC   │       │ header codec │
//! └─────────────┘       └───────────────┘       └──────┬───────┘
//!                                                      │
//!                              ┌───────────────────────┤
//!                              ▼                       ▼
//!                      ┌───────────────┐       ┌──────────────┐
//!                      │ AlignedWriter │       │  Checksum    │
//!                      └───────┬───────┘       └──────────────┘
//!                              │
//!                              ▼
//!                      ┌───────────────┐
//!                      │FlashPartition │
//!                      │ memory / file │
//!                      └───────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod alignment;
pub mod checksum;
pub mod flash;
pub mod entry;
pub mod sectors;
pub mod directory;
pub mod store;
pub mod shared;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{KvError, Result};
pub use config::Config;
pub use checksum::{ChecksumAlgorithm, Crc32};
pub use flash::{FileFlash, FlashPartition, MemoryFlash};
pub use store::{KeyValueStore, StorageStats};
pub use shared::SharedStore;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of SectorKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
