//! Flash Module
//!
//! The raw flash capability the store is layered on.
//!
//! ## Responsibilities
//! - Describe sector geometry and write alignment
//! - Read arbitrary byte ranges
//! - Program aligned byte ranges (no in-place rewrite)
//! - Erase whole sectors back to [`ERASED_BYTE`]
//!
//! ## Backends
//! - [`MemoryFlash`]: RAM-backed fake with fault injection, for tests
//! - [`FileFlash`]: flash image file, for host tooling
//! - [`StatsPartition`]: wrapper counting reads/writes/erases per sector

mod file;
mod memory;
mod stats;

use thiserror::Error;

pub use file::{FileFlash, FlashGeometry};
pub use memory::MemoryFlash;
pub use stats::{PartitionStats, StatsPartition};

/// Value every byte of a sector holds after erase
pub const ERASED_BYTE: u8 = 0xFF;

/// Result type for flash operations
pub type FlashResult<T> = std::result::Result<T, FlashError>;

/// Failures reported by a flash partition
#[derive(Debug, Error)]
pub enum FlashError {
    #[error("access of {len} bytes at {address:#x} exceeds partition size {size}")]
    OutOfBounds {
        address: usize,
        len: usize,
        size: usize,
    },

    #[error("write of {len} bytes at {address:#x} violates {alignment}-byte alignment")]
    Unaligned {
        address: usize,
        len: usize,
        alignment: usize,
    },

    #[error("write at {address:#x} targets bytes that are not erased")]
    NotErased { address: usize },

    #[error("sector range {start}+{count} exceeds sector count {sector_count}")]
    InvalidSector {
        start: usize,
        count: usize,
        sector_count: usize,
    },

    #[error("injected {0} failure")]
    Injected(&'static str),

    #[error("flash image error: {0}")]
    Image(String),

    #[error("flash image I/O: {0}")]
    Io(#[from] std::io::Error),
}

/// A region of raw flash made of equally sized, individually erasable sectors.
///
/// Addresses are byte offsets from the start of the partition. `write` must be
/// called with an address and length that are multiples of
/// [`alignment_bytes`](FlashPartition::alignment_bytes), and only over erased
/// bytes. All operations either succeed fully or report an error.
pub trait FlashPartition {
    /// Size of one erasable sector in bytes
    fn sector_size_bytes(&self) -> usize;

    /// Number of sectors in the partition
    fn sector_count(&self) -> usize;

    /// Minimum write granularity in bytes
    fn alignment_bytes(&self) -> usize;

    /// Read `buf.len()` bytes starting at `address`
    fn read(&self, address: usize, buf: &mut [u8]) -> FlashResult<()>;

    /// Program `data` at `address`
    fn write(&mut self, address: usize, data: &[u8]) -> FlashResult<()>;

    /// Erase `count` sectors starting at `sector_index`
    fn erase(&mut self, sector_index: usize, count: usize) -> FlashResult<()>;

    /// Total partition size in bytes
    fn size_bytes(&self) -> usize {
        self.sector_size_bytes() * self.sector_count()
    }

    /// Address of the first byte of a sector
    fn sector_address(&self, sector_index: usize) -> usize {
        sector_index * self.sector_size_bytes()
    }
}

impl<T: FlashPartition + ?Sized> FlashPartition for &mut T {
    fn sector_size_bytes(&self) -> usize {
        (**self).sector_size_bytes()
    }

    fn sector_count(&self) -> usize {
        (**self).sector_count()
    }

    fn alignment_bytes(&self) -> usize {
        (**self).alignment_bytes()
    }

    fn read(&self, address: usize, buf: &mut [u8]) -> FlashResult<()> {
        (**self).read(address, buf)
    }

    fn write(&mut self, address: usize, data: &[u8]) -> FlashResult<()> {
        (**self).write(address, data)
    }

    fn erase(&mut self, sector_index: usize, count: usize) -> FlashResult<()> {
        (**self).erase(sector_index, count)
    }
}

// =============================================================================
// Shared Checks (used by backends)
// =============================================================================

pub(crate) fn check_bounds(address: usize, len: usize, size: usize) -> FlashResult<()> {
    match address.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => Err(FlashError::OutOfBounds { address, len, size }),
    }
}

pub(crate) fn check_alignment(address: usize, len: usize, alignment: usize) -> FlashResult<()> {
    if address % alignment != 0 || len % alignment != 0 {
        return Err(FlashError::Unaligned {
            address,
            len,
            alignment,
        });
    }
    Ok(())
}

pub(crate) fn check_sectors(start: usize, count: usize, sector_count: usize) -> FlashResult<()> {
    match start.checked_add(count) {
        Some(end) if end <= sector_count => Ok(()),
        _ => Err(FlashError::InvalidSector {
            start,
            count,
            sector_count,
        }),
    }
}
