//! In-memory flash
//!
//! RAM-backed partition that enforces real flash rules (aligned writes, no
//! programming over non-erased bytes) and can inject write/erase failures.

use super::{
    check_alignment, check_bounds, check_sectors, FlashError, FlashPartition, FlashResult,
    ERASED_BYTE,
};

/// Fake flash partition held in a `Vec<u8>`
#[derive(Debug, Clone)]
pub struct MemoryFlash {
    data: Vec<u8>,
    sector_size: usize,
    sector_count: usize,
    alignment: usize,
    /// Writes allowed before every further write fails
    writes_until_failure: Option<usize>,
    /// Erases allowed before every further erase fails
    erases_until_failure: Option<usize>,
}

impl MemoryFlash {
    /// Create a fully erased flash.
    ///
    /// # Panics
    /// If any dimension is zero or the sector size is not a multiple of the
    /// alignment.
    pub fn new(sector_size: usize, sector_count: usize, alignment: usize) -> Self {
        assert!(
            sector_size > 0 && sector_count > 0 && alignment > 0,
            "flash dimensions must be non-zero"
        );
        assert!(
            sector_size % alignment == 0,
            "sector size must be a multiple of the alignment"
        );

        Self {
            data: vec![ERASED_BYTE; sector_size * sector_count],
            sector_size,
            sector_count,
            alignment,
            writes_until_failure: None,
            erases_until_failure: None,
        }
    }

    /// Raw contents of the flash
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Raw mutable contents, bypassing every flash rule.
    ///
    /// Used to simulate torn writes and bit rot.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Let `count` more writes succeed, then fail all following writes
    pub fn fail_writes_after(&mut self, count: usize) {
        self.writes_until_failure = Some(count);
    }

    /// Let `count` more erases succeed, then fail all following erases
    pub fn fail_erases_after(&mut self, count: usize) {
        self.erases_until_failure = Some(count);
    }

    /// Remove any injected failures
    pub fn clear_faults(&mut self) {
        self.writes_until_failure = None;
        self.erases_until_failure = None;
    }

    fn consume(budget: &mut Option<usize>, what: &'static str) -> FlashResult<()> {
        match budget {
            Some(0) => Err(FlashError::Injected(what)),
            Some(n) => {
                *n -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl FlashPartition for MemoryFlash {
    fn sector_size_bytes(&self) -> usize {
        self.sector_size
    }

    fn sector_count(&self) -> usize {
        self.sector_count
    }

    fn alignment_bytes(&self) -> usize {
        self.alignment
    }

    fn read(&self, address: usize, buf: &mut [u8]) -> FlashResult<()> {
        check_bounds(address, buf.len(), self.data.len())?;
        buf.copy_from_slice(&self.data[address..address + buf.len()]);
        Ok(())
    }

    fn write(&mut self, address: usize, data: &[u8]) -> FlashResult<()> {
        check_bounds(address, data.len(), self.data.len())?;
        check_alignment(address, data.len(), self.alignment)?;
        Self::consume(&mut self.writes_until_failure, "write")?;

        let target = &mut self.data[address..address + data.len()];
        if let Some(pos) = target.iter().position(|&b| b != ERASED_BYTE) {
            return Err(FlashError::NotErased {
                address: address + pos,
            });
        }
        target.copy_from_slice(data);
        Ok(())
    }

    fn erase(&mut self, sector_index: usize, count: usize) -> FlashResult<()> {
        check_sectors(sector_index, count, self.sector_count)?;
        Self::consume(&mut self.erases_until_failure, "erase")?;

        let start = sector_index * self.sector_size;
        let end = start + count * self.sector_size;
        self.data[start..end].fill(ERASED_BYTE);
        Ok(())
    }
}
