//! Partition statistics
//!
//! Wraps any partition and counts the I/O that passes through it, including a
//! per-sector erase counter used to judge wear leveling.

use std::cell::Cell;

use tracing::info;

use super::{FlashPartition, FlashResult};

/// Snapshot of the counters kept by [`StatsPartition`]
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PartitionStats {
    pub reads: u64,
    pub writes: u64,
    pub bytes_written: u64,
    pub total_erases: u64,
    pub min_sector_erases: u32,
    pub max_sector_erases: u32,
}

/// Partition wrapper that records I/O counters
#[derive(Debug)]
pub struct StatsPartition<F> {
    inner: F,
    sector_erases: Vec<u32>,
    reads: Cell<u64>,
    writes: u64,
    bytes_written: u64,
}

impl<F: FlashPartition> StatsPartition<F> {
    pub fn new(inner: F) -> Self {
        let sector_count = inner.sector_count();
        Self {
            inner,
            sector_erases: vec![0; sector_count],
            reads: Cell::new(0),
            writes: 0,
            bytes_written: 0,
        }
    }

    /// Erase count of each sector since creation or the last reset
    pub fn sector_erase_counts(&self) -> &[u32] {
        &self.sector_erases
    }

    /// Zero every counter
    pub fn reset_counters(&mut self) {
        self.sector_erases.fill(0);
        self.reads.set(0);
        self.writes = 0;
        self.bytes_written = 0;
    }

    pub fn stats(&self) -> PartitionStats {
        PartitionStats {
            reads: self.reads.get(),
            writes: self.writes,
            bytes_written: self.bytes_written,
            total_erases: self.sector_erases.iter().map(|&c| c as u64).sum(),
            min_sector_erases: self.sector_erases.iter().copied().min().unwrap_or(0),
            max_sector_erases: self.sector_erases.iter().copied().max().unwrap_or(0),
        }
    }

    /// Emit the current counters as a structured log line
    pub fn log_storage_stats(&self, label: &str) {
        let stats = self.stats();
        info!(
            label = %label,
            reads = stats.reads,
            writes = stats.writes,
            bytes_written = stats.bytes_written,
            total_erases = stats.total_erases,
            min_sector_erases = stats.min_sector_erases,
            max_sector_erases = stats.max_sector_erases,
            "partition storage stats"
        );
    }

    pub fn inner(&self) -> &F {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut F {
        &mut self.inner
    }

    pub fn into_inner(self) -> F {
        self.inner
    }
}

impl<F: FlashPartition> FlashPartition for StatsPartition<F> {
    fn sector_size_bytes(&self) -> usize {
        self.inner.sector_size_bytes()
    }

    fn sector_count(&self) -> usize {
        self.inner.sector_count()
    }

    fn alignment_bytes(&self) -> usize {
        self.inner.alignment_bytes()
    }

    fn read(&self, address: usize, buf: &mut [u8]) -> FlashResult<()> {
        self.reads.set(self.reads.get() + 1);
        self.inner.read(address, buf)
    }

    fn write(&mut self, address: usize, data: &[u8]) -> FlashResult<()> {
        self.inner.write(address, data)?;
        self.writes += 1;
        self.bytes_written += data.len() as u64;
        Ok(())
    }

    fn erase(&mut self, sector_index: usize, count: usize) -> FlashResult<()> {
        self.inner.erase(sector_index, count)?;
        for counter in &mut self.sector_erases[sector_index..sector_index + count] {
            *counter += 1;
        }
        Ok(())
    }
}
