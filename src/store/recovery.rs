//! Store recovery
//!
//! Rebuilds the key directory and sector states from flash.
//!
//! ## Scan Rules
//! - Sectors are scanned from offset 0 in increasing order
//! - Each valid entry (magic + checksum) is indexed if its transaction id is
//!   newer than what the directory holds for that key
//! - The scan of a sector stops at the first block that is not a valid
//!   entry; nothing past it is indexed, so stale data can never resurface
//! - An erased remainder stays writable; a remainder holding torn bytes
//!   closes the sector (its space becomes reclaimable)
//! - Valid entries past the stopping point mark the sector `Corrupt`

use tracing::{debug, info, warn};

use crate::checksum::ChecksumAlgorithm;
use crate::directory::{EntryLocation, KeyDescriptor, KeyDirectory};
use crate::entry::{Entry, HEADER_SIZE, MIN_ALIGNMENT_BYTES};
use crate::error::{KvError, Result};
use crate::flash::{FlashPartition, ERASED_BYTE};

use super::KeyValueStore;

/// Chunk size used when checking that a region is erased
const ERASED_CHECK_CHUNK: usize = 64;

/// What the scan found at the end of a sector's valid entries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SectorTail {
    /// Everything after the last valid entry is erased
    Erased,
    /// Torn or garbage bytes follow the last valid entry
    Torn,
    /// Valid entries exist beyond unreadable data
    Corrupt,
}

impl<F: FlashPartition, C: ChecksumAlgorithm> KeyValueStore<F, C> {
    /// Scan the partition and rebuild all in-memory state.
    ///
    /// Nothing is erased or written. Fails with `ResourceExhausted` if the
    /// partition has more sectors than configured or holds more keys than the
    /// directory can index, and with `InvalidArgument` if the largest allowed
    /// entry cannot fit in a sector. Returns `Corrupt` after a complete scan
    /// that found corrupt sectors; the store is still usable in that case and
    /// the affected sectors are excluded from allocation.
    pub fn init(&mut self) -> Result<()> {
        self.initialized = false;

        let sector_count = self.partition.sector_count();
        let sector_size = self.partition.sector_size_bytes();

        if sector_count > self.config.max_usable_sectors {
            return Err(KvError::ResourceExhausted(format!(
                "partition has {} sectors, at most {} are supported",
                sector_count, self.config.max_usable_sectors
            )));
        }
        if sector_count < 2 {
            return Err(KvError::InvalidArgument(format!(
                "partition needs at least 2 sectors, has {}",
                sector_count
            )));
        }

        let largest_entry = self
            .format
            .entry_size(self.config.max_key_length, self.config.max_value_size);
        if largest_entry > sector_size {
            return Err(KvError::InvalidArgument(format!(
                "largest entry ({} bytes) does not fit in a {}-byte sector",
                largest_entry, sector_size
            )));
        }

        self.sectors
            .reset(sector_count, sector_size, self.format.min_entry_size());
        self.directory.clear();

        let mut corrupt_sectors = Vec::new();
        for sector in 0..sector_count {
            let (valid_end, tail) = self.recover_sector(sector)?;
            match tail {
                SectorTail::Erased => self.sectors.restore(sector, valid_end),
                SectorTail::Torn => {
                    warn!(sector, valid_end, "torn data after last valid entry, closing sector");
                    self.sectors.restore(sector, sector_size);
                }
                SectorTail::Corrupt => {
                    warn!(sector, valid_end, "valid entries found past unreadable data");
                    self.sectors.mark_corrupt(sector);
                    corrupt_sectors.push(sector);
                }
            }
        }

        for (_, descriptor) in self.directory.entries() {
            self.sectors
                .add_valid(descriptor.location.sector, descriptor.entry_size);
        }
        self.sectors.finish_recovery();
        self.initialized = true;

        let stats = self.stats();
        info!(
            sectors = sector_count,
            live_entries = stats.live_entries,
            deleted_entries = stats.deleted_entries,
            in_use_bytes = stats.in_use_bytes,
            reclaimable_bytes = stats.reclaimable_bytes,
            "store initialized"
        );

        if corrupt_sectors.is_empty() {
            Ok(())
        } else {
            Err(KvError::Corrupt(format!(
                "sectors {:?} hold valid entries past unreadable data",
                corrupt_sectors
            )))
        }
    }

    /// Index the valid prefix of one sector; returns where it ends and what
    /// follows it
    fn recover_sector(&mut self, sector: usize) -> Result<(usize, SectorTail)> {
        let base = self.partition.sector_address(sector);
        let sector_size = self.partition.sector_size_bytes();

        let mut offset = 0;
        while offset < sector_size {
            let entry = match self.format.read(
                &self.partition,
                &self.checksum,
                base + offset,
                sector_size - offset,
            )? {
                Some(entry) => entry,
                None => break,
            };

            let size = entry.size();
            self.index_recovered(EntryLocation { sector, offset }, &entry)?;
            offset += size;
        }

        let tail = if self.is_erased(base + offset, sector_size - offset)? {
            SectorTail::Erased
        } else if self.has_entry_after(sector, offset)? {
            SectorTail::Corrupt
        } else {
            SectorTail::Torn
        };
        Ok((offset, tail))
    }

    /// Point the directory at `entry` if it is the newest version seen so far
    fn index_recovered(&mut self, location: EntryLocation, entry: &Entry) -> Result<()> {
        let key_hash = KeyDirectory::hash_key(&entry.key);
        let descriptor = KeyDescriptor {
            key_hash,
            key_length: entry.header.key_length,
            location,
            transaction_id: entry.transaction_id(),
            value_size: entry.value.len(),
            entry_size: entry.size(),
            deleted: entry.is_tombstone(),
        };

        let slot = self
            .directory
            .find(key_hash, |current| self.key_matches(current, &entry.key))?;

        match slot.and_then(|slot| self.directory.get(slot).map(|d| (slot, *d))) {
            Some((slot, current)) if descriptor.transaction_id > current.transaction_id => {
                debug!(
                    sector = location.sector,
                    offset = location.offset,
                    transaction_id = descriptor.transaction_id,
                    superseded = current.transaction_id,
                    "newer version recovered"
                );
                self.directory.update(slot, descriptor);
            }
            Some(_) => {
                debug!(
                    sector = location.sector,
                    offset = location.offset,
                    transaction_id = descriptor.transaction_id,
                    "stale version skipped"
                );
            }
            None => {
                if self.directory.is_full() {
                    return Err(KvError::ResourceExhausted(format!(
                        "flash holds more than {} distinct keys",
                        self.directory.capacity()
                    )));
                }
                self.directory.insert(descriptor)?;
            }
        }
        Ok(())
    }

    /// Whether `len` bytes starting at `address` are all erased
    fn is_erased(&self, address: usize, len: usize) -> Result<bool> {
        let mut chunk = [0u8; ERASED_CHECK_CHUNK];
        let mut checked = 0;
        while checked < len {
            let n = (len - checked).min(ERASED_CHECK_CHUNK);
            self.partition.read(address + checked, &mut chunk[..n])?;
            if chunk[..n].iter().any(|&b| b != ERASED_BYTE) {
                return Ok(false);
            }
            checked += n;
        }
        Ok(true)
    }

    /// Whether any valid entry starts after `offset` in the sector
    fn has_entry_after(&self, sector: usize, offset: usize) -> Result<bool> {
        let base = self.partition.sector_address(sector);
        let sector_size = self.partition.sector_size_bytes();

        let mut candidate = offset + MIN_ALIGNMENT_BYTES;
        while candidate + HEADER_SIZE <= sector_size {
            let found = self.format.read(
                &self.partition,
                &self.checksum,
                base + candidate,
                sector_size - candidate,
            )?;
            if found.is_some() {
                return Ok(true);
            }
            candidate += MIN_ALIGNMENT_BYTES;
        }
        Ok(false)
    }
}
