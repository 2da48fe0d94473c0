//! Garbage collection
//!
//! Reclaims one sector at a time:
//! 1. Mark the target `ReadyForGc` so nothing is appended to it
//! 2. Walk its valid entries; re-append the ones the directory points at
//!    (same transaction id) and drop the rest
//! 3. Erase the target once no directory entry refers to it
//!
//! A live tombstone is dropped only when no older entry for its key remains
//! anywhere else on flash; otherwise it is relocated like a value so the
//! deletion survives a rescan.
//!
//! Any failure leaves the target `ReadyForGc` and unerased. A target that
//! still holds a live entry failing its checksum is left in place as well;
//! callers move on to the next candidate.

use tracing::{debug, info, warn};

use crate::checksum::ChecksumAlgorithm;
use crate::directory::{EntryLocation, KeyDescriptor, KeyDirectory};
use crate::entry::Entry;
use crate::error::{KvError, Result};
use crate::flash::FlashPartition;
use crate::sectors::SectorState;

use super::KeyValueStore;

impl<F: FlashPartition, C: ChecksumAlgorithm> KeyValueStore<F, C> {
    /// Relocate the live entries of `target` and erase it.
    ///
    /// Returns `false` without erasing when a live entry in the sector cannot
    /// be read back.
    pub(super) fn collect_sector(&mut self, target: usize) -> Result<bool> {
        let sector_size = self.sectors.sector_size();
        let base = self.partition.sector_address(target);
        let end = self.sectors.get(target).write_offset();
        let reclaimable = self.sectors.get(target).reclaimable_bytes();

        debug!(
            target,
            valid_bytes = self.sectors.get(target).valid_bytes(),
            reclaimable,
            "collecting sector"
        );
        self.sectors.mark_ready_for_gc(target);

        let mut offset = 0;
        let mut relocated = 0usize;
        while offset < end {
            let header = match self.format.read_header(
                &self.partition,
                base + offset,
                sector_size - offset,
            )? {
                Some(header) => header,
                None => break,
            };

            let location = EntryLocation { sector: target, offset };
            match self.format.read(
                &self.partition,
                &self.checksum,
                base + offset,
                sector_size - offset,
            )? {
                Some(entry) => {
                    if self.relocate_if_live(location, &entry)? {
                        relocated += 1;
                    }
                }
                None => debug!(sector = target, offset, "skipping unreadable entry"),
            }
            offset += header.entry_size();
        }

        if let Some((_, stranded)) = self
            .directory
            .entries()
            .find(|(_, d)| d.location.sector == target)
        {
            warn!(
                target,
                offset = stranded.location.offset,
                relocated,
                "live entry failed verification, sector kept"
            );
            return Ok(false);
        }

        if let Err(e) = self.partition.erase(target, 1) {
            warn!(target, error = %e, "erase failed, sector left for a later collection");
            return Err(e.into());
        }
        self.sectors.record_erase(target);

        info!(target, relocated, reclaimed_bytes = reclaimable, "sector collected");
        Ok(true)
    }

    /// Move `entry` out of the sector being collected if it is the newest
    /// version of its key. Returns whether it was rewritten.
    fn relocate_if_live(&mut self, location: EntryLocation, entry: &Entry) -> Result<bool> {
        let key_hash = KeyDirectory::hash_key(&entry.key);
        let slot = self
            .directory
            .find(key_hash, |descriptor| Ok(descriptor.location == location))?;

        let current = slot.and_then(|slot| self.directory.get(slot).map(|d| (slot, *d)));
        let (slot, descriptor) = match current {
            Some(found) => found,
            None => {
                debug!(sector = location.sector, offset = location.offset, "dropping stale entry");
                return Ok(false);
            }
        };

        if descriptor.deleted && !self.older_copy_exists(&entry.key, location)? {
            debug!(sector = location.sector, offset = location.offset, "compacting tombstone");
            self.directory.remove(slot);
            self.sectors.release(location.sector, descriptor.entry_size);
            return Ok(false);
        }

        let size = self.format.entry_size(entry.key.len(), entry.value.len());
        let destination = self
            .sectors
            .find_writable(size, Some(location.sector), true)
            .ok_or_else(|| {
                KvError::ResourceExhausted(format!(
                    "no space to relocate a {}-byte entry out of sector {}",
                    size, location.sector
                ))
            })?;

        let new_location = self.append_entry(
            destination,
            &entry.key,
            entry.value(),
            descriptor.transaction_id,
        )?;

        self.directory.update(
            slot,
            KeyDescriptor {
                location: new_location,
                entry_size: size,
                ..descriptor
            },
        );
        self.sectors.release(location.sector, descriptor.entry_size);

        debug!(
            from_sector = location.sector,
            to_sector = new_location.sector,
            transaction_id = descriptor.transaction_id,
            "entry relocated"
        );
        Ok(true)
    }

    /// Whether any valid entry for `key` other than the one at `live` is
    /// still on flash
    fn older_copy_exists(&self, key: &[u8], live: EntryLocation) -> Result<bool> {
        let sector_size = self.sectors.sector_size();

        for sector in 0..self.sectors.len() {
            if self.sectors.get(sector).state() == SectorState::Empty {
                continue;
            }

            let base = self.partition.sector_address(sector);
            let end = self.sectors.get(sector).write_offset();
            let mut offset = 0;
            while offset < end {
                let header = match self.format.read_header(
                    &self.partition,
                    base + offset,
                    sector_size - offset,
                )? {
                    Some(header) => header,
                    None => break,
                };

                let here = EntryLocation { sector, offset };
                if here != live
                    && header.key_length as usize == key.len()
                    && self.format.read_key(&self.partition, base + offset, &header)? == key
                {
                    // Only a copy that still verifies can resurface on rescan
                    let found = self.format.read(
                        &self.partition,
                        &self.checksum,
                        base + offset,
                        sector_size - offset,
                    )?;
                    if found.is_some() {
                        return Ok(true);
                    }
                }
                offset += header.entry_size();
            }
        }
        Ok(false)
    }
}
