//! Store Module
//!
//! The key-value engine that coordinates all components.
//!
//! ## Responsibilities
//! - Rebuild the key directory and sector states from flash on `init`
//! - Append new entry versions for put/delete
//! - Serve reads through the key directory with checksum verification
//! - Reclaim sectors by garbage collection when space runs out
//!
//! ## Consistency Model
//! The partition contents, the sector manager and the key directory change
//! together per operation. A new entry becomes the source of truth only after
//! it is fully written; the directory is updated last, so a failed operation
//! leaves the previous version visible both in memory and after a rescan.
//!
//! The store is single-threaded and not reentrant. Callers sharing one
//! instance across threads wrap it in [`SharedStore`](crate::SharedStore).

mod gc;
mod iter;
mod recovery;

use tracing::{debug, warn};

use crate::alignment::FlashOutput;
use crate::checksum::{ChecksumAlgorithm, CHECKSUM_SLOT_BYTES};
use crate::config::Config;
use crate::directory::{EntryLocation, KeyDescriptor, KeyDirectory, SlotId};
use crate::entry::{Entry, EntryFormat, HEADER_SIZE};
use crate::error::{KvError, Result};
use crate::flash::FlashPartition;
use crate::sectors::{SectorDescriptor, SectorManager, SectorState};

pub use iter::Iter;

/// Minimum scratch buffer for the aligned writer
const WRITE_BUFFER_BYTES: usize = 256;

/// Space and entry counters reported by [`KeyValueStore::stats`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageStats {
    /// Free bytes usable by writes without garbage collection
    pub writable_bytes: usize,
    /// Bytes held by live entries and live tombstones
    pub in_use_bytes: usize,
    /// Bytes garbage collection could recover
    pub reclaimable_bytes: usize,
    /// Keys with a value
    pub live_entries: usize,
    /// Keys whose newest entry is a tombstone
    pub deleted_entries: usize,
    pub corrupt_sectors: usize,
    pub sector_erase_counts: Vec<u32>,
}

/// Key-value store over a flash partition
///
/// Generic over the partition backend `F` and the checksum algorithm `C`.
pub struct KeyValueStore<F: FlashPartition, C: ChecksumAlgorithm> {
    /// Flash the entries live on
    partition: F,

    /// Integrity check for every entry
    checksum: C,

    /// Fixed for the lifetime of the store
    config: Config,

    /// Magic marker and entry alignment
    format: EntryFormat,

    /// Per-sector offsets, live bytes and states
    sectors: SectorManager,

    /// Key → newest entry location
    directory: KeyDirectory,

    /// Scratch space for the aligned writer, allocated once
    write_buffer: Vec<u8>,

    /// Set by a successful `init`
    initialized: bool,
}

impl<F: FlashPartition, C: ChecksumAlgorithm> KeyValueStore<F, C> {
    /// Create a store; nothing is read from flash until [`init`](Self::init)
    pub fn new(partition: F, checksum: C, config: Config) -> Result<Self> {
        config.validate()?;

        let digest_size = checksum.digest_size();
        if digest_size == 0 || digest_size > CHECKSUM_SLOT_BYTES {
            return Err(KvError::InvalidArgument(format!(
                "checksum digest of {} bytes does not fit the {}-byte header slot",
                digest_size, CHECKSUM_SLOT_BYTES
            )));
        }

        let format = EntryFormat::new(config.magic, partition.alignment_bytes())?;
        let write_buffer = vec![0u8; format.alignment().max(WRITE_BUFFER_BYTES)];

        Ok(Self {
            sectors: SectorManager::with_capacity(config.max_usable_sectors),
            directory: KeyDirectory::new(config.max_entries),
            partition,
            checksum,
            config,
            format,
            write_buffer,
            initialized: false,
        })
    }

    // =========================================================================
    // Public Operations
    // =========================================================================

    /// Get the value stored for `key`
    ///
    /// Returns `NotFound` for absent or deleted keys and `DataLoss` when the
    /// entry on flash fails its checksum.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        let descriptor = self.live_descriptor(key)?;
        let entry = self.read_entry(&descriptor, key)?;
        Ok(entry.value)
    }

    /// Copy the value for `key` into `buf`, returning its length
    pub fn get_into(&self, key: &[u8], buf: &mut [u8]) -> Result<usize> {
        let descriptor = self.live_descriptor(key)?;
        if buf.len() < descriptor.value_size {
            return Err(KvError::ResourceExhausted(format!(
                "value is {} bytes, buffer holds {}",
                descriptor.value_size,
                buf.len()
            )));
        }

        let entry = self.read_entry(&descriptor, key)?;
        buf[..entry.value.len()].copy_from_slice(&entry.value);
        Ok(entry.value.len())
    }

    /// Size of the value stored for `key`, without reading it
    pub fn value_size(&self, key: &[u8]) -> Result<usize> {
        Ok(self.live_descriptor(key)?.value_size)
    }

    /// Whether `key` currently has a value
    pub fn contains(&self, key: &[u8]) -> Result<bool> {
        match self.live_descriptor(key) {
            Ok(_) => Ok(true),
            Err(KvError::NotFound) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Store `value` under `key`
    ///
    /// Steps:
    /// 1. Validate sizes and directory capacity (no flash I/O on failure)
    /// 2. Skip the write if the live value is already identical
    /// 3. Reserve space, collecting garbage if needed
    /// 4. Append the entry with the next transaction id
    /// 5. Point the key directory at it
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.ensure_initialized()?;
        self.validate_key(key)?;
        if value.len() > self.config.max_value_size {
            return Err(KvError::InvalidArgument(format!(
                "value size {} exceeds max_value_size {}",
                value.len(),
                self.config.max_value_size
            )));
        }

        match self.lookup(key)? {
            Some((_, current)) if !current.deleted && current.value_size == value.len() => {
                if matches!(self.read_entry(&current, key), Ok(entry) if entry.value == value) {
                    debug!(key_hash = current.key_hash, "put skipped, value unchanged");
                    return Ok(());
                }
            }
            Some(_) => {}
            None if self.directory.is_full() => {
                return Err(KvError::ResourceExhausted(format!(
                    "key directory full ({} keys)",
                    self.directory.capacity()
                )));
            }
            None => {}
        }

        self.write_version(key, Some(value))
    }

    /// Delete `key` by appending a tombstone
    pub fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.ensure_initialized()?;
        self.validate_key(key)?;

        match self.lookup(key)? {
            Some((_, current)) if !current.deleted => self.write_version(key, None),
            _ => Err(KvError::NotFound),
        }
    }

    /// Reclaim the best garbage collection candidate, if any.
    ///
    /// Candidates holding a live entry that fails verification are passed
    /// over. Returns whether a sector was erased.
    pub fn garbage_collect(&mut self) -> Result<bool> {
        self.ensure_initialized()?;

        let mut blocked = Vec::new();
        while let Some(target) = self.sectors.gc_candidate_excluding(&blocked) {
            if self.collect_sector(target)? {
                return Ok(true);
            }
            blocked.push(target);
        }
        Ok(false)
    }

    /// Iterate over live key/value pairs in directory order
    pub fn iter(&self) -> Iter<'_, F, C> {
        Iter::new(self)
    }

    // =========================================================================
    // Introspection (for tooling and tests)
    // =========================================================================

    pub fn stats(&self) -> StorageStats {
        StorageStats {
            writable_bytes: self.sectors.writable_bytes(),
            in_use_bytes: self.sectors.in_use_bytes(),
            reclaimable_bytes: self.sectors.reclaimable_bytes(),
            live_entries: self.directory.live_count(),
            deleted_entries: self.directory.deleted_count(),
            corrupt_sectors: self.sectors.count_in_state(SectorState::Corrupt),
            sector_erase_counts: self.sectors.erase_counts(),
        }
    }

    /// Number of keys with a value
    pub fn len(&self) -> usize {
        self.directory.live_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Key directory capacity
    pub fn max_len(&self) -> usize {
        self.directory.capacity()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Bookkeeping for one sector
    pub fn sector(&self, index: usize) -> Option<&SectorDescriptor> {
        (index < self.sectors.len()).then(|| self.sectors.get(index))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn entry_format(&self) -> &EntryFormat {
        &self.format
    }

    pub fn partition(&self) -> &F {
        &self.partition
    }

    /// Give the partition back, dropping all in-memory state
    pub fn into_partition(self) -> F {
        self.partition
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn ensure_initialized(&self) -> Result<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(KvError::FailedPrecondition(
                "store used before a successful init".to_string(),
            ))
        }
    }

    fn validate_key(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() || key.len() > self.config.max_key_length {
            return Err(KvError::InvalidArgument(format!(
                "key length {} outside 1..={}",
                key.len(),
                self.config.max_key_length
            )));
        }
        Ok(())
    }

    /// Descriptor for a key that exists and is not deleted
    fn live_descriptor(&self, key: &[u8]) -> Result<KeyDescriptor> {
        self.ensure_initialized()?;
        self.validate_key(key)?;

        match self.lookup(key)? {
            Some((_, descriptor)) if !descriptor.deleted => Ok(descriptor),
            _ => Err(KvError::NotFound),
        }
    }

    /// Hash filter, then full-key comparison against flash
    fn lookup(&self, key: &[u8]) -> Result<Option<(SlotId, KeyDescriptor)>> {
        let key_hash = KeyDirectory::hash_key(key);
        let slot = self
            .directory
            .find(key_hash, |descriptor| self.key_matches(descriptor, key))?;

        Ok(slot.and_then(|slot| self.directory.get(slot).map(|d| (slot, *d))))
    }

    fn key_matches(&self, descriptor: &KeyDescriptor, key: &[u8]) -> Result<bool> {
        if descriptor.key_length as usize != key.len() {
            return Ok(false);
        }

        let mut stored = vec![0u8; key.len()];
        self.partition
            .read(self.address_of(descriptor.location) + HEADER_SIZE, &mut stored)?;
        Ok(stored == key)
    }

    /// Read and verify the entry a descriptor points at
    fn read_entry(&self, descriptor: &KeyDescriptor, key: &[u8]) -> Result<Entry> {
        let location = descriptor.location;
        let limit = self.sectors.sector_size() - location.offset;

        match self
            .format
            .read(&self.partition, &self.checksum, self.address_of(location), limit)?
        {
            Some(entry)
                if entry.key == key && entry.transaction_id() == descriptor.transaction_id =>
            {
                Ok(entry)
            }
            _ => {
                warn!(
                    sector = location.sector,
                    offset = location.offset,
                    "entry failed verification"
                );
                Err(KvError::DataLoss(format!(
                    "entry at sector {} offset {} failed verification",
                    location.sector, location.offset
                )))
            }
        }
    }

    fn address_of(&self, location: EntryLocation) -> usize {
        self.partition.sector_address(location.sector) + location.offset
    }

    /// Append a new version of `key` (`None` = tombstone) and update the
    /// directory. Space is reserved first, so garbage collection may run.
    fn write_version(&mut self, key: &[u8], value: Option<&[u8]>) -> Result<()> {
        let value_len = value.map_or(0, <[u8]>::len);
        let size = self.format.entry_size(key.len(), value_len);
        let sector = self.reserve_space(size)?;

        // Collection may have moved or compacted this key
        let existing = self.lookup(key)?;
        let transaction_id = match &existing {
            Some((_, current)) => current.transaction_id.checked_add(1).ok_or_else(|| {
                KvError::ResourceExhausted("transaction id space exhausted".to_string())
            })?,
            None if self.directory.is_full() => {
                return Err(KvError::ResourceExhausted(format!(
                    "key directory full ({} keys)",
                    self.directory.capacity()
                )));
            }
            None => 1,
        };

        let location = self.append_entry(sector, key, value, transaction_id)?;
        let descriptor = KeyDescriptor {
            key_hash: KeyDirectory::hash_key(key),
            key_length: key.len() as u8,
            location,
            transaction_id,
            value_size: value_len,
            entry_size: size,
            deleted: value.is_none(),
        };

        match existing {
            Some((slot, previous)) => {
                self.directory.update(slot, descriptor);
                self.sectors
                    .release(previous.location.sector, previous.entry_size);
            }
            None => {
                self.directory.insert(descriptor)?;
            }
        }

        debug!(
            sector = location.sector,
            offset = location.offset,
            transaction_id,
            deleted = value.is_none(),
            "entry written"
        );
        Ok(())
    }

    /// Find a sector with `size` free bytes, collecting garbage until one
    /// appears or nothing more can be reclaimed
    fn reserve_space(&mut self, size: usize) -> Result<usize> {
        let mut blocked = Vec::new();
        for _ in 0..=2 * self.sectors.len() {
            if let Some(sector) = self.sectors.find_writable(size, None, false) {
                return Ok(sector);
            }

            let target = self
                .sectors
                .gc_candidate_excluding(&blocked)
                .ok_or_else(|| {
                    KvError::ResourceExhausted(format!(
                        "no sector has {} free bytes and nothing is reclaimable",
                        size
                    ))
                })?;
            if !self.collect_sector(target)? {
                blocked.push(target);
            }
        }

        Err(KvError::ResourceExhausted(format!(
            "no space for a {}-byte entry after garbage collection",
            size
        )))
    }

    /// Write one entry at the sector's write offset
    fn append_entry(
        &mut self,
        sector: usize,
        key: &[u8],
        value: Option<&[u8]>,
        transaction_id: u32,
    ) -> Result<EntryLocation> {
        let location = EntryLocation {
            sector,
            offset: self.sectors.get(sector).write_offset(),
        };
        let address = self.address_of(location);

        let written = self.format.write(
            &self.checksum,
            key,
            value,
            transaction_id,
            FlashOutput::new(&mut self.partition, address),
            &mut self.write_buffer,
        );

        let header = match written {
            Ok(header) => header,
            Err(e) => {
                warn!(
                    sector,
                    offset = location.offset,
                    error = %e,
                    "entry write failed, closing sector"
                );
                self.sectors.close(sector);
                return Err(e);
            }
        };

        if self.config.verify_on_write {
            let limit = self.sectors.sector_size() - location.offset;
            let verified = match self
                .format
                .read(&self.partition, &self.checksum, address, limit)
            {
                Ok(Some(entry)) => entry.key == key && entry.value() == value,
                _ => false,
            };
            if !verified {
                warn!(
                    sector,
                    offset = location.offset,
                    "read-back verification failed, closing sector"
                );
                self.sectors.close(sector);
                return Err(KvError::DataLoss(format!(
                    "entry at sector {} offset {} did not verify after write",
                    sector, location.offset
                )));
            }
        }

        self.sectors.record_write(sector, header.entry_size());
        Ok(location)
    }
}
