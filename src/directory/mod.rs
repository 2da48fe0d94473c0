//! Key Directory Module
//!
//! In-memory index from key to the location of its newest entry.
//!
//! ## Responsibilities
//! - One descriptor per distinct key (tombstones included)
//! - Fast hash filter before the caller's full-key comparison
//! - Fixed capacity, decided at construction
//!
//! The directory never stores keys. A descriptor records the key's hash and
//! length; callers resolve hash collisions by reading the key back from flash
//! inside the `find` matcher. The whole directory is derived data and can be
//! rebuilt at any time by rescanning the partition.

use crate::error::{KvError, Result};

/// Where an entry starts on flash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryLocation {
    pub sector: usize,
    pub offset: usize,
}

/// Freshness and location of a key's newest entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyDescriptor {
    pub key_hash: u32,
    pub key_length: u8,
    pub location: EntryLocation,
    pub transaction_id: u32,
    pub value_size: usize,
    /// Bytes the entry occupies on flash
    pub entry_size: usize,
    pub deleted: bool,
}

/// Index of a directory slot; stable until the slot is removed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(usize);

impl SlotId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Fixed-capacity key directory
#[derive(Debug)]
pub struct KeyDirectory {
    slots: Vec<Option<KeyDescriptor>>,
    len: usize,
}

impl KeyDirectory {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
            len: 0,
        }
    }

    /// Hash used for the directory's fast filter
    pub fn hash_key(key: &[u8]) -> u32 {
        crc32fast::hash(key)
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Occupied slots, tombstones included
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.slots.len()
    }

    pub fn clear(&mut self) {
        self.slots.fill(None);
        self.len = 0;
    }

    /// Find the slot whose hash equals `key_hash` and that `matches` accepts.
    ///
    /// `matches` is only called for hash hits, which is where the caller
    /// compares the full key.
    pub fn find<M>(&self, key_hash: u32, mut matches: M) -> Result<Option<SlotId>>
    where
        M: FnMut(&KeyDescriptor) -> Result<bool>,
    {
        for (index, slot) in self.slots.iter().enumerate() {
            if let Some(descriptor) = slot {
                if descriptor.key_hash == key_hash && matches(descriptor)? {
                    return Ok(Some(SlotId(index)));
                }
            }
        }
        Ok(None)
    }

    pub fn get(&self, slot: SlotId) -> Option<&KeyDescriptor> {
        self.slots.get(slot.0).and_then(Option::as_ref)
    }

    /// Descriptor at a raw slot index, for iteration
    pub fn get_index(&self, index: usize) -> Option<&KeyDescriptor> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    /// Add a descriptor for a key not yet in the directory
    pub fn insert(&mut self, descriptor: KeyDescriptor) -> Result<SlotId> {
        let index = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or_else(|| {
                KvError::ResourceExhausted(format!(
                    "key directory full ({} keys)",
                    self.slots.len()
                ))
            })?;

        self.slots[index] = Some(descriptor);
        self.len += 1;
        Ok(SlotId(index))
    }

    /// Point an existing slot at a newer (or relocated) entry, returning the
    /// previous descriptor
    pub fn update(&mut self, slot: SlotId, descriptor: KeyDescriptor) -> Option<KeyDescriptor> {
        match self.slots.get_mut(slot.0) {
            Some(Some(current)) => Some(std::mem::replace(current, descriptor)),
            _ => None,
        }
    }

    /// Free a slot (used when a tombstone is compacted away)
    pub fn remove(&mut self, slot: SlotId) -> Option<KeyDescriptor> {
        let removed = self.slots.get_mut(slot.0).and_then(Option::take);
        if removed.is_some() {
            self.len -= 1;
        }
        removed
    }

    /// All occupied slots, tombstones included
    pub fn entries(&self) -> impl Iterator<Item = (SlotId, &KeyDescriptor)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|d| (SlotId(index), d)))
    }

    /// Keys that are present and not deleted
    pub fn live_count(&self) -> usize {
        self.entries().filter(|(_, d)| !d.deleted).count()
    }

    pub fn deleted_count(&self) -> usize {
        self.entries().filter(|(_, d)| d.deleted).count()
    }
}
