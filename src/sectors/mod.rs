//! Sector Module
//!
//! Tracks the lifecycle of every sector and picks sectors for writing and for
//! garbage collection.
//!
//! ## Sector Lifecycle
//! ```text
//!            first write                no room for a minimum entry
//!   Empty ───────────────► Writable ───────────────────────────────► Full
//!     ▲                       │                                        │
//!     │                       │ live bytes < half of used bytes        │
//!     │ erase                 ▼                                        │
//!     └──────────────── ReadyForGc ◄───────────────────────────────────┘
//!
//!   Corrupt: set by recovery, excluded from allocation until erased
//! ```
//!
//! ## Accounting
//! Each sector tracks `write_offset` (bytes consumed, live or not) and
//! `valid_bytes` (bytes of entries the key directory points at). The
//! difference is reclaimable by garbage collection. A sector that cannot be
//! appended to safely (torn tail, failed write) is closed by moving its write
//! offset to the sector end.

/// Lifecycle state of a sector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectorState {
    /// Erased, nothing written
    Empty,
    /// Partially written, accepts appends
    Writable,
    /// Cannot fit another entry
    Full,
    /// Mostly stale, or left behind by an interrupted collection
    ReadyForGc,
    /// Recovery found valid entries past unreadable data
    Corrupt,
}

/// In-memory bookkeeping for one sector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectorDescriptor {
    write_offset: usize,
    valid_bytes: usize,
    erase_count: u32,
    state: SectorState,
}

impl SectorDescriptor {
    const ERASED: Self = Self {
        write_offset: 0,
        valid_bytes: 0,
        erase_count: 0,
        state: SectorState::Empty,
    };

    /// Next free byte within the sector
    pub fn write_offset(&self) -> usize {
        self.write_offset
    }

    /// Bytes of live entries (including live tombstones)
    pub fn valid_bytes(&self) -> usize {
        self.valid_bytes
    }

    /// Bytes consumed by stale entries or garbage
    pub fn reclaimable_bytes(&self) -> usize {
        self.write_offset.saturating_sub(self.valid_bytes)
    }

    /// Erases performed by this store since `init`
    pub fn erase_count(&self) -> u32 {
        self.erase_count
    }

    pub fn state(&self) -> SectorState {
        self.state
    }
}

/// Sector state tracking and selection
///
/// Descriptors live in an arena sized once for the largest partition the
/// store accepts; `reset` reuses it without reallocating.
#[derive(Debug)]
pub struct SectorManager {
    sectors: Vec<SectorDescriptor>,
    sector_size: usize,
    min_entry_size: usize,
    /// Sector most recently appended to
    active: Option<usize>,
}

impl SectorManager {
    pub fn with_capacity(max_sectors: usize) -> Self {
        Self {
            sectors: Vec::with_capacity(max_sectors),
            sector_size: 0,
            min_entry_size: 0,
            active: None,
        }
    }

    /// Forget all state and track `count` erased sectors.
    ///
    /// Erase counters survive when the geometry is unchanged.
    pub fn reset(&mut self, count: usize, sector_size: usize, min_entry_size: usize) {
        if self.sectors.len() == count && self.sector_size == sector_size {
            for sector in &mut self.sectors {
                *sector = SectorDescriptor {
                    erase_count: sector.erase_count,
                    ..SectorDescriptor::ERASED
                };
            }
        } else {
            self.sectors.clear();
            self.sectors.resize(count, SectorDescriptor::ERASED);
        }
        self.sector_size = sector_size;
        self.min_entry_size = min_entry_size;
        self.active = None;
    }

    pub fn len(&self) -> usize {
        self.sectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sectors.is_empty()
    }

    pub fn sector_size(&self) -> usize {
        self.sector_size
    }

    pub fn get(&self, index: usize) -> &SectorDescriptor {
        &self.sectors[index]
    }

    pub fn free_bytes(&self, index: usize) -> usize {
        self.sector_size - self.sectors[index].write_offset
    }

    // =========================================================================
    // Recovery
    // =========================================================================

    /// Record where the recovery scan found the end of written data
    pub fn restore(&mut self, index: usize, write_offset: usize) {
        self.sectors[index].write_offset = write_offset;
    }

    /// Exclude a sector from allocation until it is erased
    pub fn mark_corrupt(&mut self, index: usize) {
        let sector = &mut self.sectors[index];
        sector.write_offset = self.sector_size;
        sector.state = SectorState::Corrupt;
    }

    /// Credit live bytes found by the recovery scan
    pub fn add_valid(&mut self, index: usize, bytes: usize) {
        self.sectors[index].valid_bytes += bytes;
    }

    /// Derive every state from the recovered offsets and live bytes
    pub fn finish_recovery(&mut self) {
        for index in 0..self.sectors.len() {
            if self.sectors[index].state != SectorState::Corrupt {
                self.sectors[index].state = self.derive_state(index);
            }
        }
        self.active = None;
    }

    // =========================================================================
    // Write Path
    // =========================================================================

    /// Pick a sector with at least `size` free bytes.
    ///
    /// Preference order: the active sector, the fullest writable sector that
    /// fits, then the least-erased empty sector. One empty sector is held back
    /// for garbage collection unless `for_gc` is set. `exclude` is never
    /// returned.
    pub fn find_writable(&self, size: usize, exclude: Option<usize>, for_gc: bool) -> Option<usize> {
        let allowed = |index: usize| Some(index) != exclude;

        if let Some(active) = self.active {
            if allowed(active)
                && self.sectors[active].state == SectorState::Writable
                && self.free_bytes(active) >= size
            {
                return Some(active);
            }
        }

        let partial = (0..self.sectors.len())
            .filter(|&i| allowed(i))
            .filter(|&i| self.sectors[i].state == SectorState::Writable)
            .filter(|&i| self.free_bytes(i) >= size)
            .min_by_key(|&i| self.free_bytes(i));
        if partial.is_some() {
            return partial;
        }

        if size > self.sector_size {
            return None;
        }

        let empty_count = self
            .sectors
            .iter()
            .filter(|s| s.state == SectorState::Empty)
            .count();
        if !for_gc && empty_count <= 1 {
            return None;
        }

        (0..self.sectors.len())
            .filter(|&i| allowed(i))
            .filter(|&i| self.sectors[i].state == SectorState::Empty)
            .min_by_key(|&i| self.sectors[i].erase_count)
    }

    /// Account for an entry of `size` bytes appended to `index`
    pub fn record_write(&mut self, index: usize, size: usize) {
        let sector = &mut self.sectors[index];
        sector.write_offset += size;
        sector.valid_bytes += size;
        if sector.state == SectorState::Empty {
            sector.state = SectorState::Writable;
        }
        self.active = Some(index);
        self.refresh(index);
    }

    /// Stop appending to a sector whose tail may hold partially written bytes
    pub fn close(&mut self, index: usize) {
        self.sectors[index].write_offset = self.sector_size;
        if self.active == Some(index) {
            self.active = None;
        }
        if self.sectors[index].state != SectorState::Corrupt {
            self.sectors[index].state = SectorState::Full;
            self.refresh(index);
        }
    }

    /// An entry of `size` bytes in `index` was superseded or dropped
    pub fn release(&mut self, index: usize, size: usize) {
        let sector = &mut self.sectors[index];
        sector.valid_bytes = sector.valid_bytes.saturating_sub(size);
        self.refresh(index);
    }

    // =========================================================================
    // Garbage Collection
    // =========================================================================

    /// Sector to reclaim next, if any holds reclaimable bytes.
    ///
    /// Full and ReadyForGc sectors come first, then writable ones, then
    /// corrupt ones; within a tier the sector with the fewest live bytes wins.
    pub fn gc_candidate(&self) -> Option<usize> {
        self.gc_candidate_excluding(&[])
    }

    /// Like [`gc_candidate`](Self::gc_candidate), never returning a sector in
    /// `skip`
    pub fn gc_candidate_excluding(&self, skip: &[usize]) -> Option<usize> {
        let tier = |state: SectorState| match state {
            SectorState::ReadyForGc | SectorState::Full => 0,
            SectorState::Writable => 1,
            SectorState::Corrupt => 2,
            SectorState::Empty => 3,
        };

        (0..self.sectors.len())
            .filter(|i| !skip.contains(i))
            .filter(|&i| self.sectors[i].state != SectorState::Empty)
            .filter(|&i| self.sectors[i].reclaimable_bytes() > 0)
            .min_by_key(|&i| (tier(self.sectors[i].state), self.sectors[i].valid_bytes))
    }

    pub fn mark_ready_for_gc(&mut self, index: usize) {
        self.sectors[index].state = SectorState::ReadyForGc;
        if self.active == Some(index) {
            self.active = None;
        }
    }

    /// The sector was erased
    pub fn record_erase(&mut self, index: usize) {
        let erase_count = self.sectors[index].erase_count.saturating_add(1);
        self.sectors[index] = SectorDescriptor {
            erase_count,
            ..SectorDescriptor::ERASED
        };
        if self.active == Some(index) {
            self.active = None;
        }
    }

    // =========================================================================
    // Statistics
    // =========================================================================

    /// Free bytes available to ordinary writes (the GC reserve excluded)
    pub fn writable_bytes(&self) -> usize {
        let mut total: usize = self
            .sectors
            .iter()
            .filter(|s| matches!(s.state, SectorState::Empty | SectorState::Writable))
            .map(|s| self.sector_size - s.write_offset)
            .sum();
        if self.sectors.iter().any(|s| s.state == SectorState::Empty) {
            total -= self.sector_size;
        }
        total
    }

    pub fn in_use_bytes(&self) -> usize {
        self.sectors.iter().map(|s| s.valid_bytes).sum()
    }

    pub fn reclaimable_bytes(&self) -> usize {
        self.sectors.iter().map(|s| s.reclaimable_bytes()).sum()
    }

    pub fn count_in_state(&self, state: SectorState) -> usize {
        self.sectors.iter().filter(|s| s.state == state).count()
    }

    pub fn erase_counts(&self) -> Vec<u32> {
        self.sectors.iter().map(|s| s.erase_count).collect()
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn derive_state(&self, index: usize) -> SectorState {
        let sector = &self.sectors[index];
        if sector.write_offset == 0 {
            SectorState::Empty
        } else if sector.valid_bytes == 0 {
            SectorState::ReadyForGc
        } else if self.free_bytes(index) < self.min_entry_size {
            if sector.valid_bytes * 2 < sector.write_offset {
                SectorState::ReadyForGc
            } else {
                SectorState::Full
            }
        } else {
            SectorState::Writable
        }
    }

    /// Re-derive state after accounting changes. ReadyForGc and Corrupt are
    /// only left through erase.
    fn refresh(&mut self, index: usize) {
        match self.sectors[index].state {
            SectorState::ReadyForGc | SectorState::Corrupt | SectorState::Empty => {}
            SectorState::Writable | SectorState::Full => {
                let derived = self.derive_state(index);
                if derived != SectorState::Empty {
                    self.sectors[index].state = derived;
                }
            }
        }
    }
}
