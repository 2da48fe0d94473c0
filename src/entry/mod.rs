//! Entry Module
//!
//! Serializes one key/value record to its on-flash layout and reads it back.
//!
//! ## Entry Format
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │ Header (16 bytes, little-endian)                                     │
//! │ ┌──────────┬────────────┬──────────┬─────────┬──────────┬─────────┐ │
//! │ │Magic (4) │Checksum (4)│AlignU (1)│KeyLen(1)│ValSize(2)│ TxId (4)│ │
//! │ └──────────┴────────────┴──────────┴─────────┴──────────┴─────────┘ │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │ Key (KeyLen bytes)                                                   │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │ Value (ValSize bytes, absent for tombstones)                         │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │ Zero padding up to (AlignU + 1) * 16 bytes                           │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! - `ValSize == 0xFFFF` marks a tombstone
//! - the checksum covers every header byte except the checksum slot, then the
//!   key and the value; padding is not covered
//! - an entry is trusted only if both the magic and the checksum match

use crate::alignment::{align_up, aligned_write, Output};
use crate::checksum::{truncate_digest, ChecksumAlgorithm, CHECKSUM_SLOT_BYTES};
use crate::config::{KEY_LENGTH_LIMIT, VALUE_SIZE_LIMIT};
use crate::error::{KvError, Result};
use crate::flash::FlashPartition;

/// Size of the fixed entry header
pub const HEADER_SIZE: usize = 16;

/// Entries are padded to a multiple of this, even on byte-writable flash
pub const MIN_ALIGNMENT_BYTES: usize = 16;

/// Largest entry alignment expressible in the header
pub const MAX_ALIGNMENT_BYTES: usize = MIN_ALIGNMENT_BYTES * 256;

/// `value_size` sentinel marking a tombstone
pub const TOMBSTONE_VALUE_SIZE: u16 = 0xFFFF;

// =============================================================================
// Entry Header
// =============================================================================

/// Fixed-size header at the start of every entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryHeader {
    pub magic: u32,
    pub checksum: u32,
    pub alignment_units: u8,
    pub key_length: u8,
    pub value_size: u16,
    pub transaction_id: u32,
}

impl EntryHeader {
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.magic.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.checksum.to_le_bytes());
        bytes[8] = self.alignment_units;
        bytes[9] = self.key_length;
        bytes[10..12].copy_from_slice(&self.value_size.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.transaction_id.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8; HEADER_SIZE]) -> Self {
        Self {
            magic: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            checksum: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            alignment_units: bytes[8],
            key_length: bytes[9],
            value_size: u16::from_le_bytes([bytes[10], bytes[11]]),
            transaction_id: u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]),
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.value_size == TOMBSTONE_VALUE_SIZE
    }

    /// Number of value bytes stored after the key
    pub fn value_len(&self) -> usize {
        if self.is_tombstone() {
            0
        } else {
            self.value_size as usize
        }
    }

    pub fn alignment_bytes(&self) -> usize {
        (self.alignment_units as usize + 1) * MIN_ALIGNMENT_BYTES
    }

    /// Header + key + value, without padding
    pub fn content_size(&self) -> usize {
        HEADER_SIZE + self.key_length as usize + self.value_len()
    }

    /// Total bytes the entry occupies on flash
    pub fn entry_size(&self) -> usize {
        align_up(self.content_size(), self.alignment_bytes())
    }
}

// =============================================================================
// Decoded Entry
// =============================================================================

/// An entry read back from flash whose magic and checksum matched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub header: EntryHeader,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl Entry {
    pub fn is_tombstone(&self) -> bool {
        self.header.is_tombstone()
    }

    pub fn transaction_id(&self) -> u32 {
        self.header.transaction_id
    }

    pub fn size(&self) -> usize {
        self.header.entry_size()
    }

    /// Value bytes, `None` for tombstones
    pub fn value(&self) -> Option<&[u8]> {
        if self.is_tombstone() {
            None
        } else {
            Some(&self.value)
        }
    }
}

// =============================================================================
// Entry Format
// =============================================================================

/// Per-store encoding parameters: magic marker and entry alignment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryFormat {
    magic: u32,
    alignment: usize,
}

impl EntryFormat {
    /// Entry alignment is the smallest multiple of [`MIN_ALIGNMENT_BYTES`]
    /// that is also a multiple of the partition's write alignment.
    pub fn new(magic: u32, partition_alignment: usize) -> Result<Self> {
        if partition_alignment == 0 {
            return Err(KvError::InvalidArgument(
                "partition alignment must be non-zero".to_string(),
            ));
        }

        let alignment = (MIN_ALIGNMENT_BYTES..=MAX_ALIGNMENT_BYTES)
            .step_by(MIN_ALIGNMENT_BYTES)
            .find(|candidate| candidate % partition_alignment == 0)
            .ok_or_else(|| {
                KvError::InvalidArgument(format!(
                    "partition alignment {} cannot be expressed in an entry header",
                    partition_alignment
                ))
            })?;

        Ok(Self { magic, alignment })
    }

    pub fn magic(&self) -> u32 {
        self.magic
    }

    pub fn alignment(&self) -> usize {
        self.alignment
    }

    /// On-flash size of an entry with this key and value length
    pub fn entry_size(&self, key_length: usize, value_length: usize) -> usize {
        align_up(HEADER_SIZE + key_length + value_length, self.alignment)
    }

    /// Smallest possible entry (1-byte key tombstone)
    pub fn min_entry_size(&self) -> usize {
        self.entry_size(1, 0)
    }

    /// Build a header with its checksum filled in.
    ///
    /// `value == None` produces a tombstone.
    pub fn header_for<C: ChecksumAlgorithm + ?Sized>(
        &self,
        checksum: &C,
        key: &[u8],
        value: Option<&[u8]>,
        transaction_id: u32,
    ) -> Result<EntryHeader> {
        if key.is_empty() || key.len() > KEY_LENGTH_LIMIT {
            return Err(KvError::InvalidArgument(format!(
                "key length {} outside 1..={}",
                key.len(),
                KEY_LENGTH_LIMIT
            )));
        }

        let value_size = match value {
            Some(v) if v.len() > VALUE_SIZE_LIMIT => {
                return Err(KvError::InvalidArgument(format!(
                    "value size {} exceeds {}",
                    v.len(),
                    VALUE_SIZE_LIMIT
                )));
            }
            Some(v) => v.len() as u16,
            None => TOMBSTONE_VALUE_SIZE,
        };

        let mut header = EntryHeader {
            magic: self.magic,
            checksum: 0,
            alignment_units: (self.alignment / MIN_ALIGNMENT_BYTES - 1) as u8,
            key_length: key.len() as u8,
            value_size,
            transaction_id,
        };
        header.checksum = compute_checksum(checksum, &header, key, value.unwrap_or(&[]));
        Ok(header)
    }

    /// Encode an entry into `output` through an aligned writer using `buffer`
    /// as scratch space. Returns the header that was written.
    pub fn write<C, O>(
        &self,
        checksum: &C,
        key: &[u8],
        value: Option<&[u8]>,
        transaction_id: u32,
        output: O,
        buffer: &mut [u8],
    ) -> Result<EntryHeader>
    where
        C: ChecksumAlgorithm + ?Sized,
        O: Output,
    {
        let header = self.header_for(checksum, key, value, transaction_id)?;
        let header_bytes = header.to_bytes();

        let written = aligned_write(
            output,
            self.alignment,
            buffer,
            &[&header_bytes[..], key, value.unwrap_or(&[])],
        )?;
        debug_assert_eq!(written, header.entry_size());

        Ok(header)
    }

    /// Decode the entry at `address`, reading at most `limit` bytes.
    ///
    /// Returns `Ok(None)` when the bytes are not a trustworthy entry: wrong
    /// magic, a size that does not fit in `limit`, or a checksum mismatch.
    /// Errors are reserved for flash I/O failures.
    pub fn read<F, C>(
        &self,
        partition: &F,
        checksum: &C,
        address: usize,
        limit: usize,
    ) -> Result<Option<Entry>>
    where
        F: FlashPartition + ?Sized,
        C: ChecksumAlgorithm + ?Sized,
    {
        let header = match self.read_header(partition, address, limit)? {
            Some(header) => header,
            None => return Ok(None),
        };

        let key_start = address + HEADER_SIZE;
        let mut key = vec![0u8; header.key_length as usize];
        partition.read(key_start, &mut key)?;

        let mut value = vec![0u8; header.value_len()];
        partition.read(key_start + key.len(), &mut value)?;

        let header_bytes = header.to_bytes();
        if !checksum.verify(&checksum_spans(&header_bytes, &key, &value), header.checksum) {
            return Ok(None);
        }

        Ok(Some(Entry { header, key, value }))
    }

    /// Read just the header at `address` if it plausibly starts an entry.
    ///
    /// The checksum is not verified.
    pub fn read_header<F>(
        &self,
        partition: &F,
        address: usize,
        limit: usize,
    ) -> Result<Option<EntryHeader>>
    where
        F: FlashPartition + ?Sized,
    {
        if limit < HEADER_SIZE {
            return Ok(None);
        }

        let mut bytes = [0u8; HEADER_SIZE];
        partition.read(address, &mut bytes)?;
        let header = EntryHeader::from_bytes(&bytes);

        if header.magic != self.magic || header.key_length == 0 || header.entry_size() > limit {
            return Ok(None);
        }
        Ok(Some(header))
    }

    /// Read the key of an entry whose header is already known
    pub fn read_key<F>(&self, partition: &F, address: usize, header: &EntryHeader) -> Result<Vec<u8>>
    where
        F: FlashPartition + ?Sized,
    {
        let mut key = vec![0u8; header.key_length as usize];
        partition.read(address + HEADER_SIZE, &mut key)?;
        Ok(key)
    }
}

/// Digest over header (minus checksum slot), key and value, truncated to the
/// algorithm's digest width
pub fn compute_checksum<C: ChecksumAlgorithm + ?Sized>(
    checksum: &C,
    header: &EntryHeader,
    key: &[u8],
    value: &[u8],
) -> u32 {
    let header_bytes = header.to_bytes();
    let digest = checksum.compute(&checksum_spans(&header_bytes, key, value));
    truncate_digest(digest, checksum.digest_size())
}

/// The byte spans an entry checksum covers
fn checksum_spans<'a>(
    header_bytes: &'a [u8; HEADER_SIZE],
    key: &'a [u8],
    value: &'a [u8],
) -> [&'a [u8]; 4] {
    [
        &header_bytes[..4],
        &header_bytes[4 + CHECKSUM_SLOT_BYTES..],
        key,
        value,
    ]
}
