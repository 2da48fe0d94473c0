//! Tests for the Entry Codec
//!
//! These tests verify:
//! - Entry sizes are padded to the entry alignment
//! - Encoded entries read back identically (values and tombstones)
//! - Corruption is reported as "no entry", never as an error
//! - Key and value limits are enforced before anything is written
//! - Narrow checksum digests are masked into the header slot

use sectorkv::alignment::FlashOutput;
use sectorkv::checksum::ChecksumAlgorithm;
use sectorkv::entry::{compute_checksum, EntryFormat, HEADER_SIZE};
use sectorkv::flash::MemoryFlash;
use sectorkv::{Crc32, KvError};

const MAGIC: u32 = 0x1234_5678;

// =============================================================================
// Helper Functions
// =============================================================================

/// Sum of all bytes folded into 16 bits
struct Sum16;

impl ChecksumAlgorithm for Sum16 {
    fn digest_size(&self) -> usize {
        2
    }

    fn compute(&self, spans: &[&[u8]]) -> u32 {
        let sum = spans
            .iter()
            .flat_map(|span| span.iter())
            .fold(0u32, |acc, &b| acc.wrapping_add(b as u32));
        sum | 0xABCD_0000
    }
}

fn setup_flash() -> MemoryFlash {
    MemoryFlash::new(512, 2, 16)
}

/// Encode one entry at `address` and return its on-flash size
fn write_entry(
    flash: &mut MemoryFlash,
    format: &EntryFormat,
    address: usize,
    key: &[u8],
    value: Option<&[u8]>,
    transaction_id: u32,
) -> usize {
    let mut buffer = [0u8; 64];
    let header = format
        .write(
            &Crc32,
            key,
            value,
            transaction_id,
            FlashOutput::new(flash, address),
            &mut buffer,
        )
        .unwrap();
    header.entry_size()
}

// =============================================================================
// Size Tests
// =============================================================================

#[test]
fn test_entry_size_padding() {
    let format = EntryFormat::new(MAGIC, 16).unwrap();

    assert_eq!(format.entry_size(1, 0), 32);
    assert_eq!(format.entry_size(8, 8), 32);
    assert_eq!(format.entry_size(8, 9), 48);
    assert_eq!(format.min_entry_size(), 32);
}

#[test]
fn test_entry_alignment_follows_partition() {
    assert_eq!(EntryFormat::new(MAGIC, 1).unwrap().alignment(), 16);
    assert_eq!(EntryFormat::new(MAGIC, 8).unwrap().alignment(), 16);
    assert_eq!(EntryFormat::new(MAGIC, 32).unwrap().alignment(), 32);
    assert_eq!(EntryFormat::new(MAGIC, 24).unwrap().alignment(), 48);
    assert!(matches!(
        EntryFormat::new(MAGIC, 0),
        Err(KvError::InvalidArgument(_))
    ));
}

// =============================================================================
// Read Back Tests
// =============================================================================

#[test]
fn test_value_entry_reads_back() {
    let mut flash = setup_flash();
    let format = EntryFormat::new(MAGIC, 16).unwrap();
    let size = write_entry(&mut flash, &format, 0, b"temperature", Some(&b"21.5"[..]), 7);

    let entry = format.read(&flash, &Crc32, 0, 512).unwrap().unwrap();
    assert_eq!(entry.key, b"temperature");
    assert_eq!(entry.value(), Some(&b"21.5"[..]));
    assert_eq!(entry.transaction_id(), 7);
    assert_eq!(entry.size(), size);
    assert!(!entry.is_tombstone());
}

#[test]
fn test_empty_value_is_not_a_tombstone() {
    let mut flash = setup_flash();
    let format = EntryFormat::new(MAGIC, 16).unwrap();
    write_entry(&mut flash, &format, 0, b"k", Some(&b""[..]), 1);

    let entry = format.read(&flash, &Crc32, 0, 512).unwrap().unwrap();
    assert!(!entry.is_tombstone());
    assert_eq!(entry.value(), Some(&b""[..]));
}

#[test]
fn test_tombstone_reads_back() {
    let mut flash = setup_flash();
    let format = EntryFormat::new(MAGIC, 16).unwrap();
    write_entry(&mut flash, &format, 0, b"gone", None, 3);

    let entry = format.read(&flash, &Crc32, 0, 512).unwrap().unwrap();
    assert!(entry.is_tombstone());
    assert_eq!(entry.value(), None);
    assert!(entry.value.is_empty());
    assert_eq!(entry.size(), 32);
}

#[test]
fn test_consecutive_entries() {
    let mut flash = setup_flash();
    let format = EntryFormat::new(MAGIC, 16).unwrap();
    let first = write_entry(&mut flash, &format, 0, b"a", Some(&[1u8; 20][..]), 1);
    write_entry(&mut flash, &format, first, b"b", Some(&[2u8; 5][..]), 1);

    let entry = format.read(&flash, &Crc32, first, 512 - first).unwrap().unwrap();
    assert_eq!(entry.key, b"b");
    assert_eq!(entry.value, vec![2u8; 5]);
}

// =============================================================================
// Corruption Tests
// =============================================================================

#[test]
fn test_erased_flash_is_not_an_entry() {
    let flash = setup_flash();
    let format = EntryFormat::new(MAGIC, 16).unwrap();
    assert!(format.read(&flash, &Crc32, 0, 512).unwrap().is_none());
}

#[test]
fn test_flipped_value_bit_fails_checksum() {
    let mut flash = setup_flash();
    let format = EntryFormat::new(MAGIC, 16).unwrap();
    write_entry(&mut flash, &format, 0, b"key", Some(&b"value"[..]), 1);

    flash.bytes_mut()[HEADER_SIZE + 3] ^= 0x01;
    assert!(format.read(&flash, &Crc32, 0, 512).unwrap().is_none());
}

#[test]
fn test_flipped_transaction_id_fails_checksum() {
    let mut flash = setup_flash();
    let format = EntryFormat::new(MAGIC, 16).unwrap();
    write_entry(&mut flash, &format, 0, b"key", Some(&b"value"[..]), 1);

    flash.bytes_mut()[12] ^= 0x02;
    assert!(format.read(&flash, &Crc32, 0, 512).unwrap().is_none());
}

#[test]
fn test_other_magic_is_ignored() {
    let mut flash = setup_flash();
    let format = EntryFormat::new(MAGIC, 16).unwrap();
    write_entry(&mut flash, &format, 0, b"key", Some(&b"value"[..]), 1);

    let other = EntryFormat::new(MAGIC + 1, 16).unwrap();
    assert!(other.read(&flash, &Crc32, 0, 512).unwrap().is_none());
}

#[test]
fn test_entry_larger_than_limit_is_ignored() {
    let mut flash = setup_flash();
    let format = EntryFormat::new(MAGIC, 16).unwrap();
    let size = write_entry(&mut flash, &format, 0, b"key", Some(&[0u8; 40][..]), 1);

    assert!(format.read(&flash, &Crc32, 0, size - 16).unwrap().is_none());
    assert!(format.read(&flash, &Crc32, 0, size).unwrap().is_some());
}

#[test]
fn test_read_out_of_bounds_is_an_error() {
    let flash = setup_flash();
    let format = EntryFormat::new(MAGIC, 16).unwrap();
    let result = format.read(&flash, &Crc32, 1020, 512);
    assert!(matches!(result, Err(KvError::Io(_))));
}

// =============================================================================
// Validation Tests
// =============================================================================

#[test]
fn test_empty_key_rejected() {
    let format = EntryFormat::new(MAGIC, 16).unwrap();
    let mut out = Vec::new();
    let mut buffer = [0u8; 32];
    let result = format.write(&Crc32, b"", Some(&b"v"[..]), 1, &mut out, &mut buffer);

    assert!(matches!(result, Err(KvError::InvalidArgument(_))));
    assert!(out.is_empty());
}

#[test]
fn test_oversized_value_rejected() {
    let format = EntryFormat::new(MAGIC, 16).unwrap();
    let value = vec![0u8; 0xFFFF];
    let result = format.header_for(&Crc32, b"k", Some(&value[..]), 1);
    assert!(matches!(result, Err(KvError::InvalidArgument(_))));
}

// =============================================================================
// Checksum Width Tests
// =============================================================================

#[test]
fn test_narrow_digest_is_masked() {
    let format = EntryFormat::new(MAGIC, 16).unwrap();
    let header = format.header_for(&Sum16, b"key", Some(&b"value"[..]), 1).unwrap();

    assert_eq!(header.checksum & 0xFFFF_0000, 0);
    assert_eq!(
        header.checksum,
        compute_checksum(&Sum16, &header, b"key", b"value")
    );
}

#[test]
fn test_narrow_digest_reads_back() {
    let mut flash = setup_flash();
    let format = EntryFormat::new(MAGIC, 16).unwrap();
    let mut buffer = [0u8; 32];
    format
        .write(
            &Sum16,
            b"key",
            Some(&b"value"[..]),
            1,
            FlashOutput::new(&mut flash, 0),
            &mut buffer,
        )
        .unwrap();

    assert!(format.read(&flash, &Sum16, 0, 512).unwrap().is_some());
    assert!(format.read(&flash, &Crc32, 0, 512).unwrap().is_none());
}
