//! Tests for Flash Partitions
//!
//! These tests verify:
//! - MemoryFlash enforces bounds, alignment and erase-before-write
//! - Injected write and erase failures
//! - FileFlash images persist across reopen and validate their geometry
//! - StatsPartition counts I/O and per-sector erases
//! - A store runs unchanged on every backend

use std::path::PathBuf;

use sectorkv::flash::{
    FileFlash, FlashError, FlashGeometry, FlashPartition, MemoryFlash, PartitionStats,
    StatsPartition, ERASED_BYTE,
};
use sectorkv::{Config, Crc32, KeyValueStore};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_image() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("flash.img");
    (temp_dir, path)
}

/// Config whose largest entry fits a 512-byte sector
fn small_config() -> Config {
    Config::builder().max_value_size(128).build()
}

fn small_geometry() -> FlashGeometry {
    FlashGeometry {
        sector_size: 512,
        sector_count: 4,
        alignment: 16,
    }
}

// =============================================================================
// MemoryFlash Tests
// =============================================================================

#[test]
fn test_memory_geometry() {
    let flash = MemoryFlash::new(4096, 4, 16);
    assert_eq!(flash.sector_size_bytes(), 4096);
    assert_eq!(flash.sector_count(), 4);
    assert_eq!(flash.alignment_bytes(), 16);
    assert_eq!(flash.size_bytes(), 16384);
    assert_eq!(flash.sector_address(2), 8192);
}

#[test]
fn test_memory_out_of_bounds() {
    let mut flash = MemoryFlash::new(256, 2, 16);
    let mut buf = [0u8; 32];

    assert!(matches!(
        flash.read(500, &mut buf),
        Err(FlashError::OutOfBounds { .. })
    ));
    assert!(matches!(
        flash.write(496, &[0u8; 32]),
        Err(FlashError::OutOfBounds { .. })
    ));
    assert!(matches!(
        flash.erase(1, 2),
        Err(FlashError::InvalidSector { .. })
    ));
}

#[test]
fn test_memory_erase_restores_sector() {
    let mut flash = MemoryFlash::new(256, 2, 16);
    flash.write(0, &[0u8; 16]).unwrap();
    flash.write(256, &[0u8; 16]).unwrap();

    flash.erase(0, 1).unwrap();
    assert!(flash.bytes()[..256].iter().all(|&b| b == ERASED_BYTE));
    assert_eq!(&flash.bytes()[256..272], &[0u8; 16]);

    flash.write(0, &[1u8; 16]).unwrap();
}

#[test]
fn test_memory_injected_erase_failure() {
    let mut flash = MemoryFlash::new(256, 2, 16);
    flash.fail_erases_after(1);

    flash.erase(0, 1).unwrap();
    assert!(matches!(flash.erase(1, 1), Err(FlashError::Injected(_))));

    flash.clear_faults();
    flash.erase(1, 1).unwrap();
}

// =============================================================================
// FileFlash Tests
// =============================================================================

#[test]
fn test_file_create_is_erased() {
    let (_temp, path) = setup_temp_image();
    let flash = FileFlash::create(&path, small_geometry()).unwrap();

    let mut buf = [0u8; 64];
    flash.read(1024, &mut buf).unwrap();
    assert!(buf.iter().all(|&b| b == ERASED_BYTE));
    assert_eq!(std::fs::metadata(&path).unwrap().len(), 2048);
}

#[test]
fn test_file_data_survives_reopen() {
    let (_temp, path) = setup_temp_image();
    {
        let mut flash = FileFlash::create(&path, small_geometry()).unwrap();
        flash.write(512, &[0x42u8; 32]).unwrap();
    }

    let flash = FileFlash::open(&path).unwrap();
    assert_eq!(flash.geometry(), small_geometry());

    let mut buf = [0u8; 32];
    flash.read(512, &mut buf).unwrap();
    assert_eq!(buf, [0x42u8; 32]);
}

#[test]
fn test_file_enforces_flash_rules() {
    let (_temp, path) = setup_temp_image();
    let mut flash = FileFlash::create(&path, small_geometry()).unwrap();

    assert!(matches!(
        flash.write(8, &[0u8; 16]),
        Err(FlashError::Unaligned { .. })
    ));

    flash.write(0, &[0u8; 16]).unwrap();
    assert!(matches!(
        flash.write(0, &[0u8; 16]),
        Err(FlashError::NotErased { .. })
    ));

    flash.erase(0, 1).unwrap();
    flash.write(0, &[0u8; 16]).unwrap();
}

#[test]
fn test_file_open_without_geometry_fails() {
    let (_temp, path) = setup_temp_image();
    std::fs::write(&path, vec![ERASED_BYTE; 2048]).unwrap();

    assert!(matches!(FileFlash::open(&path), Err(FlashError::Io(_))));
}

#[test]
fn test_file_open_rejects_wrong_length() {
    let (_temp, path) = setup_temp_image();
    FileFlash::create(&path, small_geometry()).unwrap();
    std::fs::write(&path, vec![ERASED_BYTE; 1000]).unwrap();

    assert!(matches!(FileFlash::open(&path), Err(FlashError::Image(_))));
}

#[test]
fn test_file_create_rejects_bad_geometry() {
    let (_temp, path) = setup_temp_image();
    let geometry = FlashGeometry {
        sector_size: 500,
        sector_count: 4,
        alignment: 16,
    };
    assert!(matches!(
        FileFlash::create(&path, geometry),
        Err(FlashError::Image(_))
    ));
}

#[test]
fn test_store_on_file_image_persists() {
    let (_temp, path) = setup_temp_image();
    {
        let flash = FileFlash::create(&path, small_geometry()).unwrap();
        let mut store = KeyValueStore::new(flash, Crc32, small_config()).unwrap();
        store.init().unwrap();
        store.put(b"serial", b"SN-0042").unwrap();
        store.put(b"boot_count", &7u32.to_le_bytes()).unwrap();
        store.delete(b"boot_count").unwrap();
    }

    let flash = FileFlash::open(&path).unwrap();
    let mut store = KeyValueStore::new(flash, Crc32, small_config()).unwrap();
    store.init().unwrap();
    assert_eq!(store.get(b"serial").unwrap(), b"SN-0042");
    assert!(!store.contains(b"boot_count").unwrap());
}

// =============================================================================
// StatsPartition Tests
// =============================================================================

#[test]
fn test_stats_partition_counts_io() {
    let mut flash = StatsPartition::new(MemoryFlash::new(256, 4, 16));
    let mut buf = [0u8; 16];

    flash.write(0, &[0u8; 32]).unwrap();
    flash.write(32, &[0u8; 16]).unwrap();
    flash.read(0, &mut buf).unwrap();
    flash.erase(1, 2).unwrap();
    flash.erase(1, 1).unwrap();

    let stats = flash.stats();
    assert_eq!(stats.writes, 2);
    assert_eq!(stats.bytes_written, 48);
    assert_eq!(stats.reads, 1);
    assert_eq!(stats.total_erases, 3);
    assert_eq!(stats.min_sector_erases, 0);
    assert_eq!(stats.max_sector_erases, 2);
    assert_eq!(flash.sector_erase_counts(), &[0, 2, 1, 0]);
}

#[test]
fn test_stats_partition_skips_failed_operations() {
    let mut flash = StatsPartition::new(MemoryFlash::new(256, 2, 16));
    flash.inner_mut().fail_writes_after(0);

    assert!(flash.write(0, &[0u8; 16]).is_err());
    assert_eq!(flash.stats().writes, 0);

    flash.reset_counters();
    assert_eq!(flash.stats(), PartitionStats::default());
}

#[test]
fn test_store_spreads_erases_across_sectors() {
    let flash = StatsPartition::new(MemoryFlash::new(512, 4, 16));
    let config = Config::builder().max_value_size(64).build();
    let mut store = KeyValueStore::new(flash, Crc32, config).unwrap();
    store.init().unwrap();

    for i in 0..400u32 {
        store.put(b"counter", &i.to_le_bytes()).unwrap();
    }

    let stats = store.partition().stats();
    assert!(stats.total_erases > 0);
    assert!(stats.min_sector_erases > 0, "every sector should be recycled");
    assert!(stats.max_sector_erases - stats.min_sector_erases <= 2);
    assert_eq!(
        store.stats().sector_erase_counts,
        store.partition().sector_erase_counts().to_vec()
    );
}
