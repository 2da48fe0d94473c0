//! Thread-safe store handle
//!
//! [`KeyValueStore`] is single-threaded. `SharedStore` serializes every
//! operation behind one mutex so a store can be shared between threads
//! (typically through an `Arc`). Operations that need several steps to be
//! atomic together should hold the guard from [`SharedStore::lock`].

use parking_lot::{Mutex, MutexGuard};

use crate::checksum::ChecksumAlgorithm;
use crate::error::Result;
use crate::flash::FlashPartition;
use crate::store::{KeyValueStore, StorageStats};

/// A [`KeyValueStore`] behind a mutex
pub struct SharedStore<F: FlashPartition, C: ChecksumAlgorithm> {
    inner: Mutex<KeyValueStore<F, C>>,
}

impl<F: FlashPartition, C: ChecksumAlgorithm> SharedStore<F, C> {
    pub fn new(store: KeyValueStore<F, C>) -> Self {
        Self {
            inner: Mutex::new(store),
        }
    }

    pub fn init(&self) -> Result<()> {
        self.inner.lock().init()
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.inner.lock().put(key, value)
    }

    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.inner.lock().get(key)
    }

    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.inner.lock().delete(key)
    }

    pub fn garbage_collect(&self) -> Result<bool> {
        self.inner.lock().garbage_collect()
    }

    pub fn stats(&self) -> StorageStats {
        self.inner.lock().stats()
    }

    /// Exclusive access for multi-step operations
    pub fn lock(&self) -> MutexGuard<'_, KeyValueStore<F, C>> {
        self.inner.lock()
    }

    pub fn into_inner(self) -> KeyValueStore<F, C> {
        self.inner.into_inner()
    }
}
