//! Iteration over live key/value pairs

use crate::checksum::ChecksumAlgorithm;
use crate::directory::KeyDirectory;
use crate::error::{KvError, Result};
use crate::flash::FlashPartition;

use super::KeyValueStore;

/// Iterator returned by [`KeyValueStore::iter`]
///
/// Yields `(key, value)` for every key that is not deleted. Each item is read
/// and verified from flash; an entry that fails verification yields
/// `DataLoss` and iteration continues with the next key.
pub struct Iter<'a, F: FlashPartition, C: ChecksumAlgorithm> {
    store: &'a KeyValueStore<F, C>,
    index: usize,
}

impl<'a, F: FlashPartition, C: ChecksumAlgorithm> Iter<'a, F, C> {
    pub(super) fn new(store: &'a KeyValueStore<F, C>) -> Self {
        Self { store, index: 0 }
    }
}

impl<F: FlashPartition, C: ChecksumAlgorithm> Iterator for Iter<'_, F, C> {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        let store = self.store;
        if !store.initialized {
            return None;
        }

        while self.index < store.directory.capacity() {
            let index = self.index;
            self.index += 1;

            let descriptor = match store.directory.get_index(index) {
                Some(d) if !d.deleted => *d,
                _ => continue,
            };

            let location = descriptor.location;
            let limit = store.sectors.sector_size() - location.offset;
            let read = store.format.read(
                &store.partition,
                &store.checksum,
                store.address_of(location),
                limit,
            );

            return Some(match read {
                Ok(Some(entry))
                    if entry.transaction_id() == descriptor.transaction_id
                        && KeyDirectory::hash_key(&entry.key) == descriptor.key_hash =>
                {
                    Ok((entry.key, entry.value))
                }
                Ok(_) => Err(KvError::DataLoss(format!(
                    "entry at sector {} offset {} failed verification",
                    location.sector, location.offset
                ))),
                Err(e) => Err(e),
            });
        }
        None
    }
}
