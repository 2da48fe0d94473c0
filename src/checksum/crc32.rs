//! CRC-32 (IEEE) checksum backed by crc32fast.

use super::ChecksumAlgorithm;

/// CRC-32 over all spans, 4-byte digest
#[derive(Debug, Clone, Copy, Default)]
pub struct Crc32;

impl ChecksumAlgorithm for Crc32 {
    fn digest_size(&self) -> usize {
        4
    }

    fn compute(&self, spans: &[&[u8]]) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        for span in spans {
            hasher.update(span);
        }
        hasher.finalize()
    }
}
