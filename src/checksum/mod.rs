//! Checksum Module
//!
//! Pluggable integrity check for on-flash entries.
//!
//! The store never depends on a particular algorithm: it asks the
//! [`ChecksumAlgorithm`] for a digest over the entry's spans and stores it in
//! the header's checksum slot (see [`CHECKSUM_SLOT_BYTES`]).

mod crc32;

pub use crc32::Crc32;

/// Bytes reserved for the digest in every entry header
pub const CHECKSUM_SLOT_BYTES: usize = 4;

/// Computes and verifies a fixed-size digest over a sequence of byte spans.
///
/// Digests narrower than [`CHECKSUM_SLOT_BYTES`] are returned in the low bytes
/// of the `u32`; the upper bytes must be zero.
pub trait ChecksumAlgorithm {
    /// Width of the digest in bytes (1..=4)
    fn digest_size(&self) -> usize;

    /// Digest over the concatenation of `spans`
    fn compute(&self, spans: &[&[u8]]) -> u32;

    /// Check a stored `digest` against the spans.
    ///
    /// The default recomputes the digest, truncated to `digest_size` bytes.
    fn verify(&self, spans: &[&[u8]], digest: u32) -> bool {
        truncate_digest(self.compute(spans), self.digest_size()) == digest
    }
}

/// Keep the low `digest_size` bytes of a digest
pub fn truncate_digest(digest: u32, digest_size: usize) -> u32 {
    if digest_size >= CHECKSUM_SLOT_BYTES {
        digest
    } else {
        digest & ((1u32 << (digest_size * 8)) - 1)
    }
}

impl<T: ChecksumAlgorithm + ?Sized> ChecksumAlgorithm for &T {
    fn digest_size(&self) -> usize {
        (**self).digest_size()
    }

    fn compute(&self, spans: &[&[u8]]) -> u32 {
        (**self).compute(spans)
    }

    fn verify(&self, spans: &[&[u8]], digest: u32) -> bool {
        (**self).verify(spans, digest)
    }
}
