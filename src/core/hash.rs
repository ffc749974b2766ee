//! Hashing Helpers
//!
//! Provides the SHA-256 building blocks shared by the pipeline:
//! - Merkle-Damgard padding supplied to the circuit as auxiliary input
//! - Domain-separated digests identifying proof outputs

use sha2::{Sha256, Digest as _};

/// Hash output type (256 bits / 32 bytes)
pub type Digest = [u8; 32];

/// SHA-256 compression block size in bytes.
pub const SHA256_BLOCK_LEN: usize = 64;

/// Width of the big-endian bit-length trailer in SHA-256 padding.
const LENGTH_TRAILER_LEN: usize = 8;

/// Deterministic hasher with a domain separator.
///
/// Wraps SHA-256 with length-prefixed updates so that adjacent
/// variable-size fields can never be confused.
pub struct DomainHasher {
    hasher: Sha256,
}

impl DomainHasher {
    /// Create a new hasher with domain separator.
    pub fn new(domain: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        Self { hasher }
    }

    /// Update with raw bytes.
    #[inline]
    pub fn update_bytes(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    /// Update with a u64 value (big-endian).
    #[inline]
    pub fn update_u64(&mut self, value: u64) {
        self.hasher.update(value.to_be_bytes());
    }

    /// Update with a length-prefixed byte string.
    #[inline]
    pub fn update_prefixed(&mut self, bytes: &[u8]) {
        self.update_u64(bytes.len() as u64);
        self.hasher.update(bytes);
    }

    /// Finalize and return the digest.
    pub fn finalize(self) -> Digest {
        self.hasher.finalize().into()
    }
}

// =============================================================================
// SHA-256 PADDING (auxiliary circuit input)
// =============================================================================

/// SHA-256 padding for a message of `message_len` bytes.
///
/// Returns `0x80`, then the zero bytes needed to reach 56 mod 64, then the
/// 64-bit big-endian bit length. `message_len + padding.len()` is always a
/// multiple of [`SHA256_BLOCK_LEN`].
pub fn sha256_padding(message_len: usize) -> Vec<u8> {
    let used = message_len % SHA256_BLOCK_LEN;
    let zeros = (2 * SHA256_BLOCK_LEN - LENGTH_TRAILER_LEN - 1 - used) % SHA256_BLOCK_LEN;

    let mut padding = Vec::with_capacity(1 + zeros + LENGTH_TRAILER_LEN);
    padding.push(0x80);
    padding.resize(1 + zeros, 0);
    let bit_len = (message_len as u64).wrapping_mul(8);
    padding.extend_from_slice(&bit_len.to_be_bytes());
    padding
}

// =============================================================================
// TESTS
// =============================================================================
