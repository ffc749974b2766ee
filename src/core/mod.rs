//! Core primitives.
//!
//! Byte-exact building blocks shared by capture, assembly and proving.
//! Nothing here touches the network or the file system.

pub mod field;
pub mod hash;
pub mod hex_bytes;

// Re-export core types
pub use field::{Fr, FR_BYTES};
pub use hash::{Digest, DomainHasher, sha256_padding, SHA256_BLOCK_LEN};
pub use hex_bytes::HexBytes;
