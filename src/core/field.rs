//! BN254 Scalar Field Encoding
//!
//! Witness values are `ark_bn254::Fr`. On disk each element is 32 bytes,
//! big-endian and canonical (strictly below the modulus `r`). Arkworks
//! serializes little-endian, so the helpers here flip byte order around
//! `CanonicalSerialize` / `CanonicalDeserialize`.

use ark_ff::PrimeField;
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize, SerializationError};

pub use ark_bn254::Fr;

/// Byte width of one serialized field element.
pub const FR_BYTES: usize = 32;

/// Big-endian canonical encoding.
pub fn fr_to_be_bytes(fr: &Fr) -> Result<[u8; FR_BYTES], SerializationError> {
    let mut bytes = [0u8; FR_BYTES];
    fr.serialize_compressed(&mut bytes[..])?;
    bytes.reverse();
    Ok(bytes)
}

/// Decode a big-endian element.
///
/// Returns `None` when the value is not reduced (>= r).
pub fn fr_from_be_bytes(bytes: &[u8; FR_BYTES]) -> Option<Fr> {
    let mut le = *bytes;
    le.reverse();
    Fr::deserialize_compressed(&le[..]).ok()
}

/// Value as u64, if it fits.
pub fn fr_to_u64(fr: &Fr) -> Option<u64> {
    let limbs = fr.into_bigint().0;
    limbs[1..].iter().all(|&l| l == 0).then_some(limbs[0])
}

/// Map each byte to one field element.
pub fn bytes_to_elements(bytes: &[u8]) -> Vec<Fr> {
    bytes.iter().copied().map(Fr::from).collect()
}
