//! Witness Assembler
//!
//! Builds the fixed-layout oracle assignment from validated parameters.
//!
//! Two inputs are derived rather than copied:
//! - `IvCounter` = IV || 00 00 00 01 (first GCM counter block)
//! - `DerivedHandshakeSecretIn` = dHS || SHA-256 padding of a 96-byte message
//!
//! Everything else is decoded and zero-padded to its capacity. Values that
//! do not fit are rejected.

use ark_ff::Zero;
use thiserror::Error;
use tracing::debug;

use super::params::{OracleParameters, ParamField, ParamsError};
use super::schema::WitnessSchema;
use crate::config::DEFAULT_THRESHOLD;
use crate::core::field::bytes_to_elements;
use crate::core::{sha256_padding, Fr, SHA256_BLOCK_LEN};

/// AES-GCM IV length.
pub const IV_LEN: usize = 12;

/// AES block length.
pub const BLOCK_LEN: usize = 16;

/// SHA-256 output length.
pub const HASH_LEN: usize = 32;

/// Padded handshake-secret input length.
pub const PADDED_SECRET_LEN: usize = 2 * HASH_LEN;

/// Logical message length the handshake-secret padding is computed for:
/// one HMAC key block plus the secret.
const PADDED_MESSAGE_LEN: usize = SHA256_BLOCK_LEN + HASH_LEN;

/// Initial GCM counter value.
const GCM_INITIAL_COUNTER: u32 = 1;

/// Assembly errors.
#[derive(Debug, Error)]
pub enum AssemblyError {
    /// Field missing or not decodable.
    #[error(transparent)]
    Param(#[from] ParamsError),

    /// Decoded value longer than the field's capacity.
    #[error("field {field} has {len} bytes, capacity is {capacity}")]
    Overflow {
        /// Witness field.
        field: &'static str,
        /// Decoded length.
        len: usize,
        /// Declared capacity.
        capacity: usize,
    },

    /// Field that must have an exact length does not.
    #[error("field {field} has {len} bytes, expected exactly {expected}")]
    WrongLength {
        /// Witness field.
        field: &'static str,
        /// Decoded length.
        len: usize,
        /// Required length.
        expected: usize,
    },

    /// Substring window outside the substring.
    #[error("substring window {start}..{end} invalid for substring of {len} bytes")]
    SubstringBounds {
        /// substring_start.
        start: u64,
        /// substring_end.
        end: u64,
        /// Substring length.
        len: usize,
    },

    /// Value window outside the substring window.
    #[error("value window {start}..{end} not within substring window {window_start}..{window_end}")]
    ValueBounds {
        /// value_start.
        start: u64,
        /// value_end.
        end: u64,
        /// substring_start.
        window_start: u64,
        /// substring_end.
        window_end: u64,
    },

    /// Ciphertext and plaintext chunks differ in length.
    #[error("cipher_chunks has {cipher} bytes but plain_chunks has {plain}")]
    ChunkLengthMismatch {
        /// Ciphertext length.
        cipher: usize,
        /// Plaintext length.
        plain: usize,
    },
}

// =============================================================================
// DERIVATIONS
// =============================================================================

/// First GCM counter block: IV || be32(1).
pub fn counter_block(iv: &[u8; IV_LEN]) -> [u8; BLOCK_LEN] {
    let mut block = [0u8; BLOCK_LEN];
    block[..IV_LEN].copy_from_slice(iv);
    block[IV_LEN..].copy_from_slice(&GCM_INITIAL_COUNTER.to_be_bytes());
    block
}

/// dHS followed by the SHA-256 padding of a 96-byte message.
pub fn pad_handshake_secret(secret: &[u8; HASH_LEN]) -> [u8; PADDED_SECRET_LEN] {
    let mut padded = [0u8; PADDED_SECRET_LEN];
    padded[..HASH_LEN].copy_from_slice(secret);
    padded[HASH_LEN..].copy_from_slice(&sha256_padding(PADDED_MESSAGE_LEN));
    padded
}

fn exact<const N: usize>(field: &'static str, bytes: &[u8]) -> Result<[u8; N], AssemblyError> {
    bytes.try_into().map_err(|_| AssemblyError::WrongLength {
        field,
        len: bytes.len(),
        expected: N,
    })
}

/// Encode `bytes` into a zero-padded array of capacity `N`.
fn fill<const N: usize>(field: &'static str, bytes: &[u8]) -> Result<[Fr; N], AssemblyError> {
    if bytes.len() > N {
        return Err(AssemblyError::Overflow { field, len: bytes.len(), capacity: N });
    }
    let mut out = [Fr::zero(); N];
    for (slot, &b) in out.iter_mut().zip(bytes) {
        *slot = Fr::from(b);
    }
    Ok(out)
}

// =============================================================================
// ASSIGNMENT
// =============================================================================

/// Full witness assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct OracleAssignment {
    // KDC
    pub intermediate_hash_hs_opad: [Fr; HASH_LEN],
    pub derived_handshake_secret_in: [Fr; PADDED_SECRET_LEN],
    pub master_secret_in: [Fr; HASH_LEN],
    pub application_traffic_secret_in: [Fr; HASH_LEN],
    pub traffic_key_in: [Fr; HASH_LEN],
    // Counter / tag
    pub iv_counter: [Fr; BLOCK_LEN],
    pub zeros: [Fr; BLOCK_LEN],
    pub ecb1: [Fr; BLOCK_LEN],
    pub ecb0: [Fr; BLOCK_LEN],
    // Record
    pub iv: [Fr; IV_LEN],
    pub cipher_chunks: Vec<Fr>,
    pub plain_chunks: Vec<Fr>,
    pub substring: Vec<Fr>,
    pub substring_start: Fr,
    pub substring_end: Fr,
    pub value_start: Fr,
    pub value_end: Fr,
    pub chunk_index: Fr,
    pub threshold: Fr,
}

impl OracleAssignment {
    /// Field values in declaration order, matching [`WitnessSchema`].
    pub fn columns(&self) -> [&[Fr]; 19] {
        use std::slice::from_ref;
        [
            &self.intermediate_hash_hs_opad,
            &self.derived_handshake_secret_in,
            &self.master_secret_in,
            &self.application_traffic_secret_in,
            &self.traffic_key_in,
            &self.iv_counter,
            &self.zeros,
            &self.ecb1,
            &self.ecb0,
            &self.iv,
            &self.cipher_chunks,
            &self.plain_chunks,
            &self.substring,
            from_ref(&self.substring_start),
            from_ref(&self.substring_end),
            from_ref(&self.value_start),
            from_ref(&self.value_end),
            from_ref(&self.chunk_index),
            from_ref(&self.threshold),
        ]
    }

    /// Schema of this assignment.
    pub fn schema(&self) -> WitnessSchema {
        WitnessSchema::from_lengths(self.columns().map(<[Fr]>::len))
    }
}

/// Public shape of a circuit instance: variable lengths and bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OracleSkeleton {
    /// Ciphertext chunk length.
    pub cipher_chunks_len: usize,
    /// Plaintext chunk length.
    pub plain_chunks_len: usize,
    /// Substring length.
    pub substring_len: usize,
    /// substring_start.
    pub substring_start: u64,
    /// substring_end.
    pub substring_end: u64,
    /// value_start.
    pub value_start: u64,
    /// value_end.
    pub value_end: u64,
}

impl OracleSkeleton {
    /// Field layout for this instance.
    pub fn schema(&self) -> WitnessSchema {
        let mut lengths = [1usize; 19];
        let fixed = [HASH_LEN, PADDED_SECRET_LEN, HASH_LEN, HASH_LEN, HASH_LEN, BLOCK_LEN, BLOCK_LEN, BLOCK_LEN, BLOCK_LEN, IV_LEN];
        lengths[..fixed.len()].copy_from_slice(&fixed);
        lengths[10] = self.cipher_chunks_len;
        lengths[11] = self.plain_chunks_len;
        lengths[12] = self.substring_len;
        WitnessSchema::from_lengths(lengths)
    }
}

// =============================================================================
// ASSEMBLER
// =============================================================================

/// Builds assignments with a fixed policy threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WitnessAssembler {
    threshold: u64,
}

impl Default for WitnessAssembler {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

impl WitnessAssembler {
    /// Assembler injecting `threshold` as the policy constant.
    pub fn new(threshold: u64) -> Self {
        Self { threshold }
    }

    /// Policy threshold.
    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    /// Build the assignment and its public skeleton.
    pub fn assemble(&self, params: &OracleParameters) -> Result<(OracleAssignment, OracleSkeleton), AssemblyError> {
        // Derived inputs
        let iv: [u8; IV_LEN] = exact("Iv", &params.bytes(ParamField::Iv)?)?;
        let dhs: [u8; HASH_LEN] = exact("DerivedHandshakeSecretIn", &params.bytes(ParamField::DerivedHandshakeSecretIn)?)?;
        let iv_counter = counter_block(&iv);
        let padded_dhs = pad_handshake_secret(&dhs);

        // Record group
        let cipher_chunks = params.bytes(ParamField::CipherChunks)?;
        let plain_chunks = params.bytes(ParamField::PlainChunks)?;
        if cipher_chunks.len() != plain_chunks.len() {
            return Err(AssemblyError::ChunkLengthMismatch {
                cipher: cipher_chunks.len(),
                plain: plain_chunks.len(),
            });
        }
        let substring = params.bytes(ParamField::Substring)?;

        let substring_start = params.integer(ParamField::SubstringStart)?;
        let substring_end = params.integer(ParamField::SubstringEnd)?;
        let value_start = params.integer(ParamField::ValueStart)?;
        let value_end = params.integer(ParamField::ValueEnd)?;
        let chunk_index = params.integer(ParamField::ChunkIndex)?;

        check_bounds(substring.len(), substring_start, substring_end, value_start, value_end)?;

        let assignment = OracleAssignment {
            intermediate_hash_hs_opad: fill("IntermediateHashHSopad", &params.bytes(ParamField::IntermediateHashHsOpad)?)?,
            derived_handshake_secret_in: fill("DerivedHandshakeSecretIn", &padded_dhs)?,
            master_secret_in: fill("MasterSecretIn", &params.bytes(ParamField::MasterSecretIn)?)?,
            application_traffic_secret_in: fill(
                "ApplicationTrafficSecretIn",
                &params.bytes(ParamField::ApplicationTrafficSecretIn)?,
            )?,
            traffic_key_in: fill("TrafficKeyIn", &params.bytes(ParamField::TrafficKeyIn)?)?,
            iv_counter: fill("IvCounter", &iv_counter)?,
            zeros: [Fr::zero(); BLOCK_LEN],
            ecb1: fill("ECB1", &params.bytes(ParamField::Ecb1)?)?,
            ecb0: fill("ECB0", &params.bytes(ParamField::Ecb0)?)?,
            iv: fill("Iv", &iv)?,
            cipher_chunks: bytes_to_elements(&cipher_chunks),
            plain_chunks: bytes_to_elements(&plain_chunks),
            substring: bytes_to_elements(&substring),
            substring_start: Fr::from(substring_start),
            substring_end: Fr::from(substring_end),
            value_start: Fr::from(value_start),
            value_end: Fr::from(value_end),
            chunk_index: Fr::from(chunk_index),
            threshold: Fr::from(self.threshold),
        };

        let skeleton = OracleSkeleton {
            cipher_chunks_len: cipher_chunks.len(),
            plain_chunks_len: plain_chunks.len(),
            substring_len: substring.len(),
            substring_start,
            substring_end,
            value_start,
            value_end,
        };

        debug!(
            "Assembled witness: {} cipher bytes, substring {} bytes, value window {}..{}",
            skeleton.cipher_chunks_len, skeleton.substring_len, value_start, value_end
        );

        #[cfg(feature = "debug-tracing")]
        tracing::trace!("IvCounter = {}", hex::encode(iv_counter));

        Ok((assignment, skeleton))
    }
}

fn check_bounds(len: usize, start: u64, end: u64, value_start: u64, value_end: u64) -> Result<(), AssemblyError> {
    if !(start <= end && end <= len as u64) {
        return Err(AssemblyError::SubstringBounds { start, end, len });
    }
    if !(start <= value_start && value_start <= value_end && value_end <= end) {
        return Err(AssemblyError::ValueBounds {
            start: value_start,
            end: value_end,
            window_start: start,
            window_end: end,
        });
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Parameters matching the document set written by the loader tests.
    pub(crate) fn sample_params() -> OracleParameters {
        let mut params = OracleParameters::new();
        params.insert(ParamField::IntermediateHashHsOpad, "11".repeat(32));
        params.insert(ParamField::MasterSecretIn, "22".repeat(32));
        params.insert(ParamField::ApplicationTrafficSecretIn, "33".repeat(32));
        params.insert(ParamField::TrafficKeyIn, "44".repeat(16));
        params.insert(ParamField::DerivedHandshakeSecretIn, "55".repeat(32));
        params.insert(ParamField::RecordIndex, "0");
        params.insert(ParamField::Iv, "66".repeat(12));
        params.insert(ParamField::CipherChunks, "77".repeat(48));
        params.insert(ParamField::ChunkIndex, "1");
        params.insert(ParamField::Substring, "\"balance\": 1234");
        params.insert(ParamField::SubstringStart, "0");
        params.insert(ParamField::SubstringEnd, "15");
        params.insert(ParamField::ValueStart, "11");
        params.insert(ParamField::ValueEnd, "15");
        params.insert(ParamField::Ecb0, "88".repeat(16));
        params.insert(ParamField::Ecb1, "99".repeat(16));
        params.insert(ParamField::PlainChunks, "cc".repeat(48));
        params
    }

    #[test]
    fn test_counter_block_fixed() {
        let iv = [0xAB; IV_LEN];
        let block = counter_block(&iv);
        assert_eq!(&block[..12], &iv);
        assert_eq!(&block[12..], &[0, 0, 0, 1]);
    }

    #[test]
    fn test_padded_secret_layout() {
        let padded = pad_handshake_secret(&[0x55; HASH_LEN]);
        assert_eq!(&padded[..32], &[0x55; 32]);
        assert_eq!(padded[32], 0x80);
        assert!(padded[33..56].iter().all(|&b| b == 0));
        // 96 bytes * 8 = 768 bits
        assert_eq!(&padded[56..], &768u64.to_be_bytes());
        assert_eq!(padded.len() % SHA256_BLOCK_LEN, 0);
    }

    proptest! {
        #[test]
        fn prop_counter_block(iv in any::<[u8; 12]>()) {
            let block = counter_block(&iv);
            prop_assert_eq!(block.len(), 16);
            prop_assert_eq!(&block[..12], &iv[..]);
            prop_assert_eq!(&block[12..], &1u32.to_be_bytes()[..]);
        }

        #[test]
        fn prop_padded_secret(secret in any::<[u8; 32]>()) {
            let padded = pad_handshake_secret(&secret);
            prop_assert_eq!(&padded[..32], &secret[..]);
            prop_assert_eq!(&padded[32..], &sha256_padding(96)[..]);
        }
    }

    #[test]
    fn test_scenario_a_group_shapes() {
        let (assignment, skeleton) = WitnessAssembler::default().assemble(&sample_params()).unwrap();

        // KDC group fully populated
        assert!(assignment.intermediate_hash_hs_opad.iter().all(|&x| x == Fr::from(0x11u8)));
        assert!(assignment.master_secret_in.iter().all(|&x| x == Fr::from(0x22u8)));
        assert!(assignment.application_traffic_secret_in.iter().all(|&x| x == Fr::from(0x33u8)));
        assert_eq!(&assignment.derived_handshake_secret_in[..32], &[Fr::from(0x55u8); 32]);
        assert_eq!(assignment.derived_handshake_secret_in[32], Fr::from(0x80u8));

        // Short key is zero-padded at the tail
        assert!(assignment.traffic_key_in[..16].iter().all(|&x| x == Fr::from(0x44u8)));
        assert!(assignment.traffic_key_in[16..].iter().all(Fr::is_zero));

        // Record group matches declared lengths
        assert_eq!(assignment.cipher_chunks.len(), skeleton.cipher_chunks_len);
        assert_eq!(assignment.plain_chunks.len(), 48);
        assert_eq!(assignment.substring.len(), 15);
        assert_eq!(assignment.iv_counter[15], Fr::from(1u8));
        assert_eq!(assignment.threshold, Fr::from(40u64));
        assert_eq!(assignment.schema(), skeleton.schema());
    }

    #[test]
    fn test_threshold_from_config() {
        let (assignment, _) = WitnessAssembler::new(1000).assemble(&sample_params()).unwrap();
        assert_eq!(crate::core::field::fr_to_u64(&assignment.threshold), Some(1000));
    }

    #[test]
    fn test_assembly_is_idempotent() {
        let assembler = WitnessAssembler::default();
        let params = sample_params();
        let first = assembler.assemble(&params).unwrap();
        let second = assembler.assemble(&params).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_overflow_rejected() {
        let mut params = sample_params();
        params.insert(ParamField::Ecb0, "88".repeat(17));

        let err = WitnessAssembler::default().assemble(&params).unwrap_err();
        assert!(matches!(err, AssemblyError::Overflow { field: "ECB0", len: 17, capacity: 16 }));
    }

    #[test]
    fn test_iv_and_secret_exact_lengths() {
        let mut params = sample_params();
        params.insert(ParamField::Iv, "66".repeat(11));
        let err = WitnessAssembler::default().assemble(&params).unwrap_err();
        assert!(matches!(err, AssemblyError::WrongLength { field: "Iv", len: 11, expected: 12 }));

        let mut params = sample_params();
        params.insert(ParamField::DerivedHandshakeSecretIn, "55".repeat(33));
        let err = WitnessAssembler::default().assemble(&params).unwrap_err();
        assert!(matches!(err, AssemblyError::WrongLength { len: 33, expected: 32, .. }));
    }

    #[test]
    fn test_substring_bounds() {
        let mut params = sample_params();
        params.insert(ParamField::SubstringEnd, "16");
        let err = WitnessAssembler::default().assemble(&params).unwrap_err();
        assert!(matches!(err, AssemblyError::SubstringBounds { end: 16, len: 15, .. }));

        let mut params = sample_params();
        params.insert(ParamField::SubstringStart, "5");
        params.insert(ParamField::SubstringEnd, "4");
        let err = WitnessAssembler::default().assemble(&params).unwrap_err();
        assert!(matches!(err, AssemblyError::SubstringBounds { .. }));
    }

    #[test]
    fn test_value_bounds() {
        for (start, end) in [("12", "11"), ("11", "16")] {
            let mut params = sample_params();
            params.insert(ParamField::ValueStart, start);
            params.insert(ParamField::ValueEnd, end);
            let err = WitnessAssembler::default().assemble(&params).unwrap_err();
            assert!(matches!(err, AssemblyError::ValueBounds { .. }), "{}..{}", start, end);
        }

        let mut params = sample_params();
        params.insert(ParamField::SubstringStart, "2");
        params.insert(ParamField::ValueStart, "1");
        let err = WitnessAssembler::default().assemble(&params).unwrap_err();
        assert!(matches!(err, AssemblyError::ValueBounds { window_start: 2, .. }));
    }

    #[test]
    fn test_chunk_length_mismatch() {
        let mut params = sample_params();
        params.insert(ParamField::PlainChunks, "cc".repeat(47));
        let err = WitnessAssembler::default().assemble(&params).unwrap_err();
        assert!(matches!(err, AssemblyError::ChunkLengthMismatch { cipher: 48, plain: 47 }));
    }

    #[test]
    fn test_bad_integer_names_field() {
        let mut params = sample_params();
        params.insert(ParamField::ChunkIndex, "one");
        let err = WitnessAssembler::default().assemble(&params).unwrap_err();
        assert!(matches!(err, AssemblyError::Param(ParamsError::InvalidField { field: ParamField::ChunkIndex, .. })));
    }
}
