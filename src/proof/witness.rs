//! Field Witness
//!
//! Flattened witness over the BN254 scalar field and its binary encoding:
//!
//! ```text
//! ┌──────────────┬──────────────┬──────────────┬─────────────────────────┐
//! │ nb_public u32│ nb_secret u32│ len u32      │ len × 32-byte element   │
//! │ (big-endian) │ (big-endian) │ (big-endian) │ (big-endian, canonical) │
//! └──────────────┴──────────────┴──────────────┴─────────────────────────┘
//! ```
//!
//! Public elements come first, then secret elements.

use thiserror::Error;

use crate::core::field::{fr_from_be_bytes, fr_to_be_bytes};
use crate::core::{Fr, FR_BYTES};
use crate::oracle::{OracleAssignment, Visibility};

const HEADER_LEN: usize = 12;

/// Witness construction and decoding errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WitnessError {
    /// Buffer shorter than its header claims.
    #[error("witness truncated: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Bytes required.
        expected: usize,
        /// Bytes available.
        actual: usize,
    },

    /// Bytes after the last element.
    #[error("{0} trailing bytes after witness")]
    TrailingBytes(usize),

    /// `len` does not equal `nb_public + nb_secret`.
    #[error("witness declares {nb_public} public + {nb_secret} secret but {len} elements")]
    CountMismatch {
        /// Declared public count.
        nb_public: u32,
        /// Declared secret count.
        nb_secret: u32,
        /// Declared element count.
        len: u32,
    },

    /// Element not reduced modulo r.
    #[error("element {0} is not a canonical field element")]
    NonCanonical(usize),

    /// More elements than the header can describe.
    #[error("witness has {0} elements, exceeding the u32 header")]
    TooLarge(usize),

    /// Element could not be serialized.
    #[error("element {index} failed to serialize: {reason}")]
    Serialization {
        /// Element position.
        index: usize,
        /// Serializer message.
        reason: String,
    },
}

/// Flattened witness vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Witness {
    nb_public: u32,
    nb_secret: u32,
    elements: Vec<Fr>,
}

fn count(n: usize) -> Result<u32, WitnessError> {
    u32::try_from(n).map_err(|_| WitnessError::TooLarge(n))
}

impl Witness {
    /// Build from separate public and secret vectors.
    pub fn new(public: Vec<Fr>, secret: Vec<Fr>) -> Result<Self, WitnessError> {
        let nb_public = count(public.len())?;
        let nb_secret = count(secret.len())?;
        count(public.len() + secret.len())?;

        let mut elements = public;
        elements.extend(secret);
        Ok(Self { nb_public, nb_secret, elements })
    }

    /// Flatten an assignment: public fields in declaration order, then secret.
    pub fn from_assignment(assignment: &OracleAssignment) -> Result<Self, WitnessError> {
        let schema = assignment.schema();
        let mut public = Vec::with_capacity(schema.nb_public());
        let mut secret = Vec::with_capacity(schema.nb_secret());

        for (field, values) in schema.fields().iter().zip(assignment.columns()) {
            match field.visibility {
                Visibility::Public => public.extend_from_slice(values),
                Visibility::Secret => secret.extend_from_slice(values),
            }
        }

        Self::new(public, secret)
    }

    /// The public part as a witness of its own.
    pub fn public(&self) -> Witness {
        Witness {
            nb_public: self.nb_public,
            nb_secret: 0,
            elements: self.public_values().to_vec(),
        }
    }

    /// Public elements.
    pub fn public_values(&self) -> &[Fr] {
        &self.elements[..self.nb_public as usize]
    }

    /// Secret elements.
    pub fn secret_values(&self) -> &[Fr] {
        &self.elements[self.nb_public as usize..]
    }

    /// Public element count.
    pub fn nb_public(&self) -> usize {
        self.nb_public as usize
    }

    /// Secret element count.
    pub fn nb_secret(&self) -> usize {
        self.nb_secret as usize
    }

    /// Total element count.
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// True for a witness with no elements.
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// All elements, public first.
    pub fn values(&self) -> &[Fr] {
        &self.elements
    }

    /// Binary encoding.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WitnessError> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.elements.len() * FR_BYTES);
        out.extend_from_slice(&self.nb_public.to_be_bytes());
        out.extend_from_slice(&self.nb_secret.to_be_bytes());
        // Header guarantees the total fits in u32
        out.extend_from_slice(&(self.elements.len() as u32).to_be_bytes());
        for (index, element) in self.elements.iter().enumerate() {
            let bytes = fr_to_be_bytes(element)
                .map_err(|e| WitnessError::Serialization { index, reason: e.to_string() })?;
            out.extend_from_slice(&bytes);
        }
        Ok(out)
    }

    /// Decode the binary encoding.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WitnessError> {
        if bytes.len() < HEADER_LEN {
            return Err(WitnessError::Truncated { expected: HEADER_LEN, actual: bytes.len() });
        }
        let word = |at: usize| u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
        let nb_public = word(0);
        let nb_secret = word(4);
        let len = word(8);

        if u64::from(nb_public) + u64::from(nb_secret) != u64::from(len) {
            return Err(WitnessError::CountMismatch { nb_public, nb_secret, len });
        }

        let body = &bytes[HEADER_LEN..];
        let expected = len as usize * FR_BYTES;
        if body.len() < expected {
            return Err(WitnessError::Truncated {
                expected: HEADER_LEN + expected,
                actual: bytes.len(),
            });
        }
        if body.len() > expected {
            return Err(WitnessError::TrailingBytes(body.len() - expected));
        }

        let elements = body
            .chunks_exact(FR_BYTES)
            .enumerate()
            .map(|(i, chunk)| {
                let mut buf = [0u8; FR_BYTES];
                buf.copy_from_slice(chunk);
                fr_from_be_bytes(&buf).ok_or(WitnessError::NonCanonical(i))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { nb_public, nb_secret, elements })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_ff::{BigInteger, PrimeField};
    use crate::oracle::assembler::tests::sample_params;
    use crate::oracle::WitnessAssembler;

    fn sample_witness() -> Witness {
        let (assignment, _) = WitnessAssembler::default().assemble(&sample_params()).unwrap();
        Witness::from_assignment(&assignment).unwrap()
    }

    #[test]
    fn test_public_first_then_secret() {
        let witness = sample_witness();
        let (assignment, skeleton) = WitnessAssembler::default().assemble(&sample_params()).unwrap();
        let schema = skeleton.schema();

        assert_eq!(witness.nb_public(), schema.nb_public());
        assert_eq!(witness.nb_secret(), 64 + 48);
        assert_eq!(witness.public_values()[..32], assignment.intermediate_hash_hs_opad[..]);
        // Secret part starts with the padded handshake secret
        assert_eq!(witness.secret_values()[..64], assignment.derived_handshake_secret_in[..]);
        assert_eq!(*witness.public_values().last().unwrap(), assignment.threshold);
    }

    #[test]
    fn test_public_roundtrip() {
        let witness = sample_witness();
        let public = witness.public();
        let bytes = public.to_bytes().unwrap();

        assert_eq!(&bytes[4..8], &[0, 0, 0, 0]);
        assert_eq!(bytes.len(), 12 + public.len() * 32);

        let decoded = Witness::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.public_values(), witness.public_values());
        assert_eq!(decoded, public);
    }

    #[test]
    fn test_full_roundtrip() {
        let witness = sample_witness();
        assert_eq!(Witness::from_bytes(&witness.to_bytes().unwrap()).unwrap(), witness);
    }

    #[test]
    fn test_decode_errors() {
        let bytes = Witness::new(vec![Fr::from(7u64)], vec![]).unwrap().to_bytes().unwrap();

        assert!(matches!(Witness::from_bytes(&bytes[..10]), Err(WitnessError::Truncated { .. })));
        assert!(matches!(Witness::from_bytes(&bytes[..40]), Err(WitnessError::Truncated { .. })));

        let mut long = bytes.clone();
        long.push(0);
        assert_eq!(Witness::from_bytes(&long), Err(WitnessError::TrailingBytes(1)));

        let mut mismatched = bytes.clone();
        mismatched[3] = 2;
        assert!(matches!(Witness::from_bytes(&mismatched), Err(WitnessError::CountMismatch { .. })));

        let mut unreduced = bytes;
        unreduced[12..].copy_from_slice(&Fr::MODULUS.to_bytes_be());
        assert_eq!(Witness::from_bytes(&unreduced), Err(WitnessError::NonCanonical(0)));
    }
}
