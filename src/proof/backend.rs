//! Proving Backends
//!
//! The circuit is compiled and keyed by an external setup stage; this crate
//! only hands the artifacts and the witness to a [`ProvingBackend`]. Only
//! Groth16 has a prover ([`Groth16Prover`](super::groth16::Groth16Prover)).

use std::fmt;
use std::str::FromStr;

use crate::proof::witness::Witness;

/// Proof system selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// Groth16 over BN254.
    Groth16,
    /// PLONK with KZG commitments.
    Plonk,
    /// PLONK with FRI commitments.
    PlonkFri,
}

impl Backend {
    /// Every backend name the CLI accepts.
    pub const ALL: [Backend; 3] = [Backend::Groth16, Backend::Plonk, Backend::PlonkFri];

    /// Name used in artifact file names.
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Groth16 => "groth16",
            Backend::Plonk => "plonk",
            Backend::PlonkFri => "plonkFRI",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = BackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Backend::ALL
            .iter()
            .copied()
            .find(|b| b.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| BackendError::UnknownBackend(s.to_string()))
    }
}

/// Backend artifact file kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    /// Compiled constraint system.
    ConstraintSystem,
    /// Proving key.
    ProvingKey,
    /// Verifying key.
    VerifyingKey,
    /// Structured reference string.
    Srs,
    /// Generated proof.
    Proof,
}

impl ArtifactKind {
    /// File extension.
    pub fn extension(&self) -> &'static str {
        match self {
            ArtifactKind::ConstraintSystem => "ccs",
            ArtifactKind::ProvingKey => "pk",
            ArtifactKind::VerifyingKey => "vk",
            ArtifactKind::Srs => "srs",
            ArtifactKind::Proof => "proof",
        }
    }
}

/// Errors from a proving backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Name is not a known backend.
    UnknownBackend(String),

    /// Artifact present but unusable.
    InvalidArtifact {
        /// Artifact involved.
        kind: ArtifactKind,
        /// Why it was rejected.
        reason: String,
    },

    /// Witness does not fit the constraint system.
    WitnessMismatch(String),

    /// The prover itself failed.
    ProvingFailed(String),
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownBackend(name) => {
                write!(f, "Unknown backend {:?} (expected groth16, plonk or plonkFRI)", name)
            }
            Self::InvalidArtifact { kind, reason } => {
                write!(f, "Invalid .{} artifact: {}", kind.extension(), reason)
            }
            Self::WitnessMismatch(msg) => write!(f, "Witness mismatch: {}", msg),
            Self::ProvingFailed(msg) => write!(f, "Proving failed: {}", msg),
        }
    }
}

impl std::error::Error for BackendError {}

/// A proof system able to prove the oracle circuit.
pub trait ProvingBackend: Send + Sync {
    /// Prove `witness` against a constraint system and proving key.
    fn prove(&self, constraints: &[u8], proving_key: &[u8], witness: &Witness) -> Result<Vec<u8>, BackendError>;
}

// =============================================================================
// Test double
// =============================================================================

/// Prover that commits to its inputs without proving anything.
#[cfg(test)]
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct StubProver;

#[cfg(test)]
impl ProvingBackend for StubProver {
    fn prove(&self, constraints: &[u8], proving_key: &[u8], witness: &Witness) -> Result<Vec<u8>, BackendError> {
        use crate::core::DomainHasher;

        if constraints.is_empty() {
            return Err(BackendError::InvalidArtifact {
                kind: ArtifactKind::ConstraintSystem,
                reason: "empty".into(),
            });
        }
        if proving_key.is_empty() {
            return Err(BackendError::InvalidArtifact {
                kind: ArtifactKind::ProvingKey,
                reason: "empty".into(),
            });
        }
        let encoded = witness
            .to_bytes()
            .map_err(|e| BackendError::WitnessMismatch(e.to_string()))?;

        let mut hasher = DomainHasher::new(b"ORACLE_STUB_PROOF_V1");
        hasher.update_prefixed(constraints);
        hasher.update_prefixed(proving_key);
        hasher.update_prefixed(&encoded);
        Ok(hasher.finalize().to_vec())
    }
}
