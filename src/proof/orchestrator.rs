//! Proof Orchestrator
//!
//! assignment → field witness → public witness → prove → persist.
//! Nothing is written unless proving succeeds.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, info, warn};

use super::backend::{ArtifactKind, Backend, BackendError, ProvingBackend};
use super::witness::{Witness, WitnessError};
use crate::core::{Digest, DomainHasher};
use crate::oracle::{OracleAssignment, WitnessSchema};
use crate::store::{ArtifactStore, StoreError};

/// Proof generation errors. None are retried.
#[derive(Debug, Error)]
pub enum ProveError {
    /// Backend enumerated but not implemented.
    #[error("backend {0} is not supported")]
    UnsupportedBackend(Backend),

    /// Supported backend with no prover registered.
    #[error("no prover registered for backend {0}")]
    BackendNotRegistered(Backend),

    /// Witness could not be built.
    #[error("witness: {0}")]
    Witness(#[from] WitnessError),

    /// Backend artifact missing or unreadable.
    #[error("{kind:?} artifact: {source}")]
    Artifact {
        /// Artifact involved.
        kind: ArtifactKind,
        /// Underlying error.
        #[source]
        source: StoreError,
    },

    /// Backend rejected its inputs or failed.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Outputs could not be written.
    #[error("persist outputs: {0}")]
    Persist(#[source] StoreError),
}

/// Files produced by a successful proof.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofOutput {
    /// Backend used.
    pub backend: Backend,
    /// Serialized proof.
    pub proof_path: PathBuf,
    /// Serialized public witness.
    pub public_witness_path: PathBuf,
    /// Public element count.
    pub nb_public: usize,
    /// Proof size in bytes.
    pub proof_len: usize,
    /// Digest of backend name and public witness bytes.
    pub public_digest: Digest,
}

/// Runs proofs against backend artifacts in an [`ArtifactStore`].
pub struct ProofOrchestrator {
    store: ArtifactStore,
    provers: HashMap<Backend, Box<dyn ProvingBackend>>,
}

impl fmt::Debug for ProofOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registered: Vec<Backend> = self.provers.keys().copied().collect();
        f.debug_struct("ProofOrchestrator")
            .field("store", &self.store)
            .field("registered", &registered)
            .finish()
    }
}

impl ProofOrchestrator {
    /// Orchestrator with no provers registered.
    pub fn new(store: ArtifactStore) -> Self {
        Self { store, provers: HashMap::new() }
    }

    /// Register `prover` for `backend`.
    pub fn with_backend(mut self, backend: Backend, prover: impl ProvingBackend + 'static) -> Self {
        self.provers.insert(backend, Box::new(prover));
        self
    }

    /// Prove `assignment` with `backend` and persist the outputs.
    pub fn compute_proof(&self, backend: Backend, assignment: &OracleAssignment) -> Result<ProofOutput, ProveError> {
        match backend {
            Backend::Groth16 | Backend::Plonk => {}
            Backend::PlonkFri => return Err(ProveError::UnsupportedBackend(backend)),
        }
        let prover = self
            .provers
            .get(&backend)
            .ok_or(ProveError::BackendNotRegistered(backend))?;

        let witness = Witness::from_assignment(assignment)?;
        let public_bytes = witness.public().to_bytes()?;
        log_public_witness(&assignment.schema(), &public_bytes);

        let constraints = self.read_artifact(backend, ArtifactKind::ConstraintSystem)?;
        let proving_key = self.read_artifact(backend, ArtifactKind::ProvingKey)?;

        info!(
            "Proving with {} ({} public, {} secret elements)",
            backend,
            witness.nb_public(),
            witness.nb_secret()
        );
        let proof = prover.prove(&constraints, &proving_key, &witness)?;

        let public_witness_path = self.store.public_witness_path();
        let proof_path = self.store.proof_path(backend);
        self.store
            .write_outputs(&[
                (public_witness_path.as_path(), public_bytes.as_slice()),
                (proof_path.as_path(), proof.as_slice()),
            ])
            .map_err(ProveError::Persist)?;

        let public_digest = public_digest(backend, &public_bytes);
        info!(
            "Proof written to {} ({} bytes), public digest {}",
            proof_path.display(),
            proof.len(),
            hex::encode(public_digest)
        );

        Ok(ProofOutput {
            backend,
            proof_path,
            public_witness_path,
            nb_public: witness.nb_public(),
            proof_len: proof.len(),
            public_digest,
        })
    }

    fn read_artifact(&self, backend: Backend, kind: ArtifactKind) -> Result<Vec<u8>, ProveError> {
        self.store
            .read_backend_artifact(backend, kind)
            .map_err(|source| ProveError::Artifact { kind, source })
    }
}

fn public_digest(backend: Backend, public_bytes: &[u8]) -> Digest {
    let mut hasher = DomainHasher::new(b"ORACLE_PUBWIT_V1");
    hasher.update_prefixed(backend.as_str().as_bytes());
    hasher.update_prefixed(public_bytes);
    hasher.finalize()
}

/// Round-trip the public witness and log it against the schema.
fn log_public_witness(schema: &WitnessSchema, bytes: &[u8]) {
    let decoded = match Witness::from_bytes(bytes) {
        Ok(witness) => witness,
        Err(e) => {
            warn!("Public witness did not round-trip: {}", e);
            return;
        }
    };
    match schema.public_to_json(decoded.public_values()) {
        Ok(json) => debug!("Public witness: {}", json),
        Err(e) => warn!("Public witness does not match schema: {}", e),
    }
}
