//! Succinct Proof Generation
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    PROOF PIPELINE                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  witness.rs      - BN254 witness vector + binary encoding   │
//! │  backend.rs      - Backend selector, ProvingBackend trait   │
//! │  groth16.rs      - R1CS artifact format, Groth16 prover     │
//! │  orchestrator.rs - Artifacts in, proof + public witness out │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod backend;
pub mod groth16;
pub mod orchestrator;
pub mod witness;

// Re-export key types
pub use backend::{ArtifactKind, Backend, BackendError, ProvingBackend};
pub use groth16::{Constraint, Groth16Prover, R1cs, R1csCircuit, Term};
pub use orchestrator::{ProofOrchestrator, ProofOutput, ProveError};
pub use witness::{Witness, WitnessError};
