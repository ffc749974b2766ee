//! # TLS Oracle
//!
//! Captures a TLS session to a web origin and proves, in zero knowledge, that
//! a value inside the decrypted response satisfies a numeric threshold.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        TLS ORACLE                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Byte-exact primitives                    │
//! │  ├── field.rs    - BN254 scalar encoding                    │
//! │  ├── hash.rs     - SHA-256 padding, domain hashing          │
//! │  └── hex_bytes.rs- Hex strings in JSON documents            │
//! │                                                             │
//! │  session/        - TLS capture (network)                    │
//! │  ├── driver.rs   - Handshake + one GET, per-step deadlines  │
//! │  ├── capture.rs  - Key log and transport tap                │
//! │  └── record.rs   - Record map reconstruction                │
//! │                                                             │
//! │  store.rs        - Session, parameter and artifact files    │
//! │                                                             │
//! │  oracle/         - Witness inputs                           │
//! │  ├── params.rs   - Five documents → OracleParameters        │
//! │  ├── assembler.rs- Counter block, padding, capacities       │
//! │  └── schema.rs   - Field order and visibility               │
//! │                                                             │
//! │  proof/          - Proving                                  │
//! │  ├── witness.rs  - Field witness, public split, encoding    │
//! │  ├── backend.rs  - groth16 | plonk | plonkFRI               │
//! │  ├── groth16.rs  - R1CS replay, arkworks Groth16 prover     │
//! │  └── orchestrator.rs - Prove and persist                    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Pipeline
//!
//! Driver → Artifact Store → Loader → Assembler → Orchestrator → proof file.
//! Each stage reads what the previous one wrote; there is no shared state
//! between proof requests.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod core;
pub mod error;
pub mod oracle;
pub mod proof;
pub mod session;
pub mod store;

// Re-export commonly used types
pub use config::OracleConfig;
pub use error::{ErrorCategory, OracleError};
pub use oracle::{OracleAssignment, OracleParameters, ParameterLoader, WitnessAssembler};
pub use proof::{Backend, Groth16Prover, ProofOrchestrator, ProofOutput};
pub use session::{SessionArtifacts, SessionConfig, SessionDriver};
pub use store::ArtifactStore;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
