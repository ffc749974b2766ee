//! Crate-wide error type.

use thiserror::Error;

use crate::config::ConfigError;
use crate::oracle::{AssemblyError, ParamsError};
use crate::proof::{BackendError, ProveError, WitnessError};
use crate::session::{CaptureError, HttpError, SessionError};
use crate::store::StoreError;

/// Coarse error classes reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad configuration, missing or malformed files and documents.
    Input,
    /// Network or TLS failure during the session.
    Protocol,
    /// Witness, backend artifact or prover failure.
    Proving,
}

/// Any error the pipeline can produce.
#[derive(Debug, Error)]
pub enum OracleError {
    /// Configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Artifact store.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Parameter loading.
    #[error(transparent)]
    Params(#[from] ParamsError),

    /// Witness assembly.
    #[error(transparent)]
    Assembly(#[from] AssemblyError),

    /// Session capture.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Field witness.
    #[error(transparent)]
    Witness(#[from] WitnessError),

    /// Proving backend.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Proof orchestration.
    #[error(transparent)]
    Prove(#[from] ProveError),
}

impl From<CaptureError> for OracleError {
    fn from(e: CaptureError) -> Self {
        OracleError::Session(SessionError::Capture(e))
    }
}

impl From<HttpError> for OracleError {
    fn from(e: HttpError) -> Self {
        OracleError::Session(SessionError::Response(e))
    }
}

impl OracleError {
    /// Classify the error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            OracleError::Config(_) | OracleError::Store(_) | OracleError::Params(_) => ErrorCategory::Input,
            OracleError::Assembly(e) => match e {
                AssemblyError::Param(_) => ErrorCategory::Input,
                _ => ErrorCategory::Proving,
            },
            OracleError::Session(e) => match e {
                SessionError::Config(_) | SessionError::Certificate(_) | SessionError::Store(_) => {
                    ErrorCategory::Input
                }
                SessionError::Response(_) | SessionError::Capture(_) => ErrorCategory::Input,
                SessionError::Connect { .. }
                | SessionError::Handshake(_)
                | SessionError::Write(_)
                | SessionError::Flush(_)
                | SessionError::Read(_)
                | SessionError::Timeout { .. } => ErrorCategory::Protocol,
            },
            OracleError::Witness(_) | OracleError::Backend(_) => ErrorCategory::Proving,
            OracleError::Prove(e) => match e {
                ProveError::Persist(_) => ErrorCategory::Input,
                _ => ErrorCategory::Proving,
            },
        }
    }
}
