//! Session Artifact Store
//!
//! File-system layout shared by every stage of the pipeline:
//!
//! ```text
//! <storage>/session_params_13.json          secret map + record map
//! <storage>/kdc_public_input.json           parameter documents
//! <storage>/...
//! <circuits>/<id>_<backend>.{ccs,pk,vk,srs} backend artifacts (read-only)
//! <circuits>/<id>.pubwit                    public witness (output)
//! <circuits>/<id>_<backend>.proof           proof (output)
//! ```
//!
//! Outputs are staged as temporary files next to their destination and
//! renamed into place only once every output has been written.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

use crate::config::OracleConfig;
use crate::proof::backend::{ArtifactKind, Backend};
use crate::session::SessionArtifacts;

/// Session document file name.
pub const SESSION_DOCUMENT: &str = "session_params_13.json";

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// File could not be read, written or renamed.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// Document is not valid JSON for its expected shape.
    #[error("invalid JSON in {path}: {source}")]
    Json {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    fn io(path: &Path, source: io::Error) -> Self {
        StoreError::Io { path: path.to_path_buf(), source }
    }

    /// True if the error is a missing file.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::Io { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}

/// Paths and I/O for session artifacts, parameters and proof outputs.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    storage_dir: PathBuf,
    circuits_dir: PathBuf,
    circuit_id: String,
}

impl ArtifactStore {
    /// Create a store over explicit directories.
    pub fn new(storage_dir: impl Into<PathBuf>, circuits_dir: impl Into<PathBuf>, circuit_id: impl Into<String>) -> Self {
        Self {
            storage_dir: storage_dir.into(),
            circuits_dir: circuits_dir.into(),
            circuit_id: circuit_id.into(),
        }
    }

    /// Create a store from configuration.
    pub fn from_config(config: &OracleConfig) -> Self {
        Self::new(&config.storage_dir, &config.circuits_dir, config.circuit_id.as_str())
    }

    /// Storage directory.
    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    // =========================================================================
    // Session
    // =========================================================================

    /// Path of the session document.
    pub fn session_path(&self) -> PathBuf {
        self.storage_dir.join(SESSION_DOCUMENT)
    }

    /// Persist a session's artifacts.
    pub fn save_session(&self, artifacts: &SessionArtifacts) -> Result<PathBuf, StoreError> {
        self.write_document(SESSION_DOCUMENT, artifacts)
    }

    /// Load a persisted session.
    pub fn load_session(&self) -> Result<SessionArtifacts, StoreError> {
        self.read_document(SESSION_DOCUMENT)
    }

    // =========================================================================
    // Documents
    // =========================================================================

    /// Read and parse a JSON document from the storage directory.
    pub fn read_document<T: DeserializeOwned>(&self, name: &str) -> Result<T, StoreError> {
        let path = self.storage_dir.join(name);
        let bytes = fs::read(&path).map_err(|e| StoreError::io(&path, e))?;
        serde_json::from_slice(&bytes).map_err(|source| StoreError::Json { path, source })
    }

    /// Write a JSON document into the storage directory.
    pub fn write_document<T: Serialize>(&self, name: &str, value: &T) -> Result<PathBuf, StoreError> {
        let path = self.storage_dir.join(name);
        let json = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Json {
            path: path.clone(),
            source,
        })?;
        fs::create_dir_all(&self.storage_dir).map_err(|e| StoreError::io(&self.storage_dir, e))?;
        write_staged(&[(path.as_path(), json.as_slice())])?;
        Ok(path)
    }

    // =========================================================================
    // Backend artifacts and outputs
    // =========================================================================

    /// `<circuits>/<id>_<backend>.<ext>`.
    pub fn backend_artifact_path(&self, backend: Backend, kind: ArtifactKind) -> PathBuf {
        self.circuits_dir
            .join(format!("{}_{}.{}", self.circuit_id, backend.as_str(), kind.extension()))
    }

    /// Read a backend artifact.
    pub fn read_backend_artifact(&self, backend: Backend, kind: ArtifactKind) -> Result<Vec<u8>, StoreError> {
        let path = self.backend_artifact_path(backend, kind);
        let bytes = fs::read(&path).map_err(|e| StoreError::io(&path, e))?;
        debug!("Loaded {} ({} bytes)", path.display(), bytes.len());
        Ok(bytes)
    }

    /// `<circuits>/<id>.pubwit`.
    pub fn public_witness_path(&self) -> PathBuf {
        self.circuits_dir.join(format!("{}.pubwit", self.circuit_id))
    }

    /// `<circuits>/<id>_<backend>.proof`.
    pub fn proof_path(&self, backend: Backend) -> PathBuf {
        self.backend_artifact_path(backend, ArtifactKind::Proof)
    }

    /// Write several outputs so that either all of them land or none do
    /// (barring a failure between renames).
    pub fn write_outputs(&self, outputs: &[(&Path, &[u8])]) -> Result<(), StoreError> {
        fs::create_dir_all(&self.circuits_dir).map_err(|e| StoreError::io(&self.circuits_dir, e))?;
        write_staged(outputs)
    }
}

fn write_staged(outputs: &[(&Path, &[u8])]) -> Result<(), StoreError> {
    let mut staged = Vec::with_capacity(outputs.len());

    for (path, bytes) in outputs {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut file = NamedTempFile::new_in(dir).map_err(|e| StoreError::io(path, e))?;
        file.write_all(bytes).map_err(|e| StoreError::io(path, e))?;
        file.as_file().sync_all().map_err(|e| StoreError::io(path, e))?;
        staged.push((file, *path));
    }

    for (file, path) in staged {
        file.persist(path).map_err(|e| StoreError::io(path, e.error))?;
        debug!("Wrote {}", path.display());
    }

    Ok(())
}
