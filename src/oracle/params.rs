//! Oracle Parameter Loader
//!
//! Merges the five parameter documents into one validated map:
//!
//! ```text
//! kdc_public_input.json ─────────┐
//! kdc_private_input.json ────────┤
//! recorddata_public_input.json ──┼──► OracleParameters
//! recordtag_public_input.json[i] ┤      (every ParamField, decodable)
//! recorddata_private_input.json ─┘
//! ```
//!
//! Each field has exactly one home document. A key seen twice, or a field
//! found outside its home document, is rejected instead of overwritten.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::store::{ArtifactStore, StoreError};

/// Parameter loading and decoding errors.
#[derive(Debug, Error)]
pub enum ParamsError {
    /// Document missing or not valid JSON.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Required field absent from its home document.
    #[error("missing field {field} (expected in {source_document})")]
    MissingField {
        /// Missing field.
        field: ParamField,
        /// Where it should have been.
        source_document: ParamSource,
    },

    /// Same key in two documents.
    #[error("field {key} appears in both {first} and {second}")]
    DuplicateField {
        /// Duplicated key.
        key: String,
        /// Document seen first.
        first: ParamSource,
        /// Document seen second.
        second: ParamSource,
    },

    /// Known field in a document that does not own it.
    #[error("field {field} found in {found}, belongs in {expected}")]
    MisplacedField {
        /// Field involved.
        field: ParamField,
        /// Document it was found in.
        found: ParamSource,
        /// Its home document.
        expected: ParamSource,
    },

    /// Value does not decode under the field's encoding.
    #[error("field {field} is not valid {encoding}: {reason}")]
    InvalidField {
        /// Field involved.
        field: ParamField,
        /// Expected encoding.
        encoding: ParamEncoding,
        /// Decoder message.
        reason: String,
    },

    /// `record_index` beyond the tag-record sequence.
    #[error("record_index {index} out of range ({len} tag records)")]
    RecordIndexOutOfRange {
        /// Requested index.
        index: u64,
        /// Tag records available.
        len: usize,
    },
}

// =============================================================================
// SOURCES AND FIELDS
// =============================================================================

/// The five parameter documents, in read order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ParamSource {
    /// Public key-derivation inputs.
    KdcPublic,
    /// Private key-derivation inputs.
    KdcPrivate,
    /// Public record data.
    RecordPublic,
    /// Public tag data, one element per record.
    RecordTagPublic,
    /// Private record data.
    RecordPrivate,
}

impl ParamSource {
    /// Document file name.
    pub fn file_name(&self) -> &'static str {
        match self {
            ParamSource::KdcPublic => "kdc_public_input.json",
            ParamSource::KdcPrivate => "kdc_private_input.json",
            ParamSource::RecordPublic => "recorddata_public_input.json",
            ParamSource::RecordTagPublic => "recordtag_public_input.json",
            ParamSource::RecordPrivate => "recorddata_private_input.json",
        }
    }

    /// Private documents never leave the prover.
    pub fn is_private(&self) -> bool {
        matches!(self, ParamSource::KdcPrivate | ParamSource::RecordPrivate)
    }
}

impl fmt::Display for ParamSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_name())
    }
}

/// How a field's string value maps to bytes or an integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamEncoding {
    /// Hex byte string.
    Hex,
    /// Decimal unsigned integer.
    Decimal,
    /// Raw text, taken as its UTF-8 bytes.
    Text,
}

impl fmt::Display for ParamEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamEncoding::Hex => f.write_str("hex"),
            ParamEncoding::Decimal => f.write_str("decimal"),
            ParamEncoding::Text => f.write_str("text"),
        }
    }
}

/// Every parameter the witness needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[allow(missing_docs)]
pub enum ParamField {
    IntermediateHashHsOpad,
    MasterSecretIn,
    ApplicationTrafficSecretIn,
    TrafficKeyIn,
    DerivedHandshakeSecretIn,
    RecordIndex,
    Iv,
    CipherChunks,
    ChunkIndex,
    Substring,
    SubstringStart,
    SubstringEnd,
    ValueStart,
    ValueEnd,
    Ecb0,
    Ecb1,
    PlainChunks,
}

impl ParamField {
    /// All fields.
    pub const ALL: [ParamField; 17] = [
        ParamField::IntermediateHashHsOpad,
        ParamField::MasterSecretIn,
        ParamField::ApplicationTrafficSecretIn,
        ParamField::TrafficKeyIn,
        ParamField::DerivedHandshakeSecretIn,
        ParamField::RecordIndex,
        ParamField::Iv,
        ParamField::CipherChunks,
        ParamField::ChunkIndex,
        ParamField::Substring,
        ParamField::SubstringStart,
        ParamField::SubstringEnd,
        ParamField::ValueStart,
        ParamField::ValueEnd,
        ParamField::Ecb0,
        ParamField::Ecb1,
        ParamField::PlainChunks,
    ];

    /// JSON key.
    pub fn key(&self) -> &'static str {
        match self {
            ParamField::IntermediateHashHsOpad => "intermediateHashHSopad",
            ParamField::MasterSecretIn => "MSin",
            ParamField::ApplicationTrafficSecretIn => "SATSin",
            ParamField::TrafficKeyIn => "tkSAPPin",
            ParamField::DerivedHandshakeSecretIn => "dHSin",
            ParamField::RecordIndex => "record_index",
            ParamField::Iv => "IV",
            ParamField::CipherChunks => "cipher_chunks",
            ParamField::ChunkIndex => "chunk_index",
            ParamField::Substring => "substring",
            ParamField::SubstringStart => "substring_start",
            ParamField::SubstringEnd => "substring_end",
            ParamField::ValueStart => "value_start",
            ParamField::ValueEnd => "value_end",
            ParamField::Ecb0 => "ECB0",
            ParamField::Ecb1 => "ECB1",
            ParamField::PlainChunks => "plain_chunks",
        }
    }

    /// Look up a field by JSON key.
    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|f| f.key() == key)
    }

    /// The document that owns this field.
    pub fn source(&self) -> ParamSource {
        use ParamField::*;
        match self {
            IntermediateHashHsOpad | MasterSecretIn | ApplicationTrafficSecretIn | TrafficKeyIn => {
                ParamSource::KdcPublic
            }
            DerivedHandshakeSecretIn => ParamSource::KdcPrivate,
            RecordIndex | Iv | CipherChunks | ChunkIndex | Substring | SubstringStart | SubstringEnd
            | ValueStart | ValueEnd => ParamSource::RecordPublic,
            Ecb0 | Ecb1 => ParamSource::RecordTagPublic,
            PlainChunks => ParamSource::RecordPrivate,
        }
    }

    /// Value encoding.
    pub fn encoding(&self) -> ParamEncoding {
        use ParamField::*;
        match self {
            RecordIndex | ChunkIndex | SubstringStart | SubstringEnd | ValueStart | ValueEnd => {
                ParamEncoding::Decimal
            }
            Substring => ParamEncoding::Text,
            _ => ParamEncoding::Hex,
        }
    }
}

impl fmt::Display for ParamField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

// =============================================================================
// PARAMETERS
// =============================================================================

/// Merged parameter map.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct OracleParameters {
    values: BTreeMap<ParamField, String>,
}

impl OracleParameters {
    /// Empty parameter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field's raw value.
    pub fn insert(&mut self, field: ParamField, value: impl Into<String>) {
        self.values.insert(field, value.into());
    }

    /// Raw value of a field.
    pub fn get(&self, field: ParamField) -> Option<&str> {
        self.values.get(&field).map(String::as_str)
    }

    fn require(&self, field: ParamField) -> Result<&str, ParamsError> {
        self.get(field).ok_or(ParamsError::MissingField {
            field,
            source_document: field.source(),
        })
    }

    fn invalid(field: ParamField, reason: impl fmt::Display) -> ParamsError {
        ParamsError::InvalidField {
            field,
            encoding: field.encoding(),
            reason: reason.to_string(),
        }
    }

    /// Decoded bytes of a hex or text field.
    pub fn bytes(&self, field: ParamField) -> Result<Vec<u8>, ParamsError> {
        let raw = self.require(field)?;
        match field.encoding() {
            ParamEncoding::Hex => hex::decode(raw).map_err(|e| Self::invalid(field, e)),
            ParamEncoding::Text => Ok(raw.as_bytes().to_vec()),
            ParamEncoding::Decimal => Err(Self::invalid(field, "integer field read as bytes")),
        }
    }

    /// Parsed value of a decimal field.
    pub fn integer(&self, field: ParamField) -> Result<u64, ParamsError> {
        let raw = self.require(field)?;
        match field.encoding() {
            ParamEncoding::Decimal => raw.trim().parse().map_err(|e| Self::invalid(field, e)),
            _ => Err(Self::invalid(field, "byte field read as integer")),
        }
    }

    /// Check every field is present and decodes under its encoding.
    pub fn validate(&self) -> Result<(), ParamsError> {
        for field in ParamField::ALL {
            match field.encoding() {
                ParamEncoding::Decimal => self.integer(field).map(|_| ())?,
                ParamEncoding::Hex | ParamEncoding::Text => self.bytes(field).map(|_| ())?,
            }
        }
        Ok(())
    }
}

impl fmt::Debug for OracleParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (field, value) in &self.values {
            if field.source().is_private() {
                map.entry(&field.key(), &"[REDACTED]");
            } else {
                map.entry(&field.key(), value);
            }
        }
        map.finish()
    }
}

// =============================================================================
// LOADER
// =============================================================================

type Document = BTreeMap<String, Value>;

/// Reads and merges the parameter documents from an [`ArtifactStore`].
#[derive(Debug, Clone, Copy)]
pub struct ParameterLoader<'a> {
    store: &'a ArtifactStore,
}

impl<'a> ParameterLoader<'a> {
    /// Loader over `store`'s storage directory.
    pub fn new(store: &'a ArtifactStore) -> Self {
        Self { store }
    }

    /// Load, merge and validate all five documents.
    pub fn load_parameters(&self) -> Result<OracleParameters, ParamsError> {
        let mut merger = Merger::default();

        merger.merge(ParamSource::KdcPublic, self.store.read_document(ParamSource::KdcPublic.file_name())?)?;
        merger.merge(ParamSource::KdcPrivate, self.store.read_document(ParamSource::KdcPrivate.file_name())?)?;
        merger.merge(
            ParamSource::RecordPublic,
            self.store.read_document(ParamSource::RecordPublic.file_name())?,
        )?;

        let index = merger.params.integer(ParamField::RecordIndex)?;
        let mut tags: Vec<Document> = self.store.read_document(ParamSource::RecordTagPublic.file_name())?;
        let len = tags.len();
        let tag = usize::try_from(index)
            .ok()
            .filter(|&i| i < len)
            .map(|i| tags.swap_remove(i))
            .ok_or(ParamsError::RecordIndexOutOfRange { index, len })?;
        debug!("Selected tag record {} of {}", index, len);
        merger.merge(ParamSource::RecordTagPublic, tag)?;

        merger.merge(
            ParamSource::RecordPrivate,
            self.store.read_document(ParamSource::RecordPrivate.file_name())?,
        )?;

        let params = merger.params;
        params.validate()?;
        info!("Loaded {} oracle parameters", ParamField::ALL.len());
        Ok(params)
    }
}

#[derive(Default)]
struct Merger {
    params: OracleParameters,
    seen: BTreeMap<String, ParamSource>,
}

impl Merger {
    fn merge(&mut self, source: ParamSource, document: Document) -> Result<(), ParamsError> {
        for (key, value) in document {
            if let Some(&first) = self.seen.get(&key) {
                return Err(ParamsError::DuplicateField { key, first, second: source });
            }
            self.seen.insert(key.clone(), source);

            let field = match ParamField::from_key(&key) {
                Some(field) => field,
                None => {
                    warn!("Ignoring unknown parameter {} in {}", key, source);
                    continue;
                }
            };

            if field.source() != source {
                return Err(ParamsError::MisplacedField { field, found: source, expected: field.source() });
            }

            let value = match value {
                Value::String(s) => s,
                Value::Number(n) if n.is_u64() => n.to_string(),
                other => return Err(OracleParameters::invalid(field, format!("unexpected JSON value {}", other))),
            };
            self.params.insert(field, value);
        }
        Ok(())
    }
}
