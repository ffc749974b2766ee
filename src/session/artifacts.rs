//! Session Artifacts
//!
//! Strongly-typed secret map and record map produced by a completed session,
//! plus their on-disk document form:
//!
//! ```text
//! {
//!   "keys":        { "<SECRET_NAME>": "<hex>", ... },
//!   "client-0000": { "typ": "handshake", "additionalData": "<hex>",
//!                    "payload": "<hex>", "ciphertext": "<hex>" },
//!   ...
//! }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroizing;

use crate::core::HexBytes;

/// Errors parsing typed session identifiers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ArtifactError {
    /// Key-log label not recognised.
    #[error("unknown secret name: {0}")]
    UnknownSecret(String),

    /// Record identifier not of the form `client-N` / `server-N`.
    #[error("invalid record id: {0}")]
    InvalidRecordId(String),

    /// TLS content type byte not defined for TLS 1.2/1.3.
    #[error("unknown TLS content type: {0}")]
    UnknownContentType(u8),

    /// A TLS 1.3 key-schedule secret the circuit consumes was not exported.
    #[error("key schedule incomplete: {0} was not exported by the TLS stack")]
    KeyScheduleIncomplete(SecretName),
}

// =============================================================================
// SECRETS
// =============================================================================

/// Named secrets exported by the TLS stack (NSS key-log labels).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SecretName {
    /// TLS 1.2 master secret.
    #[serde(rename = "CLIENT_RANDOM")]
    MasterSecret,
    /// TLS 1.3 client early traffic secret (0-RTT).
    #[serde(rename = "CLIENT_EARLY_TRAFFIC_SECRET")]
    ClientEarlyTrafficSecret,
    /// TLS 1.3 early exporter secret.
    #[serde(rename = "EARLY_EXPORTER_SECRET")]
    EarlyExporterSecret,
    /// TLS 1.3 handshake secret (HKDF-Extract over the ECDHE share).
    #[serde(rename = "HANDSHAKE_SECRET")]
    HandshakeSecret,
    /// TLS 1.3 client handshake traffic secret.
    #[serde(rename = "CLIENT_HANDSHAKE_TRAFFIC_SECRET")]
    ClientHandshakeTrafficSecret,
    /// TLS 1.3 server handshake traffic secret.
    #[serde(rename = "SERVER_HANDSHAKE_TRAFFIC_SECRET")]
    ServerHandshakeTrafficSecret,
    /// TLS 1.3 initial client application traffic secret.
    #[serde(rename = "CLIENT_TRAFFIC_SECRET_0")]
    ClientTrafficSecret0,
    /// TLS 1.3 initial server application traffic secret.
    #[serde(rename = "SERVER_TRAFFIC_SECRET_0")]
    ServerTrafficSecret0,
    /// TLS 1.3 exporter secret.
    #[serde(rename = "EXPORTER_SECRET")]
    ExporterSecret,
}

impl SecretName {
    /// Every recognised secret, in key-schedule order.
    pub const ALL: [SecretName; 9] = [
        SecretName::MasterSecret,
        SecretName::ClientEarlyTrafficSecret,
        SecretName::EarlyExporterSecret,
        SecretName::HandshakeSecret,
        SecretName::ClientHandshakeTrafficSecret,
        SecretName::ServerHandshakeTrafficSecret,
        SecretName::ClientTrafficSecret0,
        SecretName::ServerTrafficSecret0,
        SecretName::ExporterSecret,
    ];

    /// Key-log label.
    pub fn label(&self) -> &'static str {
        match self {
            SecretName::MasterSecret => "CLIENT_RANDOM",
            SecretName::ClientEarlyTrafficSecret => "CLIENT_EARLY_TRAFFIC_SECRET",
            SecretName::EarlyExporterSecret => "EARLY_EXPORTER_SECRET",
            SecretName::HandshakeSecret => "HANDSHAKE_SECRET",
            SecretName::ClientHandshakeTrafficSecret => "CLIENT_HANDSHAKE_TRAFFIC_SECRET",
            SecretName::ServerHandshakeTrafficSecret => "SERVER_HANDSHAKE_TRAFFIC_SECRET",
            SecretName::ClientTrafficSecret0 => "CLIENT_TRAFFIC_SECRET_0",
            SecretName::ServerTrafficSecret0 => "SERVER_TRAFFIC_SECRET_0",
            SecretName::ExporterSecret => "EXPORTER_SECRET",
        }
    }
}

impl fmt::Display for SecretName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for SecretName {
    type Err = ArtifactError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SecretName::ALL
            .iter()
            .copied()
            .find(|name| name.label() == s)
            .ok_or_else(|| ArtifactError::UnknownSecret(s.to_string()))
    }
}

/// Raw secret bytes, wiped on drop and never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretBytes(Zeroizing<Vec<u8>>);

impl SecretBytes {
    /// Wrap secret bytes.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(Zeroizing::new(bytes))
    }

    /// Borrow the secret.
    #[inline]
    pub fn expose(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretBytes([REDACTED; {}])", self.0.len())
    }
}

/// Secret name → secret bytes.
pub type SecretMap = BTreeMap<SecretName, SecretBytes>;

// =============================================================================
// RECORDS
// =============================================================================

/// Which peer sent a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Direction {
    /// Sent by us.
    ClientToServer,
    /// Received from the origin.
    ServerToClient,
}

impl Direction {
    fn prefix(&self) -> &'static str {
        match self {
            Direction::ClientToServer => "client",
            Direction::ServerToClient => "server",
        }
    }
}

/// Record identifier: direction plus per-direction index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RecordId {
    /// Sender of the record.
    pub direction: Direction,
    /// Position among the records of that direction (0-based).
    pub index: u32,
}

impl RecordId {
    /// Create a record id.
    pub fn new(direction: Direction, index: u32) -> Self {
        Self { direction, index }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:04}", self.direction.prefix(), self.index)
    }
}

impl FromStr for RecordId {
    type Err = ArtifactError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ArtifactError::InvalidRecordId(s.to_string());
        let (prefix, index) = s.split_once('-').ok_or_else(invalid)?;
        let direction = match prefix {
            "client" => Direction::ClientToServer,
            "server" => Direction::ServerToClient,
            _ => return Err(invalid()),
        };
        let index = index.parse().map_err(|_| invalid())?;
        Ok(Self { direction, index })
    }
}

impl TryFrom<String> for RecordId {
    type Error = ArtifactError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RecordId> for String {
    fn from(id: RecordId) -> Self {
        id.to_string()
    }
}

/// TLS content type of a record (inner type for protected records).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    /// ChangeCipherSpec (20).
    ChangeCipherSpec,
    /// Alert (21).
    Alert,
    /// Handshake (22).
    Handshake,
    /// ApplicationData (23).
    ApplicationData,
}

impl RecordType {
    /// Wire value.
    pub fn to_wire(self) -> u8 {
        match self {
            RecordType::ChangeCipherSpec => 20,
            RecordType::Alert => 21,
            RecordType::Handshake => 22,
            RecordType::ApplicationData => 23,
        }
    }
}

impl TryFrom<u8> for RecordType {
    type Error = ArtifactError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            20 => Ok(RecordType::ChangeCipherSpec),
            21 => Ok(RecordType::Alert),
            22 => Ok(RecordType::Handshake),
            23 => Ok(RecordType::ApplicationData),
            other => Err(ArtifactError::UnknownContentType(other)),
        }
    }
}

/// Captured metadata for a single TLS record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMeta {
    /// Content type.
    pub typ: RecordType,
    /// Additional authenticated data (empty for plaintext records).
    #[serde(rename = "additionalData")]
    pub additional_data: HexBytes,
    /// Plaintext content.
    pub payload: HexBytes,
    /// Protected fragment including the tag (empty for plaintext records).
    pub ciphertext: HexBytes,
}

impl RecordMeta {
    /// Was this record encrypted on the wire?
    pub fn is_protected(&self) -> bool {
        !self.ciphertext.0.is_empty()
    }
}

/// Record id → record metadata, ordered by direction then index.
pub type RecordMap = BTreeMap<RecordId, RecordMeta>;

// =============================================================================
// DOCUMENT
// =============================================================================

/// Secret map and record map of one completed session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "SessionDocument", into = "SessionDocument")]
pub struct SessionArtifacts {
    /// Named session secrets.
    pub secrets: SecretMap,
    /// Every record observed on the connection.
    pub records: RecordMap,
}

impl SessionArtifacts {
    /// True for handshake-only sessions.
    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty() && self.records.is_empty()
    }

    /// Check that a TLS 1.3 session carries every secret the circuit needs.
    ///
    /// The handshake-secret inputs (`intermediateHashHSopad`, `MSin`, `dHSin`)
    /// derive from [`SecretName::HandshakeSecret`]. rustls only logs the
    /// NSS traffic secrets, so sessions it captures fail this check. TLS 1.2
    /// and empty sessions always pass.
    pub fn check_key_schedule(&self) -> Result<(), ArtifactError> {
        let tls13 = self.secrets.contains_key(&SecretName::ClientHandshakeTrafficSecret)
            || self.secrets.contains_key(&SecretName::ClientTrafficSecret0);
        if tls13 && !self.secrets.contains_key(&SecretName::HandshakeSecret) {
            return Err(ArtifactError::KeyScheduleIncomplete(SecretName::HandshakeSecret));
        }
        Ok(())
    }

    /// Records sent in one direction, in order.
    pub fn records_from(&self, direction: Direction) -> impl Iterator<Item = (&RecordId, &RecordMeta)> {
        self.records.iter().filter(move |(id, _)| id.direction == direction)
    }
}

/// Serialized form: a `"keys"` object next to one object per record.
#[derive(Serialize, Deserialize)]
struct SessionDocument {
    keys: BTreeMap<SecretName, HexBytes>,
    #[serde(flatten)]
    records: BTreeMap<RecordId, RecordMeta>,
}

impl From<SessionDocument> for SessionArtifacts {
    fn from(doc: SessionDocument) -> Self {
        Self {
            secrets: doc
                .keys
                .into_iter()
                .map(|(name, bytes)| (name, SecretBytes::new(bytes.into_inner())))
                .collect(),
            records: doc.records,
        }
    }
}

impl From<SessionArtifacts> for SessionDocument {
    fn from(artifacts: SessionArtifacts) -> Self {
        Self {
            keys: artifacts
                .secrets
                .iter()
                .map(|(name, secret)| (*name, HexBytes::from(secret.expose())))
                .collect(),
            records: artifacts.records,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_artifacts() -> SessionArtifacts {
        let mut artifacts = SessionArtifacts::default();
        artifacts.secrets.insert(SecretName::ServerTrafficSecret0, SecretBytes::new(vec![0xAB; 32]));
        artifacts.records.insert(
            RecordId::new(Direction::ClientToServer, 0),
            RecordMeta {
                typ: RecordType::Handshake,
                additional_data: HexBytes::default(),
                payload: HexBytes(vec![1, 0, 0, 1, 0]),
                ciphertext: HexBytes::default(),
            },
        );
        artifacts.records.insert(
            RecordId::new(Direction::ServerToClient, 3),
            RecordMeta {
                typ: RecordType::ApplicationData,
                additional_data: HexBytes(vec![0x17, 0x03, 0x03, 0x00, 0x13]),
                payload: HexBytes(b"ok".to_vec()),
                ciphertext: HexBytes(vec![0x55; 19]),
            },
        );
        artifacts
    }

    #[test]
    fn test_record_id_format() {
        let id = RecordId::new(Direction::ServerToClient, 7);
        assert_eq!(id.to_string(), "server-0007");
        assert_eq!("server-0007".parse::<RecordId>().unwrap(), id);
        assert_eq!("client-12".parse::<RecordId>().unwrap(), RecordId::new(Direction::ClientToServer, 12));
        assert!("keys".parse::<RecordId>().is_err());
        assert!("proxy-0001".parse::<RecordId>().is_err());
    }

    #[test]
    fn test_secret_name_labels() {
        for name in SecretName::ALL {
            assert_eq!(name.label().parse::<SecretName>().unwrap(), name);
        }
        assert!("SOMETHING_ELSE".parse::<SecretName>().is_err());
    }

    #[test]
    fn test_key_schedule_check() {
        assert_eq!(SessionArtifacts::default().check_key_schedule(), Ok(()));

        // Traffic secrets alone cannot feed the handshake-secret inputs
        let mut tls13 = sample_artifacts();
        assert_eq!(
            tls13.check_key_schedule(),
            Err(ArtifactError::KeyScheduleIncomplete(SecretName::HandshakeSecret))
        );
        tls13.secrets.insert(SecretName::ClientTrafficSecret0, SecretBytes::new(vec![0x01; 32]));
        tls13.secrets.insert(SecretName::HandshakeSecret, SecretBytes::new(vec![0x02; 32]));
        assert_eq!(tls13.check_key_schedule(), Ok(()));
        assert_eq!(
            serde_json::to_value(&tls13).unwrap()["keys"]["HANDSHAKE_SECRET"],
            "02".repeat(32)
        );

        let mut legacy = SessionArtifacts::default();
        legacy.secrets.insert(SecretName::MasterSecret, SecretBytes::new(vec![0x03; 48]));
        assert_eq!(legacy.check_key_schedule(), Ok(()));
    }

    #[test]
    fn test_document_shape() {
        let json = serde_json::to_value(sample_artifacts()).unwrap();

        assert_eq!(json["keys"]["SERVER_TRAFFIC_SECRET_0"], "ab".repeat(32));
        assert_eq!(json["client-0000"]["typ"], "handshake");
        assert_eq!(json["client-0000"]["ciphertext"], "");
        assert_eq!(json["server-0003"]["additionalData"], "1703030013");
        assert_eq!(json["server-0003"]["payload"], "6f6b");
    }

    #[test]
    fn test_document_roundtrip() {
        let artifacts = sample_artifacts();
        let json = serde_json::to_string_pretty(&artifacts).unwrap();
        let decoded: SessionArtifacts = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, artifacts);
    }

    #[test]
    fn test_unknown_record_key_rejected() {
        let json = r#"{"keys": {}, "bogus": {"typ": "alert", "additionalData": "", "payload": "", "ciphertext": ""}}"#;
        assert!(serde_json::from_str::<SessionArtifacts>(json).is_err());
    }

    #[test]
    fn test_secret_debug_is_redacted() {
        let secret = SecretBytes::new(vec![0x42; 4]);
        let printed = format!("{:?}", secret);
        assert!(!printed.contains("42"));
        assert!(printed.contains("REDACTED"));
    }
}
