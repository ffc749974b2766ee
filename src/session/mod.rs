//! Secure session capture.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       SessionDriver                          │
//! │  tls.rs      client config (P-256, one suite, key log)        │
//! │  http.rs     hand-built GET, httparse response framing        │
//! │  capture.rs  SecretLog + RecordTap                            │
//! │  record.rs   split, hellos, open records                      │
//! │  keys.rs     HKDF-Expand-Label / TLS 1.2 PRF                  │
//! └──────────────────────────────┬───────────────────────────────┘
//!                                ▼
//!              SessionArtifacts { SecretMap, RecordMap }
//! ```

pub mod artifacts;
pub mod capture;
pub mod driver;
pub mod http;
pub mod keys;
pub mod record;
pub mod tls;

pub use artifacts::{
    ArtifactError, Direction, RecordId, RecordMap, RecordMeta, RecordType, SecretBytes, SecretMap, SecretName,
    SessionArtifacts,
};
pub use capture::{CaptureError, SessionCapture};
pub use driver::{SessionConfig, SessionDriver, SessionError};
pub use http::HttpError;
pub use tls::CipherProfile;
