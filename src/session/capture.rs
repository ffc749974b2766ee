//! Session Capture
//!
//! Two taps feed the artifact maps of one connection:
//! - [`SecretLog`] receives every secret the TLS stack exports
//! - [`RecordTap`] copies every byte crossing the transport
//!
//! Both are shared with the driver through `Arc`, and frozen by
//! [`SessionCapture::finish`] once the connection is closed.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::{debug, warn};

use super::artifacts::{
    ArtifactError, Direction, RecordId, SecretBytes, SecretMap, SecretName, SessionArtifacts,
};
use super::keys::KeyDerivationError;
use super::record::build_record_map;

/// Errors turning captured bytes and secrets into session artifacts.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// No hello record was seen in this direction.
    #[error("no {0:?} hello record captured")]
    MissingHello(Direction),

    /// Hello record too short or of the wrong handshake type.
    #[error("malformed {0:?} hello record")]
    MalformedHello(Direction),

    /// A secret needed to open records was never logged.
    #[error("secret {0} was not exported by the TLS stack")]
    MissingSecret(SecretName),

    /// Negotiated suite or secret unusable for key derivation.
    #[error("key derivation: {0}")]
    KeyDerivation(#[from] KeyDerivationError),

    /// Derived key rejected by the AEAD.
    #[error("invalid record key material")]
    InvalidKeyMaterial,

    /// Protected record failed authentication.
    #[error("record {0} could not be opened")]
    Undecryptable(RecordId),

    /// Opened record had no inner content type.
    #[error("record {0} has no inner content type")]
    MalformedRecord(RecordId),

    /// Content type outside TLS 1.2/1.3.
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

// =============================================================================
// SECRET LOG
// =============================================================================

/// Key log collecting exported secrets into a [`SecretMap`].
#[derive(Default)]
pub struct SecretLog {
    secrets: Mutex<SecretMap>,
}

impl SecretLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the secrets logged so far.
    pub fn snapshot(&self) -> SecretMap {
        self.secrets.lock().clone()
    }

    /// Number of secrets logged.
    pub fn len(&self) -> usize {
        self.secrets.lock().len()
    }

    /// True if nothing was logged.
    pub fn is_empty(&self) -> bool {
        self.secrets.lock().is_empty()
    }
}

impl rustls::KeyLog for SecretLog {
    fn log(&self, label: &str, _client_random: &[u8], secret: &[u8]) {
        match label.parse::<SecretName>() {
            Ok(name) => {
                debug!("Captured secret {} ({} bytes)", name, secret.len());
                self.secrets.lock().insert(name, SecretBytes::new(secret.to_vec()));
            }
            Err(_) => debug!("Ignoring key log label {}", label),
        }
    }
}

impl fmt::Debug for SecretLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<SecretName> = self.secrets.lock().keys().copied().collect();
        f.debug_struct("SecretLog").field("names", &names).finish()
    }
}

// =============================================================================
// RECORD TAP
// =============================================================================

/// Raw bytes observed on the transport.
#[derive(Debug, Default, Clone)]
pub struct WireLog {
    /// Bytes written to the peer.
    pub sent: Vec<u8>,
    /// Bytes read from the peer.
    pub received: Vec<u8>,
}

/// Transport wrapper copying all traffic into a [`WireLog`].
pub struct RecordTap<S> {
    inner: S,
    wire: Arc<Mutex<WireLog>>,
}

impl<S> RecordTap<S> {
    /// Wrap a transport.
    pub fn new(inner: S, wire: Arc<Mutex<WireLog>>) -> Self {
        Self { inner, wire }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for RecordTap<S> {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = poll {
            this.wire.lock().received.extend_from_slice(&buf.filled()[before..]);
        }
        poll
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for RecordTap<S> {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(written)) = poll {
            this.wire.lock().sent.extend_from_slice(&buf[..written]);
        }
        poll
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

// =============================================================================
// SESSION CAPTURE
// =============================================================================

/// Capture state of one connection.
#[derive(Debug, Clone, Default)]
pub struct SessionCapture {
    secrets: Arc<SecretLog>,
    wire: Arc<Mutex<WireLog>>,
}

impl SessionCapture {
    /// Fresh capture state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Key log to install on the client config.
    pub fn key_log(&self) -> Arc<SecretLog> {
        Arc::clone(&self.secrets)
    }

    /// Wrap a transport so its traffic lands in this capture.
    pub fn tap<S>(&self, stream: S) -> RecordTap<S> {
        RecordTap::new(stream, Arc::clone(&self.wire))
    }

    /// (secrets logged, bytes sent, bytes received).
    pub fn counts(&self) -> (usize, usize, usize) {
        let wire = self.wire.lock();
        (self.secrets.len(), wire.sent.len(), wire.received.len())
    }

    /// Freeze the capture into a secret map and record map.
    pub fn finish(&self) -> Result<SessionArtifacts, CaptureError> {
        let secrets = self.secrets.snapshot();
        let wire = self.wire.lock().clone();

        if secrets.is_empty() {
            warn!("No secrets were exported during the session");
        }

        let records = build_record_map(&wire.sent, &wire.received, &secrets)?;
        Ok(SessionArtifacts { secrets, records })
    }
}
