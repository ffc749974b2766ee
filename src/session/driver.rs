//! Secure Session Driver
//!
//! One TLS connection, one HTTP exchange, one set of artifacts.
//!
//! ```text
//! TcpStream ─► RecordTap ─► TlsConnector ─► GET ─► response ─► close_notify
//!                 │              │
//!                 ▼              ▼
//!             wire bytes      key log ──────► SessionCapture::finish()
//! ```

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use rustls::pki_types::ServerName;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tracing::{debug, info, warn};

use super::artifacts::SessionArtifacts;
use super::capture::{CaptureError, SessionCapture};
use super::http::{HttpError, HttpRequest, HttpResponse};
use super::tls::{client_config, root_store, CipherProfile};
use crate::config::{env_parse, env_var, ConfigError};
use crate::store::{ArtifactStore, StoreError};

/// Default per-step network deadline.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(30);

/// Default response size cap (16 MiB).
pub const DEFAULT_MAX_RESPONSE_BYTES: usize = 16 * 1024 * 1024;

const READ_CHUNK: usize = 8 * 1024;

/// Session failures, one variant per step.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Invalid server name or TLS configuration.
    #[error("session configuration: {0}")]
    Config(String),

    /// CA PEM unreadable or invalid.
    #[error("certificate: {0}")]
    Certificate(String),

    /// TCP connect failed.
    #[error("connect to {addr} failed: {source}")]
    Connect {
        /// Dial address.
        addr: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// TLS handshake failed.
    #[error("TLS handshake failed: {0}")]
    Handshake(#[source] io::Error),

    /// Writing the request failed.
    #[error("write failed: {0}")]
    Write(#[source] io::Error),

    /// Flushing the request failed.
    #[error("flush failed: {0}")]
    Flush(#[source] io::Error),

    /// Reading the response failed.
    #[error("read failed: {0}")]
    Read(#[source] io::Error),

    /// Response could not be framed.
    #[error("response: {0}")]
    Response(#[from] HttpError),

    /// A network step exceeded its deadline.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// Step that timed out.
        operation: &'static str,
        /// Configured deadline.
        after: Duration,
    },

    /// Artifacts could not be reconstructed.
    #[error("capture: {0}")]
    Capture(#[from] CaptureError),

    /// Artifacts could not be persisted.
    #[error("store: {0}")]
    Store(#[from] StoreError),
}

/// Session driver settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Address actually dialed (origin or local proxy).
    pub dial_addr: String,
    /// SNI and Host header.
    pub server_domain: String,
    /// Request target.
    pub path: String,
    /// User-Agent header.
    pub user_agent: String,
    /// Optional bearer token.
    pub bearer_token: Option<String>,
    /// Optional Cookie header.
    pub cookie: Option<String>,
    /// Offered cipher-suite profile.
    pub profile: CipherProfile,
    /// Extra trusted root for non-production endpoints.
    pub ca_pem_path: Option<PathBuf>,
    /// Deadline for each network step.
    pub io_timeout: Duration,
    /// Response size cap.
    pub max_response_bytes: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            dial_addr: "localhost:8082".to_string(),
            server_domain: "localhost".to_string(),
            path: "/".to_string(),
            user_agent: format!("tls-oracle/{}", crate::VERSION),
            bearer_token: None,
            cookie: None,
            profile: CipherProfile::Tls13,
            ca_pem_path: None,
            io_timeout: DEFAULT_IO_TIMEOUT,
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
        }
    }
}

impl SessionConfig {
    /// Load from environment variables.
    ///
    /// `ORACLE_DIAL_ADDR`, `ORACLE_SERVER_DOMAIN`, `ORACLE_PATH`,
    /// `ORACLE_USER_AGENT`, `ORACLE_BEARER_TOKEN`, `ORACLE_COOKIE`,
    /// `ORACLE_CIPHER_PROFILE`, `ORACLE_CA_PEM`, `ORACLE_IO_TIMEOUT_SECS`,
    /// `ORACLE_MAX_RESPONSE_BYTES`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            dial_addr: env_var("ORACLE_DIAL_ADDR").unwrap_or(defaults.dial_addr),
            server_domain: env_var("ORACLE_SERVER_DOMAIN").unwrap_or(defaults.server_domain),
            path: env_var("ORACLE_PATH").unwrap_or(defaults.path),
            user_agent: env_var("ORACLE_USER_AGENT").unwrap_or(defaults.user_agent),
            bearer_token: env_var("ORACLE_BEARER_TOKEN"),
            cookie: env_var("ORACLE_COOKIE"),
            profile: env_parse("ORACLE_CIPHER_PROFILE", defaults.profile)?,
            ca_pem_path: env_var("ORACLE_CA_PEM").map(PathBuf::from),
            io_timeout: Duration::from_secs(env_parse(
                "ORACLE_IO_TIMEOUT_SECS",
                defaults.io_timeout.as_secs(),
            )?),
            max_response_bytes: env_parse("ORACLE_MAX_RESPONSE_BYTES", defaults.max_response_bytes)?,
        })
    }

    fn request(&self) -> HttpRequest {
        HttpRequest {
            host: self.server_domain.clone(),
            path: self.path.clone(),
            user_agent: self.user_agent.clone(),
            bearer_token: self.bearer_token.clone(),
            cookie: self.cookie.clone(),
        }
    }
}

/// Drives a captured TLS session.
#[derive(Debug, Clone)]
pub struct SessionDriver {
    config: SessionConfig,
}

impl SessionDriver {
    /// Create a driver.
    pub fn new(config: SessionConfig) -> Self {
        Self { config }
    }

    /// Current settings.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Run the handshake and, unless `handshake_only`, one GET exchange.
    ///
    /// Handshake-only sessions return empty artifacts.
    pub async fn call(&self, handshake_only: bool) -> Result<SessionArtifacts, SessionError> {
        let config = &self.config;
        let deadline = config.io_timeout;
        let capture = SessionCapture::new();

        let ca_pem = match &config.ca_pem_path {
            Some(path) => Some(std::fs::read(path).map_err(|e| {
                SessionError::Certificate(format!("failed to read {}: {}", path.display(), e))
            })?),
            None => None,
        };
        let tls_config = client_config(config.profile, root_store(ca_pem.as_deref())?, capture.key_log())?;
        let server_name = ServerName::try_from(config.server_domain.clone())
            .map_err(|e| SessionError::Config(format!("invalid server name: {}", e)))?;

        let tcp = timeout(deadline, TcpStream::connect(&config.dial_addr))
            .await
            .map_err(|_| SessionError::Timeout { operation: "connect", after: deadline })?
            .map_err(|source| SessionError::Connect { addr: config.dial_addr.clone(), source })?;

        let mut stream = timeout(deadline, TlsConnector::from(tls_config).connect(server_name, capture.tap(tcp)))
            .await
            .map_err(|_| SessionError::Timeout { operation: "handshake", after: deadline })?
            .map_err(SessionError::Handshake)?;

        info!(
            "Handshake complete with {} via {} ({})",
            config.server_domain, config.dial_addr, config.profile
        );

        if handshake_only {
            shutdown(&mut stream, deadline).await;
            return Ok(SessionArtifacts::default());
        }

        let exchange = self.exchange(&mut stream).await;
        shutdown(&mut stream, deadline).await;
        drop(stream);

        match exchange {
            Ok(response) => {
                info!("Response {} {} ({} body bytes)", response.status, response.reason, response.body.len());
                let artifacts = capture.finish()?;
                info!(
                    "Captured {} secrets and {} records",
                    artifacts.secrets.len(),
                    artifacts.records.len()
                );
                if let Err(e) = artifacts.check_key_schedule() {
                    warn!("Session cannot feed the handshake-secret circuit inputs: {}", e);
                }
                Ok(artifacts)
            }
            Err(e) => {
                let (secrets, sent, received) = capture.counts();
                warn!(
                    "Exchange failed after capturing {} secrets, {} bytes sent, {} bytes received",
                    secrets, sent, received
                );
                Err(e)
            }
        }
    }

    /// [`call`](Self::call), then persist non-empty artifacts to `store`.
    pub async fn call_and_store(
        &self,
        store: &ArtifactStore,
        handshake_only: bool,
    ) -> Result<SessionArtifacts, SessionError> {
        let artifacts = self.call(handshake_only).await?;
        if !artifacts.is_empty() {
            let path = store.save_session(&artifacts)?;
            info!("Session artifacts written to {}", path.display());
        }
        Ok(artifacts)
    }

    async fn exchange<S>(&self, stream: &mut S) -> Result<HttpResponse, SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let deadline = self.config.io_timeout;
        let request = self.config.request().to_bytes();

        timeout(deadline, stream.write_all(&request))
            .await
            .map_err(|_| SessionError::Timeout { operation: "write", after: deadline })?
            .map_err(SessionError::Write)?;
        timeout(deadline, stream.flush())
            .await
            .map_err(|_| SessionError::Timeout { operation: "flush", after: deadline })?
            .map_err(SessionError::Flush)?;
        debug!("Request sent ({} bytes)", request.len());

        read_response(stream, deadline, self.config.max_response_bytes).await
    }
}

/// Read until a complete response is framed, the peer closes, or the cap is hit.
async fn read_response<S>(stream: &mut S, deadline: Duration, limit: usize) -> Result<HttpResponse, SessionError>
where
    S: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    let mut chunk = vec![0u8; READ_CHUNK];

    loop {
        let read = timeout(deadline, stream.read(&mut chunk))
            .await
            .map_err(|_| SessionError::Timeout { operation: "read", after: deadline })?;

        let n = match read {
            Ok(n) => n,
            // Peer closed without close_notify
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                warn!("Peer closed the connection without close_notify");
                0
            }
            Err(e) => return Err(SessionError::Read(e)),
        };

        buf.extend_from_slice(&chunk[..n]);
        if buf.len() > limit {
            return Err(HttpError::TooLarge { limit }.into());
        }

        if let Some(response) = HttpResponse::parse(&buf, n == 0)? {
            return Ok(response);
        }
    }
}

/// Send close_notify; the stream is released by the caller either way.
async fn shutdown<S: AsyncWrite + Unpin>(stream: &mut S, deadline: Duration) {
    match timeout(deadline, stream.shutdown()).await {
        Ok(Ok(())) => debug!("Connection shut down"),
        Ok(Err(e)) => debug!("Shutdown error ignored: {}", e),
        Err(_) => debug!("Shutdown timed out"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::artifacts::{ArtifactError, Direction, RecordType, SecretName};
    use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
    use std::sync::Arc;
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;
    use tokio_rustls::TlsAcceptor;

    const BALANCE_RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 17\r\nConnection: close\r\n\r\n{\"balance\": 1234}";

    /// Local HTTPS origin for `localhost` behind a throwaway CA.
    struct Origin {
        _dir: tempfile::TempDir,
        ca_pem_path: PathBuf,
        addr: String,
        /// Resolves to the request bytes the origin received.
        served: JoinHandle<Vec<u8>>,
    }

    async fn spawn_origin() -> Origin {
        let ca_key = rcgen::KeyPair::generate().unwrap();
        let mut ca_params = rcgen::CertificateParams::new(Vec::<String>::new()).unwrap();
        ca_params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        ca_params.distinguished_name.push(rcgen::DnType::CommonName, "tls-oracle test CA");
        ca_params.key_usages = vec![rcgen::KeyUsagePurpose::KeyCertSign, rcgen::KeyUsagePurpose::CrlSign];
        let ca_cert = ca_params.self_signed(&ca_key).unwrap();

        // ECDSA P-256 leaf, usable by both profiles
        let leaf_key = rcgen::KeyPair::generate().unwrap();
        let mut leaf_params = rcgen::CertificateParams::new(vec!["localhost".to_string()]).unwrap();
        leaf_params.distinguished_name.push(rcgen::DnType::CommonName, "localhost");
        leaf_params.extended_key_usages = vec![rcgen::ExtendedKeyUsagePurpose::ServerAuth];
        let leaf_cert = leaf_params.signed_by(&leaf_key, &ca_cert, &ca_key).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let ca_pem_path = dir.path().join("ca.pem");
        std::fs::write(&ca_pem_path, ca_cert.pem()).unwrap();

        let server_config = rustls::ServerConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_protocol_versions(&[&rustls::version::TLS13, &rustls::version::TLS12])
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(
            vec![leaf_cert.der().clone()],
            PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(leaf_key.serialize_der())),
        )
        .unwrap();
        let acceptor = TlsAcceptor::from(Arc::new(server_config));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let served = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let Ok(mut tls) = acceptor.accept(tcp).await else {
                return Vec::new();
            };

            let mut request = Vec::new();
            let mut chunk = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                match tls.read(&mut chunk).await {
                    Ok(0) | Err(_) => return request,
                    Ok(n) => request.extend_from_slice(&chunk[..n]),
                }
            }
            let _ = tls.write_all(BALANCE_RESPONSE).await;
            let _ = tls.shutdown().await;
            request
        });

        Origin { _dir: dir, ca_pem_path, addr, served }
    }

    fn origin_config(origin: &Origin, profile: CipherProfile) -> SessionConfig {
        SessionConfig {
            dial_addr: origin.addr.clone(),
            server_domain: "localhost".into(),
            path: "/api/balance".into(),
            bearer_token: Some("tok".into()),
            profile,
            ca_pem_path: Some(origin.ca_pem_path.clone()),
            io_timeout: Duration::from_secs(10),
            ..SessionConfig::default()
        }
    }

    fn payloads(artifacts: &SessionArtifacts, direction: Direction) -> Vec<Vec<u8>> {
        artifacts
            .records_from(direction)
            .filter(|(_, meta)| meta.typ == RecordType::ApplicationData)
            .map(|(_, meta)| meta.payload.as_slice().to_vec())
            .collect()
    }

    async fn assert_captured_exchange(profile: CipherProfile) -> SessionArtifacts {
        let origin = spawn_origin().await;
        let config = origin_config(&origin, profile);
        let request = config.request().to_bytes();

        let artifacts = SessionDriver::new(config).call(false).await.unwrap();
        assert_eq!(origin.served.await.unwrap(), request);

        // The opened client record is exactly the request that was sent
        let sent = payloads(&artifacts, Direction::ClientToServer);
        assert!(sent.contains(&request), "no client record carries the request");

        let received = payloads(&artifacts, Direction::ServerToClient).concat();
        assert!(received.windows(BALANCE_RESPONSE.len()).any(|w| w == BALANCE_RESPONSE));

        for (id, meta) in artifacts.records_from(Direction::ServerToClient) {
            if meta.typ == RecordType::ApplicationData {
                assert!(meta.is_protected(), "{} was not captured encrypted", id);
            }
        }
        artifacts
    }

    #[tokio::test]
    async fn test_tls13_session_captures_request_and_response() {
        let artifacts = assert_captured_exchange(CipherProfile::Tls13).await;

        assert!(artifacts.secrets.contains_key(&SecretName::ClientTrafficSecret0));
        assert!(artifacts.secrets.contains_key(&SecretName::ServerTrafficSecret0));
        assert!(!artifacts.secrets.contains_key(&SecretName::MasterSecret));
        assert_eq!(
            artifacts.check_key_schedule(),
            Err(ArtifactError::KeyScheduleIncomplete(SecretName::HandshakeSecret))
        );
    }

    #[tokio::test]
    async fn test_legacy_session_captures_request_and_response() {
        let artifacts = assert_captured_exchange(CipherProfile::Legacy).await;

        assert!(artifacts.secrets.contains_key(&SecretName::MasterSecret));
        assert!(!artifacts.secrets.contains_key(&SecretName::ClientTrafficSecret0));
        assert_eq!(artifacts.check_key_schedule(), Ok(()));
    }

    #[tokio::test]
    async fn test_handshake_only_persists_nothing() {
        for profile in [CipherProfile::Tls13, CipherProfile::Legacy] {
            let origin = spawn_origin().await;
            let storage = tempfile::tempdir().unwrap();
            let store = ArtifactStore::new(storage.path(), storage.path().join("circuits"), "oracle");

            let artifacts = SessionDriver::new(origin_config(&origin, profile))
                .call_and_store(&store, true)
                .await
                .unwrap();

            assert!(artifacts.is_empty());
            assert!(!store.session_path().exists());
            // No request ever reached the origin
            assert!(origin.served.await.unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn test_untrusted_origin_fails_handshake() {
        let origin = spawn_origin().await;
        let config = SessionConfig { ca_pem_path: None, ..origin_config(&origin, CipherProfile::Tls13) };

        let result = SessionDriver::new(config).call(false).await;
        assert!(matches!(result, Err(SessionError::Handshake(_))));
    }

    #[tokio::test]
    async fn test_read_response_content_length() {
        let (mut client, mut server) = tokio::io::duplex(256);
        server
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 11\r\n\r\n{\"v\":\"42\"}")
            .await
            .unwrap();
        server.write_all(b"\n").await.unwrap();

        let response = read_response(&mut client, Duration::from_secs(1), 1024).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"{\"v\":\"42\"}\n");
    }

    #[tokio::test]
    async fn test_read_response_to_close() {
        let (mut client, mut server) = tokio::io::duplex(256);
        server.write_all(b"HTTP/1.1 200 OK\r\n\r\nbody").await.unwrap();
        drop(server);

        let response = read_response(&mut client, Duration::from_secs(1), 1024).await.unwrap();
        assert_eq!(response.body, b"body");
    }

    #[tokio::test]
    async fn test_read_response_cap() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        server.write_all(&[b'x'; 2048]).await.unwrap();

        let result = read_response(&mut client, Duration::from_secs(1), 1024).await;
        assert!(matches!(result, Err(SessionError::Response(HttpError::TooLarge { limit: 1024 }))));
    }

    #[tokio::test]
    async fn test_read_response_timeout() {
        let (mut client, _server) = tokio::io::duplex(64);
        let result = read_response(&mut client, Duration::from_millis(20), 1024).await;
        assert!(matches!(result, Err(SessionError::Timeout { operation: "read", .. })));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Bind then drop to get a port nothing listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let driver = SessionDriver::new(SessionConfig {
            dial_addr: addr.to_string(),
            io_timeout: Duration::from_secs(2),
            ..SessionConfig::default()
        });

        let result = driver.call(false).await;
        assert!(matches!(
            result,
            Err(SessionError::Connect { .. }) | Err(SessionError::Timeout { operation: "connect", .. })
        ));
    }

    #[test]
    fn test_request_uses_config() {
        let config = SessionConfig {
            server_domain: "bank.example".into(),
            path: "/api/v1/balance".into(),
            cookie: Some("sid=1".into()),
            ..SessionConfig::default()
        };
        let text = String::from_utf8(config.request().to_bytes()).unwrap();
        assert!(text.contains("Host: bank.example\r\n"));
        assert!(text.contains("Cookie: sid=1\r\n"));
    }
}
