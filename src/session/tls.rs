//! TLS client configuration.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use rustls::crypto::ring as provider;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::CertificateDer;
use rustls::{ClientConfig, RootCertStore};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::capture::SecretLog;
use super::driver::SessionError;

/// Cipher-suite profile offered in the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CipherProfile {
    /// TLS 1.3 with TLS13_AES_128_GCM_SHA256.
    #[default]
    Tls13,
    /// TLS 1.2 with TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256.
    Legacy,
}

impl CipherProfile {
    /// Profile name as used in configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            CipherProfile::Tls13 => "tls13",
            CipherProfile::Legacy => "legacy",
        }
    }

    fn suite(&self) -> rustls::SupportedCipherSuite {
        match self {
            CipherProfile::Tls13 => provider::cipher_suite::TLS13_AES_128_GCM_SHA256,
            CipherProfile::Legacy => provider::cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
        }
    }

    fn version(&self) -> &'static rustls::SupportedProtocolVersion {
        match self {
            CipherProfile::Tls13 => &rustls::version::TLS13,
            CipherProfile::Legacy => &rustls::version::TLS12,
        }
    }
}

impl fmt::Display for CipherProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CipherProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tls13" => Ok(CipherProfile::Tls13),
            "legacy" | "tls12" => Ok(CipherProfile::Legacy),
            other => Err(format!("unknown cipher profile: {}", other)),
        }
    }
}

/// Root store: webpki roots plus any certificates in `extra_ca_pem`.
pub fn root_store(extra_ca_pem: Option<&[u8]>) -> Result<RootCertStore, SessionError> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    if let Some(pem) = extra_ca_pem {
        let certs = CertificateDer::pem_slice_iter(pem)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| SessionError::Certificate(format!("failed to parse CA PEM: {}", e)))?;
        if certs.is_empty() {
            return Err(SessionError::Certificate("no certificates in CA PEM".into()));
        }
        for cert in certs {
            roots
                .add(cert)
                .map_err(|e| SessionError::Certificate(format!("failed to add CA certificate: {}", e)))?;
        }
    }

    Ok(roots)
}

/// Client config restricted to P-256 and the profile's single suite, with
/// `key_log` installed.
pub fn client_config(
    profile: CipherProfile,
    roots: RootCertStore,
    key_log: Arc<SecretLog>,
) -> Result<Arc<ClientConfig>, SessionError> {
    let mut crypto = provider::default_provider();
    crypto.cipher_suites = vec![profile.suite()];
    crypto.kx_groups = vec![provider::kx_group::SECP256R1];

    let mut config = ClientConfig::builder_with_provider(Arc::new(crypto))
        .with_protocol_versions(&[profile.version()])
        .map_err(|e| SessionError::Config(e.to_string()))?
        .with_root_certificates(roots)
        .with_no_client_auth();
    config.key_log = key_log;

    debug!("Client config built for profile {}", profile);
    Ok(Arc::new(config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_parse() {
        assert_eq!("tls13".parse::<CipherProfile>().unwrap(), CipherProfile::Tls13);
        assert_eq!("legacy".parse::<CipherProfile>().unwrap(), CipherProfile::Legacy);
        assert!("ssl3".parse::<CipherProfile>().is_err());
        assert_eq!(CipherProfile::default(), CipherProfile::Tls13);
    }

    #[test]
    fn test_client_config_for_each_profile() {
        for profile in [CipherProfile::Tls13, CipherProfile::Legacy] {
            let config = client_config(profile, root_store(None).unwrap(), Arc::new(SecretLog::new()));
            assert!(config.is_ok(), "profile {} failed", profile);
        }
    }

    #[test]
    fn test_bad_ca_pem_rejected() {
        let result = root_store(Some(b"not a certificate"));
        assert!(matches!(result, Err(SessionError::Certificate(_))));
    }
}
