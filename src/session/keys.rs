//! Traffic Key Derivation
//!
//! Turns captured secrets into AEAD keys for record opening:
//! - TLS 1.3: HKDF-Expand-Label over a traffic secret
//! - TLS 1.2: PRF key block over the master secret

use ring::hkdf::{self, KeyType, Prk};
use ring::hmac;
use thiserror::Error;

/// Errors during key derivation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyDerivationError {
    /// Cipher suite outside the supported AEAD set.
    #[error("unsupported cipher suite: 0x{0:04x}")]
    UnsupportedCipherSuite(u16),

    /// Secret has the wrong size for the suite's hash.
    #[error("invalid secret length: expected {expected}, got {actual}")]
    InvalidSecretLength {
        /// Hash output length.
        expected: usize,
        /// Provided length.
        actual: usize,
    },

    /// HKDF refused the requested output length.
    #[error("HKDF expansion failed for label {0}")]
    Expand(&'static str),
}

/// TLS protocol generation of a captured session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
    /// TLS 1.2 (AEAD suites only).
    Tls12,
    /// TLS 1.3.
    Tls13,
}

/// Hash function of a cipher suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuiteHash {
    /// SHA-256.
    Sha256,
    /// SHA-384.
    Sha384,
}

impl SuiteHash {
    /// Output length in bytes.
    pub fn output_len(self) -> usize {
        match self {
            SuiteHash::Sha256 => 32,
            SuiteHash::Sha384 => 48,
        }
    }

    fn hkdf(self) -> hkdf::Algorithm {
        match self {
            SuiteHash::Sha256 => hkdf::HKDF_SHA256,
            SuiteHash::Sha384 => hkdf::HKDF_SHA384,
        }
    }

    fn hmac(self) -> hmac::Algorithm {
        match self {
            SuiteHash::Sha256 => hmac::HMAC_SHA256,
            SuiteHash::Sha384 => hmac::HMAC_SHA384,
        }
    }
}

/// AEAD of a cipher suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AeadAlgorithm {
    /// AES-128-GCM.
    Aes128Gcm,
    /// AES-256-GCM.
    Aes256Gcm,
    /// ChaCha20-Poly1305.
    Chacha20Poly1305,
}

impl AeadAlgorithm {
    /// Key length in bytes.
    pub fn key_len(self) -> usize {
        match self {
            AeadAlgorithm::Aes128Gcm => 16,
            AeadAlgorithm::Aes256Gcm | AeadAlgorithm::Chacha20Poly1305 => 32,
        }
    }

    /// Authentication tag length in bytes.
    pub fn tag_len(self) -> usize {
        16
    }

    /// Matching ring algorithm.
    pub fn ring_algorithm(self) -> &'static ring::aead::Algorithm {
        match self {
            AeadAlgorithm::Aes128Gcm => &ring::aead::AES_128_GCM,
            AeadAlgorithm::Aes256Gcm => &ring::aead::AES_256_GCM,
            AeadAlgorithm::Chacha20Poly1305 => &ring::aead::CHACHA20_POLY1305,
        }
    }
}

/// Negotiated cipher suite parameters needed for record opening.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CipherSuite {
    /// IANA identifier.
    pub id: u16,
    /// Protocol generation the suite belongs to.
    pub version: ProtocolVersion,
    /// Record AEAD.
    pub aead: AeadAlgorithm,
    /// Key schedule hash.
    pub hash: SuiteHash,
}

impl CipherSuite {
    /// Look up an AEAD suite by IANA identifier.
    pub fn from_id(id: u16) -> Result<Self, KeyDerivationError> {
        use AeadAlgorithm::*;
        use ProtocolVersion::*;
        use SuiteHash::*;

        let (version, aead, hash) = match id {
            0x1301 => (Tls13, Aes128Gcm, Sha256),
            0x1302 => (Tls13, Aes256Gcm, Sha384),
            0x1303 => (Tls13, Chacha20Poly1305, Sha256),
            // ECDHE_{ECDSA,RSA}_WITH_AES_128_GCM_SHA256
            0xC02B | 0xC02F => (Tls12, Aes128Gcm, Sha256),
            // ECDHE_{ECDSA,RSA}_WITH_AES_256_GCM_SHA384
            0xC02C | 0xC030 => (Tls12, Aes256Gcm, Sha384),
            // ECDHE_{RSA,ECDSA}_WITH_CHACHA20_POLY1305_SHA256
            0xCCA8 | 0xCCA9 => (Tls12, Chacha20Poly1305, Sha256),
            other => return Err(KeyDerivationError::UnsupportedCipherSuite(other)),
        };

        Ok(Self { id, version, aead, hash })
    }

    /// Length of the per-direction IV the key schedule derives.
    ///
    /// TLS 1.2 GCM carries an 8-byte explicit nonce per record, so only a
    /// 4-byte salt comes from the key block; ChaCha20 uses the full 12 bytes.
    pub fn fixed_iv_len(&self) -> usize {
        match (self.version, self.aead) {
            (ProtocolVersion::Tls12, AeadAlgorithm::Aes128Gcm | AeadAlgorithm::Aes256Gcm) => 4,
            _ => 12,
        }
    }
}

/// Write key and IV for one direction.
#[derive(Clone, PartialEq, Eq)]
pub struct TrafficKeys {
    /// AEAD key.
    pub key: Vec<u8>,
    /// Static IV (TLS 1.3 / ChaCha) or implicit salt (TLS 1.2 GCM).
    pub iv: Vec<u8>,
}

impl std::fmt::Debug for TrafficKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrafficKeys")
            .field("key_len", &self.key.len())
            .field("iv_len", &self.iv.len())
            .finish()
    }
}

// =============================================================================
// TLS 1.3
// =============================================================================

struct OutputLen(usize);

impl KeyType for OutputLen {
    fn len(&self) -> usize {
        self.0
    }
}

/// HKDF-Expand-Label (RFC 8446 §7.1).
pub fn hkdf_expand_label(
    hash: SuiteHash,
    secret: &[u8],
    label: &'static str,
    context: &[u8],
    output_len: usize,
) -> Result<Vec<u8>, KeyDerivationError> {
    // HkdfLabel = length(2) || "tls13 " + label (1 + n) || context (1 + m)
    let full_label = format!("tls13 {}", label);
    let mut info = Vec::with_capacity(4 + full_label.len() + context.len());
    info.extend_from_slice(&(output_len as u16).to_be_bytes());
    info.push(full_label.len() as u8);
    info.extend_from_slice(full_label.as_bytes());
    info.push(context.len() as u8);
    info.extend_from_slice(context);

    // Traffic secrets are already HKDF-Extract outputs
    let prk = Prk::new_less_safe(hash.hkdf(), secret);
    let info_parts = [info.as_slice()];
    let okm = prk
        .expand(&info_parts, OutputLen(output_len))
        .map_err(|_| KeyDerivationError::Expand(label))?;

    let mut output = vec![0u8; output_len];
    okm.fill(&mut output).map_err(|_| KeyDerivationError::Expand(label))?;
    Ok(output)
}

/// Derive the record key and IV from a TLS 1.3 traffic secret.
pub fn derive_tls13_keys(
    suite: &CipherSuite,
    traffic_secret: &[u8],
) -> Result<TrafficKeys, KeyDerivationError> {
    let expected = suite.hash.output_len();
    if traffic_secret.len() != expected {
        return Err(KeyDerivationError::InvalidSecretLength {
            expected,
            actual: traffic_secret.len(),
        });
    }

    Ok(TrafficKeys {
        key: hkdf_expand_label(suite.hash, traffic_secret, "key", &[], suite.aead.key_len())?,
        iv: hkdf_expand_label(suite.hash, traffic_secret, "iv", &[], 12)?,
    })
}

// =============================================================================
// TLS 1.2
// =============================================================================

/// TLS 1.2 PRF: P_hash(secret, label || seed).
pub fn tls12_prf(hash: SuiteHash, secret: &[u8], label: &[u8], seed: &[u8], output_len: usize) -> Vec<u8> {
    let key = hmac::Key::new(hash.hmac(), secret);

    let mut label_seed = Vec::with_capacity(label.len() + seed.len());
    label_seed.extend_from_slice(label);
    label_seed.extend_from_slice(seed);

    let mut output = Vec::with_capacity(output_len);
    // A(1) = HMAC(secret, seed)
    let mut a = hmac::sign(&key, &label_seed);

    while output.len() < output_len {
        let mut ctx = hmac::Context::with_key(&key);
        ctx.update(a.as_ref());
        ctx.update(&label_seed);
        let block = ctx.sign();

        let take = (output_len - output.len()).min(block.as_ref().len());
        output.extend_from_slice(&block.as_ref()[..take]);

        a = hmac::sign(&key, a.as_ref());
    }

    output
}

/// Derive both directions' keys from a TLS 1.2 master secret.
///
/// Returns `(client_write, server_write)`.
pub fn derive_tls12_keys(
    suite: &CipherSuite,
    master_secret: &[u8],
    client_random: &[u8; 32],
    server_random: &[u8; 32],
) -> Result<(TrafficKeys, TrafficKeys), KeyDerivationError> {
    if master_secret.len() != 48 {
        return Err(KeyDerivationError::InvalidSecretLength {
            expected: 48,
            actual: master_secret.len(),
        });
    }

    let key_len = suite.aead.key_len();
    let iv_len = suite.fixed_iv_len();

    // Seed order is server_random || client_random for key expansion
    let mut seed = [0u8; 64];
    seed[..32].copy_from_slice(server_random);
    seed[32..].copy_from_slice(client_random);

    // AEAD suites have no MAC keys
    let block = tls12_prf(suite.hash, master_secret, b"key expansion", &seed, 2 * key_len + 2 * iv_len);
    let (client_key, rest) = block.split_at(key_len);
    let (server_key, rest) = rest.split_at(key_len);
    let (client_iv, server_iv) = rest.split_at(iv_len);

    Ok((
        TrafficKeys { key: client_key.to_vec(), iv: client_iv.to_vec() },
        TrafficKeys { key: server_key.to_vec(), iv: server_iv.to_vec() },
    ))
}
