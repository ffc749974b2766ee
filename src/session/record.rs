//! Record Reconstruction
//!
//! Rebuilds the record map from the raw bytes a session put on the wire.
//!
//! ```text
//! sent bytes ──► split ──► ClientHello ─┐
//!                                       ├─► suite + randoms ─► per-direction openers
//! recv bytes ──► split ──► ServerHello ─┘                          │
//!                                                                  ▼
//!                                          RecordMeta { typ, aad, payload, ciphertext }
//! ```

use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey};
use tracing::{debug, warn};

use super::artifacts::{
    Direction, RecordId, RecordMap, RecordMeta, RecordType, SecretMap, SecretName,
};
use super::capture::CaptureError;
use super::keys::{
    derive_tls12_keys, derive_tls13_keys, AeadAlgorithm, CipherSuite, ProtocolVersion,
    TrafficKeys,
};
use crate::core::HexBytes;

/// Record header length.
pub const RECORD_HEADER_LEN: usize = 5;

/// TLS 1.2 explicit nonce carried by GCM records.
const EXPLICIT_NONCE_LEN: usize = 8;

const HANDSHAKE_CLIENT_HELLO: u8 = 1;
const HANDSHAKE_SERVER_HELLO: u8 = 2;

// =============================================================================
// FRAMING
// =============================================================================

/// One record as it appeared on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    /// Outer content type byte.
    pub content_type: u8,
    /// Legacy record version.
    pub version: u16,
    /// Fragment bytes following the header.
    pub fragment: Vec<u8>,
}

impl RawRecord {
    /// The 5-byte header this record was framed with.
    pub fn header(&self) -> [u8; RECORD_HEADER_LEN] {
        let version = self.version.to_be_bytes();
        let len = (self.fragment.len() as u16).to_be_bytes();
        [self.content_type, version[0], version[1], len[0], len[1]]
    }
}

/// Split a byte stream into records.
///
/// Returns the complete records and the number of trailing bytes that did not
/// form a whole record.
pub fn split_records(stream: &[u8]) -> (Vec<RawRecord>, usize) {
    let mut records = Vec::new();
    let mut rest = stream;

    while rest.len() >= RECORD_HEADER_LEN {
        let len = u16::from_be_bytes([rest[3], rest[4]]) as usize;
        if rest.len() < RECORD_HEADER_LEN + len {
            break;
        }
        records.push(RawRecord {
            content_type: rest[0],
            version: u16::from_be_bytes([rest[1], rest[2]]),
            fragment: rest[RECORD_HEADER_LEN..RECORD_HEADER_LEN + len].to_vec(),
        });
        rest = &rest[RECORD_HEADER_LEN + len..];
    }

    (records, rest.len())
}

// =============================================================================
// HELLOS
// =============================================================================

/// Values recovered from the plaintext hello messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelloInfo {
    /// ClientHello.random.
    pub client_random: [u8; 32],
    /// ServerHello.random.
    pub server_random: [u8; 32],
    /// Negotiated cipher suite id.
    pub cipher_suite: u16,
}

fn hello_random(fragment: &[u8], expected_type: u8) -> Option<[u8; 32]> {
    // msg_type(1) || length(3) || legacy_version(2) || random(32)
    if fragment.len() < 38 || fragment[0] != expected_type {
        return None;
    }
    let mut random = [0u8; 32];
    random.copy_from_slice(&fragment[6..38]);
    Some(random)
}

fn server_hello_suite(fragment: &[u8]) -> Option<u16> {
    let session_id_len = *fragment.get(38)? as usize;
    let at = 39 + session_id_len;
    let bytes = fragment.get(at..at + 2)?;
    Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}

/// Parse randoms and the negotiated suite from the first record of each side.
pub fn parse_hellos(sent: &[RawRecord], received: &[RawRecord]) -> Result<HelloInfo, CaptureError> {
    let handshake = RecordType::Handshake.to_wire();

    let client_hello = sent
        .first()
        .filter(|r| r.content_type == handshake)
        .ok_or(CaptureError::MissingHello(Direction::ClientToServer))?;
    let server_hello = received
        .first()
        .filter(|r| r.content_type == handshake)
        .ok_or(CaptureError::MissingHello(Direction::ServerToClient))?;

    let client_random = hello_random(&client_hello.fragment, HANDSHAKE_CLIENT_HELLO)
        .ok_or(CaptureError::MalformedHello(Direction::ClientToServer))?;
    let server_random = hello_random(&server_hello.fragment, HANDSHAKE_SERVER_HELLO)
        .ok_or(CaptureError::MalformedHello(Direction::ServerToClient))?;
    let cipher_suite = server_hello_suite(&server_hello.fragment)
        .ok_or(CaptureError::MalformedHello(Direction::ServerToClient))?;

    Ok(HelloInfo { client_random, server_random, cipher_suite })
}

// =============================================================================
// OPENERS
// =============================================================================

struct RecordKey {
    key: LessSafeKey,
    iv: Vec<u8>,
}

impl RecordKey {
    fn new(aead: AeadAlgorithm, keys: &TrafficKeys) -> Result<Self, CaptureError> {
        let unbound = UnboundKey::new(aead.ring_algorithm(), &keys.key)
            .map_err(|_| CaptureError::InvalidKeyMaterial)?;
        Ok(Self { key: LessSafeKey::new(unbound), iv: keys.iv.clone() })
    }

    /// iv XOR left-padded sequence number (TLS 1.3, TLS 1.2 ChaCha20).
    fn xor_nonce(&self, seq: u64) -> [u8; 12] {
        let mut nonce = [0u8; 12];
        nonce.copy_from_slice(&self.iv[..12]);
        for (n, s) in nonce[4..].iter_mut().zip(seq.to_be_bytes()) {
            *n ^= s;
        }
        nonce
    }

    fn open(&self, nonce: [u8; 12], aad: &[u8], sealed: &[u8]) -> Option<Vec<u8>> {
        let mut buffer = sealed.to_vec();
        let plaintext = self
            .key
            .open_in_place(Nonce::assume_unique_for_key(nonce), Aad::from(aad), &mut buffer)
            .ok()?;
        Some(plaintext.to_vec())
    }
}

/// Handshake key until the first record it cannot open, then application key.
struct Tls13Opener {
    handshake: RecordKey,
    application: RecordKey,
    in_application: bool,
    seq: u64,
}

impl Tls13Opener {
    fn open(&mut self, header: &[u8; RECORD_HEADER_LEN], fragment: &[u8]) -> Option<Vec<u8>> {
        if !self.in_application {
            let nonce = self.handshake.xor_nonce(self.seq);
            if let Some(plain) = self.handshake.open(nonce, header, fragment) {
                self.seq += 1;
                return Some(plain);
            }
            self.in_application = true;
            self.seq = 0;
        }

        let nonce = self.application.xor_nonce(self.seq);
        let plain = self.application.open(nonce, header, fragment)?;
        self.seq += 1;
        Some(plain)
    }
}

/// Plaintext until ChangeCipherSpec, then protected under the key block.
struct Tls12Opener {
    key: RecordKey,
    explicit_nonce: bool,
    active: bool,
    seq: u64,
}

impl Tls12Opener {
    /// Returns `(aad, plaintext)`.
    fn open(&mut self, record: &RawRecord) -> Option<(Vec<u8>, Vec<u8>)> {
        let (nonce, sealed) = if self.explicit_nonce {
            if record.fragment.len() < EXPLICIT_NONCE_LEN {
                return None;
            }
            let (explicit, sealed) = record.fragment.split_at(EXPLICIT_NONCE_LEN);
            let mut nonce = [0u8; 12];
            nonce[..4].copy_from_slice(&self.key.iv[..4]);
            nonce[4..].copy_from_slice(explicit);
            (nonce, sealed)
        } else {
            (self.key.xor_nonce(self.seq), record.fragment.as_slice())
        };

        let plain_len = sealed.len().checked_sub(16)?;
        // seq_num(8) || type(1) || version(2) || length(2)
        let mut aad = Vec::with_capacity(13);
        aad.extend_from_slice(&self.seq.to_be_bytes());
        aad.push(record.content_type);
        aad.extend_from_slice(&record.version.to_be_bytes());
        aad.extend_from_slice(&(plain_len as u16).to_be_bytes());

        let plain = self.key.open(nonce, &aad, sealed)?;
        self.seq += 1;
        Some((aad, plain))
    }
}

enum Opener {
    Tls13(Tls13Opener),
    Tls12(Tls12Opener),
}

fn secret<'a>(secrets: &'a SecretMap, name: SecretName) -> Result<&'a [u8], CaptureError> {
    secrets
        .get(&name)
        .map(|s| s.expose())
        .ok_or(CaptureError::MissingSecret(name))
}

fn tls13_opener(
    suite: &CipherSuite,
    secrets: &SecretMap,
    handshake: SecretName,
    application: SecretName,
) -> Result<Opener, CaptureError> {
    let handshake_keys = derive_tls13_keys(suite, secret(secrets, handshake)?)?;
    let application_keys = derive_tls13_keys(suite, secret(secrets, application)?)?;
    Ok(Opener::Tls13(Tls13Opener {
        handshake: RecordKey::new(suite.aead, &handshake_keys)?,
        application: RecordKey::new(suite.aead, &application_keys)?,
        in_application: false,
        seq: 0,
    }))
}

fn build_openers(
    suite: &CipherSuite,
    hello: &HelloInfo,
    secrets: &SecretMap,
) -> Result<(Opener, Opener), CaptureError> {
    match suite.version {
        ProtocolVersion::Tls13 => Ok((
            tls13_opener(
                suite,
                secrets,
                SecretName::ClientHandshakeTrafficSecret,
                SecretName::ClientTrafficSecret0,
            )?,
            tls13_opener(
                suite,
                secrets,
                SecretName::ServerHandshakeTrafficSecret,
                SecretName::ServerTrafficSecret0,
            )?,
        )),
        ProtocolVersion::Tls12 => {
            let master = secret(secrets, SecretName::MasterSecret)?;
            let (client, server) =
                derive_tls12_keys(suite, master, &hello.client_random, &hello.server_random)?;
            let explicit_nonce = suite.fixed_iv_len() == 4;
            let opener = |keys: &TrafficKeys| -> Result<Opener, CaptureError> {
                Ok(Opener::Tls12(Tls12Opener {
                    key: RecordKey::new(suite.aead, keys)?,
                    explicit_nonce,
                    active: false,
                    seq: 0,
                }))
            };
            Ok((opener(&client)?, opener(&server)?))
        }
    }
}

// =============================================================================
// RECORD MAP
// =============================================================================

fn plaintext_meta(record: &RawRecord) -> Result<RecordMeta, CaptureError> {
    Ok(RecordMeta {
        typ: RecordType::try_from(record.content_type)?,
        additional_data: HexBytes::default(),
        payload: HexBytes(record.fragment.clone()),
        ciphertext: HexBytes::default(),
    })
}

fn open_record(opener: &mut Opener, id: RecordId, record: &RawRecord) -> Result<RecordMeta, CaptureError> {
    let application_data = RecordType::ApplicationData.to_wire();

    match opener {
        Opener::Tls13(opener) => {
            // Only opaque application_data records are protected in TLS 1.3
            if record.content_type != application_data {
                return plaintext_meta(record);
            }
            let header = record.header();
            let inner = opener
                .open(&header, &record.fragment)
                .ok_or(CaptureError::Undecryptable(id))?;

            // content || inner type || zero padding
            let end = inner
                .iter()
                .rposition(|&b| b != 0)
                .ok_or(CaptureError::MalformedRecord(id))?;

            Ok(RecordMeta {
                typ: RecordType::try_from(inner[end])?,
                additional_data: HexBytes(header.to_vec()),
                payload: HexBytes(inner[..end].to_vec()),
                ciphertext: HexBytes(record.fragment.clone()),
            })
        }
        Opener::Tls12(opener) => {
            if !opener.active {
                if record.content_type == RecordType::ChangeCipherSpec.to_wire() {
                    opener.active = true;
                }
                return plaintext_meta(record);
            }
            let (aad, plain) = opener.open(record).ok_or(CaptureError::Undecryptable(id))?;

            Ok(RecordMeta {
                typ: RecordType::try_from(record.content_type)?,
                additional_data: HexBytes(aad),
                payload: HexBytes(plain),
                ciphertext: HexBytes(record.fragment.clone()),
            })
        }
    }
}

fn collect_direction(
    map: &mut RecordMap,
    direction: Direction,
    records: &[RawRecord],
    opener: &mut Opener,
) -> Result<(), CaptureError> {
    for (index, record) in (0u32..).zip(records) {
        let id = RecordId::new(direction, index);
        let meta = open_record(opener, id, record)?;
        map.insert(id, meta);
    }
    Ok(())
}

/// Reconstruct the record map of a finished session.
pub fn build_record_map(sent: &[u8], received: &[u8], secrets: &SecretMap) -> Result<RecordMap, CaptureError> {
    let (sent_records, sent_tail) = split_records(sent);
    let (received_records, received_tail) = split_records(received);
    if sent_tail > 0 || received_tail > 0 {
        warn!(
            "Dropping truncated record tail: sent={} received={}",
            sent_tail, received_tail
        );
    }

    let hello = parse_hellos(&sent_records, &received_records)?;
    let suite = CipherSuite::from_id(hello.cipher_suite)?;
    debug!("Negotiated suite 0x{:04x} ({:?})", suite.id, suite.version);

    let (mut client, mut server) = build_openers(&suite, &hello, secrets)?;

    let mut map = RecordMap::new();
    collect_direction(&mut map, Direction::ClientToServer, &sent_records, &mut client)?;
    collect_direction(&mut map, Direction::ServerToClient, &received_records, &mut server)?;

    debug!(
        "Reconstructed {} records ({} sent, {} received)",
        map.len(),
        sent_records.len(),
        received_records.len()
    );
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::artifacts::SecretBytes;

    const SUITE_AES128: u16 = 0x1301;

    fn frame(content_type: u8, fragment: &[u8]) -> Vec<u8> {
        let mut out = vec![content_type, 0x03, 0x03];
        out.extend_from_slice(&(fragment.len() as u16).to_be_bytes());
        out.extend_from_slice(fragment);
        out
    }

    fn client_hello() -> Vec<u8> {
        let mut body = vec![HANDSHAKE_CLIENT_HELLO, 0, 0, 40, 0x03, 0x03];
        body.extend_from_slice(&[0xC1; 32]);
        body.extend_from_slice(&[0, 0]);
        frame(22, &body)
    }

    fn server_hello(suite: u16) -> Vec<u8> {
        let mut body = vec![HANDSHAKE_SERVER_HELLO, 0, 0, 40, 0x03, 0x03];
        body.extend_from_slice(&[0x5E; 32]);
        body.push(4);
        body.extend_from_slice(&[0xAA; 4]);
        body.extend_from_slice(&suite.to_be_bytes());
        body.push(0);
        frame(22, &body)
    }

    struct Sealer {
        key: LessSafeKey,
        iv: Vec<u8>,
        seq: u64,
    }

    impl Sealer {
        fn tls13(secret: &[u8]) -> Self {
            let suite = CipherSuite::from_id(SUITE_AES128).unwrap();
            let keys = derive_tls13_keys(&suite, secret).unwrap();
            let key = LessSafeKey::new(UnboundKey::new(&ring::aead::AES_128_GCM, &keys.key).unwrap());
            Self { key, iv: keys.iv, seq: 0 }
        }

        fn seal13(&mut self, inner_type: u8, content: &[u8]) -> Vec<u8> {
            let mut buffer = content.to_vec();
            buffer.push(inner_type);
            buffer.extend_from_slice(&[0, 0]);

            let len = (buffer.len() + 16) as u16;
            let header = [23, 0x03, 0x03, (len >> 8) as u8, len as u8];

            let mut nonce = [0u8; 12];
            nonce.copy_from_slice(&self.iv);
            for (n, s) in nonce[4..].iter_mut().zip(self.seq.to_be_bytes()) {
                *n ^= s;
            }
            self.key
                .seal_in_place_append_tag(Nonce::assume_unique_for_key(nonce), Aad::from(header), &mut buffer)
                .unwrap();
            self.seq += 1;

            let mut out = header.to_vec();
            out.extend_from_slice(&buffer);
            out
        }
    }

    fn tls13_secrets() -> SecretMap {
        let mut secrets = SecretMap::new();
        secrets.insert(SecretName::ClientHandshakeTrafficSecret, SecretBytes::new(vec![0x01; 32]));
        secrets.insert(SecretName::ServerHandshakeTrafficSecret, SecretBytes::new(vec![0x02; 32]));
        secrets.insert(SecretName::ClientTrafficSecret0, SecretBytes::new(vec![0x03; 32]));
        secrets.insert(SecretName::ServerTrafficSecret0, SecretBytes::new(vec![0x04; 32]));
        secrets
    }

    fn tls13_session() -> (Vec<u8>, Vec<u8>) {
        let mut client_hs = Sealer::tls13(&[0x01; 32]);
        let mut server_hs = Sealer::tls13(&[0x02; 32]);
        let mut client_app = Sealer::tls13(&[0x03; 32]);
        let mut server_app = Sealer::tls13(&[0x04; 32]);

        let mut sent = client_hello();
        sent.extend(frame(20, &[1]));
        sent.extend(client_hs.seal13(22, b"client finished"));
        sent.extend(client_app.seal13(23, b"GET / HTTP/1.1\r\n\r\n"));

        let mut received = server_hello(SUITE_AES128);
        received.extend(frame(20, &[1]));
        received.extend(server_hs.seal13(22, b"encrypted extensions"));
        received.extend(server_hs.seal13(22, b"server finished"));
        received.extend(server_app.seal13(22, b"ticket"));
        received.extend(server_app.seal13(23, b"HTTP/1.1 200 OK\r\n\r\n"));

        (sent, received)
    }

    #[test]
    fn test_split_records_keeps_tail() {
        let mut stream = frame(22, b"abc");
        stream.extend(frame(23, b"de"));
        stream.extend_from_slice(&[23, 3, 3, 0, 10, 1, 2]);

        let (records, tail) = split_records(&stream);

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].fragment, b"abc");
        assert_eq!(records[1].header(), [23, 3, 3, 0, 2]);
        assert_eq!(tail, 7);
    }

    #[test]
    fn test_parse_hellos() {
        let (sent, _) = split_records(&client_hello());
        let (received, _) = split_records(&server_hello(SUITE_AES128));

        let hello = parse_hellos(&sent, &received).unwrap();

        assert_eq!(hello.client_random, [0xC1; 32]);
        assert_eq!(hello.server_random, [0x5E; 32]);
        assert_eq!(hello.cipher_suite, SUITE_AES128);
    }

    #[test]
    fn test_missing_server_hello() {
        let (sent, _) = split_records(&client_hello());
        let result = parse_hellos(&sent, &[]);
        assert!(matches!(result, Err(CaptureError::MissingHello(Direction::ServerToClient))));
    }

    #[test]
    fn test_tls13_record_map() {
        let (sent, received) = tls13_session();

        let map = build_record_map(&sent, &received, &tls13_secrets()).unwrap();
        assert_eq!(map.len(), 10);

        let hello = &map[&RecordId::new(Direction::ClientToServer, 0)];
        assert_eq!(hello.typ, RecordType::Handshake);
        assert!(!hello.is_protected());
        assert!(hello.additional_data.0.is_empty());

        let finished = &map[&RecordId::new(Direction::ClientToServer, 2)];
        assert_eq!(finished.typ, RecordType::Handshake);
        assert_eq!(finished.payload.0, b"client finished");
        assert_eq!(finished.additional_data.0.len(), RECORD_HEADER_LEN);
        assert_eq!(finished.additional_data.0[0], 23);

        let request = &map[&RecordId::new(Direction::ClientToServer, 3)];
        assert_eq!(request.typ, RecordType::ApplicationData);
        assert_eq!(request.payload.0, b"GET / HTTP/1.1\r\n\r\n");

        let ticket = &map[&RecordId::new(Direction::ServerToClient, 4)];
        assert_eq!(ticket.typ, RecordType::Handshake);
        assert_eq!(ticket.payload.0, b"ticket");

        let response = &map[&RecordId::new(Direction::ServerToClient, 5)];
        assert_eq!(response.typ, RecordType::ApplicationData);
        assert_eq!(response.payload.0, b"HTTP/1.1 200 OK\r\n\r\n");
        assert_eq!(response.ciphertext.0.len(), response.payload.0.len() + 3 + 16);
    }

    #[test]
    fn test_tampered_record_is_capture_error() {
        let (sent, mut received) = tls13_session();
        let last = received.len() - 1;
        received[last] ^= 0xFF;

        let result = build_record_map(&sent, &received, &tls13_secrets());
        assert!(matches!(
            result,
            Err(CaptureError::Undecryptable(id)) if id == RecordId::new(Direction::ServerToClient, 5)
        ));
    }

    #[test]
    fn test_missing_secret() {
        let (sent, received) = tls13_session();
        let mut secrets = tls13_secrets();
        secrets.remove(&SecretName::ServerTrafficSecret0);

        let result = build_record_map(&sent, &received, &secrets);
        assert!(matches!(result, Err(CaptureError::MissingSecret(SecretName::ServerTrafficSecret0))));
    }

    #[test]
    fn test_tls12_gcm_record_map() {
        let suite = CipherSuite::from_id(0xC02B).unwrap();
        let master = vec![0x33; 48];
        let (client_keys, _) = derive_tls12_keys(&suite, &master, &[0xC1; 32], &[0x5E; 32]).unwrap();
        let key = LessSafeKey::new(UnboundKey::new(&ring::aead::AES_128_GCM, &client_keys.key).unwrap());

        let plaintext = b"GET / HTTP/1.1\r\n\r\n";
        let explicit = [0u8, 0, 0, 0, 0, 0, 0, 7];
        let mut nonce = [0u8; 12];
        nonce[..4].copy_from_slice(&client_keys.iv);
        nonce[4..].copy_from_slice(&explicit);
        let mut aad = 0u64.to_be_bytes().to_vec();
        aad.extend_from_slice(&[23, 0x03, 0x03]);
        aad.extend_from_slice(&(plaintext.len() as u16).to_be_bytes());

        let mut sealed = plaintext.to_vec();
        key.seal_in_place_append_tag(Nonce::assume_unique_for_key(nonce), Aad::from(&aad), &mut sealed)
            .unwrap();
        let mut fragment = explicit.to_vec();
        fragment.extend_from_slice(&sealed);

        let mut sent = client_hello();
        sent.extend(frame(20, &[1]));
        sent.extend(frame(23, &fragment));
        let received = server_hello(0xC02B);

        let mut secrets = SecretMap::new();
        secrets.insert(SecretName::MasterSecret, SecretBytes::new(master));

        let map = build_record_map(&sent, &received, &secrets).unwrap();
        let request = &map[&RecordId::new(Direction::ClientToServer, 2)];

        assert_eq!(request.typ, RecordType::ApplicationData);
        assert_eq!(request.payload.0, plaintext);
        assert_eq!(request.additional_data.0, aad);
        assert_eq!(request.ciphertext.0, fragment);
    }
}
