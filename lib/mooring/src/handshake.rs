use crate::alert::AlertDescription;
use crate::cipher::{Cipher, Decipher, KEY_SIZE, MAC_SIZE};
use crate::record::ContentType;
use crate::support::{Fault, TlsError, TlsResult};
use crate::trust::{ChainVerifier, ServerIdentity, SignOutcome, Signer, ValidityCheck};
use brine::crypto;
use brine::logging;
use byteorder::{BigEndian, ByteOrder};

pub const HANDSHAKE_HEADER_SIZE: usize = 4;
pub const RANDOM_LEN: usize = 32;
pub const VERIFY_DATA_LEN: usize = 12;

const MASTER_SECRET_LEN: usize = 48;
const PRE_MASTER_LEN: usize = 48;
const IV_SEED_LEN: usize = 16;
const KEY_BLOCK_LEN: usize = 2 * (MAC_SIZE + KEY_SIZE) + IV_SEED_LEN;

const PROTOCOL_VERSION: [u8; 2] = [3, 3];
// TLS_RSA_WITH_AES_128_CBC_SHA, the single suite on offer.
const CIPHER_SUITE: [u8; 2] = [0x00, 0x2f];
const COMPRESSION_NULL: u8 = 0;
// rsa_pkcs1_sha256
const SIGNATURE_SCHEME: [u8; 2] = [0x04, 0x01];

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum HandshakeType {
    HelloRequest = 0,
    ClientHello = 1,
    ServerHello = 2,
    Certificate = 11,
    ServerKeyExchange = 12,
    CertificateRequest = 13,
    ServerHelloDone = 14,
    CertificateVerify = 15,
    ClientKeyExchange = 16,
    Finished = 20,
}

impl HandshakeType {
    pub fn from_u8(value: u8) -> Option<HandshakeType> {
        use self::HandshakeType::*;

        Some(match value {
            0 => HelloRequest,
            1 => ClientHello,
            2 => ServerHello,
            11 => Certificate,
            12 => ServerKeyExchange,
            13 => CertificateRequest,
            14 => ServerHelloDone,
            15 => CertificateVerify,
            16 => ClientKeyExchange,
            20 => Finished,
            _ => return None,
        })
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Direction {
    Client,
    Server,
}

/// Ordered log of every handshake message exchanged in either direction,
/// HelloRequest excluded. Feeds the Finished PRF and the CertificateVerify
/// signature.
pub struct Transcript {
    entries: Vec<(Direction, HandshakeType, Vec<u8>)>,
}

impl Transcript {
    #[inline]
    pub fn new() -> Transcript {
        Transcript { entries: Vec::new() }
    }

    #[inline]
    pub fn append(&mut self, direction: Direction, msg_type: HandshakeType, wire: Vec<u8>) {
        self.entries.push((direction, msg_type, wire));
    }

    pub fn concat(&self) -> Vec<u8> {
        let total = self.entries.iter().map(|(_, _, wire)| wire.len()).sum();
        let mut joined = Vec::with_capacity(total);

        for (_, _, wire) in &self.entries {
            joined.extend_from_slice(wire);
        }

        joined
    }

    #[inline]
    pub fn hash(&self) -> [u8; 32] {
        crypto::sha256(&self.concat())
    }

    #[inline]
    fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Sequential reader over a handshake message body. Truncated input is a
/// decode fault.
struct Reader<'a> {
    bytes: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Reader<'a> {
        Reader { bytes }
    }

    fn take(&mut self, count: usize) -> TlsResult<&'a [u8]> {
        if self.bytes.len() < count {
            return Err(TlsError::Fatal(Fault::Protocol(AlertDescription::DecodeError)));
        }

        let (head, tail) = self.bytes.split_at(count);
        self.bytes = tail;
        Ok(head)
    }

    fn read_u8(&mut self) -> TlsResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_u16(&mut self) -> TlsResult<u16> {
        Ok(BigEndian::read_u16(self.take(2)?))
    }

    fn read_u24(&mut self) -> TlsResult<u32> {
        Ok(BigEndian::read_u24(self.take(3)?))
    }

    fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// The server message the engine will accept next. The handshake is a fixed
/// sequence, so a single discriminator carries the whole ordering contract.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Expect {
    ServerHello,
    Certificate,
    CertificateRequest,
    ServerHelloDone,
    Signature,
    ChangeCipherSpec,
    Finished,
    Done,
}

/// Instructions handed back to the session. `Send` payloads are composed in
/// order; cipher installation is an explicit step so the Finished message
/// goes out under protection while the flight before it does not.
#[derive(Debug)]
pub enum Action {
    Send(ContentType, Vec<u8>),
    InstallCipher(Cipher),
    InstallDecipher(Decipher),
    Established,
}

#[inline]
fn fatal<T>(description: AlertDescription) -> TlsResult<T> {
    Err(TlsError::Fatal(Fault::Protocol(description)))
}

#[inline]
fn handshake_wire(msg_type: HandshakeType, body: &[u8]) -> Vec<u8> {
    let mut wire = Vec::with_capacity(HANDSHAKE_HEADER_SIZE + body.len());
    wire.push(msg_type as u8);
    wire.extend_from_slice(&[0, 0, 0]);
    BigEndian::write_u24(&mut wire[1..4], body.len() as u32);
    wire.extend_from_slice(body);
    wire
}

/// Matches the leaf's subject CN against the configured host. A CN starting
/// with `*` matches any host whose name ends with the remainder.
pub fn host_matches(subject_cn: &str, host: &str) -> bool {
    match subject_cn.strip_prefix('*') {
        Some(suffix) => host.len() > suffix.len() && host.ends_with(suffix),
        None => subject_cn == host,
    }
}

/// Drives the client side of the handshake: emits the client flights,
/// enforces the server message order, derives keys and verifies Finished.
pub struct Engine {
    expect: Expect,
    host: String,
    client_cert: Vec<u8>,
    validity: ValidityCheck,
    verifier: Box<dyn ChainVerifier>,
    signer: Box<dyn Signer>,
    entropy: fn(&mut [u8]),
    client_random: [u8; RANDOM_LEN],
    server_random: [u8; RANDOM_LEN],
    session_id: Vec<u8>,
    pre_master: [u8; PRE_MASTER_LEN],
    master_secret: [u8; MASTER_SECRET_LEN],
    transcript: Transcript,
    server_identity: Option<ServerIdentity>,
    pending_cipher: Option<Cipher>,
    pending_decipher: Option<Decipher>,
    log: logging::Logger,
}

impl Engine {
    pub fn new<'a, L: Into<Option<&'a logging::Logger>>>(
        host: String,
        client_cert: Vec<u8>,
        validity: ValidityCheck,
        verifier: Box<dyn ChainVerifier>,
        signer: Box<dyn Signer>,
        log: L,
    ) -> Engine {
        let engine_log = match log.into() {
            Some(log) => log.new(logging::o!()),
            _ => logging::Logger::root(logging::Discard, logging::o!()),
        };

        Engine {
            expect: Expect::ServerHello,
            host,
            client_cert,
            validity,
            verifier,
            signer,
            entropy: crypto::random_bytes,
            client_random: [0u8; RANDOM_LEN],
            server_random: [0u8; RANDOM_LEN],
            session_id: Vec::new(),
            pre_master: [0u8; PRE_MASTER_LEN],
            master_secret: [0u8; MASTER_SECRET_LEN],
            transcript: Transcript::new(),
            server_identity: None,
            pending_cipher: None,
            pending_decipher: None,
            log: engine_log,
        }
    }

    /// Replaces the entropy source. Scripted handshakes pin the client
    /// random and pre-master this way.
    #[inline]
    pub fn set_entropy(&mut self, entropy: fn(&mut [u8])) {
        self.entropy = entropy;
    }

    #[inline]
    pub fn expect(&self) -> Expect {
        self.expect
    }

    #[inline]
    pub fn is_established(&self) -> bool {
        self.expect == Expect::Done
    }

    /// Opens the handshake with the ClientHello flight.
    pub fn start(&mut self) -> TlsResult<Vec<Action>> {
        (self.entropy)(&mut self.client_random);

        let mut body = Vec::with_capacity(2 + RANDOM_LEN + 1 + 2 + 2 + 1 + 1);
        body.extend_from_slice(&PROTOCOL_VERSION);
        body.extend_from_slice(&self.client_random);
        // Empty session id, one cipher suite, null compression, no
        // extensions.
        body.push(0);
        body.extend_from_slice(&[0, 2]);
        body.extend_from_slice(&CIPHER_SUITE);
        body.push(1);
        body.push(COMPRESSION_NULL);

        logging::debug!(self.log, "sending client hello"; "context" => "handshake");

        Ok(vec![self.send_client(HandshakeType::ClientHello, &body)])
    }

    /// Handles one complete inbound handshake message (wire bytes including
    /// the 4-byte header).
    pub fn handle_message(&mut self, wire: Vec<u8>) -> TlsResult<Vec<Action>> {
        if wire.len() < HANDSHAKE_HEADER_SIZE {
            return fatal(AlertDescription::DecodeError);
        }

        let msg_type = match HandshakeType::from_u8(wire[0]) {
            Some(msg_type) => msg_type,
            None => return fatal(AlertDescription::DecodeError),
        };

        if BigEndian::read_u24(&wire[1..4]) as usize + HANDSHAKE_HEADER_SIZE != wire.len() {
            return fatal(AlertDescription::DecodeError);
        }

        // Renegotiation is refused by inaction: a HelloRequest is dropped
        // without touching the transcript.
        if msg_type == HandshakeType::HelloRequest {
            logging::debug!(self.log, "ignoring hello request"; "context" => "handshake");
            return Ok(Vec::new());
        }

        logging::trace!(self.log, "handshake message";
                        "context" => "handshake",
                        "msg_type" => ?msg_type,
                        "expect" => ?self.expect);

        match (self.expect, msg_type) {
            (Expect::ServerHello, HandshakeType::ServerHello) => self.on_server_hello(wire),
            (Expect::Certificate, HandshakeType::Certificate) => self.on_certificate(wire),
            (Expect::CertificateRequest, HandshakeType::CertificateRequest) => {
                self.on_certificate_request(wire)
            }
            (Expect::ServerHelloDone, HandshakeType::ServerHelloDone) => self.on_server_hello_done(wire),
            (Expect::Finished, HandshakeType::Finished) => self.on_finished(wire),
            _ => fatal(AlertDescription::UnexpectedMessage),
        }
    }

    /// Handles the server ChangeCipherSpec. Only legal right before
    /// Finished; installing the decipher here is what makes an early
    /// Finished unexpected.
    pub fn handle_change_cipher_spec(&mut self, body: u8) -> TlsResult<Vec<Action>> {
        if self.expect != Expect::ChangeCipherSpec {
            return fatal(AlertDescription::UnexpectedMessage);
        }

        if body != 1 {
            return fatal(AlertDescription::DecodeError);
        }

        let decipher = self
            .pending_decipher
            .take()
            .expect("Decipher must be derived before the server change cipher spec");

        self.expect = Expect::Finished;

        Ok(vec![Action::InstallDecipher(decipher)])
    }

    /// Delivers the signature a deferred signer produced. Completions that
    /// race the handshake into another state are dropped.
    pub fn signature_ready(&mut self, result: Result<Vec<u8>, crate::trust::SignerError>) -> TlsResult<Vec<Action>> {
        if self.expect != Expect::Signature {
            logging::debug!(self.log, "discarding stale signature"; "context" => "handshake");
            return Ok(Vec::new());
        }

        let signature = match result {
            Ok(signature) => signature,
            Err(_) => return fatal(AlertDescription::InternalError),
        };

        self.finish_flight(signature)
    }

    fn on_server_hello(&mut self, wire: Vec<u8>) -> TlsResult<Vec<Action>> {
        {
            let mut reader = Reader::new(&wire[HANDSHAKE_HEADER_SIZE..]);

            if reader.take(2)? != PROTOCOL_VERSION {
                return fatal(AlertDescription::IllegalParameter);
            }

            self.server_random.copy_from_slice(reader.take(RANDOM_LEN)?);

            let session_id_len = reader.read_u8()? as usize;
            self.session_id = reader.take(session_id_len)?.to_vec();

            if reader.take(2)? != CIPHER_SUITE {
                return fatal(AlertDescription::IllegalParameter);
            }

            if reader.read_u8()? != COMPRESSION_NULL {
                return fatal(AlertDescription::IllegalParameter);
            }

            if !reader.is_empty() {
                return fatal(AlertDescription::IllegalParameter);
            }
        }

        self.transcript.append(Direction::Server, HandshakeType::ServerHello, wire);
        self.derive_keys();
        self.expect = Expect::Certificate;

        logging::debug!(self.log, "server hello accepted, keys derived"; "context" => "handshake");

        Ok(Vec::new())
    }

    /// Both randoms are known once ServerHello lands, so the whole key block
    /// is cut immediately. The cipher halves stay parked until the change
    /// cipher spec points on both sides.
    fn derive_keys(&mut self) {
        self.pre_master[..2].copy_from_slice(&PROTOCOL_VERSION);
        (self.entropy)(&mut self.pre_master[2..]);

        let mut randoms = [0u8; 2 * RANDOM_LEN];
        randoms[..RANDOM_LEN].copy_from_slice(&self.client_random);
        randoms[RANDOM_LEN..].copy_from_slice(&self.server_random);

        let master = crypto::prf(&self.pre_master, b"master secret", &randoms, MASTER_SECRET_LEN);
        self.master_secret.copy_from_slice(&master);

        // Key expansion seeds with the randoms swapped.
        randoms[..RANDOM_LEN].copy_from_slice(&self.server_random);
        randoms[RANDOM_LEN..].copy_from_slice(&self.client_random);

        let key_block = crypto::prf(&self.master_secret, b"key expansion", &randoms, KEY_BLOCK_LEN);

        let mut client_mac = [0u8; MAC_SIZE];
        let mut server_mac = [0u8; MAC_SIZE];
        let mut client_key = [0u8; KEY_SIZE];
        let mut server_key = [0u8; KEY_SIZE];
        let mut iv_seed = [0u8; IV_SEED_LEN];

        client_mac.copy_from_slice(&key_block[..20]);
        server_mac.copy_from_slice(&key_block[20..40]);
        client_key.copy_from_slice(&key_block[40..56]);
        server_key.copy_from_slice(&key_block[56..72]);
        iv_seed.copy_from_slice(&key_block[72..]);

        self.pending_cipher = Some(Cipher::new(client_mac, client_key, u128::from_le_bytes(iv_seed)));
        self.pending_decipher = Some(Decipher::new(server_mac, server_key));
    }

    fn on_certificate(&mut self, wire: Vec<u8>) -> TlsResult<Vec<Action>> {
        let chain = {
            let mut reader = Reader::new(&wire[HANDSHAKE_HEADER_SIZE..]);
            let list_len = reader.read_u24()? as usize;
            let mut list = Reader::new(reader.take(list_len)?);

            if !reader.is_empty() {
                return fatal(AlertDescription::DecodeError);
            }

            let mut chain: Vec<Vec<u8>> = Vec::new();
            while !list.is_empty() {
                let cert_len = list.read_u24()? as usize;
                chain.push(list.take(cert_len)?.to_vec());
            }

            chain
        };

        if chain.is_empty() {
            return fatal(AlertDescription::BadCertificate);
        }

        let identity = match self.verifier.verify(&chain, &self.validity) {
            Ok(identity) => identity,
            Err(err) => {
                logging::debug!(self.log, "chain verification failed";
                                "context" => "handshake",
                                "error" => ?err);
                return fatal(err.alert());
            }
        };

        if !host_matches(&identity.subject_cn, &self.host) {
            logging::debug!(self.log, "certificate name mismatch";
                            "context" => "handshake",
                            "subject_cn" => &identity.subject_cn,
                            "host" => &self.host);
            return fatal(AlertDescription::BadCertificate);
        }

        self.server_identity = Some(identity);
        self.transcript.append(Direction::Server, HandshakeType::Certificate, wire);
        self.expect = Expect::CertificateRequest;

        Ok(Vec::new())
    }

    /// The request is checked for well-formedness only; the client always
    /// answers with its single configured certificate.
    fn on_certificate_request(&mut self, wire: Vec<u8>) -> TlsResult<Vec<Action>> {
        {
            let mut reader = Reader::new(&wire[HANDSHAKE_HEADER_SIZE..]);

            let cert_types_len = reader.read_u8()? as usize;
            reader.take(cert_types_len)?;

            let sig_algs_len = reader.read_u16()? as usize;
            if sig_algs_len % 2 != 0 {
                return fatal(AlertDescription::DecodeError);
            }
            reader.take(sig_algs_len)?;

            let authorities_len = reader.read_u16()? as usize;
            reader.take(authorities_len)?;

            if !reader.is_empty() {
                return fatal(AlertDescription::DecodeError);
            }
        }

        self.transcript
            .append(Direction::Server, HandshakeType::CertificateRequest, wire);
        self.expect = Expect::ServerHelloDone;

        Ok(Vec::new())
    }

    fn on_server_hello_done(&mut self, wire: Vec<u8>) -> TlsResult<Vec<Action>> {
        if wire.len() != HANDSHAKE_HEADER_SIZE {
            return fatal(AlertDescription::IllegalParameter);
        }

        self.transcript
            .append(Direction::Server, HandshakeType::ServerHelloDone, wire);

        let mut actions = Vec::new();

        // Certificate: list-of-lists around the single configured cert.
        let mut cert_body = Vec::with_capacity(6 + self.client_cert.len());
        cert_body.extend_from_slice(&[0, 0, 0]);
        BigEndian::write_u24(&mut cert_body[0..3], (self.client_cert.len() + 3) as u32);
        cert_body.extend_from_slice(&[0, 0, 0]);
        BigEndian::write_u24(&mut cert_body[3..6], self.client_cert.len() as u32);
        cert_body.extend_from_slice(&self.client_cert);
        actions.push(self.send_client(HandshakeType::Certificate, &cert_body));

        // ClientKeyExchange: the pre-master under the server's public key.
        let public_key = &self
            .server_identity
            .as_ref()
            .expect("Server identity must be set before the client flight")
            .public_key;

        let encrypted = match crypto::rsa_encrypt(public_key, &self.pre_master) {
            Some(encrypted) => encrypted,
            None => return fatal(AlertDescription::InternalError),
        };

        let mut kx_body = Vec::with_capacity(2 + encrypted.len());
        kx_body.extend_from_slice(&(encrypted.len() as u16).to_be_bytes());
        kx_body.extend_from_slice(&encrypted);
        actions.push(self.send_client(HandshakeType::ClientKeyExchange, &kx_body));

        // The CertificateVerify signature covers everything sent so far.
        let transcript_bytes = self.transcript.concat();

        match self.signer.sign(&transcript_bytes) {
            Ok(SignOutcome::Signature(signature)) => {
                actions.extend(self.finish_flight(signature)?);
            }
            Ok(SignOutcome::Pending) => {
                logging::debug!(self.log, "awaiting external signature"; "context" => "handshake");
                self.expect = Expect::Signature;
            }
            Err(_) => return fatal(AlertDescription::InternalError),
        }

        Ok(actions)
    }

    /// CertificateVerify, ChangeCipherSpec, cipher activation and Finished.
    fn finish_flight(&mut self, signature: Vec<u8>) -> TlsResult<Vec<Action>> {
        let mut actions = Vec::new();

        let mut verify_body = Vec::with_capacity(4 + signature.len());
        verify_body.extend_from_slice(&SIGNATURE_SCHEME);
        verify_body.extend_from_slice(&(signature.len() as u16).to_be_bytes());
        verify_body.extend_from_slice(&signature);
        actions.push(self.send_client(HandshakeType::CertificateVerify, &verify_body));

        actions.push(Action::Send(ContentType::ChangeCipherSpec, vec![1]));

        let cipher = self
            .pending_cipher
            .take()
            .expect("Cipher must be derived before the client change cipher spec");
        actions.push(Action::InstallCipher(cipher));

        let verify_data = crypto::prf(
            &self.master_secret,
            b"client finished",
            &self.transcript.hash(),
            VERIFY_DATA_LEN,
        );
        actions.push(self.send_client(HandshakeType::Finished, &verify_data));

        self.expect = Expect::ChangeCipherSpec;

        logging::debug!(self.log, "client flight complete"; "context" => "handshake");

        Ok(actions)
    }

    fn on_finished(&mut self, wire: Vec<u8>) -> TlsResult<Vec<Action>> {
        if wire.len() != HANDSHAKE_HEADER_SIZE + VERIFY_DATA_LEN {
            return fatal(AlertDescription::DecodeError);
        }

        let expected = crypto::prf(
            &self.master_secret,
            b"server finished",
            &self.transcript.hash(),
            VERIFY_DATA_LEN,
        );

        if !crypto::fixed_time_eq(&wire[HANDSHAKE_HEADER_SIZE..], &expected) {
            return fatal(AlertDescription::DecryptError);
        }

        self.transcript.append(Direction::Server, HandshakeType::Finished, wire);
        self.expect = Expect::Done;
        self.release();

        logging::debug!(self.log, "server finished verified"; "context" => "handshake");

        Ok(vec![Action::Established])
    }

    /// Handshake-only material is dead weight once the session is
    /// established.
    fn release(&mut self) {
        self.transcript.clear();
        self.pre_master = [0u8; PRE_MASTER_LEN];
        self.master_secret = [0u8; MASTER_SECRET_LEN];
        self.server_identity = None;
    }

    fn send_client(&mut self, msg_type: HandshakeType, body: &[u8]) -> Action {
        let wire = handshake_wire(msg_type, body);
        self.transcript.append(Direction::Client, msg_type, wire.clone());
        Action::Send(ContentType::Handshake, wire)
    }
}
