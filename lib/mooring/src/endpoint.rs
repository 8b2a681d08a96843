use crate::session::{Event, Session, SessionState, Transport};
use crate::support::{ErrorUtils, Fault, TlsError, TlsResult};
use crate::trust::{ChainVerifier, Signer, ValidityCheck};
use brine::logging;
use mio::net::TcpStream;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, ToSocketAddrs};
use std::time;

/// mio stream wrapped as a session transport. Read pausing is a
/// session-side flag the poll driver consults, so the pause hooks stay
/// no-ops here.
pub struct TcpTransport {
    stream: TcpStream,
}

impl io::Read for TcpTransport {
    #[inline]
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl io::Write for TcpTransport {
    #[inline]
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    #[inline]
    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl Transport for TcpTransport {
    fn end(&mut self) {
        let _ = self.stream.shutdown(Shutdown::Write);
    }

    fn destroy(&mut self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

/// Dials the broker and pumps transport readiness into a single session.
/// The client-side counterpart of a server accept loop: one stream, one
/// poll, periodic housekeeping for the handshake deadline.
pub struct Endpoint {
    poll: mio::Poll,
    events: mio::Events,
    session: Session<TcpTransport>,
    connected: bool,
    opened: time::Instant,
    log: logging::Logger,
}

impl Endpoint {
    const TOKEN: mio::Token = mio::Token(0);
    const HANDSHAKE_TIMEOUT: time::Duration = time::Duration::from_secs(10);
    const ZERO_TIME: time::Duration = time::Duration::from_secs(0);

    /// Opens a connection to `address` (`<host_or_ip>:<port>`) and starts
    /// the session against `host`.
    pub fn connect<'a, L: Into<Option<&'a logging::Logger>>>(
        address: &str,
        host: String,
        client_cert: Vec<u8>,
        validity: ValidityCheck,
        verifier: Box<dyn ChainVerifier>,
        signer: Box<dyn Signer>,
        log: L,
    ) -> TlsResult<Endpoint> {
        let endpoint_log = match log.into() {
            Some(log) => log.new(logging::o!()),
            _ => logging::Logger::root(logging::Discard, logging::o!()),
        };

        let addr = resolve(address)?;
        let stream = TcpStream::connect(&addr)?;

        let poll = mio::Poll::new()?;
        poll.register(
            &stream,
            Self::TOKEN,
            mio::Ready::readable() | mio::Ready::writable(),
            mio::PollOpt::edge(),
        )?;

        logging::debug!(endpoint_log, "dialing broker"; "context" => "endpoint", "address" => address);

        let session = Session::new(
            host,
            client_cert,
            validity,
            verifier,
            signer,
            TcpTransport { stream },
            &endpoint_log,
        );

        Ok(Endpoint {
            poll,
            events: mio::Events::with_capacity(64),
            session,
            connected: false,
            opened: time::Instant::now(),
            log: endpoint_log,
        })
    }

    /// One pump iteration: poll readiness, feed the session, enforce the
    /// handshake deadline. Session faults surface through the drained
    /// events, not this call.
    pub fn sync(&mut self, now: time::Instant) {
        self.poll
            .poll(&mut self.events, Some(Self::ZERO_TIME))
            .expect("Endpoint poll failed");

        for event in &self.events {
            let readiness = event.readiness();

            if readiness.is_writable() {
                if !self.connected {
                    self.connected = true;
                    let _ = self.session.connected();
                }

                let _ = self.session.flush();
            }

            if readiness.is_readable() && !self.session.reads_paused() {
                if self.session.receive().has_failed() {
                    logging::debug!(self.log, "session fault during receive"; "context" => "endpoint");
                }
            }
        }

        if !self.session.is_established()
            && self.session.state() != SessionState::Terminated
            && now.duration_since(self.opened) >= Self::HANDSHAKE_TIMEOUT
        {
            logging::warn!(self.log, "handshake deadline exceeded"; "context" => "endpoint");
            self.session
                .destroy(Some(Fault::Io(io::ErrorKind::TimedOut)));
        }
    }

    #[inline]
    pub fn poll_event(&mut self) -> Option<Event> {
        self.session.poll_event()
    }

    #[inline]
    pub fn write(&mut self, bytes: &[u8]) -> TlsResult<bool> {
        self.session.write(bytes)
    }

    #[inline]
    pub fn end(&mut self) {
        self.session.end()
    }

    #[inline]
    pub fn destroy(&mut self) {
        self.session.destroy(None)
    }

    #[inline]
    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    #[inline]
    pub fn session_mut(&mut self) -> &mut Session<TcpTransport> {
        &mut self.session
    }
}

fn resolve(address: &str) -> TlsResult<SocketAddr> {
    address
        .to_socket_addrs()
        .map_err(TlsError::from)?
        .next()
        .ok_or(TlsError::Fatal(Fault::AddrParse))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trust::{LocalSigner, PinnedVerifier};
    use brine::crypto::{RsaPrivateKey, RsaPublicKey};
    use std::io::Read as _;
    use std::net::TcpListener;

    #[test]
    fn test_resolve_rejects_garbage() {
        assert!(resolve("not an address").is_err());
    }

    #[test]
    fn test_dial_emits_client_hello() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let key = RsaPrivateKey::new(&mut rand::rngs::OsRng, 1024).unwrap();
        let verifier = Box::new(PinnedVerifier::new("broker.test".into(), RsaPublicKey::from(&key)));
        let signer = Box::new(LocalSigner::new(
            RsaPrivateKey::new(&mut rand::rngs::OsRng, 1024).unwrap(),
        ));

        let mut endpoint = Endpoint::connect(
            &address,
            "broker.test".into(),
            vec![0x30, 0x01],
            ValidityCheck::Skip,
            verifier,
            signer,
            None,
        )
        .unwrap();

        let (mut accepted, _) = listener.accept().unwrap();
        accepted
            .set_read_timeout(Some(time::Duration::from_secs(5)))
            .unwrap();

        // Pump until the ClientHello record shows up on the wire.
        let mut wire = Vec::new();
        for _ in 0..200 {
            endpoint.sync(time::Instant::now());

            if endpoint.state() == SessionState::Handshaking {
                let mut chunk = [0u8; 1024];
                if let Ok(count) = accepted.read(&mut chunk) {
                    wire.extend_from_slice(&chunk[..count]);
                }
            }

            if wire.len() >= 6 {
                break;
            }

            std::thread::sleep(time::Duration::from_millis(10));
        }

        // Record header: handshake, TLS 1.2.
        assert!(wire.len() >= 5);
        assert_eq!(&wire[..3], &[22, 3, 3]);
        assert_eq!(wire[5], 1);
    }
}
