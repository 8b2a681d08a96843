use crate::alert::{Alert, AlertDescription, AlertLevel};
use crate::buffer::Buffer;
use crate::cipher::{Cipher, Decipher};
use crate::fragment::{Defragmenter, Message};
use crate::handshake::{Action, Engine};
use crate::record::{self, ContentType};
use crate::support::{Fault, TlsError, TlsResult};
use crate::trust::{ChainVerifier, Signer, SignerError, ValidityCheck};
use brine::logging;
use std::collections::VecDeque;
use std::io;

pub const READ_BUF_SIZE: usize = 65536;
pub const WRITE_BUF_SIZE: usize = 8 * 65536;

// Undrained inbound plaintext past the high water mark pauses the
// transport; draining below the low water mark resumes it.
const READ_HIGH_WATER: usize = 65536;
const READ_LOW_WATER: usize = READ_HIGH_WATER / 2;

/// The reliable byte-stream underneath the session. `WouldBlock` is the
/// backpressure signal in both directions. Test rigs inject scripted
/// implementations.
pub trait Transport: io::Read + io::Write {
    /// Graceful shutdown of the write side.
    fn end(&mut self);
    /// Hard teardown without flushing.
    fn destroy(&mut self);
    fn pause(&mut self) {}
    fn resume(&mut self) {}
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SessionState {
    Connecting,
    Handshaking,
    Established,
    Terminated,
}

/// Upward-facing events, drained by the upper layer in order.
#[derive(Debug, Eq, PartialEq)]
pub enum Event {
    /// Decrypted application bytes.
    Data(Vec<u8>),
    /// The outstanding write settled successfully; more writes are welcome.
    Writable,
    /// The outstanding write settled with a failure.
    WriteError(Fault),
    /// Read side ended.
    End,
    /// The session is fully closed. Always strictly after `End`.
    Close,
    /// Session failure with no write in flight.
    Error(Fault),
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Reason {
    Final,
    Destroy,
    Socket,
    Error,
    Alert,
    CloseNotify,
}

/// At most one upper-layer write is outstanding at any time. `Flight`
/// buffers the single chunk accepted before the handshake completed;
/// `Drain` marks a write waiting out transport backpressure.
enum PendingWrite {
    Flight(Vec<u8>),
    Drain,
}

/// A mutually-authenticated TLS 1.2 session over an injected transport.
/// Presents the duplex stream contract upward and is driven by transport
/// readiness from below.
pub struct Session<T: Transport> {
    transport: Option<T>,
    state: SessionState,

    read_buffer: Buffer,
    write_buffer: Buffer,

    cipher: Option<Cipher>,
    decipher: Option<Decipher>,
    defrag: Defragmenter,
    engine: Engine,

    pending: Option<PendingWrite>,
    events: VecDeque<Event>,

    queued_data: usize,
    paused: bool,

    log: logging::Logger,
}

impl<T: Transport> Session<T> {
    pub fn new<'a, L: Into<Option<&'a logging::Logger>>>(
        host: String,
        client_cert: Vec<u8>,
        validity: ValidityCheck,
        verifier: Box<dyn ChainVerifier>,
        signer: Box<dyn Signer>,
        transport: T,
        log: L,
    ) -> Session<T> {
        let session_log = match log.into() {
            Some(log) => log.new(logging::o!()),
            _ => logging::Logger::root(logging::Discard, logging::o!()),
        };

        let engine = Engine::new(
            host,
            client_cert,
            validity,
            verifier,
            signer,
            &session_log,
        );

        Session {
            transport: Some(transport),
            state: SessionState::Connecting,
            read_buffer: Buffer::new(READ_BUF_SIZE),
            write_buffer: Buffer::new(WRITE_BUF_SIZE),
            cipher: None,
            decipher: None,
            defrag: Defragmenter::new(),
            engine,
            pending: None,
            events: VecDeque::new(),
            queued_data: 0,
            paused: false,
            log: session_log,
        }
    }

    #[inline]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[inline]
    pub fn is_established(&self) -> bool {
        self.state == SessionState::Established
    }

    /// Pins the handshake entropy source. Scripted sessions call this
    /// before `connected`.
    #[inline]
    pub fn set_entropy(&mut self, entropy: fn(&mut [u8])) {
        self.engine.set_entropy(entropy);
    }

    /// True while inbound processing is suspended because the upper layer
    /// has not drained its data events. Poll drivers consult this before
    /// reading the transport.
    #[inline]
    pub fn reads_paused(&self) -> bool {
        self.paused
    }

    #[inline]
    pub fn has_events(&self) -> bool {
        !self.events.is_empty()
    }

    /// Drains the next upward event. Draining data replenishes the inbound
    /// window and resumes a paused transport.
    pub fn poll_event(&mut self) -> Option<Event> {
        let event = self.events.pop_front()?;

        if let Event::Data(ref bytes) = event {
            self.queued_data -= bytes.len();

            if self.paused && self.queued_data <= READ_LOW_WATER {
                self.paused = false;
                if let Some(transport) = self.transport.as_mut() {
                    transport.resume();
                }
            }
        }

        Some(event)
    }

    /// The transport reported connected. Opens the handshake.
    pub fn connected(&mut self) -> TlsResult<()> {
        if self.state != SessionState::Connecting {
            return Ok(());
        }

        logging::debug!(self.log, "transport connected, handshaking"; "context" => "session");

        self.state = SessionState::Handshaking;

        let result = self.engine.start().and_then(|actions| self.apply(actions));
        self.guard(result)
    }

    /// Pulls everything the transport has to offer and runs the inbound
    /// parse pass. Data arriving after termination is ignored.
    pub fn receive(&mut self) -> TlsResult<usize> {
        let ingress = {
            let transport = match self.transport.as_mut() {
                Some(transport) => transport,
                None => return Ok(0),
            };

            match self.read_buffer.ingress(transport) {
                Ok(ingress) => ingress,
                Err(err) => {
                    let fault = Fault::Io(err.kind());
                    self.terminate(Reason::Error, Some(fault.clone()));
                    return Err(TlsError::Fatal(fault));
                }
            }
        };

        let result = self.parse_inbound();
        self.guard(result)?;

        // A close racing the last records is handled after they parsed: a
        // close_notify in the same segment terminates first and the socket
        // close becomes a no-op.
        if ingress.closed {
            self.socket_closed();
        }

        Ok(ingress.received)
    }

    /// Pushes buffered egress to the transport. Poll drivers call this on
    /// writable readiness; the drain settles any write waiting on it.
    pub fn flush(&mut self) -> TlsResult<()> {
        if self.state == SessionState::Terminated {
            return Ok(());
        }

        let result = self.flush_transport();
        self.guard(result)
    }

    /// Writes application bytes. Returns the accept signal: `true` means
    /// the session took the bytes without exceeding its buffering limit,
    /// `false` means the write is outstanding and settles through a
    /// `Writable`/`WriteError` event. `Wait` signals the single write slot
    /// is already occupied.
    pub fn write(&mut self, bytes: &[u8]) -> TlsResult<bool> {
        match self.state {
            SessionState::Terminated => Err(TlsError::Fatal(Fault::Terminated)),
            SessionState::Established => {
                if self.pending.is_some() {
                    return Err(TlsError::Wait);
                }

                let result = self.submit(bytes);
                self.guard(result)
            }
            _ => {
                if self.pending.is_some() {
                    return Err(TlsError::Wait);
                }

                logging::trace!(self.log, "write parked until established";
                                "context" => "session",
                                "size" => bytes.len());

                self.pending = Some(PendingWrite::Flight(bytes.to_vec()));
                Ok(false)
            }
        }
    }

    /// Graceful upper-layer close: alerts out, transport ended, close
    /// emitted. No error is raised.
    pub fn end(&mut self) {
        self.terminate(Reason::Final, None);
    }

    /// Immediate teardown without the read-side end/close signalling.
    pub fn destroy(&mut self, fault: Option<Fault>) {
        self.terminate(Reason::Destroy, fault);
    }

    /// The transport closed. Without a prior close_notify this is a
    /// premature close.
    pub fn socket_closed(&mut self) {
        self.terminate(Reason::Socket, None);
    }

    /// The transport failed.
    pub fn socket_error(&mut self, err: io::Error) {
        self.terminate(Reason::Error, Some(Fault::Io(err.kind())));
    }

    /// Completion callback for a deferred signer. Arriving after
    /// termination is a no-op; the result is discarded.
    pub fn signature_ready(&mut self, result: Result<Vec<u8>, SignerError>) -> TlsResult<()> {
        if self.state == SessionState::Terminated {
            logging::debug!(self.log, "dropping signature for terminated session"; "context" => "session");
            return Ok(());
        }

        let result = self
            .engine
            .signature_ready(result)
            .and_then(|actions| self.apply(actions));
        self.guard(result)
    }

    /// Folds a fatal outcome into the termination controller so every
    /// protocol fault ends the session exactly once.
    fn guard<V>(&mut self, result: TlsResult<V>) -> TlsResult<V> {
        if let Err(TlsError::Fatal(ref fault)) = result {
            self.terminate(Reason::Error, Some(fault.clone()));
        }

        result
    }

    fn parse_inbound(&mut self) -> TlsResult<()> {
        loop {
            if self.state == SessionState::Terminated {
                return Ok(());
            }

            while let Some(message) = self.defrag.next()? {
                self.dispatch(message)?;

                if self.state == SessionState::Terminated {
                    return Ok(());
                }
            }

            match record::pull(&mut self.read_buffer, self.decipher.as_mut()) {
                Ok(record) => self.defrag.push(record)?,
                Err(TlsError::Wait) => return Ok(()),
                Err(err) => return Err(err),
            }
        }
    }

    fn dispatch(&mut self, message: Message) -> TlsResult<()> {
        match message {
            Message::Alert(body) => self.on_alert(Alert::read(&body)?),
            Message::ChangeCipherSpec(body) => {
                let actions = self.engine.handle_change_cipher_spec(body)?;
                self.apply(actions)
            }
            Message::Handshake(wire) => {
                let actions = self.engine.handle_message(wire)?;
                self.apply(actions)
            }
            Message::ApplicationData(bytes) => self.on_application_data(bytes),
        }
    }

    fn on_alert(&mut self, alert: Alert) -> TlsResult<()> {
        if alert.description == AlertDescription::CloseNotify {
            logging::debug!(self.log, "peer closed the session"; "context" => "session");
            self.terminate(Reason::CloseNotify, None);
            return Ok(());
        }

        match alert.level {
            AlertLevel::Fatal => {
                logging::debug!(self.log, "fatal peer alert";
                                "context" => "session",
                                "description" => ?alert.description);
                self.terminate(Reason::Alert, Some(Fault::PeerAlert(alert.description)));
            }
            AlertLevel::Warning => {
                logging::warn!(self.log, "ignoring warning alert";
                               "context" => "session",
                               "description" => ?alert.description);
            }
        }

        Ok(())
    }

    fn on_application_data(&mut self, bytes: Vec<u8>) -> TlsResult<()> {
        if self.state != SessionState::Established {
            return Err(TlsError::Fatal(Fault::Protocol(AlertDescription::UnexpectedMessage)));
        }

        self.queued_data += bytes.len();
        self.events.push_back(Event::Data(bytes));

        if self.queued_data > READ_HIGH_WATER && !self.paused {
            logging::trace!(self.log, "pausing reads"; "context" => "session", "queued" => self.queued_data);

            self.paused = true;
            if let Some(transport) = self.transport.as_mut() {
                transport.pause();
            }
        }

        Ok(())
    }

    fn apply(&mut self, actions: Vec<Action>) -> TlsResult<()> {
        for action in actions {
            match action {
                Action::Send(content_type, payload) => {
                    record::push(&mut self.write_buffer, content_type, &payload, self.cipher.as_mut())?;
                }
                Action::InstallCipher(cipher) => self.cipher = Some(cipher),
                Action::InstallDecipher(decipher) => self.decipher = Some(decipher),
                Action::Established => self.on_established()?,
            }
        }

        self.flush_transport()
    }

    fn on_established(&mut self) -> TlsResult<()> {
        logging::info!(self.log, "session established"; "context" => "session");

        self.state = SessionState::Established;

        // A write accepted mid-handshake goes out now that protection is
        // up. Its completion settles immediately unless the transport is
        // saturated, in which case the drain observer picks it up.
        if let Some(PendingWrite::Flight(chunk)) = self.pending.take() {
            let accepted = self.submit(&chunk)?;

            if accepted {
                self.events.push_back(Event::Writable);
            }
        }

        Ok(())
    }

    fn submit(&mut self, bytes: &[u8]) -> TlsResult<bool> {
        for chunk in bytes.chunks(record::MAX_PLAINTEXT_SIZE) {
            record::push(
                &mut self.write_buffer,
                ContentType::ApplicationData,
                chunk,
                self.cipher.as_mut(),
            )?;
        }

        self.flush_transport()?;

        if self.write_buffer.has_capacity() {
            Ok(true)
        } else {
            self.pending = Some(PendingWrite::Drain);
            Ok(false)
        }
    }

    fn flush_transport(&mut self) -> TlsResult<()> {
        let transport = match self.transport.as_mut() {
            Some(transport) => transport,
            None => return Ok(()),
        };

        match self.write_buffer.egress(transport) {
            Ok(_) => {}
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {}
            Err(err) => return Err(err.into()),
        }

        if self.write_buffer.is_empty() {
            if let Some(PendingWrite::Drain) = self.pending {
                self.pending = None;
                self.events.push_back(Event::Writable);
            }
        }

        Ok(())
    }

    fn send_alert(&mut self, level: AlertLevel, description: AlertDescription) {
        let alert = Alert::new(level, description);

        // Best effort: a session on its way down swallows secondary faults.
        if record::push(
            &mut self.write_buffer,
            ContentType::Alert,
            &alert.write(),
            self.cipher.as_mut(),
        )
        .is_err()
        {
            return;
        }

        if let Some(transport) = self.transport.as_mut() {
            let _ = self.write_buffer.egress(transport);
        }
    }

    /// The single teardown path. Runs at most once; afterwards the session
    /// is absorbing: writes fail like a broken pipe, reads yield nothing,
    /// transport data is ignored.
    fn terminate(&mut self, reason: Reason, fault: Option<Fault>) {
        if self.state == SessionState::Terminated {
            return;
        }

        let pre_established = self.state != SessionState::Established;

        logging::debug!(self.log, "terminating";
                        "context" => "session",
                        "reason" => ?reason,
                        "fault" => ?fault,
                        "state" => ?self.state);

        match reason {
            Reason::Final | Reason::Destroy if self.state == SessionState::Handshaking => {
                self.send_alert(AlertLevel::Warning, AlertDescription::UserCanceled);
                self.send_alert(AlertLevel::Warning, AlertDescription::CloseNotify);
            }
            Reason::Final | Reason::Destroy | Reason::CloseNotify => {
                self.send_alert(AlertLevel::Warning, AlertDescription::CloseNotify);
            }
            Reason::Error => {
                let description = fault
                    .as_ref()
                    .map(Fault::alert_description)
                    .unwrap_or(AlertDescription::InternalError);
                self.send_alert(AlertLevel::Fatal, description);
            }
            Reason::Socket | Reason::Alert => {}
        }

        // Release the transport exactly once.
        if let Some(mut transport) = self.transport.take() {
            match reason {
                Reason::Destroy => transport.destroy(),
                _ => transport.end(),
            }
        }

        if reason != Reason::Destroy {
            self.events.push_back(Event::End);
        }

        let synthesized = match reason {
            Reason::Socket if fault.is_none() => Some(Fault::PrematureClose),
            Reason::CloseNotify if pre_established => Some(Fault::ServerClose),
            Reason::CloseNotify if self.pending.is_some() => Some(Fault::PeerReset),
            _ => None,
        };
        let fault = fault.or(synthesized);

        if self.pending.take().is_some() {
            match fault {
                Some(fault) => self.events.push_back(Event::WriteError(fault)),
                None => self.events.push_back(Event::Writable),
            }
        } else if let Some(fault) = fault {
            self.events.push_back(Event::Error(fault));
        }

        if reason != Reason::Destroy {
            self.events.push_back(Event::Close);
        }

        self.state = SessionState::Terminated;
        self.read_buffer.clear();
        self.write_buffer.clear();
    }
}
