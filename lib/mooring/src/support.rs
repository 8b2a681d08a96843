use crate::alert::AlertDescription;
use std::io;
use std::net;

pub type TlsResult<T> = Result<T, TlsError>;

/// Two-level error plumbing. `Wait` means the operation cannot make progress
/// until more bytes arrive or capacity frees up; `Fatal` tears the session
/// down through the termination controller.
#[derive(Debug, Eq, PartialEq, Clone)]
pub enum TlsError {
    Wait,
    Fatal(Fault),
}

/// Terminal fault taxonomy.
#[derive(Debug, Eq, PartialEq, Clone)]
pub enum Fault {
    /// Locally detected protocol violation. The description names the fatal
    /// alert emitted to the peer before teardown.
    Protocol(AlertDescription),
    /// Fatal alert received from the peer.
    PeerAlert(AlertDescription),
    /// The transport closed without a prior close_notify.
    PrematureClose,
    /// The peer closed the session while the handshake was still running.
    ServerClose,
    /// The peer closed the session while a write was in flight.
    PeerReset,
    /// The session is terminated; equivalent of writing into a broken pipe.
    Terminated,
    Io(io::ErrorKind),
    AddrParse,
}

impl Fault {
    /// The alert description to put on the wire when this fault terminates
    /// the session locally.
    #[inline]
    pub fn alert_description(&self) -> AlertDescription {
        match self {
            Fault::Protocol(description) => *description,
            _ => AlertDescription::InternalError,
        }
    }
}

impl From<io::Error> for TlsError {
    #[inline]
    fn from(io_error: io::Error) -> Self {
        match io_error.kind() {
            io::ErrorKind::WouldBlock => TlsError::Wait,
            kind => TlsError::Fatal(Fault::Io(kind)),
        }
    }
}

impl From<net::AddrParseError> for TlsError {
    #[inline]
    fn from(_: net::AddrParseError) -> Self {
        TlsError::Fatal(Fault::AddrParse)
    }
}

pub trait ErrorUtils {
    fn has_failed(&self) -> bool;
}

impl<T> ErrorUtils for TlsResult<T> {
    fn has_failed(&self) -> bool {
        match self {
            Ok(_) => false,
            Err(TlsError::Wait) => false,
            _ => true,
        }
    }
}
