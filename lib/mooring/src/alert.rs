use crate::support::{Fault, TlsError, TlsResult};

pub const ALERT_SIZE: usize = 2;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AlertLevel {
    Warning = 1,
    Fatal = 2,
}

impl AlertLevel {
    #[inline]
    pub fn from_u8(value: u8) -> Option<AlertLevel> {
        match value {
            1 => Some(AlertLevel::Warning),
            2 => Some(AlertLevel::Fatal),
            _ => None,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AlertDescription {
    CloseNotify = 0,
    UnexpectedMessage = 10,
    BadRecordMac = 20,
    RecordOverflow = 22,
    HandshakeFailure = 40,
    BadCertificate = 42,
    UnsupportedCertificate = 43,
    CertificateRevoked = 44,
    CertificateExpired = 45,
    CertificateUnknown = 46,
    IllegalParameter = 47,
    UnknownCa = 48,
    AccessDenied = 49,
    DecodeError = 50,
    DecryptError = 51,
    ProtocolVersion = 70,
    InsufficientSecurity = 71,
    InternalError = 80,
    UserCanceled = 90,
    NoRenegotiation = 100,
}

impl AlertDescription {
    pub fn from_u8(value: u8) -> Option<AlertDescription> {
        use self::AlertDescription::*;

        Some(match value {
            0 => CloseNotify,
            10 => UnexpectedMessage,
            20 => BadRecordMac,
            22 => RecordOverflow,
            40 => HandshakeFailure,
            42 => BadCertificate,
            43 => UnsupportedCertificate,
            44 => CertificateRevoked,
            45 => CertificateExpired,
            46 => CertificateUnknown,
            47 => IllegalParameter,
            48 => UnknownCa,
            49 => AccessDenied,
            50 => DecodeError,
            51 => DecryptError,
            70 => ProtocolVersion,
            71 => InsufficientSecurity,
            80 => InternalError,
            90 => UserCanceled,
            100 => NoRenegotiation,
            _ => return None,
        })
    }
}

/// A single 2-byte alert message.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Alert {
    pub level: AlertLevel,
    pub description: AlertDescription,
}

impl Alert {
    #[inline]
    pub fn new(level: AlertLevel, description: AlertDescription) -> Alert {
        Alert { level, description }
    }

    /// Parses an alert body. Unknown levels or descriptions are a decode
    /// fault rather than a crash on hostile input.
    pub fn read(body: &[u8]) -> TlsResult<Alert> {
        if body.len() != ALERT_SIZE {
            return Err(TlsError::Fatal(Fault::Protocol(AlertDescription::DecodeError)));
        }

        let level = AlertLevel::from_u8(body[0])
            .ok_or_else(|| TlsError::Fatal(Fault::Protocol(AlertDescription::DecodeError)))?;
        let description = AlertDescription::from_u8(body[1])
            .ok_or_else(|| TlsError::Fatal(Fault::Protocol(AlertDescription::DecodeError)))?;

        Ok(Alert { level, description })
    }

    #[inline]
    pub fn write(&self) -> [u8; ALERT_SIZE] {
        [self.level as u8, self.description as u8]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let alert = Alert::new(AlertLevel::Fatal, AlertDescription::BadRecordMac);

        assert_eq!(alert.write(), [2, 20]);
        assert_eq!(Alert::read(&alert.write()).unwrap(), alert);
    }

    #[test]
    fn test_read_close_notify() {
        let alert = Alert::read(&[1, 0]).unwrap();

        assert_eq!(alert.level, AlertLevel::Warning);
        assert_eq!(alert.description, AlertDescription::CloseNotify);
    }

    #[test]
    fn test_read_unknown_description() {
        let result = Alert::read(&[2, 255]);

        assert_eq!(
            result.unwrap_err(),
            TlsError::Fatal(Fault::Protocol(AlertDescription::DecodeError))
        );
    }

    #[test]
    fn test_read_unknown_level() {
        let result = Alert::read(&[3, 0]);

        assert_eq!(
            result.unwrap_err(),
            TlsError::Fatal(Fault::Protocol(AlertDescription::DecodeError))
        );
    }

    #[test]
    fn test_read_wrong_size() {
        assert!(Alert::read(&[2]).is_err());
        assert!(Alert::read(&[2, 0, 0]).is_err());
    }
}
