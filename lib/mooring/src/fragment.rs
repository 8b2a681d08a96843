use crate::alert::{AlertDescription, ALERT_SIZE};
use crate::record::{ContentType, Record};
use crate::support::{Fault, TlsError, TlsResult};
use byteorder::{BigEndian, ByteOrder};

/// Handshake messages carry a 1-byte type and a 3-byte length ahead of the
/// body.
pub const HANDSHAKE_HEADER_SIZE: usize = 4;

/// One protocol message sliced out of a fragment. Handshake messages keep
/// their wire header because the transcript needs the exact bytes.
#[derive(Debug, Eq, PartialEq)]
pub enum Message {
    Alert([u8; ALERT_SIZE]),
    ChangeCipherSpec(u8),
    Handshake(Vec<u8>),
    ApplicationData(Vec<u8>),
}

/// Coalesces consecutive same-type record payloads and slices protocol
/// messages back out of them. Holds at most one fragment at a time.
pub struct Defragmenter {
    current: Option<(ContentType, Vec<u8>)>,
}

impl Defragmenter {
    #[inline]
    pub fn new() -> Defragmenter {
        Defragmenter { current: None }
    }

    /// Feeds one record into the fragment. A record of a different type
    /// while a partial fragment is pending means the peer interleaved
    /// content types mid-message, which is a decode fault.
    pub fn push(&mut self, record: Record) -> TlsResult<()> {
        match self.current {
            Some((content_type, ref mut payload)) => {
                if content_type != record.content_type {
                    return Err(TlsError::Fatal(Fault::Protocol(AlertDescription::DecodeError)));
                }
                payload.extend_from_slice(&record.payload);
            }
            None => self.current = Some((record.content_type, record.payload)),
        }

        Ok(())
    }

    /// Slices the next complete message out of the current fragment, or
    /// `None` when more record payload is needed. Fully consumed fragments
    /// are cleared so the next record may switch content type.
    pub fn next(&mut self) -> TlsResult<Option<Message>> {
        let (content_type, available) = match self.current {
            Some((content_type, ref payload)) => (content_type, payload.len()),
            None => return Ok(None),
        };

        let (consumed, message) = match content_type {
            ContentType::Alert => {
                if available < ALERT_SIZE {
                    return Ok(None);
                }

                let payload = self.payload();
                let mut body = [0u8; ALERT_SIZE];
                body.copy_from_slice(&payload[..ALERT_SIZE]);
                (ALERT_SIZE, Message::Alert(body))
            }
            ContentType::ChangeCipherSpec => (1, Message::ChangeCipherSpec(self.payload()[0])),
            ContentType::Handshake => {
                if available < HANDSHAKE_HEADER_SIZE {
                    return Ok(None);
                }

                let length = {
                    let payload = self.payload();
                    BigEndian::read_u24(&payload[1..4]) as usize
                };

                if available < HANDSHAKE_HEADER_SIZE + length {
                    return Ok(None);
                }

                let wire = self.payload()[..HANDSHAKE_HEADER_SIZE + length].to_vec();
                (wire.len(), Message::Handshake(wire))
            }
            ContentType::ApplicationData => {
                let payload = self.payload().to_vec();
                (payload.len(), Message::ApplicationData(payload))
            }
        };

        self.advance(consumed);

        Ok(Some(message))
    }

    #[inline]
    fn payload(&self) -> &[u8] {
        &self.current.as_ref().expect("Fragment must be present").1
    }

    #[inline]
    fn advance(&mut self, consumed: usize) {
        let emptied = {
            let payload = &mut self.current.as_mut().expect("Fragment must be present").1;
            payload.drain(..consumed);
            payload.is_empty()
        };

        if emptied {
            self.current = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(content_type: ContentType, payload: &[u8]) -> Record {
        Record {
            content_type,
            payload: payload.to_vec(),
        }
    }

    fn handshake_wire(msg_type: u8, body: &[u8]) -> Vec<u8> {
        let mut wire = vec![msg_type, 0, 0, 0];
        BigEndian::write_u24(&mut wire[1..4], body.len() as u32);
        wire.extend_from_slice(body);
        wire
    }

    #[test]
    fn test_empty_yields_nothing() {
        let mut defrag = Defragmenter::new();

        assert_eq!(defrag.next().unwrap(), None);
    }

    #[test]
    fn test_alert_slicing() {
        let mut defrag = Defragmenter::new();
        defrag.push(record(ContentType::Alert, &[1, 0, 2, 40])).unwrap();

        assert_eq!(defrag.next().unwrap(), Some(Message::Alert([1, 0])));
        assert_eq!(defrag.next().unwrap(), Some(Message::Alert([2, 40])));
        assert_eq!(defrag.next().unwrap(), None);
    }

    #[test]
    fn test_partial_alert_waits() {
        let mut defrag = Defragmenter::new();
        defrag.push(record(ContentType::Alert, &[2])).unwrap();

        assert_eq!(defrag.next().unwrap(), None);

        defrag.push(record(ContentType::Alert, &[20])).unwrap();

        assert_eq!(defrag.next().unwrap(), Some(Message::Alert([2, 20])));
    }

    #[test]
    fn test_change_cipher_spec_slicing() {
        let mut defrag = Defragmenter::new();
        defrag.push(record(ContentType::ChangeCipherSpec, &[1])).unwrap();

        assert_eq!(defrag.next().unwrap(), Some(Message::ChangeCipherSpec(1)));
        assert_eq!(defrag.next().unwrap(), None);
    }

    #[test]
    fn test_handshake_reassembly_across_records() {
        let wire = handshake_wire(11, &vec![0xC5u8; 600]);
        let mut defrag = Defragmenter::new();

        // One logical Certificate split over three handshake records.
        defrag.push(record(ContentType::Handshake, &wire[..200])).unwrap();
        assert_eq!(defrag.next().unwrap(), None);
        defrag.push(record(ContentType::Handshake, &wire[200..400])).unwrap();
        assert_eq!(defrag.next().unwrap(), None);
        defrag.push(record(ContentType::Handshake, &wire[400..])).unwrap();

        assert_eq!(defrag.next().unwrap(), Some(Message::Handshake(wire)));
        assert_eq!(defrag.next().unwrap(), None);
    }

    #[test]
    fn test_coalesced_handshake_messages_split() {
        let first = handshake_wire(2, &[1, 2, 3]);
        let second = handshake_wire(14, &[]);
        let mut joined = first.clone();
        joined.extend_from_slice(&second);

        let mut defrag = Defragmenter::new();
        defrag.push(record(ContentType::Handshake, &joined)).unwrap();

        assert_eq!(defrag.next().unwrap(), Some(Message::Handshake(first)));
        assert_eq!(defrag.next().unwrap(), Some(Message::Handshake(second)));
        assert_eq!(defrag.next().unwrap(), None);
    }

    #[test]
    fn test_application_data_taken_whole() {
        let mut defrag = Defragmenter::new();
        defrag.push(record(ContentType::ApplicationData, b"opaque payload")).unwrap();

        assert_eq!(
            defrag.next().unwrap(),
            Some(Message::ApplicationData(b"opaque payload".to_vec()))
        );
        assert_eq!(defrag.next().unwrap(), None);
    }

    #[test]
    fn test_type_mix_is_decode_fault() {
        let mut defrag = Defragmenter::new();
        defrag.push(record(ContentType::Handshake, &[2])).unwrap();

        let result = defrag.push(record(ContentType::Alert, &[1, 0]));

        assert_eq!(
            result.unwrap_err(),
            TlsError::Fatal(Fault::Protocol(AlertDescription::DecodeError))
        );
    }

    #[test]
    fn test_same_type_record_extends_fragment() {
        let mut defrag = Defragmenter::new();
        defrag.push(record(ContentType::ApplicationData, b"first ")).unwrap();
        defrag.push(record(ContentType::ApplicationData, b"second")).unwrap();

        assert_eq!(
            defrag.next().unwrap(),
            Some(Message::ApplicationData(b"first second".to_vec()))
        );
    }
}
