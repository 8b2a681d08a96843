use crate::alert::AlertDescription;
use crate::buffer::Buffer;
use crate::cipher::{Cipher, Decipher};
use crate::support::{Fault, TlsError, TlsResult};
use byteorder::{BigEndian, ByteOrder};

pub const HEADER_SIZE: usize = 5;
pub const MAX_PLAINTEXT_SIZE: usize = 1 << 14;
pub const MAX_CIPHERTEXT_SIZE: usize = (1 << 14) + 2048;
pub const PROTOCOL_VERSION: [u8; 2] = [3, 3];

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ContentType {
    ChangeCipherSpec = 20,
    Alert = 21,
    Handshake = 22,
    ApplicationData = 23,
}

impl ContentType {
    #[inline]
    pub fn from_u8(value: u8) -> Option<ContentType> {
        match value {
            20 => Some(ContentType::ChangeCipherSpec),
            21 => Some(ContentType::Alert),
            22 => Some(ContentType::Handshake),
            23 => Some(ContentType::ApplicationData),
            _ => None,
        }
    }
}

/// A single record lifted off the wire, payload already deciphered when
/// protection is active.
#[derive(Debug, Eq, PartialEq)]
pub struct Record {
    pub content_type: ContentType,
    pub payload: Vec<u8>,
}

#[inline]
fn decode_error<T>() -> TlsResult<T> {
    Err(TlsError::Fatal(Fault::Protocol(AlertDescription::DecodeError)))
}

/// Pulls the next record out of the inbound buffer. Returns `Wait` while a
/// full record has not arrived. Header validation happens as soon as the
/// header is present, before waiting for the body.
pub fn pull(buffer: &mut Buffer, decipher: Option<&mut Decipher>) -> TlsResult<Record> {
    let header = {
        let bytes = buffer.peek();

        if bytes.len() < HEADER_SIZE {
            return Err(TlsError::Wait);
        }

        let mut header = [0u8; HEADER_SIZE];
        header.copy_from_slice(&bytes[..HEADER_SIZE]);
        header
    };

    let content_type = match ContentType::from_u8(header[0]) {
        Some(content_type) => content_type,
        None => return decode_error(),
    };

    if header[1..3] != PROTOCOL_VERSION {
        return decode_error();
    }

    let length = BigEndian::read_u16(&header[3..5]) as usize;

    if length == 0 {
        return decode_error();
    }

    let limit = brine::choose!(decipher.is_some() => MAX_CIPHERTEXT_SIZE, MAX_PLAINTEXT_SIZE);

    if length > limit {
        return Err(TlsError::Fatal(Fault::Protocol(AlertDescription::RecordOverflow)));
    }

    if buffer.len() < HEADER_SIZE + length {
        return Err(TlsError::Wait);
    }

    let payload = buffer.peek()[HEADER_SIZE..HEADER_SIZE + length].to_vec();
    buffer.consume(HEADER_SIZE + length);

    let payload = match decipher {
        Some(decipher) => decipher.decrypt(content_type as u8, &payload)?,
        None => payload,
    };

    Ok(Record { content_type, payload })
}

/// Frames a record into the outbound buffer, protecting the payload when a
/// cipher is installed. The payload must respect the plaintext record limit;
/// chunking oversized writes is the caller's business.
pub fn push(
    buffer: &mut Buffer,
    content_type: ContentType,
    payload: &[u8],
    cipher: Option<&mut Cipher>,
) -> TlsResult<bool> {
    if payload.len() > MAX_PLAINTEXT_SIZE {
        panic!(
            "Record payload ({}) exceeds the plaintext limit ({})",
            payload.len(),
            MAX_PLAINTEXT_SIZE
        )
    }

    let protected;
    let body: &[u8] = match cipher {
        Some(cipher) => {
            protected = cipher.encrypt(content_type as u8, payload)?;
            &protected
        }
        None => payload,
    };

    let mut header = [0u8; HEADER_SIZE];
    header[0] = content_type as u8;
    header[1..3].copy_from_slice(&PROTOCOL_VERSION);
    BigEndian::write_u16(&mut header[3..5], body.len() as u16);

    buffer.extend(&header);
    buffer.extend(body);

    Ok(buffer.has_capacity())
}
