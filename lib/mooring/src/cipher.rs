use crate::alert::AlertDescription;
use crate::support::{Fault, TlsError, TlsResult};
use brine::crypto;

pub const MAC_SIZE: usize = crypto::SHA1_MAC_SIZE;
pub const KEY_SIZE: usize = crypto::AES_KEY_SIZE;
pub const IV_SIZE: usize = crypto::AES_BLOCK_SIZE;
pub const BLOCK_SIZE: usize = crypto::AES_BLOCK_SIZE;

/// The record version bytes that get mixed into every MAC.
pub const PROTOCOL_VERSION: [u8; 2] = [3, 3];

#[inline]
fn bad_record_mac<T>() -> TlsResult<T> {
    Err(TlsError::Fatal(Fault::Protocol(AlertDescription::BadRecordMac)))
}

/// Per-direction 64-bit record counter. Starts at zero and advances once per
/// protected record. Wrapping around would reuse MAC inputs, so overflow is
/// a fatal internal error.
#[derive(Debug)]
pub struct SequenceNumber {
    value: u64,
}

impl SequenceNumber {
    #[inline]
    pub fn new() -> SequenceNumber {
        SequenceNumber { value: 0 }
    }

    /// The value assigned to the next record.
    #[inline]
    pub fn current(&self) -> u64 {
        self.value
    }

    /// Claims the current value for a record and advances the counter.
    #[inline]
    pub fn advance(&mut self) -> TlsResult<[u8; 8]> {
        let claimed = self.value;

        self.value = match self.value.checked_add(1) {
            Some(next) => next,
            None => return Err(TlsError::Fatal(Fault::Protocol(AlertDescription::InternalError))),
        };

        Ok(claimed.to_be_bytes())
    }
}

#[inline]
fn record_mac(mac_key: &[u8; MAC_SIZE], seq: &[u8; 8], content_type: u8, payload: &[u8]) -> [u8; MAC_SIZE] {
    let length = (payload.len() as u16).to_be_bytes();

    crypto::hmac_sha1(
        mac_key,
        &[seq, &[content_type], &PROTOCOL_VERSION, &length, payload],
    )
}

/// Outbound protection: MAC-then-encrypt with a fresh IV per record.
#[derive(Debug)]
pub struct Cipher {
    mac_key: [u8; MAC_SIZE],
    key: [u8; KEY_SIZE],
    iv_seed: u128,
    sequence: SequenceNumber,
}

impl Cipher {
    #[inline]
    pub fn new(mac_key: [u8; MAC_SIZE], key: [u8; KEY_SIZE], iv_seed: u128) -> Cipher {
        Cipher {
            mac_key,
            key,
            iv_seed,
            sequence: SequenceNumber::new(),
        }
    }

    #[inline]
    pub fn sequence(&self) -> u64 {
        self.sequence.current()
    }

    /// Each record gets the SHA-256 of the decimal rendering of a counting
    /// 128-bit seed as its IV. The seed starts from the key-block tail.
    #[inline]
    fn next_iv(&mut self) -> [u8; IV_SIZE] {
        let counter = self.iv_seed;
        self.iv_seed = self.iv_seed.wrapping_add(1);

        let digest = crypto::sha256(counter.to_string().as_bytes());
        let mut iv = [0u8; IV_SIZE];
        iv.copy_from_slice(&digest[..IV_SIZE]);
        iv
    }

    /// Protects a record payload. The result is `IV ‖ ciphertext` where the
    /// ciphertext covers `payload ‖ mac ‖ pad`.
    pub fn encrypt(&mut self, content_type: u8, payload: &[u8]) -> TlsResult<Vec<u8>> {
        let seq = self.sequence.advance()?;
        let mac = record_mac(&self.mac_key, &seq, content_type, payload);
        let iv = self.next_iv();

        // Standard TLS padding: pad to the block boundary with pad_len - 1
        // repeated, always at least one byte.
        let overhang = (payload.len() + MAC_SIZE) % BLOCK_SIZE;
        let pad_len = BLOCK_SIZE - overhang;

        let mut plain = Vec::with_capacity(payload.len() + MAC_SIZE + pad_len);
        plain.extend_from_slice(payload);
        plain.extend_from_slice(&mac);
        plain.resize(plain.len() + pad_len, (pad_len - 1) as u8);

        let mut out = Vec::with_capacity(IV_SIZE + plain.len());
        out.extend_from_slice(&iv);
        out.extend_from_slice(&crypto::aes128_cbc_encrypt(&self.key, &iv, &plain));

        Ok(out)
    }
}

/// Inbound protection: decrypt-then-verify. Every failure mode collapses
/// into a single undifferentiated bad_record_mac so padding and MAC faults
/// are indistinguishable on the wire.
#[derive(Debug)]
pub struct Decipher {
    mac_key: [u8; MAC_SIZE],
    key: [u8; KEY_SIZE],
    sequence: SequenceNumber,
}

impl Decipher {
    #[inline]
    pub fn new(mac_key: [u8; MAC_SIZE], key: [u8; KEY_SIZE]) -> Decipher {
        Decipher {
            mac_key,
            key,
            sequence: SequenceNumber::new(),
        }
    }

    #[inline]
    pub fn sequence(&self) -> u64 {
        self.sequence.current()
    }

    pub fn decrypt(&mut self, content_type: u8, payload: &[u8]) -> TlsResult<Vec<u8>> {
        let seq = self.sequence.advance()?;

        if payload.len() < IV_SIZE + BLOCK_SIZE {
            return bad_record_mac();
        }

        let mut iv = [0u8; IV_SIZE];
        iv.copy_from_slice(&payload[..IV_SIZE]);

        let mut plain = match crypto::aes128_cbc_decrypt(&self.key, &iv, &payload[IV_SIZE..]) {
            Some(plain) => plain,
            None => return bad_record_mac(),
        };

        let pad_len = *plain.last().expect("Block-aligned plaintext cannot be empty") as usize + 1;

        if plain.len() < pad_len + MAC_SIZE {
            return bad_record_mac();
        }

        let pad_fill = (pad_len - 1) as u8;
        if plain[plain.len() - pad_len..].iter().any(|&byte| byte != pad_fill) {
            return bad_record_mac();
        }

        plain.truncate(plain.len() - pad_len);

        let mac_offset = plain.len() - MAC_SIZE;
        let received_mac: Vec<u8> = plain.split_off(mac_offset);
        let expected_mac = record_mac(&self.mac_key, &seq, content_type, &plain);

        if !crypto::fixed_time_eq(&received_mac, &expected_mac) {
            return bad_record_mac();
        }

        Ok(plain)
    }
}
