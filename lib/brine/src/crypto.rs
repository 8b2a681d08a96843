use aes::cipher::block_padding::NoPadding;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

pub use rsa::pkcs1::DecodeRsaPrivateKey;
pub use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
pub use rsa::traits::PublicKeyParts;
pub use rsa::{RsaPrivateKey, RsaPublicKey};

pub const SHA256_SIZE: usize = 32;
pub const SHA1_MAC_SIZE: usize = 20;
pub const AES_BLOCK_SIZE: usize = 16;
pub const AES_KEY_SIZE: usize = 16;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

/// SHA-256 digest of the input.
#[inline]
pub fn sha256(data: &[u8]) -> [u8; SHA256_SIZE] {
    let mut out = [0u8; SHA256_SIZE];
    out.copy_from_slice(&Sha256::digest(data));
    out
}

/// HMAC-SHA1 over the concatenation of `parts`. Accepting the input in
/// parts lets callers authenticate header + payload without coalescing.
#[inline]
pub fn hmac_sha1(key: &[u8], parts: &[&[u8]]) -> [u8; SHA1_MAC_SIZE] {
    let mut mac = Hmac::<Sha1>::new_from_slice(key).expect("HMAC accepts any key size");

    for part in parts {
        mac.update(part);
    }

    let mut out = [0u8; SHA1_MAC_SIZE];
    out.copy_from_slice(&mac.finalize().into_bytes());
    out
}

/// HMAC-SHA256 over the concatenation of `parts`.
#[inline]
pub fn hmac_sha256(key: &[u8], parts: &[&[u8]]) -> [u8; SHA256_SIZE] {
    let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("HMAC accepts any key size");

    for part in parts {
        mac.update(part);
    }

    let mut out = [0u8; SHA256_SIZE];
    out.copy_from_slice(&mac.finalize().into_bytes());
    out
}

/// The TLS 1.2 pseudorandom function (P_SHA256, RFC 5246 §5). Produces
/// `out_len` bytes by iterating `A(i) = HMAC(secret, A(i-1))` over the
/// label and seed and truncating the concatenated output blocks.
pub fn prf(secret: &[u8], label: &[u8], seed: &[u8], out_len: usize) -> Vec<u8> {
    let mut label_seed = Vec::with_capacity(label.len() + seed.len());
    label_seed.extend_from_slice(label);
    label_seed.extend_from_slice(seed);

    let mut a = hmac_sha256(secret, &[&label_seed]);
    let mut out = Vec::with_capacity(out_len + SHA256_SIZE);

    while out.len() < out_len {
        out.extend_from_slice(&hmac_sha256(secret, &[&a, &label_seed]));
        a = hmac_sha256(secret, &[&a]);
    }

    out.truncate(out_len);
    out
}

/// AES-128-CBC encryption without library padding. The caller supplies an
/// already block-aligned plaintext.
#[inline]
pub fn aes128_cbc_encrypt(key: &[u8; AES_KEY_SIZE], iv: &[u8; AES_BLOCK_SIZE], plain: &[u8]) -> Vec<u8> {
    if plain.len() % AES_BLOCK_SIZE != 0 {
        panic!(
            "Encryption: plain data length ({}) must be a multiple of the block size ({})",
            plain.len(),
            AES_BLOCK_SIZE
        )
    }

    Aes128CbcEnc::new(key.into(), iv.into()).encrypt_padded_vec_mut::<NoPadding>(plain)
}

/// AES-128-CBC decryption without library padding. Returns `None` when the
/// ciphertext is not block aligned.
#[inline]
pub fn aes128_cbc_decrypt(
    key: &[u8; AES_KEY_SIZE],
    iv: &[u8; AES_BLOCK_SIZE],
    cipher: &[u8],
) -> Option<Vec<u8>> {
    if cipher.is_empty() || cipher.len() % AES_BLOCK_SIZE != 0 {
        return None;
    }

    Aes128CbcDec::new(key.into(), iv.into())
        .decrypt_padded_vec_mut::<NoPadding>(cipher)
        .ok()
}

/// RSA PKCS#1 v1.5 public-key encryption.
#[inline]
pub fn rsa_encrypt(key: &RsaPublicKey, plain: &[u8]) -> Option<Vec<u8>> {
    key.encrypt(&mut OsRng, rsa::Pkcs1v15Encrypt, plain).ok()
}

/// RSA PKCS#1 v1.5 private-key decryption.
#[inline]
pub fn rsa_decrypt(key: &RsaPrivateKey, cipher: &[u8]) -> Option<Vec<u8>> {
    key.decrypt(rsa::Pkcs1v15Encrypt, cipher).ok()
}

/// RSA-PKCS1-SHA256 signature over `data`.
#[inline]
pub fn rsa_sign_sha256(key: &RsaPrivateKey, data: &[u8]) -> Option<Vec<u8>> {
    key.sign(rsa::Pkcs1v15Sign::new::<Sha256>(), &sha256(data)).ok()
}

/// Verifies an RSA-PKCS1-SHA256 signature over `data`.
#[inline]
pub fn rsa_verify_sha256(key: &RsaPublicKey, data: &[u8], signature: &[u8]) -> bool {
    key.verify(rsa::Pkcs1v15Sign::new::<Sha256>(), &sha256(data), signature)
        .is_ok()
}

/// Fills the provided buffer with cryptographically secure random bytes
#[inline]
pub fn random_bytes(out: &mut [u8]) {
    OsRng.fill_bytes(out);
}

/// Constant-time equality for authenticator values.
#[inline]
pub fn fixed_time_eq(left: &[u8], right: &[u8]) -> bool {
    left.len() == right.len() && bool::from(left.ct_eq(right))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_abc() {
        assert_eq!(
            hex::encode(sha256(b"abc")),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_hmac_sha1_rfc2202() {
        let mac = hmac_sha1(&[0x0b; 20], &[b"Hi There"]);

        assert_eq!(hex::encode(mac), "b617318655057264e28bc0b6fb378c8ef146be00");
    }

    #[test]
    fn test_hmac_sha256_rfc4231() {
        let mac = hmac_sha256(&[0x0b; 20], &[b"Hi There"]);

        assert_eq!(
            hex::encode(mac),
            "b0344c61d8db38535ca8afceaf0bf12b881dc200c9833da726e9376c2e32cff7"
        );
    }

    #[test]
    fn test_hmac_multipart_equals_concat() {
        let key = b"a key of no particular size";

        assert_eq!(
            hmac_sha256(key, &[b"head", b"tail"]),
            hmac_sha256(key, &[b"headtail"])
        );
        assert_eq!(hmac_sha1(key, &[b"he", b"ad", b""]), hmac_sha1(key, &[b"head"]));
    }

    #[test]
    fn test_prf_known_answer() {
        let secret = hex::decode("9bbe436ba940f017b17652849a71db35").unwrap();
        let seed = hex::decode("a0ba9f936cda311827a6f796ffd5198c").unwrap();

        let out = prf(&secret, b"test label", &seed, 100);

        assert_eq!(out.len(), 100);
        assert_eq!(
            hex::encode(&out[..32]),
            "e3f229ba727be17b8d122620557cd453c2aab21d07c3d495329b52d4e61edb5a"
        );
    }

    #[test]
    fn test_prf_prefix_property() {
        let long = prf(b"secret", b"prefix check", b"seed", 96);
        let short = prf(b"secret", b"prefix check", b"seed", 17);

        assert_eq!(&long[..17], &short[..]);
    }

    #[test]
    fn test_aes128_cbc_nist_vector() {
        let key_bytes = hex::decode("2b7e151628aed2a6abf7158809cf4f3c").unwrap();
        let iv_bytes = hex::decode("000102030405060708090a0b0c0d0e0f").unwrap();
        let plain = hex::decode("6bc1bee22e409f96e93d7e117393172a").unwrap();

        let mut key = [0u8; AES_KEY_SIZE];
        key.copy_from_slice(&key_bytes);
        let mut iv = [0u8; AES_BLOCK_SIZE];
        iv.copy_from_slice(&iv_bytes);

        let cipher = aes128_cbc_encrypt(&key, &iv, &plain);

        assert_eq!(hex::encode(&cipher), "7649abac8119b246cee98e9b12e9197d");
        assert_eq!(aes128_cbc_decrypt(&key, &iv, &cipher).unwrap(), plain);
    }

    #[test]
    fn test_aes128_cbc_rejects_ragged_cipher() {
        let key = [1u8; AES_KEY_SIZE];
        let iv = [2u8; AES_BLOCK_SIZE];

        assert_eq!(aes128_cbc_decrypt(&key, &iv, &[0u8; 17]), None);
        assert_eq!(aes128_cbc_decrypt(&key, &iv, &[]), None);
    }

    #[test]
    #[should_panic(expected = "must be a multiple of the block size")]
    fn test_aes128_cbc_rejects_ragged_plain() {
        let _ = aes128_cbc_encrypt(&[0u8; AES_KEY_SIZE], &[0u8; AES_BLOCK_SIZE], &[0u8; 15]);
    }

    #[test]
    fn test_rsa_encrypt_decrypt_roundtrip() {
        let key = RsaPrivateKey::new(&mut rand::rngs::OsRng, 1024).unwrap();
        let public = RsaPublicKey::from(&key);

        let cipher = rsa_encrypt(&public, b"48 bytes of premaster secret material go here!!!").unwrap();

        assert_eq!(cipher.len(), 128);
        assert_eq!(
            rsa_decrypt(&key, &cipher).unwrap(),
            b"48 bytes of premaster secret material go here!!!"
        );
    }

    #[test]
    fn test_rsa_sign_verify() {
        let key = RsaPrivateKey::new(&mut rand::rngs::OsRng, 1024).unwrap();
        let public = RsaPublicKey::from(&key);

        let signature = rsa_sign_sha256(&key, b"transcript bytes").unwrap();

        assert!(rsa_verify_sha256(&public, b"transcript bytes", &signature));
        assert!(!rsa_verify_sha256(&public, b"tampered bytes", &signature));
    }

    #[test]
    fn test_fixed_time_eq() {
        assert!(fixed_time_eq(b"same", b"same"));
        assert!(!fixed_time_eq(b"same", b"sama"));
        assert!(!fixed_time_eq(b"same", b"longer"));
    }

    #[test]
    fn test_random_bytes_fills() {
        let mut first = [0u8; 32];
        let mut second = [0u8; 32];

        random_bytes(&mut first);
        random_bytes(&mut second);

        assert_ne!(first, second);
    }
}
