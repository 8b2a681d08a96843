use crate::alert::AlertDescription;
use brine::crypto::{self, RsaPrivateKey, RsaPublicKey};
use serde_derive::{Deserialize, Serialize};

/// Controls certificate date validation: against the current clock, a fixed
/// timestamp, or not at all.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidityCheck {
    Current,
    At(u64),
    Skip,
}

impl Default for ValidityCheck {
    fn default() -> ValidityCheck {
        ValidityCheck::Current
    }
}

/// What chain verification yields: the leaf's subject common name for host
/// matching and its public key for the key exchange.
#[derive(Debug, Clone)]
pub struct ServerIdentity {
    pub subject_cn: String,
    pub public_key: RsaPublicKey,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum VerifyError {
    BadCertificate,
    UnsupportedCertificate,
    CertificateUnknown,
    UnknownCa,
}

impl VerifyError {
    /// The alert description reported to the peer for this verification
    /// failure.
    #[inline]
    pub fn alert(&self) -> AlertDescription {
        match self {
            VerifyError::BadCertificate => AlertDescription::BadCertificate,
            VerifyError::UnsupportedCertificate => AlertDescription::UnsupportedCertificate,
            VerifyError::CertificateUnknown => AlertDescription::CertificateUnknown,
            VerifyError::UnknownCa => AlertDescription::UnknownCa,
        }
    }
}

/// External capability that checks the presented chain (leaf first) against
/// the configured trust material and extracts the leaf identity.
pub trait ChainVerifier {
    fn verify(&self, chain_der: &[Vec<u8>], validity: &ValidityCheck) -> Result<ServerIdentity, VerifyError>;
}

/// Deployment-pinned verifier: the operator provisions the broker's subject
/// name and leaf public key out of band and the presented chain must carry
/// at least a leaf. Chain-walking verifiers plug in through the same trait.
pub struct PinnedVerifier {
    subject_cn: String,
    public_key: RsaPublicKey,
}

impl PinnedVerifier {
    #[inline]
    pub fn new(subject_cn: String, public_key: RsaPublicKey) -> PinnedVerifier {
        PinnedVerifier { subject_cn, public_key }
    }
}

impl ChainVerifier for PinnedVerifier {
    fn verify(&self, chain_der: &[Vec<u8>], _validity: &ValidityCheck) -> Result<ServerIdentity, VerifyError> {
        if chain_der.is_empty() {
            return Err(VerifyError::BadCertificate);
        }

        Ok(ServerIdentity {
            subject_cn: self.subject_cn.clone(),
            public_key: self.public_key.clone(),
        })
    }
}

/// Outcome of a signing request. External devices answer later through
/// `Session::signature_ready`; in-process keys answer inline.
#[derive(Debug)]
pub enum SignOutcome {
    Signature(Vec<u8>),
    Pending,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SignerError;

/// Capability producing an RSA-PKCS1-SHA256 signature over the handshake
/// transcript.
pub trait Signer {
    fn sign(&mut self, data: &[u8]) -> Result<SignOutcome, SignerError>;
}

/// Signer over a private key held in process.
pub struct LocalSigner {
    key: RsaPrivateKey,
}

impl LocalSigner {
    #[inline]
    pub fn new(key: RsaPrivateKey) -> LocalSigner {
        LocalSigner { key }
    }
}

impl Signer for LocalSigner {
    fn sign(&mut self, data: &[u8]) -> Result<SignOutcome, SignerError> {
        crypto::rsa_sign_sha256(&self.key, data)
            .map(SignOutcome::Signature)
            .ok_or(SignerError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> RsaPrivateKey {
        RsaPrivateKey::new(&mut rand::rngs::OsRng, 1024).unwrap()
    }

    #[test]
    fn test_verify_error_alerts() {
        assert_eq!(VerifyError::BadCertificate.alert(), AlertDescription::BadCertificate);
        assert_eq!(VerifyError::UnknownCa.alert(), AlertDescription::UnknownCa);
        assert_eq!(
            VerifyError::CertificateUnknown.alert(),
            AlertDescription::CertificateUnknown
        );
        assert_eq!(
            VerifyError::UnsupportedCertificate.alert(),
            AlertDescription::UnsupportedCertificate
        );
    }

    #[test]
    fn test_pinned_verifier_returns_identity() {
        let key = test_key();
        let verifier = PinnedVerifier::new("broker.test".into(), RsaPublicKey::from(&key));

        let identity = verifier
            .verify(&[vec![0x30, 0x82]], &ValidityCheck::Current)
            .unwrap();

        assert_eq!(identity.subject_cn, "broker.test");
    }

    #[test]
    fn test_pinned_verifier_rejects_empty_chain() {
        let key = test_key();
        let verifier = PinnedVerifier::new("broker.test".into(), RsaPublicKey::from(&key));

        let result = verifier.verify(&[], &ValidityCheck::Current);

        assert_eq!(result.unwrap_err(), VerifyError::BadCertificate);
    }

    #[test]
    fn test_local_signer_produces_verifiable_signature() {
        let key = test_key();
        let public = RsaPublicKey::from(&key);
        let mut signer = LocalSigner::new(key);

        let outcome = signer.sign(b"transcript").unwrap();

        match outcome {
            SignOutcome::Signature(signature) => {
                assert!(crypto::rsa_verify_sha256(&public, b"transcript", &signature));
            }
            SignOutcome::Pending => panic!("Local signer must answer inline"),
        }
    }

    #[test]
    fn test_validity_check_serde() {
        let current: ValidityCheck = serde_json::from_str(r#""current""#).unwrap();
        let skip: ValidityCheck = serde_json::from_str(r#""skip""#).unwrap();
        let fixed: ValidityCheck = serde_json::from_str(r#"{"at": 1700000000}"#).unwrap();

        assert_eq!(current, ValidityCheck::Current);
        assert_eq!(skip, ValidityCheck::Skip);
        assert_eq!(fixed, ValidityCheck::At(1700000000));
    }
}
