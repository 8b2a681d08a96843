use crate::trust::{LocalSigner, ValidityCheck};
use brine::crypto::{DecodePrivateKey, DecodeRsaPrivateKey, RsaPrivateKey};
use brine::encoding::pem::{self, PemError};
use serde_derive::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Connection options for a single broker endpoint.
#[derive(Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Expected server name, matched against the leaf certificate CN.
    pub host: String,
    pub port: u16,
    /// Root trust material handed to the chain verifier (PEM).
    pub ca: Option<String>,
    /// Client certificate presented during the handshake (PEM).
    pub cert: String,
    /// Client private key (PEM). Absent when signing is delegated to an
    /// external device through an injected signer.
    pub key: Option<String>,
    #[serde(default)]
    pub validity_check_date: ValidityCheck,
}

impl BrokerConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> BrokerConfig {
        serde_json::from_reader(fs::File::open(path).expect("Error opening broker config file"))
            .expect("Error parsing broker config file")
    }

    #[inline]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// DER body of the first certificate block in `cert`.
    pub fn client_cert_der(&self) -> Result<Vec<u8>, PemError> {
        let mut blocks = pem::decode(&self.cert, "CERTIFICATE")?;
        Ok(blocks.remove(0))
    }

    /// Parses the configured private key, accepting both the PKCS#1 and
    /// PKCS#8 encodings.
    pub fn private_key(&self) -> Option<RsaPrivateKey> {
        let text = self.key.as_ref()?;

        RsaPrivateKey::from_pkcs1_pem(text)
            .or_else(|_| RsaPrivateKey::from_pkcs8_pem(text))
            .ok()
    }

    /// Builds an in-process signer when a private key is configured.
    pub fn signer(&self) -> Option<LocalSigner> {
        self.private_key().map(LocalSigner::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG_JSON: &str = r#"{
        "host": "broker.test",
        "port": 8883,
        "ca": null,
        "cert": "-----BEGIN CERTIFICATE-----\nAAEC\n-----END CERTIFICATE-----\n",
        "key": null
    }"#;

    #[test]
    fn test_parse_minimal_config() {
        let config: BrokerConfig = serde_json::from_str(CONFIG_JSON).unwrap();

        assert_eq!(config.host, "broker.test");
        assert_eq!(config.port, 8883);
        assert_eq!(config.address(), "broker.test:8883");
        assert_eq!(config.validity_check_date, ValidityCheck::Current);
        assert!(config.private_key().is_none());
        assert!(config.signer().is_none());
    }

    #[test]
    fn test_client_cert_der() {
        let config: BrokerConfig = serde_json::from_str(CONFIG_JSON).unwrap();

        assert_eq!(config.client_cert_der().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_validity_check_date_override() {
        let json = r#"{
            "host": "broker.test",
            "port": 8883,
            "ca": null,
            "cert": "",
            "key": null,
            "validity_check_date": "skip"
        }"#;

        let config: BrokerConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.validity_check_date, ValidityCheck::Skip);
    }

    #[test]
    fn test_missing_cert_block() {
        let config: BrokerConfig = serde_json::from_str(
            r#"{"host": "h", "port": 1, "ca": null, "cert": "not pem", "key": null}"#,
        )
        .unwrap();

        assert!(config.client_cert_der().is_err());
    }
}
