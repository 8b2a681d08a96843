/// Base64 plumbing shared between config serialization and PEM decoding.
pub mod base64 {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub use base64::{decode, encode, DecodeError};

    #[inline]
    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&encode(bytes))
    }

    #[inline]
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = <&str>::deserialize(deserializer)?;
        decode(text).map_err(de::Error::custom)
    }
}

/// Minimal PEM reader. Collects the DER payload of every block carrying the
/// requested tag, in document order.
pub mod pem {
    use std::fmt;

    #[derive(Debug, Eq, PartialEq)]
    pub enum PemError {
        MissingBlock,
        Truncated,
        Base64(super::base64::DecodeError),
    }

    impl fmt::Display for PemError {
        fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
            match self {
                PemError::MissingBlock => write!(f, "no block with the requested tag"),
                PemError::Truncated => write!(f, "begin marker without matching end marker"),
                PemError::Base64(err) => write!(f, "malformed block body: {}", err),
            }
        }
    }

    pub fn decode(text: &str, tag: &str) -> Result<Vec<Vec<u8>>, PemError> {
        let begin = format!("-----BEGIN {}-----", tag);
        let end = format!("-----END {}-----", tag);

        let mut blocks = Vec::new();
        let mut body: Option<String> = None;

        for line in text.lines() {
            let line = line.trim();

            if line == begin {
                body = Some(String::new());
            } else if line == end {
                let joined = body.take().ok_or(PemError::MissingBlock)?;
                blocks.push(super::base64::decode(&joined).map_err(PemError::Base64)?);
            } else if let Some(ref mut joined) = body {
                joined.push_str(line);
            }
        }

        if body.is_some() {
            return Err(PemError::Truncated);
        }

        if blocks.is_empty() {
            return Err(PemError::MissingBlock);
        }

        Ok(blocks)
    }
}
