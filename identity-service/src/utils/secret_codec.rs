//! Tenant basic-auth token: `base64(tenant_id ":" secret)`.
//!
//! A transport container, not encryption. Anyone holding the token can reverse
//! it, so it only travels over TLS.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use thiserror::Error;

pub const SEPARATOR: char = ':';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("Malformed tenant token")]
    MalformedToken,
}

pub struct SecretCodec;

impl SecretCodec {
    pub fn encode(tenant_id: &str, secret: &str) -> String {
        STANDARD.encode(format!("{}{}{}", tenant_id, SEPARATOR, secret))
    }

    /// Splits on the first separator, so the secret part may itself contain `:`.
    /// Both parts must be non-empty.
    pub fn decode(token: &str) -> Result<(String, String), CodecError> {
        let bytes = STANDARD
            .decode(token.trim())
            .map_err(|_| CodecError::MalformedToken)?;
        let payload = String::from_utf8(bytes).map_err(|_| CodecError::MalformedToken)?;

        match payload.split_once(SEPARATOR) {
            Some((tenant_id, secret)) if !tenant_id.is_empty() && !secret.is_empty() => {
                Ok((tenant_id.to_string(), secret.to_string()))
            }
            _ => Err(CodecError::MalformedToken),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let token = SecretCodec::encode("acme", "s3cret");
        assert_eq!(token, "YWNtZTpzM2NyZXQ=");
        assert_eq!(
            SecretCodec::decode(&token).unwrap(),
            ("acme".to_string(), "s3cret".to_string())
        );
    }

    #[test]
    fn test_secret_may_contain_separator() {
        let token = SecretCodec::encode("acme", "$2b$14$abc:def");
        let (id, secret) = SecretCodec::decode(&token).unwrap();
        assert_eq!(id, "acme");
        assert_eq!(secret, "$2b$14$abc:def");
    }

    #[test]
    fn test_non_base64_is_malformed() {
        assert_eq!(
            SecretCodec::decode("%%%not base64%%%"),
            Err(CodecError::MalformedToken)
        );
    }

    #[test]
    fn test_missing_separator_or_empty_part_is_malformed() {
        for payload in ["acme", ":s3cret", "acme:", ":"] {
            let token = STANDARD.encode(payload);
            assert_eq!(
                SecretCodec::decode(&token),
                Err(CodecError::MalformedToken),
                "payload {:?}",
                payload
            );
        }
    }

    #[test]
    fn test_non_utf8_payload_is_malformed() {
        let token = STANDARD.encode([0xff, 0xfe, b':', b'a']);
        assert_eq!(SecretCodec::decode(&token), Err(CodecError::MalformedToken));
    }
}
