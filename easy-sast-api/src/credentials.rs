//! Veracode API credentials.

use crate::ApiError;
use crate::validation::{ValidationError, validate_attribute};
use crate::value::ConfigValue;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use std::fmt;

type HmacSha256 = Hmac<Sha256>;

/// Final link of the signing key derivation.
const REQUEST_VERSION: &[u8] = b"vcode_request_version_1";

/// API key id and secret used to sign every request.
///
/// Both halves are validated on construction and never appear in `Debug`
/// output.
#[derive(Clone)]
pub struct ApiCredentials {
    api_key_id: SecretString,
    api_key_secret: SecretString,
}

impl ApiCredentials {
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidAttribute` if the id is not 32 hex
    /// characters or the secret is not 128 hex characters.
    pub fn new(api_key_id: String, api_key_secret: String) -> Result<Self, ValidationError> {
        validate_attribute("api_key_id", &ConfigValue::from(api_key_id.as_str()))?;
        validate_attribute("api_key_secret", &ConfigValue::from(api_key_secret.as_str()))?;

        Ok(Self {
            api_key_id: SecretString::from(api_key_id),
            api_key_secret: SecretString::from(api_key_secret),
        })
    }

    #[must_use]
    pub fn expose_api_key_id(&self) -> &str {
        self.api_key_id.expose_secret()
    }

    #[must_use]
    pub fn expose_api_key_secret(&self) -> &str {
        self.api_key_secret.expose_secret()
    }

    /// Hex HMAC-SHA-256 of `message` under a key derived from the secret,
    /// the nonce and the timestamp.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Authentication` if the secret is not hex.
    pub fn sign(&self, nonce: &[u8], timestamp: u64, message: &str) -> Result<String, ApiError> {
        let secret = hex::decode(self.expose_api_key_secret())
            .map_err(|e| ApiError::Authentication(format!("api_key_secret is not hex: {e}")))?;
        let timestamp = timestamp.to_string();

        let signature = [
            nonce,
            timestamp.as_bytes(),
            REQUEST_VERSION,
            message.as_bytes(),
        ]
        .into_iter()
        .try_fold(secret, |key, link| {
            let mut mac = HmacSha256::new_from_slice(&key)
                .map_err(|e| ApiError::Authentication(e.to_string()))?;
            mac.update(link);
            Ok::<_, ApiError>(mac.finalize().into_bytes().to_vec())
        })?;

        Ok(hex::encode(signature))
    }
}

impl fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("api_key_id", &"[REDACTED]")
            .field("api_key_secret", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    const ID: &str = "0123456789abcdef0123456789ABCDEF";

    #[test]
    fn test_debug_redaction() {
        let credentials =
            ApiCredentials::new(ID.to_string(), "ab".repeat(64)).expect("valid credentials");
        let debug = format!("{credentials:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains(ID));
        assert!(!debug.contains("abab"));
    }

    #[test]
    fn test_rejects_malformed_credentials() {
        assert!(ApiCredentials::new("short".to_string(), "ab".repeat(64)).is_err());
        assert!(ApiCredentials::new(ID.to_string(), "zz".repeat(64)).is_err());
    }

    #[test]
    fn test_expose() {
        let credentials =
            ApiCredentials::new(ID.to_string(), "ab".repeat(64)).expect("valid credentials");
        assert_eq!(credentials.expose_api_key_id(), ID);
        assert_eq!(credentials.expose_api_key_secret().len(), 128);
    }

    #[test]
    fn test_sign_depends_on_every_input() {
        let credentials =
            ApiCredentials::new(ID.to_string(), "ab".repeat(64)).expect("valid credentials");
        let nonce = [7u8; 16];

        let signature = credentials.sign(&nonce, 1, "message").expect("should sign");
        assert_eq!(signature.len(), 64);
        assert_eq!(
            credentials.sign(&nonce, 1, "message").expect("should sign"),
            signature
        );
        assert_ne!(credentials.sign(&[8u8; 16], 1, "message").expect("should sign"), signature);
        assert_ne!(credentials.sign(&nonce, 2, "message").expect("should sign"), signature);
        assert_ne!(credentials.sign(&nonce, 1, "other").expect("should sign"), signature);
    }
}
