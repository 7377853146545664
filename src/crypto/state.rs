use base64::Engine as _;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use crate::error::AppError;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_LEN: usize = 32;

/// Helper to create an HMAC instance, resolving trait ambiguity.
fn new_hmac(key: &[u8]) -> Result<HmacSha256, AppError> {
    <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|e| AppError::CryptoError(format!("HMAC init failed: {e}")))
}

/// HMAC-SHA256 signing for the OAuth `state` parameter.
pub struct StateSigner {
    key: Vec<u8>,
}

impl StateSigner {
    /// Create a signer from a base64-encoded key.
    pub fn new(secret_b64: &str) -> Result<Self, AppError> {
        let key = base64::engine::general_purpose::STANDARD
            .decode(secret_b64)
            .map_err(|e| AppError::CryptoError(format!("Invalid STATE_SECRET base64: {e}")))?;

        if key.is_empty() {
            return Err(AppError::CryptoError("STATE_SECRET must not be empty".into()));
        }

        Ok(Self { key })
    }

    /// Create a signer with a fresh random key. States signed by it only
    /// verify within this process, which matches the lifetime of the tokens.
    pub fn random() -> Self {
        let mut key = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        Self { key }
    }

    /// Sign a payload. Returns base64url(hmac || payload).
    pub fn sign(&self, payload: &str) -> Result<String, AppError> {
        let mut mac = new_hmac(&self.key)?;
        mac.update(payload.as_bytes());
        let signature = mac.finalize().into_bytes();

        let mut combined = signature.to_vec();
        combined.extend_from_slice(payload.as_bytes());

        Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(&combined))
    }

    /// Verify a signed state and return its payload.
    pub fn verify(&self, signed: &str) -> Result<String, AppError> {
        let combined = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(signed)
            .map_err(|_| AppError::InvalidState("not base64".into()))?;

        if combined.len() < SIGNATURE_LEN {
            return Err(AppError::InvalidState("too short".into()));
        }

        let (signature, payload_bytes) = combined.split_at(SIGNATURE_LEN);

        let mut mac = new_hmac(&self.key)?;
        mac.update(payload_bytes);
        mac.verify_slice(signature)
            .map_err(|_| AppError::InvalidState("signature mismatch".into()))?;

        String::from_utf8(payload_bytes.to_vec())
            .map_err(|_| AppError::InvalidState("payload is not UTF-8".into()))
    }

    /// Random hex nonce mixed into each state so two consents never share one.
    pub fn nonce() -> String {
        let mut bytes = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut bytes);
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_signer() -> StateSigner {
        let key = base64::engine::general_purpose::STANDARD.encode([0x43u8; 32]);
        StateSigner::new(&key).unwrap()
    }

    #[test]
    fn test_state_sign_verify_roundtrip() {
        let signer = test_signer();
        let payload = "default:0a1b2c3d4e5f6071:1700000000";
        let signed = signer.sign(payload).unwrap();
        assert_eq!(signer.verify(&signed).unwrap(), payload);
    }

    #[test]
    fn test_state_tamper_detection() {
        let signer = test_signer();
        let signed = signer.sign("legit-payload").unwrap();
        let tampered = format!("{}X", signed);
        assert!(signer.verify(&tampered).is_err());
    }

    #[test]
    fn test_other_key_rejects_state() {
        let signed = test_signer().sign("payload").unwrap();
        assert!(StateSigner::random().verify(&signed).is_err());
    }

    #[test]
    fn test_empty_secret_rejected() {
        assert!(StateSigner::new("").is_err());
    }

    #[test]
    fn test_nonce_is_hex() {
        let nonce = StateSigner::nonce();
        assert_eq!(nonce.len(), 16);
        assert!(nonce.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
