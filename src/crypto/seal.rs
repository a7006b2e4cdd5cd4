use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use super::{b64_decode, b64_decode_array, b64_encode, CipherSuite, SymmetricKey};
use crate::error::{CryptoError, SessionError};

const NONCE_LEN: usize = CipherSuite::X25519XChaChaPoly.nonce_len();

/// Authenticated-encryption wire envelope.
///
/// `ct` and `nonce` are base64url. `ts` is the sender's wall clock in ms and is
/// informational only. `aad`, when present, is authenticated but not encrypted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SealedEnvelope {
    pub ct: String,
    pub nonce: String,
    pub ts: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aad: Option<serde_json::Value>,
}

impl SealedEnvelope {
    /// Parse an envelope from its JSON form. Missing `ct` or `nonce` is a decode
    /// error, never an authentication error.
    pub fn from_json(bytes: &[u8]) -> Result<Self, SessionError> {
        serde_json::from_slice(bytes)
            .map_err(|e| SessionError::DecodeError(format!("envelope: {e}")))
    }

    pub fn to_json(&self) -> Result<Vec<u8>, CryptoError> {
        serde_json::to_vec(self).map_err(|e| CryptoError::Encode(e.to_string()))
    }
}

/// Canonical AAD bytes: the compact JSON encoding of the value.
fn aad_bytes(aad: Option<&serde_json::Value>) -> Result<Vec<u8>, CryptoError> {
    match aad {
        Some(value) => serde_json::to_vec(value).map_err(|e| CryptoError::Encode(e.to_string())),
        None => Ok(Vec::new()),
    }
}

fn cipher(key: &SymmetricKey) -> XChaCha20Poly1305 {
    XChaCha20Poly1305::new(key.as_bytes().into())
}

/// Encrypt `plaintext` under `key` with a freshly drawn 24-byte nonce.
///
/// An explicit JSON `null` AAD is treated as no AAD: the wire form omits the
/// field, so `null` could not survive a round trip.
pub fn seal(
    key: &SymmetricKey,
    plaintext: &[u8],
    aad: Option<serde_json::Value>,
) -> Result<SealedEnvelope, CryptoError> {
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);

    let aad = aad.filter(|v| !v.is_null());
    let aad_raw = aad_bytes(aad.as_ref())?;
    let ciphertext = cipher(key)
        .encrypt(
            XNonce::from_slice(&nonce_bytes),
            Payload {
                msg: plaintext,
                aad: &aad_raw,
            },
        )
        .map_err(|_| CryptoError::SealFailed)?;

    Ok(SealedEnvelope {
        ct: b64_encode(ciphertext),
        nonce: b64_encode(nonce_bytes),
        ts: chrono::Utc::now().timestamp_millis(),
        aad,
    })
}

/// Decrypt and authenticate an envelope.
///
/// `max_plaintext` bounds the accepted ciphertext size before any decoding work.
pub fn open(
    key: &SymmetricKey,
    envelope: &SealedEnvelope,
    max_plaintext: usize,
) -> Result<Vec<u8>, SessionError> {
    let nonce_bytes = b64_decode_array::<NONCE_LEN>(&envelope.nonce).ok_or_else(|| {
        SessionError::DecodeError(format!("nonce must be {NONCE_LEN} base64url bytes"))
    })?;

    // base64 expands 3 bytes into 4 characters.
    let tag_len = CipherSuite::X25519XChaChaPoly.tag_len();
    let max_encoded = (max_plaintext + tag_len).div_ceil(3) * 4;
    if envelope.ct.len() > max_encoded {
        return Err(SessionError::DecodeError(format!(
            "ciphertext too large: {} encoded bytes (max {max_encoded})",
            envelope.ct.len()
        )));
    }

    let ciphertext = b64_decode(&envelope.ct)
        .map_err(|e| SessionError::DecodeError(format!("ciphertext: {e}")))?;
    if ciphertext.len() < tag_len {
        return Err(SessionError::DecodeError("ciphertext shorter than tag".into()));
    }

    let aad_raw = aad_bytes(envelope.aad.as_ref())?;
    cipher(key)
        .decrypt(
            XNonce::from_slice(&nonce_bytes),
            Payload {
                msg: &ciphertext,
                aad: &aad_raw,
            },
        )
        .map_err(|_| SessionError::AuthenticationFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const LIMIT: usize = 32 * 1024 * 1024;

    fn test_key() -> SymmetricKey {
        SymmetricKey::from([0x42; 32])
    }

    fn flip_first_byte(field: &str) -> String {
        let mut raw = b64_decode(field).unwrap();
        raw[0] ^= 0xFF;
        b64_encode(raw)
    }

    #[test]
    fn seal_then_open() {
        let key = test_key();
        let env = seal(&key, b"hello confidential world", None).unwrap();
        let recovered = open(&key, &env, LIMIT).unwrap();
        assert_eq!(&recovered, b"hello confidential world");
    }

    #[test]
    fn empty_plaintext_roundtrip() {
        let key = test_key();
        let env = seal(&key, b"", None).unwrap();
        assert!(open(&key, &env, LIMIT).unwrap().is_empty());
    }

    #[test]
    fn large_plaintext_roundtrip() {
        let key = test_key();
        let payload = vec![0xA5u8; (1 << 20) + 17];
        let env = seal(&key, &payload, None).unwrap();
        assert_eq!(open(&key, &env, LIMIT).unwrap(), payload);
    }

    #[test]
    fn nonces_are_fresh() {
        let key = test_key();
        let a = seal(&key, b"same", None).unwrap();
        let b = seal(&key, b"same", None).unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ct, b.ct);
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let key = test_key();
        let mut env = seal(&key, b"secret", None).unwrap();
        env.ct = flip_first_byte(&env.ct);
        assert!(matches!(
            open(&key, &env, LIMIT),
            Err(SessionError::AuthenticationFailed)
        ));
    }

    #[test]
    fn tampered_nonce_fails() {
        let key = test_key();
        let mut env = seal(&key, b"secret", None).unwrap();
        env.nonce = flip_first_byte(&env.nonce);
        assert!(matches!(
            open(&key, &env, LIMIT),
            Err(SessionError::AuthenticationFailed)
        ));
    }

    #[test]
    fn tampered_aad_fails() {
        let key = test_key();
        let mut env = seal(&key, b"secret", Some(json!({"route": "/run"}))).unwrap();
        env.aad = Some(json!({"route": "/hs"}));
        assert!(matches!(
            open(&key, &env, LIMIT),
            Err(SessionError::AuthenticationFailed)
        ));
    }

    #[test]
    fn stripped_aad_fails() {
        let key = test_key();
        let mut env = seal(&key, b"secret", Some(json!({"route": "/run"}))).unwrap();
        env.aad = None;
        assert!(open(&key, &env, LIMIT).is_err());
    }

    #[test]
    fn wrong_key_fails() {
        let env = seal(&test_key(), b"secret", None).unwrap();
        let other = SymmetricKey::from([0x43; 32]);
        assert!(matches!(
            open(&other, &env, LIMIT),
            Err(SessionError::AuthenticationFailed)
        ));
    }

    #[test]
    fn short_nonce_is_decode_error() {
        let key = test_key();
        let mut env = seal(&key, b"secret", None).unwrap();
        env.nonce = b64_encode([0u8; 12]);
        assert!(matches!(
            open(&key, &env, LIMIT),
            Err(SessionError::DecodeError(_))
        ));
    }

    #[test]
    fn oversize_ciphertext_is_decode_error() {
        let key = test_key();
        let env = seal(&key, &[0u8; 4096], None).unwrap();
        assert!(matches!(
            open(&key, &env, 1024),
            Err(SessionError::DecodeError(_))
        ));
    }

    #[test]
    fn envelope_missing_fields_rejected() {
        let err = SealedEnvelope::from_json(br#"{"nonce":"AAAA","ts":1}"#).unwrap_err();
        assert!(matches!(err, SessionError::DecodeError(_)));
        let err = SealedEnvelope::from_json(br#"{"ct":"AAAA","ts":1}"#).unwrap_err();
        assert!(matches!(err, SessionError::DecodeError(_)));
    }

    #[test]
    fn envelope_json_roundtrip() {
        let key = test_key();
        let env = seal(&key, b"payload", Some(json!({"n": 1}))).unwrap();
        let parsed = SealedEnvelope::from_json(&env.to_json().unwrap()).unwrap();
        assert_eq!(parsed, env);
        assert_eq!(open(&key, &parsed, LIMIT).unwrap(), b"payload");
    }

    #[test]
    fn null_aad_survives_wire_roundtrip() {
        let key = test_key();
        let env = seal(&key, b"m", Some(serde_json::Value::Null)).unwrap();
        assert_eq!(env.aad, None);

        let wire = env.to_json().unwrap();
        assert!(!String::from_utf8_lossy(&wire).contains("aad"));
        let parsed = SealedEnvelope::from_json(&wire).unwrap();
        assert_eq!(open(&key, &parsed, LIMIT).unwrap(), b"m");
    }
}
