pub mod digest;
pub mod kx;
pub mod seal;

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// HKDF `info` label binding derived keys to this protocol.
pub const PROTOCOL_LABEL: &[u8] = b"offgrid-noise-v1";

/// Supported cipher suites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherSuite {
    /// X25519 key exchange + HKDF-SHA256 + XChaCha20Poly1305.
    X25519XChaChaPoly,
}

impl CipherSuite {
    /// AEAD nonce length in bytes. Nonces are random, so the extended 24-byte
    /// space is required.
    pub const fn nonce_len(self) -> usize {
        match self {
            Self::X25519XChaChaPoly => 24,
        }
    }

    /// AEAD tag length in bytes.
    pub const fn tag_len(self) -> usize {
        match self {
            Self::X25519XChaChaPoly => 16,
        }
    }
}

/// 32-byte symmetric session key. Wiped on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; 32]);

impl SymmetricKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<[u8; 32]> for SymmetricKey {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SymmetricKey(<redacted>)")
    }
}

/// 32-byte X25519 public key.
pub type PublicKey = [u8; 32];

/// URL-safe base64 used for every binary field on the wire. Encodes without
/// padding, accepts either form on decode.
const WIRE_B64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

pub fn b64_encode(bytes: impl AsRef<[u8]>) -> String {
    WIRE_B64.encode(bytes)
}

pub fn b64_decode(s: &str) -> Result<Vec<u8>, base64::DecodeError> {
    WIRE_B64.decode(s)
}

/// Decode a base64 field that must be exactly `N` bytes long.
pub(crate) fn b64_decode_array<const N: usize>(s: &str) -> Option<[u8; N]> {
    b64_decode(s).ok()?.try_into().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_base64_accepts_padded_and_unpadded() {
        let encoded = b64_encode(b"ab");
        assert_eq!(encoded, "YWI");
        assert_eq!(b64_decode("YWI").unwrap(), b"ab");
        assert_eq!(b64_decode("YWI=").unwrap(), b"ab");
    }

    #[test]
    fn fixed_length_decode_rejects_wrong_size() {
        let encoded = b64_encode([7u8; 16]);
        assert!(b64_decode_array::<32>(&encoded).is_none());
        assert_eq!(b64_decode_array::<16>(&encoded), Some([7u8; 16]));
    }

    #[test]
    fn key_debug_is_redacted() {
        let key = SymmetricKey::from([0x42; 32]);
        assert_eq!(format!("{key:?}"), "SymmetricKey(<redacted>)");
    }
}
