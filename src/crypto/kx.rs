use hkdf::Hkdf;
use rand::rngs::OsRng;
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};

use super::{SymmetricKey, PROTOCOL_LABEL};
use crate::error::CryptoError;

/// An X25519 key pair.
pub struct KeyPair {
    pub secret: StaticSecret,
    pub public: PublicKey,
}

impl KeyPair {
    /// Generate a new random key pair.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Rebuild a key pair from stored secret bytes.
    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        let secret = StaticSecret::from(bytes);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }
}

/// Perform X25519 Diffie-Hellman and derive the session key via HKDF-SHA256.
///
/// `key = HKDF(salt = none, ikm = shared_secret, info = "offgrid-noise-v1")`.
/// Both roles run the identical derivation, so initiator and responder agree on a
/// single key whenever their DH inputs match.
pub fn derive_session_key(
    our_secret: &StaticSecret,
    their_public: &PublicKey,
) -> Result<SymmetricKey, CryptoError> {
    let shared_secret = our_secret.diffie_hellman(their_public);
    if !shared_secret.was_contributory() {
        return Err(CryptoError::NonContributoryKey);
    }

    let hkdf = Hkdf::<Sha256>::new(None, shared_secret.as_bytes());

    let mut key = [0u8; 32];
    hkdf.expand(PROTOCOL_LABEL, &mut key)
        .map_err(|_| CryptoError::HkdfExpandFailed)?;

    Ok(SymmetricKey::from(key))
}
