use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::crypto::kx::{self, KeyPair};
use crate::crypto::{b64_decode_array, b64_encode, PublicKey, SymmetricKey};
use crate::error::{CryptoError, SessionError};
use crate::identity::Identity;

/// Length of the hex session identifier.
const SESSION_ID_LEN: usize = 32;

/// Initiator → responder: ephemeral X25519 public key and a timestamp (ms).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeMessage1 {
    pub eph_pub: String,
    pub ts: i64,
}

/// Responder → initiator acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeMessage2 {
    pub ack: bool,
    pub ts: i64,
    /// Identifier both sides use to refer to the derived session.
    pub session_id: String,
}

/// Session identifier: first 32 hex chars of `SHA256(eph_pub)`.
pub fn session_id_for(eph_pub: &PublicKey) -> String {
    let mut id = hex::encode(Sha256::digest(eph_pub));
    id.truncate(SESSION_ID_LEN);
    id
}

fn map_kx_error(e: CryptoError) -> SessionError {
    match e {
        CryptoError::NonContributoryKey => {
            SessionError::DecodeError("peer key is a low-order point".into())
        }
        other => SessionError::Crypto(other),
    }
}

/// Run the initiator side of the one-round handshake.
///
/// Generates an ephemeral key pair, computes `DH(eph_secret, peer_static)` and
/// derives the session key. The initiator's long-term identity is not bound into
/// the exchange; only the responder's static key authenticates the session.
pub fn initiate(
    identity: &Identity,
    peer_static: &PublicKey,
) -> Result<(HandshakeMessage1, SymmetricKey, String), SessionError> {
    let ephemeral = KeyPair::generate();
    let peer = x25519_dalek::PublicKey::from(*peer_static);
    let key = kx::derive_session_key(&ephemeral.secret, &peer).map_err(map_kx_error)?;

    let eph_bytes = ephemeral.public.to_bytes();
    let session_id = session_id_for(&eph_bytes);

    tracing::debug!(
        initiator = identity.node_id(),
        session_id = %session_id,
        "handshake initiated"
    );

    let msg1 = HandshakeMessage1 {
        eph_pub: b64_encode(eph_bytes),
        ts: chrono::Utc::now().timestamp_millis(),
    };
    Ok((msg1, key, session_id))
}

/// Run the responder side: `DH(own_static_secret, peer_ephemeral)`.
pub fn respond(
    identity: &Identity,
    msg1: &HandshakeMessage1,
) -> Result<(HandshakeMessage2, SymmetricKey), SessionError> {
    let eph_bytes = b64_decode_array::<32>(&msg1.eph_pub).ok_or_else(|| {
        SessionError::DecodeError("eph_pub must be 32 base64url bytes".into())
    })?;
    let peer_eph = x25519_dalek::PublicKey::from(eph_bytes);

    let key = kx::derive_session_key(&identity.kx_keypair().secret, &peer_eph)
        .map_err(map_kx_error)?;

    let session_id = session_id_for(&eph_bytes);
    tracing::debug!(
        responder = identity.node_id(),
        session_id = %session_id,
        peer_ts = msg1.ts,
        "handshake answered"
    );

    let msg2 = HandshakeMessage2 {
        ack: true,
        ts: chrono::Utc::now().timestamp_millis(),
        session_id,
    };
    Ok((msg2, key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_sides_derive_same_key() {
        let client = Identity::generate("client");
        let server = Identity::generate("server");

        let (msg1, client_key, client_sid) = initiate(&client, &server.kx_public()).unwrap();
        let (msg2, server_key) = respond(&server, &msg1).unwrap();

        assert!(msg2.ack);
        assert_eq!(client_key, server_key);
        assert_eq!(client_sid, msg2.session_id);
        assert_eq!(client_sid.len(), SESSION_ID_LEN);
    }

    #[test]
    fn wrong_responder_derives_different_key() {
        let client = Identity::generate("client");
        let server = Identity::generate("server");
        let impostor = Identity::generate("impostor");

        let (msg1, client_key, _) = initiate(&client, &server.kx_public()).unwrap();
        let (_, impostor_key) = respond(&impostor, &msg1).unwrap();
        assert_ne!(client_key, impostor_key);
    }

    #[test]
    fn each_handshake_uses_fresh_ephemeral() {
        let client = Identity::generate("client");
        let server = Identity::generate("server");
        let (a, key_a, _) = initiate(&client, &server.kx_public()).unwrap();
        let (b, key_b, _) = initiate(&client, &server.kx_public()).unwrap();
        assert_ne!(a.eph_pub, b.eph_pub);
        assert_ne!(key_a, key_b);
    }

    #[test]
    fn malformed_ephemeral_rejected() {
        let server = Identity::generate("server");
        let msg1 = HandshakeMessage1 {
            eph_pub: "not base64 at all!".into(),
            ts: 0,
        };
        assert!(matches!(
            respond(&server, &msg1),
            Err(SessionError::DecodeError(_))
        ));
    }

    #[test]
    fn low_order_ephemeral_rejected() {
        let server = Identity::generate("server");
        let msg1 = HandshakeMessage1 {
            eph_pub: b64_encode([0u8; 32]),
            ts: 0,
        };
        assert!(matches!(
            respond(&server, &msg1),
            Err(SessionError::DecodeError(_))
        ));
    }
}
