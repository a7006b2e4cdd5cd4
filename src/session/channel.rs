use crate::crypto::seal::{self, SealedEnvelope};
use crate::crypto::{PublicKey, SymmetricKey};
use crate::error::{Error, SessionError};
use crate::identity::Identity;

use super::handshake::{self, HandshakeMessage1, HandshakeMessage2};
use super::SessionConfig;

/// Which side of the handshake a channel was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

/// Confidential channel bound to one derived session key.
///
/// The key never leaves the channel and is zeroized when the channel drops.
pub struct SessionChannel {
    key: SymmetricKey,
    session_id: String,
    role: Role,
    config: SessionConfig,
}

impl std::fmt::Debug for SessionChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionChannel")
            .field("session_id", &self.session_id)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

impl SessionChannel {
    /// Start a session as the initiator. Returns the channel and the message to
    /// send to the responder.
    pub fn initiate(
        identity: &Identity,
        peer_static: &PublicKey,
        config: SessionConfig,
    ) -> Result<(Self, HandshakeMessage1), Error> {
        let (msg1, key, session_id) = handshake::initiate(identity, peer_static)?;
        let channel = Self {
            key,
            session_id,
            role: Role::Initiator,
            config,
        };
        Ok((channel, msg1))
    }

    /// Answer an initiator's first message. Returns the channel and the
    /// acknowledgement to send back.
    pub fn respond(
        identity: &Identity,
        msg1: &HandshakeMessage1,
        config: SessionConfig,
    ) -> Result<(Self, HandshakeMessage2), Error> {
        let (msg2, key) = handshake::respond(identity, msg1)?;
        let channel = Self {
            key,
            session_id: msg2.session_id.clone(),
            role: Role::Responder,
            config,
        };
        Ok((channel, msg2))
    }

    /// Check the responder's acknowledgement against this initiator channel.
    pub fn confirm(&self, msg2: &HandshakeMessage2) -> Result<(), SessionError> {
        if !msg2.ack {
            return Err(SessionError::DecodeError("handshake not acknowledged".into()));
        }
        if msg2.session_id != self.session_id {
            return Err(SessionError::DecodeError(format!(
                "session id mismatch: expected {}, got {}",
                self.session_id, msg2.session_id
            )));
        }
        Ok(())
    }

    /// Encrypt an application payload.
    pub fn seal(
        &self,
        plaintext: &[u8],
        aad: Option<serde_json::Value>,
    ) -> Result<SealedEnvelope, Error> {
        Ok(seal::seal(&self.key, plaintext, aad)?)
    }

    /// Decrypt an envelope produced by the peer.
    pub fn open(&self, envelope: &SealedEnvelope) -> Result<Vec<u8>, SessionError> {
        seal::open(&self.key, envelope, self.config.max_payload_size)
    }

    /// Seal a serializable value as compact JSON.
    pub fn seal_json<T: serde::Serialize>(
        &self,
        value: &T,
        aad: Option<serde_json::Value>,
    ) -> Result<SealedEnvelope, Error> {
        let plaintext = serde_json::to_vec(value)
            .map_err(|e| SessionError::DecodeError(format!("encode payload: {e}")))?;
        self.seal(&plaintext, aad)
    }

    /// Open an envelope and parse its plaintext as JSON.
    pub fn open_json<T: serde::de::DeserializeOwned>(
        &self,
        envelope: &SealedEnvelope,
    ) -> Result<T, SessionError> {
        let plaintext = self.open(envelope)?;
        serde_json::from_slice(&plaintext)
            .map_err(|e| SessionError::DecodeError(format!("payload: {e}")))
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn role(&self) -> Role {
        self.role
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pair() -> (SessionChannel, SessionChannel) {
        let client = Identity::generate("client");
        let server = Identity::generate("server");
        let (initiator, msg1) =
            SessionChannel::initiate(&client, &server.kx_public(), SessionConfig::default())
                .unwrap();
        let (responder, msg2) =
            SessionChannel::respond(&server, &msg1, SessionConfig::default()).unwrap();
        initiator.confirm(&msg2).unwrap();
        (initiator, responder)
    }

    #[test]
    fn sealed_exchange_both_directions() {
        let (initiator, responder) = pair();
        assert_eq!(initiator.role(), Role::Initiator);
        assert_eq!(responder.role(), Role::Responder);

        let env = initiator.seal(b"ping", None).unwrap();
        assert_eq!(responder.open(&env).unwrap(), b"ping");

        let env = responder.seal(b"pong", Some(json!({"seq": 1}))).unwrap();
        assert_eq!(initiator.open(&env).unwrap(), b"pong");
    }

    #[test]
    fn json_helpers_roundtrip() {
        let (initiator, responder) = pair();
        let env = initiator.seal_json(&json!({"kind": "probe"}), None).unwrap();
        let value: serde_json::Value = responder.open_json(&env).unwrap();
        assert_eq!(value["kind"], "probe");
    }

    #[test]
    fn confirm_rejects_foreign_ack() {
        let (initiator, _) = pair();
        let foreign = HandshakeMessage2 {
            ack: true,
            ts: 0,
            session_id: "0".repeat(32),
        };
        assert!(initiator.confirm(&foreign).is_err());

        let nack = HandshakeMessage2 {
            ack: false,
            ts: 0,
            session_id: initiator.session_id().to_string(),
        };
        assert!(initiator.confirm(&nack).is_err());
    }

    #[test]
    fn payload_limit_enforced_on_open() {
        let client = Identity::generate("client");
        let server = Identity::generate("server");
        let small = SessionConfig::builder().max_payload_size(64).build().unwrap();
        let (initiator, msg1) =
            SessionChannel::initiate(&client, &server.kx_public(), SessionConfig::default())
                .unwrap();
        let (responder, _) = SessionChannel::respond(&server, &msg1, small).unwrap();

        let env = initiator.seal(&[0u8; 4096], None).unwrap();
        assert!(matches!(
            responder.open(&env),
            Err(SessionError::DecodeError(_))
        ));
    }
}
