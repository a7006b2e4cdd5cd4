//! Long-term node identity: an Ed25519 signing key and an X25519 key-exchange key.
//!
//! Key material lives in one JSON record per node id under a key directory. The
//! record is created on first start and never rewritten; [`Identity`] is immutable
//! once loaded.

use std::path::{Path, PathBuf};

use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::crypto::kx::KeyPair;
use crate::crypto::{b64_encode, PublicKey};
use crate::error::StoreError;

/// On-disk key record. Secrets are hex; public halves are stored alongside so
/// operators can read them without loading the secrets.
#[derive(Serialize, Deserialize)]
struct KeyRecord {
    node_id: String,
    sign_sk: String,
    sign_pk: String,
    kx_sk: String,
    kx_pk: String,
}

impl Drop for KeyRecord {
    fn drop(&mut self) {
        self.sign_sk.zeroize();
        self.kx_sk.zeroize();
    }
}

/// Public halves of a node identity, as served by `GET /pubkeys`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeys {
    pub node_id: String,
    /// Ed25519 verification key, base64url.
    pub sign_pub: String,
    /// X25519 key-exchange public key, base64url.
    pub kx_pub: String,
}

/// A node's long-term keys.
pub struct Identity {
    node_id: String,
    signing: SigningKey,
    kx: KeyPair,
}

impl Identity {
    /// Generate a fresh identity (not persisted).
    pub fn generate(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            signing: SigningKey::generate(&mut OsRng),
            kx: KeyPair::generate(),
        }
    }

    /// Load the identity for `node_id` from `key_dir`, creating and persisting a
    /// new one if no record exists yet.
    pub fn load_or_generate(key_dir: &Path, node_id: &str) -> Result<Self, StoreError> {
        let path = record_path(key_dir, node_id);
        if path.exists() {
            return Self::load(&path, node_id);
        }

        let identity = Self::generate(node_id);
        identity.persist(&path)?;
        tracing::info!(node_id, path = %path.display(), "generated new node identity");
        Ok(identity)
    }

    fn load(path: &Path, node_id: &str) -> Result<Self, StoreError> {
        let raw = std::fs::read(path)?;
        let record: KeyRecord = serde_json::from_slice(&raw)?;
        let corrupt = |reason: &str| StoreError::Corrupt {
            key: node_id.to_string(),
            reason: reason.to_string(),
        };

        if record.node_id != node_id {
            return Err(corrupt("record belongs to a different node id"));
        }

        let mut sign_sk = decode_key(&record.sign_sk).ok_or_else(|| corrupt("sign_sk"))?;
        let mut kx_sk = decode_key(&record.kx_sk).ok_or_else(|| corrupt("kx_sk"))?;
        let identity = Self {
            node_id: record.node_id.clone(),
            signing: SigningKey::from_bytes(&sign_sk),
            kx: KeyPair::from_secret_bytes(kx_sk),
        };
        sign_sk.zeroize();
        kx_sk.zeroize();

        // Public halves must match the secrets they were written with.
        if hex::encode(identity.signing.verifying_key().as_bytes()) != record.sign_pk
            || hex::encode(identity.kx.public.as_bytes()) != record.kx_pk
        {
            return Err(corrupt("public key does not match secret"));
        }

        tracing::debug!(node_id, "loaded node identity");
        Ok(identity)
    }

    fn persist(&self, path: &Path) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let record = KeyRecord {
            node_id: self.node_id.clone(),
            sign_sk: hex::encode(self.signing.to_bytes()),
            sign_pk: hex::encode(self.signing.verifying_key().as_bytes()),
            kx_sk: hex::encode(self.kx.secret.to_bytes()),
            kx_pk: hex::encode(self.kx.public.as_bytes()),
        };
        let json = serde_json::to_vec_pretty(&record)?;
        std::fs::write(path, json)?;
        restrict_permissions(path)?;
        Ok(())
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn kx_keypair(&self) -> &KeyPair {
        &self.kx
    }

    pub fn kx_public(&self) -> PublicKey {
        self.kx.public.to_bytes()
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing.verifying_key()
    }

    /// Sign `message` with the long-term signing key, base64url signature.
    pub fn sign_b64(&self, message: &[u8]) -> String {
        b64_encode(self.signing.sign(message).to_bytes())
    }

    pub fn public_keys(&self) -> PublicKeys {
        PublicKeys {
            node_id: self.node_id.clone(),
            sign_pub: b64_encode(self.verifying_key().as_bytes()),
            kx_pub: b64_encode(self.kx.public.as_bytes()),
        }
    }
}

fn record_path(key_dir: &Path, node_id: &str) -> PathBuf {
    let safe: String = node_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    key_dir.join(format!("{safe}.json"))
}

fn decode_key(hex_str: &str) -> Option<[u8; 32]> {
    hex::decode(hex_str).ok()?.try_into().ok()
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
