pub mod channel;
pub mod handshake;
pub mod registry;
pub mod retry;

use std::time::Duration;

use crate::error::ConfigError;

/// Maximum plaintext accepted by `open` by default: 32 MiB.
pub const MAX_PAYLOAD_SIZE: usize = 32 * 1024 * 1024;

/// Configuration for sealed sessions.
///
/// The cipher suite is always X25519 + HKDF-SHA256 + XChaCha20-Poly1305.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Maximum plaintext size in bytes accepted when opening (default: 32 MiB).
    pub max_payload_size: usize,

    /// Maximum number of responder sessions kept by a node (default: 1024).
    pub max_sessions: usize,

    /// Idle time after which a registered session is dropped (default: 1h).
    pub session_idle_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_payload_size: MAX_PAYLOAD_SIZE,
            max_sessions: 1024,
            session_idle_timeout: Duration::from_secs(3600),
        }
    }
}

impl SessionConfig {
    /// Create a builder for constructing a `SessionConfig`.
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::default()
    }
}

/// Builder for [`SessionConfig`].
#[derive(Debug, Clone)]
pub struct SessionConfigBuilder {
    max_payload_size: usize,
    max_sessions: usize,
    session_idle_timeout: Duration,
}

impl Default for SessionConfigBuilder {
    fn default() -> Self {
        let defaults = SessionConfig::default();
        Self {
            max_payload_size: defaults.max_payload_size,
            max_sessions: defaults.max_sessions,
            session_idle_timeout: defaults.session_idle_timeout,
        }
    }
}

impl SessionConfigBuilder {
    pub fn max_payload_size(mut self, size: usize) -> Self {
        self.max_payload_size = size;
        self
    }

    pub fn max_sessions(mut self, count: usize) -> Self {
        self.max_sessions = count;
        self
    }

    pub fn session_idle_timeout(mut self, timeout: Duration) -> Self {
        self.session_idle_timeout = timeout;
        self
    }

    /// Build the `SessionConfig`, validating that all values are sensible.
    pub fn build(self) -> Result<SessionConfig, ConfigError> {
        if self.max_payload_size == 0 {
            return Err(ConfigError::Invalid("max_payload_size must be > 0".into()));
        }
        if self.max_sessions == 0 {
            return Err(ConfigError::Invalid("max_sessions must be > 0".into()));
        }
        if self.session_idle_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "session_idle_timeout must be > 0".into(),
            ));
        }
        Ok(SessionConfig {
            max_payload_size: self.max_payload_size,
            max_sessions: self.max_sessions,
            session_idle_timeout: self.session_idle_timeout,
        })
    }
}
