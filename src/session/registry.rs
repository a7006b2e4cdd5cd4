use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;

use super::channel::SessionChannel;
use super::SessionConfig;
use crate::error::SessionError;

struct Entry {
    channel: Arc<SessionChannel>,
    last_used: Instant,
}

/// Responder-side sessions keyed by session id.
///
/// Bounded by `max_sessions`; when full, idle sessions are dropped first and then
/// the least recently used one.
pub struct SessionRegistry {
    sessions: DashMap<String, Entry>,
    config: SessionConfig,
}

impl SessionRegistry {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            sessions: DashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Register a freshly established channel, replacing any session with the
    /// same id.
    pub fn insert(&self, channel: SessionChannel) {
        if self.sessions.len() >= self.config.max_sessions {
            self.prune_idle();
        }
        if self.sessions.len() >= self.config.max_sessions {
            self.evict_lru();
        }
        let id = channel.session_id().to_string();
        self.sessions.insert(
            id,
            Entry {
                channel: Arc::new(channel),
                last_used: Instant::now(),
            },
        );
    }

    /// Look up a session and mark it as used.
    pub fn get(&self, session_id: &str) -> Result<Arc<SessionChannel>, SessionError> {
        let mut entry = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::UnknownSession(session_id.to_string()))?;
        entry.last_used = Instant::now();
        Ok(Arc::clone(&entry.channel))
    }

    pub fn remove(&self, session_id: &str) -> bool {
        self.sessions.remove(session_id).is_some()
    }

    /// Drop every session idle for longer than the configured timeout.
    pub fn prune_idle(&self) -> usize {
        let before = self.sessions.len();
        let idle = self.config.session_idle_timeout;
        self.sessions
            .retain(|_, entry| entry.last_used.elapsed() < idle);
        let pruned = before.saturating_sub(self.sessions.len());
        if pruned > 0 {
            tracing::debug!(pruned, "pruned idle sessions");
        }
        pruned
    }

    fn evict_lru(&self) {
        let oldest = self
            .sessions
            .iter()
            .min_by_key(|entry| entry.last_used)
            .map(|entry| entry.key().clone());
        if let Some(id) = oldest {
            self.sessions.remove(&id);
            tracing::debug!(session_id = %id, "evicted least recently used session");
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Identity;

    fn responder_channel(server: &Identity) -> SessionChannel {
        let client = Identity::generate("client");
        let (_, msg1) =
            SessionChannel::initiate(&client, &server.kx_public(), SessionConfig::default())
                .unwrap();
        SessionChannel::respond(server, &msg1, SessionConfig::default())
            .unwrap()
            .0
    }

    #[test]
    fn insert_and_lookup() {
        let server = Identity::generate("server");
        let registry = SessionRegistry::new(SessionConfig::default());
        let channel = responder_channel(&server);
        let id = channel.session_id().to_string();
        registry.insert(channel);

        assert_eq!(registry.get(&id).unwrap().session_id(), id);
        assert!(matches!(
            registry.get("missing"),
            Err(SessionError::UnknownSession(_))
        ));
    }

    #[test]
    fn bounded_by_max_sessions() {
        let server = Identity::generate("server");
        let config = SessionConfig::builder().max_sessions(2).build().unwrap();
        let registry = SessionRegistry::new(config);

        let first = responder_channel(&server);
        let first_id = first.session_id().to_string();
        registry.insert(first);
        std::thread::sleep(std::time::Duration::from_millis(2));
        registry.insert(responder_channel(&server));
        std::thread::sleep(std::time::Duration::from_millis(2));
        registry.insert(responder_channel(&server));

        assert_eq!(registry.len(), 2);
        assert!(registry.get(&first_id).is_err());
    }

    #[test]
    fn remove_forgets_session() {
        let server = Identity::generate("server");
        let registry = SessionRegistry::new(SessionConfig::default());
        let channel = responder_channel(&server);
        let id = channel.session_id().to_string();
        registry.insert(channel);
        assert!(registry.remove(&id));
        assert!(registry.is_empty());
    }
}
