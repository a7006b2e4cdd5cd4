//! TOML configuration for the node and orchestrator roles.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::admission::RunnerConfig;
use crate::error::ConfigError;
use crate::session::SessionConfig;

/// Environment variable that overrides the shared claim-token key.
pub const CLAIM_KEY_ENV: &str = "OFFGRID_CLAIM_KEY";

const MIN_CLAIM_KEY_LEN: usize = 16;

/// Read and parse a TOML file.
pub fn load_toml<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    Ok(toml::from_str(&raw)?)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeConfig {
    pub node_id: String,
    pub listen_addr: String,
    /// Address put in announcements; defaults to `listen_addr`.
    pub advertise_addr: Option<String>,
    pub build_id: String,
    pub capabilities: Vec<String>,
    pub data_dir: PathBuf,
    pub key_dir: Option<PathBuf>,
    pub jail_root: Option<PathBuf>,
    pub ledger_path: Option<PathBuf>,
    /// Shared HMAC key for claim tokens. Usually supplied via the environment.
    pub claim_key: Option<String>,
    pub attempt_ttl_secs: u64,
    pub default_timeout_secs: u64,
    pub max_timeout_secs: u64,
    pub orchestrator_url: Option<String>,
    pub heartbeat_interval_secs: u64,
    pub max_sessions: usize,
    pub session_idle_secs: u64,
    pub max_body_bytes: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: "node-local".into(),
            listen_addr: "127.0.0.1:8700".into(),
            advertise_addr: None,
            build_id: concat!("offgrid-node/", env!("CARGO_PKG_VERSION")).into(),
            capabilities: vec!["list".into(), "probe".into(), "write".into()],
            data_dir: PathBuf::from("offgrid-data"),
            key_dir: None,
            jail_root: None,
            ledger_path: None,
            claim_key: None,
            attempt_ttl_secs: 24 * 60 * 60,
            default_timeout_secs: 30,
            max_timeout_secs: 300,
            orchestrator_url: None,
            heartbeat_interval_secs: 15,
            max_sessions: 1024,
            session_idle_secs: 3600,
            max_body_bytes: 48 * 1024 * 1024,
        }
    }
}

impl NodeConfig {
    /// Load from `path`, or defaults when no path is given, then apply
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => load_toml(path)?,
            None => Self::default(),
        };
        Ok(config.with_env_overrides(|k| std::env::var(k).ok()))
    }

    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(key) = lookup(CLAIM_KEY_ENV).filter(|k| !k.is_empty()) {
            self.claim_key = Some(key);
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node_id.trim().is_empty() {
            return Err(ConfigError::Invalid("node_id must not be empty".into()));
        }
        self.listen_addr.parse::<SocketAddr>().map_err(|e| {
            ConfigError::Invalid(format!("listen_addr {:?}: {e}", self.listen_addr))
        })?;
        match &self.claim_key {
            None => {
                return Err(ConfigError::Invalid(format!(
                    "claim_key is required (set it in the config or {CLAIM_KEY_ENV})"
                )))
            }
            Some(k) if k.len() < MIN_CLAIM_KEY_LEN => {
                return Err(ConfigError::Invalid(format!(
                    "claim_key must be at least {MIN_CLAIM_KEY_LEN} bytes"
                )))
            }
            Some(_) => {}
        }
        if self.default_timeout_secs == 0 || self.default_timeout_secs > self.max_timeout_secs {
            return Err(ConfigError::Invalid(
                "default_timeout_secs must be in 1..=max_timeout_secs".into(),
            ));
        }
        if self.orchestrator_url.is_some() && self.heartbeat_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "heartbeat_interval_secs must be > 0".into(),
            ));
        }
        if self.max_body_bytes == 0 {
            return Err(ConfigError::Invalid("max_body_bytes must be > 0".into()));
        }
        // Surfaces the session-level checks with the same error type.
        self.session_config()?;
        Ok(())
    }

    pub fn key_dir(&self) -> PathBuf {
        self.key_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("keys"))
    }

    pub fn jail_root(&self) -> PathBuf {
        self.jail_root
            .clone()
            .unwrap_or_else(|| self.data_dir.join("jail"))
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.ledger_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("attempts.db"))
    }

    pub fn advertise_addr(&self) -> &str {
        self.advertise_addr.as_deref().unwrap_or(&self.listen_addr)
    }

    pub fn attempt_ttl(&self) -> Duration {
        Duration::from_secs(self.attempt_ttl_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            default_timeout: Duration::from_secs(self.default_timeout_secs),
            max_timeout: Duration::from_secs(self.max_timeout_secs),
        }
    }

    pub fn session_config(&self) -> Result<SessionConfig, ConfigError> {
        SessionConfig::builder()
            .max_sessions(self.max_sessions)
            .session_idle_timeout(Duration::from_secs(self.session_idle_secs))
            .build()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OrchestratorConfig {
    pub listen_addr: String,
    /// JSON trust store; in-memory when unset.
    pub trust_store_path: Option<PathBuf>,
    pub spoof_threshold: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8800".into(),
            trust_store_path: None,
            spoof_threshold: crate::attestation::evaluator::DEFAULT_SPOOF_THRESHOLD,
        }
    }
}

impl OrchestratorConfig {
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => load_toml(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.listen_addr.parse::<SocketAddr>().map_err(|e| {
            ConfigError::Invalid(format!("listen_addr {:?}: {e}", self.listen_addr))
        })?;
        if self.spoof_threshold == 0 {
            return Err(ConfigError::Invalid("spoof_threshold must be >= 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> NodeConfig {
        NodeConfig {
            claim_key: Some("0123456789abcdef".into()),
            ..NodeConfig::default()
        }
    }

    #[test]
    fn defaults_need_a_claim_key() {
        assert!(NodeConfig::default().validate().is_err());
        valid().validate().unwrap();
    }

    #[test]
    fn env_override_wins() {
        let cfg = valid().with_env_overrides(|k| {
            (k == CLAIM_KEY_ENV).then(|| "from-the-environment".to_string())
        });
        assert_eq!(cfg.claim_key.as_deref(), Some("from-the-environment"));

        let cfg = valid().with_env_overrides(|_| Some(String::new()));
        assert_eq!(cfg.claim_key.as_deref(), Some("0123456789abcdef"));
    }

    #[test]
    fn parses_partial_toml() {
        let cfg: NodeConfig = toml::from_str(
            r#"
            node_id = "edge-7"
            listen_addr = "0.0.0.0:9000"
            capabilities = ["probe"]
            orchestrator_url = "http://orch:8800"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.node_id, "edge-7");
        assert_eq!(cfg.capabilities, vec!["probe".to_string()]);
        assert_eq!(cfg.max_timeout_secs, 300);
        assert_eq!(cfg.ledger_path(), PathBuf::from("offgrid-data/attempts.db"));
        assert_eq!(cfg.advertise_addr(), "0.0.0.0:9000");
    }

    #[test]
    fn unknown_keys_rejected() {
        assert!(toml::from_str::<NodeConfig>("bogus = 1").is_err());
    }

    #[test]
    fn invalid_values_rejected() {
        let mut cfg = valid();
        cfg.listen_addr = "not-an-addr".into();
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));

        let mut cfg = valid();
        cfg.default_timeout_secs = 500;
        assert!(cfg.validate().is_err());

        let mut cfg = valid();
        cfg.claim_key = Some("short".into());
        assert!(cfg.validate().is_err());

        let mut cfg = valid();
        cfg.max_sessions = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn load_reports_missing_file() {
        let err = NodeConfig::load(Some(Path::new("/definitely/not/here.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn orchestrator_defaults_validate() {
        OrchestratorConfig::default().validate().unwrap();
        let cfg = OrchestratorConfig {
            spoof_threshold: 0,
            ..OrchestratorConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
