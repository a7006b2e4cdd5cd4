use serde::{Deserialize, Serialize};

use crate::crypto::digest;

/// A node's self-reported attestation: build identity and capability fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttestationReport {
    pub build_id: String,
    pub capability_hash: String,
    #[serde(default)]
    pub runtime_info: serde_json::Value,
}

impl AttestationReport {
    /// Build a report from a raw capability list, hashing it.
    pub fn from_capabilities<I, S>(
        build_id: impl Into<String>,
        capabilities: I,
        runtime_info: serde_json::Value,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            build_id: build_id.into(),
            capability_hash: digest::capability_hash(capabilities),
            runtime_info,
        }
    }
}

/// Per-node trust state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrustStatus {
    Missing,
    Ok,
    Drift,
    SpoofSuspect,
}

/// Coarse health signal. Ordered by severity.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Health {
    #[default]
    Green,
    Yellow,
    Red,
}

/// The baseline fingerprint captured at first contact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FirstSeen {
    pub timestamp: i64,
    pub build_id: String,
    pub capability_hash: String,
    #[serde(default)]
    pub runtime_info: serde_json::Value,
}

/// The most recent fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastSeen {
    pub timestamp: i64,
    pub build_id: String,
    pub capability_hash: String,
}

/// Persisted trust history for one node. Timestamps are unix milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeTrustRecord {
    pub first_seen: FirstSeen,
    pub last_seen: LastSeen,
    pub status: TrustStatus,
    pub drift_count: u64,
    pub spoof_count: u64,
    pub last_change_timestamp: Option<i64>,
    #[serde(default)]
    pub health: Health,
}

impl NodeTrustRecord {
    /// Fresh record for a node seen for the first time.
    pub fn first_contact(report: &AttestationReport, now: i64) -> Self {
        Self {
            first_seen: FirstSeen {
                timestamp: now,
                build_id: report.build_id.clone(),
                capability_hash: report.capability_hash.clone(),
                runtime_info: report.runtime_info.clone(),
            },
            last_seen: LastSeen {
                timestamp: now,
                build_id: report.build_id.clone(),
                capability_hash: report.capability_hash.clone(),
            },
            status: TrustStatus::Ok,
            drift_count: 0,
            spoof_count: 0,
            last_change_timestamp: None,
            health: Health::Green,
        }
    }
}

/// Trust-affecting events emitted by the evaluator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttestationEvent {
    AttestationFirstSeen {
        build: String,
        capability_hash_prefix: String,
    },
    AttestationDrift {
        old_build: String,
        new_build: String,
        old_cap_prefix: String,
        new_cap_prefix: String,
    },
    AttestationSpoofSuspect {
        node_id: String,
        spoof_count: u64,
    },
}

/// Outcome of evaluating one report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub status: TrustStatus,
    pub events: Vec<AttestationEvent>,
    pub health_hint: Option<Health>,
}
