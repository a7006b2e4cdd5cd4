use super::types::{
    AttestationEvent, AttestationReport, Evaluation, Health, LastSeen, NodeTrustRecord,
    TrustStatus,
};
use crate::crypto::digest::prefix;

/// Default number of capability-hash flips before a node is a spoof suspect.
pub const DEFAULT_SPOOF_THRESHOLD: u64 = 3;

/// Per-node trust state machine.
///
/// Drift is always measured against the first-seen baseline, so a node cannot walk
/// away from its original fingerprint in small steps. Flip-flopping is measured
/// between consecutive reports and counted for the life of the record.
#[derive(Debug, Clone)]
pub struct AttestationEvaluator {
    spoof_threshold: u64,
}

impl Default for AttestationEvaluator {
    fn default() -> Self {
        Self::new(DEFAULT_SPOOF_THRESHOLD)
    }
}

impl AttestationEvaluator {
    /// A threshold of zero is treated as one.
    pub fn new(spoof_threshold: u64) -> Self {
        Self {
            spoof_threshold: spoof_threshold.max(1),
        }
    }

    pub fn spoof_threshold(&self) -> u64 {
        self.spoof_threshold
    }

    /// Evaluate `report` against the node's history.
    ///
    /// Creates the record on first contact and otherwise mutates it in place
    /// (`last_seen`, `status`, counters, `last_change_timestamp`, `health`). The
    /// caller persists the record.
    pub fn evaluate(
        &self,
        node_id: &str,
        report: Option<&AttestationReport>,
        record: &mut Option<NodeTrustRecord>,
        now: i64,
    ) -> Evaluation {
        match (record.as_mut(), report) {
            (None, None) => Evaluation {
                status: TrustStatus::Missing,
                events: Vec::new(),
                health_hint: None,
            },
            (None, Some(report)) => {
                tracing::info!(
                    node_id,
                    build = %report.build_id,
                    capability_hash = %prefix(&report.capability_hash),
                    "first attestation recorded"
                );
                *record = Some(NodeTrustRecord::first_contact(report, now));
                Evaluation {
                    status: TrustStatus::Ok,
                    events: vec![AttestationEvent::AttestationFirstSeen {
                        build: report.build_id.clone(),
                        capability_hash_prefix: prefix(&report.capability_hash),
                    }],
                    health_hint: None,
                }
            }
            // Nothing new to compare; history stands as is.
            (Some(existing), None) => Evaluation {
                status: existing.status,
                events: Vec::new(),
                health_hint: None,
            },
            (Some(existing), Some(report)) => self.compare(node_id, report, existing, now),
        }
    }

    fn compare(
        &self,
        node_id: &str,
        report: &AttestationReport,
        record: &mut NodeTrustRecord,
        now: i64,
    ) -> Evaluation {
        let mut events = Vec::new();
        let mut health_hint = None;

        let baseline = &record.first_seen;
        if report.build_id != baseline.build_id
            || report.capability_hash != baseline.capability_hash
        {
            events.push(AttestationEvent::AttestationDrift {
                old_build: baseline.build_id.clone(),
                new_build: report.build_id.clone(),
                old_cap_prefix: prefix(&baseline.capability_hash),
                new_cap_prefix: prefix(&report.capability_hash),
            });
            record.drift_count += 1;
            record.last_change_timestamp = Some(now);
            record.status = record.status.max(TrustStatus::Drift);
            health_hint = Some(Health::Yellow);
            tracing::warn!(
                node_id,
                old_build = %baseline.build_id,
                new_build = %report.build_id,
                drift_count = record.drift_count,
                "attestation drift from baseline"
            );
        }

        if report.capability_hash != record.last_seen.capability_hash {
            record.spoof_count += 1;
            tracing::debug!(node_id, spoof_count = record.spoof_count, "capability hash flipped");
            if record.spoof_count >= self.spoof_threshold {
                record.status = TrustStatus::SpoofSuspect;
                health_hint = Some(Health::Yellow);
                events.push(AttestationEvent::AttestationSpoofSuspect {
                    node_id: node_id.to_string(),
                    spoof_count: record.spoof_count,
                });
                tracing::warn!(
                    node_id,
                    spoof_count = record.spoof_count,
                    threshold = self.spoof_threshold,
                    "node flagged as spoof suspect"
                );
            }
        }

        record.last_seen = LastSeen {
            timestamp: now,
            build_id: report.build_id.clone(),
            capability_hash: report.capability_hash.clone(),
        };

        if let Some(hint) = health_hint {
            apply_health_hint(record, hint);
        }

        Evaluation {
            status: record.status,
            events,
            health_hint,
        }
    }
}

/// Worsen health to `hint` if that is strictly worse. RED is owned by the
/// orchestrator and never touched here.
fn apply_health_hint(record: &mut NodeTrustRecord, hint: Health) {
    if record.health != Health::Red && hint != Health::Red && hint > record.health {
        record.health = hint;
    }
}
