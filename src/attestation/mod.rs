//! Attestation evaluation: per-node trust tracking over repeated reports.

pub mod evaluator;
pub mod service;
pub mod store;
pub mod types;

pub use evaluator::AttestationEvaluator;
pub use service::{IngestOutcome, TrustService};
pub use store::{FileTrustStore, MemoryTrustStore, NodeTrustStore};
pub use types::{
    AttestationEvent, AttestationReport, Evaluation, Health, NodeTrustRecord, TrustStatus,
};
