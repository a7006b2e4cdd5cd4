pub mod admission;
pub mod attestation;
pub mod config;
pub mod crypto;
pub mod error;
pub mod heartbeat;
pub mod identity;
pub mod sandbox;
pub mod service;
pub mod session;

// Re-export key types at crate root for convenience.
pub use error::{Error, Result};
pub use identity::Identity;
pub use session::channel::SessionChannel;
pub use session::SessionConfig;

pub use admission::{AttemptLedger, ClaimAuthorizer, JobRunner, JobSpec};
pub use attestation::{AttestationEvaluator, AttestationReport, NodeTrustStore, TrustService};
pub use sandbox::{Jail, SandboxedExecutor};
