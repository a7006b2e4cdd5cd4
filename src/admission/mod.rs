//! Job admission: claim-token authorization, the attempt ledger and the runner
//! tying them to the sandbox.

pub mod claim;
pub mod ledger;
pub mod request;
pub mod runner;

pub use claim::{AuthorizedClaim, ClaimAuthorizer, ClaimContext};
pub use ledger::{AttemptLedger, AttemptRecord, AttemptStatus, DEFAULT_ATTEMPT_TTL};
pub use request::JobSpec;
pub use runner::{ClaimOutcome, JobRunner, RunResponse, RunnerConfig};
