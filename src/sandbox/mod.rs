//! Filesystem sandbox for job execution.
//!
//! Every path a job touches goes through [`Jail::resolve`]; the executor adds
//! the per-kind argument handling and the hard timeout.

pub mod executor;
pub mod jail;

pub use executor::{JobKind, JobOutcome, SandboxedExecutor};
pub use jail::Jail;
