use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::claim::{AuthorizedClaim, ClaimAuthorizer};
use super::ledger::{in_progress_result, AttemptLedger, AttemptRecord};
use super::request::JobSpec;
use crate::error::{Error, StoreError};
use crate::sandbox::{JobOutcome, SandboxedExecutor};

/// Timeouts applied to submitted jobs.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Used when a job does not ask for a timeout (default: 30s).
    pub default_timeout: Duration,
    /// Upper bound on any requested timeout (default: 300s).
    pub max_timeout: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
            max_timeout: Duration::from_secs(300),
        }
    }
}

/// Result of racing for an attempt in the ledger.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// This caller owns the attempt and must execute it.
    Won,
    /// Someone else owns it; the stored record, if it still exists.
    Lost(Option<AttemptRecord>),
}

/// Response body of a run request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResponse {
    pub request_id: String,
    pub attempt_id: String,
    pub job_id: String,
    /// `true` when the result came from the ledger instead of this execution.
    pub cached: bool,
    pub result: Value,
}

/// Admission pipeline: authorize, claim, execute, persist.
#[derive(Clone)]
pub struct JobRunner {
    authorizer: Arc<ClaimAuthorizer>,
    ledger: AttemptLedger,
    executor: SandboxedExecutor,
    config: RunnerConfig,
}

impl JobRunner {
    pub fn new(
        authorizer: Arc<ClaimAuthorizer>,
        ledger: AttemptLedger,
        executor: SandboxedExecutor,
        config: RunnerConfig,
    ) -> Self {
        Self {
            authorizer,
            ledger,
            executor,
            config,
        }
    }

    pub fn ledger(&self) -> &AttemptLedger {
        &self.ledger
    }

    pub async fn run(&self, spec: JobSpec) -> Result<RunResponse, Error> {
        self.run_at(spec, chrono::Utc::now().timestamp()).await
    }

    /// Run `spec` as of `now` (unix seconds).
    ///
    /// Authorization failures are returned before the ledger is touched. A lost
    /// claim is not an error: the stored result comes back with `cached = true`.
    /// Everything after authorization runs in a detached task, so a claimed
    /// attempt is always executed and completed even if the caller goes away.
    pub async fn run_at(&self, spec: JobSpec, now: i64) -> Result<RunResponse, Error> {
        let request_id = uuid::Uuid::new_v4().to_string();

        let claim = self
            .authorizer
            .authorize(&spec.claim_context(), now)
            .map_err(|e| {
                tracing::warn!(
                    request_id = %request_id,
                    job_id = ?spec.job_id,
                    code = e.code(),
                    "job request rejected"
                );
                e
            })?;

        let runner = self.clone();
        let admitted = claim.clone();
        let rid = request_id.clone();
        let task = tokio::spawn(async move { runner.admit(&rid, &admitted, spec, now).await });
        let (cached, result) = task.await.map_err(|e| StoreError::Task(e.to_string()))??;

        Ok(RunResponse {
            request_id,
            attempt_id: claim.attempt_id,
            job_id: claim.job_id,
            cached,
            result,
        })
    }

    /// Race for `attempt_id`. On loss, the current record is read back.
    pub async fn claim(&self, attempt_id: &str, now: i64) -> Result<ClaimOutcome, StoreError> {
        let ledger = self.ledger.clone();
        let id = attempt_id.to_string();
        blocking(move || {
            if ledger.claim(&id, now)? {
                Ok(ClaimOutcome::Won)
            } else {
                Ok(ClaimOutcome::Lost(ledger.get(&id)?))
            }
        })
        .await
    }

    /// Claim, then either execute and persist or read back the stored result.
    /// Returns `(cached, result)`.
    async fn admit(
        &self,
        request_id: &str,
        claim: &AuthorizedClaim,
        spec: JobSpec,
        now: i64,
    ) -> Result<(bool, Value), StoreError> {
        match self.claim(&claim.attempt_id, now).await? {
            ClaimOutcome::Lost(record) => {
                tracing::info!(
                    request_id,
                    attempt_id = %claim.attempt_id,
                    "attempt already claimed, returning stored result"
                );
                let result = record
                    .map(|r| r.caller_result())
                    .unwrap_or_else(in_progress_result);
                Ok((true, result))
            }
            ClaimOutcome::Won => Ok((false, self.execute(claim, spec).await?)),
        }
    }

    /// Execute a won attempt and persist its result. A panicking job body is
    /// recorded as `INTERNAL_ERROR`.
    async fn execute(&self, claim: &AuthorizedClaim, spec: JobSpec) -> Result<Value, StoreError> {
        let timeout = spec.timeout(self.config.default_timeout, self.config.max_timeout);
        let executor = self.executor.clone();
        let attempt_id = claim.attempt_id.clone();
        let kind = spec.kind;
        let args = spec.args;

        tracing::info!(
            attempt_id = %attempt_id,
            job_id = %claim.job_id,
            kind = %kind,
            timeout_ms = timeout.as_millis() as u64,
            "attempt claimed, executing"
        );

        let started = Instant::now();
        let body = tokio::spawn(async move { executor.execute(&kind, args, timeout).await });
        let outcome = match body.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(attempt_id = %attempt_id, error = %e, "job execution panicked");
                JobOutcome::internal("job execution failed unexpectedly")
            }
        };

        let ok = outcome.is_ok();
        let result = outcome.into_result();
        let stored = result.clone();
        let ledger = self.ledger.clone();
        let id = attempt_id.clone();
        blocking(move || ledger.complete(&id, &stored)).await?;

        tracing::info!(
            attempt_id = %attempt_id,
            ok,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "attempt completed"
        );
        Ok(result)
    }
}

async fn blocking<T, F>(f: F) -> Result<T, StoreError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
}
