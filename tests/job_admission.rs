//! Exactly-once job admission across retries, timeouts and concurrent workers.

use std::sync::Arc;

use serde_json::json;

use offgrid_node::admission::{
    AttemptLedger, AttemptStatus, ClaimAuthorizer, JobRunner, JobSpec, RunnerConfig,
};
use offgrid_node::error::{AuthError, Error};
use offgrid_node::sandbox::{Jail, SandboxedExecutor};

const KEY: &[u8] = b"integration-shared-key";

struct Fixture {
    dir: tempfile::TempDir,
    auth: Arc<ClaimAuthorizer>,
}

impl Fixture {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
            auth: Arc::new(ClaimAuthorizer::new(KEY.to_vec())),
        }
    }

    /// A runner with its own ledger connection, as a separate worker would have.
    fn runner(&self) -> JobRunner {
        JobRunner::new(
            Arc::clone(&self.auth),
            AttemptLedger::open(self.dir.path().join("attempts.db")).unwrap(),
            SandboxedExecutor::new(Jail::new(self.dir.path().join("jail")).unwrap()),
            RunnerConfig::default(),
        )
    }

    fn request(&self, attempt: &str, kind: &str, args: serde_json::Value) -> JobSpec {
        let deadline = chrono::Utc::now().timestamp() + 300;
        JobSpec::from_request(json!({
            "v": 1,
            "job": {
                "job_id": "job-1",
                "attempt_id": attempt,
                "kind": kind,
                "args": args,
                "timeout_seconds": 1,
                "deadline_ts": deadline,
                "claim_token": self.auth.issue("job-1", attempt, deadline),
            }
        }))
        .unwrap()
    }
}

#[tokio::test]
async fn retry_returns_stored_result_without_rewriting() {
    let fx = Fixture::new();
    let runner = fx.runner();
    let content = "aGVsbG8="; // "hello"

    let first = runner
        .run(fx.request("A", "write", json!({"path": "out.txt", "content_b64": content})))
        .await
        .unwrap();
    assert!(!first.cached);
    assert_eq!(first.result["bytes_written"], 5);

    // Change the file behind the ledger's back; a retry must not rewrite it.
    let path = fx.dir.path().join("jail/out.txt");
    std::fs::write(&path, b"changed").unwrap();

    let retry = runner
        .run(fx.request("A", "write", json!({"path": "out.txt", "content_b64": content})))
        .await
        .unwrap();
    assert!(retry.cached);
    assert_eq!(retry.result, first.result);
    assert_eq!(std::fs::read(&path).unwrap(), b"changed");
}

#[tokio::test]
async fn legacy_request_uses_req_uid_as_attempt() {
    let fx = Fixture::new();
    let runner = fx.runner();
    let deadline = chrono::Utc::now().timestamp() + 60;
    let spec = JobSpec::from_request(json!({
        "job_id": "job-1",
        "req_uid": "legacy-1",
        "kind": "probe",
        "deadline_ts": deadline,
        "claim_token": fx.auth.issue("job-1", "legacy-1", deadline),
    }))
    .unwrap();

    let resp = runner.run(spec).await.unwrap();
    assert_eq!(resp.attempt_id, "legacy-1");
    assert_eq!(resp.result["pong"], true);
}

#[tokio::test]
async fn timeout_is_persisted_as_completed() {
    let fx = Fixture::new();
    let runner = fx.runner();

    let resp = runner
        .run(fx.request("slow", "probe", json!({"delay_ms": 5_000})))
        .await
        .unwrap();
    assert_eq!(resp.result["ok"], false);
    assert_eq!(resp.result["error_code"], "JOB_TIMEOUT");

    let record = runner.ledger().get("slow").unwrap().unwrap();
    assert_eq!(record.status, AttemptStatus::Completed);

    let retry = runner
        .run(fx.request("slow", "probe", json!({"delay_ms": 5_000})))
        .await
        .unwrap();
    assert!(retry.cached);
    assert_eq!(retry.result["error_code"], "JOB_TIMEOUT");
}

#[tokio::test]
async fn escape_attempt_is_persisted_and_writes_nothing() {
    let fx = Fixture::new();
    let runner = fx.runner();
    let resp = runner
        .run(fx.request(
            "esc",
            "write",
            json!({"path": "../../etc/passwd", "content_b64": "eA=="}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.result["error_code"], "PATH_ESCAPE");
    assert!(!fx.dir.path().join("etc").exists());
}

#[tokio::test]
async fn bad_token_rejected_before_claim() {
    let fx = Fixture::new();
    let runner = fx.runner();
    let mut spec = fx.request("A", "probe", json!({}));
    spec.claim_token = Some(ClaimAuthorizer::new(b"wrong".to_vec()).issue(
        "job-1",
        "A",
        spec.deadline_ts.unwrap(),
    ));

    let err = runner.run(spec).await.unwrap_err();
    assert!(matches!(err, Error::Auth(AuthError::InvalidToken)));
    assert!(runner.ledger().get("A").unwrap().is_none());

    // A later, valid attempt with the same id still executes.
    let resp = runner.run(fx.request("A", "probe", json!({}))).await.unwrap();
    assert!(!resp.cached);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_workers_execute_once() {
    let fx = Fixture::new();
    let mut handles = Vec::new();
    for _ in 0..8 {
        let runner = fx.runner();
        let spec = fx.request("A", "probe", json!({"delay_ms": 200}));
        handles.push(tokio::spawn(async move { runner.run(spec).await.unwrap() }));
    }

    let mut executed = 0;
    for h in handles {
        let resp = h.await.unwrap();
        if resp.cached {
            let code = resp.result.get("error_code").and_then(|c| c.as_str());
            assert!(code == Some("IN_PROGRESS") || resp.result["pong"] == true);
        } else {
            executed += 1;
            assert_eq!(resp.result["pong"], true);
        }
    }
    assert_eq!(executed, 1);
}
