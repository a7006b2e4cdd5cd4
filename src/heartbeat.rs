//! Periodic node → orchestrator heartbeat carrying the attestation report.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::attestation::{AttestationEvent, AttestationReport, Health, TrustStatus};
use crate::session::retry::{with_retry, RetryPolicy};

/// Path of the heartbeat endpoint relative to the orchestrator base URL.
pub const HEARTBEAT_PATH: &str = "/api/hosts/heartbeat";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub host_id: String,
    pub status: String,
    /// Unix milliseconds.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attestation: Option<AttestationReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub host_id: String,
    pub trust_status: TrustStatus,
    pub health: Health,
    #[serde(default)]
    pub events: Vec<AttestationEvent>,
}

/// Supervised sender loop. Delivery failures are logged and retried with
/// backoff; they never stop the loop. Only cancellation does.
pub struct HeartbeatSender {
    client: reqwest::Client,
    endpoint: String,
    host_id: String,
    report: AttestationReport,
    interval: Duration,
    retry: RetryPolicy,
}

impl HeartbeatSender {
    pub fn new(
        orchestrator_url: &str,
        host_id: impl Into<String>,
        report: AttestationReport,
        interval: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            endpoint: format!("{}{HEARTBEAT_PATH}", orchestrator_url.trim_end_matches('/')),
            host_id: host_id.into(),
            report,
            interval,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn request(&self) -> HeartbeatRequest {
        HeartbeatRequest {
            host_id: self.host_id.clone(),
            status: "online".into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            attestation: Some(self.report.clone()),
        }
    }

    /// Deliver a single heartbeat, without retries.
    pub async fn send_once(&self) -> Result<HeartbeatResponse, reqwest::Error> {
        self.client
            .post(&self.endpoint)
            .json(&self.request())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }

    /// Run until `cancel` fires. Returns the number of delivered heartbeats.
    pub async fn run(self, cancel: CancellationToken) -> u64 {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut delivered = 0u64;

        tracing::info!(
            endpoint = %self.endpoint,
            interval_ms = self.interval.as_millis() as u64,
            "heartbeat sender started"
        );
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let delivery = with_retry(&self.retry, || self.send_once());
            let result = tokio::select! {
                _ = cancel.cancelled() => break,
                result = delivery => result,
            };

            match result {
                Ok(resp) => {
                    delivered += 1;
                    if resp.trust_status == TrustStatus::Ok {
                        tracing::debug!(
                            host_id = %resp.host_id,
                            health = ?resp.health,
                            "heartbeat acknowledged"
                        );
                    } else {
                        tracing::warn!(
                            host_id = %resp.host_id,
                            trust_status = ?resp.trust_status,
                            health = ?resp.health,
                            "orchestrator reports degraded trust"
                        );
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        endpoint = %self.endpoint,
                        error = %e,
                        "heartbeat delivery failed"
                    );
                }
            }
        }
        tracing::info!(delivered, "heartbeat sender stopped");
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    use axum::{extract::State, routing::post, Json, Router};

    async fn serve(counter: Arc<AtomicU64>) -> String {
        async fn handler(
            State(counter): State<Arc<AtomicU64>>,
            Json(req): Json<HeartbeatRequest>,
        ) -> Json<HeartbeatResponse> {
            counter.fetch_add(1, Ordering::SeqCst);
            Json(HeartbeatResponse {
                host_id: req.host_id,
                trust_status: TrustStatus::Ok,
                health: Health::Green,
                events: Vec::new(),
            })
        }

        let app = Router::new()
            .route(HEARTBEAT_PATH, post(handler))
            .with_state(counter);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn report() -> AttestationReport {
        AttestationReport::from_capabilities("b1", ["probe"], serde_json::Value::Null)
    }

    #[tokio::test]
    async fn send_once_reaches_orchestrator() {
        let counter = Arc::new(AtomicU64::new(0));
        let url = serve(Arc::clone(&counter)).await;

        let sender =
            HeartbeatSender::new(&format!("{url}/"), "n1", report(), Duration::from_secs(1))
                .unwrap();
        assert_eq!(sender.endpoint(), format!("{url}{HEARTBEAT_PATH}"));

        let resp = sender.send_once().await.unwrap();
        assert_eq!(resp.host_id, "n1");
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let counter = Arc::new(AtomicU64::new(0));
        let url = serve(Arc::clone(&counter)).await;

        let sender =
            HeartbeatSender::new(&url, "n1", report(), Duration::from_millis(20)).unwrap();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(sender.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(150)).await;
        cancel.cancel();
        let delivered = handle.await.unwrap();
        assert!(delivered >= 1);
        assert!(delivered <= counter.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn unreachable_orchestrator_does_not_stop_loop() {
        // Port 9 (discard) on localhost is not expected to accept HTTP.
        let sender = HeartbeatSender::new(
            "http://127.0.0.1:9",
            "n1",
            report(),
            Duration::from_millis(10),
        )
        .unwrap()
        .with_retry_policy(RetryPolicy::none());
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(sender.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!handle.is_finished());
        cancel.cancel();
        assert_eq!(handle.await.unwrap(), 0);
    }
}
