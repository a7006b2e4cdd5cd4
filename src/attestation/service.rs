use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use super::evaluator::AttestationEvaluator;
use super::store::NodeTrustStore;
use super::types::{AttestationReport, Evaluation, Health, NodeTrustRecord};
use crate::error::StoreError;

/// Result of ingesting one report: the evaluation and the record as persisted.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub evaluation: Evaluation,
    pub record: Option<NodeTrustRecord>,
}

/// Orchestrator-side attestation pipeline: load → evaluate → save, serialized
/// per node so concurrent reports for one node never lose counter updates.
pub struct TrustService {
    evaluator: AttestationEvaluator,
    store: Arc<dyn NodeTrustStore>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl TrustService {
    pub fn new(evaluator: AttestationEvaluator, store: Arc<dyn NodeTrustStore>) -> Self {
        Self {
            evaluator,
            store,
            locks: DashMap::new(),
        }
    }

    fn node_lock(&self, node_id: &str) -> Arc<Mutex<()>> {
        Arc::clone(
            &self
                .locks
                .entry(node_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// Evaluate a (possibly absent) report for `node_id` and persist the result.
    ///
    /// An absent report never writes, so it takes no per-node lock.
    pub async fn ingest(
        &self,
        node_id: &str,
        report: Option<&AttestationReport>,
        now: i64,
    ) -> Result<IngestOutcome, StoreError> {
        let Some(report) = report else {
            let mut record = self.store.load(node_id).await?;
            let evaluation = self.evaluator.evaluate(node_id, None, &mut record, now);
            return Ok(IngestOutcome { evaluation, record });
        };

        let lock = self.node_lock(node_id);
        let _guard = lock.lock().await;

        let mut record = self.store.load(node_id).await?;
        let evaluation = self.evaluator.evaluate(node_id, Some(report), &mut record, now);
        if let Some(ref rec) = record {
            self.store.save(node_id, rec).await?;
        }

        for event in &evaluation.events {
            tracing::info!(node_id, event = ?event, "attestation event");
        }

        Ok(IngestOutcome { evaluation, record })
    }

    /// Current record for a node, if it has ever reported.
    pub async fn record(&self, node_id: &str) -> Result<Option<NodeTrustRecord>, StoreError> {
        self.store.load(node_id).await
    }

    /// Orchestrator override of a node's health (the only path that may set RED).
    /// Returns the updated record, or `None` when the node has never reported.
    pub async fn set_health(
        &self,
        node_id: &str,
        health: Health,
    ) -> Result<Option<NodeTrustRecord>, StoreError> {
        if self.store.load(node_id).await?.is_none() {
            return Ok(None);
        }

        let lock = self.node_lock(node_id);
        let _guard = lock.lock().await;

        let Some(mut record) = self.store.load(node_id).await? else {
            return Ok(None);
        };
        record.health = health;
        self.store.save(node_id, &record).await?;
        tracing::info!(node_id, health = ?health, "node health overridden");
        Ok(Some(record))
    }

    #[cfg(test)]
    fn tracked_nodes(&self) -> usize {
        self.locks.len()
    }
}
