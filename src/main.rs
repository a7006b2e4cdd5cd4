//! offgrid-node: node and orchestrator entry points.
//!
//! Usage:
//!   offgrid-node node --config node.toml
//!   offgrid-node orchestrator --listen 0.0.0.0:8800 --trust-store trust.json
//!   offgrid-node keygen --key-dir keys --node-id edge-1
//!   OFFGRID_CLAIM_KEY=... offgrid-node issue-token --job-id j1 --attempt-id a1

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing_subscriber::EnvFilter;

use offgrid_node::admission::{AttemptLedger, ClaimAuthorizer, ClaimContext, JobRunner};
use offgrid_node::attestation::{
    AttestationEvaluator, AttestationReport, FileTrustStore, MemoryTrustStore, NodeTrustStore,
    TrustService,
};
use offgrid_node::config::{NodeConfig, OrchestratorConfig, CLAIM_KEY_ENV};
use offgrid_node::heartbeat::HeartbeatSender;
use offgrid_node::identity::Identity;
use offgrid_node::sandbox::{Jail, SandboxedExecutor};
use offgrid_node::service::{self, NodeInfo, NodeState, OrchestratorState};
use offgrid_node::session::registry::SessionRegistry;

const SESSION_PRUNE_INTERVAL: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "offgrid-node", version)]
#[command(about = "Confidential, attested, exactly-once job execution for mesh nodes")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a compute node.
    Node {
        /// TOML config file; defaults apply when omitted.
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
        /// Override `listen_addr`.
        #[arg(long)]
        listen: Option<String>,
        /// Override `node_id`.
        #[arg(long)]
        node_id: Option<String>,
    },
    /// Run the orchestrator's attestation intake.
    Orchestrator {
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
        #[arg(long)]
        listen: Option<String>,
        /// JSON trust store; records are kept in memory when omitted.
        #[arg(long, value_name = "FILE")]
        trust_store: Option<PathBuf>,
    },
    /// Create (or load) a node's long-term keys and print the public halves.
    Keygen {
        #[arg(long, value_name = "DIR")]
        key_dir: PathBuf,
        #[arg(long)]
        node_id: String,
    },
    /// Mint a claim token for one job attempt.
    IssueToken {
        #[arg(long)]
        job_id: String,
        #[arg(long)]
        attempt_id: String,
        /// Absolute deadline (unix seconds). Takes precedence over --ttl-secs.
        #[arg(long)]
        deadline_ts: Option<i64>,
        #[arg(long, default_value_t = 300)]
        ttl_secs: i64,
        /// Shared key; read from the environment when omitted.
        #[arg(long, env = CLAIM_KEY_ENV, hide_env_values = true)]
        key: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match Cli::parse().command {
        Command::Node {
            config,
            listen,
            node_id,
        } => run_node(config, listen, node_id).await,
        Command::Orchestrator {
            config,
            listen,
            trust_store,
        } => run_orchestrator(config, listen, trust_store).await,
        Command::Keygen { key_dir, node_id } => keygen(key_dir, &node_id),
        Command::IssueToken {
            job_id,
            attempt_id,
            deadline_ts,
            ttl_secs,
            key,
        } => issue_token(&job_id, &attempt_id, deadline_ts, ttl_secs, &key),
    }
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

async fn run_node(
    config_path: Option<PathBuf>,
    listen: Option<String>,
    node_id: Option<String>,
) -> Result<()> {
    let mut cfg = NodeConfig::load(config_path.as_deref()).context("loading node config")?;
    if let Some(listen) = listen {
        cfg.listen_addr = listen;
    }
    if let Some(node_id) = node_id {
        cfg.node_id = node_id;
    }
    cfg.validate().context("invalid node config")?;
    let claim_key = cfg.claim_key.clone().context("claim_key missing")?;

    let identity = Arc::new(
        Identity::load_or_generate(&cfg.key_dir(), &cfg.node_id).context("loading node keys")?,
    );

    let ledger = AttemptLedger::open(cfg.ledger_path()).context("opening attempt ledger")?;
    let evicted = ledger.evict_expired(cfg.attempt_ttl(), chrono::Utc::now().timestamp())?;
    tracing::info!(evicted, path = %cfg.ledger_path().display(), "attempt ledger ready");

    let jail = Jail::new(cfg.jail_root()).context("creating jail root")?;
    tracing::info!(root = %jail.root().display(), "sandbox ready");

    let runner = JobRunner::new(
        Arc::new(ClaimAuthorizer::new(claim_key.into_bytes())),
        ledger,
        SandboxedExecutor::new(jail),
        cfg.runner_config(),
    );
    let sessions = Arc::new(SessionRegistry::new(cfg.session_config()?));
    let info = NodeInfo {
        build_id: cfg.build_id.clone(),
        capabilities: cfg.capabilities.clone(),
        addr: cfg.advertise_addr().to_string(),
    };
    let state = NodeState::new(Arc::clone(&identity), runner, Arc::clone(&sessions), info);
    let app = service::node::router(state, cfg.max_body_bytes);

    let cancel = CancellationToken::new();
    let tracker = TaskTracker::new();
    spawn_signal_handler(cancel.clone());

    if let Some(url) = &cfg.orchestrator_url {
        let report = AttestationReport::from_capabilities(
            cfg.build_id.clone(),
            &cfg.capabilities,
            json!({
                "os": std::env::consts::OS,
                "arch": std::env::consts::ARCH,
                "version": env!("CARGO_PKG_VERSION"),
            }),
        );
        let interval = cfg.heartbeat_interval();
        let sender = HeartbeatSender::new(url, cfg.node_id.clone(), report, interval)
            .context("building heartbeat client")?;
        tracker.spawn(sender.run(cancel.clone()));
    }

    {
        let cancel = cancel.clone();
        let sessions = Arc::clone(&sessions);
        tracker.spawn(async move {
            let mut ticker = tokio::time::interval(SESSION_PRUNE_INTERVAL);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => { sessions.prune_idle(); }
                }
            }
        });
    }

    let listener = TcpListener::bind(&cfg.listen_addr)
        .await
        .with_context(|| format!("binding {}", cfg.listen_addr))?;
    tracing::info!(node_id = %identity.node_id(), build = %cfg.build_id, "node starting");
    let served = service::serve(listener, app, cancel.clone()).await;

    cancel.cancel();
    tracker.close();
    tracker.wait().await;
    served.context("node server failed")
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

async fn run_orchestrator(
    config_path: Option<PathBuf>,
    listen: Option<String>,
    trust_store: Option<PathBuf>,
) -> Result<()> {
    let mut cfg =
        OrchestratorConfig::load(config_path.as_deref()).context("loading orchestrator config")?;
    if let Some(listen) = listen {
        cfg.listen_addr = listen;
    }
    if trust_store.is_some() {
        cfg.trust_store_path = trust_store;
    }
    cfg.validate().context("invalid orchestrator config")?;

    let store: Arc<dyn NodeTrustStore> = match &cfg.trust_store_path {
        Some(path) => Arc::new(
            FileTrustStore::open(path)
                .await
                .with_context(|| format!("opening trust store {}", path.display()))?,
        ),
        None => {
            tracing::warn!("no trust store configured, records will not survive restart");
            Arc::new(MemoryTrustStore::new())
        }
    };
    let trust = Arc::new(TrustService::new(
        AttestationEvaluator::new(cfg.spoof_threshold),
        store,
    ));
    let app = service::orchestrator::router(OrchestratorState::new(trust));

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let listener = TcpListener::bind(&cfg.listen_addr)
        .await
        .with_context(|| format!("binding {}", cfg.listen_addr))?;
    service::serve(listener, app, cancel)
        .await
        .context("orchestrator server failed")
}

// ---------------------------------------------------------------------------
// Tools
// ---------------------------------------------------------------------------

fn keygen(key_dir: PathBuf, node_id: &str) -> Result<()> {
    let identity = Identity::load_or_generate(&key_dir, node_id).context("loading node keys")?;
    println!("{}", serde_json::to_string_pretty(&identity.public_keys())?);
    Ok(())
}

fn issue_token(
    job_id: &str,
    attempt_id: &str,
    deadline_ts: Option<i64>,
    ttl_secs: i64,
    key: &str,
) -> Result<()> {
    if key.is_empty() {
        anyhow::bail!("claim key must not be empty");
    }
    let deadline_ts =
        deadline_ts.unwrap_or_else(|| chrono::Utc::now().timestamp().saturating_add(ttl_secs));
    let authorizer = ClaimAuthorizer::new(key.as_bytes().to_vec());
    let ctx = ClaimContext {
        job_id: Some(job_id.to_string()),
        attempt_id: Some(attempt_id.to_string()),
        deadline_ts: Some(deadline_ts),
        claim_token: Some(authorizer.issue(job_id, attempt_id, deadline_ts)),
    };
    println!("{}", serde_json::to_string_pretty(&ctx)?);
    Ok(())
}

fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for shutdown signal");
            return;
        }
        tracing::info!("shutdown requested");
        cancel.cancel();
    });
}
