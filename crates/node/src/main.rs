//! The Quorum policy service daemon.
//!
//! Wires the persistent store, the in-process task runner, the change-set
//! committer and telemetry together, then parks until interrupted. The
//! request layer (HTTP, identity, endpoint sync) is deployed separately and
//! drives the engine through [`quorum_engine::VotingEngine`].

use anyhow::Context;
use quorum_committer::{ChangeSetCommitter, CommitChangesHandler, RestPolicyApi};
use quorum_engine::voting::LocalRulesHandler;
use quorum_engine::{bootstrap, VotingEngine};
use quorum_store::RedbStore;
use quorum_tasks::{InProcessQueues, RetryPolicy};
use quorum_telemetry::analytics::{BufferedAnalytics, LogRowWriter};
use quorum_types::config::EngineConfig;
use quorum_types::queues::{COMMIT_CHANGES_QUEUE, LOCAL_RULES_QUEUE};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;

/// Daemon-level configuration wrapping the engine's.
#[derive(Debug, Deserialize)]
#[serde(default)]
struct NodeConfig {
    /// Path of the redb database file.
    store_path: String,
    /// Listen address of the metrics endpoint.
    metrics_addr: SocketAddr,
    engine: EngineConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            store_path: "quorum.redb".to_string(),
            metrics_addr: ([127, 0, 0, 1], 9090).into(),
            engine: EngineConfig::default(),
        }
    }
}

fn load_config() -> anyhow::Result<NodeConfig> {
    match std::env::args().nth(1) {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading config {path}"))?;
            toml::from_str(&raw).with_context(|| format!("parsing config {path}"))
        }
        None => Ok(NodeConfig::default()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    quorum_telemetry::init::init_tracing()?;
    quorum_telemetry::prometheus::install()?;

    let config = load_config()?;
    tracing::info!(store = %config.store_path, "starting quorumd");

    let store = Arc::new(RedbStore::open(&config.store_path)?);
    let tasks = InProcessQueues::new(RetryPolicy::default());
    let analytics = Arc::new(BufferedAnalytics::spawn(Box::new(LogRowWriter)));

    bootstrap::ensure_critical_rules(store.as_ref(), &config.engine.critical_rules)?;

    let api_key = std::env::var(&config.engine.committer.api_key_env).unwrap_or_else(|_| {
        tracing::warn!(
            env = %config.engine.committer.api_key_env,
            "policy API key not set; Windows commits will be rejected upstream"
        );
        String::new()
    });
    let policy_api = Arc::new(RestPolicyApi::new(
        config.engine.committer.endpoint.clone(),
        api_key,
    ));
    let committer = Arc::new(ChangeSetCommitter::new(
        store.clone(),
        Arc::new(tasks.clone()),
        policy_api,
        config.engine.committer.health.clone(),
    ));

    let engine = Arc::new(VotingEngine::new(
        store,
        Arc::new(tasks.clone()),
        analytics,
        config.engine,
    ));

    tasks
        .register(
            COMMIT_CHANGES_QUEUE,
            Arc::new(CommitChangesHandler::new(committer)),
        )
        .await;
    tasks
        .register(
            LOCAL_RULES_QUEUE,
            Arc::new(LocalRulesHandler::new(engine.clone())),
        )
        .await;

    // Serves /metrics, /healthz and /readyz until ctrl-c.
    quorum_telemetry::http::run_server(config.metrics_addr).await;
    tracing::info!("quorumd stopped");
    Ok(())
}
