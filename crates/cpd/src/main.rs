//! cpd — computing provider daemon.

use std::sync::Arc;

use anyhow::{Context, Result};

use cp_core::config::ProviderConfig;
use cp_services::{
    CommandRuntime, ExecutionEngine, HttpSettlementClient, Ledger, Orchestrator, Reconciler,
    SubmissionGateway,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = ProviderConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = ProviderConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        ProviderConfig::default()
    });
    tracing::info!(
        db = %config.ledger.db_path.display(),
        rpc_url = %config.settlement.rpc_url,
        node_id = %config.settlement.node_id,
        "cpd starting"
    );

    // ── Components ───────────────────────────────────────────────────────────

    if let Some(parent) = config.ledger.db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let ledger = Ledger::open(&config.ledger.db_path)
        .with_context(|| format!("failed to open ledger at {}", config.ledger.db_path.display()))?;

    let runtime = Arc::new(CommandRuntime::new(&config.execution));
    let engine = ExecutionEngine::new(runtime, &config.execution);

    let chain = Arc::new(
        HttpSettlementClient::new(&config.settlement).context("failed to build settlement client")?,
    );
    let gateway = SubmissionGateway::new(chain, &config.settlement);

    let orchestrator = Orchestrator::new(ledger, engine, gateway);

    match orchestrator.sync_account().await {
        Ok(account) => tracing::info!(
            node_id = %account.node_id,
            owner = %account.owner_address,
            balance = %account.balance,
            "provider account synced"
        ),
        Err(e) => tracing::warn!(error = %e, "initial account sync failed, continuing"),
    }

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    let reconciler_task = tokio::spawn(
        Reconciler::new(
            orchestrator.clone(),
            &config.reconcile,
            shutdown_tx.subscribe(),
        )
        .run(),
    );

    let api_task = {
        let state = cp_api::ApiState { orchestrator };
        let port = config.api.port;
        let shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move { cp_api::serve(state, port, shutdown).await })
    };

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();

    tokio::select! {
        _ = shutdown_rx.recv()  => tracing::info!("shutting down"),
        r = reconciler_task     => tracing::error!("reconciler exited: {:?}", r),
        r = api_task            => tracing::error!("API server exited: {:?}", r),
    }

    Ok(())
}
