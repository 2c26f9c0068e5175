//! basis-governance HTTP server binary.
//!
//! Starts an axum HTTP server exposing the decision pipeline and the audit
//! query surface.
//!
//! # Environment Variables
//!
//! - `PORT` — HTTP port (default: 8080)
//! - `BASIS_DB_DIR` — SQLite data directory (default: ./basis-data)
//! - `BASIS_BUNDLE_DIR` — optional directory of policy bundles to load at
//!   startup, one tenant subdirectory per tenant
//! - `RUST_LOG` — tracing filter (default: "info")
//!
//! See `orchestrator::config` for the full variable list.

use anyhow::Context;
use basis_governance::orchestrator::{Orchestrator, OrchestratorConfig};
use basis_governance::server::{app_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,basis_governance=debug".into()),
        )
        .init();

    let config = match OrchestratorConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    let orchestrator = match Orchestrator::new(config) {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            tracing::error!("failed to start: {e}");
            std::process::exit(1);
        }
    };

    // Optional startup bundle loading: each subdirectory of the bundle dir
    // names a tenant and holds that tenant's bundle files.
    if let Ok(bundle_dir) = std::env::var("BASIS_BUNDLE_DIR") {
        let root = std::path::PathBuf::from(&bundle_dir);
        match std::fs::read_dir(&root) {
            Ok(entries) => {
                for entry in entries.flatten() {
                    let path = entry.path();
                    if !path.is_dir() {
                        continue;
                    }
                    let tenant = entry.file_name().to_string_lossy().to_string();
                    match orchestrator.bundles().load_directory(&tenant, &path) {
                        Ok(count) => {
                            tracing::info!("loaded {count} bundle(s) for tenant {tenant}");
                        }
                        Err(e) => {
                            tracing::warn!("bundle load for tenant {tenant} failed: {e}");
                        }
                    }
                }
            }
            Err(e) => tracing::warn!("bundle dir {bundle_dir} unreadable: {e}"),
        }
    }

    let port = std::env::var("PORT").unwrap_or_else(|_| "8080".to_string());
    let bind_addr = format!("0.0.0.0:{port}");

    let state = AppState::new(orchestrator);
    let app = app_router(state);

    // Graceful shutdown on Ctrl-C.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let mut shutdown_tx = Some(shutdown_tx);
    if let Err(e) = ctrlc::set_handler(move || {
        if let Some(tx) = shutdown_tx.take() {
            let _ = tx.send(());
        }
    }) {
        tracing::warn!("could not install signal handler: {e}");
    }

    tracing::info!("basis-governance server starting on {bind_addr}");
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /health            — liveness probe");
    tracing::info!("  POST /v1/decide         — evaluate an intent");
    tracing::info!("  POST /v1/bundles/:t     — install a policy bundle");
    tracing::info!("  GET  /v1/audit/records  — query audit records");
    tracing::info!("  GET  /v1/audit/verify   — verify the audit chain");

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
            tracing::info!("shutting down");
        })
        .await
        .context("server failed")?;
    Ok(())
}
