//! Invoice numbering, totals, status derivation and PDF rendering, with a
//! small SQLite-backed HTTP service on top.

pub mod clients;
pub mod config;
pub mod db;
pub mod error;
pub mod http;
pub mod invoices;
pub mod logging;
pub mod models;
pub mod numbering;
pub mod pdf;
pub mod settings;
pub mod status;
pub mod totals;

use std::net::SocketAddr;

use anyhow::Context;

pub use crate::config::AppConfig;
pub use crate::error::{InvoiceError, Result};

/// Opens the store and serves the HTTP API until Ctrl-C.
pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    let db = db::Db::open(&config.db_file)
        .with_context(|| format!("opening database {}", config.db_file.display()))?;
    let app = http::router(http::AppState::new(db));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "could not install Ctrl-C handler");
        std::future::pending::<()>().await;
    }
}
