use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use subcrawl_client::{HtmlExtractor, OpenAiVerifier, ReqwestFetcher};
use subcrawl_core::{Orchestrator, PipelineConfig, TracingRunReporter};
use subcrawl_db::{Database, DatabaseConfig};
use subcrawl_server::routes;
use subcrawl_server::state::AppState;

const MAX_BODY_BYTES: usize = 64 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("subcrawl=info".parse()?))
        .with_target(false)
        .init();

    let admin_token = std::env::var("SUBCRAWL_ADMIN_TOKEN")
        .ok()
        .filter(|t| !t.is_empty());
    if admin_token.is_none() {
        tracing::warn!("SUBCRAWL_ADMIN_TOKEN not set, /v1 endpoints will answer 403");
    }
    let port = std::env::var("SUBCRAWL_SERVER_PORT").unwrap_or_else(|_| "3000".to_string());
    let addr = format!("0.0.0.0:{port}");

    let db = Database::connect(&DatabaseConfig::from_env()?).await?;
    db.migrate().await?;

    let api_key =
        std::env::var("SUBCRAWL_AI_API_KEY").context("SUBCRAWL_AI_API_KEY must be set")?;
    let model = std::env::var("SUBCRAWL_AI_MODEL")
        .unwrap_or_else(|_| OpenAiVerifier::default_model().to_string());
    let base_url = std::env::var("SUBCRAWL_AI_BASE_URL")
        .unwrap_or_else(|_| OpenAiVerifier::default_base_url().to_string());

    let fetcher = ReqwestFetcher::with_timeout(env_secs("SUBCRAWL_FETCH_TIMEOUT_SECS", 30)?)?;
    let extractor = HtmlExtractor::new()?;
    let verifier = OpenAiVerifier::with_base_url(&api_key, &model, &base_url)?
        .with_timeout(env_secs("SUBCRAWL_AI_TIMEOUT_SECS", 60)?)?;

    let orchestrator = Orchestrator::new(
        fetcher,
        extractor,
        verifier,
        db.clone(),
        PipelineConfig::from_env()?,
        Arc::new(TracingRunReporter),
    );

    let recovered = orchestrator.recover_interrupted_runs().await?;
    if !recovered.is_empty() {
        tracing::warn!(count = recovered.len(), "Recovered interrupted runs");
    }

    let state = Arc::new(AppState {
        orchestrator: orchestrator.clone(),
        db,
        admin_token,
    });

    let app = routes::router(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    tracing::info!(%model, "Starting server on {addr}");
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Cancelling active runs");
    orchestrator.shutdown().await;

    Ok(())
}

fn env_secs(name: &str, default: u64) -> anyhow::Result<Duration> {
    let secs = match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .with_context(|| format!("Invalid {name} '{raw}'"))?,
        Err(_) => default,
    };
    Ok(Duration::from_secs(secs))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for CTRL+C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
