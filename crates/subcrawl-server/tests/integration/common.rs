use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use testcontainers::core::{ContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};

use subcrawl_client::{HtmlExtractor, OpenAiVerifier, ReqwestFetcher};
use subcrawl_core::{Orchestrator, PipelineConfig, RetryPolicy, TracingRunReporter};
use subcrawl_db::Database;
use subcrawl_server::routes;
use subcrawl_server::state::AppState;

pub const TEST_ADMIN_TOKEN: &str = "test-admin-token";

/// Router plus the container backing it; dropping it stops PostgreSQL.
pub struct TestApp {
    pub router: Router,
    _container: ContainerAsync<GenericImage>,
}

/// Spin up a PostgreSQL container and return an app that requires
/// [`TEST_ADMIN_TOKEN`].
pub async fn setup_test_app() -> TestApp {
    build_app(Some(TEST_ADMIN_TOKEN.to_string())).await
}

/// Same as [`setup_test_app`] but without an admin token configured.
pub async fn setup_test_app_no_auth() -> TestApp {
    build_app(None).await
}

async fn build_app(admin_token: Option<String>) -> TestApp {
    let container = GenericImage::new("postgres", "16")
        .with_exposed_port(ContainerPort::Tcp(5432))
        .with_wait_for(WaitFor::message_on_stderr(
            "database system is ready to accept connections",
        ))
        .with_env_var("POSTGRES_PASSWORD", "postgres")
        .with_env_var("POSTGRES_DB", "subcrawl_test")
        .start()
        .await
        .expect("Failed to start PostgreSQL container");

    let host = container.get_host().await.expect("Failed to get host");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("Failed to get port");

    let url = format!("postgresql://postgres:postgres@{host}:{port}/subcrawl_test");

    let db = Database::from_pool(retry_connect(&url).await);
    db.migrate().await.expect("Failed to run migrations");

    // SSRF protection stays on, so loopback sources fail fast without traffic.
    let fetcher = ReqwestFetcher::with_timeout(Duration::from_secs(2)).expect("fetcher");
    let extractor = HtmlExtractor::new().expect("extractor");
    let verifier =
        OpenAiVerifier::with_base_url("test-key", "gpt-4o-mini", "http://127.0.0.1:9/v1")
            .expect("verifier");

    let config = PipelineConfig {
        politeness_interval: Duration::from_millis(10),
        fetch_retry: RetryPolicy::immediate(3),
        verify_retry: RetryPolicy::immediate(1),
        persist_retry: RetryPolicy::immediate(2),
        ..PipelineConfig::default()
    };

    let orchestrator = Orchestrator::new(
        fetcher,
        extractor,
        verifier,
        db.clone(),
        config,
        Arc::new(TracingRunReporter),
    );

    let state = Arc::new(AppState {
        orchestrator,
        db,
        admin_token,
    });

    TestApp {
        router: routes::router(state),
        _container: container,
    }
}

async fn retry_connect(url: &str) -> PgPool {
    for _ in 0..30 {
        if let Ok(pool) = PgPoolOptions::new().max_connections(5).connect(url).await {
            return pool;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("Failed to connect to test database");
}
