use subcrawl_client::{HtmlExtractor, OpenAiVerifier, ReqwestFetcher};
use subcrawl_core::Orchestrator;
use subcrawl_db::Database;

/// The crawl pipeline as wired up by the server.
pub type Pipeline = Orchestrator<ReqwestFetcher, HtmlExtractor, OpenAiVerifier, Database>;

/// Shared application state, available to all route handlers via `State<Arc<AppState>>`.
pub struct AppState {
    pub orchestrator: Pipeline,
    pub db: Database,
    /// Bearer token for the `/v1` endpoints (None = `/v1` disabled).
    pub admin_token: Option<String>,
}
