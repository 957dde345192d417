use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::middleware;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;
use uuid::Uuid;

use subcrawl_core::error::AppError;
use subcrawl_core::{RunFilter, RunStatus, Scope};

use crate::auth::require_admin_token;
use crate::dto::{
    BatchListResponse, CancelRunResponse, HealthResponse, ListRunsQuery, LogEntryResponse,
    ReanalyzeResponse, RegionStatsListResponse, RegisterSourceRequest, RunDetailResponse,
    RunListResponse, RunResponse, SourceListResponse, SourceResponse, SourcesQuery,
    StartRunRequest, StartRunResponse, StatsQuery, UrlHealthListResponse, UrlHealthQuery,
    VerificationLogQuery, VerificationLogResponse,
};
use crate::error::ApiError;
use crate::openapi::ApiDoc;
use crate::state::AppState;

const DEFAULT_RUN_LIMIT: usize = 20;
const MAX_RUN_LIMIT: usize = 100;
const DEFAULT_LOG_LIMIT: usize = 50;
const MAX_LOG_LIMIT: usize = 500;

/// Build the full router with all routes and middleware.
pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/v1/runs", post(start_run))
        .route("/v1/runs", get(list_runs))
        .route("/v1/runs/{id}", get(get_run))
        .route("/v1/runs/{id}", delete(cancel_run))
        .route("/v1/runs/{id}/batches", get(list_batches))
        .route("/v1/stats/regions", get(stats_by_region))
        .route("/v1/health/urls", get(url_health))
        .route("/v1/sources", post(register_source))
        .route("/v1/sources", get(list_sources))
        .route("/v1/sources/{id}", delete(deactivate_source))
        .route("/v1/announcements/{id}/reanalyze", post(reanalyze))
        .route("/v1/verification-log", get(verification_log))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_admin_token,
        ));

    let public = Router::new()
        .route("/health", get(health))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    public.merge(api).with_state(state)
}

// ---------------------------------------------------------------------------
// Runs
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/v1/runs",
    request_body = StartRunRequest,
    responses(
        (status = 202, description = "Run started", body = StartRunResponse),
        (status = 409, description = "A running run overlaps the scope", body = crate::dto::ErrorResponse),
        (status = 422, description = "No active source in scope", body = crate::dto::ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "runs"
)]
pub async fn start_run(
    State(state): State<Arc<AppState>>,
    axum::Json(body): axum::Json<StartRunRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let scope = Scope::regions(body.regions.unwrap_or_default());
    let run_id = state.orchestrator.start_run(scope).await?;

    Ok((StatusCode::ACCEPTED, axum::Json(StartRunResponse { run_id })))
}

#[utoipa::path(
    get,
    path = "/v1/runs",
    params(ListRunsQuery),
    responses(
        (status = 200, description = "Runs, newest first", body = RunListResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "runs"
)]
pub async fn list_runs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListRunsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let status = query
        .status
        .map(|s| s.parse::<RunStatus>().map_err(AppError::Config))
        .transpose()?;

    let filter = RunFilter {
        status,
        region: query.region,
        limit: Some(query.limit.unwrap_or(DEFAULT_RUN_LIMIT).min(MAX_RUN_LIMIT)),
    };
    let runs = state.orchestrator.list_runs(&filter).await?;
    let total = runs.len();

    let response = RunListResponse {
        runs: runs.into_iter().map(RunResponse::from).collect(),
        total,
    };

    Ok(axum::Json(response))
}

#[utoipa::path(
    get,
    path = "/v1/runs/{id}",
    params(
        ("id" = Uuid, Path, description = "Run ID")
    ),
    responses(
        (status = 200, description = "Run with batches and errored URLs", body = RunDetailResponse),
        (status = 404, description = "Not found", body = crate::dto::ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "runs"
)]
pub async fn get_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let detail = state.orchestrator.get_run(id).await?;
    Ok(axum::Json(RunDetailResponse::from(detail)))
}

#[utoipa::path(
    delete,
    path = "/v1/runs/{id}",
    params(
        ("id" = Uuid, Path, description = "Run ID")
    ),
    responses(
        (status = 202, description = "Cancellation requested", body = CancelRunResponse),
        (status = 404, description = "Not found", body = crate::dto::ErrorResponse),
        (status = 409, description = "Run already finished", body = crate::dto::ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "runs"
)]
pub async fn cancel_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state.orchestrator.cancel_run(id).await?;

    let response = CancelRunResponse {
        run_id: id,
        status: "cancelling".to_string(),
    };
    Ok((StatusCode::ACCEPTED, axum::Json(response)))
}

#[utoipa::path(
    get,
    path = "/v1/runs/{id}/batches",
    params(
        ("id" = Uuid, Path, description = "Run ID")
    ),
    responses(
        (status = 200, description = "Batches in batch-number order", body = BatchListResponse),
        (status = 404, description = "Not found", body = crate::dto::ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "runs"
)]
pub async fn list_batches(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let batches = state.orchestrator.list_batches(id).await?;
    let total = batches.len();

    let response = BatchListResponse {
        batches: batches.into_iter().map(Into::into).collect(),
        total,
    };
    Ok(axum::Json(response))
}

// ---------------------------------------------------------------------------
// Stats and URL health
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/v1/stats/regions",
    params(StatsQuery),
    responses(
        (status = 200, description = "Per-region rollups, worst success rate first", body = RegionStatsListResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "stats"
)]
pub async fn stats_by_region(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let stats = state
        .orchestrator
        .get_stats_by_region(query.region.as_deref())
        .await?;

    let response = RegionStatsListResponse {
        regions: stats.into_iter().map(Into::into).collect(),
    };
    Ok(axum::Json(response))
}

#[utoipa::path(
    get,
    path = "/v1/health/urls",
    params(UrlHealthQuery),
    responses(
        (status = 200, description = "Source health records", body = UrlHealthListResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "stats"
)]
pub async fn url_health(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UrlHealthQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let records = state
        .orchestrator
        .get_url_health(query.unhealthy_only.unwrap_or(false))
        .await?;
    let total = records.len();

    let response = UrlHealthListResponse {
        sources: records.into_iter().map(Into::into).collect(),
        total,
    };
    Ok(axum::Json(response))
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/v1/sources",
    request_body = RegisterSourceRequest,
    responses(
        (status = 201, description = "Source registered", body = SourceResponse),
        (status = 409, description = "Already registered", body = crate::dto::ErrorResponse),
        (status = 422, description = "Invalid region or URL", body = crate::dto::ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "sources"
)]
pub async fn register_source(
    State(state): State<Arc<AppState>>,
    axum::Json(body): axum::Json<RegisterSourceRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let source = state
        .orchestrator
        .register_source(&body.region_name, &body.url)
        .await?;

    Ok((StatusCode::CREATED, axum::Json(SourceResponse::from(source))))
}

#[utoipa::path(
    delete,
    path = "/v1/sources/{id}",
    params(
        ("id" = Uuid, Path, description = "Source ID")
    ),
    responses(
        (status = 200, description = "Source deactivated", body = SourceResponse),
        (status = 404, description = "Not found", body = crate::dto::ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "sources"
)]
pub async fn deactivate_source(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let source = state.orchestrator.deactivate_source(id).await?;
    Ok(axum::Json(SourceResponse::from(source)))
}

#[utoipa::path(
    get,
    path = "/v1/sources",
    params(SourcesQuery),
    responses(
        (status = 200, description = "Sources ordered by region then URL", body = SourceListResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "sources"
)]
pub async fn list_sources(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SourcesQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let scope = match query.region {
        Some(regions) => Scope::regions(regions.split(',')),
        None => Scope::All,
    };
    let sources = state
        .orchestrator
        .list_sources(&scope, query.include_inactive.unwrap_or(false))
        .await?;
    let total = sources.len();

    let response = SourceListResponse {
        sources: sources.into_iter().map(Into::into).collect(),
        total,
    };
    Ok(axum::Json(response))
}

// ---------------------------------------------------------------------------
// Announcements
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/v1/announcements/{id}/reanalyze",
    params(
        ("id" = Uuid, Path, description = "Announcement ID")
    ),
    responses(
        (status = 200, description = "Reanalysis outcome", body = ReanalyzeResponse),
        (status = 404, description = "Not found", body = crate::dto::ErrorResponse),
        (status = 429, description = "Verifier rate limited", body = crate::dto::ErrorResponse),
        (status = 504, description = "Verifier timed out", body = crate::dto::ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "announcements"
)]
pub async fn reanalyze(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state.orchestrator.reanalyze(id).await?;
    Ok(axum::Json(ReanalyzeResponse::from(outcome)))
}

#[utoipa::path(
    get,
    path = "/v1/verification-log",
    params(VerificationLogQuery),
    responses(
        (status = 200, description = "Newest log entries, oldest first", body = VerificationLogResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "announcements"
)]
pub async fn verification_log(
    State(state): State<Arc<AppState>>,
    Query(query): Query<VerificationLogQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_LOG_LIMIT).min(MAX_LOG_LIMIT);
    let entries = state
        .orchestrator
        .get_verification_log(query.announcement_id, limit)
        .await?;
    let total = entries.len();

    let response = VerificationLogResponse {
        entries: entries.into_iter().map(LogEntryResponse::from).collect(),
        total,
    };
    Ok(axum::Json(response))
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
        (status = 503, description = "Service is unhealthy", body = HealthResponse),
    ),
    tag = "system"
)]
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let db_ok = state.db.ping().await.is_ok();

    let (status, response) = if db_ok {
        (
            StatusCode::OK,
            HealthResponse {
                status: "healthy",
                database: "ok",
            },
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            HealthResponse {
                status: "unhealthy",
                database: "error",
            },
        )
    };

    (status, axum::Json(response))
}
