use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Subcrawl API",
        version = "0.1.0",
        description = "Crawl runs, source health and verified subsidy announcements."
    ),
    paths(
        crate::routes::start_run,
        crate::routes::list_runs,
        crate::routes::get_run,
        crate::routes::cancel_run,
        crate::routes::list_batches,
        crate::routes::stats_by_region,
        crate::routes::url_health,
        crate::routes::register_source,
        crate::routes::deactivate_source,
        crate::routes::list_sources,
        crate::routes::reanalyze,
        crate::routes::verification_log,
        crate::routes::health,
    ),
    components(schemas(
        crate::dto::StartRunRequest,
        crate::dto::StartRunResponse,
        crate::dto::CancelRunResponse,
        crate::dto::TotalsResponse,
        crate::dto::RunResponse,
        crate::dto::RunListResponse,
        crate::dto::BatchResponse,
        crate::dto::BatchListResponse,
        crate::dto::UrlErrorResponse,
        crate::dto::RunDetailResponse,
        crate::dto::SourceHealthResponse,
        crate::dto::UrlHealthListResponse,
        crate::dto::RegionStatsResponse,
        crate::dto::RegionStatsListResponse,
        crate::dto::RegisterSourceRequest,
        crate::dto::SourceResponse,
        crate::dto::SourceListResponse,
        crate::dto::AnnouncementResponse,
        crate::dto::ReanalyzeResponse,
        crate::dto::LogEntryResponse,
        crate::dto::VerificationLogResponse,
        crate::dto::HealthResponse,
        crate::dto::ErrorResponse,
    )),
    tags(
        (name = "runs", description = "Crawl run orchestration"),
        (name = "sources", description = "Source registry"),
        (name = "stats", description = "Region statistics and URL health"),
        (name = "announcements", description = "Reanalysis and verification log"),
        (name = "system", description = "Health and system status"),
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

/// Adds Bearer token security scheme to the OpenAPI spec.
struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                utoipa::openapi::security::SecurityScheme::Http(
                    utoipa::openapi::security::HttpBuilder::new()
                        .scheme(utoipa::openapi::security::HttpAuthScheme::Bearer)
                        .bearer_format("token")
                        .description(Some(
                            "Admin token. Set via SUBCRAWL_ADMIN_TOKEN environment variable.",
                        ))
                        .build(),
                ),
            );
        }
    }
}
