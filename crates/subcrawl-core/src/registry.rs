use url::Url;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{Scope, Source};
use crate::traits::SourceStore;

/// Registered crawl sources. Registration never triggers a crawl.
#[derive(Clone)]
pub struct SourceRegistry<S> {
    store: S,
}

impl<S: SourceStore> SourceRegistry<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Register `url` under `region`.
    ///
    /// Fails with [`AppError::DuplicateSource`] if the pair is already active,
    /// and with [`AppError::Config`] for a blank region or a non-HTTP URL.
    pub async fn register(&self, region: &str, url: &str) -> Result<Source, AppError> {
        let region = region.trim();
        if region.is_empty() {
            return Err(AppError::Config("region name must not be empty".into()));
        }
        let url = validate_url(url)?;
        let source = self.store.insert_source(region, &url).await?;
        tracing::info!(
            source_id = %source.id,
            region = %source.region_name,
            url = %source.url,
            "Source registered"
        );
        Ok(source)
    }

    pub async fn deactivate(&self, source_id: Uuid) -> Result<Source, AppError> {
        let source = self.store.deactivate_source(source_id).await?;
        tracing::info!(%source_id, "Source deactivated");
        Ok(source)
    }

    /// Active sources in scope, ordered by region then URL.
    pub async fn list_active(&self, scope: &Scope) -> Result<Vec<Source>, AppError> {
        self.store.list_sources(scope, true).await
    }

    /// Every source in scope, including deactivated ones.
    pub async fn list_all(&self, scope: &Scope) -> Result<Vec<Source>, AppError> {
        self.store.list_sources(scope, false).await
    }
}

/// Parse and canonicalize a source URL. Only http and https are accepted.
pub fn validate_url(raw: &str) -> Result<String, AppError> {
    let parsed = Url::parse(raw.trim())
        .map_err(|e| AppError::Config(format!("invalid source URL '{raw}': {e}")))?;
    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(AppError::Config(format!(
                "unsupported scheme '{scheme}' in source URL '{raw}'"
            )));
        }
    }
    if parsed.host_str().is_none() {
        return Err(AppError::Config(format!("source URL '{raw}' has no host")));
    }
    Ok(parsed.to_string())
}
