//! Bulk source registration from a CSV file with a `region_name,url` header.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use subcrawl_core::AppError;
use subcrawl_core::Source;
use subcrawl_core::registry::SourceRegistry;
use subcrawl_core::traits::SourceStore;

#[derive(Debug, Deserialize)]
struct SourceRow {
    region_name: String,
    url: String,
}

/// One row that was not registered. `line` is the 1-based line in the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedRow {
    pub line: usize,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct ImportReport {
    pub registered: Vec<Source>,
    pub duplicates: Vec<RejectedRow>,
    pub invalid: Vec<RejectedRow>,
}

/// Register every row of `path`. Duplicates and invalid rows are collected
/// in the report; storage failures abort the import.
pub async fn import_sources<S: SourceStore>(
    registry: &SourceRegistry<S>,
    path: &Path,
) -> Result<ImportReport> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    let mut report = ImportReport::default();
    for (index, row) in reader.deserialize::<SourceRow>().enumerate() {
        // The header is line 1.
        let line = index + 2;
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                report.invalid.push(RejectedRow {
                    line,
                    reason: e.to_string(),
                });
                continue;
            }
        };

        match registry.register(&row.region_name, &row.url).await {
            Ok(source) => report.registered.push(source),
            Err(e @ AppError::DuplicateSource { .. }) => report.duplicates.push(RejectedRow {
                line,
                reason: e.to_string(),
            }),
            Err(AppError::Config(reason)) => report.invalid.push(RejectedRow { line, reason }),
            Err(e) => return Err(e).with_context(|| format!("Import stopped at line {line}")),
        }
    }

    Ok(report)
}
