//! JSON copy of a crawl report.
//!
//! Written next to the Markdown report when `write_json` is enabled, for
//! consumers that want the links without parsing Markdown.

use crate::error::CrawlError;
use crate::models::{NewsLink, RunWindow, SourceGroup, group_by_source};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::path::Path;
use tokio::fs;
use tracing::{info, instrument};

#[derive(Debug, Serialize)]
struct JsonReport<'a> {
    keyword: &'a str,
    window: &'a RunWindow,
    generated_at: DateTime<Local>,
    total: usize,
    sources: Vec<SourceGroup<'a>>,
}

/// Serialize the grouped links to `path`.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn write_report(
    path: &Path,
    keyword: &str,
    links: &[NewsLink],
    window: &RunWindow,
    generated_at: DateTime<Local>,
) -> Result<(), CrawlError> {
    let report = JsonReport {
        keyword,
        window,
        generated_at,
        total: links.len(),
        sources: group_by_source(links),
    };
    let json = serde_json::to_string_pretty(&report)?;
    fs::write(path, json).await.map_err(|source| CrawlError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    info!("Wrote JSON report");
    Ok(())
}
