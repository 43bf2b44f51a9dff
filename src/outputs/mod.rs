//! Report output.
//!
//! - [`markdown`]: the human-readable report, grouped by source
//! - [`json`]: an optional machine-readable copy of the same report
//!
//! # Output Structure
//!
//! ```text
//! output_dir/
//! ├── 思政新闻_2025-05-01_2025-05-11.md
//! └── 思政新闻_2025-05-01_2025-05-11.json   # only with `write_json`
//! ```
//!
//! The file name depends only on the keyword and the run window, so running
//! the same window again replaces the previous report.

pub mod json;
pub mod markdown;

use crate::error::CrawlError;
use crate::models::{NewsLink, RunWindow};
use crate::utils::{ensure_writable_dir, sanitize_file_component};
use chrono::Local;
use std::path::{Path, PathBuf};
use tracing::{info, instrument, warn};

/// Timestamp format used throughout the reports.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// `<dir>/<keyword>新闻_<start>_<end>.<ext>`
pub fn report_path(dir: &Path, keyword: &str, window: &RunWindow, ext: &str) -> PathBuf {
    dir.join(format!(
        "{}新闻_{}_{}.{}",
        sanitize_file_component(keyword),
        window.start_date,
        window.end_date,
        ext
    ))
}

/// Settings that shape a written report.
#[derive(Debug, Clone)]
pub struct ReportOptions<'a> {
    pub output_dir: &'a Path,
    pub keyword: &'a str,
    pub write_json: bool,
}

/// Write the report for `links`.
///
/// Returns `Ok(None)` without touching the filesystem when there is nothing
/// to report.
#[instrument(level = "info", skip_all, fields(output_dir = %options.output_dir.display(), links = links.len()))]
pub async fn write_report(
    options: &ReportOptions<'_>,
    links: &[NewsLink],
    window: &RunWindow,
) -> Result<Option<PathBuf>, CrawlError> {
    if links.is_empty() {
        warn!("No matching links; skipping report");
        return Ok(None);
    }

    ensure_writable_dir(options.output_dir).await?;
    let generated_at = Local::now();

    let md = markdown::render(options.keyword, links, window, generated_at);
    let path = report_path(options.output_dir, options.keyword, window, "md");
    info!(path = %path.display(), "Writing Markdown report");
    tokio::fs::write(&path, md)
        .await
        .map_err(|source| CrawlError::Io {
            path: path.clone(),
            source,
        })?;

    if options.write_json {
        let json_path = report_path(options.output_dir, options.keyword, window, "json");
        json::write_report(&json_path, options.keyword, links, window, generated_at).await?;
    }

    info!(path = %path.display(), "Wrote report");
    Ok(Some(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};
    use url::Url;

    fn window() -> RunWindow {
        RunWindow::new(
            NaiveDate::from_ymd_opt(2025, 5, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 5, 11).unwrap(),
        )
    }

    fn links() -> Vec<NewsLink> {
        vec![NewsLink {
            source: "济南市教育局".to_string(),
            title: "思政工作简报".to_string(),
            url: Url::parse("http://jnedu.jinan.gov.cn/a.html").unwrap(),
            discovered_at: Local.with_ymd_and_hms(2025, 5, 11, 9, 0, 0).unwrap(),
        }]
    }

    #[test]
    fn test_report_path() {
        let path = report_path(Path::new("output"), "思政", &window(), "md");
        assert_eq!(path, PathBuf::from("output/思政新闻_2025-05-01_2025-05-11.md"));
    }

    #[tokio::test]
    async fn test_empty_links_write_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("out");
        let options = ReportOptions {
            output_dir: &dir,
            keyword: "思政",
            write_json: true,
        };
        assert!(write_report(&options, &[], &window()).await.unwrap().is_none());
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_rewrite_is_deterministic_except_generation_time() {
        let tmp = tempfile::tempdir().unwrap();
        let options = ReportOptions {
            output_dir: tmp.path(),
            keyword: "思政",
            write_json: false,
        };
        let strip = |text: String| {
            text.lines()
                .filter(|l| !l.starts_with("- 爬取时间:"))
                .map(str::to_owned)
                .collect::<Vec<_>>()
        };

        let path = write_report(&options, &links(), &window()).await.unwrap().unwrap();
        let first = std::fs::read_to_string(&path).unwrap();
        let again = write_report(&options, &links(), &window()).await.unwrap().unwrap();
        let second = std::fs::read_to_string(&again).unwrap();

        assert_eq!(path, again);
        assert_eq!(strip(first), strip(second));
    }

    #[tokio::test]
    async fn test_json_sidecar() {
        let tmp = tempfile::tempdir().unwrap();
        let options = ReportOptions {
            output_dir: tmp.path(),
            keyword: "思政",
            write_json: true,
        };
        write_report(&options, &links(), &window()).await.unwrap();
        let json_path = report_path(tmp.path(), "思政", &window(), "json");
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(json_path).unwrap()).unwrap();
        assert_eq!(value["total"], 1);
        assert_eq!(value["sources"][0]["source"], "济南市教育局");
    }

    #[tokio::test]
    async fn test_unwritable_output_dir_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("taken");
        std::fs::write(&blocker, b"x").unwrap();
        let options = ReportOptions {
            output_dir: &blocker,
            keyword: "思政",
            write_json: false,
        };
        let err = write_report(&options, &links(), &window()).await.unwrap_err();
        assert!(matches!(err, CrawlError::Io { .. }));
    }
}
