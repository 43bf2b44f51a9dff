//! Command-line interface definitions.
//!
//! Both dates are optional positionals in `YYYY-MM-DD` form; everything else
//! overrides a field of the loaded configuration.

use crate::config::CrawlerConfig;
use chrono::NaiveDate;
use clap::Parser;
use std::path::PathBuf;

/// Crawl education-bureau sites for keyword news links and write a report.
///
/// # Examples
///
/// ```sh
/// # Default window: the last 10 days
/// edu_news_crawler
///
/// # Explicit window, custom output directory
/// edu_news_crawler 2025-05-01 2025-05-11 -o reports
///
/// # Sources and tunables from a file
/// edu_news_crawler --config crawler.yaml --json
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// First day of the report window (YYYY-MM-DD)
    pub start_date: Option<NaiveDate>,

    /// Last day of the report window (YYYY-MM-DD)
    pub end_date: Option<NaiveDate>,

    /// YAML file with sources and tunables
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Directory for the report
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Keyword link titles must contain
    #[arg(short, long)]
    pub keyword: Option<String>,

    /// Also write a JSON copy of the report
    #[arg(long)]
    pub json: bool,

    /// Log file, truncated at startup
    #[arg(long, default_value = "crawler.log")]
    pub log_file: PathBuf,
}

impl Cli {
    /// Apply command-line overrides on top of `config`.
    pub fn apply(&self, config: &mut CrawlerConfig) {
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }
        if let Some(keyword) = &self.keyword {
            config.keyword = keyword.clone();
        }
        if self.json {
            config.write_json = true;
        }
    }
}
