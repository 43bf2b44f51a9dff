//! Crawler configuration.
//!
//! The defaults reproduce the built-in deployment: the sixteen municipal
//! education bureaus of Shandong province and the `思政` keyword. A YAML file
//! may override any subset of fields:
//!
//! ```yaml
//! keyword: 思政
//! date_range_days: 7
//! output_dir: reports
//! retry_times: 2
//! sources:
//!   - name: 济南市教育局
//!     base_url: http://jnedu.jinan.gov.cn/
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, instrument};

/// A site to crawl.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Source {
    /// Display name used to group links in the report.
    pub name: String,
    /// Landing page that is fetched and scanned for links.
    pub base_url: String,
}

impl Source {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
        }
    }
}

/// Upper bound for [`CrawlerConfig::date_range_days`], about a century.
pub const MAX_DATE_RANGE_DAYS: i64 = 36_500;

/// Tunables and the source table for one crawl.
///
/// Every field is optional in YAML and falls back to [`Default`].
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CrawlerConfig {
    /// Substring a link's visible text must contain.
    pub keyword: String,
    /// Days before today used as the default start of the report window.
    /// Must lie in `0..=MAX_DATE_RANGE_DAYS`.
    pub date_range_days: i64,
    /// Directory the report is written to; created if missing.
    pub output_dir: PathBuf,
    /// Timeout of a single fetch attempt.
    pub request_timeout_secs: u64,
    /// Total attempts per page, including the first.
    pub retry_times: u32,
    /// Pause after each source.
    pub source_delay_secs: u64,
    /// Drop repeated URLs before writing the report.
    pub dedupe_links: bool,
    /// Also write a JSON copy of the report.
    pub write_json: bool,
    /// Sites to crawl, in order.
    pub sources: Vec<Source>,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            keyword: "思政".to_string(),
            date_range_days: 10,
            output_dir: PathBuf::from("output"),
            request_timeout_secs: 10,
            retry_times: 3,
            source_delay_secs: 2,
            dedupe_links: false,
            write_json: false,
            sources: default_sources(),
        }
    }
}

impl CrawlerConfig {
    /// Load a YAML config file; missing fields keep their defaults.
    #[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_yaml(&raw)?;
        info!(sources = config.sources.len(), keyword = %config.keyword, "Loaded configuration");
        Ok(config)
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        let config: CrawlerConfig = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants the crawler relies on.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] for a blank keyword, a `date_range_days`
    /// outside `0..=MAX_DATE_RANGE_DAYS`, zero `retry_times` or an empty
    /// source list.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.keyword.trim().is_empty() {
            return Err(ConfigError::Invalid("keyword must not be empty".into()));
        }
        if !(0..=MAX_DATE_RANGE_DAYS).contains(&self.date_range_days) {
            return Err(ConfigError::Invalid(format!(
                "date_range_days must be between 0 and {MAX_DATE_RANGE_DAYS}, got {}",
                self.date_range_days
            )));
        }
        if self.retry_times == 0 {
            return Err(ConfigError::Invalid("retry_times must be at least 1".into()));
        }
        if self.sources.is_empty() {
            return Err(ConfigError::Invalid("at least one source is required".into()));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn source_delay(&self) -> Duration {
        Duration::from_secs(self.source_delay_secs)
    }
}

/// The sixteen education-bureau home pages, in crawl order.
pub fn default_sources() -> Vec<Source> {
    [
        ("济南市教育局", "http://jnedu.jinan.gov.cn/"),
        ("青岛市教育局", "http://edu.qingdao.gov.cn/"),
        ("淄博市教育局", "http://edu.zibo.gov.cn/"),
        ("枣庄市教育局", "http://edu.zaozhuang.gov.cn/"),
        ("东营市教育局", "http://dyjy.dongying.gov.cn/"),
        ("烟台市教育局", "http://jyj.yantai.gov.cn/"),
        ("潍坊市教育局", "http://jyj.weifang.gov.cn/"),
        ("济宁市教育局", "http://jnjy.jining.gov.cn/"),
        ("泰安市教育局", "http://jyj.taian.gov.cn/"),
        ("威海市教育局", "http://jyj.weihai.gov.cn/"),
        ("日照市教育局", "http://jyj.rizhao.gov.cn/"),
        ("临沂市教育局", "http://jyj.linyi.gov.cn/"),
        ("德州市教育局", "http://dzedu.dezhou.gov.cn/"),
        ("聊城市教育局", "http://jyty.liaocheng.gov.cn/"),
        ("滨州市教育局", "http://jy.binzhou.gov.cn/"),
        ("菏泽市教育局", "http://hzjy.heze.gov.cn/"),
    ]
    .into_iter()
    .map(|(name, url)| Source::new(name, url))
    .collect()
}
