//! # edu_news_crawler
//!
//! Crawls the home pages of municipal education-bureau sites, keeps the
//! links whose visible title contains a keyword, and writes a dated Markdown
//! report grouped by site.
//!
//! ## Pipeline
//!
//! 1. **Fetch** each configured source with browser-like headers, retrying
//!    with linear backoff ([`fetch`])
//! 2. **Extract** keyword links from candidate containers chosen per host
//!    ([`extract`])
//! 3. **Accumulate** results source by source, isolating failures
//!    ([`crawler`])
//! 4. **Report** the links grouped by source ([`outputs`])
//!
//! Progress is published as [`events::CrawlEvent`]s and logged with
//! `tracing`. Runs stop cooperatively through a
//! [`tokio_util::sync::CancellationToken`].
//!
//! ## Usage
//!
//! ```no_run
//! # async fn demo() -> Result<(), edu_news_crawler::error::CrawlError> {
//! use edu_news_crawler::{CrawlerConfig, EventSink};
//! use tokio_util::sync::CancellationToken;
//!
//! let outcome = edu_news_crawler::run(
//!     CrawlerConfig::default(),
//!     None,
//!     None,
//!     &CancellationToken::new(),
//!     EventSink::silent(),
//! )
//! .await?;
//! println!("{outcome:?}");
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod crawler;
pub mod error;
pub mod events;
pub mod extract;
pub mod fetch;
pub mod models;
pub mod outputs;
pub mod utils;

pub use config::{CrawlerConfig, Source};
pub use crawler::{Crawler, RunOutcome};
pub use error::CrawlError;
pub use events::{CrawlEvent, EventSink};
pub use models::{NewsLink, RunWindow};

use chrono::NaiveDate;
use tokio_util::sync::CancellationToken;

/// Crawl all configured sources over HTTP and write the report.
///
/// Missing dates default to `today - date_range_days` and `today`. They
/// only label the report; every source is crawled regardless.
pub async fn run(
    config: CrawlerConfig,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    cancel: &CancellationToken,
    events: EventSink,
) -> Result<RunOutcome, CrawlError> {
    let crawler = Crawler::new(config, events)?;
    crawler.run(start_date, end_date, cancel).await
}
