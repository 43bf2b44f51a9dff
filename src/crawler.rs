//! Run orchestration: walk the sources, fetch, extract, report.
//!
//! Sources are crawled one at a time, in configuration order, with a pause
//! between them. A failing source never stops the run: its error is
//! reported as a [`CrawlEvent::SourceFailed`] and it contributes no links.
//! Cancellation is checked before every source, before every fetch attempt
//! and before every candidate container; a cancelled run writes no report.

use crate::config::{CrawlerConfig, Source};
use crate::error::{CrawlError, FetchError, SourceError};
use crate::events::{CrawlEvent, EventSink};
use crate::extract::LinkExtractor;
use crate::fetch::{HttpFetcher, PageFetch, RetryFetch};
use crate::models::{NewsLink, RunWindow};
use crate::outputs::{self, ReportOptions};
use crate::utils::panic_message;
use chrono::{Local, NaiveDate};
use futures::FutureExt;
use itertools::Itertools;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};
use url::Url;

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// All sources were visited. `report` is `None` when nothing matched.
    Completed {
        report: Option<PathBuf>,
        links: usize,
    },
    /// Stopped by the cancellation token; nothing was written.
    Cancelled,
}

/// Walks the configured sources and turns them into a report.
///
/// Generic over the page fetcher so tests can serve canned markup; the
/// fetcher is always wrapped in a [`RetryFetch`] built from the config.
#[derive(Debug)]
pub struct Crawler<F = HttpFetcher> {
    config: CrawlerConfig,
    fetcher: RetryFetch<F>,
    extractor: LinkExtractor,
    events: EventSink,
}

impl Crawler<HttpFetcher> {
    /// A crawler that fetches over HTTP.
    ///
    /// # Errors
    ///
    /// Returns [`CrawlError::Config`] if `config` fails validation and
    /// [`CrawlError::Client`] if the HTTP client cannot be built.
    pub fn new(config: CrawlerConfig, events: EventSink) -> Result<Self, CrawlError> {
        config.validate()?;
        let fetcher = HttpFetcher::new(config.request_timeout())?;
        Ok(Self::with_fetcher(config, fetcher, events))
    }
}

impl<F: PageFetch> Crawler<F> {
    /// A crawler over any [`PageFetch`] implementation.
    ///
    /// `config` is used as given; call [`CrawlerConfig::validate`] first if
    /// it did not come from [`CrawlerConfig::load`] or
    /// [`CrawlerConfig::from_yaml`].
    pub fn with_fetcher(config: CrawlerConfig, fetcher: F, events: EventSink) -> Self {
        let fetcher = RetryFetch::new(fetcher, config.retry_times, events.clone());
        let extractor = LinkExtractor::new(config.keyword.clone());
        Self {
            config,
            fetcher,
            extractor,
            events,
        }
    }

    /// Replace the extractor, e.g. to install a custom policy table.
    pub fn with_extractor(mut self, extractor: LinkExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    /// Crawl every source and write the report for the given window.
    /// Missing dates default relative to today.
    pub async fn run(
        &self,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, CrawlError> {
        let window = RunWindow::resolve(
            start_date,
            end_date,
            Local::now().date_naive(),
            self.config.date_range_days,
        );
        self.run_window(window, cancel).await
    }

    /// Crawl every source and label the report with `window`.
    ///
    /// # Returns
    ///
    /// - `Completed { report: Some(path), .. }` when links were found
    /// - `Completed { report: None, .. }` when nothing matched
    /// - `Cancelled` when `cancel` fired; no report is written
    ///
    /// # Errors
    ///
    /// Only a failure to write the report; source failures are events.
    #[instrument(level = "info", skip_all, fields(%window))]
    pub async fn run_window(
        &self,
        window: RunWindow,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, CrawlError> {
        let sources = &self.config.sources;
        let total = sources.len();
        self.events.emit(CrawlEvent::RunStarted {
            window,
            sources: total,
        });

        let mut links: Vec<NewsLink> = Vec::new();
        for (i, source) in sources.iter().enumerate() {
            if cancel.is_cancelled() {
                self.events.emit(CrawlEvent::Cancelled);
                return Ok(RunOutcome::Cancelled);
            }
            self.events.emit(CrawlEvent::SourceStarted {
                index: i + 1,
                total,
                name: source.name.clone(),
                url: source.base_url.clone(),
            });

            let result = AssertUnwindSafe(self.crawl_source(source, cancel))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(SourceError::Panicked(panic_message(panic.as_ref()))));

            match result {
                Ok(found) => {
                    for link in &found {
                        self.events.emit(CrawlEvent::LinkFound {
                            source: link.source.clone(),
                            title: link.title.clone(),
                        });
                    }
                    self.events.emit(CrawlEvent::SourceFinished {
                        name: source.name.clone(),
                        links: found.len(),
                    });
                    links.extend(found);
                }
                // Reported once by the check at the top of the loop.
                Err(SourceError::Fetch(FetchError::Cancelled)) => continue,
                Err(e) => self.events.emit(CrawlEvent::SourceFailed {
                    name: source.name.clone(),
                    reason: e.to_string(),
                }),
            }

            if i + 1 < total {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.source_delay()) => {}
                    _ = cancel.cancelled() => {}
                }
            }
        }

        if cancel.is_cancelled() {
            self.events.emit(CrawlEvent::Cancelled);
            return Ok(RunOutcome::Cancelled);
        }

        if self.config.dedupe_links {
            let before = links.len();
            links = links.into_iter().unique_by(|l| l.url.clone()).collect();
            info!(before, after = links.len(), "Removed duplicate links");
        }

        let options = ReportOptions {
            output_dir: &self.config.output_dir,
            keyword: &self.config.keyword,
            write_json: self.config.write_json,
        };
        let report = outputs::write_report(&options, &links, &window).await?;
        match &report {
            Some(path) => self.events.emit(CrawlEvent::ReportWritten {
                path: path.clone(),
                links: links.len(),
            }),
            None => self.events.emit(CrawlEvent::NoResults),
        }
        self.events.emit(CrawlEvent::RunFinished { links: links.len() });

        Ok(RunOutcome::Completed {
            report,
            links: links.len(),
        })
    }

    /// Fetch one source and extract its matching links.
    #[instrument(level = "info", skip_all, fields(source = %source.name))]
    pub async fn crawl_source(
        &self,
        source: &Source,
        cancel: &CancellationToken,
    ) -> Result<Vec<NewsLink>, SourceError> {
        let base_url =
            Url::parse(&source.base_url).map_err(|e| SourceError::InvalidBaseUrl {
                url: source.base_url.clone(),
                source: e,
            })?;
        let markup = self.fetcher.fetch(&base_url, cancel).await?;
        Ok(self
            .extractor
            .extract(&markup, &source.name, &base_url, cancel))
    }
}
