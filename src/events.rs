//! Structured progress events.
//!
//! The crawler reports progress through [`CrawlEvent`]s instead of writing
//! to a shared log. A front end (the CLI, or any other shell driving the
//! crawler from another thread) subscribes with an unbounded channel; every
//! event is also written to `tracing` so the log file stays complete when
//! nobody subscribes.

use crate::error::FetchErrorKind;
use crate::models::RunWindow;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::{error, info, warn};

/// `tracing` target every emitted event is logged under.
pub const EVENTS_TARGET: &str = "edu_news_crawler::events";

#[derive(Debug, Clone, PartialEq)]
pub enum CrawlEvent {
    RunStarted {
        window: RunWindow,
        sources: usize,
    },
    SourceStarted {
        index: usize,
        total: usize,
        name: String,
        url: String,
    },
    FetchAttempt {
        url: String,
        attempt: u32,
        max_attempts: u32,
    },
    FetchFailed {
        url: String,
        attempt: u32,
        kind: FetchErrorKind,
        message: String,
    },
    BackingOff {
        url: String,
        wait: Duration,
    },
    Fetched {
        url: String,
        bytes: usize,
    },
    LinkFound {
        source: String,
        title: String,
    },
    SourceFinished {
        name: String,
        links: usize,
    },
    SourceFailed {
        name: String,
        reason: String,
    },
    Cancelled,
    NoResults,
    ReportWritten {
        path: PathBuf,
        links: usize,
    },
    RunFinished {
        links: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventLevel {
    Info,
    Warning,
    Error,
}

impl CrawlEvent {
    pub fn level(&self) -> EventLevel {
        match self {
            CrawlEvent::FetchFailed { .. } => EventLevel::Error,
            CrawlEvent::SourceFailed { .. } | CrawlEvent::NoResults | CrawlEvent::Cancelled => {
                EventLevel::Warning
            }
            _ => EventLevel::Info,
        }
    }
}

impl std::fmt::Display for CrawlEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CrawlEvent::RunStarted { window, sources } => {
                write!(f, "Crawling {sources} sources for {window}")
            }
            CrawlEvent::SourceStarted {
                index,
                total,
                name,
                url,
            } => write!(f, "[{index}/{total}] Crawling {name} ({url})"),
            CrawlEvent::FetchAttempt {
                url,
                attempt,
                max_attempts,
            } => write!(f, "Requesting {url} (attempt {attempt}/{max_attempts})"),
            CrawlEvent::FetchFailed {
                url,
                attempt,
                kind,
                message,
            } => write!(f, "Attempt {attempt} for {url} failed ({kind}): {message}"),
            CrawlEvent::BackingOff { url, wait } => {
                write!(f, "Waiting {}s before retrying {url}", wait.as_secs())
            }
            CrawlEvent::Fetched { url, bytes } => write!(f, "Fetched {url} ({bytes} bytes)"),
            CrawlEvent::LinkFound { source, title } => write!(f, "Found in {source}: {title}"),
            CrawlEvent::SourceFinished { name, links } => {
                write!(f, "Found {links} matching links in {name}")
            }
            CrawlEvent::SourceFailed { name, reason } => {
                write!(f, "No results from {name}: {reason}")
            }
            CrawlEvent::Cancelled => f.write_str("Crawl cancelled; no report written"),
            CrawlEvent::NoResults => f.write_str("No matching links found; no report written"),
            CrawlEvent::ReportWritten { path, links } => {
                write!(f, "Wrote {links} links to {}", path.display())
            }
            CrawlEvent::RunFinished { links } => write!(f, "Crawl finished with {links} links"),
        }
    }
}

/// Fan-out point for [`CrawlEvent`]s. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<UnboundedSender<CrawlEvent>>,
}

impl EventSink {
    /// A sink that only logs.
    pub fn silent() -> Self {
        Self { tx: None }
    }

    /// A sink plus the receiving end for a front end to drain.
    pub fn channel() -> (Self, UnboundedReceiver<CrawlEvent>) {
        let (tx, rx) = unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn emit(&self, event: CrawlEvent) {
        match event.level() {
            EventLevel::Info => info!(target: EVENTS_TARGET, "{event}"),
            EventLevel::Warning => warn!(target: EVENTS_TARGET, "{event}"),
            EventLevel::Error => error!(target: EVENTS_TARGET, "{event}"),
        }
        if let Some(tx) = &self.tx {
            // Receiver gone means the front end stopped listening; logging continues.
            let _ = tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels() {
        assert_eq!(CrawlEvent::Cancelled.level(), EventLevel::Warning);
        assert_eq!(
            CrawlEvent::SourceFailed {
                name: "x".into(),
                reason: "y".into()
            }
            .level(),
            EventLevel::Warning
        );
        assert_eq!(CrawlEvent::RunFinished { links: 0 }.level(), EventLevel::Info);
    }

    #[test]
    fn test_channel_delivers_in_order() {
        let (sink, mut rx) = EventSink::channel();
        sink.emit(CrawlEvent::NoResults);
        sink.emit(CrawlEvent::RunFinished { links: 0 });
        assert_eq!(rx.try_recv().unwrap(), CrawlEvent::NoResults);
        assert_eq!(rx.try_recv().unwrap(), CrawlEvent::RunFinished { links: 0 });
    }

    #[test]
    fn test_emit_after_receiver_dropped() {
        let (sink, rx) = EventSink::channel();
        drop(rx);
        sink.emit(CrawlEvent::Cancelled);
    }

    #[test]
    fn test_display() {
        let event = CrawlEvent::BackingOff {
            url: "http://edu.zibo.gov.cn/".into(),
            wait: Duration::from_secs(4),
        };
        assert_eq!(
            event.to_string(),
            "Waiting 4s before retrying http://edu.zibo.gov.cn/"
        );
    }
}
