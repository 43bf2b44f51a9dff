//! Command-line entry point for `edu_news_crawler`.
//!
//! ```sh
//! edu_news_crawler 2025-05-01 2025-05-11 -o output
//! ```
//!
//! Progress events are printed to stdout as they happen. Diagnostics go to
//! stderr and, in full, to the log file.

use chrono::Local;
use clap::Parser;
use edu_news_crawler::cli::Cli;
use edu_news_crawler::events::{CrawlEvent, EVENTS_TARGET, EventLevel};
use edu_news_crawler::{Crawler, CrawlerConfig, EventSink, RunOutcome};
use std::error::Error;
use std::fs::File;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::filter_fn;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Console layer on stderr (minus events, which the renderer prints) plus
/// a plain-text file layer. The guard must outlive the run.
fn init_tracing(cli: &Cli) -> Result<WorkerGuard, Box<dyn Error>> {
    let file = File::create(&cli.log_file)?;
    let (writer, guard) = tracing_appender::non_blocking(file);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_filter(filter_fn(|meta| meta.target() != EVENTS_TARGET));
    let file_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339());

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();
    Ok(guard)
}

/// Print events until every sender is dropped.
async fn render_events(mut rx: UnboundedReceiver<CrawlEvent>) {
    while let Some(event) = rx.recv().await {
        let level = match event.level() {
            EventLevel::Info => "INFO",
            EventLevel::Warning => "WARN",
            EventLevel::Error => "ERROR",
        };
        println!(
            "{} - {level} - {event}",
            Local::now().format("%Y-%m-%d %H:%M:%S")
        );
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Cli::parse();
    let _guard = init_tracing(&args)?;
    info!(log_file = %args.log_file.display(), "edu_news_crawler starting up");

    let mut config = match &args.config {
        Some(path) => CrawlerConfig::load(path)?,
        None => CrawlerConfig::default(),
    };
    args.apply(&mut config);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, stopping after the current step");
                cancel.cancel();
            }
        });
    }

    let (events, rx) = EventSink::channel();
    let renderer = tokio::spawn(render_events(rx));

    let crawler = Crawler::new(config, events)?;
    let outcome = crawler.run(args.start_date, args.end_date, &cancel).await;
    // Drops the last senders so the renderer drains and exits.
    drop(crawler);
    if let Err(e) = renderer.await {
        warn!(error = %e, "Event renderer stopped abnormally");
    }

    match outcome? {
        RunOutcome::Completed {
            report: Some(path),
            links,
        } => info!(links, report = %path.display(), "Done"),
        RunOutcome::Completed { report: None, .. } => info!("Done, no matching links"),
        RunOutcome::Cancelled => warn!("Crawl cancelled by user"),
    }
    Ok(())
}
