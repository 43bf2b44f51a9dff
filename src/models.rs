//! Data models shared by the extractor, crawler and report writers.
//!
//! - [`NewsLink`]: one keyword-matching anchor found on a source page
//! - [`RunWindow`]: the date range a run is labelled with
//! - [`SourceGroup`]: links of a single source, in report order

use chrono::{DateTime, Local, NaiveDate, TimeDelta};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use url::Url;

/// A news link whose visible title contains the configured keyword.
///
/// The URL is always absolute, has a host and carries no fragment.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct NewsLink {
    /// Display name of the source the link was found on.
    pub source: String,
    /// Trimmed anchor text.
    pub title: String,
    pub url: Url,
    /// Wall-clock time at which the extractor accepted the anchor.
    pub discovered_at: DateTime<Local>,
}

/// The labelling date range of a run.
///
/// The window never filters which links are collected; it only names the
/// report file and appears in its title.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct RunWindow {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl RunWindow {
    pub fn new(start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            start_date,
            end_date,
        }
    }

    /// Fill in missing bounds: `end` defaults to `today`, `start` to
    /// `today - range_days`.
    ///
    /// A negative range counts as zero. A range that would leave the
    /// calendar starts the window on the earliest representable date.
    pub fn resolve(
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
        today: NaiveDate,
        range_days: i64,
    ) -> Self {
        let default_start = || {
            TimeDelta::try_days(range_days.max(0))
                .and_then(|back| today.checked_sub_signed(back))
                .unwrap_or(NaiveDate::MIN)
        };
        Self {
            start_date: start_date.unwrap_or_else(default_start),
            end_date: end_date.unwrap_or(today),
        }
    }
}

impl std::fmt::Display for RunWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} 至 {}", self.start_date, self.end_date)
    }
}

/// All links of one source, as they appear in a report section.
#[derive(Debug, Serialize)]
pub struct SourceGroup<'a> {
    pub source: &'a str,
    pub links: Vec<&'a NewsLink>,
}

/// Group links by source, keeping sources in first-seen order and links in
/// their original order.
pub fn group_by_source(links: &[NewsLink]) -> Vec<SourceGroup<'_>> {
    links
        .iter()
        .map(|link| link.source.as_str())
        .unique()
        .map(|source| SourceGroup {
            source,
            links: links.iter().filter(|l| l.source == source).collect(),
        })
        .collect()
}
