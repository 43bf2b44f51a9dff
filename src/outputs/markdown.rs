//! Markdown rendering of a crawl report.
//!
//! ```text
//! # 思政新闻汇总 (2025-05-01 至 2025-05-11)
//!
//! ## 统计信息
//!
//! - 总新闻数: 1
//! - 爬取时间: 2025-05-11 09:30:00
//!
//! ## 济南市教育局 (1条)
//!
//! - [思政工作简报](http://jnedu.jinan.gov.cn/a.html)
//!   - 爬取时间: 2025-05-11 09:00:00
//! ```

use super::TIMESTAMP_FORMAT;
use crate::models::{NewsLink, RunWindow, group_by_source};
use chrono::{DateTime, Local};
use url::Url;

/// Render `links` as a Markdown document, one section per source in
/// first-seen order.
pub fn render(
    keyword: &str,
    links: &[NewsLink],
    window: &RunWindow,
    generated_at: DateTime<Local>,
) -> String {
    let mut md = String::new();
    md.push_str(&format!("# {keyword}新闻汇总 ({window})\n\n"));
    md.push_str("## 统计信息\n\n");
    md.push_str(&format!("- 总新闻数: {}\n", links.len()));
    md.push_str(&format!(
        "- 爬取时间: {}\n\n",
        generated_at.format(TIMESTAMP_FORMAT)
    ));

    for group in group_by_source(links) {
        md.push_str(&format!("## {} ({}条)\n\n", group.source, group.links.len()));
        for link in group.links {
            md.push_str(&format!(
                "- [{}]({})\n",
                escape_link_text(&link.title),
                link_destination(&link.url)
            ));
            md.push_str(&format!(
                "  - 爬取时间: {}\n\n",
                link.discovered_at.format(TIMESTAMP_FORMAT)
            ));
        }
    }
    md
}

/// Fold the title onto one line and escape its brackets.
fn escape_link_text(title: &str) -> String {
    title
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('[', "\\[")
        .replace(']', "\\]")
}

/// Percent-encode parentheses, which `Url` leaves as-is in paths and queries.
fn link_destination(url: &Url) -> String {
    url.as_str().replace('(', "%28").replace(')', "%29")
}
