//! Keyword link extraction.
//!
//! A page is scanned in two steps. First an [`ExtractionPolicy`], chosen
//! from a [`PolicyTable`] by the source host, decides which subtrees are
//! *candidate containers*. Then every anchor inside a container whose
//! visible text contains the keyword is turned into a [`NewsLink`].
//!
//! Most bureau sites have no dedicated policy and fall back to
//! [`ExtractionPolicy::WholeDocument`], which treats every anchor on the
//! page as a candidate.

use crate::models::NewsLink;
use chrono::Local;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};
use url::Url;

static ANCHOR: Lazy<Selector> = Lazy::new(|| Selector::parse("a").expect("anchor selector"));
static LIST_BLOCKS: Lazy<Selector> =
    Lazy::new(|| Selector::parse("div, ul").expect("list block selector"));
static NEWS_CLASS: Lazy<Regex> =
    Lazy::new(|| Regex::new("news|list|content").expect("news class pattern"));

/// How candidate containers are located on a page.
#[derive(Debug, Clone)]
pub enum ExtractionPolicy {
    /// Elements matching `selector` whose `class` attribute matches
    /// `class_pattern`. Nested matches are each visited.
    Containers {
        selector: Selector,
        class_pattern: Regex,
    },
    /// The whole document is one container.
    WholeDocument,
}

impl ExtractionPolicy {
    /// `div`/`ul` blocks classed like news lists (`news`, `list`, `content`).
    pub fn news_lists() -> Self {
        ExtractionPolicy::Containers {
            selector: LIST_BLOCKS.clone(),
            class_pattern: NEWS_CLASS.clone(),
        }
    }

    fn containers<'a>(&self, document: &'a Html) -> Vec<ElementRef<'a>> {
        match self {
            ExtractionPolicy::Containers {
                selector,
                class_pattern,
            } => document
                .select(selector)
                .filter(|el| {
                    el.value()
                        .attr("class")
                        .is_some_and(|class| class_pattern.is_match(class))
                })
                .collect(),
            ExtractionPolicy::WholeDocument => vec![document.root_element()],
        }
    }
}

/// Host pattern → policy, with a fallback for unmatched hosts.
#[derive(Debug, Clone)]
pub struct PolicyTable {
    rules: Vec<(String, ExtractionPolicy)>,
    fallback: ExtractionPolicy,
}

impl PolicyTable {
    /// An empty table; every host gets `fallback`.
    pub fn new(fallback: ExtractionPolicy) -> Self {
        Self {
            rules: Vec::new(),
            fallback,
        }
    }

    /// Add a rule; `host_pattern` is matched as a substring of the host.
    /// Earlier rules win.
    pub fn with_rule(mut self, host_pattern: impl Into<String>, policy: ExtractionPolicy) -> Self {
        self.rules.push((host_pattern.into(), policy));
        self
    }

    /// The first rule whose pattern occurs in the host of `base_url`, or the
    /// fallback.
    pub fn policy_for(&self, base_url: &Url) -> &ExtractionPolicy {
        let host = base_url.host_str().unwrap_or_default();
        self.rules
            .iter()
            .find(|(pattern, _)| host.contains(pattern.as_str()))
            .map(|(_, policy)| policy)
            .unwrap_or(&self.fallback)
    }
}

impl Default for PolicyTable {
    fn default() -> Self {
        PolicyTable::new(ExtractionPolicy::WholeDocument)
            .with_rule("jinan.gov.cn", ExtractionPolicy::news_lists())
            .with_rule("qingdao.gov.cn", ExtractionPolicy::news_lists())
    }
}

/// Resolve `href` against `base` into an absolute, fragment-free URL.
///
/// Returns `None` for empty and `javascript:` hrefs and for results without
/// a host (`mailto:`, `tel:`, `data:` ...).
pub fn normalize_url(href: &str, base: &Url) -> Option<Url> {
    let href = href.trim();
    let is_script = href
        .get(..11)
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case("javascript:"));
    if href.is_empty() || is_script {
        return None;
    }
    let mut url = base.join(href).ok()?;
    url.set_fragment(None);
    match url.host_str() {
        Some(host) if !host.is_empty() => Some(url),
        _ => None,
    }
}

/// Visible text of an element: each text node trimmed, then concatenated.
fn visible_text(el: &ElementRef<'_>) -> String {
    el.text().map(str::trim).collect()
}

/// Finds anchors whose visible text contains a keyword.
///
/// The keyword match is an exact, case-sensitive substring test.
#[derive(Debug, Clone)]
pub struct LinkExtractor {
    keyword: String,
    policies: PolicyTable,
}

impl LinkExtractor {
    /// An extractor using the built-in [`PolicyTable`].
    pub fn new(keyword: impl Into<String>) -> Self {
        Self::with_policies(keyword, PolicyTable::default())
    }

    /// An extractor with a custom host → policy table.
    pub fn with_policies(keyword: impl Into<String>, policies: PolicyTable) -> Self {
        Self {
            keyword: keyword.into(),
            policies,
        }
    }

    /// Collect keyword-matching links from `markup`, in document order.
    ///
    /// Never fails: empty or malformed markup simply yields fewer links.
    /// If `cancel` fires, the links found before the next container are
    /// returned.
    #[instrument(level = "debug", skip_all, fields(source = %source_name, %base_url))]
    pub fn extract(
        &self,
        markup: &str,
        source_name: &str,
        base_url: &Url,
        cancel: &CancellationToken,
    ) -> Vec<NewsLink> {
        let mut links = Vec::new();
        if markup.trim().is_empty() {
            return links;
        }

        let document = Html::parse_document(markup);
        let containers = self.policies.policy_for(base_url).containers(&document);
        debug!(containers = containers.len(), "Selected candidate containers");

        for container in containers {
            if cancel.is_cancelled() {
                debug!(found = links.len(), "Extraction cancelled");
                return links;
            }
            for anchor in container.select(&ANCHOR) {
                let Some(href) = anchor.value().attr("href") else {
                    continue;
                };
                let title = visible_text(&anchor);
                if title.is_empty() || !title.contains(&self.keyword) {
                    continue;
                }
                if let Some(url) = normalize_url(href, base_url) {
                    debug!(%title, %url, "Matched link");
                    links.push(NewsLink {
                        source: source_name.to_string(),
                        title,
                        url,
                        discovered_at: Local::now(),
                    });
                }
            }
        }
        links
    }
}
