//! Page fetching with browser-like headers and linear-backoff retries.
//!
//! The module follows a small decorator design:
//! - [`PageFetch`]: one attempt at downloading a page as text
//! - [`HttpFetcher`]: the `reqwest` implementation of a single attempt
//! - [`RetryFetch`]: wraps any [`PageFetch`] with retries, backoff and
//!   cancellation
//!
//! # Retry Strategy
//!
//! - `max_attempts` total attempts (3 by default)
//! - Linear backoff: after failed attempt `n` wait `n * 2` seconds
//! - No wait after the final attempt
//! - The cancellation token is checked before every attempt and interrupts
//!   a pending backoff

use crate::error::{FetchError, FetchErrorKind};
use crate::events::{CrawlEvent, EventSink};
use crate::utils::truncate_for_log;
use encoding_rs::{Encoding, GB18030, UTF_8, WINDOWS_1252};
use once_cell::sync::Lazy;
use rand::seq::IndexedRandom;
use regex::Regex;
use reqwest::header::{
    ACCEPT, ACCEPT_LANGUAGE, CONNECTION, CONTENT_TYPE, HeaderMap, HeaderValue, REFERER,
    UPGRADE_INSECURE_REQUESTS, USER_AGENT,
};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};
use url::Url;

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36 Edg/123.0.2420.81",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:124.0) Gecko/20100101 Firefox/124.0",
];

/// Hosts that reject requests without a same-site Referer.
/// Matched by substring against the request host.
const REFERERS: &[(&str, &str)] = &[
    ("jinan.gov.cn", "http://jnedu.jinan.gov.cn/"),
    ("qingdao.gov.cn", "http://edu.qingdao.gov.cn/"),
];

const BACKOFF_STEP: Duration = Duration::from_secs(2);

static META_CHARSET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<meta[^>]+charset\s*=\s*["']?\s*([a-z0-9_:.\-]+)"#)
        .expect("meta charset pattern is valid")
});

/// A single attempt at fetching a page.
pub trait PageFetch {
    /// Fetch `url` once and return its decoded markup.
    ///
    /// # Errors
    ///
    /// A [`FetchError::Failed`] whose kind says what went wrong. Retrying is
    /// left to [`RetryFetch`].
    async fn fetch_once(&self, url: &Url) -> Result<String, FetchError>;
}

/// Pick a random desktop browser User-Agent.
pub fn pick_user_agent() -> &'static str {
    USER_AGENTS
        .choose(&mut rand::rng())
        .copied()
        .unwrap_or(USER_AGENTS[0])
}

/// Referer to send for `host`, if the host is in the referer table.
pub fn referer_for(host: &str) -> Option<&'static str> {
    REFERERS
        .iter()
        .find(|(pattern, _)| host.contains(pattern))
        .map(|(_, referer)| *referer)
}

/// Browser-like request headers for `url`, with a fresh random User-Agent.
pub fn browser_headers(url: &Url) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(pick_user_agent()));
    headers.insert(
        ACCEPT,
        HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
        ),
    );
    headers.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_static("zh-CN,zh;q=0.8,zh-TW;q=0.7,zh-HK;q=0.5,en-US;q=0.3,en;q=0.2"),
    );
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));
    if let Some(referer) = url.host_str().and_then(referer_for) {
        headers.insert(REFERER, HeaderValue::from_static(referer));
    }
    headers
}

/// Error text fragments produced by the OpenSSL and rustls backends for
/// handshake and record-layer failures.
const TLS_MARKERS: &[&str] = &[
    "certificate",
    "tls",
    "ssl",
    "handshake",
    "wrong version number",
    "corrupt message",
];

/// Map a `reqwest` error onto the failure kinds the crawler logs.
///
/// Timeouts and connect/status errors come from `reqwest`'s own flags.
/// TLS failures have no flag, so they are recognised best-effort by
/// scanning the source chain for [`TLS_MARKERS`]; an unrecognised TLS
/// failure is reported as `Connect`.
pub fn classify(err: &reqwest::Error) -> FetchErrorKind {
    if err.is_timeout() {
        return FetchErrorKind::Timeout;
    }
    let mut source = std::error::Error::source(err);
    while let Some(e) = source {
        let msg = e.to_string().to_ascii_lowercase();
        if TLS_MARKERS.iter().any(|marker| msg.contains(marker)) {
            return FetchErrorKind::Tls;
        }
        source = e.source();
    }
    if err.is_connect() {
        FetchErrorKind::Connect
    } else if err.is_status()
        || err.is_request()
        || err.is_body()
        || err.is_decode()
        || err.is_redirect()
        || err.is_builder()
    {
        FetchErrorKind::Request
    } else {
        FetchErrorKind::Unknown
    }
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(e) = source {
        out.push_str(": ");
        out.push_str(&e.to_string());
        source = e.source();
    }
    out
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        FetchError::new(classify(&err), error_chain(&err))
    }
}

/// The `charset` parameter of a `Content-Type` header value.
pub fn declared_charset(content_type: &str) -> Option<&str> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches('"'))
    })
}

/// Guess the encoding of a page from its bytes: BOM, then an in-document
/// `<meta>` declaration, then UTF-8 validity, then GB18030.
pub fn sniff_encoding(bytes: &[u8]) -> &'static Encoding {
    if let Some((encoding, _)) = Encoding::for_bom(bytes) {
        return encoding;
    }
    let head = String::from_utf8_lossy(&bytes[..bytes.len().min(4096)]);
    if let Some(encoding) = META_CHARSET
        .captures(&head)
        .and_then(|c| Encoding::for_label(c[1].as_bytes()))
        .filter(|e| *e != WINDOWS_1252)
    {
        return encoding;
    }
    if std::str::from_utf8(bytes).is_ok() {
        UTF_8
    } else {
        GB18030
    }
}

/// Decode a response body. A missing, unknown or Latin-1 declared charset
/// is treated as untrustworthy and replaced by a sniffed encoding.
pub fn decode_body(content_type: Option<&str>, bytes: &[u8]) -> String {
    let declared = content_type
        .and_then(declared_charset)
        .and_then(|label| Encoding::for_label(label.as_bytes()));
    let encoding = match declared {
        Some(encoding) if encoding != WINDOWS_1252 => encoding,
        _ => sniff_encoding(bytes),
    };
    let (text, used, had_errors) = encoding.decode(bytes);
    if had_errors {
        debug!(encoding = used.name(), "Body contained malformed sequences");
    }
    text.into_owned()
}

/// `reqwest`-backed [`PageFetch`].
///
/// Certificate validation is disabled: several of the bureau sites serve
/// expired or self-signed certificates.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Build the shared client.
    ///
    /// # Arguments
    ///
    /// * `timeout` - Limit for one whole attempt, connect through body.
    ///
    /// # Errors
    ///
    /// Fails only if the TLS backend cannot be initialised.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .build()?;
        Ok(Self { client })
    }
}

impl PageFetch for HttpFetcher {
    #[instrument(level = "debug", skip_all, fields(%url))]
    async fn fetch_once(&self, url: &Url) -> Result<String, FetchError> {
        let resp = self
            .client
            .get(url.clone())
            .headers(browser_headers(url))
            .send()
            .await?
            .error_for_status()?;
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let bytes = resp.bytes().await?;
        Ok(decode_body(content_type.as_deref(), &bytes))
    }
}

/// Adds retries with linear backoff and cancellation to a [`PageFetch`].
#[derive(Debug)]
pub struct RetryFetch<T> {
    inner: T,
    max_attempts: u32,
    backoff_step: Duration,
    events: EventSink,
}

impl<T: PageFetch> RetryFetch<T> {
    /// Wrap `inner`.
    ///
    /// # Arguments
    ///
    /// * `inner` - The single-attempt fetcher
    /// * `max_attempts` - Total attempts including the first; `0` counts as `1`
    /// * `events` - Receives attempt, failure and backoff events
    pub fn new(inner: T, max_attempts: u32, events: EventSink) -> Self {
        Self {
            inner,
            max_attempts: max_attempts.max(1),
            backoff_step: BACKOFF_STEP,
            events,
        }
    }

    /// The wrapped fetcher.
    pub fn inner(&self) -> &T {
        &self.inner
    }

    /// Fetch `url`, retrying every failure kind until the attempts run out.
    ///
    /// Returns [`FetchError::Cancelled`] as soon as `cancel` is observed,
    /// otherwise the error of the last attempt.
    #[instrument(level = "info", skip_all, fields(%url))]
    pub async fn fetch(&self, url: &Url, cancel: &CancellationToken) -> Result<String, FetchError> {
        if url.host_str().is_none() {
            return Err(FetchError::new(
                FetchErrorKind::Request,
                format!("{url} has no host"),
            ));
        }

        let mut last_error = FetchError::Cancelled;
        for attempt in 1..=self.max_attempts {
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }
            self.events.emit(CrawlEvent::FetchAttempt {
                url: url.to_string(),
                attempt,
                max_attempts: self.max_attempts,
            });

            match self.inner.fetch_once(url).await {
                Ok(body) => {
                    self.events.emit(CrawlEvent::Fetched {
                        url: url.to_string(),
                        bytes: body.len(),
                    });
                    return Ok(body);
                }
                Err(FetchError::Cancelled) => return Err(FetchError::Cancelled),
                Err(e) => {
                    if let FetchError::Failed { kind, message } = &e {
                        self.events.emit(CrawlEvent::FetchFailed {
                            url: url.to_string(),
                            attempt,
                            kind: *kind,
                            message: truncate_for_log(message, 300),
                        });
                    }
                    last_error = e;
                }
            }

            if attempt < self.max_attempts {
                let wait = self.backoff_step * attempt;
                self.events.emit(CrawlEvent::BackingOff {
                    url: url.to_string(),
                    wait,
                });
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                }
            }
        }
        Err(last_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Fails the first `failures` calls, then returns `body`.
    struct ScriptedFetcher {
        failures: u32,
        body: String,
        calls: Mutex<Vec<Instant>>,
    }

    impl ScriptedFetcher {
        fn new(failures: u32, body: &str) -> Self {
            Self {
                failures,
                body: body.to_string(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl PageFetch for ScriptedFetcher {
        async fn fetch_once(&self, _url: &Url) -> Result<String, FetchError> {
            let mut calls = self.calls.lock().unwrap();
            calls.push(Instant::now());
            if calls.len() as u32 <= self.failures {
                Err(FetchError::new(FetchErrorKind::Connect, "connection refused"))
            } else {
                Ok(self.body.clone())
            }
        }
    }

    fn url() -> Url {
        Url::parse("http://edu.zibo.gov.cn/").unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_failures_three_attempts_with_linear_backoff() {
        let fetcher = RetryFetch::new(ScriptedFetcher::new(u32::MAX, ""), 3, EventSink::silent());
        let started = Instant::now();

        let err = fetcher.fetch(&url(), &CancellationToken::new()).await.unwrap_err();

        assert_eq!(err.kind(), Some(FetchErrorKind::Connect));
        let calls = fetcher.inner().calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[1] - calls[0], Duration::from_secs(2));
        assert_eq!(calls[2] - calls[1], Duration::from_secs(4));
        // No sleep after the final attempt.
        assert_eq!(started.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_one_failure() {
        let fetcher = RetryFetch::new(ScriptedFetcher::new(1, "<html></html>"), 3, EventSink::silent());
        let body = fetcher.fetch(&url(), &CancellationToken::new()).await.unwrap();
        assert_eq!(body, "<html></html>");
        assert_eq!(fetcher.inner().calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_first_attempt() {
        let fetcher = RetryFetch::new(ScriptedFetcher::new(0, "ok"), 3, EventSink::silent());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = fetcher.fetch(&url(), &cancel).await.unwrap_err();

        assert!(matches!(err, FetchError::Cancelled));
        assert!(fetcher.inner().calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff_stops_retrying() {
        let fetcher = RetryFetch::new(ScriptedFetcher::new(u32::MAX, ""), 3, EventSink::silent());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let err = fetcher.fetch(&url(), &cancel).await.unwrap_err();

        assert!(matches!(err, FetchError::Cancelled));
        assert_eq!(fetcher.inner().calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_describe_attempts() {
        let (sink, mut rx) = EventSink::channel();
        let fetcher = RetryFetch::new(ScriptedFetcher::new(u32::MAX, ""), 2, sink);
        let _ = fetcher.fetch(&url(), &CancellationToken::new()).await;

        let mut events = Vec::new();
        while let Ok(e) = rx.try_recv() {
            events.push(e);
        }
        assert!(matches!(events[0], CrawlEvent::FetchAttempt { attempt: 1, max_attempts: 2, .. }));
        assert!(matches!(events[1], CrawlEvent::FetchFailed { attempt: 1, kind: FetchErrorKind::Connect, .. }));
        assert_eq!(
            events[2],
            CrawlEvent::BackingOff {
                url: url().to_string(),
                wait: Duration::from_secs(2)
            }
        );
        assert!(matches!(events[3], CrawlEvent::FetchAttempt { attempt: 2, .. }));
        assert!(matches!(events[4], CrawlEvent::FetchFailed { attempt: 2, .. }));
        assert_eq!(events.len(), 5);
    }

    #[tokio::test]
    async fn test_url_without_host_is_rejected() {
        let fetcher = RetryFetch::new(ScriptedFetcher::new(0, "ok"), 3, EventSink::silent());
        let url = Url::parse("mailto:office@example.gov.cn").unwrap();
        let err = fetcher.fetch(&url, &CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.kind(), Some(FetchErrorKind::Request));
        assert!(fetcher.inner().calls().is_empty());
    }

    #[test]
    fn test_referer_table() {
        assert_eq!(
            referer_for("jnedu.jinan.gov.cn"),
            Some("http://jnedu.jinan.gov.cn/")
        );
        assert_eq!(
            referer_for("www.qingdao.gov.cn"),
            Some("http://edu.qingdao.gov.cn/")
        );
        assert_eq!(referer_for("edu.zibo.gov.cn"), None);
    }

    #[test]
    fn test_browser_headers() {
        let headers = browser_headers(&Url::parse("http://jnedu.jinan.gov.cn/col/").unwrap());
        assert!(USER_AGENTS.contains(&headers[USER_AGENT].to_str().unwrap()));
        assert_eq!(headers[UPGRADE_INSECURE_REQUESTS], "1");
        assert_eq!(headers[REFERER], "http://jnedu.jinan.gov.cn/");
        assert!(headers[ACCEPT_LANGUAGE].to_str().unwrap().starts_with("zh-CN"));

        let headers = browser_headers(&Url::parse("http://jyj.yantai.gov.cn/").unwrap());
        assert!(headers.get(REFERER).is_none());
    }

    #[test]
    fn test_declared_charset() {
        assert_eq!(declared_charset("text/html; charset=GBK"), Some("GBK"));
        assert_eq!(declared_charset("text/html;charset=\"utf-8\""), Some("utf-8"));
        assert_eq!(declared_charset("text/html"), None);
    }

    #[test]
    fn test_latin1_declaration_is_resniffed() {
        let html = "<html><head><meta charset=\"gb2312\"></head><body>思政工作</body></html>";
        let (bytes, _, _) = encoding_rs::GBK.encode(html);
        let text = decode_body(Some("text/html; charset=ISO-8859-1"), &bytes);
        assert!(text.contains("思政工作"));
    }

    #[test]
    fn test_missing_declaration_is_sniffed() {
        let (bytes, _, _) = encoding_rs::GBK.encode("<p>思政工作简报</p>");
        assert!(decode_body(Some("text/html"), &bytes).contains("思政工作简报"));
        assert!(decode_body(None, "<p>思政</p>".as_bytes()).contains("思政"));
    }

    #[test]
    fn test_explicit_charset_is_trusted() {
        let (bytes, _, _) = encoding_rs::GBK.encode("思政");
        assert_eq!(decode_body(Some("text/html; charset=gbk"), &bytes), "思政");
    }

    #[tokio::test]
    async fn test_http_fetcher_sends_browser_headers_and_decodes() {
        let mut server = mockito::Server::new_async().await;
        let html = "<html><head><meta http-equiv=\"Content-Type\" content=\"text/html; charset=gb2312\"></head><body><a href=\"/a.html\">思政工作简报</a></body></html>";
        let (body, _, _) = encoding_rs::GBK.encode(html);
        let m = server
            .mock("GET", "/index.html")
            .match_header("user-agent", mockito::Matcher::Regex("^Mozilla/5.0".into()))
            .match_header("upgrade-insecure-requests", "1")
            .with_status(200)
            .with_header("content-type", "text/html; charset=ISO-8859-1")
            .with_body(body.into_owned())
            .expect(1)
            .create_async()
            .await;

        let fetcher = HttpFetcher::new(Duration::from_secs(5)).unwrap();
        let url = Url::parse(&format!("{}/index.html", server.url())).unwrap();
        let text = fetcher.fetch_once(&url).await.unwrap();

        assert!(text.contains("思政工作简报"));
        m.assert_async().await;
    }

    #[tokio::test]
    async fn test_http_fetcher_status_error_is_request_kind() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/missing")
            .with_status(404)
            .create_async()
            .await;

        let fetcher = HttpFetcher::new(Duration::from_secs(5)).unwrap();
        let url = Url::parse(&format!("{}/missing", server.url())).unwrap();
        let err = fetcher.fetch_once(&url).await.unwrap_err();
        assert_eq!(err.kind(), Some(FetchErrorKind::Request));
    }

    #[tokio::test]
    async fn test_http_fetcher_refused_connection_is_connect_kind() {
        let fetcher = HttpFetcher::new(Duration::from_secs(5)).unwrap();
        let url = Url::parse("http://127.0.0.1:1/").unwrap();
        let err = fetcher.fetch_once(&url).await.unwrap_err();
        assert_eq!(err.kind(), Some(FetchErrorKind::Connect));
    }

    #[tokio::test]
    async fn test_http_fetcher_silent_server_is_timeout_kind() {
        // Accepts connections but never answers.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let fetcher = HttpFetcher::new(Duration::from_millis(200)).unwrap();
        let url = Url::parse(&format!("http://{addr}/")).unwrap();
        let err = fetcher.fetch_once(&url).await.unwrap_err();
        assert_eq!(err.kind(), Some(FetchErrorKind::Timeout));
    }

    #[tokio::test]
    async fn test_http_fetcher_plaintext_reply_to_https_is_tls_kind() {
        // Answers the TLS client hello with plain HTTP.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _server = tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            let mut held = Vec::new();
            while let Ok((mut stream, _)) = listener.accept().await {
                let _ = stream
                    .write_all(b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\n\r\n")
                    .await;
                held.push(stream);
            }
        });

        let fetcher = HttpFetcher::new(Duration::from_secs(5)).unwrap();
        let url = Url::parse(&format!("https://{addr}/")).unwrap();
        let err = fetcher.fetch_once(&url).await.unwrap_err();
        assert_eq!(err.kind(), Some(FetchErrorKind::Tls), "{err}");
    }
}
