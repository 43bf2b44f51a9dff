//! Error types for the crawler.
//!
//! Network failures never abort a run: they are retried inside the fetcher
//! and then reported as a per-source warning. The only error that reaches
//! the caller of [`crate::run`] is a failure to persist the report.

use std::path::PathBuf;

/// Why a single page fetch failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    /// TLS handshake or certificate problem.
    Tls,
    /// Could not connect (DNS, refused, reset).
    Connect,
    /// The per-attempt timeout elapsed.
    Timeout,
    /// Any other request-level failure, including non-success status codes.
    Request,
    /// Something the classifier did not recognise.
    Unknown,
}

impl std::fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FetchErrorKind::Tls => "tls",
            FetchErrorKind::Connect => "connect",
            FetchErrorKind::Timeout => "timeout",
            FetchErrorKind::Request => "request",
            FetchErrorKind::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error("{kind} failure: {message}")]
    Failed {
        kind: FetchErrorKind,
        message: String,
    },
    #[error("fetch cancelled")]
    Cancelled,
}

impl FetchError {
    pub fn new(kind: FetchErrorKind, message: impl Into<String>) -> Self {
        FetchError::Failed {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> Option<FetchErrorKind> {
        match self {
            FetchError::Failed { kind, .. } => Some(*kind),
            FetchError::Cancelled => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Per-source failure, caught and logged by the crawler.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("invalid base url {url:?}: {source}")]
    InvalidBaseUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("extraction panicked: {0}")]
    Panicked(String),
}

#[derive(Debug, thiserror::Error)]
pub enum CrawlError {
    #[error("configuration error")]
    Config(#[from] ConfigError),
    #[error("failed to build HTTP client")]
    Client(#[from] reqwest::Error),
    #[error("failed to write {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize report")]
    Json(#[from] serde_json::Error),
}
