//! Error types for the fetch and parse layers.
//!
//! Both families are absorbed at the task level: a single bad file or
//! unreachable host never aborts the crawl. Only startup failures
//! (unreadable input list, malformed proxy URL) are fatal.

use reqwest::StatusCode;
use thiserror::Error;
use url::Url;

/// Failures raised while parsing downloaded Git artifacts.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid magic number: expected 'DIRC', got '{0}'")]
    BadMagic(String),

    #[error("unsupported index version: {0}")]
    UnsupportedVersion(u32),

    #[error("short read: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to decompress object file: {0}")]
    Zlib(String),

    #[error("invalid object header")]
    BadObjectHeader,

    #[error("invalid object size: {0}")]
    BadObjectSize(#[from] std::num::ParseIntError),

    #[error("file contains HTML content")]
    HtmlContent,
}

/// Failures raised by the HTTP fetcher.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("skipping host {0} due to too many errors")]
    HostBlocked(String),

    #[error("received bad HTTP status {status} for URL {url}")]
    BadStatus { status: StatusCode, url: Url },

    #[error("failed to fetch URL {url}: {source}")]
    Transport {
        url: Url,
        #[source]
        source: reqwest_middleware::Error,
    },

    #[error("URL {0} has no host")]
    NoHost(Url),

    #[error("failed to build HTTP client: {0}")]
    Client(reqwest::Error),

    #[error("failed to parse proxy URL: {0}")]
    Proxy(reqwest::Error),

    #[error("failed to read response body: {0}")]
    Body(reqwest::Error),

    #[error("failed to save response: {0}")]
    Save(#[from] std::io::Error),
}

/// Failures raised by URL normalization and mapping.
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("failed to parse URL {input}: {source}")]
    Parse {
        input: String,
        #[source]
        source: url::ParseError,
    },

    #[error("URL {0} has no host")]
    NoHost(Url),
}
