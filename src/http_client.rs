//! Retrying HTTP fetcher with global pacing and per-host error
//! budgets.
//!
//! One client instance serves the whole run. Every request passes the
//! token-bucket limiter, and transport failures are charged against
//! the target host; once a host exhausts its budget, further requests
//! to it short-circuit without touching the network.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use futures::StreamExt;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, REFERER, USER_AGENT};
use reqwest::{Proxy, Response, StatusCode};
use reqwest_middleware::ClientWithMiddleware;
use reqwest_retry::policies::ExponentialBackoff;
use reqwest_retry::{
    DefaultRetryableStrategy, RetryTransientMiddleware, Retryable, RetryableStrategy,
};
use tokio::io::AsyncWriteExt;
use tracing::debug;
use url::Url;

use crate::cli::Config;
use crate::errors::FetchError;
use crate::rate_limit::RateLimiter;

const ACCEPT_VALUE: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,\
                            image/avif,image/webp,image/apng,*/*;q=0.8";
const ACCEPT_LANGUAGE_VALUE: &str = "en-US,en;q=0.9";
const REFERER_VALUE: &str = "https://www.google.com/";

/// Marks `301 Moved Permanently` as terminal for the retry policy.
///
/// A permanent redirect that survives the client's redirect handling
/// will never start succeeding on its own; everything else defers to
/// the default strategy.
struct MovedPermanentlyIsFatal;

impl RetryableStrategy for MovedPermanentlyIsFatal {
    fn handle(&self, res: &Result<Response, reqwest_middleware::Error>) -> Option<Retryable> {
        if let Ok(response) = res {
            if response.status() == StatusCode::MOVED_PERMANENTLY {
                return Some(Retryable::Fatal);
            }
        }
        DefaultRetryableStrategy.handle(res)
    }
}

pub struct HttpClient {
    client: ClientWithMiddleware,
    limiter: RateLimiter,
    host_errors: Mutex<HashMap<String, u32>>,
    max_host_errors: u32,
    request_timeout: Duration,
    user_agent: String,
}

impl HttpClient {
    /// Builds the shared client from the run configuration. Fails on
    /// a malformed proxy URL, which is a startup error.
    ///
    /// When no proxy is configured, the standard `HTTP_PROXY` and
    /// `HTTPS_PROXY` environment variables still apply.
    pub fn new(config: &Config) -> Result<Self, FetchError> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.header_timeout)
            .pool_idle_timeout(config.keepalive_timeout);

        if let Some(proxy_url) = &config.proxy_url {
            builder = builder.proxy(Proxy::all(proxy_url).map_err(FetchError::Proxy)?);
        }

        let client = builder.build().map_err(FetchError::Client)?;
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(config.max_retries);
        let client = reqwest_middleware::ClientBuilder::new(client)
            .with(RetryTransientMiddleware::new_with_policy_and_strategy(
                retry_policy,
                MovedPermanentlyIsFatal,
            ))
            .build();

        Ok(Self {
            client,
            limiter: RateLimiter::per_second(config.max_rps),
            host_errors: Mutex::new(HashMap::new()),
            max_host_errors: config.max_host_errors,
            request_timeout: config.request_timeout,
            user_agent: config.user_agent.clone(),
        })
    }

    /// Issues a rate-limited GET and returns the successful response.
    ///
    /// Requests to a host that has exhausted its error budget fail
    /// fast. Transport failures count against the host; bad statuses
    /// do not, since the server is alive and answering.
    pub async fn fetch(&self, url: &Url) -> Result<Response, FetchError> {
        let host = url
            .host_str()
            .ok_or_else(|| FetchError::NoHost(url.clone()))?
            .to_string();
        if self.is_host_blocked(&host) {
            return Err(FetchError::HostBlocked(host));
        }

        self.limiter.acquire().await;
        debug!("Fetching URL: {url}");

        let response = self
            .client
            .get(url.clone())
            .header(ACCEPT, ACCEPT_VALUE)
            .header(ACCEPT_LANGUAGE, ACCEPT_LANGUAGE_VALUE)
            .header(REFERER, REFERER_VALUE)
            .header(USER_AGENT, self.user_agent.as_str())
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|source| {
                self.record_host_error(&host);
                FetchError::Transport {
                    url: url.clone(),
                    source,
                }
            })?;

        if !response.status().is_success() {
            return Err(FetchError::BadStatus {
                status: response.status(),
                url: url.clone(),
            });
        }

        Ok(response)
    }

    /// Streams a response body into `file_name`, creating parent
    /// directories as needed.
    pub async fn save_response(
        &self,
        response: Response,
        file_name: &Path,
    ) -> Result<(), FetchError> {
        if let Some(parent) = file_name.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(file_name).await?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(FetchError::Body)?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }

    /// Fetch-and-save composition used by the post-crawl file pass.
    pub async fn fetch_file(&self, url: &Url, file_name: &Path) -> Result<(), FetchError> {
        let response = self.fetch(url).await?;
        self.save_response(response, file_name).await
    }

    pub fn is_host_blocked(&self, host: &str) -> bool {
        let errors = self.host_errors.lock().unwrap();
        errors
            .get(host)
            .is_some_and(|&count| count >= self.max_host_errors)
    }

    fn record_host_error(&self, host: &str) {
        let mut errors = self.host_errors.lock().unwrap();
        *errors.entry(host.to_string()).or_insert(0) += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use wiremock::matchers::{header, headers, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(args: &[&str]) -> HttpClient {
        let mut argv = vec!["git-dump", "--rps", "1000"];
        argv.extend_from_slice(args);
        let config = Config::try_parse_from(argv).unwrap();
        HttpClient::new(&config).unwrap()
    }

    fn url(base: &str, rest: &str) -> Url {
        Url::parse(&format!("{base}{rest}")).unwrap()
    }

    /// Binds and immediately drops a listener so the port is closed.
    fn dead_host_url() -> Url {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        Url::parse(&format!("http://127.0.0.1:{port}/.git/HEAD")).unwrap()
    }

    #[tokio::test]
    async fn sends_browser_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.git/HEAD"))
            .and(header("Referer", "https://www.google.com/"))
            .and(headers("Accept-Language", vec!["en-US", "en;q=0.9"]))
            .and(header("User-Agent", "test-agent"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ref: refs/heads/main"))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&["--ua", "test-agent", "--retries", "0"]);
        let response = client.fetch(&url(&server.uri(), "/.git/HEAD")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn bad_status_fails_without_charging_host() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = test_client(&["--maxhe", "1", "--retries", "0"]);
        let target = url(&server.uri(), "/.git/missing");
        let error = client.fetch(&target).await.unwrap_err();
        assert!(matches!(
            error,
            FetchError::BadStatus {
                status: StatusCode::NOT_FOUND,
                ..
            }
        ));
        assert!(!client.is_host_blocked("127.0.0.1"));
    }

    #[tokio::test]
    async fn moved_permanently_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.git/HEAD"))
            .respond_with(ResponseTemplate::new(301))
            .expect(1)
            .mount(&server)
            .await;

        // Three retries are allowed; the expectation proves none ran.
        let client = test_client(&["--retries", "3"]);
        let error = client.fetch(&url(&server.uri(), "/.git/HEAD")).await.unwrap_err();
        assert!(matches!(
            error,
            FetchError::BadStatus {
                status: StatusCode::MOVED_PERMANENTLY,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn host_is_blocked_after_error_budget() {
        let client = test_client(&["--maxhe", "2", "--retries", "0", "--connect-timeout", "1s"]);
        let target = dead_host_url();

        for _ in 0..2 {
            let error = client.fetch(&target).await.unwrap_err();
            assert!(matches!(error, FetchError::Transport { .. }));
        }

        assert!(client.is_host_blocked("127.0.0.1"));
        let error = client.fetch(&target).await.unwrap_err();
        assert!(matches!(error, FetchError::HostBlocked(host) if host == "127.0.0.1"));
    }

    #[tokio::test]
    async fn saves_response_body_creating_directories() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.git/objects/ab/cd"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"\x78\x9c\x03\x00".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let file_name = dir.path().join("host/.git/objects/ab/cd");
        let client = test_client(&["--retries", "0"]);
        client
            .fetch_file(&url(&server.uri(), "/.git/objects/ab/cd"), &file_name)
            .await
            .unwrap();
        assert_eq!(std::fs::read(&file_name).unwrap(), b"\x78\x9c\x03\x00");
    }
}
