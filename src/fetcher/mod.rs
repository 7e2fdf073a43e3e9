//! Fetcher contract (§6): `fetch(url, proxy, timeout) -> bytes|Error`,
//! implemented by a fast HTTP fetcher (search result pages) and a stealth
//! variant presenting a realistic browser header set (detail pages).
//!
//! Grounded on `utils/resilient_http_client.rs`'s `reqwest::Client` setup and
//! status/timeout classification, minus its circuit-breaker wrapping: the
//! Fetcher contract explicitly "never itself retries" (§6) — breaker checks,
//! rate-limit acquisition, and retry-with-backoff all live one layer up, in
//! the scraping dispatcher (§4.5).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::errors::FetchError;
use crate::proxy::Proxy;

/// Pure I/O boundary: accepts a `http://host:port` proxy string, honours the
/// timeout, surfaces HTTP status on error, never retries (§6).
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str, proxy: Option<&Proxy>, timeout: Duration) -> Result<bytes::Bytes, FetchError>;
}

/// `via_proxy` distinguishes a connect failure through a proxy (classified
/// `ErrorKind::Proxy`, eligible for rotation) from a direct one (classified
/// `ErrorKind::NetworkConnection`, just backed off).
fn classify_reqwest_error(err: reqwest::Error, via_proxy: bool) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout
    } else if err.is_connect() {
        if via_proxy {
            FetchError::Proxy { message: err.to_string() }
        } else {
            FetchError::Connection { message: err.to_string() }
        }
    } else {
        FetchError::Transport { message: err.to_string() }
    }
}

async fn do_fetch(client: &Client, url: &str, proxy: Option<&Proxy>, timeout: Duration, user_agent: &str) -> Result<bytes::Bytes, FetchError> {
    let via_proxy = proxy.is_some();
    let mut request = client.get(url).timeout(timeout).header("User-Agent", user_agent);

    if let Some(proxy) = proxy {
        let reqwest_proxy =
            reqwest::Proxy::all(proxy.to_proxy_url()).map_err(|e| FetchError::Proxy { message: e.to_string() })?;
        // `reqwest::Client` does not support per-request proxies, so a
        // request-scoped client is built when a proxy is supplied.
        let proxied = Client::builder()
            .proxy(reqwest_proxy)
            .build()
            .map_err(|e| FetchError::Proxy { message: e.to_string() })?;
        request = proxied.get(url).timeout(timeout).header("User-Agent", user_agent);
    }

    let response = request.send().await.map_err(|e| classify_reqwest_error(e, via_proxy))?;
    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Status { status: status.as_u16() });
    }
    response.bytes().await.map_err(|e| classify_reqwest_error(e, via_proxy))
}

/// Fast fetcher for paginated search-result pages (§4.5, §6).
pub struct HttpFetcher {
    client: Client,
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self { client: Client::new() }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, proxy: Option<&Proxy>, timeout: Duration) -> Result<bytes::Bytes, FetchError> {
        do_fetch(&self.client, url, proxy, timeout, "Mozilla/5.0 (compatible; sale-sofia-core/0.1)").await
    }
}

/// Same trait, a realistic browser `User-Agent`/header set for detail pages
/// (§4.5, §10.4). This does not implement real browser automation — no JS
/// execution, no headless browser process — it only satisfies the same
/// `Fetcher` trait so the dispatcher's two-fetcher-kind contract type-checks
/// and is swappable; that is explicitly out of scope (§1).
pub struct StealthFetcher {
    client: Client,
    user_agent: String,
}

impl Default for StealthFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl StealthFetcher {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
                         Chrome/124.0.0.0 Safari/537.36"
                .to_string(),
        }
    }
}

#[async_trait]
impl Fetcher for StealthFetcher {
    async fn fetch(&self, url: &str, proxy: Option<&Proxy>, timeout: Duration) -> Result<bytes::Bytes, FetchError> {
        do_fetch(&self.client, url, proxy, timeout, &self.user_agent).await
    }
}
