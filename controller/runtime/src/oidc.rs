//! OpenID provider discovery
//!
//! OAuth2 GatewayExtensions name an issuer; the token and authorization
//! endpoints come from the issuer's discovery document. Translation never
//! waits on the network: it reads whatever the [`OidcCache`] holds, while a
//! background task discovers the issuers the index references and a second
//! task clears the cache periodically so that provider changes are picked up.

use ahash::AHashMap as HashMap;
use gateway_controller_core::oidc::{OidcProviderConfig, OidcProviders};
use gateway_controller_k8s_index::SharedIndex;
use parking_lot::RwLock;
use reqwest::{header, StatusCode};
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::time;
use tokio_util::sync::CancellationToken;

const WELL_KNOWN_PATH: &str = "/.well-known/openid-configuration";
const USER_AGENT: &str = "gateway-controller/oidc-discovery";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const ATTEMPTS: u32 = 5;
const BASE_DELAY: Duration = Duration::from_millis(100);
const MAX_DELAY: Duration = Duration::from_secs(5);

/// Discovered provider configurations, keyed by issuer URI.
#[derive(Debug, Default)]
pub struct OidcCache {
    providers: RwLock<HashMap<String, OidcProviderConfig>>,
    revision: AtomicU64,
}

/// Fetches discovery documents and stores them in an [`OidcCache`].
#[derive(Clone, Debug)]
pub struct Discoverer {
    client: reqwest::Client,
    cache: Arc<OidcCache>,
    shutdown: CancellationToken,
    base_delay: Duration,
    max_delay: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("invalid discovery URL {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("failed to fetch OpenID provider config: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("error discovering OpenID provider config; unexpected status code {0}")]
    Unavailable(StatusCode),

    #[error("error discovering OpenID provider config; unexpected status code {0}")]
    Status(StatusCode),

    #[error("error decoding OpenID provider config: {0}")]
    Decode(#[source] serde_json::Error),
}

/// The fields of a discovery document that OAuth2 policies use.
#[derive(Debug, serde::Deserialize)]
struct ProviderDocument {
    token_endpoint: String,
    authorization_endpoint: String,
    #[serde(default)]
    end_session_endpoint: Option<String>,
}

// === impl OidcCache ===

impl OidcCache {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn get(&self, issuer_uri: &str) -> Option<OidcProviderConfig> {
        self.providers.read().get(issuer_uri).cloned()
    }

    pub fn store(&self, issuer_uri: impl Into<String>, config: OidcProviderConfig) {
        let issuer_uri = issuer_uri.into();
        let mut providers = self.providers.write();
        if providers.get(&issuer_uri) != Some(&config) {
            providers.insert(issuer_uri, config);
            self.revision.fetch_add(1, Ordering::Release);
        }
    }

    pub fn clear(&self) {
        let mut providers = self.providers.write();
        if !providers.is_empty() {
            providers.clear();
            self.revision.fetch_add(1, Ordering::Release);
        }
    }

    /// A counter incremented whenever the cached configurations change.
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.providers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.read().is_empty()
    }
}

impl OidcProviders for OidcCache {
    fn get(&self, issuer_uri: &str) -> Option<OidcProviderConfig> {
        OidcCache::get(self, issuer_uri)
    }
}

// === impl Discoverer ===

impl Discoverer {
    pub fn new(cache: Arc<OidcCache>, shutdown: CancellationToken) -> Result<Self, DiscoveryError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(DiscoveryError::Client)?;
        Ok(Self {
            client,
            cache,
            shutdown,
            base_delay: BASE_DELAY,
            max_delay: MAX_DELAY,
        })
    }

    pub fn with_backoff(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    /// Returns the cached configuration of an issuer, discovering and caching
    /// it on a miss. Nothing is cached once shutdown has begun.
    pub async fn get(&self, issuer_uri: &str) -> Result<OidcProviderConfig, DiscoveryError> {
        if let Some(config) = self.cache.get(issuer_uri) {
            return Ok(config);
        }
        let config = self.discover(issuer_uri).await?;
        if !self.shutdown.is_cancelled() {
            self.cache.store(issuer_uri, config.clone());
        }
        Ok(config)
    }

    /// Discovers every issuer that is not already cached. Failures are logged
    /// and retried on the next call.
    pub async fn sync(&self, issuers: &[String]) {
        for issuer in issuers {
            if self.shutdown.is_cancelled() {
                return;
            }
            if self.cache.get(issuer).is_some() {
                continue;
            }
            match self.get(issuer).await {
                Ok(_) => tracing::info!(%issuer, "Discovered OpenID provider"),
                Err(error) => {
                    tracing::warn!(%issuer, %error, "Failed to discover OpenID provider")
                }
            }
        }
    }

    async fn discover(&self, issuer_uri: &str) -> Result<OidcProviderConfig, DiscoveryError> {
        let url = discovery_url(issuer_uri)?;
        let mut attempt = 0;
        loop {
            match self.fetch(&url).await {
                Ok(config) => return Ok(config),
                Err(error) if error.is_retryable() && attempt + 1 < ATTEMPTS => {
                    let delay = backoff(self.base_delay, self.max_delay, attempt);
                    tracing::debug!(issuer = %issuer_uri, %error, ?delay, "Retrying discovery");
                    attempt += 1;
                    tokio::select! {
                        biased;
                        _ = self.shutdown.cancelled() => return Err(error),
                        _ = time::sleep(delay) => {}
                    }
                }
                Err(error) => return Err(error),
            }
        }
    }

    async fn fetch(&self, url: &url::Url) -> Result<OidcProviderConfig, DiscoveryError> {
        let rsp = self
            .client
            .get(url.clone())
            .header(header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(DiscoveryError::Transport)?;

        match rsp.status() {
            StatusCode::OK => {}
            status @ (StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT) => return Err(DiscoveryError::Unavailable(status)),
            status => return Err(DiscoveryError::Status(status)),
        }

        let body = rsp.bytes().await.map_err(DiscoveryError::Transport)?;
        let doc =
            serde_json::from_slice::<ProviderDocument>(&body).map_err(DiscoveryError::Decode)?;
        Ok(OidcProviderConfig {
            token_endpoint: doc.token_endpoint,
            authorization_endpoint: doc.authorization_endpoint,
            end_session_endpoint: doc.end_session_endpoint,
        })
    }
}

// === impl DiscoveryError ===

impl DiscoveryError {
    /// Network failures and gateway errors may resolve on their own; client
    /// errors and malformed documents will not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Unavailable(_))
    }
}

fn discovery_url(issuer_uri: &str) -> Result<url::Url, DiscoveryError> {
    let url = format!("{}{WELL_KNOWN_PATH}", issuer_uri.trim_end_matches('/'));
    url::Url::parse(&url).map_err(|source| DiscoveryError::InvalidUrl { url, source })
}

fn backoff(base: Duration, max: Duration, attempt: u32) -> Duration {
    base.saturating_mul(1u32 << attempt.min(16)).min(max)
}

/// Clears the cache every `interval` so that the next sync re-discovers each
/// issuer. Returns once `shutdown` is cancelled.
pub async fn refresh(cache: Arc<OidcCache>, interval: Duration, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                tracing::debug!("OIDC cache refresh stopped");
                return;
            }
            _ = time::sleep(interval) => {
                tracing::debug!(providers = cache.len(), "Clearing OIDC provider cache");
                cache.clear();
            }
        }
    }
}

/// Discovers the issuers referenced by the index every `interval` until
/// `shutdown` is cancelled.
pub async fn discover_issuers(
    discoverer: Discoverer,
    index: SharedIndex,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticks = time::interval(interval);
    ticks.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                tracing::debug!("OIDC discovery stopped");
                return;
            }
            _ = ticks.tick() => {
                let issuers = index.read().oauth2_issuers();
                discoverer.sync(&issuers).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use wiremock::{
        matchers::{header, method, path},
        Mock, MockBuilder, MockServer, ResponseTemplate,
    };

    fn discoverer(cache: &Arc<OidcCache>) -> Discoverer {
        Discoverer::new(cache.clone(), CancellationToken::new())
            .expect("client must build")
            .with_backoff(Duration::from_millis(1), Duration::from_millis(4))
    }

    fn document(server: &MockServer) -> serde_json::Value {
        serde_json::json!({
            "issuer": server.uri(),
            "token_endpoint": format!("{}/oauth/token", server.uri()),
            "authorization_endpoint": format!("{}/oauth/authorize", server.uri()),
            "jwks_uri": format!("{}/keys", server.uri()),
        })
    }

    fn well_known() -> MockBuilder {
        Mock::given(method("GET")).and(path(WELL_KNOWN_PATH))
    }

    #[tokio::test]
    async fn discovers_and_caches() {
        let server = MockServer::start().await;
        well_known()
            .and(header("accept", "application/json"))
            .and(header("user-agent", USER_AGENT))
            .respond_with(ResponseTemplate::new(200).set_body_json(document(&server)))
            .expect(1)
            .mount(&server)
            .await;

        let cache = OidcCache::shared();
        let discoverer = discoverer(&cache);
        let expected = OidcProviderConfig {
            token_endpoint: format!("{}/oauth/token", server.uri()),
            authorization_endpoint: format!("{}/oauth/authorize", server.uri()),
            end_session_endpoint: None,
        };

        let issuer = format!("{}/", server.uri());
        assert_eq!(discoverer.get(&issuer).await.expect("discovers"), expected);
        assert_eq!(discoverer.get(&issuer).await.expect("cached"), expected);
        assert_eq!(OidcProviders::get(&*cache, &issuer), Some(expected));
        assert_eq!(cache.revision(), 1);
    }

    #[tokio::test]
    async fn retries_unavailable_providers() {
        let server = MockServer::start().await;
        well_known()
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .with_priority(1)
            .expect(2)
            .mount(&server)
            .await;
        well_known()
            .respond_with(ResponseTemplate::new(200).set_body_json(document(&server)))
            .expect(1)
            .mount(&server)
            .await;

        let cache = OidcCache::shared();
        let config = discoverer(&cache)
            .get(&server.uri())
            .await
            .expect("discovers after retrying");
        assert_eq!(config.token_endpoint, format!("{}/oauth/token", server.uri()));
    }

    #[tokio::test]
    async fn gives_up_after_five_attempts() {
        let server = MockServer::start().await;
        well_known()
            .respond_with(ResponseTemplate::new(502))
            .expect(5)
            .mount(&server)
            .await;

        let cache = OidcCache::shared();
        let error = discoverer(&cache)
            .get(&server.uri())
            .await
            .expect_err("must fail");
        assert!(
            matches!(error, DiscoveryError::Unavailable(StatusCode::BAD_GATEWAY)),
            "{error}"
        );
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start().await;
        well_known()
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let error = discoverer(&OidcCache::shared())
            .get(&server.uri())
            .await
            .expect_err("must fail");
        assert!(!error.is_retryable());
        assert!(matches!(error, DiscoveryError::Status(StatusCode::NOT_FOUND)));
    }

    #[tokio::test]
    async fn malformed_documents_are_not_retried() {
        let server = MockServer::start().await;
        well_known()
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"issuer\":"))
            .expect(1)
            .mount(&server)
            .await;

        let error = discoverer(&OidcCache::shared())
            .get(&server.uri())
            .await
            .expect_err("must fail");
        assert!(matches!(error, DiscoveryError::Decode(_)), "{error}");
    }

    #[tokio::test]
    async fn nothing_is_cached_after_shutdown() {
        let server = MockServer::start().await;
        well_known()
            .respond_with(ResponseTemplate::new(200).set_body_json(document(&server)))
            .mount(&server)
            .await;

        let cache = OidcCache::shared();
        let shutdown = CancellationToken::new();
        let discoverer =
            Discoverer::new(cache.clone(), shutdown.clone()).expect("client must build");
        shutdown.cancel();

        discoverer.get(&server.uri()).await.expect("still discovers");
        discoverer.sync(&[server.uri()]).await;
        assert!(cache.is_empty());
    }

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let delays = (0..ATTEMPTS)
            .map(|n| backoff(BASE_DELAY, MAX_DELAY, n))
            .collect::<Vec<_>>();
        assert_eq!(
            delays,
            [100, 200, 400, 800, 1600].map(Duration::from_millis).to_vec()
        );
        assert_eq!(backoff(BASE_DELAY, MAX_DELAY, 10), MAX_DELAY);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_clears_until_cancelled() {
        let cache = OidcCache::shared();
        let shutdown = CancellationToken::new();
        let interval = Duration::from_secs(300);
        let task = tokio::spawn(refresh(cache.clone(), interval, shutdown.clone()));

        cache.store("https://idp.example.com", OidcProviderConfig::default());
        time::sleep(interval + Duration::from_secs(1)).await;
        assert!(cache.is_empty());

        shutdown.cancel();
        task.await.expect("refresh task must not panic");

        cache.store("https://idp.example.com", OidcProviderConfig::default());
        time::sleep(interval * 2).await;
        assert_eq!(cache.len(), 1);
    }
}
