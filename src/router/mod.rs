//! Cache strategy router
//!
//! Classifies each resource request into one of four strategies and serves
//! it from the content cache, the network, or a synthesized placeholder.
//!
//! | Request                                         | Strategy                      |
//! |-------------------------------------------------|-------------------------------|
//! | same-origin path listed in the app-shell manifest | cache-first                 |
//! | same-origin path under a content prefix         | network-first                 |
//! | image/style/font, asset extension, analytics host | stale-while-revalidate      |
//! | anything else                                   | network with cache fallback   |
//!
//! Non-GET requests bypass the cache. While the monitor reports offline the
//! network is skipped entirely.

pub mod fetch;
pub mod parallel;
pub mod placeholder;

#[cfg(test)]
pub(crate) mod mock;

use reqwest::{Method, Url};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

use crate::cache::{ContentCache, canonical_url, manifest_version};
use crate::clock::Clock;
use crate::config::RouteConfig;
use crate::monitor::ConnectivityMonitor;
use crate::store::CacheEntry;

pub use fetch::{FetchedResponse, Fetcher, HttpFetcher};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    CacheFirst,
    NetworkFirst,
    StaleWhileRevalidate,
    NetworkWithCacheFallback,
}

impl Strategy {
    /// Priority given to entries cached under this strategy (lower survives eviction longer)
    pub fn cache_priority(&self) -> u8 {
        match self {
            Strategy::CacheFirst => 0,
            Strategy::NetworkFirst => 1,
            Strategy::StaleWhileRevalidate => 2,
            Strategy::NetworkWithCacheFallback => 3,
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Strategy::CacheFirst => "cache-first",
            Strategy::NetworkFirst => "network-first",
            Strategy::StaleWhileRevalidate => "stale-while-revalidate",
            Strategy::NetworkWithCacheFallback => "network-with-cache-fallback",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
    Navigate,
    Other,
}

/// What the requester will do with the response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Document,
    Image,
    Style,
    Font,
    Script,
    Other,
}

#[derive(Debug, Clone)]
pub struct ResourceRequest {
    pub url: Url,
    pub method: Method,
    pub mode: RequestMode,
    pub destination: Destination,
}

impl ResourceRequest {
    pub fn get(url: Url) -> Self {
        Self {
            url,
            method: Method::GET,
            mode: RequestMode::Other,
            destination: Destination::Other,
        }
    }

    /// Mark as a top-level page navigation
    pub fn navigate(mut self) -> Self {
        self.mode = RequestMode::Navigate;
        self.destination = Destination::Document;
        self
    }

    pub fn with_destination(mut self, destination: Destination) -> Self {
        self.destination = destination;
        self
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseSource {
    Cache,
    Network,
    Placeholder,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterResponse {
    pub status: u16,
    pub body: Vec<u8>,
    pub content_type: Option<String>,
    pub source: ResponseSource,
}

impl RouterResponse {
    fn from_cache(entry: CacheEntry) -> Self {
        Self {
            status: entry.status,
            body: entry.payload,
            content_type: entry.content_type,
            source: ResponseSource::Cache,
        }
    }

    fn from_network(response: FetchedResponse) -> Self {
        Self {
            status: response.status,
            body: response.body,
            content_type: response.content_type,
            source: ResponseSource::Network,
        }
    }
}

/// Outcome of pre-caching the app-shell manifest
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PrecacheReport {
    pub fetched: usize,
    pub failed: usize,
}

pub struct Router {
    cache: Arc<ContentCache>,
    fetcher: Arc<dyn Fetcher>,
    monitor: ConnectivityMonitor,
    origin: Url,
    routes: RouteConfig,
    manifest_version: String,
    clock: Clock,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl Router {
    pub fn new(
        cache: Arc<ContentCache>,
        fetcher: Arc<dyn Fetcher>,
        monitor: ConnectivityMonitor,
        origin: Url,
        routes: RouteConfig,
        clock: Clock,
    ) -> Self {
        let manifest_version = manifest_version(&routes.manifest);
        Self {
            cache,
            fetcher,
            monitor,
            origin,
            routes,
            manifest_version,
            clock,
            background: Mutex::new(Vec::new()),
        }
    }

    pub fn manifest_version(&self) -> &str {
        &self.manifest_version
    }

    /// Pick the strategy for a GET request
    pub fn classify(&self, request: &ResourceRequest) -> Strategy {
        let url = &request.url;
        let path = url.path();
        let same_origin = url.origin() == self.origin.origin();

        if same_origin && self.routes.manifest.iter().any(|p| p == path) {
            return Strategy::CacheFirst;
        }

        if same_origin
            && self
                .routes
                .content_prefixes
                .iter()
                .any(|prefix| path.starts_with(prefix.as_str()))
        {
            return Strategy::NetworkFirst;
        }

        let asset_destination = matches!(
            request.destination,
            Destination::Image | Destination::Style | Destination::Font
        );
        let asset_extension = path
            .rsplit('/')
            .next()
            .and_then(|name| name.rsplit_once('.'))
            .map(|(_, ext)| {
                self.routes
                    .asset_extensions
                    .iter()
                    .any(|e| e.eq_ignore_ascii_case(ext))
            })
            .unwrap_or(false);
        let analytics_host = url
            .host_str()
            .map(|host| self.routes.analytics_hosts.iter().any(|h| h == host))
            .unwrap_or(false);

        if asset_destination || asset_extension || analytics_host {
            return Strategy::StaleWhileRevalidate;
        }

        Strategy::NetworkWithCacheFallback
    }

    /// Serve a request. Never fails: the last resort is a placeholder.
    pub async fn handle(&self, request: ResourceRequest) -> RouterResponse {
        if request.method != Method::GET {
            log::debug!("{} {} bypasses the cache", request.method, request.url);
            return self.passthrough(&request).await;
        }

        let key = canonical_url(request.url.clone()).to_string();
        let strategy = self.classify(&request);
        log::debug!("GET {} -> {}", key, strategy);

        match strategy {
            Strategy::CacheFirst => self.cache_first(&request, &key).await,
            Strategy::NetworkFirst | Strategy::NetworkWithCacheFallback => {
                self.network_then_cache(&request, &key, strategy).await
            }
            Strategy::StaleWhileRevalidate => self.stale_while_revalidate(&request, &key).await,
        }
    }

    async fn passthrough(&self, request: &ResourceRequest) -> RouterResponse {
        if !self.monitor.is_online() {
            return placeholder::for_request(request);
        }
        match self.fetcher.fetch(request).await {
            Ok(response) => RouterResponse::from_network(response),
            Err(e) => {
                log::warn!("{} {} failed: {}", request.method, request.url, e);
                placeholder::for_request(request)
            }
        }
    }

    async fn cache_first(&self, request: &ResourceRequest, key: &str) -> RouterResponse {
        let cached = self.cached(key);
        if let Some(entry) = &cached {
            if entry.manifest_version.as_deref() == Some(self.manifest_version.as_str()) {
                return RouterResponse::from_cache(entry.clone());
            }
            log::debug!("Shell entry {} predates manifest {}", key, self.manifest_version);
        }

        if !self.monitor.is_online() {
            return self.cached_or_placeholder(cached, request);
        }

        match self.fetcher.fetch(request).await {
            Ok(response) if response.is_success() => {
                self.store(key, &response, Strategy::CacheFirst);
                RouterResponse::from_network(response)
            }
            Ok(response) => cached
                .map(RouterResponse::from_cache)
                .unwrap_or_else(|| RouterResponse::from_network(response)),
            Err(e) => {
                log::warn!("Fetching shell resource {} failed: {}", key, e);
                self.cached_or_placeholder(cached, request)
            }
        }
    }

    async fn network_then_cache(
        &self,
        request: &ResourceRequest,
        key: &str,
        strategy: Strategy,
    ) -> RouterResponse {
        if !self.monitor.is_online() {
            return self.cached_or_placeholder(self.cached(key), request);
        }

        match self.fetcher.fetch(request).await {
            Ok(response) if response.is_success() => {
                self.store(key, &response, strategy);
                RouterResponse::from_network(response)
            }
            Ok(response) => {
                log::debug!("{} answered {}, falling back to cache", key, response.status);
                self.cached_or_placeholder(self.cached(key), request)
            }
            Err(e) => {
                log::debug!("{} failed ({}), falling back to cache", key, e);
                self.cached_or_placeholder(self.cached(key), request)
            }
        }
    }

    async fn stale_while_revalidate(&self, request: &ResourceRequest, key: &str) -> RouterResponse {
        if let Some(entry) = self.cached(key) {
            if self.monitor.is_online() {
                self.revalidate(request.clone(), key.to_string());
            }
            return RouterResponse::from_cache(entry);
        }

        if !self.monitor.is_online() {
            return placeholder::for_request(request);
        }

        match self.fetcher.fetch(request).await {
            Ok(response) => {
                if response.is_success() {
                    self.store(key, &response, Strategy::StaleWhileRevalidate);
                }
                RouterResponse::from_network(response)
            }
            Err(e) => {
                log::debug!("{} failed with nothing cached: {}", key, e);
                placeholder::for_request(request)
            }
        }
    }

    /// Refresh `key` in the background
    fn revalidate(&self, request: ResourceRequest, key: String) {
        let cache = self.cache.clone();
        let fetcher = self.fetcher.clone();
        let clock = self.clock.clone();

        let handle = tokio::spawn(async move {
            match fetcher.fetch(&request).await {
                Ok(response) if response.is_success() => {
                    let entry = cache_entry(
                        &key,
                        &response,
                        Strategy::StaleWhileRevalidate,
                        None,
                        &clock,
                    );
                    match cache.put(&entry) {
                        Ok(()) => log::debug!("Revalidated {}", key),
                        Err(e) => log::warn!("Failed to store revalidated {}: {}", key, e),
                    }
                }
                Ok(response) => log::debug!("Revalidating {} got {}", key, response.status),
                Err(e) => log::debug!("Revalidating {} failed: {}", key, e),
            }
        });

        if let Ok(mut background) = self.background.lock() {
            background.retain(|h| !h.is_finished());
            background.push(handle);
        }
    }

    /// Wait for every background revalidation started so far
    pub async fn settle(&self) {
        let handles = match self.background.lock() {
            Ok(mut background) => std::mem::take(&mut *background),
            Err(_) => return,
        };
        for handle in handles {
            let _ = handle.await;
        }
    }

    /// Fetch and store every app-shell entry under the current manifest version
    pub async fn precache(&self) -> PrecacheReport {
        let mut report = PrecacheReport::default();
        if !self.monitor.is_online() {
            log::warn!("Offline, skipping pre-cache");
            report.failed = self.routes.manifest.len();
            return report;
        }

        let mut requests = Vec::new();
        for path in &self.routes.manifest {
            match self.origin.join(path) {
                Ok(url) => requests.push(ResourceRequest::get(url)),
                Err(e) => {
                    log::warn!("Skipping manifest entry '{}': {}", path, e);
                    report.failed += 1;
                }
            }
        }

        let fetcher = self.fetcher.clone();
        let results = parallel::run_bounded(
            requests,
            |request| {
                let fetcher = fetcher.clone();
                async move {
                    let result = fetcher.fetch(&request).await;
                    (request, result)
                }
            },
            self.routes.precache_concurrency,
        )
        .await;

        for (request, result) in results {
            let key = canonical_url(request.url.clone()).to_string();
            match result {
                Ok(response) if response.is_success() => {
                    if self.store(&key, &response, Strategy::CacheFirst) {
                        report.fetched += 1;
                    } else {
                        report.failed += 1;
                    }
                }
                Ok(response) => {
                    log::warn!("Pre-cache {} answered {}", key, response.status);
                    report.failed += 1;
                }
                Err(e) => {
                    log::warn!("Pre-cache {} failed: {}", key, e);
                    report.failed += 1;
                }
            }
        }

        log::info!(
            "Pre-cached {} of {} shell entries (manifest {})",
            report.fetched,
            self.routes.manifest.len(),
            self.manifest_version
        );
        report
    }

    fn cached(&self, key: &str) -> Option<CacheEntry> {
        match self.cache.get(key) {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("Cache read for {} failed: {}", key, e);
                None
            }
        }
    }

    fn cached_or_placeholder(
        &self,
        cached: Option<CacheEntry>,
        request: &ResourceRequest,
    ) -> RouterResponse {
        cached
            .map(RouterResponse::from_cache)
            .unwrap_or_else(|| placeholder::for_request(request))
    }

    /// Write a successful response to the cache; `false` if the write failed
    fn store(&self, key: &str, response: &FetchedResponse, strategy: Strategy) -> bool {
        let version = (strategy == Strategy::CacheFirst).then(|| self.manifest_version.clone());
        let entry = cache_entry(key, response, strategy, version, &self.clock);
        match self.cache.put(&entry) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Failed to cache {}: {}", key, e);
                false
            }
        }
    }
}

fn cache_entry(
    key: &str,
    response: &FetchedResponse,
    strategy: Strategy,
    manifest_version: Option<String>,
    clock: &Clock,
) -> CacheEntry {
    let mut entry = CacheEntry::new(
        key,
        response.body.clone(),
        response.content_type.clone(),
        response.status,
        strategy.cache_priority(),
        clock(),
    );
    entry.manifest_version = manifest_version;
    entry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::NetworkError;
    use crate::events::EventBus;
    use crate::store::{MemoryStore, ObjectStore};
    use chrono::{TimeZone, Utc};
    use mock::MockFetcher;
    use std::time::Duration;

    const ORIGIN: &str = "https://learn.example.com/";

    struct Fixture {
        router: Router,
        cache: Arc<ContentCache>,
        fetcher: Arc<MockFetcher>,
        monitor: ConnectivityMonitor,
        clock: ManualClock,
    }

    fn fixture_with(routes: RouteConfig) -> Fixture {
        let events = EventBus::new();
        let store = Arc::new(ObjectStore::open(Arc::new(MemoryStore::new(1 << 20))).unwrap());
        let clock = ManualClock::starting_at(Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap());
        let cache = Arc::new(ContentCache::new(store, clock.as_clock(), events.clone()));
        let fetcher = Arc::new(MockFetcher::new());
        let monitor =
            ConnectivityMonitor::new(Duration::from_secs(120), Duration::from_secs(600), events);
        let router = Router::new(
            cache.clone(),
            fetcher.clone(),
            monitor.clone(),
            Url::parse(ORIGIN).unwrap(),
            routes,
            clock.as_clock(),
        );
        Fixture {
            router,
            cache,
            fetcher,
            monitor,
            clock,
        }
    }

    fn fixture() -> Fixture {
        let mut routes = RouteConfig::default();
        routes.analytics_hosts = vec!["stats.example.net".to_string()];
        fixture_with(routes)
    }

    fn url(path: &str) -> String {
        format!("https://learn.example.com{}", path)
    }

    fn get(path: &str) -> ResourceRequest {
        ResourceRequest::get(Url::parse(&url(path)).unwrap())
    }

    fn seed(f: &Fixture, key: &str, body: &str, priority: u8, version: Option<String>) {
        let mut entry = CacheEntry::new(
            key,
            body.as_bytes().to_vec(),
            None,
            200,
            priority,
            f.clock.now(),
        );
        entry.manifest_version = version;
        f.cache.put(&entry).unwrap();
    }

    #[test]
    fn test_classification_precedence() {
        let f = fixture();
        assert_eq!(f.router.classify(&get("/app.js")), Strategy::CacheFirst);
        assert_eq!(f.router.classify(&get("/training/7")), Strategy::NetworkFirst);
        assert_eq!(f.router.classify(&get("/content/x.png")), Strategy::NetworkFirst);
        assert_eq!(
            f.router.classify(&get("/img/logo.PNG")),
            Strategy::StaleWhileRevalidate
        );
        assert_eq!(
            f.router
                .classify(&get("/avatar").with_destination(Destination::Image)),
            Strategy::StaleWhileRevalidate
        );
        assert_eq!(
            f.router.classify(&ResourceRequest::get(
                Url::parse("https://stats.example.net/collect.js").unwrap()
            )),
            Strategy::StaleWhileRevalidate
        );
        assert_eq!(
            f.router.classify(&get("/api/user")),
            Strategy::NetworkWithCacheFallback
        );
    }

    #[test]
    fn test_manifest_paths_on_other_origins_are_not_shell() {
        let f = fixture();
        let request = ResourceRequest::get(Url::parse("https://other.example.com/app.js").unwrap());
        assert_eq!(f.router.classify(&request), Strategy::NetworkWithCacheFallback);
    }

    #[tokio::test]
    async fn test_cache_first_hit_skips_network() {
        let f = fixture();
        let version = f.router.manifest_version().to_string();
        seed(&f, &url("/app.js"), "cached js", 0, Some(version));

        let resp = f.router.handle(get("/app.js")).await;
        assert_eq!(resp.source, ResponseSource::Cache);
        assert_eq!(resp.body, b"cached js");
        assert_eq!(f.fetcher.call_count(), 0);
    }

    #[tokio::test]
    async fn test_cache_first_refetches_on_manifest_change() {
        let f = fixture();
        seed(&f, &url("/app.js"), "old js", 0, Some("0000000000000000".into()));
        f.fetcher.respond(&url("/app.js"), 200, "new js");

        let resp = f.router.handle(get("/app.js")).await;
        assert_eq!(resp.source, ResponseSource::Network);
        assert_eq!(resp.body, b"new js");

        let stored = f.cache.peek(&url("/app.js")).unwrap().unwrap();
        assert_eq!(stored.payload, b"new js");
        assert_eq!(stored.priority, 0);
        assert_eq!(
            stored.manifest_version.as_deref(),
            Some(f.router.manifest_version())
        );

        // Now current; second request is a pure cache hit
        f.router.handle(get("/app.js")).await;
        assert_eq!(f.fetcher.call_count(), 1);
    }

    #[tokio::test]
    async fn test_network_first_success_overwrites_cache() {
        let f = fixture();
        seed(&f, &url("/training/1"), "stale", 1, None);
        f.fetcher.respond(&url("/training/1"), 200, "fresh");

        let resp = f.router.handle(get("/training/1")).await;
        assert_eq!(resp.body, b"fresh");
        let stored = f.cache.peek(&url("/training/1")).unwrap().unwrap();
        assert_eq!(stored.payload, b"fresh");
        assert_eq!(stored.priority, 1);
    }

    #[tokio::test]
    async fn test_network_first_500_falls_back_to_cache() {
        let f = fixture();
        seed(&f, &url("/training/1"), "stale", 1, None);
        f.fetcher.respond(&url("/training/1"), 500, "oops");

        let resp = f.router.handle(get("/training/1")).await;
        assert_eq!(resp.source, ResponseSource::Cache);
        assert_eq!(resp.body, b"stale");
    }

    #[tokio::test]
    async fn test_network_first_500_without_cache_is_placeholder() {
        let f = fixture();
        f.fetcher.respond(&url("/training/2"), 500, "oops");

        let resp = f.router.handle(get("/training/2").navigate()).await;
        assert_eq!(resp.source, ResponseSource::Placeholder);
        assert_eq!(resp.status, 200);
        assert!(f.cache.peek(&url("/training/2")).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_network_first_timeout_falls_back() {
        let f = fixture();
        seed(&f, &url("/content/a"), "cached", 1, None);
        f.fetcher
            .fail_all(NetworkError::Timeout(Some(Duration::from_secs(10))));

        let resp = f.router.handle(get("/content/a")).await;
        assert_eq!(resp.body, b"cached");
    }

    #[tokio::test]
    async fn test_stale_while_revalidate_serves_cache_then_updates() {
        let f = fixture();
        seed(&f, &url("/img/logo.png"), "v1", 2, None);
        f.fetcher.respond(&url("/img/logo.png"), 200, "v2");

        let resp = f.router.handle(get("/img/logo.png")).await;
        assert_eq!(resp.source, ResponseSource::Cache);
        assert_eq!(resp.body, b"v1");

        f.router.settle().await;
        let stored = f.cache.peek(&url("/img/logo.png")).unwrap().unwrap();
        assert_eq!(stored.payload, b"v2");
        assert_eq!(f.fetcher.calls_for(&url("/img/logo.png")), 1);
    }

    #[tokio::test]
    async fn test_stale_while_revalidate_miss_blocks_on_network() {
        let f = fixture();
        f.fetcher.respond(&url("/img/new.png"), 200, "img");

        let resp = f.router.handle(get("/img/new.png")).await;
        assert_eq!(resp.source, ResponseSource::Network);
        assert!(f.cache.peek(&url("/img/new.png")).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_stale_while_revalidate_failed_refresh_keeps_cache() {
        let f = fixture();
        seed(&f, &url("/style/site.css"), "css", 2, None);
        f.fetcher.fail_all(NetworkError::Offline);

        let resp = f.router.handle(get("/style/site.css")).await;
        assert_eq!(resp.body, b"css");
        f.router.settle().await;
        assert_eq!(f.cache.peek(&url("/style/site.css")).unwrap().unwrap().payload, b"css");
    }

    #[tokio::test]
    async fn test_fallback_uses_exact_key() {
        let f = fixture();
        seed(&f, &url("/api/user?a=1&b=2"), "me", 3, None);
        f.fetcher.fail_all(NetworkError::Transport("reset".into()));

        let resp = f.router.handle(get("/api/user?b=2&a=1#frag")).await;
        assert_eq!(resp.source, ResponseSource::Cache);

        let resp = f.router.handle(get("/api/user?a=2")).await;
        assert_eq!(resp.source, ResponseSource::Placeholder);
        assert_eq!(resp.status, 503);
    }

    #[tokio::test]
    async fn test_offline_skips_network() {
        let f = fixture();
        seed(&f, &url("/training/1"), "cached", 1, None);
        f.monitor.set_online(false);

        let resp = f.router.handle(get("/training/1")).await;
        assert_eq!(resp.body, b"cached");

        let resp = f
            .router
            .handle(get("/img/none.png").with_destination(Destination::Image))
            .await;
        assert_eq!(resp.content_type.as_deref(), Some("image/svg+xml"));
        assert_eq!(f.fetcher.call_count(), 0);
    }

    #[tokio::test]
    async fn test_non_get_bypasses_cache() {
        let f = fixture();
        f.fetcher.respond(&url("/training/1"), 201, "created");

        let resp = f
            .router
            .handle(get("/training/1").with_method(Method::POST))
            .await;
        assert_eq!(resp.status, 201);
        assert!(f.cache.peek(&url("/training/1")).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_precache_counts_failures() {
        let mut routes = RouteConfig::default();
        routes.manifest = vec!["/".into(), "/app.js".into(), "/missing.css".into()];
        let f = fixture_with(routes);
        f.fetcher.respond(&url("/"), 200, "<html>");
        f.fetcher.respond(&url("/app.js"), 200, "js");

        let report = f.router.precache().await;
        assert_eq!(report, PrecacheReport { fetched: 2, failed: 1 });

        let shell = f.cache.peek(&url("/app.js")).unwrap().unwrap();
        assert_eq!(
            shell.manifest_version.as_deref(),
            Some(f.router.manifest_version())
        );
    }
}
