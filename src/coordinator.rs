//! Detection coordinator: cache policy, scan scheduling, badge state.
//!
//! The coordinator is the single consumer of the cross-context message
//! protocol. It serializes cache decisions per message, short-circuits
//! collection on fresh cache entries, and guarantees at most one
//! concurrent detection pass per page identity.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, OnceCell};
use tracing::{debug, info, warn};

use crate::cache::{normalize_url, persist_key, DetectionCache, PersistedEntry, PERSIST_PREFIX};
use crate::catalog::{CatalogLoader, RuleCatalog};
use crate::config::ScoutConfig;
use crate::engine::ScanEngine;
use crate::error::ScoutResult;
use crate::score::{badge_color, badge_text};
use crate::snapshot::{DetectionResult, PageSignalSnapshot};
use crate::storage::{CookieReader, KeyValueStore, Settings};

/// Channel to a page-context collector: the coordinator's only way to
/// request a snapshot. Delivery fails when the target context is torn
/// down.
#[async_trait]
pub trait PageDataChannel: Send + Sync {
    async fn request_page_data(&self) -> ScoutResult<PageSignalSnapshot>;
}

/// Cross-context message protocol. Imperative commands come from the
/// operator surface; data messages from the page contexts.
pub enum CoordinatorMessage {
    /// A page finished loading in a tab.
    PageLoaded {
        tab_id: u64,
        url: String,
        /// Replies with true when a fresh cache entry short-circuited
        /// collection.
        reply: Option<oneshot::Sender<bool>>,
    },
    /// Unsolicited snapshot push from a collector.
    PageData {
        tab_id: u64,
        snapshot: PageSignalSnapshot,
        reply: Option<oneshot::Sender<Vec<DetectionResult>>>,
    },
    /// Batched hook sightings from the relay.
    JsHookBatch { url: String, targets: Vec<String> },
    /// Forced re-scan for a URL.
    RunDetection {
        tab_id: u64,
        url: String,
        reply: Option<oneshot::Sender<Vec<DetectionResult>>>,
    },
    /// Query cached results for a URL.
    GetDetections {
        url: String,
        reply: oneshot::Sender<Vec<DetectionResult>>,
    },
    ClearCache {
        reply: Option<oneshot::Sender<()>>,
    },
    ToggleEnabled { enabled: bool },
}

/// Operator-facing badge for one tab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BadgeState {
    pub text: String,
    pub color: &'static str,
}

impl BadgeState {
    pub fn for_count(count: usize) -> Self {
        Self {
            text: badge_text(count),
            color: badge_color(count),
        }
    }
}

struct ScanOutcome {
    results: Vec<DetectionResult>,
    ok: bool,
}

impl ScanOutcome {
    fn failed() -> Self {
        Self {
            results: Vec::new(),
            ok: false,
        }
    }
}

pub struct Coordinator {
    catalog: Arc<CatalogLoader>,
    engine: ScanEngine,
    cache: DetectionCache,
    store: Arc<dyn KeyValueStore>,
    cookies: Arc<dyn CookieReader>,
    config: ScoutConfig,
    tabs: DashMap<u64, Arc<dyn PageDataChannel>>,
    badges: DashMap<u64, BadgeState>,
    /// At most one concurrent detection pass per page identity:
    /// concurrent lookups share the cell's single initializer.
    in_flight: DashMap<String, Arc<OnceCell<Arc<ScanOutcome>>>>,
}

impl Coordinator {
    pub fn new(
        catalog: Arc<CatalogLoader>,
        store: Arc<dyn KeyValueStore>,
        cookies: Arc<dyn CookieReader>,
        config: ScoutConfig,
    ) -> Self {
        let cache = DetectionCache::new(config.cache.ttl());
        Self {
            catalog,
            engine: ScanEngine::new(),
            cache,
            store,
            cookies,
            config,
            tabs: DashMap::new(),
            badges: DashMap::new(),
            in_flight: DashMap::new(),
        }
    }

    /// Register the collector channel for a tab. Replaces any previous
    /// channel (navigation tears the old context down).
    pub fn register_tab(&self, tab_id: u64, channel: Arc<dyn PageDataChannel>) {
        self.tabs.insert(tab_id, channel);
    }

    pub fn unregister_tab(&self, tab_id: u64) {
        self.tabs.remove(&tab_id);
        self.badges.remove(&tab_id);
    }

    pub fn badge(&self, tab_id: u64) -> Option<BadgeState> {
        self.badges.get(&tab_id).map(|b| b.clone())
    }

    pub fn cache(&self) -> &DetectionCache {
        &self.cache
    }

    async fn enabled(&self) -> bool {
        Settings::new(&*self.store).enabled().await
    }

    fn update_badge(&self, tab_id: u64, count: usize) {
        self.badges.insert(tab_id, BadgeState::for_count(count));
    }

    /// Single-consumer dispatch loop over the message protocol.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<CoordinatorMessage>) {
        while let Some(msg) = rx.recv().await {
            let coordinator = Arc::clone(&self);
            tokio::spawn(async move { coordinator.handle(msg).await });
        }
        debug!("Coordinator channel closed, dispatch loop ending");
    }

    async fn handle(&self, msg: CoordinatorMessage) {
        match msg {
            CoordinatorMessage::PageLoaded { tab_id, url, reply } => {
                let hit = self.page_loaded(tab_id, &url).await;
                if let Some(reply) = reply {
                    let _ = reply.send(hit);
                }
            }
            CoordinatorMessage::PageData {
                tab_id,
                snapshot,
                reply,
            } => {
                let results = self.page_data(tab_id, snapshot).await;
                if let Some(reply) = reply {
                    let _ = reply.send(results);
                }
            }
            CoordinatorMessage::JsHookBatch { url, targets } => {
                self.js_hook_batch(&url, &targets);
            }
            CoordinatorMessage::RunDetection { tab_id, url, reply } => {
                let results = self.run_detection(tab_id, &url).await;
                if let Some(reply) = reply {
                    let _ = reply.send(results);
                }
            }
            CoordinatorMessage::GetDetections { url, reply } => {
                let _ = reply.send(self.get_detections(&url).await);
            }
            CoordinatorMessage::ClearCache { reply } => {
                self.clear_cache().await;
                if let Some(reply) = reply {
                    let _ = reply.send(());
                }
            }
            CoordinatorMessage::ToggleEnabled { enabled } => {
                self.set_enabled(enabled).await;
            }
        }
    }

    /// Page-load handling: a fresh cache entry short-circuits page
    /// re-collection entirely; otherwise a collection pass is triggered.
    /// Returns whether the cache satisfied the load.
    pub async fn page_loaded(&self, tab_id: u64, url: &str) -> bool {
        if !self.enabled().await {
            return false;
        }
        let key = normalize_url(url);
        if let Some(results) = self.cache.fresh(&key) {
            debug!(url = %key, count = results.len(), "Cache hit on page load");
            self.update_badge(tab_id, results.len());
            return true;
        }
        let outcome = self.ensure_scan(tab_id, &key).await;
        self.update_badge(tab_id, outcome.results.len());
        false
    }

    /// Cached-or-scanned results for a page.
    pub async fn lookup(&self, tab_id: u64, url: &str) -> Vec<DetectionResult> {
        if !self.enabled().await {
            return Vec::new();
        }
        let key = normalize_url(url);
        if let Some(results) = self.cache.fresh(&key) {
            self.update_badge(tab_id, results.len());
            return results;
        }
        let outcome = self.ensure_scan(tab_id, &key).await;
        self.update_badge(tab_id, outcome.results.len());
        outcome.results.clone()
    }

    /// Run (or join) the detection pass for a page identity.
    async fn ensure_scan(&self, tab_id: u64, key: &str) -> Arc<ScanOutcome> {
        self.scan_guarded(key, self.collect_and_scan(tab_id, key))
            .await
    }

    /// At-most-one concurrent pass per page identity: when a pass for
    /// `key` is already in flight, `scan` is dropped unpolled and the
    /// caller awaits the existing pass instead.
    async fn scan_guarded(
        &self,
        key: &str,
        scan: impl std::future::Future<Output = ScanOutcome>,
    ) -> Arc<ScanOutcome> {
        let cell = self
            .in_flight
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let outcome = cell
            .get_or_init(|| async { Arc::new(scan.await) })
            .await
            .clone();

        self.in_flight.remove(key);
        outcome
    }

    /// Request a snapshot from the tab's collector and score it. A
    /// failed request is retried once after a short delay, then
    /// abandoned silently.
    async fn collect_and_scan(&self, tab_id: u64, key: &str) -> ScanOutcome {
        let Some(channel) = self.tabs.get(&tab_id).map(|c| Arc::clone(&c)) else {
            debug!(tab_id, "No collector channel registered");
            return ScanOutcome::failed();
        };

        let snapshot = match channel.request_page_data().await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                debug!(tab_id, error = %err, "Page data request failed, retrying once");
                tokio::time::sleep(self.config.channel.retry_delay()).await;
                match channel.request_page_data().await {
                    Ok(snapshot) => snapshot,
                    Err(err) => {
                        debug!(tab_id, error = %err, "Page data request failed again, giving up");
                        return ScanOutcome::failed();
                    }
                }
            }
        };

        ScanOutcome {
            results: self.scan_snapshot(key, snapshot).await,
            ok: true,
        }
    }

    /// Score a snapshot and store the result, overwriting any prior
    /// entry regardless of state.
    async fn scan_snapshot(&self, key: &str, mut snapshot: PageSignalSnapshot) -> Vec<DetectionResult> {
        if snapshot.cookies.is_empty() {
            snapshot.cookies = self.cookies.cookies_for_url(&snapshot.url).await;
        }
        // Fold in hook evidence that arrived ahead of this pass.
        for target in self.cache.accumulated_hooks(key) {
            snapshot.js_hook_hits.insert(target);
        }

        let catalog = match self.catalog.load().await {
            Ok(catalog) => catalog,
            Err(err) => {
                warn!(error = %err, "Catalog unavailable, scanning with zero detectors");
                Arc::new(RuleCatalog::empty())
            }
        };
        let show_fingerprinting = Settings::new(&*self.store).show_fingerprinting().await;

        let results = self
            .engine
            .evaluate(&snapshot, &catalog, show_fingerprinting);
        info!(
            url = %key,
            detections = results.len(),
            "Detection pass complete"
        );

        self.cache
            .store(key, results.clone(), snapshot.js_hook_hits.clone());
        if self.config.cache.persist {
            self.persist_entry(key, &results).await;
        }
        results
    }

    async fn persist_entry(&self, key: &str, results: &[DetectionResult]) {
        let entry = PersistedEntry::new(key, results);
        let value = match serde_json::to_value(&entry) {
            Ok(value) => value,
            Err(err) => {
                warn!(error = %err, "Failed to encode cache entry");
                return;
            }
        };
        if let Err(err) = self.store.set(&persist_key(key), value).await {
            warn!(error = %err, "Failed to persist cache entry");
        }
    }

    /// Unsolicited snapshot from a collector: scan and overwrite. A push
    /// for an identity with a pass already in flight joins that pass;
    /// the duplicate snapshot is discarded.
    pub async fn page_data(&self, tab_id: u64, snapshot: PageSignalSnapshot) -> Vec<DetectionResult> {
        if !self.enabled().await {
            return Vec::new();
        }
        let key = normalize_url(&snapshot.url);
        let scan = async {
            ScanOutcome {
                results: self.scan_snapshot(&key, snapshot).await,
                ok: true,
            }
        };
        let outcome = self.scan_guarded(&key, scan).await;
        self.update_badge(tab_id, outcome.results.len());
        outcome.results.clone()
    }

    /// Late hook evidence: merged into the entry without re-scoring.
    pub fn js_hook_batch(&self, url: &str, targets: &[String]) {
        let key = normalize_url(url);
        let added = self.cache.merge_hooks(&key, targets);
        if added > 0 {
            debug!(url = %key, added, "Merged hook batch into cache entry");
        }
    }

    /// Forced re-scan: the cached results are cleared before collection
    /// runs. Accumulated hook evidence survives the invalidation and is
    /// scored by the new pass.
    pub async fn run_detection(&self, tab_id: u64, url: &str) -> Vec<DetectionResult> {
        if !self.enabled().await {
            return Vec::new();
        }
        let key = normalize_url(url);
        self.cache.invalidate(&key);
        if let Err(err) = self.store.remove(&persist_key(&key)).await {
            warn!(error = %err, "Failed to remove persisted entry");
        }
        let outcome = self.ensure_scan(tab_id, &key).await;
        self.update_badge(tab_id, outcome.results.len());
        outcome.results.clone()
    }

    /// Cached results for a URL: fresh memory entry first, then a
    /// still-valid persisted entry, else empty.
    pub async fn get_detections(&self, url: &str) -> Vec<DetectionResult> {
        let key = normalize_url(url);
        if let Some(results) = self.cache.fresh(&key) {
            return results;
        }

        // Persisted entries honor the settings-driven TTL, which the
        // operator may have changed since the entry was written.
        let ttl_hours = Settings::new(&*self.store).cache_ttl_hours().await;
        let ttl = Duration::from_secs(ttl_hours * 3600);
        match self.store.get(&persist_key(&key)).await {
            Ok(Some(value)) => match serde_json::from_value::<PersistedEntry>(value) {
                Ok(entry) if entry.is_valid(ttl) => entry.results,
                Ok(_) => Vec::new(),
                Err(err) => {
                    warn!(error = %err, "Malformed persisted entry");
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(err) => {
                warn!(error = %err, "Persisted entry read failed");
                Vec::new()
            }
        }
    }

    /// Drop every cache entry, in memory and persisted.
    pub async fn clear_cache(&self) {
        self.cache.clear();
        match self.store.list_keys_with_prefix(PERSIST_PREFIX).await {
            Ok(keys) => {
                let count = keys.len();
                for key in keys {
                    if let Err(err) = self.store.remove(&key).await {
                        warn!(key = %key, error = %err, "Failed to remove persisted entry");
                    }
                }
                debug!(count, "Cleared persisted cache entries");
            }
            Err(err) => warn!(error = %err, "Failed to list persisted entries"),
        }
    }

    pub async fn set_enabled(&self, enabled: bool) {
        if let Err(err) = Settings::new(&*self.store).set_enabled(enabled).await {
            warn!(error = %err, "Failed to persist enabled flag");
        }
        info!(enabled, "Detection toggled");
    }
}

/// [`PageDataChannel`] over an in-process collector request channel:
/// sends a request and awaits the snapshot on a oneshot reply.
pub struct CollectorChannel {
    tx: mpsc::Sender<oneshot::Sender<PageSignalSnapshot>>,
}

impl CollectorChannel {
    pub fn new(tx: mpsc::Sender<oneshot::Sender<PageSignalSnapshot>>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl PageDataChannel for CollectorChannel {
    async fn request_page_data(&self) -> ScoutResult<PageSignalSnapshot> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(reply_tx)
            .await
            .map_err(|_| crate::error::ScoutError::Channel("collector gone".to_string()))?;
        reply_rx
            .await
            .map_err(|_| crate::error::ScoutError::Channel("collector dropped reply".to_string()))
    }
}

/// Hook-batch relay adapter: forwards flushed batches from a
/// [`crate::hooks::HookBatcher`] channel into the coordinator protocol.
pub async fn relay_hook_batches(
    mut rx: mpsc::Receiver<Vec<String>>,
    tx: mpsc::Sender<CoordinatorMessage>,
    url: String,
) {
    while let Some(targets) = rx.recv().await {
        let msg = CoordinatorMessage::JsHookBatch {
            url: url.clone(),
            targets,
        };
        if tx.send(msg).await.is_err() {
            debug!("Coordinator gone, stopping hook relay");
            return;
        }
    }
}
