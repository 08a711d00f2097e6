//! Integration tests for the ShieldScout detection engine.
//!
//! These tests exercise the complete pipeline: catalog loading from
//! disk, signal collection, scan evaluation, scoring, caching, and the
//! coordinator protocol.

use async_trait::async_trait;
use serde_json::json;
use shieldscout::cache::normalize_url;
use shieldscout::catalog::{Rule, TextMatch};
use shieldscout::collector::{SignalCollector, StaticPage};
use shieldscout::config::CollectorConfig;
use shieldscout::coordinator::{Coordinator, CoordinatorMessage, PageDataChannel};
use shieldscout::hooks::{HookBatcher, HookObserver};
use shieldscout::snapshot::NamedValue;
use shieldscout::storage::{MemoryStore, NoCookies, StaticCookies};
use shieldscout::{
    aggregate, CatalogLoader, Category, ConfidenceLevel, FsCatalogSource, PageSignalSnapshot,
    RuleCatalog, ScanEngine, ScoutConfig, ScoutResult,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{mpsc, oneshot};

// =============================================================================
// Test catalog fixtures
// =============================================================================

/// Write a small but representative detector catalog to disk.
fn write_catalog(dir: &TempDir) {
    let root = dir.path();
    std::fs::write(
        root.join("index.json"),
        serde_json::to_string(&json!({
            "categories": {
                "antibot": {"detectors": ["cloudflare", "akamai"]},
                "captcha": {"detectors": ["recaptcha"]},
                "fingerprint": {"detectors": ["fingerprintjs"]},
                "tags": {"ignored": true}
            }
        }))
        .unwrap(),
    )
    .unwrap();

    let antibot = root.join("antibot");
    std::fs::create_dir_all(&antibot).unwrap();
    std::fs::write(
        antibot.join("detect-cloudflare.json"),
        serde_json::to_string(&json!({
            "detector": {"id": "cloudflare", "label": "Cloudflare", "type": "antibot"},
            "meta": {"vendorUrl": "https://www.cloudflare.com/"},
            "patterns": {
                "cookies": [{"match": "__cf_bm", "score": 90}],
                "urls": [{"match": "/cdn-cgi/challenge-platform/", "score": 85}],
                "globals": [{"match": "_cf_chl_opt", "score": 95}]
            }
        }))
        .unwrap(),
    )
    .unwrap();
    std::fs::write(
        antibot.join("detect-akamai.json"),
        serde_json::to_string(&json!({
            "detector": {"id": "akamai", "label": "Akamai Bot Manager"},
            "patterns": {"cookies": [{"match": "_abck", "score": 90}]}
        }))
        .unwrap(),
    )
    .unwrap();

    let captcha = root.join("captcha");
    std::fs::create_dir_all(&captcha).unwrap();
    std::fs::write(
        captcha.join("detect-recaptcha.json"),
        serde_json::to_string(&json!({
            "detector": {"id": "recaptcha", "label": "reCAPTCHA", "type": "captcha"},
            "patterns": {
                "dom": [{"match": ".g-recaptcha", "score": 85}],
                "urls": [{"match": "recaptcha/api.js", "score": 85}]
            }
        }))
        .unwrap(),
    )
    .unwrap();

    let fingerprint = root.join("fingerprint");
    std::fs::create_dir_all(&fingerprint).unwrap();
    std::fs::write(
        fingerprint.join("detect-fingerprintjs.json"),
        serde_json::to_string(&json!({
            "detector": {"id": "fingerprintjs", "label": "FingerprintJS", "type": "fingerprint"},
            "patterns": {
                "jsHooks": [{"target": "HTMLCanvasElement.prototype.toDataURL", "score": 70}]
            }
        }))
        .unwrap(),
    )
    .unwrap();
}

fn protected_page() -> StaticPage {
    StaticPage {
        url: "https://shop.example.com/checkout".to_string(),
        html: "<html><body><div class=\"g-recaptcha\"></div></body></html>".to_string(),
        inline_scripts: Vec::new(),
        scripts: vec!["https://www.google.com/recaptcha/api.js".to_string()],
        selectors: vec![".g-recaptcha".to_string()],
        globals: vec!["_cf_chl_opt".to_string()],
        cookies: vec![NamedValue::new("__cf_bm", "opaque-value")],
        headers: Vec::new(),
    }
}

/// Channel serving a fixed snapshot assembled from a page dump.
struct DumpChannel {
    snapshot: PageSignalSnapshot,
}

#[async_trait]
impl PageDataChannel for DumpChannel {
    async fn request_page_data(&self) -> ScoutResult<PageSignalSnapshot> {
        Ok(self.snapshot.clone())
    }
}

fn assemble(page: StaticPage) -> PageSignalSnapshot {
    let cookies = page.cookies.clone();
    let collector = SignalCollector::new(page, CollectorConfig::default());
    collector.check_globals();
    collector.assemble(cookies)
}

// =============================================================================
// Catalog loading
// =============================================================================

#[tokio::test]
async fn test_fs_catalog_loads_all_categories() {
    let dir = TempDir::new().unwrap();
    write_catalog(&dir);

    let loader = CatalogLoader::new(Arc::new(FsCatalogSource::new(dir.path())));
    let catalog = loader.load().await.unwrap();

    assert_eq!(catalog.len(), 4);
    assert_eq!(catalog.get("cloudflare").unwrap().category, Category::Antibot);
    assert_eq!(catalog.get("recaptcha").unwrap().category, Category::Captcha);
    assert_eq!(
        catalog.get("fingerprintjs").unwrap().category,
        Category::Fingerprint
    );
    // Enumeration groups by category in stable order.
    let categories: Vec<_> = catalog.enumerate().iter().map(|d| d.category).collect();
    let mut sorted = categories.clone();
    sorted.sort_by_key(|c| Category::ALL.iter().position(|x| x == c));
    assert_eq!(categories, sorted);
}

#[tokio::test]
async fn test_missing_detector_file_is_skipped_not_fatal() {
    let dir = TempDir::new().unwrap();
    write_catalog(&dir);
    std::fs::remove_file(dir.path().join("antibot/detect-akamai.json")).unwrap();

    let loader = CatalogLoader::new(Arc::new(FsCatalogSource::new(dir.path())));
    let catalog = loader.load().await.unwrap();

    assert_eq!(catalog.len(), 3);
    assert!(catalog.get("akamai").is_none());
    assert!(catalog.get("cloudflare").is_some());
}

// =============================================================================
// Full scan pipeline
// =============================================================================

#[tokio::test]
async fn test_end_to_end_scan_of_protected_page() {
    let dir = TempDir::new().unwrap();
    write_catalog(&dir);

    let loader = Arc::new(CatalogLoader::new(Arc::new(FsCatalogSource::new(dir.path()))));
    let coordinator = Coordinator::new(
        loader,
        Arc::new(MemoryStore::new()),
        Arc::new(NoCookies),
        ScoutConfig::default(),
    );

    let results = coordinator.page_data(1, assemble(protected_page())).await;

    // Cloudflare: cookie 90 + global 95, boost 4 -> 99.
    // reCAPTCHA: dom 85 + url 85, boost 4 -> 89.
    let ids: Vec<_> = results.iter().map(|r| r.detector_id.as_str()).collect();
    assert_eq!(ids, vec!["cloudflare", "recaptcha"]);
    assert_eq!(results[0].confidence, 99);
    assert_eq!(results[1].confidence, 89);

    let summary = aggregate(&results);
    assert_eq!(summary.total, 2);
    assert_eq!(summary.antibot, 1);
    assert_eq!(summary.captcha, 1);
    assert_eq!(summary.high_confidence, 2);
    assert_eq!(summary.average_confidence, 94);

    let badge = coordinator.badge(1).unwrap();
    assert_eq!(badge.text, "2");
    assert_eq!(badge.color, "#FFA500");
}

#[tokio::test]
async fn test_single_cookie_scores_ninety_two() {
    let dir = TempDir::new().unwrap();
    write_catalog(&dir);

    let loader = Arc::new(CatalogLoader::new(Arc::new(FsCatalogSource::new(dir.path()))));
    let coordinator = Coordinator::new(
        loader,
        Arc::new(MemoryStore::new()),
        Arc::new(NoCookies),
        ScoutConfig::default(),
    );

    let mut snapshot = PageSignalSnapshot::new("https://example.com/");
    snapshot.cookies.push(NamedValue::new("__cf_bm", "x"));
    let results = coordinator.page_data(1, snapshot).await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].confidence, 92);
    assert_eq!(
        ConfidenceLevel::from_score(results[0].confidence),
        ConfidenceLevel::High
    );
}

#[tokio::test]
async fn test_clean_page_yields_no_detections() {
    let dir = TempDir::new().unwrap();
    write_catalog(&dir);

    let loader = Arc::new(CatalogLoader::new(Arc::new(FsCatalogSource::new(dir.path()))));
    let coordinator = Coordinator::new(
        loader,
        Arc::new(MemoryStore::new()),
        Arc::new(NoCookies),
        ScoutConfig::default(),
    );

    let snapshot = PageSignalSnapshot::new("https://clean.example.org/");
    let results = coordinator.page_data(1, snapshot).await;
    assert!(results.is_empty());

    let badge = coordinator.badge(1).unwrap();
    assert_eq!(badge.text, "");
    assert_eq!(badge.color, "#4CAF50");
}

#[tokio::test]
async fn test_cookies_filled_from_reader_when_absent() {
    let dir = TempDir::new().unwrap();
    write_catalog(&dir);

    let loader = Arc::new(CatalogLoader::new(Arc::new(FsCatalogSource::new(dir.path()))));
    let coordinator = Coordinator::new(
        loader,
        Arc::new(MemoryStore::new()),
        Arc::new(StaticCookies(vec![NamedValue::new("_abck", "token")])),
        ScoutConfig::default(),
    );

    let snapshot = PageSignalSnapshot::new("https://example.com/");
    let results = coordinator.page_data(1, snapshot).await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].detector_id, "akamai");
}

// =============================================================================
// Match modes
// =============================================================================

fn content_detector(id: &str, text: TextMatch) -> RuleCatalog {
    RuleCatalog::from_definitions(vec![shieldscout::catalog::DetectorDefinition {
        id: id.to_string(),
        display_name: id.to_string(),
        category: Category::Antibot,
        enabled: true,
        base_confidence: 80,
        website: None,
        description: None,
        rules: vec![Rule::Content {
            text,
            confidence: 80,
            note: String::new(),
        }],
    }])
}

#[test]
fn test_substring_match_is_case_insensitive_by_default() {
    let catalog = content_detector("cf", TextMatch::plain("Challenge-Platform"));
    let mut snapshot = PageSignalSnapshot::new("https://example.com/");
    snapshot.html_excerpt = "src=/cdn-cgi/challenge-platform/h/b".to_string();

    assert_eq!(ScanEngine::new().evaluate(&snapshot, &catalog, true).len(), 1);
}

#[test]
fn test_whole_word_match_rejects_substrings() {
    let catalog = content_detector(
        "bot",
        TextMatch {
            pattern: "bot".to_string(),
            whole_word: true,
            ..Default::default()
        },
    );
    let engine = ScanEngine::new();

    let mut snapshot = PageSignalSnapshot::new("https://example.com/");
    snapshot.html_excerpt = "visit our robotics lab".to_string();
    assert!(engine.evaluate(&snapshot, &catalog, true).is_empty());

    snapshot.html_excerpt = "are you a bot?".to_string();
    assert_eq!(engine.evaluate(&snapshot, &catalog, true).len(), 1);
}

#[test]
fn test_regex_match_and_invalid_regex_never_matches() {
    let engine = ScanEngine::new();

    let catalog = content_detector(
        "re",
        TextMatch {
            pattern: r"cf_chl_\d+".to_string(),
            is_regex: true,
            ..Default::default()
        },
    );
    let mut snapshot = PageSignalSnapshot::new("https://example.com/");
    snapshot.html_excerpt = "window.cf_chl_42 = 1".to_string();
    assert_eq!(engine.evaluate(&snapshot, &catalog, true).len(), 1);

    // A malformed pattern is treated as a non-match, not an error.
    let broken = content_detector(
        "broken",
        TextMatch {
            pattern: "[unclosed".to_string(),
            is_regex: true,
            ..Default::default()
        },
    );
    assert!(engine.evaluate(&snapshot, &broken, true).is_empty());
}

// =============================================================================
// Scoring bounds
// =============================================================================

#[test]
fn test_confidence_never_exceeds_one_hundred() {
    let rules: Vec<Rule> = (0..30)
        .map(|i| Rule::Content {
            text: TextMatch::plain(format!("token{i}")),
            confidence: 95,
            note: String::new(),
        })
        .collect();
    let catalog = RuleCatalog::from_definitions(vec![shieldscout::catalog::DetectorDefinition {
        id: "many".to_string(),
        display_name: "many".to_string(),
        category: Category::Antibot,
        enabled: true,
        base_confidence: 80,
        website: None,
        description: None,
        rules,
    }]);

    let mut snapshot = PageSignalSnapshot::new("https://example.com/");
    snapshot.html_excerpt = (0..30).map(|i| format!("token{i} ")).collect();

    let results = ScanEngine::new().evaluate(&snapshot, &catalog, true);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].confidence, 100);
    assert_eq!(results[0].matches.len(), 30);
}

// =============================================================================
// Cache behavior
// =============================================================================

#[tokio::test]
async fn test_cache_hit_short_circuits_collection() {
    let dir = TempDir::new().unwrap();
    write_catalog(&dir);

    let loader = Arc::new(CatalogLoader::new(Arc::new(FsCatalogSource::new(dir.path()))));
    let coordinator = Coordinator::new(
        loader,
        Arc::new(MemoryStore::new()),
        Arc::new(NoCookies),
        ScoutConfig::default(),
    );
    coordinator.register_tab(
        1,
        Arc::new(DumpChannel {
            snapshot: assemble(protected_page()),
        }),
    );

    // First load scans; second load for the same identity (modulo
    // fragment and trailing slash) is a pure cache hit.
    assert!(!coordinator.page_loaded(1, "https://shop.example.com/checkout").await);
    assert!(coordinator.page_loaded(1, "https://shop.example.com/checkout/#step2").await);

    let results = coordinator
        .get_detections("https://shop.example.com/checkout")
        .await;
    assert_eq!(results.len(), 2);
}

#[tokio::test]
async fn test_hook_batch_merges_and_forced_rescan_scores_it() {
    let dir = TempDir::new().unwrap();
    write_catalog(&dir);

    let loader = Arc::new(CatalogLoader::new(Arc::new(FsCatalogSource::new(dir.path()))));
    let coordinator = Coordinator::new(
        loader,
        Arc::new(MemoryStore::new()),
        Arc::new(NoCookies),
        ScoutConfig::default(),
    );
    let mut snapshot = PageSignalSnapshot::new("https://example.com/app");
    snapshot.cookies.push(NamedValue::new("__cf_bm", "x"));
    coordinator.register_tab(1, Arc::new(DumpChannel { snapshot }));

    let before = coordinator.lookup(1, "https://example.com/app").await;
    assert_eq!(before.len(), 1);

    // Late canvas hook evidence: merged without re-scoring.
    coordinator.js_hook_batch(
        "https://example.com/app",
        &["HTMLCanvasElement.prototype.toDataURL".to_string()],
    );
    let cached = coordinator.get_detections("https://example.com/app").await;
    assert_eq!(cached, before);
    assert!(
        coordinator
            .cache()
            .entry("https://example.com/app")
            .unwrap()
            .rescan_eligible
    );

    // A forced rescan folds the hooks in and now sees FingerprintJS.
    let after = coordinator.run_detection(1, "https://example.com/app").await;
    assert_eq!(after.len(), 2);
    assert!(after.iter().any(|r| r.detector_id == "fingerprintjs"));
}

#[test]
fn test_url_normalization_for_page_identity() {
    assert_eq!(
        normalize_url("https://a.example/x/#frag"),
        normalize_url("https://a.example/x")
    );
    // Query strings are part of the identity.
    assert_ne!(
        normalize_url("https://a.example/x?p=1"),
        normalize_url("https://a.example/x")
    );
}

// =============================================================================
// Settings and fingerprint suppression
// =============================================================================

#[tokio::test]
async fn test_fingerprint_results_suppressed_by_setting() {
    let dir = TempDir::new().unwrap();
    write_catalog(&dir);

    let store = Arc::new(MemoryStore::new());
    use shieldscout::storage::{KeyValueStore, KEY_SHOW_FINGERPRINTING};
    store
        .set(KEY_SHOW_FINGERPRINTING, json!(false))
        .await
        .unwrap();

    let loader = Arc::new(CatalogLoader::new(Arc::new(FsCatalogSource::new(dir.path()))));
    let coordinator = Coordinator::new(loader, store, Arc::new(NoCookies), ScoutConfig::default());

    let mut snapshot = PageSignalSnapshot::new("https://example.com/");
    snapshot
        .js_hook_hits
        .insert("HTMLCanvasElement.prototype.toDataURL".to_string());
    let results = coordinator.page_data(1, snapshot).await;
    assert!(results.is_empty());
}

#[tokio::test]
async fn test_disable_toggle_stops_scanning() {
    let dir = TempDir::new().unwrap();
    write_catalog(&dir);

    let loader = Arc::new(CatalogLoader::new(Arc::new(FsCatalogSource::new(dir.path()))));
    let coordinator = Coordinator::new(
        loader,
        Arc::new(MemoryStore::new()),
        Arc::new(NoCookies),
        ScoutConfig::default(),
    );

    coordinator.set_enabled(false).await;
    let mut snapshot = PageSignalSnapshot::new("https://example.com/");
    snapshot.cookies.push(NamedValue::new("__cf_bm", "x"));
    assert!(coordinator.page_data(1, snapshot.clone()).await.is_empty());

    coordinator.set_enabled(true).await;
    assert_eq!(coordinator.page_data(1, snapshot).await.len(), 1);
}

// =============================================================================
// Hook relay through the coordinator protocol
// =============================================================================

#[tokio::test]
async fn test_hook_observer_to_coordinator_relay() {
    let dir = TempDir::new().unwrap();
    write_catalog(&dir);

    let loader = Arc::new(CatalogLoader::new(Arc::new(FsCatalogSource::new(dir.path()))));
    let coordinator = Arc::new(Coordinator::new(
        loader,
        Arc::new(MemoryStore::new()),
        Arc::new(NoCookies),
        ScoutConfig::default(),
    ));

    let (msg_tx, msg_rx) = mpsc::channel(16);
    tokio::spawn(Arc::clone(&coordinator).run(msg_rx));

    let (batch_tx, batch_rx) = mpsc::channel(16);
    tokio::spawn(shieldscout::coordinator::relay_hook_batches(
        batch_rx,
        msg_tx.clone(),
        "https://example.com/app".to_string(),
    ));

    let debounce = ScoutConfig::default().hooks.debounce();
    let observer = HookObserver::new(HookBatcher::new(batch_tx, debounce));
    // Repeated firings of the same target relay exactly one sighting.
    for _ in 0..5 {
        observer.observe("HTMLCanvasElement.prototype.toDataURL");
    }
    observer.observe("Screen.prototype.width");

    // Wait for the debounced batch to flow through the protocol.
    let mut hooks = Default::default();
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        hooks = coordinator.cache().accumulated_hooks("https://example.com/app");
        if hooks.len() == 2 {
            break;
        }
    }
    assert_eq!(hooks.len(), 2);
    assert!(hooks.contains("HTMLCanvasElement.prototype.toDataURL"));

    // The accumulated evidence feeds the next scan via GetDetections
    // after a RunDetection-style page data push.
    let mut snapshot = PageSignalSnapshot::new("https://example.com/app");
    snapshot.cookies.push(NamedValue::new("__cf_bm", "x"));
    let (reply_tx, reply_rx) = oneshot::channel();
    msg_tx
        .send(CoordinatorMessage::PageData {
            tab_id: 1,
            snapshot,
            reply: Some(reply_tx),
        })
        .await
        .unwrap();
    let results = reply_rx.await.unwrap();
    assert!(results.iter().any(|r| r.detector_id == "fingerprintjs"));
    assert!(results.iter().any(|r| r.detector_id == "cloudflare"));
}
