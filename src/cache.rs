//! Detection cache keyed by page identity.
//!
//! Entries move `absent → fresh → stale`. Staleness is evaluated lazily
//! on lookup; there is no background timer. A fresh scan replaces an
//! entry wholesale; hook-only evidence arriving after a scan is merged
//! into the entry's accumulated set without re-scoring the stored
//! results.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::snapshot::DetectionResult;

/// Key prefix for persisted entries in the host key-value store.
pub const PERSIST_PREFIX: &str = "detection_";

/// Normalize a URL into a page-identity key: the fragment is dropped
/// and a trailing slash (except the bare origin's) is trimmed.
pub fn normalize_url(url: &str) -> String {
    let without_fragment = url.split('#').next().unwrap_or(url);
    let trimmed = without_fragment.trim_end_matches('/');
    if trimmed.is_empty() || trimmed.ends_with(':') {
        // Nothing meaningful to trim ("/", "https://").
        without_fragment.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Deterministic storage key for a page identity.
pub fn persist_key(normalized_url: &str) -> String {
    let digest = Sha256::digest(normalized_url.as_bytes());
    // 16 hex chars is plenty for a per-profile key space.
    let hex: String = digest[..8].iter().map(|b| format!("{b:02x}")).collect();
    format!("{PERSIST_PREFIX}{hex}")
}

/// One cached detection pass. `results` is `None` for an entry holding
/// only accumulated hook evidence (no scored pass yet, or invalidated);
/// such an entry never satisfies a lookup.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub results: Option<Vec<DetectionResult>>,
    pub created_at: Instant,
    /// Hook targets accumulated for this page, including ones that
    /// arrived after the scan completed.
    pub accumulated_hooks: HashSet<String>,
    /// Set when hook-only evidence arrived after scoring; the stored
    /// results do not reflect it and a forced rescan would.
    pub rescan_eligible: bool,
}

/// Persisted form of a cache entry, written through the host store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedEntry {
    pub url: String,
    pub results: Vec<DetectionResult>,
    /// Unix epoch milliseconds at scan completion.
    pub timestamp_ms: u64,
    pub count: usize,
}

impl PersistedEntry {
    pub fn new(url: &str, results: &[DetectionResult]) -> Self {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            url: url.to_string(),
            results: results.to_vec(),
            timestamp_ms,
            count: results.len(),
        }
    }

    pub fn is_valid(&self, ttl: Duration) -> bool {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        now_ms.saturating_sub(self.timestamp_ms) < ttl.as_millis() as u64
    }
}

/// In-memory detection cache. Any tab may populate or read an entry;
/// the key space is shared to maximize hits when the same URL is open
/// in multiple tabs.
pub struct DetectionCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
}

impl DetectionCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Results for a fresh entry, or None when absent or stale. A stale
    /// entry is removed on the way out.
    pub fn fresh(&self, normalized_url: &str) -> Option<Vec<DetectionResult>> {
        self.fresh_at(normalized_url, Instant::now())
    }

    /// Staleness decision against an explicit `now`, so TTL edges are
    /// testable without sleeping.
    pub fn fresh_at(&self, normalized_url: &str, now: Instant) -> Option<Vec<DetectionResult>> {
        match self.entries.get(normalized_url) {
            Some(entry) => {
                if now.duration_since(entry.created_at) < self.ttl {
                    return entry.results.clone();
                }
            }
            None => return None,
        }
        self.entries.remove(normalized_url);
        None
    }

    /// Store a completed scan, replacing any prior entry wholesale.
    pub fn store(&self, normalized_url: &str, results: Vec<DetectionResult>, hooks: HashSet<String>) {
        self.entries.insert(
            normalized_url.to_string(),
            CacheEntry {
                results: Some(results),
                created_at: Instant::now(),
                accumulated_hooks: hooks,
                rescan_eligible: false,
            },
        );
    }

    /// Drop an entry's scored results ahead of a forced rescan. The
    /// accumulated hook evidence is kept so the next pass can score it.
    pub fn invalidate(&self, normalized_url: &str) {
        if let Some(mut entry) = self.entries.get_mut(normalized_url) {
            entry.results = None;
            entry.rescan_eligible = false;
        }
    }

    /// Merge late hook evidence into an entry without re-scoring. An
    /// absent entry is created empty so the evidence is not lost before
    /// the first scan completes. Returns how many targets were new.
    pub fn merge_hooks(&self, normalized_url: &str, targets: &[String]) -> usize {
        let mut entry = self
            .entries
            .entry(normalized_url.to_string())
            .or_insert_with(|| CacheEntry {
                results: None,
                created_at: Instant::now(),
                accumulated_hooks: HashSet::new(),
                rescan_eligible: false,
            });

        let mut added = 0;
        for target in targets {
            if entry.accumulated_hooks.insert(target.clone()) {
                added += 1;
            }
        }
        if added > 0 && entry.results.is_some() {
            entry.rescan_eligible = true;
        }
        added
    }

    /// Hook targets accumulated for a page, regardless of freshness.
    pub fn accumulated_hooks(&self, normalized_url: &str) -> HashSet<String> {
        self.entries
            .get(normalized_url)
            .map(|e| e.accumulated_hooks.clone())
            .unwrap_or_default()
    }

    pub fn entry(&self, normalized_url: &str) -> Option<CacheEntry> {
        self.entries.get(normalized_url).map(|e| e.clone())
    }

    pub fn remove(&self, normalized_url: &str) {
        self.entries.remove(normalized_url);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
