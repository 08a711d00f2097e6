//! Host collaborator contracts: key-value storage, cookies, settings.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tracing::warn;

use crate::error::{ScoutError, ScoutResult};
use crate::snapshot::NamedValue;

/// Host key-value storage. Failures are contained by callers, which
/// fall back to in-memory defaults.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> ScoutResult<Option<Value>>;
    async fn set(&self, key: &str, value: Value) -> ScoutResult<()>;
    async fn remove(&self, key: &str) -> ScoutResult<()>;
    async fn list_keys_with_prefix(&self, prefix: &str) -> ScoutResult<Vec<String>>;
}

/// In-memory store; the default backing for tests and the fallback when
/// the host store is unavailable.
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, Value>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> ScoutResult<Option<Value>> {
        Ok(self.entries.get(key).map(|v| v.clone()))
    }

    async fn set(&self, key: &str, value: Value) -> ScoutResult<()> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> ScoutResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn list_keys_with_prefix(&self, prefix: &str) -> ScoutResult<Vec<String>> {
        Ok(self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| e.key().clone())
            .collect())
    }
}

/// Best-effort cookie access for a page origin.
#[async_trait]
pub trait CookieReader: Send + Sync {
    /// Cookies for `url`; empty on any failure.
    async fn cookies_for_url(&self, url: &str) -> Vec<NamedValue>;
}

/// Cookie reader for environments without cookie access.
pub struct NoCookies;

#[async_trait]
impl CookieReader for NoCookies {
    async fn cookies_for_url(&self, _url: &str) -> Vec<NamedValue> {
        Vec::new()
    }
}

/// Fixed cookie set, for page dumps and tests.
pub struct StaticCookies(pub Vec<NamedValue>);

#[async_trait]
impl CookieReader for StaticCookies {
    async fn cookies_for_url(&self, _url: &str) -> Vec<NamedValue> {
        self.0.clone()
    }
}

pub const KEY_ENABLED: &str = "scout_enabled";
pub const KEY_CACHE_TTL_HOURS: &str = "scout_cache_ttl_hours";
pub const KEY_SHOW_FINGERPRINTING: &str = "scout_show_fingerprinting";

pub const DEFAULT_CACHE_TTL_HOURS: u64 = 12;

/// Operator settings persisted in the key-value store. Every read
/// degrades to its default on storage failure.
pub struct Settings<'a> {
    store: &'a dyn KeyValueStore,
}

impl<'a> Settings<'a> {
    pub fn new(store: &'a dyn KeyValueStore) -> Self {
        Self { store }
    }

    async fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.store.get(key).await {
            Ok(Some(Value::Bool(b))) => b,
            Ok(_) => default,
            Err(err) => {
                warn!(key, error = %err, "Settings read failed, using default");
                default
            }
        }
    }

    pub async fn enabled(&self) -> bool {
        self.get_bool(KEY_ENABLED, true).await
    }

    pub async fn show_fingerprinting(&self) -> bool {
        self.get_bool(KEY_SHOW_FINGERPRINTING, true).await
    }

    pub async fn cache_ttl_hours(&self) -> u64 {
        match self.store.get(KEY_CACHE_TTL_HOURS).await {
            Ok(Some(Value::Number(n))) => n.as_u64().unwrap_or(DEFAULT_CACHE_TTL_HOURS),
            Ok(_) => DEFAULT_CACHE_TTL_HOURS,
            Err(err) => {
                warn!(error = %err, "Settings read failed, using default TTL");
                DEFAULT_CACHE_TTL_HOURS
            }
        }
    }

    pub async fn set_enabled(&self, enabled: bool) -> ScoutResult<()> {
        self.store.set(KEY_ENABLED, Value::Bool(enabled)).await
    }
}

/// A store whose every operation fails, for exercising fallback paths.
#[cfg(test)]
pub struct FailingStore;

#[cfg(test)]
#[async_trait]
impl KeyValueStore for FailingStore {
    async fn get(&self, _key: &str) -> ScoutResult<Option<Value>> {
        Err(ScoutError::Storage("unavailable".to_string()))
    }

    async fn set(&self, _key: &str, _value: Value) -> ScoutResult<()> {
        Err(ScoutError::Storage("unavailable".to_string()))
    }

    async fn remove(&self, _key: &str) -> ScoutResult<()> {
        Err(ScoutError::Storage("unavailable".to_string()))
    }

    async fn list_keys_with_prefix(&self, _prefix: &str) -> ScoutResult<Vec<String>> {
        Err(ScoutError::Storage("unavailable".to_string()))
    }
}
