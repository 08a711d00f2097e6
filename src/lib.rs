//! ShieldScout: anti-bot, CAPTCHA, and fingerprinting detection engine
//!
//! Matches a declarative detector catalog against page signal snapshots
//! and produces confidence-scored detection results.
//!
//! # Features
//!
//! - Declarative detector catalog (cookies, URLs, content, DOM,
//!   window globals, API hooks, headers)
//! - Confidence scoring with per-match boost and tiered levels
//! - Two-context signal collection: an isolated collector plus a
//!   privileged hook observer with debounced batch relay
//! - TTL'd detection cache with write-through persistence
//! - Message-driven coordinator with at-most-one in-flight scan per
//!   page identity
//!
//! # Example
//!
//! ```ignore
//! use shieldscout::{CatalogLoader, Coordinator, FsCatalogSource, ScoutConfig};
//! use shieldscout::storage::{MemoryStore, NoCookies};
//! use std::sync::Arc;
//!
//! let loader = Arc::new(CatalogLoader::new(Arc::new(FsCatalogSource::new("detectors"))));
//! let coordinator = Arc::new(Coordinator::new(
//!     loader,
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(NoCookies),
//!     ScoutConfig::default(),
//! ));
//! let results = coordinator.lookup(tab_id, "https://example.com/").await;
//! ```

pub mod cache;
pub mod catalog;
pub mod collector;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod hooks;
pub mod matcher;
pub mod score;
pub mod snapshot;
pub mod storage;

pub use cache::DetectionCache;
pub use catalog::{CatalogLoader, CatalogSource, Category, FsCatalogSource, RuleCatalog};
pub use config::ScoutConfig;
pub use coordinator::{Coordinator, CoordinatorMessage, PageDataChannel};
pub use engine::ScanEngine;
pub use error::{ScoutError, ScoutResult};
pub use score::{aggregate, ConfidenceLevel, ResultSummary};
pub use snapshot::{DetectionResult, PageSignalSnapshot};
