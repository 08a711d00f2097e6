//! Detector catalog: definitions, raw JSON normalization, memoized load.
//!
//! Detector definitions ship as JSON files addressed by an index. The
//! raw shape (`{detector, meta, patterns}`) is normalized once at load
//! time into typed [`DetectorDefinition`]s; malformed definitions are
//! skipped without failing the load.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::error::{ScoutError, ScoutResult};

/// Detector category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Antibot,
    Captcha,
    Fingerprint,
}

impl Category {
    /// Stable enumeration order for catalog grouping.
    pub const ALL: [Category; 3] = [Category::Antibot, Category::Captcha, Category::Fingerprint];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Antibot => "antibot",
            Category::Captcha => "captcha",
            Category::Fingerprint => "fingerprint",
        }
    }

    /// Operator-facing label.
    pub fn label(&self) -> &'static str {
        match self {
            Category::Antibot => "Anti-Bot",
            Category::Captcha => "CAPTCHA",
            Category::Fingerprint => "Fingerprint",
        }
    }

    pub fn parse(s: &str) -> Option<Category> {
        match s {
            "antibot" => Some(Category::Antibot),
            "captcha" => Some(Category::Captcha),
            "fingerprint" => Some(Category::Fingerprint),
            _ => None,
        }
    }
}

/// Text-match target with its per-target flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextMatch {
    pub pattern: String,
    #[serde(default)]
    pub is_regex: bool,
    #[serde(default)]
    pub case_sensitive: bool,
    #[serde(default)]
    pub whole_word: bool,
}

impl TextMatch {
    pub fn plain(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            ..Default::default()
        }
    }
}

/// A single detection rule. The variant determines which snapshot field
/// the rule is tested against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Rule {
    Cookie {
        name: TextMatch,
        /// When set, the value of the first name-matching cookie must
        /// also satisfy this match.
        value: Option<TextMatch>,
        confidence: u8,
        note: String,
    },
    Url {
        text: TextMatch,
        confidence: u8,
        note: String,
    },
    Content {
        text: TextMatch,
        confidence: u8,
        note: String,
    },
    Dom {
        selector: String,
        confidence: u8,
        note: String,
    },
    Window {
        path: String,
        confidence: u8,
        note: String,
    },
    JsHook {
        target: String,
        enabled: bool,
        confidence: u8,
        note: String,
    },
    Header {
        name: TextMatch,
        value: Option<TextMatch>,
        confidence: u8,
        note: String,
    },
}

impl Rule {
    pub fn confidence(&self) -> u8 {
        match self {
            Rule::Cookie { confidence, .. }
            | Rule::Url { confidence, .. }
            | Rule::Content { confidence, .. }
            | Rule::Dom { confidence, .. }
            | Rule::Window { confidence, .. }
            | Rule::JsHook { confidence, .. }
            | Rule::Header { confidence, .. } => *confidence,
        }
    }
}

/// One detector: a named rule bundle describing a specific anti-bot,
/// CAPTCHA, or fingerprinting technology. Immutable after load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectorDefinition {
    pub id: String,
    pub display_name: String,
    pub category: Category,
    pub enabled: bool,
    /// Baseline confidence when any rule matches (0-100).
    pub base_confidence: u8,
    pub website: Option<String>,
    pub description: Option<String>,
    /// Rules in stable evaluation order, grouped by signal kind.
    pub rules: Vec<Rule>,
}

// ---------------------------------------------------------------------------
// Raw catalog shapes
// ---------------------------------------------------------------------------

const DEFAULT_RULE_SCORE: u8 = 80;

#[derive(Debug, Deserialize)]
struct RawDetectorFile {
    detector: RawDetector,
    #[serde(default)]
    meta: RawMeta,
    #[serde(default)]
    info: Option<String>,
    #[serde(default)]
    patterns: RawPatterns,
}

#[derive(Debug, Deserialize)]
struct RawDetector {
    id: String,
    #[serde(default)]
    label: Option<String>,
    #[serde(default = "default_true")]
    active: bool,
    #[serde(rename = "type", default)]
    kind: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Default, Deserialize)]
struct RawMeta {
    #[serde(rename = "vendorUrl", default)]
    vendor_url: Option<String>,
    #[serde(rename = "infoUrl", default)]
    info_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawPatterns {
    #[serde(default)]
    cookies: Vec<RawPattern>,
    #[serde(default)]
    urls: Vec<RawPattern>,
    #[serde(default)]
    content: Vec<RawPattern>,
    #[serde(default)]
    dom: Vec<RawPattern>,
    #[serde(default)]
    globals: Vec<RawPattern>,
    #[serde(rename = "jsHooks", default)]
    js_hooks: Vec<RawPattern>,
    #[serde(default)]
    headers: Vec<RawPattern>,
}

#[derive(Debug, Deserialize)]
struct RawPattern {
    #[serde(rename = "match", default)]
    pattern: Option<String>,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    score: Option<u8>,
    #[serde(default)]
    note: Option<String>,
}

impl RawPattern {
    fn score(&self) -> u8 {
        self.score.unwrap_or(DEFAULT_RULE_SCORE)
    }

    fn note(&self) -> String {
        self.note.clone().unwrap_or_default()
    }
}

/// Normalize a raw detector file into a typed definition.
///
/// `fallback_category` is the index category the detector was listed
/// under; the file's own `detector.type` wins when present.
fn normalize(raw: RawDetectorFile, fallback_category: Category) -> ScoutResult<DetectorDefinition> {
    let det = raw.detector;
    if det.id.is_empty() {
        return Err(ScoutError::Definition {
            name: "<unnamed>".to_string(),
            reason: "missing required id".to_string(),
        });
    }

    let category = det
        .kind
        .as_deref()
        .and_then(Category::parse)
        .unwrap_or(fallback_category);

    let mut rules = Vec::new();

    for p in &raw.patterns.cookies {
        if let Some(pattern) = &p.pattern {
            rules.push(Rule::Cookie {
                name: TextMatch::plain(pattern),
                value: None,
                confidence: p.score(),
                note: p.note(),
            });
        }
    }
    for p in &raw.patterns.urls {
        if let Some(pattern) = &p.pattern {
            rules.push(Rule::Url {
                text: TextMatch::plain(pattern),
                confidence: p.score(),
                note: p.note(),
            });
        }
    }
    for p in &raw.patterns.content {
        if let Some(pattern) = &p.pattern {
            rules.push(Rule::Content {
                text: TextMatch::plain(pattern),
                confidence: p.score(),
                note: p.note(),
            });
        }
    }
    for p in &raw.patterns.dom {
        if let Some(pattern) = &p.pattern {
            rules.push(Rule::Dom {
                selector: pattern.clone(),
                confidence: p.score(),
                note: p.note(),
            });
        }
    }
    for p in &raw.patterns.globals {
        if let Some(pattern) = &p.pattern {
            rules.push(Rule::Window {
                path: pattern.clone(),
                confidence: p.score(),
                note: p.note(),
            });
        }
    }
    for p in &raw.patterns.js_hooks {
        if let Some(target) = &p.target {
            rules.push(Rule::JsHook {
                target: target.clone(),
                enabled: true,
                confidence: p.score(),
                note: p.note(),
            });
        }
    }
    for p in &raw.patterns.headers {
        if let Some(pattern) = &p.pattern {
            rules.push(Rule::Header {
                name: TextMatch::plain(pattern),
                value: None,
                confidence: p.score(),
                note: p.note(),
            });
        }
    }

    Ok(DetectorDefinition {
        display_name: det.label.unwrap_or_else(|| det.id.clone()),
        id: det.id,
        category,
        enabled: det.active,
        base_confidence: DEFAULT_RULE_SCORE,
        website: raw.meta.vendor_url.or(raw.meta.info_url),
        description: raw.info,
        rules,
    })
}

// ---------------------------------------------------------------------------
// Catalog source and loading
// ---------------------------------------------------------------------------

/// Per-category detector listing from the catalog index.
#[derive(Debug, Clone, Default)]
pub struct CatalogIndex {
    /// (category, detector names) in index order. Non-category index
    /// keys (tags, badge, theme, matchTypes) are already filtered out.
    pub categories: Vec<(Category, Vec<String>)>,
}

/// Index keys that are catalog presentation metadata, not categories.
const NON_CATEGORY_KEYS: [&str; 4] = ["tags", "badge", "theme", "matchTypes"];

impl CatalogIndex {
    /// Parse the raw index JSON. Accepts both the wrapped shape
    /// (`{"categories": {...}}`) and a bare category map, and both
    /// `{"detectors": [...]}` entries and bare name arrays.
    pub fn from_value(value: serde_json::Value) -> ScoutResult<CatalogIndex> {
        let map = match &value {
            serde_json::Value::Object(obj) => match obj.get("categories") {
                Some(serde_json::Value::Object(inner)) => inner,
                _ => obj,
            },
            _ => {
                return Err(ScoutError::CatalogIndex(
                    "index is not a JSON object".to_string(),
                ))
            }
        };

        let mut categories = Vec::new();
        for (key, entry) in map {
            if NON_CATEGORY_KEYS.contains(&key.as_str()) {
                continue;
            }
            let Some(category) = Category::parse(key) else {
                debug!(key = %key, "Skipping unknown index category");
                continue;
            };
            let list = match entry {
                serde_json::Value::Array(names) => names,
                serde_json::Value::Object(obj) => match obj.get("detectors") {
                    Some(serde_json::Value::Array(names)) => names,
                    _ => continue,
                },
                _ => continue,
            };
            let names: Vec<String> = list
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect();
            categories.push((category, names));
        }

        // Stable grouping order regardless of JSON key order.
        categories.sort_by_key(|(c, _)| Category::ALL.iter().position(|x| x == c));
        Ok(CatalogIndex { categories })
    }
}

/// Asynchronous source of catalog data.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Retrieve the raw catalog index. Failure is fatal for the load
    /// attempt and retryable by the caller.
    async fn fetch_index(&self) -> ScoutResult<serde_json::Value>;

    /// Retrieve one raw detector definition by category and name.
    async fn fetch_detector(&self, category: Category, name: &str)
        -> ScoutResult<serde_json::Value>;
}

/// Loaded catalog: definitions grouped by category, indexed by id.
#[derive(Debug, Default)]
pub struct RuleCatalog {
    detectors: Vec<DetectorDefinition>,
    by_id: HashMap<String, usize>,
}

impl RuleCatalog {
    pub fn from_definitions(definitions: Vec<DetectorDefinition>) -> Self {
        let mut detectors = definitions;
        // Group by category, keeping insertion order within a category.
        detectors.sort_by_key(|d| Category::ALL.iter().position(|c| *c == d.category));
        let by_id = detectors
            .iter()
            .enumerate()
            .map(|(i, d)| (d.id.clone(), i))
            .collect();
        Self { detectors, by_id }
    }

    /// An empty catalog; every scan against it yields zero detectors.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&DetectorDefinition> {
        self.by_id.get(id).map(|&i| &self.detectors[i])
    }

    /// All definitions, grouped by category in stable enumeration order.
    pub fn enumerate(&self) -> &[DetectorDefinition] {
        &self.detectors
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }
}

/// Memoizing catalog loader. A successful load is cached for the
/// process lifetime; a failed attempt stays retryable.
pub struct CatalogLoader {
    source: Arc<dyn CatalogSource>,
    loaded: OnceCell<Arc<RuleCatalog>>,
}

impl CatalogLoader {
    pub fn new(source: Arc<dyn CatalogSource>) -> Self {
        Self {
            source,
            loaded: OnceCell::new(),
        }
    }

    /// Load the catalog, fetching and normalizing every listed detector.
    /// Individual detector failures are skipped; an index failure fails
    /// the whole attempt.
    pub async fn load(&self) -> ScoutResult<Arc<RuleCatalog>> {
        self.loaded
            .get_or_try_init(|| async {
                let index_value = self.source.fetch_index().await?;
                let index = CatalogIndex::from_value(index_value)?;

                let mut definitions = Vec::new();
                for (category, names) in &index.categories {
                    for name in names {
                        match self.load_one(*category, name).await {
                            Ok(def) => definitions.push(def),
                            Err(err) => {
                                warn!(category = category.as_str(), name = %name, error = %err,
                                    "Skipping detector that failed to load");
                            }
                        }
                    }
                }

                let catalog = RuleCatalog::from_definitions(definitions);
                debug!(count = catalog.len(), "Catalog loaded");
                Ok(Arc::new(catalog))
            })
            .await
            .cloned()
    }

    async fn load_one(&self, category: Category, name: &str) -> ScoutResult<DetectorDefinition> {
        let raw_value = self.source.fetch_detector(category, name).await?;
        let raw: RawDetectorFile =
            serde_json::from_value(raw_value).map_err(|e| ScoutError::Definition {
                name: name.to_string(),
                reason: e.to_string(),
            })?;
        normalize(raw, category)
    }
}

/// Filesystem-backed catalog source. Expects the original on-disk
/// layout: `<root>/index.json` and `<root>/<category>/detect-<name>.json`.
pub struct FsCatalogSource {
    root: PathBuf,
}

impl FsCatalogSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl CatalogSource for FsCatalogSource {
    async fn fetch_index(&self) -> ScoutResult<serde_json::Value> {
        let path = self.root.join("index.json");
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| ScoutError::CatalogIndex(format!("{}: {e}", path.display())))?;
        serde_json::from_str(&content).map_err(|e| ScoutError::CatalogIndex(e.to_string()))
    }

    async fn fetch_detector(
        &self,
        category: Category,
        name: &str,
    ) -> ScoutResult<serde_json::Value> {
        let path = self
            .root
            .join(category.as_str())
            .join(format!("detect-{name}.json"));
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| ScoutError::Definition {
                name: name.to_string(),
                reason: e.to_string(),
            })?;
        serde_json::from_str(&content).map_err(|e| ScoutError::Definition {
            name: name.to_string(),
            reason: e.to_string(),
        })
    }
}
