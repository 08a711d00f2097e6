//! Page signal snapshot and detection result types.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::catalog::Category;

/// Evidence category a rule can test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Cookie,
    Url,
    Content,
    Dom,
    Window,
    JsHook,
    Header,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Cookie => "cookie",
            SignalKind::Url => "url",
            SignalKind::Content => "content",
            SignalKind::Dom => "dom",
            SignalKind::Window => "window",
            SignalKind::JsHook => "js_hook",
            SignalKind::Header => "header",
        }
    }
}

/// A collected cookie or response header pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedValue {
    pub name: String,
    pub value: String,
}

impl NamedValue {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// The complete set of page evidence gathered for one detection pass.
///
/// Mutable only during assembly: the hook and window-property sets grow
/// monotonically as cross-context notifications arrive. Once handed to
/// the scan engine it is treated as a read-only value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageSignalSnapshot {
    /// Page URL at collection time.
    pub url: String,

    /// Length-bounded document serialization, inclusive of concatenated
    /// inline script text.
    #[serde(default)]
    pub html_excerpt: String,

    /// `src` attributes of external scripts.
    #[serde(default)]
    pub script_sources: Vec<String>,

    /// Known challenge selectors found present during assembly.
    #[serde(default)]
    pub dom_selector_hits: HashSet<String>,

    /// Vendor globals observed on the page's window object.
    #[serde(default)]
    pub window_property_hits: HashSet<String>,

    /// Instrumented API targets the page invoked.
    #[serde(default)]
    pub js_hook_hits: HashSet<String>,

    /// Cookies for the page origin, best-effort.
    #[serde(default)]
    pub cookies: Vec<NamedValue>,

    /// Response headers, when the collaborator supplies them. Header
    /// rules are no-ops against an empty list.
    #[serde(default)]
    pub headers: Vec<NamedValue>,
}

impl PageSignalSnapshot {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}

/// One satisfied rule within a detection result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRecord {
    /// Which evidence category matched.
    pub signal_kind: SignalKind,
    /// The pattern, selector, path, or target that matched.
    pub rule_identifier: String,
    /// Rule confidence (0-100).
    pub confidence: u8,
    /// Free-text note from the rule author.
    pub note: String,
}

/// Per-detector result; only produced for detectors with at least one
/// match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub detector_id: String,
    pub display_name: String,
    pub category: Category,
    /// Combined confidence (0-100).
    pub confidence: u8,
    pub matches: Vec<MatchRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_kind_as_str() {
        assert_eq!(SignalKind::Cookie.as_str(), "cookie");
        assert_eq!(SignalKind::JsHook.as_str(), "js_hook");
        assert_eq!(SignalKind::Header.as_str(), "header");
    }

    #[test]
    fn test_snapshot_deserializes_with_missing_fields() {
        let snapshot: PageSignalSnapshot =
            serde_json::from_str(r#"{"url": "https://example.com/"}"#).unwrap();
        assert_eq!(snapshot.url, "https://example.com/");
        assert!(snapshot.html_excerpt.is_empty());
        assert!(snapshot.cookies.is_empty());
        assert!(snapshot.headers.is_empty());
    }
}
