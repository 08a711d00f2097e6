//! Scan engine: evaluates the detector catalog against a page-signal
//! snapshot.

use tracing::debug;

use crate::catalog::{Category, DetectorDefinition, Rule, RuleCatalog};
use crate::matcher::MatchEvaluator;
use crate::score::calculate_confidence;
use crate::snapshot::{DetectionResult, MatchRecord, PageSignalSnapshot, SignalKind};

/// Stateless with respect to its inputs: identical `(snapshot, catalog,
/// show_fingerprinting)` always yields an identical ordered result list.
pub struct ScanEngine {
    matcher: MatchEvaluator,
}

impl ScanEngine {
    pub fn new() -> Self {
        Self {
            matcher: MatchEvaluator::new(),
        }
    }

    /// Evaluate every enabled detector against the snapshot. Detectors
    /// with no matches produce no result. Output is sorted by confidence
    /// descending; ties keep catalog enumeration order.
    pub fn evaluate(
        &self,
        snapshot: &PageSignalSnapshot,
        catalog: &RuleCatalog,
        show_fingerprinting: bool,
    ) -> Vec<DetectionResult> {
        let mut results = Vec::new();

        for detector in catalog.enumerate() {
            if !detector.enabled {
                continue;
            }
            if detector.category == Category::Fingerprint && !show_fingerprinting {
                continue;
            }

            let matches = self.check_detector(detector, snapshot);
            if matches.is_empty() {
                continue;
            }

            let confidence = calculate_confidence(&matches, detector.base_confidence);
            debug!(
                detector = %detector.id,
                confidence,
                matches = matches.len(),
                "Detector matched"
            );
            results.push(DetectionResult {
                detector_id: detector.id.clone(),
                display_name: detector.display_name.clone(),
                category: detector.category,
                confidence,
                matches,
            });
        }

        // Stable sort preserves enumeration order among equal scores.
        results.sort_by(|a, b| b.confidence.cmp(&a.confidence));
        results
    }

    fn check_detector(
        &self,
        detector: &DetectorDefinition,
        snapshot: &PageSignalSnapshot,
    ) -> Vec<MatchRecord> {
        let mut matches = Vec::new();

        for rule in &detector.rules {
            match rule {
                Rule::Cookie {
                    name,
                    value,
                    confidence,
                    note,
                } => {
                    if self
                        .matcher
                        .check_named_value(name, value.as_ref(), &snapshot.cookies)
                    {
                        matches.push(record(SignalKind::Cookie, &name.pattern, *confidence, note));
                    }
                }
                Rule::Url {
                    text,
                    confidence,
                    note,
                } => {
                    if self.matcher.check_any_source(text, &snapshot.script_sources) {
                        matches.push(record(SignalKind::Url, &text.pattern, *confidence, note));
                    }
                }
                Rule::Content {
                    text,
                    confidence,
                    note,
                } => {
                    if self.matcher.matches(text, &snapshot.html_excerpt) {
                        matches.push(record(SignalKind::Content, &text.pattern, *confidence, note));
                    }
                }
                Rule::Dom {
                    selector,
                    confidence,
                    note,
                } => {
                    if snapshot.dom_selector_hits.contains(selector) {
                        matches.push(record(SignalKind::Dom, selector, *confidence, note));
                    }
                }
                Rule::Window {
                    path,
                    confidence,
                    note,
                } => {
                    if snapshot.window_property_hits.contains(path) {
                        matches.push(record(SignalKind::Window, path, *confidence, note));
                    }
                }
                Rule::JsHook {
                    target,
                    enabled,
                    confidence,
                    note,
                } => {
                    if *enabled && snapshot.js_hook_hits.contains(target) {
                        matches.push(record(SignalKind::JsHook, target, *confidence, note));
                    }
                }
                Rule::Header {
                    name,
                    value,
                    confidence,
                    note,
                } => {
                    if self
                        .matcher
                        .check_named_value(name, value.as_ref(), &snapshot.headers)
                    {
                        matches.push(record(SignalKind::Header, &name.pattern, *confidence, note));
                    }
                }
            }
        }

        matches
    }
}

impl Default for ScanEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn record(signal_kind: SignalKind, identifier: &str, confidence: u8, note: &str) -> MatchRecord {
    MatchRecord {
        signal_kind,
        rule_identifier: identifier.to_string(),
        confidence,
        note: note.to_string(),
    }
}
