//! Rule matching primitives.
//!
//! All matching is infallible from the caller's perspective: a pattern
//! that fails to compile is a non-match, never an error.

use moka::sync::Cache;
use regex::{Regex, RegexBuilder};
use std::sync::Arc;
use tracing::debug;

use crate::catalog::TextMatch;
use crate::snapshot::NamedValue;

/// Compiled regexes cached per `(pattern, case_sensitive)` so detectors
/// sharing a pattern do not recompile it within a scan batch. Compile
/// failures are cached as `None`.
pub struct MatchEvaluator {
    patterns: Cache<(String, bool), Option<Arc<Regex>>>,
}

impl MatchEvaluator {
    pub fn new() -> Self {
        Self {
            patterns: Cache::new(1024),
        }
    }

    fn compiled(&self, pattern: &str, case_sensitive: bool) -> Option<Arc<Regex>> {
        self.patterns
            .get_with((pattern.to_string(), case_sensitive), || {
                match RegexBuilder::new(pattern)
                    .case_insensitive(!case_sensitive)
                    .build()
                {
                    Ok(re) => Some(Arc::new(re)),
                    Err(err) => {
                        debug!(pattern = %pattern, error = %err, "Pattern failed to compile");
                        None
                    }
                }
            })
    }

    /// Test `text` against `pattern`.
    ///
    /// Precedence: regex when `is_regex`; otherwise whole-word (escaped,
    /// word-boundary anchored); otherwise substring containment,
    /// lower-casing both operands unless `case_sensitive`. Empty pattern
    /// or empty text never matches.
    pub fn match_text(
        &self,
        pattern: &str,
        text: &str,
        is_regex: bool,
        case_sensitive: bool,
        whole_word: bool,
    ) -> bool {
        if pattern.is_empty() || text.is_empty() {
            return false;
        }

        if is_regex {
            return self
                .compiled(pattern, case_sensitive)
                .is_some_and(|re| re.is_match(text));
        }

        if whole_word {
            let anchored = format!(r"\b{}\b", regex::escape(pattern));
            return self
                .compiled(&anchored, case_sensitive)
                .is_some_and(|re| re.is_match(text));
        }

        if case_sensitive {
            text.contains(pattern)
        } else {
            text.to_lowercase().contains(&pattern.to_lowercase())
        }
    }

    /// Test a [`TextMatch`] against `text`.
    pub fn matches(&self, m: &TextMatch, text: &str) -> bool {
        self.match_text(&m.pattern, text, m.is_regex, m.case_sensitive, m.whole_word)
    }

    /// Cookie/header rule check: some entry's name must satisfy the
    /// name match; when a value match is present, the value of the
    /// *first* name-matching entry decides. Entries further down with
    /// the same name are not consulted.
    pub fn check_named_value(
        &self,
        name: &TextMatch,
        value: Option<&TextMatch>,
        entries: &[NamedValue],
    ) -> bool {
        for entry in entries {
            if self.matches(name, &entry.name) {
                return match value {
                    Some(v) => self.matches(v, &entry.value),
                    None => true,
                };
            }
        }
        false
    }

    /// URL rule check: any source satisfying the match is enough; stop
    /// at the first one.
    pub fn check_any_source(&self, text: &TextMatch, sources: &[String]) -> bool {
        sources.iter().any(|s| self.matches(text, s))
    }
}

impl Default for MatchEvaluator {
    fn default() -> Self {
        Self::new()
    }
}
