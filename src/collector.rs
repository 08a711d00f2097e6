//! Page-context signal collection.
//!
//! The collector runs in the isolated page context. It captures a
//! bounded document serialization, script sources, and the presence of
//! a fixed set of known challenge selectors, and accumulates the window
//! property and hook evidence the privileged observer reports across
//! the context boundary.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

use crate::config::CollectorConfig;
use crate::snapshot::{NamedValue, PageSignalSnapshot};

/// Known CAPTCHA/challenge selectors, probed for presence during
/// snapshot assembly. A static operational asset, independent of the
/// catalog.
pub const CHALLENGE_SELECTORS: &[&str] = &[
    // reCAPTCHA
    ".g-recaptcha",
    "[data-sitekey]",
    "iframe[src*=\"recaptcha\"]",
    "#recaptcha",
    // hCaptcha
    ".h-captcha",
    "iframe[src*=\"hcaptcha\"]",
    // Cloudflare
    ".cf-turnstile",
    "#challenge-form",
    "#cf-wrapper",
    "[data-cf-turnstile-sitekey]",
    // DataDome
    ".datadome-captcha",
    "#datadome-captcha",
    // General
    ".captcha-container",
    ".captcha",
    "[data-callback]",
    // PerimeterX
    "#px-captcha",
    // FunCaptcha
    "#funcaptcha",
    ".funcaptcha",
    // GeeTest
    ".geetest_holder",
    "#geetest-wrap",
];

/// Known anti-bot/CAPTCHA vendor globals, probed once shortly after
/// load and again after delayed re-checks.
pub const VENDOR_GLOBALS: &[&str] = &[
    // Cloudflare
    "_cf_chl_opt",
    "turnstile",
    "__cf_chl_ctx",
    // reCAPTCHA
    "grecaptcha",
    "___grecaptcha_cfg",
    // hCaptcha
    "hcaptcha",
    // DataDome
    "ddjskey",
    "datadome",
    // PerimeterX
    "_pxUuid",
    "_pxVid",
    "PX",
    // Akamai
    "bmak",
    "_abck",
    // Kasada
    "KPSDK",
    // Shape Security
    "__fp",
    // Incapsula/Imperva
    "reese84",
    // GeeTest
    "initGeetest",
    "initGeetest4",
    // FunCaptcha
    "ArkoseEnforcement",
    "fc_callback",
];

/// Read access to the live page. The implementation must complete each
/// probe in bounded time even on pathological pages.
pub trait PageContext: Send + Sync {
    fn url(&self) -> String;

    /// Document serialization truncated to at most `max_len` bytes.
    fn outer_html(&self, max_len: usize) -> String;

    /// Text content of inline (src-less) scripts.
    fn inline_script_text(&self) -> Vec<String>;

    /// `src` attributes of external scripts.
    fn script_sources(&self) -> Vec<String>;

    /// Whether a selector matches at least one element.
    fn has_selector(&self, selector: &str) -> bool;

    /// Whether a global variable is defined on the page's window.
    fn has_global(&self, name: &str) -> bool;

    /// Response headers for the document, when the context can see
    /// them. Most live contexts cannot and report none.
    fn headers(&self) -> Vec<NamedValue> {
        Vec::new()
    }
}

/// Assembles [`PageSignalSnapshot`]s. Window-property and hook sets
/// grow monotonically as evidence arrives; assembly reads them out.
pub struct SignalCollector<P: PageContext> {
    page: P,
    config: CollectorConfig,
    window_props: Mutex<HashSet<String>>,
    js_hooks: Mutex<HashSet<String>>,
}

impl<P: PageContext> SignalCollector<P> {
    pub fn new(page: P, config: CollectorConfig) -> Self {
        Self {
            page,
            config,
            window_props: Mutex::new(HashSet::new()),
            js_hooks: Mutex::new(HashSet::new()),
        }
    }

    /// Record a hook target reported by the privileged observer.
    /// Duplicates are merged silently.
    pub fn note_hook(&self, target: &str) {
        self.js_hooks.lock().unwrap().insert(target.to_string());
    }

    /// Record a window property reported by the privileged observer.
    pub fn note_window_prop(&self, path: &str) {
        self.window_props.lock().unwrap().insert(path.to_string());
    }

    /// Probe the fixed vendor-global list, merging new findings.
    /// Returns how many were newly found.
    pub fn check_globals(&self) -> usize {
        let mut props = self.window_props.lock().unwrap();
        let mut found = 0;
        for name in VENDOR_GLOBALS {
            if self.page.has_global(name) && props.insert((*name).to_string()) {
                found += 1;
            }
        }
        found
    }

    /// Run the initial global check and the delayed re-checks that
    /// cover lazily-injected third-party scripts.
    pub async fn run_global_checks(&self) {
        tokio::time::sleep(Duration::from_millis(self.config.initial_check_delay_ms)).await;
        let found = self.check_globals();
        debug!(found, "Initial vendor-global check complete");

        for delay_ms in &self.config.global_recheck_delays_ms {
            tokio::time::sleep(Duration::from_millis(*delay_ms)).await;
            let found = self.check_globals();
            if found > 0 {
                debug!(found, delay_ms, "Vendor-global re-check found new globals");
            }
        }
    }

    /// Assemble a snapshot. `cookies` come from the external cookie
    /// reader; the HTML excerpt is truncated, never unbounded.
    pub fn assemble(&self, cookies: Vec<NamedValue>) -> PageSignalSnapshot {
        let mut html = self.page.outer_html(self.config.html_excerpt_max);
        for text in self.page.inline_script_text() {
            html.push('\n');
            html.push_str(&text);
        }

        let dom_selector_hits = CHALLENGE_SELECTORS
            .iter()
            .filter(|s| self.page.has_selector(s))
            .map(|s| (*s).to_string())
            .collect();

        PageSignalSnapshot {
            url: self.page.url(),
            html_excerpt: html,
            script_sources: self.page.script_sources(),
            dom_selector_hits,
            window_property_hits: self.window_props.lock().unwrap().clone(),
            js_hook_hits: self.js_hooks.lock().unwrap().clone(),
            cookies,
            headers: self.page.headers(),
        }
    }
}

/// A page captured as plain data: backs the binary's page-dump input
/// and the test suite.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticPage {
    pub url: String,
    pub html: String,
    pub inline_scripts: Vec<String>,
    pub scripts: Vec<String>,
    pub selectors: Vec<String>,
    pub globals: Vec<String>,
    pub cookies: Vec<NamedValue>,
    pub headers: Vec<NamedValue>,
}

impl PageContext for StaticPage {
    fn url(&self) -> String {
        self.url.clone()
    }

    fn outer_html(&self, max_len: usize) -> String {
        let mut end = self.html.len().min(max_len);
        while !self.html.is_char_boundary(end) {
            end -= 1;
        }
        self.html[..end].to_string()
    }

    fn inline_script_text(&self) -> Vec<String> {
        self.inline_scripts.clone()
    }

    fn script_sources(&self) -> Vec<String> {
        self.scripts.clone()
    }

    fn has_selector(&self, selector: &str) -> bool {
        self.selectors.iter().any(|s| s == selector)
    }

    fn has_global(&self, name: &str) -> bool {
        self.globals.iter().any(|g| g == name)
    }

    fn headers(&self) -> Vec<NamedValue> {
        self.headers.clone()
    }
}
