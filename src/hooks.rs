//! Hook bridge: privileged-context API interception and the batching
//! relay.
//!
//! The privileged observer wraps native API entry points in the page's
//! own execution context; each wrapper reports its target identifier at
//! most once per page load. First sightings are relayed onward in small
//! time-windowed batches rather than one message per event.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// Instrumented API targets. Qualified `type.method` / `type.property`
/// identifiers, matching the js_hook rule targets in the catalog.
pub const HOOK_TARGETS: &[&str] = &[
    // Canvas fingerprinting
    "HTMLCanvasElement.prototype.toDataURL",
    "HTMLCanvasElement.prototype.toBlob",
    "CanvasRenderingContext2D.prototype.getImageData",
    // WebGL fingerprinting
    "WebGLRenderingContext.prototype.getParameter",
    "WebGLRenderingContext.prototype.getExtension",
    "WebGL2RenderingContext.prototype.getParameter",
    // Audio fingerprinting
    "AudioContext.prototype.createOscillator",
    "AudioContext.prototype.createAnalyser",
    "OfflineAudioContext.prototype.startRendering",
    // Font fingerprinting
    "FontFaceSet.prototype.check",
    // Navigator properties
    "Navigator.prototype.userAgent",
    "Navigator.prototype.platform",
    "Navigator.prototype.language",
    "Navigator.prototype.languages",
    "Navigator.prototype.hardwareConcurrency",
    "Navigator.prototype.deviceMemory",
    "Navigator.prototype.maxTouchPoints",
    "Navigator.prototype.getBattery",
    // Screen properties
    "Screen.prototype.width",
    "Screen.prototype.height",
    "Screen.prototype.colorDepth",
    "Screen.prototype.pixelDepth",
    "Screen.prototype.availWidth",
    "Screen.prototype.availHeight",
    // WebRTC
    "RTCPeerConnection.prototype.createDataChannel",
    "RTCPeerConnection.prototype.createOffer",
    // Timing
    "Performance.prototype.now",
];

/// Debounced batch relay. Targets added within one debounce window are
/// flushed together; a pending batch is abandoned, never force-flushed,
/// when the relay is dropped (page navigated away).
pub struct HookBatcher {
    tx: mpsc::Sender<Vec<String>>,
    debounce: Duration,
    pending: Arc<Mutex<Vec<String>>>,
    flush_scheduled: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
}

impl HookBatcher {
    pub fn new(tx: mpsc::Sender<Vec<String>>, debounce: Duration) -> Self {
        Self {
            tx,
            debounce,
            pending: Arc::new(Mutex::new(Vec::new())),
            flush_scheduled: Arc::new(AtomicBool::new(false)),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Queue a target and schedule a flush if none is pending.
    pub fn add(&self, target: impl Into<String>) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        self.pending.lock().unwrap().push(target.into());

        if self.flush_scheduled.swap(true, Ordering::AcqRel) {
            return;
        }

        let tx = self.tx.clone();
        let debounce = self.debounce;
        let pending = Arc::clone(&self.pending);
        let flush_scheduled = Arc::clone(&self.flush_scheduled);
        let closed = Arc::clone(&self.closed);
        tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            // Clear the flag before draining: an add racing the drain
            // either lands in this batch or schedules the next flush.
            flush_scheduled.store(false, Ordering::Release);
            let batch = std::mem::take(&mut *pending.lock().unwrap());

            if closed.load(Ordering::Acquire) || batch.is_empty() {
                return;
            }
            if tx.send(batch).await.is_err() {
                // Coordinator gone; partial batches are an accepted loss.
                debug!("Hook batch dropped, receiver closed");
            }
        });
    }

    /// Stop relaying; any pending batch is discarded.
    pub fn abandon(&self) {
        self.closed.store(true, Ordering::Release);
        self.pending.lock().unwrap().clear();
    }
}

impl Drop for HookBatcher {
    fn drop(&mut self) {
        self.abandon();
    }
}

/// Per-page-load hook observer. The installed API wrappers call
/// [`HookObserver::observe`] on every invocation; only the first
/// sighting of each target is relayed.
pub struct HookObserver {
    seen: Mutex<HashSet<String>>,
    batcher: HookBatcher,
}

impl HookObserver {
    pub fn new(batcher: HookBatcher) -> Self {
        Self {
            seen: Mutex::new(HashSet::new()),
            batcher,
        }
    }

    /// Report an instrumented target invocation. Returns true when this
    /// was the first sighting (and was relayed).
    pub fn observe(&self, target: &str) -> bool {
        let first = self.seen.lock().unwrap().insert(target.to_string());
        if first {
            self.batcher.add(target);
        }
        first
    }

    pub fn abandon(&self) {
        self.batcher.abandon();
    }
}
