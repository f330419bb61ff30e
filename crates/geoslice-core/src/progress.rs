//! Progress reporting for TTY and non-TTY environments.
//!
//! TTY mode: indicatif progress bars per interval (clear on completion).
//! Non-TTY mode: log-based output (no progress bars).

use std::io::IsTerminal;
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use rustc_hash::FxHashMap;

use crate::observer::{LogObserver, RetrievalEvent, RetrievalObserver};

/// Per-worker progress bar (uv-style: green bar, binary bytes)
fn bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{prefix:<21.dim} {bar:30.green/dim} {binary_bytes:>7}/{binary_total_bytes:7} {eta:>4} {wide_msg:.dim}")
        .expect("invalid template")
        .progress_chars("--")
}

/// Pending style, shown before total bytes are known
fn pending_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{prefix:<21.dim} {wide_msg:.dim}")
        .expect("invalid template")
}

/// Upgrade a progress bar from pending to bytes bar.
///
/// Call this once the response `Content-Length` is known.
pub fn upgrade_to_bar(pb: &ProgressBar, total: u64) {
    pb.set_length(total);
    pb.set_style(bar_style());
}

/// Central progress context managing multi-progress bars.
pub struct ProgressContext {
    multi: MultiProgress,
    is_tty: bool,
}

impl ProgressContext {
    /// Create new context, detecting TTY automatically.
    pub fn new() -> Self {
        let is_tty = std::io::stderr().is_terminal();
        Self {
            multi: MultiProgress::new(),
            is_tty,
        }
    }

    /// Create per-interval progress bar.
    ///
    /// TTY: visible bar with pending style (no bytes yet).
    /// Non-TTY: hidden (no-op).
    ///
    /// Call `upgrade_to_bar` once the total size is known.
    pub fn interval_bar(&self, name: &str) -> ProgressBar {
        if !self.is_tty {
            return ProgressBar::hidden();
        }

        let pb = self.multi.add(ProgressBar::new(0));
        pb.set_style(pending_style());
        // Truncate long names to keep bars aligned
        let display = if name.len() > 21 { &name[..21] } else { name };
        pb.set_prefix(display.to_string());
        pb
    }

    /// Whether running in TTY mode.
    pub fn is_tty(&self) -> bool {
        self.is_tty
    }

    /// Get reference to `MultiProgress` for log bridge.
    pub fn multi(&self) -> &MultiProgress {
        &self.multi
    }
}

impl Default for ProgressContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread-safe wrapper for `ProgressContext`.
pub type SharedProgress = Arc<ProgressContext>;

/// Observer drawing one bar per in-flight interval.
///
/// Every event is also forwarded to [`LogObserver`]; in TTY mode the log
/// level defaults to warn, so bars and log lines do not duplicate each other.
pub struct ProgressObserver {
    progress: SharedProgress,
    bars: Mutex<FxHashMap<NaiveDate, ProgressBar>>,
}

impl ProgressObserver {
    pub fn new(progress: SharedProgress) -> Self {
        Self {
            progress,
            bars: Mutex::new(FxHashMap::default()),
        }
    }

    fn with_bar(&self, key: NaiveDate, f: impl FnOnce(&ProgressBar)) {
        if let Ok(bars) = self.bars.lock() {
            if let Some(pb) = bars.get(&key) {
                f(pb);
            }
        }
    }

    fn remove_bar(&self, key: NaiveDate) {
        let pb = self.bars.lock().ok().and_then(|mut bars| bars.remove(&key));
        if let Some(pb) = pb {
            pb.finish_and_clear();
        }
    }
}

impl RetrievalObserver for ProgressObserver {
    fn on_event(&self, event: &RetrievalEvent<'_>) {
        LogObserver.on_event(event);

        let key = event.interval().start;
        match event {
            RetrievalEvent::Started { interval } => {
                let pb = self.progress.interval_bar(&interval.to_string());
                pb.set_message("searching...");
                if let Ok(mut bars) = self.bars.lock() {
                    bars.insert(key, pb);
                }
            }
            RetrievalEvent::OrderStatus { status, .. } => {
                self.with_bar(key, |pb| pb.set_message(format!("order {status}")));
            }
            RetrievalEvent::Transfer {
                transferred, total, ..
            } => {
                self.with_bar(key, |pb| {
                    if let Some(total) = total {
                        if pb.length() != Some(*total) {
                            upgrade_to_bar(pb, *total);
                        }
                    }
                    pb.set_message("downloading");
                    pb.set_position(*transferred);
                });
            }
            RetrievalEvent::Completed { .. } | RetrievalEvent::Failed { .. } => {
                self.remove_bar(key);
            }
            RetrievalEvent::Skipped { .. } => {}
        }
    }
}

/// Format number with thousand separators.
pub fn fmt_num(n: usize) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}
