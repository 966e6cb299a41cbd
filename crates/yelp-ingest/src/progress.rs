//! Shared progress counter and its console gauge.

use indicatif::{ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicU64, Ordering};

/// Decorative glyphs cycled by the gauge's spinner. The last one marks a
/// finished phase.
const GLYPHS: &[&str] = &[
    "ಥ_ಥ",
    "(╬ ಠ益ಠ)",
    "ლ(｀ー´ლ)",
    "(╯°□°）╯︵ ┻━┻",
    "༼∵༽ ༼⍨༽ ༼⍢༽ ༼⍤༽",
    "༼ ༎ຶ ෴ ༎ຶ༽",
    "{ಠʖಠ}",
    "ヽ(•‿•)ノ",
];

const TEMPLATE: &str = "{msg:<22} [{bar:100}] {percent:>3}% {spinner}";

/// Point-in-time view of the counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub processed: u64,
    pub expected: u64,
}

impl ProgressSnapshot {
    /// Completion in percent, clamped to 100. `None` when nothing is expected.
    pub fn percent(&self) -> Option<f64> {
        if self.expected == 0 {
            return None;
        }
        Some(100.0 * self.processed.min(self.expected) as f64 / self.expected as f64)
    }
}

/// Counts processed records for the current phase.
///
/// Any worker may [`increment`](Self::increment); only the designated
/// reporter calls [`render`](Self::render).
#[derive(Debug)]
pub struct ProgressReporter {
    processed: AtomicU64,
    expected: AtomicU64,
    bar: ProgressBar,
}

impl ProgressReporter {
    pub fn new(visible: bool) -> Self {
        let bar = if visible {
            ProgressBar::new(0)
        } else {
            ProgressBar::hidden()
        };
        let style = ProgressStyle::with_template(TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉ ")
            .tick_strings(GLYPHS);
        bar.set_style(style);

        Self {
            processed: AtomicU64::new(0),
            expected: AtomicU64::new(0),
            bar,
        }
    }

    pub fn hidden() -> Self {
        Self::new(false)
    }

    /// Reset the counter for a new phase.
    pub fn start_phase(&self, label: &'static str, expected: u64) {
        self.processed.store(0, Ordering::SeqCst);
        self.expected.store(expected, Ordering::SeqCst);
        self.bar.reset();
        self.bar.set_length(expected);
        self.bar.set_message(label);
    }

    pub fn increment(&self, count: u64) {
        self.processed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            expected: self.expected.load(Ordering::SeqCst),
        }
    }

    /// Redraw the gauge. Skipped while nothing is expected.
    pub fn render(&self) {
        let snapshot = self.snapshot();
        if snapshot.expected == 0 {
            return;
        }
        self.bar
            .set_position(snapshot.processed.min(snapshot.expected));
        self.bar.tick();
    }

    /// Leave the last gauge line on screen and end it with a newline.
    pub fn finish(&self) {
        if self.snapshot().expected > 0 {
            self.render();
            self.bar.finish();
        } else {
            self.bar.finish_and_clear();
        }
    }
}
