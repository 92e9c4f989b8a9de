//! Progress reporting service
//!
//! This module separates progress reporting concerns from the download
//! pipeline, allowing different frontends to implement their own progress
//! handling. Progress is a side channel: it never affects outcomes.

use crate::types::{Outcome, OutcomeEvent, RunSummary};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

/// Observable completion counter for one pool run
#[derive(Debug)]
pub struct RunProgress {
    total: usize,
    completed: AtomicUsize,
    succeeded: AtomicUsize,
    skipped: AtomicUsize,
    failed: AtomicUsize,
    started: Instant,
}

impl RunProgress {
    #[must_use]
    pub fn new(total: usize) -> Self {
        Self {
            total,
            completed: AtomicUsize::new(0),
            succeeded: AtomicUsize::new(0),
            skipped: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            started: Instant::now(),
        }
    }

    /// Count one terminal outcome and return the new completed count
    pub fn record(&self, outcome: &Outcome) -> usize {
        let counter = match outcome {
            Outcome::Success { .. } => &self.succeeded,
            Outcome::SkippedAlreadyDone { .. } => &self.skipped,
            Outcome::GaveUpAfterRetries { .. } => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.completed.fetch_add(1, Ordering::AcqRel) + 1
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.total
    }

    #[must_use]
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Acquire)
    }

    /// Point-in-time view with rate and ETA
    #[must_use]
    pub fn snapshot(&self) -> ProgressUpdate {
        let completed = self.completed();
        let elapsed = self.started.elapsed();
        let elapsed_seconds = elapsed.as_secs_f64();

        let rate = if elapsed_seconds > 0.0 && completed > 0 {
            completed as f64 / elapsed_seconds
        } else {
            0.0
        };

        let remaining = self.total.saturating_sub(completed);
        let eta_seconds = if rate > 0.0 {
            Some((remaining as f64 / rate) as u64)
        } else {
            None
        };

        ProgressUpdate {
            completed,
            total: self.total,
            succeeded: self.succeeded.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            elapsed_ms: elapsed.as_millis() as u64,
            rate,
            eta_seconds,
        }
    }
}

/// Progress snapshot for one run
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    /// Rows that reached a terminal state
    pub completed: usize,
    pub total: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Elapsed time since the run started (milliseconds)
    pub elapsed_ms: u64,
    /// Rows per second
    pub rate: f64,
    /// Estimated time remaining in seconds
    pub eta_seconds: Option<u64>,
}

impl ProgressUpdate {
    /// Completion percentage (0-100)
    #[must_use]
    pub fn percentage(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        ((self.completed * 100) / self.total).min(100) as u8
    }
}

/// Trait for reporting progress during a download run
pub trait ProgressReporter: Send + Sync {
    /// A run over `total` rows is starting
    fn report_start(&self, label: &str, total: usize) {
        let _ = (label, total);
    }

    /// Report a progress update after a row finished
    fn report_progress(&self, update: &ProgressUpdate);

    /// Report one finished row
    fn report_outcome(&self, event: &OutcomeEvent) {
        let _ = event;
    }

    /// Report run completion with the final summary
    fn report_completion(&self, summary: &RunSummary);
}

/// No-op progress reporter that discards all progress updates
pub struct NoOpProgressReporter;

impl ProgressReporter for NoOpProgressReporter {
    fn report_progress(&self, _update: &ProgressUpdate) {
        // Intentionally empty - discards progress updates
    }

    fn report_completion(&self, _summary: &RunSummary) {
        // Intentionally empty - discards completion notification
    }
}

/// Console progress reporter that logs a line every `interval` rows
pub struct ConsoleProgressReporter {
    interval: usize,
    verbose: bool,
}

impl ConsoleProgressReporter {
    /// Create a new console progress reporter
    ///
    /// # Arguments
    /// * `interval` - Log every `interval` completed rows (minimum 1)
    /// * `verbose` - Whether to log every failed row as well
    #[must_use]
    pub fn new(interval: usize, verbose: bool) -> Self {
        Self {
            interval: interval.max(1),
            verbose,
        }
    }

    /// Format ETA in seconds to human-readable string
    fn format_eta(eta_seconds: Option<u64>) -> String {
        match eta_seconds {
            Some(seconds) if seconds < 60 => format!("{}s", seconds),
            Some(seconds) if seconds < 3600 => format!("{}m {}s", seconds / 60, seconds % 60),
            Some(seconds) => format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60),
            None => "calculating...".to_string(),
        }
    }
}

impl ProgressReporter for ConsoleProgressReporter {
    fn report_start(&self, label: &str, total: usize) {
        log::info!("Start to download {} {} image(s)", total, label);
    }

    fn report_progress(&self, update: &ProgressUpdate) {
        if update.completed % self.interval == 0 || update.completed == update.total {
            log::info!(
                "[{}%] {}/{} images ({:.1}/s) - ETA: {}",
                update.percentage(),
                update.completed,
                update.total,
                update.rate,
                Self::format_eta(update.eta_seconds)
            );
        }
    }

    fn report_outcome(&self, event: &OutcomeEvent) {
        if self.verbose {
            if let Outcome::GaveUpAfterRetries { last_failure, .. } = &event.outcome {
                log::info!("Failed {}: {}", event.row.id(), last_failure);
            }
        }
    }

    fn report_completion(&self, summary: &RunSummary) {
        log::info!(
            "Completed {} image(s): {} downloaded, {} already present, {} failed",
            summary.total,
            summary.succeeded,
            summary.skipped,
            summary.failed
        );
    }
}

/// Interactive progress bar for the CLI
#[cfg(feature = "cli")]
pub struct BarProgressReporter {
    bar: std::sync::Mutex<Option<indicatif::ProgressBar>>,
}

#[cfg(feature = "cli")]
impl BarProgressReporter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            bar: std::sync::Mutex::new(None),
        }
    }

    fn with_bar(&self, f: impl FnOnce(&indicatif::ProgressBar)) {
        if let Ok(guard) = self.bar.lock() {
            if let Some(bar) = guard.as_ref() {
                f(bar);
            }
        }
    }
}

#[cfg(feature = "cli")]
impl Default for BarProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "cli")]
impl ProgressReporter for BarProgressReporter {
    fn report_start(&self, label: &str, total: usize) {
        use indicatif::{ProgressBar, ProgressStyle};

        let bar = ProgressBar::new(total as u64);
        if let Ok(style) = ProgressStyle::default_bar().template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec}, ETA {eta}) {msg}",
        ) {
            bar.set_style(style.progress_chars("#>-"));
        }
        bar.set_message(label.to_string());

        if let Ok(mut guard) = self.bar.lock() {
            *guard = Some(bar);
        }
    }

    fn report_progress(&self, update: &ProgressUpdate) {
        self.with_bar(|bar| bar.set_position(update.completed as u64));
    }

    fn report_completion(&self, summary: &RunSummary) {
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(bar) = guard.take() {
                bar.finish_with_message(format!(
                    "done: {} downloaded, {} skipped, {} failed",
                    summary.succeeded, summary.skipped, summary.failed
                ));
            }
        }
    }
}

/// Create the progress reporter used by the CLI
///
/// An interactive bar when `show_progress` is set, otherwise periodic log lines.
#[must_use]
pub fn create_cli_progress_reporter(
    show_progress: bool,
    verbose: bool,
) -> std::sync::Arc<dyn ProgressReporter> {
    #[cfg(feature = "cli")]
    if show_progress {
        return std::sync::Arc::new(BarProgressReporter::new());
    }
    #[cfg(not(feature = "cli"))]
    let _ = show_progress;

    std::sync::Arc::new(ConsoleProgressReporter::new(1000, verbose))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::types::Row;
    use std::path::PathBuf;
    use std::sync::Mutex;

    struct TestProgressReporter {
        updates: Mutex<Vec<ProgressUpdate>>,
        completions: Mutex<usize>,
    }

    impl ProgressReporter for TestProgressReporter {
        fn report_progress(&self, update: &ProgressUpdate) {
            self.updates.lock().unwrap().push(update.clone());
        }

        fn report_completion(&self, _summary: &RunSummary) {
            *self.completions.lock().unwrap() += 1;
        }
    }

    #[test]
    fn test_run_progress_counts() {
        let progress = RunProgress::new(3);
        assert_eq!(progress.completed(), 0);

        assert_eq!(
            progress.record(&Outcome::SkippedAlreadyDone {
                path: PathBuf::from("a.jpg"),
            }),
            1
        );
        assert_eq!(
            progress.record(&Outcome::GaveUpAfterRetries {
                attempts: 3,
                last_failure: FetchError::transport("reset"),
            }),
            2
        );

        let snapshot = progress.snapshot();
        assert_eq!(snapshot.completed, 2);
        assert_eq!(snapshot.total, 3);
        assert_eq!(snapshot.skipped, 1);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.succeeded, 0);
        assert_eq!(snapshot.percentage(), 66);
    }

    #[test]
    fn test_empty_run_is_complete() {
        let progress = RunProgress::new(0);
        assert_eq!(progress.snapshot().percentage(), 100);
        assert_eq!(progress.snapshot().eta_seconds, None);
    }

    #[test]
    fn test_format_eta() {
        assert_eq!(ConsoleProgressReporter::format_eta(Some(42)), "42s");
        assert_eq!(ConsoleProgressReporter::format_eta(Some(125)), "2m 5s");
        assert_eq!(ConsoleProgressReporter::format_eta(Some(7260)), "2h 1m");
        assert_eq!(ConsoleProgressReporter::format_eta(None), "calculating...");
    }

    #[test]
    fn test_reporters_accept_events() {
        let row = Row::new("1", "http://x/a.jpg");
        let event = OutcomeEvent {
            row,
            outcome: Outcome::GaveUpAfterRetries {
                attempts: 1,
                last_failure: FetchError::Cancelled,
            },
        };
        let summary = RunSummary::new(1);
        let update = RunProgress::new(1).snapshot();

        for reporter in [
            Box::new(NoOpProgressReporter) as Box<dyn ProgressReporter>,
            Box::new(ConsoleProgressReporter::new(1, true)),
        ] {
            reporter.report_start("train", 1);
            reporter.report_progress(&update);
            reporter.report_outcome(&event);
            reporter.report_completion(&summary);
        }
    }

    #[test]
    fn test_custom_reporter_receives_updates() {
        let reporter = TestProgressReporter {
            updates: Mutex::new(Vec::new()),
            completions: Mutex::new(0),
        };
        let progress = RunProgress::new(1);
        progress.record(&Outcome::SkippedAlreadyDone {
            path: PathBuf::from("a.jpg"),
        });
        reporter.report_progress(&progress.snapshot());
        reporter.report_completion(&RunSummary::new(1));

        assert_eq!(reporter.updates.lock().unwrap().len(), 1);
        assert_eq!(*reporter.completions.lock().unwrap(), 1);
    }
}
