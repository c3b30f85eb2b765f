use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Mutex;

/// Trait for reporting run progress.
///
/// The CLI implements it with indicatif; tests and embedders use
/// `SilentReporter`. All methods have default no-op implementations.
pub trait ProgressReporter: Send + Sync {
    fn on_scan_start(&self) {}
    fn on_scan_complete(&self, _total_files: usize) {}
    fn on_classify_start(&self, _total_files: usize) {}
    fn on_file_done(&self, _files_done: usize, _total_files: usize) {}
    fn on_classify_complete(&self, _cache_hits: u64, _cache_misses: u64) {}
    fn on_report_start(&self) {}
    fn on_report_complete(&self) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}

/// CLI progress reporter using indicatif.
///
/// - Scan phase: spinner (unknown total upfront)
/// - Classify/organize phase: progress bar (total known from scan)
/// - Report phase: spinner
pub struct CliReporter {
    bar: Mutex<Option<ProgressBar>>,
}

impl CliReporter {
    pub fn new() -> CliReporter {
        CliReporter {
            bar: Mutex::new(None),
        }
    }

    fn set_bar(&self, pb: ProgressBar) {
        let mut guard = self.bar.lock().unwrap();
        if let Some(old) = guard.take() {
            old.finish_and_clear();
        }
        *guard = Some(pb);
    }

    fn finish_bar(&self) {
        let mut guard = self.bar.lock().unwrap();
        if let Some(pb) = guard.take() {
            pb.finish_and_clear();
        }
    }

    fn spinner(&self, message: &'static str) {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap()
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
        );
        pb.set_message(message);
        pb.enable_steady_tick(std::time::Duration::from_millis(80));
        self.set_bar(pb);
    }
}

impl Default for CliReporter {
    fn default() -> Self {
        CliReporter::new()
    }
}

impl ProgressReporter for CliReporter {
    fn on_scan_start(&self) {
        self.spinner("Scanning inbox...");
    }

    fn on_scan_complete(&self, total_files: usize) {
        self.finish_bar();
        eprintln!("  \x1b[32m✓\x1b[0m Scan complete: {} files", total_files);
    }

    fn on_classify_start(&self, total_files: usize) {
        let pb = ProgressBar::new(total_files as u64);
        pb.set_style(
            ProgressStyle::with_template(
                "  {spinner:.cyan} Processing [{bar:30.cyan/dim}] {pos}/{len} files ({eta} remaining)",
            )
            .unwrap()
            .progress_chars("━╸─")
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
        );
        pb.enable_steady_tick(std::time::Duration::from_millis(80));
        self.set_bar(pb);
    }

    fn on_file_done(&self, files_done: usize, _total_files: usize) {
        let guard = self.bar.lock().unwrap();
        if let Some(pb) = guard.as_ref() {
            pb.set_position(files_done as u64);
        }
    }

    fn on_classify_complete(&self, cache_hits: u64, cache_misses: u64) {
        self.finish_bar();
        eprintln!(
            "  \x1b[32m✓\x1b[0m Processing complete: {} cache hits, {} classifier calls",
            cache_hits, cache_misses
        );
    }

    fn on_report_start(&self) {
        self.spinner("Writing reports...");
    }

    fn on_report_complete(&self) {
        self.finish_bar();
    }
}
