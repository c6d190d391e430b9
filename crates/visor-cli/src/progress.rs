use indicatif::{ProgressBar, ProgressStyle};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use visor_core::{Progress, ProgressReporter};

const TICK_CHARS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

/// CLI progress reporter using indicatif progress bars.
///
/// - Sampling: one bar per video, sized by the expected frame count
/// - Analysis: one bar per frame directory
/// - Import: one bar over all result documents
pub struct CliReporter {
    bar: Mutex<Option<ProgressBar>>,
}

impl CliReporter {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<ProgressBar>> {
        self.bar.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn start_bar(&self, label: &str, total: usize) {
        let pb = ProgressBar::new(total as u64);
        let template = format!(
            "  {{spinner:.cyan}} {} [{{bar:30.cyan/dim}}] {{pos}}/{{len}} ({{eta}} remaining)",
            label
        );
        let style = ProgressStyle::with_template(&template)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("━╸─")
            .tick_chars(TICK_CHARS);
        pb.set_style(style);
        pb.enable_steady_tick(Duration::from_millis(80));

        let mut guard = self.lock();
        if let Some(old) = guard.take() {
            old.finish_and_clear();
        }
        *guard = Some(pb);
    }

    fn advance(&self, progress: Progress) {
        let guard = self.lock();
        if let Some(pb) = guard.as_ref() {
            // The sampler's total is an estimate; grow the bar instead of overflowing it.
            if progress.done as u64 > pb.length().unwrap_or(0) {
                pb.set_length(progress.done as u64);
            }
            pb.set_position(progress.done as u64);
        }
    }

    fn finish_bar(&self) {
        if let Some(pb) = self.lock().take() {
            pb.finish_and_clear();
        }
    }
}

impl ProgressReporter for CliReporter {
    fn on_sampling_start(&self, video_name: &str, frames_expected: usize) {
        self.start_bar(&format!("Sampling {}", video_name), frames_expected);
    }

    fn on_sampling_progress(&self, progress: Progress) {
        self.advance(progress);
    }

    fn on_sampling_complete(&self, video_name: &str, frames_emitted: usize, duration_secs: f64) {
        self.finish_bar();
        eprintln!(
            "  \x1b[32m✓\x1b[0m Sampled {}: {} frames in {:.2}s",
            video_name, frames_emitted, duration_secs
        );
    }

    fn on_analysis_start(&self, total_frames: usize) {
        self.start_bar("Analyzing", total_frames);
    }

    fn on_analysis_progress(&self, progress: Progress) {
        self.advance(progress);
    }

    fn on_analysis_complete(&self, failed: usize, total: usize, duration_secs: f64) {
        self.finish_bar();
        eprintln!(
            "  \x1b[32m✓\x1b[0m Analysis complete: {} frames ({} failed) in {:.2}s",
            total, failed, duration_secs
        );
    }

    fn on_import_start(&self, documents: usize) {
        self.start_bar("Importing", documents);
    }

    fn on_import_progress(&self, progress: Progress) {
        self.advance(progress);
    }

    fn on_import_complete(&self, frames: usize, duration_secs: f64) {
        self.finish_bar();
        eprintln!(
            "  \x1b[32m✓\x1b[0m Import complete: {} frames in {:.2}s",
            frames, duration_secs
        );
    }
}
