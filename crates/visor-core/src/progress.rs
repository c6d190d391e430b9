/// One progress observation: `done` of `total` units, `fraction` in `[0, 1]`.
///
/// `total` may be an estimate (the sampler's expected frame count), so `done`
/// can exceed it; the fraction is clamped rather than treated as an error.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    pub done: usize,
    pub total: usize,
    pub fraction: f64,
}

impl Progress {
    pub fn new(done: usize, total: usize) -> Self {
        let fraction = if total == 0 {
            if done == 0 {
                0.0
            } else {
                1.0
            }
        } else {
            (done as f64 / total as f64).min(1.0)
        };
        Self {
            done,
            total,
            fraction,
        }
    }
}

/// Trait for reporting pipeline progress.
///
/// CLI implements with indicatif bars; tests record events.
/// All methods have default no-op implementations.
pub trait ProgressReporter: Send + Sync {
    fn on_sampling_start(&self, _video_name: &str, _frames_expected: usize) {}
    fn on_sampling_progress(&self, _progress: Progress) {}
    fn on_sampling_complete(&self, _video_name: &str, _frames_emitted: usize, _duration_secs: f64) {}
    fn on_analysis_start(&self, _total_frames: usize) {}
    fn on_analysis_progress(&self, _progress: Progress) {}
    fn on_analysis_complete(&self, _failed: usize, _total: usize, _duration_secs: f64) {}
    fn on_import_start(&self, _documents: usize) {}
    fn on_import_progress(&self, _progress: Progress) {}
    fn on_import_complete(&self, _frames: usize, _duration_secs: f64) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}
