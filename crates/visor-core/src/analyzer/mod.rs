pub mod client;
pub mod document;

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::Error;
use crate::progress::{Progress, ProgressReporter};
use crate::sampler::naming::RESULT_SUFFIX;
pub use client::{EncodedImage, OpenAiVisionClient, VisionService};
pub use document::{extract_json_payload, parse_response, ResultDocument};

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Enforces a minimum gap between the starts of consecutive requests.
#[derive(Debug)]
pub struct RequestSpacing {
    min_gap: Duration,
    last_request: Option<Instant>,
}

impl RequestSpacing {
    pub fn new(min_gap: Duration) -> Self {
        Self {
            min_gap,
            last_request: None,
        }
    }

    /// Blocks until `min_gap` has passed since the previous call, then marks
    /// now as the latest request. The first call never waits.
    pub fn wait(&mut self) {
        if let Some(last) = self.last_request {
            let elapsed = last.elapsed();
            if elapsed < self.min_gap {
                thread::sleep(self.min_gap - elapsed);
            }
        }
        self.last_request = Some(Instant::now());
    }
}

#[derive(Debug, Clone, Default)]
pub struct AnalysisSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Images whose result path was already taken in this batch (`x.jpg`
    /// and `x.png` side by side); they are not sent.
    pub skipped: usize,
    pub result_files: Vec<PathBuf>,
}

/// Sends frames to a [`VisionService`] one at a time and writes one result
/// document per frame. A failed request or unparseable response becomes an
/// error document; it never stops the batch.
pub struct FrameAnalyzer<V: VisionService> {
    service: V,
    prompt: String,
    spacing: RequestSpacing,
}

impl<V: VisionService> FrameAnalyzer<V> {
    pub fn new(service: V, prompt: String, min_request_gap: Duration) -> Self {
        Self {
            service,
            prompt,
            spacing: RequestSpacing::new(min_request_gap),
        }
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// Analyzes a single image. Always yields a document.
    pub fn analyze_image(&mut self, image_path: &Path) -> ResultDocument {
        let image_path_str = image_path.to_string_lossy().into_owned();

        let image = match EncodedImage::from_file(image_path) {
            Ok(image) => image,
            Err(e) => {
                warn!("Could not read {}: {}", image_path.display(), e);
                return failed(e.to_string(), image_path_str);
            }
        };

        self.spacing.wait();
        match self.service.analyze(&self.prompt, &image) {
            Ok(content) => {
                let doc = ResultDocument::from_response(&content, image_path_str, now_iso8601());
                if let ResultDocument::Failed { error, .. } = &doc {
                    warn!("{} for {}", error, image_path.display());
                }
                doc
            }
            Err(e) => {
                warn!("API request error for {}: {}", image_path.display(), e);
                failed(e.to_string(), image_path_str)
            }
        }
    }

    /// Analyzes every image under `frames_dir`, mirroring its directory
    /// layout under `results_dir`.
    pub fn analyze_directory(
        &mut self,
        frames_dir: &Path,
        results_dir: &Path,
        reporter: &dyn ProgressReporter,
        cancel: &AtomicBool,
    ) -> Result<AnalysisSummary, Error> {
        let images = find_images(frames_dir);
        info!("Found {} images to analyze in {}", images.len(), frames_dir.display());
        self.analyze_files(frames_dir, &images, results_dir, reporter, cancel)
    }

    /// Analyzes exactly `images`, in the order given. Result paths are laid
    /// out relative to `frames_dir` as in [`analyze_directory`](Self::analyze_directory).
    /// Progress is reported after every image, success or failure; the
    /// cancel flag is checked between images.
    pub fn analyze_files(
        &mut self,
        frames_dir: &Path,
        images: &[PathBuf],
        results_dir: &Path,
        reporter: &dyn ProgressReporter,
        cancel: &AtomicBool,
    ) -> Result<AnalysisSummary, Error> {
        let total = images.len();
        let start = Instant::now();
        reporter.on_analysis_start(total);
        fs::create_dir_all(results_dir)?;

        let mut summary = AnalysisSummary {
            total,
            ..Default::default()
        };
        let mut claimed = HashSet::with_capacity(total);

        for (i, image_path) in images.iter().enumerate() {
            if cancel.load(Ordering::Relaxed) {
                return Err(Error::Cancelled);
            }
            debug!("Processing image {}/{}: {}", i + 1, total, image_path.display());

            let result_path = result_path_for(frames_dir, results_dir, image_path);
            if !claimed.insert(result_path.clone()) {
                warn!(
                    "Skipping {}: {} already written for another image",
                    image_path.display(),
                    result_path.display()
                );
                summary.skipped += 1;
                reporter.on_analysis_progress(Progress::new(i + 1, total));
                continue;
            }

            let doc = self.analyze_image(image_path);
            if doc.is_failure() {
                summary.failed += 1;
            } else {
                summary.succeeded += 1;
            }

            write_result(&result_path, &doc)?;
            debug!("Saved analysis to {}", result_path.display());
            summary.result_files.push(result_path);

            reporter.on_analysis_progress(Progress::new(i + 1, total));
        }

        reporter.on_analysis_complete(summary.failed, total, start.elapsed().as_secs_f64());
        info!(
            "Completed analysis of {} images ({} failed, {} skipped)",
            total, summary.failed, summary.skipped
        );
        Ok(summary)
    }
}

fn failed(error: String, image_path: String) -> ResultDocument {
    ResultDocument::Failed {
        error,
        raw_response: None,
        image_path,
        timestamp: now_iso8601(),
    }
}

fn now_iso8601() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// All `.png`/`.jpg`/`.jpeg` files under `dir`, in sorted path order.
pub fn find_images(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Error walking {}: {}", dir.display(), e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .map(|ext| {
                    let ext = ext.to_string_lossy().to_lowercase();
                    IMAGE_EXTENSIONS.contains(&ext.as_str())
                })
                .unwrap_or(false)
        })
        .collect()
}

/// `<results_dir>/<image's dir relative to frames_dir>/<image stem>_analysis.json`
pub fn result_path_for(frames_dir: &Path, results_dir: &Path, image_path: &Path) -> PathBuf {
    let relative_dir = image_path
        .strip_prefix(frames_dir)
        .ok()
        .and_then(|rel| rel.parent())
        .unwrap_or_else(|| Path::new(""));
    let stem = image_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    results_dir
        .join(relative_dir)
        .join(format!("{}{}", stem, RESULT_SUFFIX))
}

fn write_result(path: &Path, doc: &ResultDocument) -> Result<(), Error> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let body = serde_json::to_string_pretty(&doc.to_json())?;
    fs::write(path, body)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_path_mirrors_tree() {
        let path = result_path_for(
            Path::new("data/frames"),
            Path::new("results"),
            Path::new("data/frames/clip/clip_frame_0001_00m05s.jpg"),
        );
        assert_eq!(
            path,
            PathBuf::from("results/clip/clip_frame_0001_00m05s_analysis.json")
        );
    }

    #[test]
    fn test_result_path_outside_root_lands_at_top() {
        let path = result_path_for(
            Path::new("data/frames"),
            Path::new("results"),
            Path::new("/elsewhere/x.png"),
        );
        assert_eq!(path, PathBuf::from("results/x_analysis.json"));
    }

    #[test]
    fn test_request_spacing_enforces_gap() {
        let mut spacing = RequestSpacing::new(Duration::from_millis(30));
        let start = Instant::now();
        spacing.wait();
        assert!(start.elapsed() < Duration::from_millis(30));
        spacing.wait();
        assert!(start.elapsed() >= Duration::from_millis(30));
    }
}
