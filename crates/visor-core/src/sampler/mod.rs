//! Frame sampling: turns a video into uniformly time-spaced still images
//! whose file names carry their provenance (see [`naming::FrameName`]).

pub mod ffmpeg;
pub mod naming;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, error, info};

use crate::error::Error;
use crate::progress::{Progress, ProgressReporter};
pub use ffmpeg::FfmpegSource;
pub use naming::FrameName;

pub const VIDEO_EXTENSIONS: [&str; 4] = ["mp4", "avi", "mov", "mkv"];

/// Container properties read once when a source is opened.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoInfo {
    pub path: PathBuf,
    pub fps: f64,
    pub frame_count: u64,
    pub duration_secs: f64,
}

/// A decodable video. Implementations must be able to produce any native
/// frame by index, in any order, any number of times.
pub trait VideoSource {
    fn info(&self) -> &VideoInfo;

    /// Writes native frame `native_index` to `dest` as a still image.
    /// Returns `Ok(false)` when the video has no such frame.
    fn extract_frame(&self, native_index: u64, dest: &Path) -> Result<bool, Error>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct SampledFrame {
    pub name: FrameName,
    pub path: PathBuf,
    pub native_index: u64,
    /// Exact timestamp (`native_index / fps`); the file name carries it truncated.
    pub timestamp_secs: f64,
}

#[derive(Debug, Clone)]
pub struct SamplingSummary {
    pub video_name: String,
    pub output_dir: PathBuf,
    pub frames_emitted: usize,
    pub frames_expected: usize,
    /// Images written by this run, in emission order.
    pub frame_paths: Vec<PathBuf>,
    pub info: VideoInfo,
}

pub struct FrameSampler<S: VideoSource> {
    source: S,
    video_name: String,
    video_dir: PathBuf,
    interval_secs: f64,
    extension: String,
}

impl<S: VideoSource> FrameSampler<S> {
    /// Frames land in `<output_root>/<video_name>/`.
    pub fn new(
        source: S,
        video_name: impl Into<String>,
        output_root: &Path,
        interval_secs: f64,
    ) -> Result<Self, Error> {
        if !interval_secs.is_finite() || interval_secs <= 0.0 {
            return Err(Error::InvalidConfig(format!(
                "sampling interval must be positive, got {}",
                interval_secs
            )));
        }
        let fps = source.info().fps;
        if !fps.is_finite() || fps <= 0.0 {
            return Err(Error::source_unavailable(
                &source.info().path,
                format!("non-positive frame rate {}", fps),
            ));
        }

        let video_name = video_name.into();
        Ok(Self {
            video_dir: output_root.join(&video_name),
            source,
            video_name,
            interval_secs,
            extension: "jpg".to_string(),
        })
    }

    pub fn with_extension(mut self, extension: &str) -> Self {
        self.extension = extension.trim_start_matches('.').to_string();
        self
    }

    pub fn video_name(&self) -> &str {
        &self.video_name
    }

    pub fn video_dir(&self) -> &Path {
        &self.video_dir
    }

    pub fn info(&self) -> &VideoInfo {
        self.source.info()
    }

    /// `floor(duration / interval)`; an estimate the real count may miss by one.
    pub fn frames_expected(&self) -> usize {
        (self.info().duration_secs / self.interval_secs + 1e-9).floor() as usize
    }

    /// Native frame nearest to `k * interval` seconds.
    fn native_index(&self, k: u64) -> u64 {
        (k as f64 * self.interval_secs * self.info().fps).round() as u64
    }

    /// Lazy sequence of sampled frames. Each call starts over at `k = 0`.
    pub fn frames(&self) -> SampledFrames<'_, S> {
        SampledFrames {
            sampler: self,
            next_k: 0,
            finished: false,
            dir_ready: false,
        }
    }

    /// Drains [`frames`](Self::frames) to disk, reporting progress after every
    /// emitted frame. The cancel flag is checked before each frame is decoded.
    pub fn sample_to_dir(
        &self,
        reporter: &dyn ProgressReporter,
        cancel: &AtomicBool,
    ) -> Result<SamplingSummary, Error> {
        let expected = self.frames_expected();
        let info = self.info();
        info!(
            "Sampling {} ({:.2} fps, {:.2}s) every {}s into {}",
            self.video_name,
            info.fps,
            info.duration_secs,
            self.interval_secs,
            self.video_dir.display()
        );

        let start = Instant::now();
        reporter.on_sampling_start(&self.video_name, expected);

        let mut frame_paths = Vec::with_capacity(expected + 1);
        let mut frames = self.frames();
        loop {
            if cancel.load(Ordering::Relaxed) {
                return Err(Error::Cancelled);
            }
            let Some(frame) = frames.next() else {
                break;
            };
            let frame = frame?;
            let emitted = frame_paths.len() + 1;
            debug!(
                "Saved frame at {:02}:{:02} to {}",
                frame.name.minutes(),
                frame.name.seconds(),
                frame.path.display()
            );
            frame_paths.push(frame.path);
            reporter.on_sampling_progress(Progress::new(emitted, expected));
        }
        let emitted = frame_paths.len();

        reporter.on_sampling_complete(&self.video_name, emitted, start.elapsed().as_secs_f64());
        info!("Extracted {} frames from {}", emitted, self.video_name);

        Ok(SamplingSummary {
            video_name: self.video_name.clone(),
            output_dir: self.video_dir.clone(),
            frames_emitted: emitted,
            frames_expected: expected,
            frame_paths,
            info: info.clone(),
        })
    }
}

pub struct SampledFrames<'a, S: VideoSource> {
    sampler: &'a FrameSampler<S>,
    next_k: u64,
    finished: bool,
    dir_ready: bool,
}

impl<S: VideoSource> Iterator for SampledFrames<'_, S> {
    type Item = Result<SampledFrame, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let sampler = self.sampler;
        let info = sampler.info();
        let k = self.next_k;
        let native_index = sampler.native_index(k);
        if native_index >= info.frame_count {
            self.finished = true;
            return None;
        }

        if !self.dir_ready {
            if let Err(e) = fs::create_dir_all(&sampler.video_dir) {
                self.finished = true;
                return Some(Err(e.into()));
            }
            self.dir_ready = true;
        }

        let timestamp_secs = native_index as f64 / info.fps;
        let Ok(sequence) = u32::try_from(k) else {
            self.finished = true;
            return None;
        };
        let name = FrameName::from_seconds(sampler.video_name.clone(), sequence, timestamp_secs);
        let path = sampler
            .video_dir
            .join(name.image_file_name(&sampler.extension));

        match sampler.source.extract_frame(native_index, &path) {
            Ok(true) => {
                self.next_k += 1;
                Some(Ok(SampledFrame {
                    name,
                    path,
                    native_index,
                    timestamp_secs,
                }))
            }
            Ok(false) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

/// Base name of a video file with its extension stripped.
pub fn video_name_for(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "video".to_string())
}

pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| {
            let ext = ext.to_string_lossy().to_lowercase();
            VIDEO_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Opens `video_path` with ffmpeg and samples it under `output_root`.
pub fn sample_video(
    video_path: &Path,
    output_root: &Path,
    interval_secs: f64,
    extension: &str,
    reporter: &dyn ProgressReporter,
    cancel: &AtomicBool,
) -> Result<SamplingSummary, Error> {
    let source = FfmpegSource::open(video_path)?;
    FrameSampler::new(source, video_name_for(video_path), output_root, interval_secs)?
        .with_extension(extension)
        .sample_to_dir(reporter, cancel)
}

/// Outcome of sampling several videos: a video that cannot be opened is
/// recorded in `failed` and does not stop the others.
#[derive(Debug, Default)]
pub struct BatchSampling {
    pub sampled: Vec<SamplingSummary>,
    pub failed: Vec<(PathBuf, Error)>,
}

pub fn sample_videos(
    videos: &[PathBuf],
    output_root: &Path,
    interval_secs: f64,
    extension: &str,
    reporter: &dyn ProgressReporter,
    cancel: &AtomicBool,
) -> Result<BatchSampling, Error> {
    let mut batch = BatchSampling::default();
    for video in videos {
        match sample_video(video, output_root, interval_secs, extension, reporter, cancel) {
            Ok(summary) => batch.sampled.push(summary),
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e @ Error::SourceUnavailable { .. }) => {
                error!("Skipping {}: {}", video.display(), e);
                batch.failed.push((video.clone(), e));
            }
            Err(e) => return Err(e),
        }
    }
    Ok(batch)
}

/// [`sample_videos`] over everything [`find_videos`] returns for `input_dir`.
pub fn sample_videos_in_directory(
    input_dir: &Path,
    output_root: &Path,
    interval_secs: f64,
    extension: &str,
    reporter: &dyn ProgressReporter,
    cancel: &AtomicBool,
) -> Result<BatchSampling, Error> {
    let videos = find_videos(input_dir)?;
    info!("Found {} videos in {}", videos.len(), input_dir.display());
    sample_videos(&videos, output_root, interval_secs, extension, reporter, cancel)
}

/// Every video file directly inside `input_dir`, sorted by name.
pub fn find_videos(input_dir: &Path) -> Result<Vec<PathBuf>, Error> {
    let mut videos: Vec<PathBuf> = fs::read_dir(input_dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && is_video_file(p))
        .collect();
    videos.sort();
    Ok(videos)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_name_strips_extension() {
        assert_eq!(video_name_for(Path::new("/uploads/site_a.mp4")), "site_a");
        assert_eq!(video_name_for(Path::new("clip.v2.mov")), "clip.v2");
    }

    #[test]
    fn test_is_video_file_case_insensitive() {
        assert!(is_video_file(Path::new("a.MP4")));
        assert!(is_video_file(Path::new("a.mkv")));
        assert!(!is_video_file(Path::new("a.jpg")));
        assert!(!is_video_file(Path::new("mp4")));
    }
}
