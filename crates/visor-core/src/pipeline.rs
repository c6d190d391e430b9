use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

use crate::analyzer::{FrameAnalyzer, VisionService};
use crate::config::AppConfig;
use crate::error::Error;
use crate::importer::{ImportStats, ResultImporter};
use crate::progress::ProgressReporter;
use crate::prompt::build_analysis_prompt;
use crate::sampler::{video_name_for, FfmpegSource, FrameSampler, SamplingSummary, VideoSource};
use crate::storage::Database;

/// Runs sampling, analysis and import for a batch of videos with one
/// request-scoped configuration.
pub struct SafetyPipeline {
    config: AppConfig,
    cancel: Arc<AtomicBool>,
}

#[derive(Debug)]
pub struct PipelineResult {
    pub sampling_duration: Duration,
    pub analysis_duration: Duration,
    pub import_duration: Duration,
    pub sampled: Vec<SamplingSummary>,
    /// Videos that could not be opened, with the reason.
    pub failed_videos: Vec<(String, Error)>,
    pub frames_analyzed: usize,
    pub analysis_failures: usize,
    pub import: ImportStats,
}

impl PipelineResult {
    pub fn frames_sampled(&self) -> usize {
        self.sampled.iter().map(|s| s.frames_emitted).sum()
    }
}

impl SafetyPipeline {
    pub fn new(config: AppConfig) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self {
            config,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Setting the token stops the run at the next frame boundary with
    /// [`Error::Cancelled`].
    pub fn cancel_token(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn prompt(&self) -> String {
        build_analysis_prompt(&self.config.safety_checks, &self.config.custom_queries)
    }

    /// Opens each video with ffmpeg and runs the full pipeline. A video that
    /// cannot be opened is recorded and skipped.
    pub fn run<V: VisionService>(
        &self,
        videos: &[PathBuf],
        service: V,
        db: &Database,
        reporter: &dyn ProgressReporter,
    ) -> Result<PipelineResult, Error> {
        let mut sources = Vec::with_capacity(videos.len());
        let mut failed = Vec::new();
        for path in videos {
            match FfmpegSource::open(path) {
                Ok(source) => sources.push((video_name_for(path), source)),
                Err(e @ Error::SourceUnavailable { .. }) => {
                    error!("Cannot open {}: {}", path.display(), e);
                    failed.push((video_name_for(path), e));
                }
                Err(e) => return Err(e),
            }
        }

        let mut result = self.run_sources(sources, service, db, reporter)?;
        failed.append(&mut result.failed_videos);
        result.failed_videos = failed;
        Ok(result)
    }

    /// The pipeline over already-opened sources, each paired with the name
    /// its frames are filed under. Names must be unique within a run; a
    /// later source reusing a name is recorded as failed and not sampled.
    pub fn run_sources<S: VideoSource, V: VisionService>(
        &self,
        sources: Vec<(String, S)>,
        service: V,
        db: &Database,
        reporter: &dyn ProgressReporter,
    ) -> Result<PipelineResult, Error> {
        let config = &self.config;
        let frames_root = PathBuf::from(&config.frames_dir);
        let results_root = PathBuf::from(&config.results_dir);

        // Phase 1: Sample
        info!("Sampling {} videos...", sources.len());
        let sampling_start = Instant::now();
        let mut sampled = Vec::new();
        let mut failed_videos = Vec::new();
        let mut names = HashSet::new();
        for (name, source) in sources {
            if !names.insert(name.clone()) {
                let e = Error::source_unavailable(
                    &source.info().path,
                    format!("another video in this run is already named {}", name),
                );
                error!("Skipping {}: {}", name, e);
                failed_videos.push((name, e));
                continue;
            }
            let sampler = match FrameSampler::new(
                source,
                name.clone(),
                &frames_root,
                config.interval_seconds,
            ) {
                Ok(sampler) => sampler.with_extension(&config.image_extension),
                Err(e @ Error::SourceUnavailable { .. }) => {
                    error!("Skipping {}: {}", name, e);
                    failed_videos.push((name, e));
                    continue;
                }
                Err(e) => return Err(e),
            };
            sampled.push(sampler.sample_to_dir(reporter, &self.cancel)?);
        }
        let sampling_duration = sampling_start.elapsed();

        // Phase 2: Analyze only what this run sampled
        info!("Analyzing sampled frames...");
        let analysis_start = Instant::now();
        let mut analyzer = FrameAnalyzer::new(
            service,
            self.prompt(),
            Duration::from_millis(config.analysis.request_spacing_ms),
        );
        let mut result_files = Vec::new();
        let mut frames_analyzed = 0;
        let mut analysis_failures = 0;
        for summary in &sampled {
            let summary_results = analyzer.analyze_files(
                &summary.output_dir,
                &summary.frame_paths,
                &results_root.join(&summary.video_name),
                reporter,
                &self.cancel,
            )?;
            frames_analyzed += summary_results.total;
            analysis_failures += summary_results.failed;
            result_files.extend(summary_results.result_files);
        }
        let analysis_duration = analysis_start.elapsed();
        debug!(
            "Analysis completed in {:.2}s, {} frames, {} failed",
            analysis_duration.as_secs_f64(),
            frames_analyzed,
            analysis_failures
        );

        // Phase 3: Import
        info!("Importing {} result documents...", result_files.len());
        let import_start = Instant::now();
        let importer = ResultImporter::new(config.import_mode).with_video_info(
            sampled
                .iter()
                .map(|s| (s.video_name.clone(), s.info.clone())),
        );
        let import = importer.import_files(db, &result_files, reporter)?;
        let import_duration = import_start.elapsed();

        Ok(PipelineResult {
            sampling_duration,
            analysis_duration,
            import_duration,
            sampled,
            failed_videos,
            frames_analyzed,
            analysis_failures,
            import,
        })
    }
}
