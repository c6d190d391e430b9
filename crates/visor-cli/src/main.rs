mod commands;
mod logging;
mod progress;

use std::env;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use clap::{CommandFactory, Parser};
use colored::*;
use commands::{Cli, Commands};
use dotenv::dotenv;
use progress::CliReporter;
use tracing::{error, info, warn};
use visor_core::analyzer::{FrameAnalyzer, OpenAiVisionClient};
use visor_core::sampler;
use visor_core::storage::models::ViolationFilter;
use visor_core::storage::Database;
use visor_core::{AppConfig, ImportMode, ResultImporter, SafetyPipeline};

type CliResult = Result<(), Box<dyn std::error::Error>>;

fn main() -> CliResult {
    dotenv().ok();

    let _guard = logging::init_logger();

    let mut config = match visor_core::config::load_configuration() {
        Ok(config) => config,
        Err(err) => {
            error!("Error loading configuration: {}", err);
            process::exit(1);
        }
    };
    if config.analysis.api_key.is_none() {
        config.analysis.api_key = env::var("OPENAI_API_KEY").ok();
    }

    let args = Cli::parse();
    if let Some(db) = args.db {
        config.db_path = db;
    }

    let result = match args.command {
        Some(Commands::Extract {
            input,
            interval,
            output,
        }) => run_extract(config, &input, interval, output),
        Some(Commands::Analyze { frames, results }) => run_analyze(config, frames, results),
        Some(Commands::Import {
            results,
            skip_existing,
        }) => run_import(&config, results, skip_existing),
        Some(Commands::Run { videos }) => run_pipeline(config, &videos),
        Some(Commands::Stats { videos }) => show_stats(&config, &videos),
        Some(Commands::Worst { limit }) => show_worst(&config, limit),
        Some(Commands::Violations {
            violation_type,
            severity,
            videos,
            limit,
        }) => show_violations(
            &config,
            &ViolationFilter {
                violation_type,
                severity,
                video_names: videos,
                limit,
            },
        ),
        Some(Commands::Search {
            text,
            violations,
            limit,
        }) => run_search(&config, &text, violations, limit),
        Some(Commands::Workers { limit }) => show_workers(&config, limit),
        Some(Commands::Trends { videos }) => show_trends(&config, &videos),
        Some(Commands::Recommendations { limit }) => show_recommendations(&config, limit),
        Some(Commands::Export { output }) => run_export(&config, &output),
        Some(Commands::PrintConfig) => {
            let mut shown = config.clone();
            if shown.analysis.api_key.is_some() {
                shown.analysis.api_key = Some("<redacted>".to_string());
            }
            println!("Configuration: {:#?}", shown);
            Ok(())
        }
        Some(Commands::ResetDb { yes }) => run_reset(&config, yes),
        None => {
            let _ = Cli::command().print_long_help();
            Ok(())
        }
    };

    if let Err(err) = result {
        error!("Error: {}", err);
        process::exit(1);
    }
    Ok(())
}

fn run_extract(
    mut config: AppConfig,
    input: &Path,
    interval: Option<f64>,
    output: Option<String>,
) -> CliResult {
    if let Some(interval) = interval {
        config.interval_seconds = interval;
    }
    if let Some(output) = output {
        config.frames_dir = output;
    }
    config.validate()?;

    let reporter = CliReporter::new();
    let cancel = AtomicBool::new(false);
    let output_root = Path::new(&config.frames_dir);

    if input.is_dir() {
        let batch = sampler::sample_videos_in_directory(
            input,
            output_root,
            config.interval_seconds,
            &config.image_extension,
            &reporter,
            &cancel,
        )?;
        let frames: usize = batch.sampled.iter().map(|s| s.frames_emitted).sum();
        info!(
            "{} videos sampled, {} frames, {} videos skipped",
            format!("{}", batch.sampled.len()).green(),
            format!("{}", frames).green(),
            format!("{}", batch.failed.len()).red(),
        );
    } else {
        let summary = sampler::sample_video(
            input,
            output_root,
            config.interval_seconds,
            &config.image_extension,
            &reporter,
            &cancel,
        )?;
        info!(
            "{} frames written to {}",
            format!("{}", summary.frames_emitted).green(),
            summary.output_dir.display()
        );
    }
    Ok(())
}

fn run_analyze(mut config: AppConfig, frames: Option<String>, results: Option<String>) -> CliResult {
    if let Some(frames) = frames {
        config.frames_dir = frames;
    }
    if let Some(results) = results {
        config.results_dir = results;
    }
    config.validate()?;

    let client = OpenAiVisionClient::new(&config.analysis)?;
    let prompt =
        visor_core::prompt::build_analysis_prompt(&config.safety_checks, &config.custom_queries);
    let mut analyzer = FrameAnalyzer::new(
        client,
        prompt,
        Duration::from_millis(config.analysis.request_spacing_ms),
    );

    let reporter = CliReporter::new();
    let cancel = AtomicBool::new(false);
    let summary = analyzer.analyze_directory(
        Path::new(&config.frames_dir),
        Path::new(&config.results_dir),
        &reporter,
        &cancel,
    )?;

    info!(
        "{} frames analyzed, {} failed",
        format!("{}", summary.succeeded).green(),
        format!("{}", summary.failed).red(),
    );
    if summary.skipped > 0 {
        warn!(
            "{} images skipped: another image in the same directory has the same name",
            format!("{}", summary.skipped).yellow()
        );
    }
    Ok(())
}

fn run_import(config: &AppConfig, results: Option<String>, skip_existing: bool) -> CliResult {
    let results_dir = results.unwrap_or_else(|| config.results_dir.clone());
    let mode = if skip_existing {
        ImportMode::SkipExisting
    } else {
        config.import_mode
    };

    let db = Database::open(&config.db_path)?;
    let reporter = CliReporter::new();
    let stats = ResultImporter::new(mode).import_directory(&db, Path::new(&results_dir), &reporter)?;

    info!(
        "{} documents imported: {} videos, {} frames, {} violations, {} workers, {} links, {} answers",
        format!("{}", stats.imported).green(),
        stats.videos_created,
        stats.frames,
        stats.violations,
        stats.worker_identifiers,
        stats.worker_links,
        stats.query_answers,
    );
    if stats.skipped_malformed + stats.rolled_back > 0 {
        warn!(
            "{} malformed documents skipped, {} rolled back",
            format!("{}", stats.skipped_malformed).red(),
            format!("{}", stats.rolled_back).red(),
        );
    }
    Ok(())
}

fn run_pipeline(config: AppConfig, inputs: &[PathBuf]) -> CliResult {
    let mut videos = Vec::new();
    for input in inputs {
        if input.is_dir() {
            videos.extend(sampler::find_videos(input)?);
        } else {
            videos.push(input.clone());
        }
    }

    let client = OpenAiVisionClient::new(&config.analysis)?;
    let db = Database::open(&config.db_path)?;
    let pipeline = SafetyPipeline::new(config)?;
    let reporter = CliReporter::new();
    let result = pipeline.run(&videos, client, &db, &reporter)?;

    println!();
    info!(
        "Sample: {}, Analyze: {}, Import: {}",
        format!("{:.2}s", result.sampling_duration.as_secs_f64()).green(),
        format!("{:.2}s", result.analysis_duration.as_secs_f64()).green(),
        format!("{:.2}s", result.import_duration.as_secs_f64()).green(),
    );
    info!(
        "{} frames sampled, {} analyzed ({} failed), {} violations recorded",
        format!("{}", result.frames_sampled()).cyan(),
        format!("{}", result.frames_analyzed).cyan(),
        format!("{}", result.analysis_failures).red(),
        format!("{}", result.import.violations).red(),
    );
    for (video, err) in &result.failed_videos {
        warn!("{} skipped: {}", video.yellow(), err);
    }
    Ok(())
}

fn show_stats(config: &AppConfig, videos: &[String]) -> CliResult {
    let db = Database::open(&config.db_path)?;
    let stats = db.violation_stats(videos)?;

    println!("\n{}", "=== Violation Statistics ===".bold());
    println!("Total violations: {}", stats.total_violations.to_string().red());
    println!(
        "Frames with violations: {} of {} ({:.1}%)",
        stats.frames_with_violations, stats.total_frames, stats.violation_rate
    );
    println!(
        "Severity: {} high, {} medium, {} low",
        stats.high.to_string().red(),
        stats.medium.to_string().yellow(),
        stats.low.to_string().green()
    );

    println!("\n{}", "=== Violation Types ===".bold());
    for (violation_type, count) in &stats.by_type {
        println!("{:>6}  {}", count, violation_type);
    }
    Ok(())
}

fn show_worst(config: &AppConfig, limit: i64) -> CliResult {
    let db = Database::open(&config.db_path)?;
    println!("\n{}", format!("=== Top {} Frames With Most Violations ===", limit).bold());
    for frame in db.worst_frames(limit)? {
        println!(
            "{} frame {} at {}s: {} violations ({})",
            frame.video_name.cyan(),
            frame.frame_number,
            frame.timestamp_seconds,
            frame.violation_count.to_string().red(),
            frame.image_path
        );
    }
    Ok(())
}

fn show_violations(config: &AppConfig, filter: &ViolationFilter) -> CliResult {
    let db = Database::open(&config.db_path)?;
    let records = db.violations_filtered(filter)?;
    println!("\n{}", format!("=== {} Violations ===", records.len()).bold());
    for v in records {
        println!(
            "[{}] {} / {} at {}s",
            severity_label(v.severity.as_deref()),
            v.violation_type.cyan(),
            v.video_name,
            v.timestamp_seconds
        );
        println!("    {}", v.description);
        if let Some(location) = v.location.filter(|l| !l.is_empty()) {
            println!("    Location: {}", location);
        }
        if let Some(recommendation) = v.recommendation.filter(|r| !r.is_empty()) {
            println!("    Recommendation: {}", recommendation);
        }
    }
    Ok(())
}

fn run_search(config: &AppConfig, text: &str, violations: bool, limit: i64) -> CliResult {
    let db = Database::open(&config.db_path)?;
    if violations {
        for v in db.search_violations(text, limit)? {
            println!(
                "{} {} at {}s: {}",
                v.violation_type.cyan(),
                v.video_name,
                v.timestamp_seconds,
                v.description
            );
        }
    } else {
        for qa in db.search_query_answers(text, limit)? {
            println!(
                "{} at {}s [{}]",
                qa.video_name.cyan(),
                qa.timestamp_seconds,
                qa.confidence.as_deref().unwrap_or("unknown")
            );
            println!("    Q: {}", qa.question.as_deref().unwrap_or(""));
            println!("    A: {}", qa.answer.as_deref().unwrap_or(""));
        }
    }
    Ok(())
}

fn show_workers(config: &AppConfig, limit: i64) -> CliResult {
    let db = Database::open(&config.db_path)?;
    println!("\n{}", "=== Workers Across Frames ===".bold());
    for worker in db.worker_appearances(limit)? {
        println!(
            "{}: {} frames ({}s to {}s), {} violations",
            worker.worker_id.cyan(),
            worker.frames_seen,
            worker.first_seen_seconds,
            worker.last_seen_seconds,
            worker.violations_linked.to_string().red()
        );
    }
    Ok(())
}

fn show_trends(config: &AppConfig, videos: &[String]) -> CliResult {
    let db = Database::open(&config.db_path)?;
    println!("\n{}", "=== Violations Over Time ===".bold());
    for (timestamp, count) in db.violation_trends(videos)? {
        println!(
            "{:02}m{:02}s  {:>4}  {}",
            timestamp / 60,
            timestamp % 60,
            count,
            "#".repeat(count.clamp(0, 60) as usize).red()
        );
    }
    Ok(())
}

fn show_recommendations(config: &AppConfig, limit: i64) -> CliResult {
    let db = Database::open(&config.db_path)?;
    println!("\n{}", "=== Top Safety Recommendations ===".bold());
    for (recommendation, count) in db.top_recommendations(limit)? {
        println!("{:>4}  {}", count, recommendation);
    }
    Ok(())
}

fn run_export(config: &AppConfig, output: &Path) -> CliResult {
    let db = Database::open(&config.db_path)?;
    let count = db.export_violations_report(output)?;
    println!(
        "Exported {} violations to {}",
        count.to_string().green(),
        output.display()
    );
    Ok(())
}

fn run_reset(config: &AppConfig, yes: bool) -> CliResult {
    let confirmed = yes
        || prompt_confirm(
            "Are you SURE you want to COMPLETELY DELETE all safety data?",
            Some(false),
        )?;
    if !confirmed {
        return Ok(());
    }

    let db = Database::open(&config.db_path)?;
    db.truncate_all()?;
    let counts = db.table_counts()?;
    println!("All tables truncated ({} rows remain)", counts.total());
    Ok(())
}

fn severity_label(severity: Option<&str>) -> ColoredString {
    match severity {
        Some("high") => "HIGH".red().bold(),
        Some("medium") => "MEDIUM".yellow(),
        Some("low") => "LOW".green(),
        Some(other) => other.to_uppercase().normal(),
        None => "UNKNOWN".dimmed(),
    }
}

fn prompt_confirm(prompt: &str, default: Option<bool>) -> io::Result<bool> {
    let mut input = String::new();

    loop {
        input.clear();

        match default {
            Some(true) => print!("{} (Y/n): ", prompt),
            Some(false) | None => print!("{} (y/N): ", prompt),
        }
        io::stdout().flush()?;

        if io::stdin().read_line(&mut input)? == 0 {
            return Ok(default.unwrap_or(false));
        }

        match input.trim().to_uppercase().as_str() {
            "Y" | "YES" => return Ok(true),
            "N" | "NO" => return Ok(false),
            "" => match default {
                Some(default) => return Ok(default),
                None => continue,
            },
            _ => continue,
        }
    }
}
