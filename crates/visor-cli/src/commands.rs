use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "visor")]
#[command(about = "Construction site safety monitoring from video", long_about = None)]
pub struct Cli {
    /// SQLite database path (overrides `db_path` from configuration)
    #[arg(long, global = true)]
    pub db: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Sample frames from a video file, or from every video in a directory
    Extract {
        input: PathBuf,
        /// Seconds between sampled frames
        #[arg(long)]
        interval: Option<f64>,
        /// Output root for frame directories
        #[arg(long)]
        output: Option<String>,
    },
    /// Send sampled frames to the vision service and write result documents
    Analyze {
        #[arg(long)]
        frames: Option<String>,
        #[arg(long)]
        results: Option<String>,
    },
    /// Import result documents into the database
    Import {
        #[arg(long)]
        results: Option<String>,
        /// Skip documents whose frames are already in the database
        #[arg(long)]
        skip_existing: bool,
    },
    /// Sample, analyze and import the given videos (files or directories)
    Run {
        #[arg(required = true)]
        videos: Vec<PathBuf>,
    },
    /// Show violation statistics
    Stats {
        /// Restrict to these videos
        #[arg(long = "video")]
        videos: Vec<String>,
    },
    /// Show the frames with the most violations
    Worst {
        #[arg(long, default_value_t = 5)]
        limit: i64,
    },
    /// List violations, newest first
    Violations {
        #[arg(long = "type")]
        violation_type: Option<String>,
        #[arg(long, value_parser = ["high", "medium", "low"])]
        severity: Option<String>,
        #[arg(long = "video")]
        videos: Vec<String>,
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
    /// Search custom query answers (or violations with --violations)
    Search {
        text: String,
        #[arg(long)]
        violations: bool,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Correlate worker identifiers across frames
    Workers {
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Violation counts by frame timestamp
    Trends {
        #[arg(long = "video")]
        videos: Vec<String>,
    },
    /// Most frequent safety recommendations
    Recommendations {
        #[arg(long, default_value_t = 10)]
        limit: i64,
    },
    /// Export all violations to a JSON report
    Export {
        #[arg(default_value = "violations_report.json")]
        output: PathBuf,
    },
    /// Print configuration values
    PrintConfig,
    /// Delete all rows from every table
    ResetDb {
        /// Do not ask for confirmation
        #[arg(long)]
        yes: bool,
    },
}
