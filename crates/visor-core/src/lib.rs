pub mod analyzer;
pub mod config;
pub mod error;
pub mod importer;
pub mod pipeline;
pub mod progress;
pub mod prompt;
pub mod sampler;
pub mod storage;

pub use config::{AppConfig, ImportMode};
pub use error::Error;
pub use importer::{ImportStats, ResultImporter};
pub use pipeline::{PipelineResult, SafetyPipeline};
pub use progress::{Progress, ProgressReporter, SilentReporter};
