use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::Deserialize;

use crate::error::Error;
use crate::prompt::SafetyChecks;

pub const MIN_INTERVAL_SECONDS: f64 = 1.0;
pub const MAX_INTERVAL_SECONDS: f64 = 10.0;

/// How a second import over an already-imported tree behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportMode {
    /// Every document creates new rows; re-importing duplicates them.
    #[default]
    Append,
    /// Videos are looked up in the store by name and documents whose
    /// image path already has a frame row are skipped.
    SkipExisting,
}

/// Settings for the external vision service.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub endpoint: String,
    pub model: String,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    /// Minimum spacing between the start of two consecutive requests.
    pub request_spacing_ms: u64,
    pub api_key: Option<String>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4o".to_string(),
            max_tokens: 1500,
            timeout_secs: 60,
            request_spacing_ms: 1000,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub frames_dir: String,
    pub results_dir: String,
    pub db_path: String,
    pub interval_seconds: f64,
    pub image_extension: String,
    pub safety_checks: SafetyChecks,
    pub custom_queries: Vec<String>,
    pub import_mode: ImportMode,
    pub analysis: AnalysisConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            frames_dir: "data/frames".to_string(),
            results_dir: "results".to_string(),
            db_path: "database.sqlite".to_string(),
            interval_seconds: 2.0,
            image_extension: "jpg".to_string(),
            safety_checks: SafetyChecks::default(),
            custom_queries: Vec::new(),
            import_mode: ImportMode::default(),
            analysis: AnalysisConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if !self.interval_seconds.is_finite()
            || !(MIN_INTERVAL_SECONDS..=MAX_INTERVAL_SECONDS).contains(&self.interval_seconds)
        {
            return Err(Error::InvalidConfig(format!(
                "interval_seconds must be between {} and {}, got {}",
                MIN_INTERVAL_SECONDS, MAX_INTERVAL_SECONDS, self.interval_seconds
            )));
        }
        if self.image_extension.trim().is_empty() {
            return Err(Error::InvalidConfig("image_extension is empty".to_string()));
        }
        if self.analysis.endpoint.trim().is_empty() {
            return Err(Error::InvalidConfig("analysis.endpoint is empty".to_string()));
        }
        Ok(())
    }
}

/// Layered load: optional `Visor.toml`, then `VISOR_*` environment variables
/// (`VISOR_ANALYSIS__MODEL=...` for nested keys).
pub fn load_configuration() -> Result<AppConfig, ConfigError> {
    let builder = Config::builder()
        .add_source(ConfigFile::with_name("Visor").required(false))
        .add_source(
            Environment::with_prefix("VISOR")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;
    builder.try_deserialize::<AppConfig>()
}
