use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::ml::association::MiningThresholds;
use crate::ml::random_forest::ForestConfig;
use crate::ml::runner::TrainerSettings;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_ARTIFACT_DIR: &str = "models";
const DEFAULT_TRAINING_TIMEOUT_SECS: u64 = 600;
const DEFAULT_MIN_TRAINING_SAMPLES: usize = 5;
const DEFAULT_HEURISTIC_WINDOW: u32 = 3;
const DEFAULT_COLD_START_QUANTITY: u64 = 5;

/// Monthly seasonal multipliers, January first.
pub const DEFAULT_SEASONAL_FACTORS: [f64; 12] =
    [0.8, 0.9, 1.0, 1.0, 1.1, 1.2, 1.2, 1.1, 1.0, 1.0, 1.1, 1.3];

/// Settings for the heuristic predictor used when no model answer is available.
#[derive(Clone, Debug, Deserialize, Validate, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct HeuristicConfig {
    /// Number of preceding periods averaged (non-zero ones only)
    #[serde(default = "default_heuristic_window")]
    #[validate(custom = "validate_window")]
    pub window: u32,

    /// Quantity predicted for items with no recent demand at all
    #[serde(default = "default_cold_start_quantity")]
    pub cold_start_quantity: u64,

    #[serde(default = "default_confidence_floor")]
    #[validate(custom = "validate_probability")]
    pub confidence_floor: f64,

    #[serde(default = "default_confidence_ceiling")]
    #[validate(custom = "validate_probability")]
    pub confidence_ceiling: f64,

    /// Multiplier per calendar month, January first
    #[serde(default = "default_seasonal_factors")]
    #[validate(custom = "validate_seasonal_factors")]
    pub seasonal_factors: Vec<f64>,
}

impl Default for HeuristicConfig {
    fn default() -> Self {
        Self {
            window: default_heuristic_window(),
            cold_start_quantity: default_cold_start_quantity(),
            confidence_floor: default_confidence_floor(),
            confidence_ceiling: default_confidence_ceiling(),
            seasonal_factors: default_seasonal_factors(),
        }
    }
}

impl HeuristicConfig {
    /// Factor for a 1-based calendar month; 1.0 when the table has no entry.
    pub fn seasonal_factor(&self, month: u32) -> f64 {
        month
            .checked_sub(1)
            .and_then(|idx| self.seasonal_factors.get(idx as usize))
            .copied()
            .unwrap_or(1.0)
    }
}

/// Demand service configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct DemandConfig {
    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Directory holding the per-granularity model artifacts
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: PathBuf,

    /// JSON ledger snapshot used to seed the in-memory repositories
    #[serde(default)]
    pub ledger_snapshot_path: Option<PathBuf>,

    /// When set, model calls go through this worker binary instead of in-process
    #[serde(default)]
    pub model_worker_path: Option<PathBuf>,

    /// Training runs longer than this are marked failed
    #[serde(default = "default_training_timeout_secs")]
    #[validate(custom = "validate_timeout")]
    pub training_timeout_secs: u64,

    /// Sample count at which model confidence is no longer discounted
    #[serde(default = "default_min_training_samples")]
    pub min_training_samples: usize,

    #[serde(default)]
    #[validate]
    pub heuristic: HeuristicConfig,

    #[serde(default = "ForestConfig::daily")]
    #[validate]
    pub daily_forest: ForestConfig,

    #[serde(default = "ForestConfig::monthly")]
    #[validate]
    pub monthly_forest: ForestConfig,

    #[serde(default = "default_min_support")]
    #[validate(custom = "validate_probability")]
    pub default_min_support: f64,

    #[serde(default = "default_min_confidence")]
    #[validate(custom = "validate_probability")]
    pub default_min_confidence: f64,
}

impl Default for DemandConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: default_port(),
            environment: DEFAULT_ENV.to_string(),
            log_level: default_log_level(),
            log_json: false,
            artifact_dir: default_artifact_dir(),
            ledger_snapshot_path: None,
            model_worker_path: None,
            training_timeout_secs: default_training_timeout_secs(),
            min_training_samples: default_min_training_samples(),
            heuristic: HeuristicConfig::default(),
            daily_forest: ForestConfig::daily(),
            monthly_forest: ForestConfig::monthly(),
            default_min_support: default_min_support(),
            default_min_confidence: default_min_confidence(),
        }
    }
}

impl DemandConfig {
    /// Checks if running in production environment
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn training_timeout(&self) -> Duration {
        Duration::from_secs(self.training_timeout_secs)
    }

    pub fn trainer_settings(&self) -> TrainerSettings {
        TrainerSettings {
            daily_forest: self.daily_forest.clone(),
            monthly_forest: self.monthly_forest.clone(),
            min_training_samples: self.min_training_samples,
        }
    }

    pub fn default_thresholds(&self) -> MiningThresholds {
        MiningThresholds {
            min_support: self.default_min_support,
            min_confidence: self.default_min_confidence,
        }
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if self.heuristic.confidence_floor > self.heuristic.confidence_ceiling {
            let mut err = ValidationError::new("heuristic_confidence_bounds");
            err.message =
                Some("heuristic.confidence_floor must not exceed confidence_ceiling".into());
            errors.add("heuristic", err);
        }

        if self.default_min_support == 0.0 {
            let mut err = ValidationError::new("default_min_support");
            err.message = Some("default_min_support must be greater than 0".into());
            errors.add("default_min_support", err);
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_artifact_dir() -> PathBuf {
    PathBuf::from(DEFAULT_ARTIFACT_DIR)
}

fn default_training_timeout_secs() -> u64 {
    DEFAULT_TRAINING_TIMEOUT_SECS
}

fn default_min_training_samples() -> usize {
    DEFAULT_MIN_TRAINING_SAMPLES
}

fn default_heuristic_window() -> u32 {
    DEFAULT_HEURISTIC_WINDOW
}

fn default_cold_start_quantity() -> u64 {
    DEFAULT_COLD_START_QUANTITY
}

fn default_confidence_floor() -> f64 {
    0.3
}

fn default_confidence_ceiling() -> f64 {
    0.95
}

fn default_seasonal_factors() -> Vec<f64> {
    DEFAULT_SEASONAL_FACTORS.to_vec()
}

fn default_min_support() -> f64 {
    0.5
}

fn default_min_confidence() -> f64 {
    0.7
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

fn validate_probability(value: f64) -> Result<(), ValidationError> {
    if !value.is_finite() || value < 0.0 || value > 1.0 {
        let mut err = ValidationError::new("probability");
        err.message = Some("must be a finite value between 0.0 and 1.0".into());
        return Err(err);
    }
    Ok(())
}

fn validate_window(window: u32) -> Result<(), ValidationError> {
    if window == 0 {
        let mut err = ValidationError::new("window");
        err.message = Some("heuristic window must be at least 1 period".into());
        return Err(err);
    }
    Ok(())
}

fn validate_timeout(secs: u64) -> Result<(), ValidationError> {
    if secs == 0 {
        let mut err = ValidationError::new("training_timeout_secs");
        err.message = Some("training_timeout_secs must be greater than 0".into());
        return Err(err);
    }
    Ok(())
}

fn validate_seasonal_factors(factors: &[f64]) -> Result<(), ValidationError> {
    if factors.len() != 12 {
        let mut err = ValidationError::new("seasonal_factors");
        err.message = Some("seasonal_factors must have exactly 12 entries".into());
        return Err(err);
    }
    if factors.iter().any(|f| !f.is_finite() || *f < 0.0) {
        let mut err = ValidationError::new("seasonal_factors");
        err.message = Some("seasonal factors must be finite and non-negative".into());
        return Err(err);
    }
    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("stateset_demand={},tower_http=info", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .json()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .try_init();
    }
}

/// Loads demand service configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
pub fn load_config() -> Result<DemandConfig, AppConfigError> {
    load_config_from(Path::new(CONFIG_DIR))
}

pub fn load_config_from(config_dir: &Path) -> Result<DemandConfig, AppConfigError> {
    // Support both RUN_ENV and APP_ENV for selecting config profile
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !config_dir.exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            config_dir.display()
        );
    }

    let config = Config::builder()
        .set_default("host", "0.0.0.0")?
        .set_default("port", i64::from(DEFAULT_PORT))?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::from(config_dir.join("default")).required(false))
        .add_source(File::from(config_dir.join(&run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let demand_config: DemandConfig = config.try_deserialize()?;

    demand_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    demand_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(demand_config)
}
