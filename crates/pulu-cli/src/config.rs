//! Configuration management for PULU01
//!
//! Settings are resolved once, before any processing starts, in layers
//! where each layer overrides the one before it:
//!
//! 1. Built-in defaults (`DEFAULT_*` constants)
//! 2. TOML settings file (`pulu.toml` in the working directory, or `--config`)
//! 3. Environment (`PULU_*` variables, `.env` loaded by the binary)
//! 4. Command-line flags
//!
//! The resolved [`AppConfig`] is validated and then passed by reference to
//! every component; nothing reads configuration after startup.

use crate::error::{CliError, Result};
use crate::records::ProcessingMode;
use crate::RunArgs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// Processing Constants
// ============================================================================

/// Default number of concurrent workers.
pub const DEFAULT_THREADS: usize = 1;

/// Smallest accepted worker count.
pub const MIN_THREADS: usize = 1;

/// Largest accepted worker count.
pub const MAX_THREADS: usize = 50;

/// Processed-record delta between progress redraws.
pub const DEFAULT_PROGRESS_BATCH_SIZE: usize = 20;

/// Pending successes that trigger a success store write.
pub const DEFAULT_FILE_WRITE_BATCH_SIZE: usize = 100;

/// Seconds between background flushes of worker results.
pub const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 5;

// ============================================================================
// API Constants
// ============================================================================

/// Default Pulse API base URL.
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:5000";

/// Default hold clearing endpoint.
pub const DEFAULT_HOLD_ENDPOINT: &str = "/api/v1/holds/clear";

/// Default discard fate clearing endpoint.
pub const DEFAULT_DISCARD_ENDPOINT: &str = "/api/v1/discard-fates/clear";

/// Default per-request timeout in seconds.
pub const DEFAULT_API_TIMEOUT_SECS: u64 = 30;

/// Default `X-UserId` header value.
pub const DEFAULT_USER_ID: &str = "PULU01";

/// Default `X-AppName` header value.
pub const DEFAULT_APP_NAME: &str = "PULU01";

/// Default `X-Environment` header value.
pub const DEFAULT_ENVIRONMENT: &str = "Development";

// ============================================================================
// Simulation Constants
// ============================================================================

/// Lower bound of simulated call latency.
pub const DEFAULT_SIM_MIN_LATENCY_MS: u64 = 1000;

/// Upper bound of simulated call latency.
pub const DEFAULT_SIM_MAX_LATENCY_MS: u64 = 2000;

/// Share of simulated calls that fail.
pub const DEFAULT_SIM_FAILURE_PERCENT: u8 = 5;

/// Settings file picked up from the working directory when `--config` is absent.
pub const DEFAULT_SETTINGS_FILE: &str = "pulu.toml";

/// Fully resolved run configuration
#[derive(Debug, Clone, Serialize)]
pub struct AppConfig {
    pub input_file: PathBuf,
    pub mode: ProcessingMode,
    pub clear_code: String,
    pub threads: usize,
    pub simulate: bool,
    pub processing: ProcessingConfig,
    pub output: OutputConfig,
    pub api: ApiConfig,
    pub simulation: SimulationConfig,
}

/// Batching and cadence
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProcessingConfig {
    pub progress_batch_size: usize,
    pub file_write_batch_size: usize,
    pub flush_interval_secs: u64,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            progress_batch_size: DEFAULT_PROGRESS_BATCH_SIZE,
            file_write_batch_size: DEFAULT_FILE_WRITE_BATCH_SIZE,
            flush_interval_secs: DEFAULT_FLUSH_INTERVAL_SECS,
        }
    }
}

impl ProcessingConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }
}

/// Success and failure store locations
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct OutputConfig {
    pub success_path: PathBuf,
    pub failure_path: PathBuf,
}

impl OutputConfig {
    /// Default store file names for a mode
    pub fn for_mode(mode: ProcessingMode) -> Self {
        let (ok, errors) = match mode {
            ProcessingMode::Hold => ("Hold_Clear_Ok.json", "Hold_Clear_Errors.json"),
            ProcessingMode::Discard => ("Discard_Clear_Ok.json", "Discard_Clear_Errors.json"),
        };
        Self {
            success_path: PathBuf::from(ok),
            failure_path: PathBuf::from(errors),
        }
    }
}

/// Remote service settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub hold_endpoint: String,
    pub discard_endpoint: String,
    pub timeout_secs: u64,
    pub headers: HeaderConfig,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE_URL.to_string(),
            hold_endpoint: DEFAULT_HOLD_ENDPOINT.to_string(),
            discard_endpoint: DEFAULT_DISCARD_ENDPOINT.to_string(),
            timeout_secs: DEFAULT_API_TIMEOUT_SECS,
            headers: HeaderConfig::default(),
        }
    }
}

impl ApiConfig {
    /// Endpoint path for a mode
    pub fn endpoint(&self, mode: ProcessingMode) -> &str {
        match mode {
            ProcessingMode::Hold => &self.hold_endpoint,
            ProcessingMode::Discard => &self.discard_endpoint,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Identification headers sent with every request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HeaderConfig {
    pub user_id: String,
    pub app_name: String,
    pub environment: String,
}

impl Default for HeaderConfig {
    fn default() -> Self {
        Self {
            user_id: DEFAULT_USER_ID.to_string(),
            app_name: DEFAULT_APP_NAME.to_string(),
            environment: DEFAULT_ENVIRONMENT.to_string(),
        }
    }
}

/// Behaviour of the `--simulate` gateway
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SimulationConfig {
    pub min_latency_ms: u64,
    pub max_latency_ms: u64,
    pub failure_percent: u8,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            min_latency_ms: DEFAULT_SIM_MIN_LATENCY_MS,
            max_latency_ms: DEFAULT_SIM_MAX_LATENCY_MS,
            failure_percent: DEFAULT_SIM_FAILURE_PERCENT,
        }
    }
}

/// Contents of a TOML settings file
///
/// Every table and key is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SettingsFile {
    pub threads: Option<usize>,
    pub mode: Option<ProcessingMode>,
    pub processing: ProcessingConfig,
    pub output: OutputSettings,
    pub api: ApiConfig,
    pub simulation: SimulationConfig,
}

/// Output overrides; unset paths fall back to the per-mode defaults
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    pub success_path: Option<PathBuf>,
    pub failure_path: Option<PathBuf>,
}

impl SettingsFile {
    /// Load settings from `path`, or from `pulu.toml` if it exists
    ///
    /// An explicit path that does not exist is an error; a missing default
    /// file is not.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_SETTINGS_FILE), false),
        };

        if !path.exists() {
            if explicit {
                return Err(CliError::config(format!(
                    "settings file '{}' does not exist",
                    path.display()
                )));
            }
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)?;
        let settings = toml::from_str(&content)?;
        tracing::debug!(path = %path.display(), "Loaded settings file");
        Ok(settings)
    }
}

impl AppConfig {
    /// Resolve configuration for a `run` invocation
    pub fn load(args: &RunArgs) -> Result<Self> {
        let file = SettingsFile::load(args.config.as_deref())?;
        let config = Self::from_layers(file, |name| std::env::var(name).ok(), args)?;
        config.validate()?;
        Ok(config)
    }

    /// Combine the layers; `env` looks up one variable by name
    pub fn from_layers<F>(file: SettingsFile, env: F, args: &RunArgs) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Mode comes first: it picks the default output paths.
        let mode = args
            .mode
            .or(parse_env(&env, "PULU_MODE")?)
            .or(file.mode)
            .unwrap_or_default();

        let defaults = OutputConfig::for_mode(mode);
        let mut output = OutputConfig {
            success_path: file.output.success_path.unwrap_or(defaults.success_path),
            failure_path: file.output.failure_path.unwrap_or(defaults.failure_path),
        };
        let mut processing = file.processing;
        let mut api = file.api;
        let mut threads = file.threads.unwrap_or(DEFAULT_THREADS);

        if let Some(v) = parse_env(&env, "PULU_THREADS")? {
            threads = v;
        }
        if let Some(v) = parse_env(&env, "PULU_PROGRESS_BATCH_SIZE")? {
            processing.progress_batch_size = v;
        }
        if let Some(v) = parse_env(&env, "PULU_FILE_WRITE_BATCH_SIZE")? {
            processing.file_write_batch_size = v;
        }
        if let Some(v) = parse_env(&env, "PULU_FLUSH_INTERVAL_SECS")? {
            processing.flush_interval_secs = v;
        }
        if let Some(v) = env("PULU_SUCCESS_PATH") {
            output.success_path = PathBuf::from(v);
        }
        if let Some(v) = env("PULU_FAILURE_PATH") {
            output.failure_path = PathBuf::from(v);
        }
        if let Some(v) = env("PULU_API_BASE_URL") {
            api.base_url = v;
        }
        if let Some(v) = env("PULU_HOLD_ENDPOINT") {
            api.hold_endpoint = v;
        }
        if let Some(v) = env("PULU_DISCARD_ENDPOINT") {
            api.discard_endpoint = v;
        }
        if let Some(v) = parse_env(&env, "PULU_API_TIMEOUT_SECS")? {
            api.timeout_secs = v;
        }
        if let Some(v) = env("PULU_USER_ID") {
            api.headers.user_id = v;
        }
        if let Some(v) = env("PULU_APP_NAME") {
            api.headers.app_name = v;
        }
        if let Some(v) = env("PULU_ENVIRONMENT") {
            api.headers.environment = v;
        }

        if let Some(v) = args.threads {
            threads = v;
        }

        Ok(Self {
            input_file: args.file.clone(),
            mode,
            clear_code: args.clearcode.trim().to_string(),
            threads,
            simulate: args.simulate,
            processing,
            output,
            api,
            simulation: file.simulation,
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !(MIN_THREADS..=MAX_THREADS).contains(&self.threads) {
            return Err(CliError::config(format!(
                "thread count must be between {} and {}, got {}",
                MIN_THREADS, MAX_THREADS, self.threads
            )));
        }

        let code_len = self.clear_code.chars().count();
        if !(2..=3).contains(&code_len) {
            return Err(CliError::config(format!(
                "clear code must be 2 or 3 characters, got '{}'",
                self.clear_code
            )));
        }

        if self.api.base_url.trim().is_empty() {
            return Err(CliError::config("API base URL cannot be empty"));
        }

        if self.api.endpoint(self.mode).trim().is_empty() {
            return Err(CliError::config(format!("{} endpoint cannot be empty", self.mode)));
        }

        if self.api.timeout_secs == 0 {
            return Err(CliError::config("API timeout must be greater than 0"));
        }

        if self.processing.progress_batch_size == 0 {
            return Err(CliError::config("progress batch size must be greater than 0"));
        }

        if self.processing.file_write_batch_size == 0 {
            return Err(CliError::config("file write batch size must be greater than 0"));
        }

        if self.processing.flush_interval_secs == 0 {
            return Err(CliError::config("flush interval must be greater than 0"));
        }

        if self.output.success_path == self.output.failure_path {
            return Err(CliError::config("success and failure paths must differ"));
        }

        if self.simulate {
            if self.simulation.min_latency_ms > self.simulation.max_latency_ms {
                return Err(CliError::config(
                    "simulation min_latency_ms cannot exceed max_latency_ms",
                ));
            }
            if self.simulation.failure_percent > 100 {
                return Err(CliError::config("simulation failure_percent cannot exceed 100"));
            }
        }

        Ok(())
    }

    /// Endpoint path for the configured mode
    pub fn endpoint(&self) -> &str {
        self.api.endpoint(self.mode)
    }
}

fn parse_env<T, F>(env: &F, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match env(name) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| CliError::config(format!("{} has an invalid value '{}'", name, raw))),
    }
}

impl FromStr for ProcessingMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hold" => Ok(ProcessingMode::Hold),
            "discard" => Ok(ProcessingMode::Discard),
            other => Err(format!("unknown mode '{}'", other)),
        }
    }
}
