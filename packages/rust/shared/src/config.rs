//! Application configuration for sheetloader.
//!
//! User config lives at `~/.sheetloader/sheetloader.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SheetloaderError};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "sheetloader.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".sheetloader";

// ---------------------------------------------------------------------------
// Config structs (matching sheetloader.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Extraction defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Remote workbook store.
    #[serde(default)]
    pub remote: RemoteConfig,

    /// Retry/backoff for remote calls.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Local libSQL store used with `--offline`.
    #[serde(default)]
    pub offline: OfflineConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Maximum rows per write call.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Maximum concurrent chunk writes across all sheets.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Wall-clock bound for a whole extraction.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Create destination sheets that do not exist yet.
    #[serde(default = "default_true")]
    pub create_missing_sheets: bool,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            concurrency: default_concurrency(),
            timeout_secs: default_timeout_secs(),
            create_missing_sheets: true,
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_concurrency() -> usize {
    3
}
fn default_timeout_secs() -> u64 {
    600
}
fn default_true() -> bool {
    true
}

/// `[remote]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// API root, e.g. `https://api.example.com/v1`.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Name of the env var holding the API token (never store the token itself).
    #[serde(default = "default_token_env")]
    pub token_env: String,

    /// Page size for paginated listings.
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Per-request timeout.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token_env: default_token_env(),
            page_size: default_page_size(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:8080/v1".into()
}
fn default_token_env() -> String {
    "SHEETLOADER_API_TOKEN".into()
}
fn default_page_size() -> u32 {
    100
}
fn default_request_timeout_secs() -> u64 {
    30
}

/// `[retry]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry; doubled for each further retry.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound for a single delay.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    5
}
fn default_base_delay_ms() -> u64 {
    250
}
fn default_max_delay_ms() -> u64 {
    10_000
}

/// `[offline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfflineConfig {
    /// Path to the local database file.
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "~/.sheetloader/offline.db".into()
}

impl OfflineConfig {
    /// Resolve `db_path`, expanding a leading `~/`.
    pub fn resolved_db_path(&self) -> Result<PathBuf> {
        match self.db_path.strip_prefix("~/") {
            Some(rest) => {
                let home = dirs::home_dir().ok_or_else(|| {
                    SheetloaderError::config("could not determine home directory")
                })?;
                Ok(home.join(rest))
            }
            None => Ok(PathBuf::from(&self.db_path)),
        }
    }
}

// ---------------------------------------------------------------------------
// Extraction config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Where extracted records go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// An existing workbook; sheets are matched by name.
    Workbook(String),
    /// A new workbook named after the source file.
    NewWorkbook,
}

/// Runtime extraction configuration, merged from config file + CLI flags.
#[derive(Debug, Clone)]
pub struct ExtractConfig {
    pub destination: Destination,
    pub chunk_size: usize,
    pub concurrency: usize,
    pub timeout: Duration,
    pub create_missing_sheets: bool,
    /// Job type recorded on the job store.
    pub job_type: String,
    /// Job operation recorded on the job store.
    pub operation: String,
}

impl From<&AppConfig> for ExtractConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            destination: Destination::NewWorkbook,
            chunk_size: config.defaults.chunk_size,
            concurrency: config.defaults.concurrency,
            timeout: Duration::from_secs(config.defaults.timeout_secs),
            create_missing_sheets: config.defaults.create_missing_sheets,
            job_type: "file".into(),
            operation: "extract".into(),
        }
    }
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.sheetloader/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| SheetloaderError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.sheetloader/sheetloader.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| SheetloaderError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        SheetloaderError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| SheetloaderError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| SheetloaderError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| SheetloaderError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read the API token from the env var named in `[remote].token_env`.
pub fn validate_api_token(config: &AppConfig) -> Result<String> {
    let var_name = &config.remote.token_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(SheetloaderError::config(format!(
            "API token not found. Set the {var_name} environment variable."
        ))),
    }
}
