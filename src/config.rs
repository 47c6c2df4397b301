//! Configuration for coursegen.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (COURSEGEN_HOME, COURSEGEN_MAX_CONCURRENT_RUNS,
//!    COURSEGEN_BASE_URL, COURSEGEN_MODEL, and the API key variable)
//! 2. Config file (.coursegen/config.yaml)
//! 3. Defaults (~/.coursegen)
//!
//! Config file discovery:
//! - Searches current directory and parents for .coursegen/config.yaml
//! - `paths.home` is relative to the .coursegen/ directory

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::adapters::HttpGenerationConfig;
use crate::core::{RetryPolicy, DEFAULT_MAX_CONCURRENT_RUNS};

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

const CONFIG_DIR: &str = ".coursegen";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_TIMEOUT_SECONDS: u64 = 120;
const DEFAULT_API_KEY_ENV: &str = "COURSEGEN_API_KEY";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub dispatch: Option<DispatchConfig>,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
    #[serde(default)]
    pub generation: Option<GenerationConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// State directory (relative to .coursegen/)
    pub home: Option<String>,
    /// SQLite database (relative to home)
    pub database: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    pub max_concurrent_runs: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: Option<u32>,
    pub base_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenerationConfig {
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub timeout_seconds: Option<u64>,
    /// Name of the environment variable holding the API key
    pub api_key_env: Option<String>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to the state directory
    pub home: PathBuf,
    /// SQLite database path
    pub database: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub max_concurrent_runs: usize,
    pub retry: RetryPolicy,
    pub generation: GenerationSettings,
}

#[derive(Debug, Clone)]
pub struct GenerationSettings {
    pub base_url: String,
    pub model: String,
    pub timeout_seconds: u64,
    pub api_key_env: String,
    /// Key read from `api_key_env`; never loaded from the config file
    pub api_key: Option<String>,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            api_key: None,
        }
    }
}

impl GenerationSettings {
    pub fn http_config(&self) -> HttpGenerationConfig {
        HttpGenerationConfig {
            base_url: self.base_url.clone(),
            model: self.model.clone(),
            api_key: self.api_key.clone(),
            timeout_seconds: self.timeout_seconds,
        }
    }
}

impl ResolvedConfig {
    /// Directory holding one checkpoint log per run
    pub fn runs_dir(&self) -> PathBuf {
        self.home.join("runs")
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(CONFIG_DIR).join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to a base directory
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Merge the config file, environment and defaults
fn resolve(
    config_file: Option<(PathBuf, ConfigFile)>,
    env: impl Fn(&str) -> Option<String>,
    default_home: PathBuf,
) -> Result<ResolvedConfig> {
    let (config_path, file) = match config_file {
        Some((path, file)) => (Some(path), Some(file)),
        None => (None, None),
    };

    let home = if let Some(env_home) = env("COURSEGEN_HOME") {
        PathBuf::from(env_home)
    } else if let (Some(path), Some(home)) = (
        config_path.as_deref(),
        file.as_ref().and_then(|f| f.paths.home.as_deref()),
    ) {
        let config_dir = path.parent().unwrap_or(Path::new("."));
        resolve_path(config_dir, home)
    } else {
        default_home
    };

    let database = file
        .as_ref()
        .and_then(|f| f.paths.database.as_deref())
        .map(|db| resolve_path(&home, db))
        .unwrap_or_else(|| home.join("coursegen.db"));

    let max_concurrent_runs = match env("COURSEGEN_MAX_CONCURRENT_RUNS") {
        Some(value) => value
            .parse()
            .with_context(|| format!("Invalid COURSEGEN_MAX_CONCURRENT_RUNS: {}", value))?,
        None => file
            .as_ref()
            .and_then(|f| f.dispatch.as_ref())
            .and_then(|d| d.max_concurrent_runs)
            .unwrap_or(DEFAULT_MAX_CONCURRENT_RUNS),
    };

    let retry_config = file.as_ref().and_then(|f| f.retry.as_ref());
    let defaults = RetryPolicy::default();
    let retry = RetryPolicy::new(
        retry_config
            .and_then(|r| r.max_attempts)
            .unwrap_or(defaults.max_attempts),
        Duration::from_millis(
            retry_config
                .and_then(|r| r.base_delay_ms)
                .unwrap_or(defaults.base_delay_ms),
        ),
    );

    let gen_config = file.as_ref().and_then(|f| f.generation.as_ref());
    let api_key_env = gen_config
        .and_then(|g| g.api_key_env.clone())
        .unwrap_or_else(|| DEFAULT_API_KEY_ENV.to_string());
    let generation = GenerationSettings {
        base_url: env("COURSEGEN_BASE_URL")
            .or_else(|| gen_config.and_then(|g| g.base_url.clone()))
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        model: env("COURSEGEN_MODEL")
            .or_else(|| gen_config.and_then(|g| g.model.clone()))
            .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        timeout_seconds: gen_config
            .and_then(|g| g.timeout_seconds)
            .unwrap_or(DEFAULT_TIMEOUT_SECONDS),
        api_key: env(&api_key_env),
        api_key_env,
    };

    Ok(ResolvedConfig {
        home,
        database,
        config_file: config_path,
        max_concurrent_runs,
        retry,
        generation,
    })
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(CONFIG_DIR);

    let config_file = match find_config_file() {
        Some(path) => {
            let file = load_config_file(&path)?;
            Some((path, file))
        }
        None => None,
    };

    resolve(config_file, |key| std::env::var(key).ok(), default_home)
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| format!("{:#}", e)));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Get the state directory
pub fn coursegen_home() -> Result<PathBuf> {
    Ok(config()?.home.clone())
}

/// Get the runs directory ($COURSEGEN_HOME/runs)
pub fn runs_dir() -> Result<PathBuf> {
    Ok(config()?.runs_dir())
}

/// Get the database path ($COURSEGEN_HOME/coursegen.db by default)
pub fn database_path() -> Result<PathBuf> {
    Ok(config()?.database.clone())
}
