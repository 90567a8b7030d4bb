// Configuration loading and parsing (fantacup.toml, credentials.toml).

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable that overrides `rapid_api_key` from credentials.toml.
pub const API_KEY_ENV: &str = "RAPID_API_KEY";

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("missing credential `{name}`: set it in config/credentials.toml or the {env} environment variable")]
    MissingCredential { name: String, env: String },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("cannot install {to} from {from}: {source}")]
    DefaultInstall {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// Top-level assembled Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub tournament: TournamentConfig,
    pub api: ApiConfig,
    pub schedule: ScheduleJobConfig,
    pub results: ResultsJobConfig,
    pub updates: UpdatesConfig,
    pub credentials: CredentialsConfig,
    pub ws_port: u16,
    pub db_path: String,
    pub owners_path: String,
    /// Optional `alias,team` CSV applied after the ownership seed.
    pub aliases_path: Option<String>,
}

// ---------------------------------------------------------------------------
// fantacup.toml structs
// ---------------------------------------------------------------------------

/// Raw deserialization target for the entire fantacup.toml file.
#[derive(Debug, Clone, Deserialize)]
struct FantacupFile {
    tournament: TournamentConfig,
    api: ApiConfig,
    schedule: ScheduleJobConfig,
    results: ResultsJobConfig,
    updates: UpdatesConfig,
    server: ServerSection,
    #[serde(default)]
    database: DatabaseSection,
    data: DataSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TournamentConfig {
    pub name: String,
    pub league_id: u32,
    pub season: u32,
    /// First kickoff of the knockout stage. Losses from this point on
    /// eliminate teams.
    pub knockout_start: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    pub host: String,
}

/// Fetch retry settings shared by both update jobs.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_secs: u64,
    pub fetch_timeout_secs: u64,
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_secs(self.base_delay_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleJobConfig {
    /// UTC hour of the daily full-schedule sync.
    pub daily_hour_utc: u32,
    #[serde(flatten)]
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResultsJobConfig {
    pub interval_minutes: u64,
    /// Results are fetched for `today ± window_days`.
    pub window_days: i64,
    #[serde(flatten)]
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdatesConfig {
    /// A job still marked running after this long is treated as crashed.
    pub max_run_minutes: u64,
    pub leaderboard_interval_minutes: u64,
}

#[derive(Debug, Clone, Deserialize)]
struct ServerSection {
    port: u16,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct DatabaseSection {
    path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct DataSection {
    owners: String,
    #[serde(default)]
    aliases: Option<String>,
}

// ---------------------------------------------------------------------------
// credentials.toml structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
struct CredentialsFile {
    rapid_api_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CredentialsConfig {
    pub rapid_api_key: String,
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate configuration from `config/fantacup.toml` and
/// (optionally) `config/credentials.toml`, relative to `base_dir`.
///
/// This is the lower-level loading primitive that neither copies defaults
/// nor reads the environment. Prefer `load_config()`.
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    load_config_with(base_dir, None)
}

fn load_config_with(base_dir: &Path, api_key_override: Option<String>) -> Result<Config, ConfigError> {
    let config_dir = base_dir.join("config");

    // --- fantacup.toml (required) ---
    let main_path = config_dir.join("fantacup.toml");
    let main_text = read_file(&main_path)?;
    let file: FantacupFile = toml::from_str(&main_text).map_err(|e| ConfigError::ParseError {
        path: main_path.clone(),
        source: e,
    })?;

    // --- credentials.toml (optional file, required key) ---
    let credentials_path = config_dir.join("credentials.toml");
    let credentials_file: CredentialsFile = if credentials_path.exists() {
        let text = read_file(&credentials_path)?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseError {
            path: credentials_path.clone(),
            source: e,
        })?
    } else {
        CredentialsFile::default()
    };

    let rapid_api_key = api_key_override
        .or(credentials_file.rapid_api_key)
        .filter(|key| !key.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingCredential {
            name: "rapid_api_key".into(),
            env: API_KEY_ENV.into(),
        })?;

    let db_path = match file.database.path {
        Some(path) => path,
        None => default_db_path()?,
    };

    let config = Config {
        tournament: file.tournament,
        api: file.api,
        schedule: file.schedule,
        results: file.results,
        updates: file.updates,
        credentials: CredentialsConfig { rapid_api_key },
        ws_port: file.server.port,
        db_path,
        owners_path: file.data.owners,
        aliases_path: file.data.aliases,
    };

    validate(&config)?;

    Ok(config)
}

/// First-run setup: when `config/fantacup.toml` is missing, install the
/// shipped `defaults/fantacup.toml` in its place. Credentials are never
/// installed; the key comes from `credentials.toml` or the environment.
///
/// Returns whether a file was installed.
pub fn install_default_config(base_dir: &Path) -> Result<bool, ConfigError> {
    let to = base_dir.join("config").join("fantacup.toml");
    if to.exists() {
        return Ok(false);
    }
    let from = base_dir.join("defaults").join("fantacup.toml");
    let install = |source| ConfigError::DefaultInstall {
        from: from.clone(),
        to: to.clone(),
        source,
    };

    if let Some(dir) = to.parent() {
        std::fs::create_dir_all(dir).map_err(install)?;
    }
    std::fs::copy(&from, &to).map_err(install)?;
    Ok(true)
}

/// Convenience wrapper: loads config relative to the current working
/// directory, copying defaults first and honouring `RAPID_API_KEY`.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;
    if install_default_config(&cwd)? {
        tracing::info!("installed default config into {}", cwd.join("config").display());
    }
    load_config_with(&cwd, std::env::var(API_KEY_ENV).ok())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

/// `<platform data dir>/fantacup.db`, used when `[database] path` is omitted.
fn default_db_path() -> Result<String, ConfigError> {
    let dirs = directories::ProjectDirs::from("", "", "fantacup").ok_or_else(|| {
        ConfigError::ValidationError {
            field: "database.path".into(),
            message: "not set and no home directory to derive a default from".into(),
        }
    })?;
    Ok(dirs.data_dir().join("fantacup.db").to_string_lossy().into_owned())
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.db_path.trim().is_empty() {
        return Err(ConfigError::ValidationError {
            field: "database.path".into(),
            message: "must not be empty".into(),
        });
    }

    if config.schedule.daily_hour_utc > 23 {
        return Err(ConfigError::ValidationError {
            field: "schedule.daily_hour_utc".into(),
            message: format!("must be between 0 and 23, got {}", config.schedule.daily_hour_utc),
        });
    }

    let positive: &[(&str, u64)] = &[
        ("results.interval_minutes", config.results.interval_minutes),
        ("updates.max_run_minutes", config.updates.max_run_minutes),
        (
            "updates.leaderboard_interval_minutes",
            config.updates.leaderboard_interval_minutes,
        ),
        ("schedule.fetch_timeout_secs", config.schedule.retry.fetch_timeout_secs),
        ("results.fetch_timeout_secs", config.results.retry.fetch_timeout_secs),
    ];
    for (name, val) in positive {
        if *val == 0 {
            return Err(ConfigError::ValidationError {
                field: name.to_string(),
                message: "must be > 0".into(),
            });
        }
    }

    for (name, retry) in [("schedule", &config.schedule.retry), ("results", &config.results.retry)] {
        if retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError {
                field: format!("{name}.max_attempts"),
                message: "must be at least 1".into(),
            });
        }
    }

    if config.results.window_days < 0 {
        return Err(ConfigError::ValidationError {
            field: "results.window_days".into(),
            message: format!("must not be negative, got {}", config.results.window_days),
        });
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
