use std::{path::PathBuf, time::Duration};

use serde_aux::field_attributes::{
    deserialize_number_from_string, deserialize_option_number_from_string,
};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};

use crate::domain::{category::CategoryRule, email::EmailFilterMode};

#[derive(serde::Deserialize, Clone, Debug)]
pub struct Settings {
    pub run: RunSettings,
    pub database: DatabaseSettings,
    pub browser: BrowserSettings,
    pub pipeline: PipelineSettings,
    pub enrichment: EnrichmentSettings,
    #[serde(default)]
    pub classifier: ClassifierSettings,
}

/// What to search for and where the results go.
#[derive(serde::Deserialize, Clone, Debug)]
pub struct RunSettings {
    pub search: String,
    #[serde(default)]
    pub location: String,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub target: usize,
    /// Listings to scan before giving up on `target`. Never below `target`.
    #[serde(default, deserialize_with = "deserialize_option_number_from_string")]
    pub max_listings: Option<usize>,
    pub output: PathBuf,
    #[serde(default)]
    pub append: bool,
    /// Also export leads that were already in the store before this run.
    #[serde(default)]
    pub export_known: bool,
}

#[derive(serde::Deserialize, Clone, Debug)]
pub struct DatabaseSettings {
    pub path: PathBuf,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub max_connections: u32,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub busy_timeout_secs: u64,
}

impl DatabaseSettings {
    pub fn connect_options(&self) -> SqliteConnectOptions {
        SqliteConnectOptions::new()
            .filename(&self.path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(self.busy_timeout_secs))
    }
}

#[derive(serde::Deserialize, Clone, Debug)]
pub struct BrowserSettings {
    pub webdriver_url: String,
    pub headless: bool,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub max_sessions: usize,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub launch_attempts: u32,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub min_request_interval_ms: u64,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub pacing_jitter_ms: u64,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub navigation_timeout_secs: u64,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub detail_timeout_secs: u64,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub max_scroll_attempts: u32,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub scroll_pause_ms: u64,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub max_results_per_search: usize,
}

impl BrowserSettings {
    pub fn min_request_interval(&self) -> Duration {
        Duration::from_millis(self.min_request_interval_ms)
    }

    pub fn pacing_jitter(&self) -> Duration {
        Duration::from_millis(self.pacing_jitter_ms)
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }

    pub fn detail_timeout(&self) -> Duration {
        Duration::from_secs(self.detail_timeout_secs)
    }

    pub fn scroll_pause(&self) -> Duration {
        Duration::from_millis(self.scroll_pause_ms)
    }
}

#[derive(serde::Deserialize, Clone, Debug)]
pub struct PipelineSettings {
    pub skip_known: bool,
    /// Off means every listing is treated as new and nothing is written to the store.
    pub dedup_enabled: bool,
    /// Off drops new leads that came back without an email.
    pub include_without_email: bool,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub max_task_retries: u32,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub retry_backoff_ms: u64,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub persist_concurrency: usize,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub cancel_grace_period_secs: u64,
}

impl PipelineSettings {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn cancel_grace_period(&self) -> Duration {
        Duration::from_secs(self.cancel_grace_period_secs)
    }
}

#[derive(serde::Deserialize, Clone, Debug)]
pub struct EnrichmentSettings {
    pub enabled: bool,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub max_concurrent: usize,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub timeout_secs: u64,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub max_attempts: u32,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub backoff_base_ms: u64,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub max_redirects: usize,
    pub email_filter_mode: EmailFilterMode,
    pub contact_paths: Vec<String>,
}

impl EnrichmentSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }
}

#[derive(serde::Deserialize, Clone, Debug, Default)]
pub struct ClassifierSettings {
    /// Replaces the built-in rule table when present.
    #[serde(default)]
    pub rules: Option<Vec<CategoryRule>>,
}

pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{} is not a supported environment. Use either `local` or `production`.",
                other
            )),
        }
    }
}

pub fn get_configuration() -> Result<Settings, config::ConfigError> {
    let base_path = std::env::current_dir().map_err(|e| {
        config::ConfigError::Message(format!("Failed to determine the current directory: {}", e))
    })?;
    let configuration_directory = base_path.join("configuration");

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(config::ConfigError::Message)?;
    let environment_filename = format!("{}.yaml", environment.as_str());

    let settings = config::Config::builder()
        .add_source(config::File::from(
            configuration_directory.join("base.yaml"),
        ))
        .add_source(
            config::File::from(configuration_directory.join(environment_filename))
                .required(false),
        )
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    settings.try_deserialize::<Settings>()
}
