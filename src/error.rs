use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ScrapeError {
    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    #[error("Browser session crashed: {0}")]
    SessionCrash(String),

    #[error("Failed to parse listing {map_id}: {message}")]
    Parse { map_id: String, message: String },

    #[error("Could not launch a browser session after {attempts} attempts: {message}")]
    PoolExhausted { attempts: u32, message: String },

    #[error("Cancelled")]
    Cancelled,
}

impl ScrapeError {
    /// Errors after which the task may be retried on a fresh session.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ScrapeError::TransientNetwork(_) | ScrapeError::SessionCrash(_)
        )
    }
}

impl From<thirtyfour::error::WebDriverError> for ScrapeError {
    fn from(err: thirtyfour::error::WebDriverError) -> Self {
        let message = err.to_string();
        let lowered = message.to_lowercase();
        if lowered.contains("timeout") || lowered.contains("timed out") {
            ScrapeError::TransientNetwork(message)
        } else {
            ScrapeError::SessionCrash(message)
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Lead store unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to write lead {fingerprint}: {message}")]
    Write {
        fingerprint: String,
        message: String,
    },
}

impl StoreError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }

    pub fn from_sqlx(fingerprint: &str, err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Unavailable(err.to_string())
            }
            other => StoreError::Write {
                fingerprint: fingerprint.to_string(),
                message: other.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("Transient fetch error: {0}")]
    Transient(String),

    #[error("Fetch failed: {0}")]
    Permanent(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_redirect() || err.is_builder() {
            return FetchError::Permanent(err.to_string());
        }
        if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
            return FetchError::Transient(err.to_string());
        }
        match err.status() {
            Some(status) if status.as_u16() == 429 || status.is_server_error() => {
                FetchError::Transient(err.to_string())
            }
            _ => FetchError::Permanent(err.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    PoolExhausted(ScrapeError),

    #[error(transparent)]
    StoreUnavailable(StoreError),
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Failed to write {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to write csv row: {0}")]
    Csv(#[from] csv::Error),
}
