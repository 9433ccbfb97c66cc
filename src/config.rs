use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::domain::error::BulkUpdateError;

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for running next to the browser form locally.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `127.0.0.1`).
    pub host: String,
    /// Bind port (default: `5000`).
    pub port: u16,
    /// Allowed CORS origins from comma-separated `CORS_ORIGINS`; `*` allows any.
    pub cors_origins: Vec<String>,
    /// Directory where uploaded spreadsheets are staged during a job.
    pub upload_dir: PathBuf,
    pub check_timeout: Duration,
    pub batch_timeout: Duration,
    /// Largest accepted multipart body, in bytes.
    pub max_upload_bytes: usize,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var              | Default                |
    /// |----------------------|------------------------|
    /// | `HOST`               | `127.0.0.1`            |
    /// | `PORT`               | `5000`                 |
    /// | `CORS_ORIGINS`       | `*`                    |
    /// | `UPLOAD_DIR`         | system temp directory  |
    /// | `WEBHOOK_CHECK_TIMEOUT_SECS` | `10`                   |
    /// | `BATCH_TIMEOUT_SECS` | `30`                   |
    /// | `MAX_UPLOAD_BYTES`   | `20971520`             |
    pub fn from_env() -> Result<Self, BulkUpdateError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ServerConfig::from_env`] but reads values through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, BulkUpdateError> {
        let host = lookup("HOST").unwrap_or_else(|| "127.0.0.1".into());
        let port = parse_or(&lookup, "PORT", 5000u16)?;

        let cors_origins: Vec<String> = lookup("CORS_ORIGINS")
            .unwrap_or_else(|| "*".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let upload_dir = lookup("UPLOAD_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir);

        let check_timeout = Duration::from_secs(parse_or(&lookup, "WEBHOOK_CHECK_TIMEOUT_SECS", 10u64)?);
        let batch_timeout = Duration::from_secs(parse_or(&lookup, "BATCH_TIMEOUT_SECS", 30u64)?);
        let max_upload_bytes = parse_or(&lookup, "MAX_UPLOAD_BYTES", 20 * 1024 * 1024usize)?;

        Ok(Self {
            host,
            port,
            cors_origins,
            upload_dir,
            check_timeout,
            batch_timeout,
            max_upload_bytes,
        })
    }

    pub fn allows_any_origin(&self) -> bool {
        self.cors_origins.is_empty() || self.cors_origins.iter().any(|o| o == "*")
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, BulkUpdateError> {
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| BulkUpdateError::Config(format!("{key} has an invalid value: '{raw}'"))),
        None => Ok(default),
    }
}
