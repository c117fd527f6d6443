use std::path::PathBuf;
use std::time::Duration;

use chrono_tz::Tz;
use url::Url;

use crate::error::AppError;

pub const DEFAULT_URL: &str = "https://www.nfe.fazenda.gov.br/portal/disponibilidade.aspx";
pub const DEFAULT_TABLE_ID: &str = "ctl00_ContentPlaceHolder1_gdvDisponibilidade2";

/// Pipeline configuration, read from `NFE_*` environment variables.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub url: String,
    /// Element id of the availability table on the page.
    pub table_id: String,
    pub fetch_timeout: Duration,
    pub json_path: PathBuf,
    pub log_level: String,
    /// `None` disables the log file.
    pub log_file: Option<PathBuf>,
    pub retention_max_days: u32,
    pub retention_max_mb: u64,
    pub timezone: Tz,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            table_id: DEFAULT_TABLE_ID.to_string(),
            fetch_timeout: Duration::from_secs(30),
            json_path: PathBuf::from("disponibilidade.json"),
            log_level: "info".to_string(),
            log_file: Some(PathBuf::from("nfe_status.log")),
            retention_max_days: 30,
            retention_max_mb: 10,
            timezone: chrono_tz::America::Sao_Paulo,
        }
    }
}

impl MonitorConfig {
    /// Read configuration from environment variables.
    ///
    /// Every key is optional:
    /// - `NFE_URL`, `NFE_TABLE_ID`, `NFE_FETCH_TIMEOUT_SECS`
    /// - `NFE_JSON_PATH`
    /// - `NFE_LOG_LEVEL`, `NFE_LOG_FILE` (empty disables the file)
    /// - `NFE_RETENTION_MAX_DAYS`, `NFE_RETENTION_MAX_MB`
    /// - `NFE_TIMEZONE` (IANA name, defaults to `America/Sao_Paulo`)
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let url = lookup("NFE_URL").unwrap_or(defaults.url);
        validate_url(&url)?;

        let fetch_timeout = match parse_number::<u64>(&lookup, "NFE_FETCH_TIMEOUT_SECS")? {
            Some(0) => {
                return Err(AppError::ConfigError(
                    "NFE_FETCH_TIMEOUT_SECS must be at least 1".into(),
                ));
            }
            Some(secs) => Duration::from_secs(secs),
            None => defaults.fetch_timeout,
        };

        let log_file = match lookup("NFE_LOG_FILE") {
            Some(raw) if raw.trim().is_empty() => None,
            Some(raw) => Some(PathBuf::from(raw)),
            None => defaults.log_file,
        };

        let timezone = match lookup("NFE_TIMEZONE") {
            Some(raw) => raw.parse::<Tz>().map_err(|_| {
                AppError::ConfigError(format!("Invalid NFE_TIMEZONE '{raw}': unknown time zone"))
            })?,
            None => defaults.timezone,
        };

        Ok(Self {
            url,
            table_id: lookup("NFE_TABLE_ID").unwrap_or(defaults.table_id),
            fetch_timeout,
            json_path: lookup("NFE_JSON_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.json_path),
            log_level: lookup("NFE_LOG_LEVEL")
                .map(|s| s.to_lowercase())
                .unwrap_or(defaults.log_level),
            log_file,
            retention_max_days: parse_number(&lookup, "NFE_RETENTION_MAX_DAYS")?
                .unwrap_or(defaults.retention_max_days),
            retention_max_mb: parse_number(&lookup, "NFE_RETENTION_MAX_MB")?
                .unwrap_or(defaults.retention_max_mb),
            timezone,
        })
    }
}

/// Reject anything that is not an absolute http(s) URL.
pub fn validate_url(raw: &str) -> Result<(), AppError> {
    let parsed =
        Url::parse(raw).map_err(|e| AppError::ConfigError(format!("Invalid URL '{raw}': {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(AppError::ConfigError(format!(
            "URL scheme '{scheme}' is not allowed (only http/https)"
        ))),
    }
}

fn parse_number<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, AppError> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            AppError::ConfigError(format!(
                "Invalid {key} '{raw}': must be a non-negative integer"
            ))
        }),
    }
}
