use thiserror::Error;

/// Application-wide error types for the availability tracker.
#[derive(Error, Debug)]
pub enum AppError {
    /// HTTP request failed or returned a non-2xx status.
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Headless browser could not be launched or driven.
    #[error("Browser error: {0}")]
    BrowserError(String),

    /// The status page did not have the expected structure.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// A snapshot that failed extraction, or lacks a timestamp, was handed
    /// to a stage that needs a complete one.
    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),

    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Could not obtain a database connection after retrying.
    #[error("Database connection failed after {attempts} attempts: {message}")]
    ConnectionFailed { attempts: u32, message: String },

    /// Writing the JSON export failed.
    #[error("Export error: {0}")]
    ExportError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Invalid or inconsistent configuration value.
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl AppError {
    /// Returns true if this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::NetworkError(_) | AppError::Timeout(_) => true,
            AppError::HttpError(msg) => {
                msg.contains("timeout") || msg.contains("connect") || msg.contains("reset")
            }
            _ => false,
        }
    }
}
