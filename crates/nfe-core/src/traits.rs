use std::future::Future;
use std::path::PathBuf;

use crate::error::AppError;
use crate::models::{PersistSummary, SnapshotResult};

/// Fetches the raw HTML of the availability page.
pub trait Fetcher: Send + Sync + Clone {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<String, AppError>> + Send;
}

/// Turns page HTML into an enriched snapshot.
///
/// Structural problems are reported as a failed [`SnapshotResult`], not as
/// an error.
pub trait SnapshotParser: Send + Sync + Clone {
    fn parse(&self, html: &str) -> SnapshotResult;
}

/// Durable SCD2 history of autorizador rows.
pub trait HistoryStore: Send + Sync + Clone {
    /// Create the history table and indexes if they do not exist.
    fn init(&self) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Record the snapshot: close changed versions and insert new current
    /// ones, then apply retention.
    ///
    /// Refuses failed or undated snapshots with [`AppError::InvalidSnapshot`]
    /// without touching storage.
    fn persist(
        &self,
        snapshot: &SnapshotResult,
    ) -> impl Future<Output = Result<PersistSummary, AppError>> + Send;
}

/// Publishes the latest snapshot for downstream consumers.
pub trait SnapshotExporter: Send + Sync + Clone {
    /// Returns the path written.
    fn export(&self, snapshot: &SnapshotResult) -> Result<PathBuf, AppError>;
}
