pub mod clock;
pub mod config;
pub mod error;
pub mod export;
pub mod models;
pub mod monitor;
pub mod normalize;
pub mod reference;
pub mod traits;

#[cfg(test)]
mod testutil;

pub use config::MonitorConfig;
pub use error::AppError;
pub use export::JsonFileExporter;
pub use models::{FieldValue, HistoryRecord, PersistSummary, SnapshotResult, StatusCode, StatusRow};
pub use monitor::{RunOutcome, Stage, StatusMonitor, TracingMonitorReporter};
pub use normalize::normalize_key;
pub use reference::ReferenceData;
pub use traits::{Fetcher, HistoryStore, SnapshotExporter, SnapshotParser};
