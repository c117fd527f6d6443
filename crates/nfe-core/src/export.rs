use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{NaiveDateTime, SecondsFormat};
use chrono_tz::Tz;
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::clock::{Clock, SystemClock};
use crate::error::AppError;
use crate::models::{SnapshotResult, StatusRow};
use crate::traits::SnapshotExporter;

/// Format version written into every export.
pub const EXPORT_VERSION: &str = "2.0";

#[derive(Serialize)]
struct ExportDocument<'a> {
    checked_at: Option<NaiveDateTime>,
    statuses: &'a [StatusRow],
    metadata: ExportMetadata,
}

#[derive(Serialize)]
struct ExportMetadata {
    total_records: usize,
    generated_at: String,
    version: &'static str,
}

/// Writes the latest snapshot to a JSON file.
///
/// The document is written to a temporary file next to the destination,
/// synced, then renamed over it, so readers see either the previous export
/// or the complete new one.
#[derive(Clone)]
pub struct JsonFileExporter {
    path: PathBuf,
    timezone: Tz,
    clock: Arc<dyn Clock>,
}

impl JsonFileExporter {
    pub fn new(path: impl Into<PathBuf>, timezone: Tz) -> Self {
        Self::with_clock(path, timezone, Arc::new(SystemClock))
    }

    pub fn with_clock(path: impl Into<PathBuf>, timezone: Tz, clock: Arc<dyn Clock>) -> Self {
        Self {
            path: path.into(),
            timezone,
            clock,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Render the export document without touching the filesystem.
    pub fn render(&self, snapshot: &SnapshotResult) -> Result<String, AppError> {
        let document = ExportDocument {
            checked_at: snapshot.checked_at(),
            statuses: snapshot.statuses(),
            metadata: ExportMetadata {
                total_records: snapshot.statuses().len(),
                generated_at: self
                    .clock
                    .now()
                    .with_timezone(&self.timezone)
                    .to_rfc3339_opts(SecondsFormat::Micros, false),
                version: EXPORT_VERSION,
            },
        };
        Ok(serde_json::to_string_pretty(&document)?)
    }

    fn write_atomic(&self, content: &str) -> Result<(), AppError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|e| {
            AppError::ExportError(format!("Cannot create directory {}: {e}", dir.display()))
        })?;

        let mut tmp = NamedTempFile::new_in(&dir)
            .map_err(|e| AppError::ExportError(format!("Cannot create temp file: {e}")))?;
        write_synced(&mut tmp, content)
            .map_err(|e| AppError::ExportError(format!("Failed to write temp file: {e}")))?;

        tmp.persist(&self.path).map_err(|e| {
            AppError::ExportError(format!(
                "Failed to move export into {}: {}",
                self.path.display(),
                e.error
            ))
        })?;
        Ok(())
    }
}

fn write_synced(tmp: &mut NamedTempFile, content: &str) -> std::io::Result<()> {
    tmp.write_all(content.as_bytes())?;
    tmp.flush()?;
    tmp.as_file().sync_all()
}

impl SnapshotExporter for JsonFileExporter {
    fn export(&self, snapshot: &SnapshotResult) -> Result<PathBuf, AppError> {
        if !snapshot.success() {
            return Err(AppError::InvalidSnapshot(
                "Cannot export a failed snapshot".into(),
            ));
        }

        tracing::info!(path = %self.path.display(), "Saving snapshot export");
        let content = self.render(snapshot)?;
        self.write_atomic(&content)?;
        tracing::info!(
            records = snapshot.statuses().len(),
            "Export saved (atomic write)"
        );
        Ok(self.path.clone())
    }
}
