//! Test utilities: mock implementations of all core traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;

use crate::error::AppError;
use crate::models::{PersistSummary, SnapshotResult, StatusRow};
use crate::monitor::{MonitorEvent, MonitorReporter, Stage};
use crate::traits::{Fetcher, HistoryStore, SnapshotExporter, SnapshotParser};

/// A one-row snapshot: SVAN green at 2024-01-15 10:30:00.
pub fn sample_snapshot() -> SnapshotResult {
    let mut row = StatusRow::new();
    row.insert("autorizador", "SVAN");
    row.insert("status", "verde");
    let ts = NaiveDate::from_ymd_opt(2024, 1, 15)
        .unwrap()
        .and_hms_opt(10, 30, 0)
        .unwrap();
    SnapshotResult::succeeded(Some(ts), vec![row])
}

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

/// Mock fetcher that returns a configurable response.
#[derive(Clone)]
pub struct MockFetcher {
    response: Arc<Mutex<Option<Result<String, AppError>>>>,
    requested: Arc<Mutex<Vec<String>>>,
    pending: bool,
}

impl MockFetcher {
    pub fn new(html: &str) -> Self {
        Self {
            response: Arc::new(Mutex::new(Some(Ok(html.to_string())))),
            requested: Arc::new(Mutex::new(Vec::new())),
            pending: false,
        }
    }

    pub fn with_error(error: AppError) -> Self {
        Self {
            response: Arc::new(Mutex::new(Some(Err(error)))),
            requested: Arc::new(Mutex::new(Vec::new())),
            pending: false,
        }
    }

    /// A fetch that never completes, for cancellation tests.
    pub fn pending() -> Self {
        Self {
            response: Arc::new(Mutex::new(None)),
            requested: Arc::new(Mutex::new(Vec::new())),
            pending: true,
        }
    }

    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }
}

impl Fetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<String, AppError> {
        self.requested.lock().unwrap().push(url.to_string());
        if self.pending {
            std::future::pending::<()>().await;
        }
        self.response
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| Ok("<html><body>default</body></html>".to_string()))
    }
}

// ---------------------------------------------------------------------------
// MockParser
// ---------------------------------------------------------------------------

/// Mock parser that returns a fixed snapshot and records its inputs.
#[derive(Clone)]
pub struct MockParser {
    snapshot: SnapshotResult,
    inputs: Arc<Mutex<Vec<String>>>,
}

impl MockParser {
    pub fn new(snapshot: SnapshotResult) -> Self {
        Self {
            snapshot,
            inputs: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn inputs(&self) -> Vec<String> {
        self.inputs.lock().unwrap().clone()
    }
}

impl SnapshotParser for MockParser {
    fn parse(&self, html: &str) -> SnapshotResult {
        self.inputs.lock().unwrap().push(html.to_string());
        self.snapshot.clone()
    }
}

// ---------------------------------------------------------------------------
// MockStore
// ---------------------------------------------------------------------------

/// Mock store that records persisted snapshots.
#[derive(Clone)]
pub struct MockStore {
    init_calls: Arc<Mutex<usize>>,
    persisted: Arc<Mutex<Vec<SnapshotResult>>>,
    init_error: Arc<Mutex<Option<AppError>>>,
    persist_error: Arc<Mutex<Option<AppError>>>,
}

impl MockStore {
    pub fn new() -> Self {
        Self {
            init_calls: Arc::new(Mutex::new(0)),
            persisted: Arc::new(Mutex::new(Vec::new())),
            init_error: Arc::new(Mutex::new(None)),
            persist_error: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_init_error(error: AppError) -> Self {
        let store = Self::new();
        *store.init_error.lock().unwrap() = Some(error);
        store
    }

    pub fn with_persist_error(error: AppError) -> Self {
        let store = Self::new();
        *store.persist_error.lock().unwrap() = Some(error);
        store
    }

    pub fn init_calls(&self) -> usize {
        *self.init_calls.lock().unwrap()
    }

    pub fn persisted(&self) -> Vec<SnapshotResult> {
        self.persisted.lock().unwrap().clone()
    }
}

impl HistoryStore for MockStore {
    async fn init(&self) -> Result<(), AppError> {
        *self.init_calls.lock().unwrap() += 1;
        match self.init_error.lock().unwrap().take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn persist(&self, snapshot: &SnapshotResult) -> Result<PersistSummary, AppError> {
        if let Some(e) = self.persist_error.lock().unwrap().take() {
            return Err(e);
        }
        self.persisted.lock().unwrap().push(snapshot.clone());
        Ok(PersistSummary {
            inserted: snapshot.statuses().len(),
            ..PersistSummary::default()
        })
    }
}

// ---------------------------------------------------------------------------
// MockExporter
// ---------------------------------------------------------------------------

/// Mock exporter that records exported snapshots.
#[derive(Clone)]
pub struct MockExporter {
    exported: Arc<Mutex<Vec<SnapshotResult>>>,
    error: Arc<Mutex<Option<AppError>>>,
}

impl MockExporter {
    pub fn new() -> Self {
        Self {
            exported: Arc::new(Mutex::new(Vec::new())),
            error: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_error(error: AppError) -> Self {
        Self {
            exported: Arc::new(Mutex::new(Vec::new())),
            error: Arc::new(Mutex::new(Some(error))),
        }
    }

    pub fn exported(&self) -> Vec<SnapshotResult> {
        self.exported.lock().unwrap().clone()
    }
}

impl SnapshotExporter for MockExporter {
    fn export(&self, snapshot: &SnapshotResult) -> Result<PathBuf, AppError> {
        if let Some(e) = self.error.lock().unwrap().take() {
            return Err(e);
        }
        self.exported.lock().unwrap().push(snapshot.clone());
        Ok(PathBuf::from("disponibilidade.json"))
    }
}

// ---------------------------------------------------------------------------
// RecordingReporter
// ---------------------------------------------------------------------------

/// Reporter that remembers which stages were started.
#[derive(Default)]
pub struct RecordingReporter {
    stages: Mutex<Vec<Stage>>,
}

impl RecordingReporter {
    pub fn stages(&self) -> Vec<Stage> {
        self.stages.lock().unwrap().clone()
    }
}

impl MonitorReporter for RecordingReporter {
    fn report(&self, event: MonitorEvent<'_>) {
        if let MonitorEvent::StageStarted { stage } = event {
            self.stages.lock().unwrap().push(stage);
        }
    }
}
