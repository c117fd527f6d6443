use std::fmt;
use std::future::Future;

use chrono::NaiveDateTime;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::PersistSummary;
use crate::traits::{Fetcher, HistoryStore, SnapshotExporter, SnapshotParser};

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    InitStore,
    Fetch,
    Extract,
    Persist,
    Export,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::InitStore => "init_store",
            Stage::Fetch => "fetch",
            Stage::Extract => "extract",
            Stage::Persist => "persist",
            Stage::Export => "export",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Terminal state of one pipeline run.
#[derive(Debug)]
pub enum RunOutcome {
    Completed {
        checked_at: Option<NaiveDateTime>,
        records: usize,
        summary: PersistSummary,
    },
    Failed {
        stage: Stage,
        error: AppError,
    },
    Interrupted {
        stage: Stage,
    },
}

impl RunOutcome {
    pub const EXIT_SUCCESS: i32 = 0;
    pub const EXIT_FAILURE: i32 = 1;
    pub const EXIT_INTERRUPTED: i32 = 130;

    /// Process exit status for this outcome.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Completed { .. } => Self::EXIT_SUCCESS,
            RunOutcome::Failed { .. } => Self::EXIT_FAILURE,
            RunOutcome::Interrupted { .. } => Self::EXIT_INTERRUPTED,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Completed { .. })
    }
}

/// Events emitted while the pipeline runs.
#[derive(Debug, Clone)]
pub enum MonitorEvent<'a> {
    StageStarted { stage: Stage },
    Fetched { bytes: usize },
    Extracted { rows: usize, checked_at: Option<NaiveDateTime> },
    Persisted { summary: &'a PersistSummary },
    Exported { path: &'a std::path::Path },
    Finished { outcome: &'a RunOutcome },
}

/// Receives pipeline events (decoupled logging).
pub trait MonitorReporter: Send + Sync {
    fn report(&self, event: MonitorEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMonitorReporter;

impl MonitorReporter for TracingMonitorReporter {
    fn report(&self, event: MonitorEvent<'_>) {
        match event {
            MonitorEvent::StageStarted { stage } => {
                tracing::debug!(%stage, "Stage started");
            }
            MonitorEvent::Fetched { bytes } => {
                tracing::info!("Fetched {} bytes of HTML", bytes);
            }
            MonitorEvent::Extracted { rows, checked_at } => {
                tracing::info!(rows, ?checked_at, "Snapshot extracted");
            }
            MonitorEvent::Persisted { summary } => {
                tracing::info!(
                    inserted = summary.inserted,
                    closed = summary.closed,
                    unchanged = summary.unchanged,
                    skipped = summary.skipped,
                    "History persisted"
                );
            }
            MonitorEvent::Exported { path } => {
                tracing::info!(path = %path.display(), "Snapshot exported");
            }
            MonitorEvent::Finished { outcome } => match outcome {
                RunOutcome::Completed {
                    checked_at,
                    records,
                    ..
                } => {
                    tracing::info!(records, ?checked_at, "Run completed");
                }
                RunOutcome::Failed { stage, error } => {
                    tracing::error!(%stage, %error, "Run failed");
                }
                RunOutcome::Interrupted { stage } => {
                    tracing::warn!(%stage, "Run interrupted");
                }
            },
        }
    }
}

/// Runs the availability pipeline: init store → fetch → extract → persist → export.
///
/// Generic over every collaborator so tests can swap in mocks.
pub struct StatusMonitor<F, P, S, E>
where
    F: Fetcher,
    P: SnapshotParser,
    S: HistoryStore,
    E: SnapshotExporter,
{
    fetcher: F,
    parser: P,
    store: S,
    exporter: E,
    url: String,
}

impl<F, P, S, E> StatusMonitor<F, P, S, E>
where
    F: Fetcher,
    P: SnapshotParser,
    S: HistoryStore,
    E: SnapshotExporter,
{
    pub fn new(fetcher: F, parser: P, store: S, exporter: E, url: impl Into<String>) -> Self {
        Self {
            fetcher,
            parser,
            store,
            exporter,
            url: url.into(),
        }
    }

    /// Run every stage once. Never panics on stage errors: each failure is
    /// folded into the returned [`RunOutcome`].
    pub async fn run<R: MonitorReporter>(
        &self,
        cancel: &CancellationToken,
        reporter: &R,
    ) -> RunOutcome {
        let span = tracing::info_span!("run", run_id = %Uuid::new_v4());
        let outcome = async {
            tracing::info!(url = %self.url, "Starting availability check");
            match self.run_stages(cancel, reporter).await {
                Ok(outcome) | Err(outcome) => outcome,
            }
        }
        .instrument(span)
        .await;

        reporter.report(MonitorEvent::Finished { outcome: &outcome });
        outcome
    }

    async fn run_stages<R: MonitorReporter>(
        &self,
        cancel: &CancellationToken,
        reporter: &R,
    ) -> Result<RunOutcome, RunOutcome> {
        reporter.report(MonitorEvent::StageStarted {
            stage: Stage::InitStore,
        });
        guarded(Stage::InitStore, cancel, self.store.init()).await?;

        reporter.report(MonitorEvent::StageStarted {
            stage: Stage::Fetch,
        });
        let html = guarded(Stage::Fetch, cancel, self.fetcher.fetch(&self.url)).await?;
        reporter.report(MonitorEvent::Fetched { bytes: html.len() });

        reporter.report(MonitorEvent::StageStarted {
            stage: Stage::Extract,
        });
        checkpoint(Stage::Extract, cancel)?;
        let snapshot = self.parser.parse(&html);
        if !snapshot.success() {
            let message = snapshot
                .error_message()
                .unwrap_or("unknown parse failure")
                .to_string();
            return Err(RunOutcome::Failed {
                stage: Stage::Extract,
                error: AppError::ParseError(message),
            });
        }
        reporter.report(MonitorEvent::Extracted {
            rows: snapshot.statuses().len(),
            checked_at: snapshot.checked_at(),
        });

        reporter.report(MonitorEvent::StageStarted {
            stage: Stage::Persist,
        });
        let summary = guarded(Stage::Persist, cancel, self.store.persist(&snapshot)).await?;
        reporter.report(MonitorEvent::Persisted { summary: &summary });

        reporter.report(MonitorEvent::StageStarted {
            stage: Stage::Export,
        });
        checkpoint(Stage::Export, cancel)?;
        let path = self
            .exporter
            .export(&snapshot)
            .map_err(|error| RunOutcome::Failed {
                stage: Stage::Export,
                error,
            })?;
        reporter.report(MonitorEvent::Exported { path: &path });

        Ok(RunOutcome::Completed {
            checked_at: snapshot.checked_at(),
            records: snapshot.statuses().len(),
            summary,
        })
    }
}

/// Await a stage, aborting with `Interrupted` as soon as `cancel` fires.
///
/// Dropping the stage future rolls back any open transaction it holds.
async fn guarded<T>(
    stage: Stage,
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T, AppError>>,
) -> Result<T, RunOutcome> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(RunOutcome::Interrupted { stage }),
        result = fut => result.map_err(|error| RunOutcome::Failed { stage, error }),
    }
}

fn checkpoint(stage: Stage, cancel: &CancellationToken) -> Result<(), RunOutcome> {
    if cancel.is_cancelled() {
        Err(RunOutcome::Interrupted { stage })
    } else {
        Ok(())
    }
}
