use chrono::{DateTime, Utc};
use nfe_core::error::AppError;
use nfe_core::models::{HistoryRecord, PersistSummary, SnapshotResult, StatusRow};
use nfe_core::traits::HistoryStore;
use sqlx::{Connection, PgConnection};

use crate::database::Database;
use crate::retention::RetentionPruner;

/// SCD2 history of autorizador rows in PostgreSQL.
///
/// Each autorizador has at most one current record. A changed row closes
/// the current record at the snapshot's timestamp and opens a new one;
/// an identical row writes nothing.
#[derive(Clone)]
pub struct HistoryRepository {
    db: Database,
    pruner: RetentionPruner,
}

impl HistoryRepository {
    pub fn new(db: Database, pruner: RetentionPruner) -> Self {
        Self { db, pruner }
    }

    /// Versions of one autorizador, newest first.
    pub async fn history(
        &self,
        autorizador: &str,
        limit: usize,
    ) -> Result<Vec<HistoryRecord>, AppError> {
        let sql = self.db.layout().select_history_sql();
        let mut conn = self.db.acquire().await?;
        let rows = sqlx::query_as::<_, HistoryRow>(&sql)
            .bind(autorizador)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    /// Every current record, ordered by autorizador.
    pub async fn current(&self) -> Result<Vec<HistoryRecord>, AppError> {
        let sql = self.db.layout().select_all_current_sql();
        let mut conn = self.db.acquire().await?;
        let rows = sqlx::query_as::<_, HistoryRow>(&sql)
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    /// Check database connectivity.
    pub async fn health_check(&self) -> Result<(), AppError> {
        let mut conn = self.db.acquire().await?;
        sqlx::query("SELECT 1")
            .execute(&mut *conn)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        Ok(())
    }

    /// Apply one row inside the open transaction.
    async fn apply_row(
        &self,
        tx: &mut PgConnection,
        autorizador: &str,
        row: &StatusRow,
        valid_from: DateTime<Utc>,
        summary: &mut PersistSummary,
    ) -> Result<(), AppError> {
        let layout = self.db.layout();
        let current = sqlx::query_as::<_, HistoryRow>(&layout.select_current_sql())
            .bind(autorizador)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(format!("Loading current record of {autorizador}: {e}"))
            })?;

        if let Some(current) = &current {
            match StatusRow::from_json(&current.status_json) {
                Ok(stored) if stored == *row => {
                    summary.unchanged += 1;
                    return Ok(());
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(
                    autorizador,
                    id = current.id,
                    error = %e,
                    "Stored status is not valid JSON, replacing it"
                ),
            }

            sqlx::query(&layout.close_sql())
                .bind(valid_from)
                .bind(current.id)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    AppError::DatabaseError(format!("Closing record {} of {autorizador}: {e}", current.id))
                })?;
            summary.closed += 1;
        }

        sqlx::query(&layout.insert_sql())
            .bind(autorizador)
            .bind(row.to_json()?)
            .bind(valid_from)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(format!("Inserting record of {autorizador}: {e}"))
            })?;
        summary.inserted += 1;

        tracing::debug!(autorizador, changed = current.is_some(), "Recorded new version");
        Ok(())
    }
}

impl HistoryStore for HistoryRepository {
    async fn init(&self) -> Result<(), AppError> {
        self.db.init_schema().await
    }

    async fn persist(&self, snapshot: &SnapshotResult) -> Result<PersistSummary, AppError> {
        if !snapshot.success() {
            return Err(AppError::InvalidSnapshot(format!(
                "refusing to persist failed snapshot: {}",
                snapshot.error_message().unwrap_or("unknown error")
            )));
        }
        let Some(checked_at) = snapshot.checked_at() else {
            return Err(AppError::InvalidSnapshot(
                "refusing to persist snapshot without checked_at".into(),
            ));
        };
        let valid_from = checked_at.and_utc();

        let mut conn = self.db.acquire().await?;
        let mut tx = conn
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(format!("Starting transaction: {e}")))?;

        let mut summary = PersistSummary::default();
        for row in snapshot.statuses() {
            let Some(autorizador) = row.autorizador() else {
                tracing::warn!("Skipping row without autorizador");
                summary.skipped += 1;
                continue;
            };
            self.apply_row(&mut tx, autorizador, row, valid_from, &mut summary)
                .await?;
        }

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(format!("Committing snapshot: {e}")))?;

        tracing::info!(
            inserted = summary.inserted,
            closed = summary.closed,
            unchanged = summary.unchanged,
            skipped = summary.skipped,
            "Snapshot persisted"
        );

        self.pruner.apply(Some(&mut *conn)).await;
        Ok(summary)
    }
}

// -- Internal row type for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct HistoryRow {
    id: i64,
    autorizador: String,
    status_json: String,
    valid_from: DateTime<Utc>,
    valid_to: Option<DateTime<Utc>>,
    is_current: i32,
}

impl TryFrom<HistoryRow> for HistoryRecord {
    type Error = AppError;

    fn try_from(row: HistoryRow) -> Result<Self, Self::Error> {
        Ok(HistoryRecord {
            id: row.id,
            status: StatusRow::from_json(&row.status_json)?,
            autorizador: row.autorizador,
            valid_from: row.valid_from,
            valid_to: row.valid_to,
            is_current: row.is_current == 1,
        })
    }
}
