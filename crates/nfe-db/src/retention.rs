use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use nfe_core::clock::Clock;
use sqlx::PgConnection;

use crate::database::Database;

/// Age and size limits for closed history records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_age_days: u32,
    /// Advisory size cap; exceeding it only logs a warning.
    pub max_size_mb: u64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_age_days: 30,
            max_size_mb: 10,
        }
    }
}

/// Deletes closed history records older than the policy's age threshold.
#[derive(Clone)]
pub struct RetentionPruner {
    db: Database,
    clock: Arc<dyn Clock>,
    policy: RetentionPolicy,
}

impl RetentionPruner {
    pub fn new(db: Database, clock: Arc<dyn Clock>, policy: RetentionPolicy) -> Self {
        Self { db, clock, policy }
    }

    pub fn cutoff(&self) -> DateTime<Utc> {
        self.clock.now() - Duration::days(i64::from(self.policy.max_age_days))
    }

    /// Prune on `conn`, or on a freshly acquired connection when `None`.
    ///
    /// Never fails: errors are logged and reported as zero deletions.
    pub async fn apply(&self, conn: Option<&mut PgConnection>) -> u64 {
        match conn {
            Some(conn) => self.prune_on(conn).await,
            None => match self.db.acquire().await {
                Ok(mut conn) => self.prune_on(&mut conn).await,
                Err(e) => {
                    tracing::error!(error = %e, "Retention skipped: no database connection");
                    0
                }
            },
        }
    }

    async fn prune_on(&self, conn: &mut PgConnection) -> u64 {
        let cutoff = self.cutoff();
        let sql = self.db.layout().prune_sql();

        let deleted = match sqlx::query(&sql).bind(cutoff).execute(&mut *conn).await {
            Ok(result) => result.rows_affected(),
            Err(e) => {
                tracing::error!(error = %e, "Retention pruning failed");
                return 0;
            }
        };

        if deleted > 0 {
            tracing::info!(
                deleted,
                max_age_days = self.policy.max_age_days,
                "Pruned closed history records"
            );
        } else {
            tracing::debug!(%cutoff, "No history records old enough to prune");
        }

        self.check_size(conn).await;
        deleted
    }

    async fn check_size(&self, conn: &mut PgConnection) {
        let table = self.db.layout().table();
        let size: Result<(i64,), _> = sqlx::query_as("SELECT pg_total_relation_size($1::regclass)")
            .bind(table)
            .fetch_one(&mut *conn)
            .await;

        match size {
            Ok((bytes,)) => {
                let cap = self.policy.max_size_mb.saturating_mul(1024 * 1024);
                if u64::try_from(bytes).unwrap_or(0) > cap {
                    tracing::warn!(
                        table,
                        size_mb = bytes / (1024 * 1024),
                        max_size_mb = self.policy.max_size_mb,
                        "History table exceeds retention size cap"
                    );
                }
            }
            Err(e) => tracing::warn!(table, error = %e, "Could not measure history table size"),
        }
    }
}
