use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use nfe_core::clock::FixedClock;
use nfe_core::models::{SnapshotResult, StatusRow};
use nfe_db::{Database, HistoryRepository, RetentionPolicy, TableLayout};
use sqlx::postgres::PgPoolOptions;
use testcontainers::core::{ContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};

/// Spins up a PostgreSQL container and returns a database with the history
/// schema created.
///
/// The `ContainerAsync` must be kept in scope for the test duration;
/// dropping it stops the container.
pub async fn setup_test_db() -> (Database, ContainerAsync<GenericImage>) {
    let (db, container) = setup_empty_db().await;
    db.init_schema().await.expect("Failed to create schema");
    (db, container)
}

/// Like [`setup_test_db`] but without creating any table.
pub async fn setup_empty_db() -> (Database, ContainerAsync<GenericImage>) {
    let container = GenericImage::new("postgres", "16")
        .with_exposed_port(ContainerPort::Tcp(5432))
        .with_wait_for(WaitFor::message_on_stderr(
            "database system is ready to accept connections",
        ))
        .with_env_var("POSTGRES_PASSWORD", "postgres")
        .with_env_var("POSTGRES_DB", "nfe_test")
        .start()
        .await
        .expect("Failed to start PostgreSQL container");

    let host = container.get_host().await.expect("Failed to get host");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("Failed to get port");

    let connection_string = format!("postgresql://postgres:postgres@{host}:{port}/nfe_test");

    // Retry connection until container is fully ready
    const MAX_RETRIES: u32 = 30;
    let mut retries = 0;
    let pool = loop {
        match PgPoolOptions::new()
            .max_connections(5)
            .connect(&connection_string)
            .await
        {
            Ok(pool) => break pool,
            Err(e) => {
                retries += 1;
                if retries >= MAX_RETRIES {
                    panic!("Failed to connect to database after {MAX_RETRIES} retries: {e}");
                }
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        }
    };

    (Database::from_pool(pool, TableLayout::default()), container)
}

pub fn ts(day: u32, hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, day)
        .unwrap()
        .and_hms_opt(hour, 0, 0)
        .unwrap()
}

pub fn utc(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.from_utc_datetime(&ts(day, hour))
}

pub fn row(autorizador: &str, status: &str) -> StatusRow {
    let mut row = StatusRow::new();
    row.insert("autorizador", autorizador);
    row.insert("status", status);
    row
}

pub fn snapshot(at: NaiveDateTime, rows: Vec<StatusRow>) -> SnapshotResult {
    SnapshotResult::succeeded(Some(at), rows)
}

/// Repository whose retention clock is frozen at `now`.
pub fn repo_at(db: &Database, now: DateTime<Utc>) -> HistoryRepository {
    db.history_repo(Arc::new(FixedClock(now)), RetentionPolicy::default())
}

pub async fn count_rows(db: &Database) -> i64 {
    let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM disponibilidade")
        .fetch_one(db.pool())
        .await
        .unwrap();
    n
}

pub async fn table_exists(db: &Database) -> bool {
    let (exists,): (bool,) =
        sqlx::query_as("SELECT to_regclass('disponibilidade') IS NOT NULL")
            .fetch_one(db.pool())
            .await
            .unwrap();
    exists
}
