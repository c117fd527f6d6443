use nfe_core::error::AppError;
use nfe_core::models::{PersistSummary, SnapshotResult, StatusRow};
use nfe_core::traits::HistoryStore;

use crate::integration::common::{
    count_rows, repo_at, row, setup_empty_db, setup_test_db, snapshot, table_exists, ts, utc,
};

#[tokio::test]
async fn first_snapshot_inserts_current_records() {
    let (db, _container) = setup_test_db().await;
    let repo = repo_at(&db, utc(2, 0));

    let summary = repo
        .persist(&snapshot(ts(1, 10), vec![row("SVAN", "verde"), row("SVRS", "amarelo")]))
        .await
        .unwrap();
    assert_eq!(
        summary,
        PersistSummary {
            inserted: 2,
            ..PersistSummary::default()
        }
    );

    let current = repo.current().await.unwrap();
    assert_eq!(current.len(), 2);
    assert_eq!(current[0].autorizador, "SVAN");
    assert_eq!(current[0].status, row("SVAN", "verde"));
    assert_eq!(current[0].valid_from, utc(1, 10));
    assert!(current[0].valid_to.is_none());
    assert!(current[0].is_current);
}

#[tokio::test]
async fn identical_snapshot_is_idempotent() {
    let (db, _container) = setup_test_db().await;
    let repo = repo_at(&db, utc(2, 0));
    let snap = snapshot(ts(1, 10), vec![row("SVAN", "verde")]);

    repo.persist(&snap).await.unwrap();
    let again = repo.persist(&snap).await.unwrap();

    assert_eq!(again.inserted, 0);
    assert_eq!(again.unchanged, 1);
    assert_eq!(count_rows(&db).await, 1);
}

#[tokio::test]
async fn key_order_does_not_count_as_change() {
    let (db, _container) = setup_test_db().await;
    let repo = repo_at(&db, utc(2, 0));

    repo.persist(&snapshot(ts(1, 10), vec![row("SVAN", "verde")]))
        .await
        .unwrap();

    let mut reordered = StatusRow::new();
    reordered.insert("status", "verde");
    reordered.insert("autorizador", "SVAN");
    let summary = repo
        .persist(&snapshot(ts(1, 11), vec![reordered]))
        .await
        .unwrap();

    assert_eq!(summary.unchanged, 1);
    assert_eq!(count_rows(&db).await, 1);
}

#[tokio::test]
async fn changed_status_closes_previous_version() {
    let (db, _container) = setup_test_db().await;
    let repo = repo_at(&db, utc(3, 0));

    repo.persist(&snapshot(ts(1, 10), vec![row("SVAN", "verde")]))
        .await
        .unwrap();
    let summary = repo
        .persist(&snapshot(ts(2, 10), vec![row("SVAN", "amarelo")]))
        .await
        .unwrap();
    assert_eq!(summary.inserted, 1);
    assert_eq!(summary.closed, 1);

    let history = repo.history("SVAN", 10).await.unwrap();
    assert_eq!(history.len(), 2);

    let (newest, oldest) = (&history[0], &history[1]);
    assert!(newest.is_current);
    assert_eq!(newest.status.status(), Some("amarelo"));
    assert_eq!(newest.valid_from, utc(2, 10));
    assert!(newest.valid_to.is_none());

    assert!(!oldest.is_current);
    assert_eq!(oldest.status.status(), Some("verde"));
    assert_eq!(oldest.valid_to, Some(utc(2, 10)));

    let current = repo.current().await.unwrap();
    assert_eq!(current.len(), 1);
    assert_eq!(current[0].id, newest.id);
}

#[tokio::test]
async fn history_respects_limit() {
    let (db, _container) = setup_test_db().await;
    let repo = repo_at(&db, utc(5, 0));

    for (day, status) in [(1, "verde"), (2, "amarelo"), (3, "vermelho")] {
        repo.persist(&snapshot(ts(day, 10), vec![row("SVAN", status)]))
            .await
            .unwrap();
    }

    let history = repo.history("SVAN", 2).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].status.status(), Some("vermelho"));
    assert_eq!(history[1].status.status(), Some("amarelo"));

    assert!(repo.history("SVRS", 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn rows_without_autorizador_are_skipped() {
    let (db, _container) = setup_test_db().await;
    let repo = repo_at(&db, utc(2, 0));

    let mut anonymous = StatusRow::new();
    anonymous.insert("status", "verde");
    let summary = repo
        .persist(&snapshot(ts(1, 10), vec![anonymous, row("SVAN", "verde")]))
        .await
        .unwrap();

    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.inserted, 1);
    assert_eq!(count_rows(&db).await, 1);
}

#[tokio::test]
async fn refused_snapshots_leave_store_untouched() {
    let (db, _container) = setup_test_db().await;
    let repo = repo_at(&db, utc(2, 0));

    let failed = SnapshotResult::failed("Invalid table structure");
    let err = repo.persist(&failed).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidSnapshot(_)));

    let undated = SnapshotResult::succeeded(None, vec![row("SVAN", "verde")]);
    let err = repo.persist(&undated).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidSnapshot(_)));

    assert_eq!(count_rows(&db).await, 0);
}

#[tokio::test]
async fn init_is_idempotent_and_health_check_passes() {
    let (db, _container) = setup_test_db().await;
    let repo = repo_at(&db, utc(2, 0));

    repo.init().await.unwrap();
    repo.init().await.unwrap();
    repo.health_check().await.unwrap();
}

#[tokio::test]
async fn only_latest_of_duplicate_current_rows_is_closed() {
    let (db, _container) = setup_test_db().await;
    let repo = repo_at(&db, utc(4, 0));
    let status_json = serde_json::to_string(&row("SVAN", "verde")).unwrap();

    let mut ids = Vec::new();
    for day in [1, 2] {
        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO disponibilidade (autorizador, status_json, valid_from, valid_to, is_current) \
             VALUES ($1, $2, $3, NULL, 1) RETURNING id",
        )
        .bind("SVAN")
        .bind(&status_json)
        .bind(utc(day, 10))
        .fetch_one(db.pool())
        .await
        .unwrap();
        ids.push(id);
    }
    let (older, newer) = (ids[0], ids[1]);

    let summary = repo
        .persist(&snapshot(ts(3, 10), vec![row("SVAN", "vermelho")]))
        .await
        .unwrap();
    assert_eq!(summary.closed, 1);
    assert_eq!(summary.inserted, 1);

    let history = repo.history("SVAN", 10).await.unwrap();
    assert_eq!(history.len(), 3);

    let closed = history.iter().find(|r| r.id == newer).unwrap();
    assert!(!closed.is_current);
    assert_eq!(closed.valid_to, Some(utc(3, 10)));

    let untouched = history.iter().find(|r| r.id == older).unwrap();
    assert!(untouched.is_current);
    assert!(untouched.valid_to.is_none());
}

#[tokio::test]
async fn read_queries_do_not_create_schema() {
    let (db, _container) = setup_empty_db().await;
    let repo = repo_at(&db, utc(2, 0));

    assert!(matches!(
        repo.history("SVAN", 10).await.unwrap_err(),
        AppError::DatabaseError(_)
    ));
    assert!(matches!(
        repo.current().await.unwrap_err(),
        AppError::DatabaseError(_)
    ));
    assert!(!table_exists(&db).await);
}
