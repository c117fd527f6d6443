use std::sync::Arc;

use nfe_core::clock::FixedClock;
use nfe_core::traits::HistoryStore;
use nfe_db::RetentionPolicy;

use crate::integration::common::{count_rows, repo_at, row, setup_test_db, snapshot, ts, utc};

fn policy(days: u32) -> RetentionPolicy {
    RetentionPolicy {
        max_age_days: days,
        ..RetentionPolicy::default()
    }
}

#[tokio::test]
async fn old_closed_records_are_pruned() {
    let (db, _container) = setup_test_db().await;
    let repo = repo_at(&db, utc(3, 0));

    repo.persist(&snapshot(ts(1, 10), vec![row("SVAN", "verde")]))
        .await
        .unwrap();
    repo.persist(&snapshot(ts(2, 10), vec![row("SVAN", "amarelo")]))
        .await
        .unwrap();
    assert_eq!(count_rows(&db).await, 2);

    let pruner = db.pruner(
        Arc::new(FixedClock(utc(2, 10) + chrono::Duration::days(31))),
        policy(30),
    );
    assert_eq!(pruner.apply(None).await, 1);

    let history = repo.history("SVAN", 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert!(history[0].is_current);
    assert_eq!(history[0].status.status(), Some("amarelo"));
}

#[tokio::test]
async fn recent_closed_records_are_kept() {
    let (db, _container) = setup_test_db().await;
    let repo = repo_at(&db, utc(3, 0));

    repo.persist(&snapshot(ts(1, 10), vec![row("SVAN", "verde")]))
        .await
        .unwrap();
    repo.persist(&snapshot(ts(2, 10), vec![row("SVAN", "amarelo")]))
        .await
        .unwrap();

    let pruner = db.pruner(Arc::new(FixedClock(utc(10, 0))), policy(30));
    assert_eq!(pruner.apply(None).await, 0);
    assert_eq!(count_rows(&db).await, 2);
}

#[tokio::test]
async fn current_records_are_never_pruned() {
    let (db, _container) = setup_test_db().await;
    let repo = repo_at(&db, utc(2, 0));

    repo.persist(&snapshot(ts(1, 10), vec![row("SVAN", "verde"), row("SVRS", "verde")]))
        .await
        .unwrap();

    let far_future = utc(1, 0) + chrono::Duration::days(3650);
    let pruner = db.pruner(Arc::new(FixedClock(far_future)), policy(0));
    assert_eq!(pruner.apply(None).await, 0);
    assert_eq!(repo.current().await.unwrap().len(), 2);
}

#[tokio::test]
async fn persist_prunes_on_its_own_connection() {
    let (db, _container) = setup_test_db().await;

    // retention clock far enough ahead that the version closed below is expired
    let repo = repo_at(&db, utc(1, 0) + chrono::Duration::days(90));
    repo.persist(&snapshot(ts(1, 10), vec![row("SVAN", "verde")]))
        .await
        .unwrap();
    repo.persist(&snapshot(ts(2, 10), vec![row("SVAN", "vermelho")]))
        .await
        .unwrap();

    assert_eq!(count_rows(&db).await, 1);
    assert!(repo.current().await.unwrap()[0].is_current);
}

#[tokio::test]
async fn failed_prune_reports_zero() {
    let (db, _container) = setup_test_db().await;
    sqlx::query("DROP TABLE disponibilidade")
        .execute(db.pool())
        .await
        .unwrap();

    let pruner = db.pruner(Arc::new(FixedClock(utc(10, 0))), policy(0));
    assert_eq!(pruner.apply(None).await, 0);
}
