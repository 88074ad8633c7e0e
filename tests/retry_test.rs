//! Integration tests for retrying whole units of work.

use db_resilience::config::DatabaseOptions;
use db_resilience::db::{EngineCache, EngineRole, NativeError, NativeErrorClass, with_retries};
use db_resilience::error::{DbError, ErrorKind};
use db_resilience::models::QueryParam;
use std::sync::atomic::{AtomicU32, Ordering};

fn fast_options(max_retries: i64) -> DatabaseOptions {
    DatabaseOptions {
        max_retries,
        retry_interval: 0,
        ..DatabaseOptions::new("sqlite://")
    }
}

#[tokio::test]
async fn test_unit_of_work_retried_after_deadlock() {
    let options = fast_options(3);
    let cache = EngineCache::new(options.clone()).unwrap();
    cache
        .session(EngineRole::Primary)
        .await
        .unwrap()
        .execute("CREATE TABLE counters (id INTEGER PRIMARY KEY, n INTEGER)", &[])
        .await
        .unwrap();

    let attempts = AtomicU32::new(0);
    with_retries(&options, || async {
        let mut session = cache.session(EngineRole::Primary).await?;
        session
            .transaction(|s| {
                Box::pin(async move {
                    s.execute("INSERT INTO counters (n) VALUES (?)", &[QueryParam::Int(1)])
                        .await?;
                    Ok::<_, DbError>(())
                })
            })
            .await?;

        // The first attempt's transaction already committed; later ones add rows too
        if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(DbError::Deadlock {
                native: NativeError::new(NativeErrorClass::Operational, "database is locked")
                    .with_code(5),
            });
        }
        Ok(())
    })
    .await
    .unwrap();

    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    let rows = cache
        .session(EngineRole::Primary)
        .await
        .unwrap()
        .fetch_all("SELECT id FROM counters", &[])
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    cache.cleanup().await;
}

#[tokio::test]
async fn test_integrity_errors_not_retried() {
    let options = fast_options(-1);
    let cache = EngineCache::new(options.clone()).unwrap();
    let mut setup = cache.session(EngineRole::Primary).await.unwrap();
    setup
        .execute("CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT UNIQUE)", &[])
        .await
        .unwrap();
    setup
        .execute("INSERT INTO items (name) VALUES (?)", &[QueryParam::from("a")])
        .await
        .unwrap();
    drop(setup);

    let attempts = AtomicU32::new(0);
    let err = with_retries(&options, || async {
        attempts.fetch_add(1, Ordering::SeqCst);
        let mut session = cache.session(EngineRole::Primary).await?;
        session
            .execute("INSERT INTO items (name) VALUES (?)", &[QueryParam::from("a")])
            .await
    })
    .await
    .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::DuplicateEntry);
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    cache.cleanup().await;
}
