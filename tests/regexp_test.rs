//! Integration tests for the SQLite REGEXP operator.
//!
//! SQLite has no built-in REGEXP; pools register one on every connection.

use db_resilience::config::DatabaseOptions;
use db_resilience::db::{EngineCache, EngineRole, Session};
use db_resilience::models::QueryParam;
use serde_json::Value as JsonValue;

async fn setup_session() -> (EngineCache, Session) {
    let cache = EngineCache::new(DatabaseOptions::new("sqlite://")).unwrap();
    let mut session = cache.session(EngineRole::Primary).await.unwrap();

    session
        .execute("CREATE TABLE test_table (id INTEGER PRIMARY KEY, bar TEXT)", &[])
        .await
        .unwrap();
    for bar in ["10", "20", "\u{2665}"] {
        session
            .execute(
                "INSERT INTO test_table (bar) VALUES (?)",
                &[QueryParam::from(bar)],
            )
            .await
            .unwrap();
    }

    (cache, session)
}

async fn matching(session: &mut Session, pattern: &str) -> Vec<String> {
    session
        .fetch_all(
            "SELECT bar FROM test_table WHERE bar REGEXP ? ORDER BY id",
            &[QueryParam::from(pattern)],
        )
        .await
        .unwrap()
        .into_iter()
        .filter_map(|row| match row.get("bar") {
            Some(JsonValue::String(s)) => Some(s.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_regexp_filter() {
    let (_cache, mut session) = setup_session().await;
    assert_eq!(matching(&mut session, "10").await, vec!["10"]);
}

#[tokio::test]
async fn test_regexp_filter_no_match() {
    let (_cache, mut session) = setup_session().await;
    assert!(matching(&mut session, "11").await.is_empty());
}

#[tokio::test]
async fn test_regexp_filter_multibyte() {
    let (_cache, mut session) = setup_session().await;
    assert_eq!(matching(&mut session, "\u{2665}").await, vec!["\u{2665}"]);
    assert!(matching(&mut session, "\u{2666}").await.is_empty());
}

#[tokio::test]
async fn test_regexp_filter_pattern() {
    let (_cache, mut session) = setup_session().await;
    assert_eq!(matching(&mut session, "^[0-9]+$").await, vec!["10", "20"]);
}
