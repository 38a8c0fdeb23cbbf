//! Runs against a real Redis only when REDIS_TEST_URL is set.

use uuid::Uuid;

use appointment_cell::{generate_token, CheckInTokenStore};
use queue_runtime_cell::RedisTokenStore;

async fn store() -> Option<RedisTokenStore> {
    let url = std::env::var("REDIS_TEST_URL").ok()?;
    let prefix = format!("test_{}", Uuid::new_v4().simple());
    Some(RedisTokenStore::connect_with_prefix(&url, &prefix).await.unwrap())
}

#[tokio::test]
async fn redis_token_is_single_use() {
    let Some(store) = store().await else {
        eprintln!("REDIS_TEST_URL not set, skipping");
        return;
    };
    let appointment_id = Uuid::new_v4();
    let token = generate_token();

    store.put(&token, appointment_id, 60).await.unwrap();
    assert_eq!(store.take(&token).await.unwrap(), Some(appointment_id));
    assert_eq!(store.take(&token).await.unwrap(), None);
}

#[tokio::test]
async fn redis_reissue_supersedes_previous_token() {
    let Some(store) = store().await else {
        eprintln!("REDIS_TEST_URL not set, skipping");
        return;
    };
    let appointment_id = Uuid::new_v4();
    let old = generate_token();
    let fresh = generate_token();

    store.put(&old, appointment_id, 60).await.unwrap();
    store.put(&fresh, appointment_id, 60).await.unwrap();

    assert_eq!(store.take(&old).await.unwrap(), None);
    assert_eq!(store.take(&fresh).await.unwrap(), Some(appointment_id));
}

#[tokio::test]
async fn redis_token_expires_with_ttl() {
    let Some(store) = store().await else {
        eprintln!("REDIS_TEST_URL not set, skipping");
        return;
    };
    let token = generate_token();

    store.put(&token, Uuid::new_v4(), 1).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(1500)).await;
    assert_eq!(store.take(&token).await.unwrap(), None);
}

#[tokio::test]
async fn redis_concurrent_reissues_leave_one_live_token() {
    let Some(store) = store().await else {
        eprintln!("REDIS_TEST_URL not set, skipping");
        return;
    };
    let store = std::sync::Arc::new(store);
    let appointment_id = Uuid::new_v4();
    let tokens: Vec<String> = (0..8).map(|_| generate_token()).collect();

    let issues = tokens.iter().cloned().map(|token| {
        let store = store.clone();
        tokio::spawn(async move { store.put(&token, appointment_id, 60).await })
    });
    for issue in futures::future::join_all(issues).await {
        issue.unwrap().unwrap();
    }

    let mut live = 0;
    for token in &tokens {
        if store.take(token).await.unwrap() == Some(appointment_id) {
            live += 1;
        }
    }
    assert_eq!(live, 1);
}
