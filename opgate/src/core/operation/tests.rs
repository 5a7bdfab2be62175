use super::{
    OperationRecord, OperationStatus, OperationStore, Progress, StoreError,
    estimated_completion_seconds, index_key,
};
use crate::core::cache::{CacheError, MemoryCache, TimeoutCache};
use crate::core::test_support::{FaultyCache, SlowCache};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use uuid::Uuid;

const TTL: Duration = Duration::from_secs(3600);

fn files(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("report_{i}.pdf")).collect()
}

#[tokio::test]
async fn test_create_operation_writes_new_record() {
    let store = OperationStore::new(MemoryCache::new(), TTL);

    let created = store.create_operation("key-A", files(4)).await.unwrap();
    assert_eq!(created.pairs_count, 2);

    let record = store.get_operation(&created.operation_id).await.unwrap();
    assert_eq!(record.operation_id, created.operation_id);
    assert_eq!(record.status, OperationStatus::New);
    assert_eq!(
        record.progress,
        Some(Progress {
            processed: 0,
            total: 2
        })
    );
    assert_eq!(record.files, files(4));
    assert!(record.results.is_empty());
    assert!(record.error.is_none());
}

#[tokio::test]
async fn test_same_key_is_rejected_as_duplicate() {
    let store = OperationStore::new(MemoryCache::new(), TTL);

    let first = store.create_operation("key-A", files(2)).await.unwrap();
    match store.create_operation("key-A", files(2)).await {
        Err(StoreError::Duplicate {
            existing_operation_id,
        }) => assert_eq!(existing_operation_id, first.operation_id),
        other => panic!("expected duplicate, got {other:?}"),
    }

    // Other keys are unaffected
    let second = store.create_operation("key-B", files(2)).await.unwrap();
    assert_ne!(second.operation_id, first.operation_id);
}

#[tokio::test]
async fn test_expired_key_can_be_reused() {
    let cache = Arc::new(MemoryCache::new());
    let store = OperationStore::new(cache.clone(), TTL);

    let first = store.create_operation("key-A", files(2)).await.unwrap();

    // Simulate the index entry expiring
    cache.set_at(
        &index_key("key-A"),
        first.operation_id.to_string().as_bytes(),
        Duration::from_millis(1),
        SystemTime::now() - Duration::from_secs(1),
    );

    let second = store.create_operation("key-A", files(2)).await.unwrap();
    assert_ne!(second.operation_id, first.operation_id);
}

#[tokio::test]
async fn test_index_write_failure_still_creates_operation() {
    let cache = Arc::new(FaultyCache::new());
    cache.fail_writes_with_prefix("opkey:");
    let store = OperationStore::new(cache.clone(), TTL);

    let first = store.create_operation("key-A", files(2)).await.unwrap();
    assert!(store.get_operation(&first.operation_id).await.is_ok());
    assert!(cache.raw(&index_key("key-A")).is_none());

    // Without the index entry the retry is not recognised
    let second = store.create_operation("key-A", files(2)).await.unwrap();
    assert_ne!(second.operation_id, first.operation_id);
}

#[tokio::test]
async fn test_record_write_failure_is_unavailable() {
    let cache = Arc::new(FaultyCache::new());
    cache.fail_writes(true);
    let store = OperationStore::new(cache, TTL);

    let err = store.create_operation("key-A", files(2)).await.unwrap_err();
    assert!(matches!(err, StoreError::Unavailable(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_index_read_failure_is_unavailable() {
    let cache = Arc::new(FaultyCache::new());
    cache.fail_reads(true);
    let store = OperationStore::new(cache.clone(), TTL);

    let err = store.create_operation("key-A", files(2)).await.unwrap_err();
    assert!(err.is_retryable());
    // Nothing is written when the duplicate check cannot run
    assert_eq!(cache.set_calls(), 0);

    let err = store.get_operation(&Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, StoreError::Unavailable(_)));
}

#[tokio::test]
async fn test_cache_timeout_is_unavailable() {
    let deadline = Duration::from_millis(20);
    let store = OperationStore::new(
        TimeoutCache::new(
            SlowCache {
                delay: Duration::from_millis(500),
            },
            deadline,
        ),
        TTL,
    );

    let err = store.create_operation("key-A", files(2)).await.unwrap_err();
    assert!(matches!(err, StoreError::Unavailable(CacheError::Timeout(d)) if d == deadline));
    assert!(err.is_retryable());

    let err = store.get_operation(&Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, StoreError::Unavailable(CacheError::Timeout(_))));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_corrupted_index_entry_is_ignored() {
    let cache = Arc::new(FaultyCache::new());
    cache.put_raw(&index_key("key-A"), "not-a-uuid");
    let store = OperationStore::new(cache, TTL);

    assert!(store.create_operation("key-A", files(2)).await.is_ok());
}

#[tokio::test]
async fn test_unknown_operation_is_not_found() {
    let store = OperationStore::new(MemoryCache::new(), TTL);

    assert!(matches!(
        store.get_operation(&Uuid::new_v4()).await,
        Err(StoreError::NotFound)
    ));
}

#[tokio::test]
async fn test_corrupted_record_is_not_found() {
    let cache = Arc::new(FaultyCache::new());
    let store = OperationStore::new(cache.clone(), TTL);
    let id = Uuid::new_v4();

    cache.put_raw(&id.to_string(), "{\"status\": \"NEW\"");
    assert!(matches!(
        store.get_operation(&id).await,
        Err(StoreError::NotFound)
    ));

    // Unknown status values never reach the caller
    let mut value = serde_json::to_value(OperationRecord::new(id, files(2), 1)).unwrap();
    value["status"] = json!("DOWNLOADED");
    cache.put_raw(&id.to_string(), &value.to_string());
    assert!(matches!(
        store.get_operation(&id).await,
        Err(StoreError::NotFound)
    ));

    // A record parked under another id is not served
    let foreign = OperationRecord::new(Uuid::new_v4(), files(2), 1);
    cache.put_raw(&id.to_string(), &serde_json::to_string(&foreign).unwrap());
    assert!(matches!(
        store.get_operation(&id).await,
        Err(StoreError::NotFound)
    ));
}

#[tokio::test]
async fn test_lifecycle_to_done() {
    let store = OperationStore::new(MemoryCache::new(), TTL);
    let id = store
        .create_operation("key-A", files(6))
        .await
        .unwrap()
        .operation_id;

    let record = store.mark_progress(&id, 1).await.unwrap();
    assert_eq!(record.status, OperationStatus::Progress);
    store.mark_progress(&id, 2).await.unwrap();

    let results = vec![json!({"child_id": "c-1"}), json!({"child_id": "c-2"})];
    store.mark_done(&id, results.clone()).await.unwrap();

    let record = store.get_operation(&id).await.unwrap();
    assert_eq!(record.status, OperationStatus::Done);
    assert_eq!(record.results, results);
    assert_eq!(
        record.progress,
        Some(Progress {
            processed: 3,
            total: 3
        })
    );
}

#[tokio::test]
async fn test_lifecycle_to_error() {
    let store = OperationStore::new(MemoryCache::new(), TTL);
    let id = store
        .create_operation("key-A", files(2))
        .await
        .unwrap()
        .operation_id;

    store
        .mark_failed(
            &id,
            "failed to parse report_1.pdf",
            Some("PARSE_ERROR".into()),
            vec!["report_1.pdf".into()],
        )
        .await
        .unwrap();

    let record = store.get_operation(&id).await.unwrap();
    assert_eq!(record.status, OperationStatus::Error);
    assert_eq!(record.error.as_deref(), Some("failed to parse report_1.pdf"));
    assert_eq!(record.error_code.as_deref(), Some("PARSE_ERROR"));
    assert_eq!(record.failed_files, vec!["report_1.pdf".to_string()]);
}

#[tokio::test]
async fn test_terminal_states_are_final() {
    let store = OperationStore::new(MemoryCache::new(), TTL);
    let id = store
        .create_operation("key-A", files(2))
        .await
        .unwrap()
        .operation_id;

    store.mark_progress(&id, 1).await.unwrap();
    store.mark_done(&id, vec![]).await.unwrap();

    assert!(matches!(
        store.mark_progress(&id, 1).await,
        Err(StoreError::InvalidTransition {
            from: OperationStatus::Done,
            to: OperationStatus::Progress
        })
    ));
    assert!(matches!(
        store.mark_failed(&id, "late failure", None, vec![]).await,
        Err(StoreError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn test_new_cannot_skip_to_done() {
    let store = OperationStore::new(MemoryCache::new(), TTL);
    let id = store
        .create_operation("key-A", files(2))
        .await
        .unwrap()
        .operation_id;

    assert!(matches!(
        store.mark_done(&id, vec![]).await,
        Err(StoreError::InvalidTransition {
            from: OperationStatus::New,
            to: OperationStatus::Done
        })
    ));
}

#[tokio::test]
async fn test_progress_is_validated() {
    let store = OperationStore::new(MemoryCache::new(), TTL);
    let id = store
        .create_operation("key-A", files(4))
        .await
        .unwrap()
        .operation_id;

    assert!(matches!(
        store.mark_progress(&id, 3).await,
        Err(StoreError::InvalidRecord(_))
    ));

    store.mark_progress(&id, 2).await.unwrap();
    assert!(matches!(
        store.mark_progress(&id, 1).await,
        Err(StoreError::InvalidRecord(_))
    ));
}

#[tokio::test]
async fn test_immutable_fields_are_enforced() {
    let store = OperationStore::new(MemoryCache::new(), TTL);
    let id = store
        .create_operation("key-A", files(2))
        .await
        .unwrap()
        .operation_id;

    let mut record = store.get_operation(&id).await.unwrap();
    record.status = OperationStatus::Progress;
    record.files.push("smuggled.pdf".into());

    assert!(matches!(
        store.update_operation(record).await,
        Err(StoreError::InvalidRecord(_))
    ));
}

#[tokio::test]
async fn test_update_of_missing_operation_is_not_found() {
    let store = OperationStore::new(MemoryCache::new(), TTL);
    let record = OperationRecord::new(Uuid::new_v4(), files(2), 1);

    assert!(matches!(
        store.update_operation(record).await,
        Err(StoreError::NotFound)
    ));
}

#[test]
fn test_record_json_shape() {
    let id = Uuid::new_v4();
    let record = OperationRecord::new(id, files(2), 1);
    let value = serde_json::to_value(&record).unwrap();

    assert_eq!(value["operation_id"], json!(id.to_string()));
    assert_eq!(value["status"], json!("NEW"));
    assert_eq!(value["progress"], json!({"processed": 0, "total": 1}));
    assert!(value.get("results").is_none());
    assert!(value.get("error").is_none());
    assert!(value["created_at"].is_string());
}

#[test]
fn test_status_transitions() {
    use OperationStatus::*;

    for (from, to, allowed) in [
        (New, Progress, true),
        (New, Error, true),
        (New, Done, false),
        (New, New, false),
        (Progress, Progress, true),
        (Progress, Done, true),
        (Progress, Error, true),
        (Progress, New, false),
        (Done, Progress, false),
        (Done, Error, false),
        (Error, Progress, false),
        (Error, Done, false),
    ] {
        assert_eq!(from.can_transition_to(to), allowed, "{from} -> {to}");
    }

    assert!(Done.is_terminal());
    assert!(Error.is_terminal());
    assert!(!New.is_terminal());
}

#[test]
fn test_estimated_completion() {
    assert_eq!(estimated_completion_seconds(None, 10), 60);
    assert_eq!(
        estimated_completion_seconds(
            Some(&Progress {
                processed: 0,
                total: 0
            }),
            10
        ),
        60
    );
    assert_eq!(estimated_completion_seconds(Some(&Progress::new(5)), 10), 50);
    assert_eq!(
        estimated_completion_seconds(
            Some(&Progress {
                processed: 2,
                total: 5
            }),
            7
        ),
        21
    );
    // Large configured rates saturate instead of overflowing
    assert_eq!(
        estimated_completion_seconds(Some(&Progress::new(5)), u64::MAX),
        u64::MAX
    );
}
