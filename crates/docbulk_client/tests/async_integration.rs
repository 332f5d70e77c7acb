//! Async integration tests against the reference store.

use docbulk_client::{
    AsyncRepository, BlockingTransport, BulkConfig, ClientError, ConcurrencyToken, ItemReport,
    ItemStatus, JsonCodec, RepositoryConfig, SearchOptions,
};
use docbulk_testkit::{
    init_tracing, numbered_notes, CountingTransport, FailingBulkTransport, Note, StoreTransport,
    TestStore,
};
use parking_lot::Mutex;
use std::sync::Arc;

type FlakyTransport = BlockingTransport<CountingTransport<FailingBulkTransport<StoreTransport>>>;

fn store() -> TestStore {
    init_tracing();
    TestStore::new()
}

/// An async repository whose first `failures` bulk requests fail.
fn flaky_repository(
    store: &TestStore,
    index: &str,
    failures: u32,
) -> (Arc<FlakyTransport>, AsyncRepository<Note, FlakyTransport>) {
    let transport = Arc::new(BlockingTransport::new(CountingTransport::new(
        FailingBulkTransport::new(store.transport(), failures),
    )));
    let repo = AsyncRepository::new(
        Arc::clone(&transport),
        Arc::new(JsonCodec::new()),
        RepositoryConfig::new(index).with_refresh_allowed(true),
    );
    (transport, repo)
}

#[tokio::test]
async fn producers_on_many_tasks_share_one_session() {
    let store = store();
    let repo = store.async_repository::<Note>("notes");

    let stats = repo
        .bulk(BulkConfig::new(8), |producer| async move {
            let mut tasks = Vec::new();
            for worker in 0..3 {
                let producer = producer.clone();
                tasks.push(tokio::spawn(async move {
                    for i in 0..20 {
                        let id = format!("w{worker}-{i:02}");
                        producer.index(Some(&id), &Note::new(id.clone()), false).await?;
                    }
                    Ok::<_, ClientError>(())
                }));
            }
            for task in tasks {
                task.await.map_err(|e| ClientError::transport_fatal(e.to_string()))??;
            }
            Ok(())
        })
        .await
        .unwrap();

    assert_eq!(stats.items, 60);
    assert_eq!(stats.succeeded, 60);
    assert_eq!(store.doc_count("notes"), 60);
    assert_eq!(repo.get("w2-19").await.unwrap(), Some(Note::new("w2-19")));
}

#[tokio::test]
async fn async_bulk_retries_a_stale_update() {
    let store = store();
    let repo = store.async_repository::<Note>("notes");
    repo.index(Some("x"), &Note::new("a")).await.unwrap();
    repo.index(Some("x"), &Note::new("b")).await.unwrap();

    let reports: Arc<Mutex<Vec<ItemReport>>> = Arc::default();
    let sink = Arc::clone(&reports);
    let config = BulkConfig::new(4)
        .with_retry_conflicting_updates(2)
        .with_item_callback(move |report| sink.lock().push(report.clone()));

    let stats = repo
        .bulk(config, |producer| async move {
            producer
                .update("x", ConcurrencyToken::new(1, 0), Note::new("a"), Note::incremented)
                .await
        })
        .await
        .unwrap();

    assert_eq!(stats.retried, 1);
    assert_eq!(repo.get("x").await.unwrap().unwrap(), Note::new("b").incremented());
    assert!(matches!(
        reports.lock()[0].status,
        ItemStatus::Retried { attempts: 1, .. }
    ));
}

#[tokio::test]
async fn get_and_update_reads_the_current_version() {
    let store = store();
    let repo = store.async_repository::<Note>("notes");
    repo.index(Some("x"), &Note::new("a")).await.unwrap();

    let session = repo.bulk_session(BulkConfig::new(10));
    session.get_and_update("x", Note::incremented).await.unwrap();
    let err = session
        .get_and_update("ghost", Note::incremented)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::NotFound { .. }));

    let stats = session.close().await.unwrap();
    assert_eq!(stats.succeeded, 1);
    assert_eq!(stats.retried, 0);
    assert_eq!(repo.get("x").await.unwrap().unwrap().count, 1);
}

#[tokio::test]
async fn closed_session_rejects_outstanding_producers() {
    let store = store();
    let repo = store.async_repository::<Note>("notes");

    let session = repo.bulk_session(BulkConfig::new(10));
    let producer = session.producer();
    producer.index(Some("1"), &Note::new("a"), false).await.unwrap();
    let stats = session.close().await.unwrap();
    assert_eq!(stats.items, 1);

    assert!(producer.is_closed());
    let err = producer
        .index(Some("2"), &Note::new("b"), false)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::SessionClosed));
}

#[tokio::test]
async fn async_update_and_delete() {
    let store = store();
    let repo = store.async_repository::<Note>("notes");
    repo.create(Some("x"), &Note::new("a")).await.unwrap();

    let outcome = repo.update("x", Note::incremented).await.unwrap();
    assert_eq!(outcome.attempts, 1);
    let current = repo.get_with_token("x").await.unwrap().unwrap();
    assert_eq!(current.document.count, 1);
    assert_eq!(current.token, outcome.ack.token);

    repo.delete("x", Some(current.token)).await.unwrap();
    assert_eq!(repo.get("x").await.unwrap(), None);
}

#[tokio::test]
async fn async_scroll_drains_and_releases() {
    let store = store();
    store.seed("notes", numbered_notes(103));
    let repo = store.async_repository::<Note>("notes");

    let found = repo
        .search_documents(None, &SearchOptions::scrolling(5))
        .await
        .unwrap();
    assert_eq!(found.len(), 103);
    assert_eq!(found[0], Note::new("note 0"));
    assert_eq!(store.open_scrolls(), 0);
    assert_eq!(repo.count(None).await.unwrap(), 103);
}

#[tokio::test]
async fn abandoned_async_cursor_is_released_explicitly() {
    let store = store();
    store.seed("notes", numbered_notes(12));
    let repo = store.async_repository::<Note>("notes");

    let mut cursor = repo
        .search(None, &SearchOptions::scrolling(4))
        .await
        .unwrap();
    let first = cursor.next_hit().await.unwrap().unwrap();
    assert_eq!(first.id, "note-000");
    assert_eq!(store.open_scrolls(), 1);

    cursor.release().await.unwrap();
    assert_eq!(store.open_scrolls(), 0);
    assert!(cursor.is_exhausted());
}

#[tokio::test]
async fn items_queued_behind_a_failed_request_still_land() {
    let store = store();
    let (transport, repo) = flaky_repository(&store, "notes", 1);

    let session = repo.bulk_session(BulkConfig::new(2));
    for i in 0..6 {
        let id = format!("n{i}");
        session.index(Some(&id), &Note::new(id.clone()), false).await.unwrap();
    }
    let (stats, failure) = session.close_with_stats().await.unwrap();

    assert!(failure.unwrap().is_retryable());
    assert_eq!(transport.inner().batch_sizes(), vec![2, 2, 2]);
    assert_eq!(stats.batches, 2);
    assert_eq!(stats.items, 4);
    assert_eq!(stats.succeeded, 4);
    assert_eq!(store.doc_count("notes"), 4);
    assert_eq!(repo.get("n0").await.unwrap(), None);
    assert_eq!(repo.get("n5").await.unwrap(), Some(Note::new("n5")));
}

#[tokio::test]
async fn concurrent_producers_survive_failed_requests() {
    let store = store();
    let (transport, repo) = flaky_repository(&store, "notes", 2);

    let session = repo.bulk_session(BulkConfig::new(5));
    let tasks: Vec<_> = (0..3)
        .map(|worker| {
            let producer = session.producer();
            tokio::spawn(async move {
                for i in 0..20 {
                    let id = format!("w{worker}-{i:02}");
                    producer.index(Some(&id), &Note::new(id.clone()), false).await?;
                }
                Ok::<_, ClientError>(())
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }
    assert!(!session.is_closed());

    let (stats, failure) = session.close_with_stats().await.unwrap();
    assert!(failure.is_some());

    let sizes = transport.inner().batch_sizes();
    assert_eq!(sizes.iter().sum::<usize>(), 60);
    assert!(sizes.iter().all(|&n| n <= 5));
    assert_eq!(transport.inner().counts().bulk, sizes.len() as u64);

    assert_eq!(stats.batches as usize, sizes.len() - 2);
    assert_eq!(stats.items, 50);
    assert_eq!(stats.failed, 0);
    assert_eq!(store.doc_count("notes"), 50);
}
