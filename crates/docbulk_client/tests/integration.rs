//! Integration tests for the client against the reference store.

use docbulk_client::{
    BulkConfig, ClientError, ConcurrencyToken, FailureCategory, ItemReport, ItemStatus, JsonCodec,
    RefreshPolicy, Repository, RepositoryConfig, RetryConfig, SearchOptions,
};
use docbulk_testkit::{
    numbered_notes, with_store, ContendedTransport, CountingTransport, FailingBulkTransport, Note,
    StoreTransport, TestStore,
};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig::new(max_attempts).with_backoff(Duration::ZERO, Duration::from_millis(2))
}

fn repo_config(index: &str) -> RepositoryConfig {
    RepositoryConfig::new(index)
        .with_refresh_allowed(true)
        .with_refresh(RefreshPolicy::WaitFor)
        .with_retry(fast_retry(2))
}

fn counted(store: &TestStore, index: &str) -> Repository<Note, CountingTransport<StoreTransport>> {
    Repository::new(
        CountingTransport::new(store.transport()),
        JsonCodec::new(),
        repo_config(index),
    )
}

fn collect_reports(config: BulkConfig) -> (BulkConfig, Arc<Mutex<Vec<ItemReport>>>) {
    let reports = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&reports);
    let config = config.with_item_callback(move |report| sink.lock().push(report.clone()));
    (config, reports)
}

#[test]
fn batch_size_two_flushes_two_then_one() {
    with_store(|store| {
        let repo = counted(store, "notes");

        let stats = repo
            .bulk(BulkConfig::new(2), |session| {
                session.index(Some("1"), &Note::new("hi"), false)?;
                session.index(Some("2"), &Note::new("world"), false)?;
                session.index(Some("3"), &Note::new("."), false)?;
                Ok(())
            })
            .unwrap();

        assert_eq!(repo.transport().batch_sizes(), vec![2, 1]);
        assert_eq!(stats.batches, 2);
        assert_eq!(stats.succeeded, 3);

        let titles: Vec<String> = ["1", "2", "3"]
            .iter()
            .map(|id| repo.get(id).unwrap().unwrap().title)
            .collect();
        assert_eq!(titles, vec!["hi", "world", "."]);
    });
}

#[test]
fn stale_token_retries_once_against_fresh_read() {
    with_store(|store| {
        let repo = counted(store, "notes");
        for i in 0..7 {
            let note = Note {
                title: format!("v{i}"),
                count: i,
            };
            repo.index(Some("x"), &note).unwrap();
        }
        let current = repo.get_with_token("x").unwrap().unwrap();
        assert_eq!(current.token, ConcurrencyToken::new(1, 6));

        let before = repo.transport().counts();
        let (config, reports) = collect_reports(
            BulkConfig::new(10).with_retry_conflicting_updates(2),
        );
        let stale = Note {
            title: "v5".into(),
            count: 5,
        };
        let stats = repo
            .bulk(config, |session| {
                session.update("x", ConcurrencyToken::new(1, 5), stale, |n: Note| Note {
                    title: n.title.to_uppercase(),
                    count: n.count + 100,
                })
            })
            .unwrap();
        let after = repo.transport().counts();

        assert_eq!(after.bulk - before.bulk, 1);
        assert_eq!(after.get - before.get, 1, "exactly one fresh read");
        assert_eq!(after.write - before.write, 1, "exactly one retried write");
        assert_eq!(stats.retried, 1);
        assert_eq!(stats.failed, 0);

        let stored = repo.get("x").unwrap().unwrap();
        assert_eq!(
            stored,
            Note {
                title: "V6".into(),
                count: 106
            }
        );

        let reports = reports.lock();
        assert_eq!(reports.len(), 1);
        assert!(matches!(
            reports[0].status,
            ItemStatus::Retried { attempts: 1, .. }
        ));
    });
}

#[test]
fn conflict_without_budget_is_reported() {
    with_store(|store| {
        let repo = counted(store, "notes");
        repo.index(Some("x"), &Note::new("a")).unwrap();
        repo.index(Some("x"), &Note::new("b")).unwrap();

        let (config, reports) = collect_reports(BulkConfig::new(10));
        let stats = repo
            .bulk(config, |session| {
                session.update("x", ConcurrencyToken::new(1, 0), Note::new("a"), Note::incremented)
            })
            .unwrap();

        assert_eq!(stats.failed, 1);
        assert_eq!(repo.transport().counts().write, 2);
        let reports = reports.lock();
        assert!(matches!(
            reports[0].status,
            ItemStatus::Failed {
                category: FailureCategory::Conflict,
                ..
            }
        ));
        assert_eq!(repo.get("x").unwrap().unwrap(), Note::new("b"));
    });
}

#[test]
fn mixed_batch_accounts_for_every_item() {
    with_store(|store| {
        let repo = counted(store, "notes");
        repo.index(Some("taken"), &Note::new("first")).unwrap();

        let session = repo.bulk_session(BulkConfig::new(100));
        session.index(Some("taken"), &Note::new("dup"), true).unwrap();
        session.index(None, &Note::new("anonymous"), true).unwrap();
        session.index(Some("upsert"), &Note::new("new"), false).unwrap();
        session.delete("missing", None).unwrap();
        session.delete("taken", None).unwrap();

        let outcome = session.flush().unwrap();
        assert_eq!(outcome.items(), 5);
        assert_eq!(outcome.succeeded + outcome.failed, outcome.items());
        assert_eq!(outcome.failed, 2);

        let failures: Vec<(usize, FailureCategory)> = outcome
            .failures()
            .map(|r| match &r.status {
                ItemStatus::Failed { category, .. } => (r.position, *category),
                other => panic!("unexpected status {other:?}"),
            })
            .collect();
        assert_eq!(
            failures,
            vec![(0, FailureCategory::Conflict), (3, FailureCategory::NotFound)]
        );

        let assigned = outcome.reports[1].id.clone().unwrap();
        assert_eq!(repo.get(&assigned).unwrap(), Some(Note::new("anonymous")));
        assert_eq!(repo.get("taken").unwrap(), None);
        session.close().unwrap();
    });
}

#[test]
fn failed_bulk_request_surfaces_and_session_continues() {
    with_store(|store| {
        let repo = Repository::<Note, _>::new(
            FailingBulkTransport::new(store.transport(), 1),
            JsonCodec::new(),
            repo_config("notes"),
        );
        let session = repo.bulk_session(BulkConfig::new(100));
        session.index(Some("1"), &Note::new("lost"), false).unwrap();
        let err = session.flush().unwrap_err();
        assert!(err.is_retryable());

        session.index(Some("2"), &Note::new("kept"), false).unwrap();
        let stats = session.close().unwrap();
        assert_eq!(stats.succeeded, 1);
        assert_eq!(repo.get("1").unwrap(), None);
        assert_eq!(repo.get("2").unwrap(), Some(Note::new("kept")));
    });
}

#[test]
fn closed_session_rejects_appends() {
    with_store(|store| {
        let repo = store.repository::<Note>("notes");
        let session = repo.bulk_session(BulkConfig::new(10));
        session.index(Some("1"), &Note::new("a"), false).unwrap();
        let stats = session.close().unwrap();
        assert_eq!(stats.items, 1);

        let err = session.index(Some("2"), &Note::new("b"), false).unwrap_err();
        assert!(matches!(err, ClientError::SessionClosed));
        assert_eq!(session.close().unwrap(), stats);
    });
}

#[test]
fn always_conflicting_update_writes_exactly_max_attempts() {
    with_store(|store| {
        let repo = Repository::<Note, _>::new(
            ContendedTransport::always(CountingTransport::new(store.transport())),
            JsonCodec::new(),
            repo_config("notes").with_retry(fast_retry(4)),
        );
        repo.index(Some("x"), &Note::new("a")).unwrap();
        let writes_before = repo.transport().inner().counts().write;

        let err = repo.update("x", Note::incremented).unwrap_err();
        assert!(matches!(err, ClientError::UpdateExhausted { attempts: 4, .. }));
        assert_eq!(err.category(), FailureCategory::Conflict);

        // Each attempt is one guarded write plus one interfering rewrite.
        let writes = repo.transport().inner().counts().write - writes_before;
        assert_eq!(writes, 8);
        assert_eq!(repo.transport().interferences(), 4);
    });
}

#[test]
fn contended_update_recovers_within_budget() {
    with_store(|store| {
        let repo = Repository::<Note, _>::new(
            ContendedTransport::times(store.transport(), 2),
            JsonCodec::new(),
            repo_config("notes").with_retry(fast_retry(3)),
        );
        repo.index(Some("x"), &Note::new("a")).unwrap();

        let outcome = repo.update("x", Note::incremented).unwrap();
        assert_eq!(outcome.attempts, 3);
        assert_eq!(repo.get("x").unwrap().unwrap().count, 1);
    });
}

#[test]
fn update_of_missing_document_is_not_found() {
    with_store(|store| {
        let repo = store.repository::<Note>("notes");
        repo.index(Some("other"), &Note::new("a")).unwrap();
        let err = repo.update("ghost", Note::incremented).unwrap_err();
        assert!(matches!(err, ClientError::NotFound { ref id } if id == "ghost"));
    });
}

#[test]
fn guarded_index_and_delete() {
    with_store(|store| {
        let repo = store.repository::<Note>("notes");
        let first = repo.index(Some("x"), &Note::new("a")).unwrap();

        let second = repo
            .index_if("x", &Note::new("b"), Some(first.token.sequence), Some(first.token.epoch))
            .unwrap();
        assert_eq!(second.token.sequence, first.token.sequence + 1);

        let err = repo
            .index_if("x", &Note::new("c"), Some(first.token.sequence), Some(first.token.epoch))
            .unwrap_err();
        assert!(err.is_conflict());

        let err = repo
            .index_if("x", &Note::new("c"), Some(first.token.sequence), None)
            .unwrap_err();
        assert!(matches!(err, ClientError::InvalidToken(_)));

        assert!(repo.delete("x", Some(first.token)).unwrap_err().is_conflict());
        assert_eq!(repo.delete("x", Some(second.token)).unwrap().result, "deleted");
        assert!(matches!(
            repo.delete("x", None).unwrap_err(),
            ClientError::NotFound { .. }
        ));
    });
}

#[test]
fn create_conflicts_on_existing_id() {
    with_store(|store| {
        let repo = store.repository::<Note>("notes");
        repo.create(Some("x"), &Note::new("a")).unwrap();
        assert!(repo.create(Some("x"), &Note::new("b")).unwrap_err().is_conflict());

        let assigned = repo.create(None, &Note::new("c")).unwrap();
        assert_eq!(repo.get(&assigned.id).unwrap(), Some(Note::new("c")));
    });
}

#[test]
fn scroll_over_103_documents_in_pages_of_5() {
    with_store(|store| {
        store.seed("notes", numbered_notes(103));
        let repo = counted(store, "notes");

        let found: Vec<Note> = repo
            .search(None, &SearchOptions::scrolling(5))
            .unwrap()
            .documents()
            .collect::<Result<_, _>>()
            .unwrap();

        let counts = repo.transport().counts();
        assert_eq!(found.len(), 103);
        assert_eq!(counts.search, 1);
        assert_eq!(counts.advance, 21);
        assert_eq!(counts.release, 1);
        assert_eq!(store.open_scrolls(), 0);
    });
}

#[test]
fn abandoned_scroll_is_released_on_drop() {
    with_store(|store| {
        store.seed("notes", numbered_notes(20));
        let repo = counted(store, "notes");

        let mut results = repo.search(None, &SearchOptions::scrolling(5)).unwrap();
        let first = results.cursor().next().unwrap().unwrap();
        assert_eq!(first.id, "note-000");
        assert_eq!(store.open_scrolls(), 1);
        drop(results);

        assert_eq!(store.open_scrolls(), 0);
        assert_eq!(repo.transport().counts().release, 1);
    });
}

#[test]
fn single_page_search_never_scrolls() {
    with_store(|store| {
        store.seed("notes", numbered_notes(12));
        let repo = counted(store, "notes");

        let results = repo.search(None, &SearchOptions::single_page(5)).unwrap();
        assert_eq!(results.total_hits().value, 12);
        let hits: Vec<_> = results.hits().collect::<Result<_, _>>().unwrap();
        assert_eq!(hits.len(), 5);
        assert!(hits.iter().all(|(hit, _)| hit.token.is_some()));

        let counts = repo.transport().counts();
        assert_eq!(counts.advance, 0);
        assert_eq!(counts.release, 0);
        assert_eq!(store.open_scrolls(), 0);
    });
}

#[test]
fn term_query_search_and_count() {
    with_store(|store| {
        store.seed(
            "notes",
            vec![
                ("a".to_string(), Note::new("red")),
                ("b".to_string(), Note::new("blue")),
                ("c".to_string(), Note::new("red")),
            ],
        );
        let repo = store.repository::<Note>("notes");
        let query = json!({"term": {"title": "red"}});

        assert_eq!(repo.count(Some(&query)).unwrap(), 2);
        let found: Vec<Note> = repo
            .search(Some(query), &SearchOptions::scrolling(1))
            .unwrap()
            .documents()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(found, vec![Note::new("red"), Note::new("red")]);
    });
}

#[test]
fn refresh_controls_search_visibility() {
    with_store(|store| {
        let lazy = store.repository_with::<Note>(
            RepositoryConfig::new("notes").with_refresh_allowed(true),
        );
        lazy.index(Some("1"), &Note::new("hidden")).unwrap();
        assert_eq!(lazy.get("1").unwrap(), Some(Note::new("hidden")));
        assert_eq!(lazy.count(None).unwrap(), 0);

        lazy.refresh().unwrap();
        assert_eq!(lazy.count(None).unwrap(), 1);

        let locked = store.repository_with::<Note>(RepositoryConfig::new("notes"));
        assert!(matches!(locked.refresh(), Err(ClientError::RefreshNotAllowed)));
    });
}

#[test]
fn aliases_route_reads_and_writes() {
    with_store(|store| {
        let writer = store.repository_with::<Note>(
            RepositoryConfig::new("logical")
                .with_write_alias("notes-v2")
                .with_refresh(RefreshPolicy::WaitFor),
        );
        writer.index(Some("1"), &Note::new("aliased")).unwrap();
        assert_eq!(store.doc_count("notes-v2"), 1);
        assert_eq!(store.doc_count("logical"), 0);

        let reader = store.repository_with::<Note>(
            RepositoryConfig::new("logical").with_read_alias("notes-v2"),
        );
        assert_eq!(reader.get("1").unwrap(), Some(Note::new("aliased")));
        assert_eq!(reader.count(None).unwrap(), 1);
    });
}
