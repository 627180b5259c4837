//! Queue behaviour across pooled connections and concurrent producers.

use std::collections::HashSet;
use std::time::Duration;

use herald_db::{create_pool, run_blocking, run_migrations, DbPool, DbRuntimeSettings};
use herald_queue::{EventQueueStore, QueueError};
use herald_types::SourceEvent;

fn setup() -> (tempfile::TempDir, DbPool, EventQueueStore) {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let path = dir.path().join("queue.db");
    let pool = create_pool(
        path.to_str().expect("utf-8 path"),
        DbRuntimeSettings {
            busy_timeout_ms: 10_000,
            pool_max_size: 8,
        },
    )
    .expect("failed to create pool");

    let mut conn = pool.get().expect("failed to get connection");
    run_migrations(&mut conn).expect("failed to run migrations");
    let store = EventQueueStore::new(&conn).expect("store should prepare");
    drop(conn);

    (dir, pool, store)
}

fn event(event_id: String) -> SourceEvent {
    SourceEvent {
        event_id,
        origin_server_ts: 1_000,
        room_id: "!ops:example.org".to_string(),
        event_type: "m.room.message".to_string(),
        sender: "@bot:example.org".to_string(),
        content: None,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_producers_get_unique_ordered_sequence_ids() {
    let (_dir, pool, store) = setup();

    let mut handles = Vec::new();
    for producer in 0..4 {
        let pool = pool.clone();
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let mut seqs = Vec::new();
            for n in 0..25 {
                let store = store.clone();
                let ev = event(format!("$p{producer}-{n}"));
                let seq = run_blocking(&pool, None, move |conn| {
                    store
                        .enqueue(conn, &["irc-bridge"], &ev)
                        .map(|seqs| seqs[0])
                })
                .await
                .expect("insert should succeed");
                seqs.push(seq);
            }
            seqs
        }));
    }

    let mut all = Vec::new();
    for handle in handles {
        let seqs = handle.await.expect("producer task should finish");
        assert!(
            seqs.windows(2).all(|w| w[0] < w[1]),
            "one producer's inserts should be ordered"
        );
        all.extend(seqs);
    }

    let unique: HashSet<i64> = all.iter().copied().collect();
    assert_eq!(unique.len(), 100, "sequence ids should be unique");

    let reader_store = store.clone();
    let (event_ids, events) = run_blocking(&pool, None, move |conn| {
        reader_store.select_events_by_destination(conn, "irc-bridge", 1_000)
    })
    .await
    .expect("select should succeed");

    assert_eq!(event_ids.len(), 100);
    assert!(events.windows(2).all(|w| w[0].sequence_id < w[1].sequence_id));
}

#[tokio::test]
async fn expired_deadline_surfaces_as_retryable_error() {
    let (_dir, pool, _store) = setup();

    let err = run_blocking(&pool, Some(Duration::from_millis(20)), |_conn| {
        std::thread::sleep(Duration::from_millis(200));
        Ok::<_, QueueError>(())
    })
    .await
    .expect_err("deadline should expire");

    assert!(matches!(err, QueueError::DeadlineExceeded(_)), "got {err:?}");
    assert!(err.is_retryable());
}
