//! Running blocking database work from async code.
//!
//! SQLite calls block the calling thread, so async callers hand them to
//! [`run_blocking`], which checks a connection out of the pool on tokio's
//! blocking thread pool. An optional deadline bounds the call: when it
//! expires the in-flight statement is interrupted and the caller gets
//! [`DbError::DeadlineExceeded`]. An interrupted statement fails inside its
//! transaction, so the scope rolls back and no partial row is left behind.
//! A call whose deadline expires while it still waits for a connection never
//! runs its work at all.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rusqlite::Connection;
use thiserror::Error;

use crate::pool::DbPool;

/// Errors raised by the blocking-execution layer itself.
#[derive(Debug, Error)]
pub enum DbError {
    /// No connection could be checked out of the pool.
    #[error("database pool unavailable: {0}")]
    Pool(#[from] r2d2::Error),

    /// The work did not finish before the caller's deadline.
    #[error("database call exceeded deadline of {0:?}")]
    DeadlineExceeded(Duration),

    /// The blocking task was cancelled before it completed.
    #[error("database task failed: {0}")]
    TaskFailed(String),
}

const PENDING: u8 = 0;
const STARTED: u8 = 1;
const CANCELLED: u8 = 2;

/// Runs `work` against a pooled connection on the blocking thread pool.
///
/// With `deadline` set, the call is abandoned once the deadline passes. If
/// `work` has started, the connection's current statement is interrupted;
/// if it has not, it is skipped. A panic inside `work`
/// is resumed on the calling task after the blocking thread has unwound, so
/// any transaction guard inside `work` has already rolled back.
///
/// # Errors
///
/// Returns the error produced by `work`, or a [`DbError`] converted into `E`
/// when the pool is exhausted, the deadline expires, or the task is
/// cancelled.
pub async fn run_blocking<T, E, F>(
    pool: &DbPool,
    deadline: Option<Duration>,
    work: F,
) -> Result<T, E>
where
    T: Send + 'static,
    E: From<DbError> + Send + 'static,
    F: FnOnce(&mut Connection) -> Result<T, E> + Send + 'static,
{
    let pool = pool.clone();
    let (handle_tx, mut handle_rx) = tokio::sync::oneshot::channel();
    let state = Arc::new(AtomicU8::new(PENDING));
    let task_state = Arc::clone(&state);

    let mut task = tokio::task::spawn_blocking(move || {
        let mut conn = pool.get().map_err(DbError::from)?;
        // The receiver is gone only if the caller already gave up.
        let _ = handle_tx.send(conn.get_interrupt_handle());
        // The handle is sent before claiming the call, so a caller that
        // loses the race below can always interrupt.
        if task_state
            .compare_exchange(PENDING, STARTED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("skipping database work cancelled by its deadline");
            return Err(DbError::DeadlineExceeded(deadline.unwrap_or_default()).into());
        }
        work(&mut conn)
    });

    let joined = match deadline {
        None => task.await,
        Some(limit) => match tokio::time::timeout(limit, &mut task).await {
            Ok(joined) => joined,
            Err(_) => {
                let cancelled = state
                    .compare_exchange(PENDING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok();
                if cancelled {
                    tracing::debug!("deadline expired before the work started");
                } else if let Ok(handle) = handle_rx.try_recv() {
                    handle.interrupt();
                }
                tracing::warn!(
                    deadline_ms = limit.as_millis() as u64,
                    "database call exceeded deadline"
                );
                return Err(DbError::DeadlineExceeded(limit).into());
            }
        },
    };

    match joined {
        Ok(result) => result,
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(e) => Err(DbError::TaskFailed(e.to_string()).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{create_pool, DbRuntimeSettings};

    #[derive(Debug, thiserror::Error)]
    enum WorkError {
        #[error(transparent)]
        Db(#[from] DbError),
        #[error(transparent)]
        Sqlite(#[from] rusqlite::Error),
    }

    fn file_pool() -> (tempfile::TempDir, DbPool) {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let path = dir.path().join("blocking.db");
        let pool = create_pool(
            path.to_str().expect("utf-8 path"),
            DbRuntimeSettings::default(),
        )
        .expect("pool creation should succeed");
        (dir, pool)
    }

    #[tokio::test]
    async fn runs_work_and_returns_value() {
        let (_dir, pool) = file_pool();

        let value: i64 = run_blocking(&pool, None, |conn| {
            conn.query_row("SELECT 40 + 2", [], |row| row.get(0))
                .map_err(WorkError::from)
        })
        .await
        .expect("query should succeed");

        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn deadline_interrupts_long_running_statement() {
        let (_dir, pool) = file_pool();

        let err = run_blocking(&pool, Some(Duration::from_millis(50)), |conn| {
            // Unbounded recursive CTE; only an interrupt stops it.
            conn.query_row(
                "WITH RECURSIVE spin(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM spin)
                 SELECT MAX(x) FROM spin",
                [],
                |row| row.get::<_, i64>(0),
            )
            .map_err(WorkError::from)
        })
        .await
        .expect_err("deadline should expire");

        assert!(
            matches!(err, WorkError::Db(DbError::DeadlineExceeded(_))),
            "unexpected error: {err:?}"
        );
    }

    #[tokio::test]
    async fn work_is_skipped_when_deadline_expires_waiting_for_a_connection() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let path = dir.path().join("blocking.db");
        let pool = create_pool(
            path.to_str().expect("utf-8 path"),
            DbRuntimeSettings {
                busy_timeout_ms: 5_000,
                pool_max_size: 1,
            },
        )
        .expect("pool creation should succeed");

        let held = pool.get().expect("should get the only connection");
        held.execute_batch("CREATE TABLE deliveries (event_id TEXT NOT NULL);")
            .expect("should create table");

        let err = run_blocking(&pool, Some(Duration::from_millis(50)), |conn| {
            conn.execute("INSERT INTO deliveries (event_id) VALUES ('$late')", [])
                .map_err(WorkError::from)
        })
        .await
        .expect_err("deadline should expire while the pool is exhausted");
        assert!(
            matches!(err, WorkError::Db(DbError::DeadlineExceeded(_))),
            "unexpected error: {err:?}"
        );

        // Hand the connection back; the abandoned task checks it out and
        // must not run its insert.
        drop(held);
        tokio::time::sleep(Duration::from_millis(300)).await;

        let rows: i64 = run_blocking(&pool, None, |conn| {
            conn.query_row("SELECT COUNT(*) FROM deliveries", [], |row| row.get(0))
                .map_err(WorkError::from)
        })
        .await
        .expect("count should succeed");
        assert_eq!(rows, 0, "cancelled work must not commit");
    }

    #[tokio::test]
    async fn panic_in_work_propagates() {
        let (_dir, pool) = file_pool();

        let handle = tokio::spawn(async move {
            run_blocking(&pool, None, |_conn| -> Result<(), WorkError> {
                panic!("blocking work crashed");
            })
            .await
        });

        let join = handle.await.expect_err("panic should propagate");
        assert!(join.is_panic());
    }
}
