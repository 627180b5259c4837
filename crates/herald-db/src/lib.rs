//! Database layer for the Herald event queue.
//!
//! Provides SQLite connection pooling (via `r2d2`), WAL-mode initialization,
//! embedded SQL migrations, the transaction scope used by every multi-step
//! mutation, and a helper for running blocking database work from async code
//! under a deadline.
//!
//! # Design decisions
//!
//! - **SQLite with WAL mode**: the queue is written by producers and drained
//!   by one worker per destination. WAL allows those readers to proceed while
//!   a single writer commits.
//! - **Transaction scope as a drop guard**: [`TransactionGuard`] ends its
//!   transaction on every exit path, including panics, and commits only when
//!   the success flag was set.
//! - **Embedded migrations**: SQL files are compiled into the binary via
//!   `include_str!`, so the schema cannot drift from the code using it.

mod blocking;
mod migrations;
mod pool;
mod txn;

pub use blocking::{run_blocking, DbError};
pub use migrations::{run_migrations, MigrationError};
pub use pool::{create_pool, DbPool, DbRuntimeSettings, PoolError};
pub use txn::{end_transaction, with_transaction, Transaction, TransactionGuard};
