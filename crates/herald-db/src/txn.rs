//! Transaction scope with guaranteed cleanup.
//!
//! [`with_transaction`] is the entry point for any mutation that must be
//! all-or-nothing. It opens a transaction, hands it to the caller's work,
//! and ends it exactly once: committed if the work succeeded, rolled back if
//! the work returned an error or panicked.
//!
//! Statements are rebound into the scope by passing the transaction where a
//! `&Connection` is expected; `rusqlite::Transaction` derefs to the
//! connection it was opened on, and cached statements are looked up per
//! connection.

use rusqlite::Connection;

/// Something that can be committed or rolled back, once.
pub trait Transaction: Sized {
    /// Commits the transaction.
    fn commit(self) -> rusqlite::Result<()>;

    /// Rolls the transaction back.
    fn rollback(self) -> rusqlite::Result<()>;
}

impl Transaction for rusqlite::Transaction<'_> {
    fn commit(self) -> rusqlite::Result<()> {
        rusqlite::Transaction::commit(self)
    }

    fn rollback(self) -> rusqlite::Result<()> {
        rusqlite::Transaction::rollback(self)
    }
}

/// Ends a transaction: commits it if `succeeded`, otherwise rolls it back.
///
/// Rollback failures are logged and swallowed so they never mask the error
/// that caused the rollback. Commit failures are returned.
///
/// # Errors
///
/// Returns the backend error if the commit fails.
pub fn end_transaction<T: Transaction>(txn: T, succeeded: bool) -> rusqlite::Result<()> {
    if succeeded {
        return txn.commit();
    }

    if let Err(e) = txn.rollback() {
        tracing::warn!(error = %e, "transaction rollback failed");
    }
    Ok(())
}

/// Owns an open transaction and ends it when dropped.
///
/// The commit decision is taken from a flag that is only set by
/// [`TransactionGuard::mark_succeeded`]. Dropping the guard without calling
/// [`TransactionGuard::finish`] (early return, `?`, or unwinding) ends the
/// transaction with whatever the flag says, which is a rollback unless the
/// caller explicitly marked success.
pub struct TransactionGuard<T: Transaction> {
    txn: Option<T>,
    succeeded: bool,
}

impl<T: Transaction> TransactionGuard<T> {
    /// Wraps an open transaction.
    pub fn new(txn: T) -> Self {
        Self {
            txn: Some(txn),
            succeeded: false,
        }
    }

    /// Returns the guarded transaction.
    pub fn transaction(&self) -> &T {
        // Only `finish` and `drop` take the transaction, and both consume
        // the guard.
        self.txn
            .as_ref()
            .expect("transaction is present until the guard is consumed")
    }

    /// Records that the unit of work succeeded.
    pub fn mark_succeeded(&mut self) {
        self.succeeded = true;
    }

    /// Ends the transaction now and reports the commit result.
    ///
    /// # Errors
    ///
    /// Returns the backend error if the commit fails.
    pub fn finish(mut self) -> rusqlite::Result<()> {
        match self.txn.take() {
            Some(txn) => end_transaction(txn, self.succeeded),
            None => Ok(()),
        }
    }
}

impl<T: Transaction> Drop for TransactionGuard<T> {
    fn drop(&mut self) {
        if let Some(txn) = self.txn.take() {
            if std::thread::panicking() {
                tracing::warn!("rolling back transaction while unwinding from a panic");
            }
            if let Err(e) = end_transaction(txn, self.succeeded) {
                tracing::error!(error = %e, "transaction commit failed during drop");
            }
        }
    }
}

/// Runs `work` inside a transaction on `conn`.
///
/// - If `work` returns `Err`, the transaction is rolled back and that error is
///   returned unchanged.
/// - If `work` returns `Ok`, the transaction is committed; a commit failure is
///   returned as the error.
/// - If `work` panics, the transaction is rolled back before the panic
///   continues to unwind.
///
/// # Errors
///
/// Returns the error produced by `work`, or the backend error from beginning
/// or committing the transaction.
pub fn with_transaction<T, E, F>(conn: &mut Connection, work: F) -> Result<T, E>
where
    F: FnOnce(&rusqlite::Transaction<'_>) -> Result<T, E>,
    E: From<rusqlite::Error>,
{
    let mut guard = TransactionGuard::new(conn.transaction()?);

    let value = work(guard.transaction())?;

    guard.mark_succeeded();
    guard.finish()?;
    Ok(value)
}
