//! Advisory lock gate
//!
//! Serializes a guarded action across process instances using a Postgres
//! advisory lock. Correctness rests on the database's lock primitive, not on
//! in-process synchronization.

use std::future::Future;

use sqlx::pool::PoolConnection;
use sqlx::{PgConnection, PgPool, Postgres};
use tracing::warn;

use crate::error::{Error, Result};
use crate::utils::hash::string_to_pair;

/// Lock name guarding migration execution.
pub const MIGRATION_LOCK_NAME: &str = "migration-lock";

/// A pooled connection that may be holding a session-scoped lock.
///
/// Until [`disarm`](Self::disarm) is called, dropping the session detaches the
/// connection from the pool instead of recycling it. Closing the session makes
/// Postgres release any advisory lock it still holds, so a lock can never ride
/// a recycled connection back to an unrelated caller. This is the unwind path:
/// a panic or cancellation inside the guarded action drops the armed session.
struct LockSession {
    conn: Option<PoolConnection<Postgres>>,
}

impl LockSession {
    fn new(conn: PoolConnection<Postgres>) -> Self {
        Self { conn: Some(conn) }
    }

    fn conn(&mut self) -> &mut PgConnection {
        self.conn.as_mut().expect("lock session used after disarm")
    }

    /// Let the connection return to the pool on the normal path.
    fn disarm(&mut self) {
        self.conn.take();
    }
}

impl Drop for LockSession {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            warn!("Discarding connection that may still hold an advisory lock");
            drop(conn.detach());
        }
    }
}

/// Run `action` while holding the named advisory lock.
///
/// Acquisition blocks until the lock is available; there is no timeout. The
/// lock is session-scoped, so a single connection is held for the duration and
/// both the acquire and the release are issued on it.
///
/// The lock is released exactly once per acquisition, whatever the action
/// does:
/// - action succeeded or failed: the unlock query runs and the connection is
///   recycled. If the unlock *returns false* (lock was not held), a warning is
///   logged and the action's outcome stands.
/// - the unlock *query itself* failed: the connection is discarded instead of
///   recycled, so ending the session frees the lock server-side. The failure
///   surfaces as [`Error::LockError`] when the action succeeded; otherwise the
///   action's error wins and the unlock failure is only logged.
/// - the action panicked (or the future was dropped mid-flight): the held
///   connection is detached from the pool during unwind, ending the session
///   and releasing the lock.
pub async fn with_advisory_lock<F, Fut, T>(pool: &PgPool, name: &str, action: F) -> Result<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let (key_hi, key_lo) = string_to_pair(name);
    let mut session = LockSession::new(pool.acquire().await?);

    // wait to acquire lock
    if let Err(e) = sqlx::query("SELECT pg_advisory_lock($1, $2)")
        .bind(key_hi)
        .bind(key_lo)
        .execute(session.conn())
        .await
    {
        // the lock was never taken; the connection is safe to recycle
        session.disarm();
        return Err(e.into());
    }

    // execute our code inside the lock
    let outcome = action().await;

    // unlock the acquired lock
    let released: std::result::Result<bool, sqlx::Error> =
        sqlx::query_scalar("SELECT pg_advisory_unlock($1, $2)")
            .bind(key_hi)
            .bind(key_lo)
            .fetch_one(session.conn())
            .await;

    match released {
        Ok(true) => session.disarm(),
        Ok(false) => {
            session.disarm();
            warn!(lock = name, key_hi, key_lo, "Advisory lock was not locked");
        }
        Err(unlock_err) => {
            // Leave the session armed: the connection is discarded rather
            // than recycled, and the server frees the lock when it closes.
            if outcome.is_ok() {
                return Err(Error::LockError(format!(
                    "Failed to release advisory lock {}: {}",
                    name, unlock_err
                )));
            }
            warn!(
                lock = name,
                error = %unlock_err,
                "Failed to release advisory lock"
            );
        }
    }

    outcome
}
