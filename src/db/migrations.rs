//! Migration management
//!
//! Loads ordered `.sql` migration files, tracks applied migrations in a
//! history table, and runs pending ones under the advisory-lock gate so that
//! only one process instance migrates at a time.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use sqlx::{Executor, PgConnection, PgPool};
use tracing::info;

use crate::config::{MigrationsConfig, TransactionMode};
use crate::db::lock::{with_advisory_lock, MIGRATION_LOCK_NAME};
use crate::error::{Error, Result};

/// A single schema migration, read from a `.sql` file.
#[derive(Debug, Clone)]
pub struct Migration {
    /// File stem; the stable identity recorded in the history table
    pub id: String,
    /// Full file name
    pub name: String,
    pub sql: String,
    /// md5 hex digest of the SQL
    pub checksum: String,
}

/// A row of the migration history table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MigrationRecord {
    pub migration_id: String,
    pub name: String,
    pub applied_at: DateTime<Utc>,
    pub checksum: Option<String>,
    pub execution_time_ms: Option<i32>,
}

/// Load migrations from a directory, ordered by file name.
///
/// Only `.sql` files are considered. The file name ordering is the migration
/// ordering, so files are expected to carry a sortable prefix (timestamp or
/// sequence number).
pub fn load_from_dir(dir: impl AsRef<Path>) -> Result<Vec<Migration>> {
    let dir = dir.as_ref();
    if !dir.exists() {
        return Err(Error::MigrationError(format!(
            "Migration directory does not exist: {}",
            dir.display()
        )));
    }

    let mut paths: Vec<_> = fs::read_dir(dir)?
        .collect::<std::io::Result<Vec<_>>>()?
        .into_iter()
        .map(|entry| entry.path())
        .filter(|path| path.extension().map_or(false, |ext| ext == "sql"))
        .collect();
    paths.sort();

    let mut migrations = Vec::with_capacity(paths.len());
    for path in paths {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                Error::MigrationError(format!("Invalid migration file name: {}", path.display()))
            })?
            .to_string();
        let id = name.trim_end_matches(".sql").to_string();
        let sql = fs::read_to_string(&path)?;
        let checksum = format!("{:x}", md5::compute(sql.as_bytes()));

        migrations.push(Migration {
            id,
            name,
            sql,
            checksum,
        });
    }

    Ok(migrations)
}

/// Ensure the migration history table exists
pub async fn ensure_history_table(pool: &PgPool, table_name: &str) -> Result<()> {
    let create_table_sql = format!(
        "CREATE TABLE IF NOT EXISTS {} (
            id SERIAL PRIMARY KEY,
            migration_id VARCHAR(255) NOT NULL,
            name VARCHAR(255) NOT NULL,
            applied_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT CURRENT_TIMESTAMP,
            checksum VARCHAR(64) NULL,
            execution_time_ms INTEGER NULL
        )",
        table_name
    );

    sqlx::query(&create_table_sql).execute(pool).await?;
    Ok(())
}

/// The ids of migrations already recorded in the history table.
pub async fn applied_ids(pool: &PgPool, table_name: &str) -> Result<HashSet<String>> {
    let ids: Vec<String> =
        sqlx::query_scalar(&format!("SELECT migration_id FROM {}", table_name))
            .fetch_all(pool)
            .await?;

    Ok(ids.into_iter().collect())
}

/// Applied-migration records in application order.
pub async fn history(pool: &PgPool, table_name: &str) -> Result<Vec<MigrationRecord>> {
    let records = sqlx::query_as::<_, MigrationRecord>(&format!(
        "SELECT migration_id, name, applied_at, checksum, execution_time_ms
         FROM {} ORDER BY id",
        table_name
    ))
    .fetch_all(pool)
    .await?;

    Ok(records)
}

/// Apply every migration not yet recorded in the history table.
///
/// Returns the number of migrations applied. `transaction_mode` selects
/// whether the batch, each migration, or nothing is wrapped in a transaction.
pub async fn run_pending(
    pool: &PgPool,
    migrations: &[Migration],
    config: &MigrationsConfig,
) -> Result<usize> {
    ensure_history_table(pool, &config.history_table).await?;
    let applied = applied_ids(pool, &config.history_table).await?;

    let pending: Vec<&Migration> = migrations
        .iter()
        .filter(|m| !applied.contains(&m.id))
        .collect();

    if pending.is_empty() {
        return Ok(0);
    }

    if config.dry_run {
        for migration in &pending {
            info!(
                migration_id = %migration.id,
                sql = %migration.sql,
                "Migration SQL (dry run)"
            );
        }
        return Ok(0);
    }

    match config.transaction_mode {
        TransactionMode::All => {
            let mut tx = pool.begin().await?;
            for migration in &pending {
                apply_one(&mut tx, migration, &config.history_table).await?;
            }
            tx.commit().await?;
        }
        TransactionMode::Each => {
            for migration in &pending {
                let mut tx = pool.begin().await?;
                apply_one(&mut tx, migration, &config.history_table).await?;
                tx.commit().await?;
            }
        }
        TransactionMode::None => {
            let mut conn = pool.acquire().await?;
            for migration in &pending {
                apply_one(&mut conn, migration, &config.history_table).await?;
            }
        }
    }

    Ok(pending.len())
}

/// Run pending migrations while holding the migration advisory lock.
///
/// Multiple process instances may call this concurrently; the database-level
/// lock serializes them.
pub async fn migrate_guarded(
    pool: &PgPool,
    migrations: &[Migration],
    config: &MigrationsConfig,
) -> Result<usize> {
    let applied = with_advisory_lock(pool, MIGRATION_LOCK_NAME, || {
        run_pending(pool, migrations, config)
    })
    .await?;

    if applied > 0 {
        info!(count = applied, "Successfully ran migrations");
    }

    Ok(applied)
}

/// Apply a single migration and record it in the history table.
async fn apply_one(
    conn: &mut PgConnection,
    migration: &Migration,
    history_table: &str,
) -> Result<()> {
    info!(migration_id = %migration.id, "Applying migration");
    let started = Instant::now();

    (&mut *conn).execute(migration.sql.as_str()).await?;

    let execution_time_ms = elapsed_ms(started.elapsed());
    sqlx::query(&format!(
        "INSERT INTO {} (migration_id, name, checksum, execution_time_ms)
         VALUES ($1, $2, $3, $4)",
        history_table
    ))
    .bind(&migration.id)
    .bind(&migration.name)
    .bind(&migration.checksum)
    .bind(execution_time_ms)
    .execute(&mut *conn)
    .await?;

    info!(
        migration_id = %migration.id,
        execution_time_ms,
        "Migration applied successfully"
    );

    Ok(())
}

/// Clamp an execution time to the history table's integer milliseconds column.
fn elapsed_ms(elapsed: Duration) -> i32 {
    i32::try_from(elapsed.as_millis()).unwrap_or(i32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_load_orders_by_file_name() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("002_add_index.sql"), "CREATE INDEX ix ON t (a);").unwrap();
        fs::write(dir.path().join("001_create_table.sql"), "CREATE TABLE t (a INT);").unwrap();
        fs::write(dir.path().join("notes.txt"), "not a migration").unwrap();

        let migrations = load_from_dir(dir.path()).unwrap();

        assert_eq!(migrations.len(), 2);
        assert_eq!(migrations[0].id, "001_create_table");
        assert_eq!(migrations[0].name, "001_create_table.sql");
        assert_eq!(migrations[1].id, "002_add_index");
        assert_eq!(migrations[0].sql, "CREATE TABLE t (a INT);");
    }

    #[test]
    fn test_checksum_tracks_content() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("001_a.sql"), "SELECT 1;").unwrap();
        fs::write(dir.path().join("002_b.sql"), "SELECT 2;").unwrap();

        let migrations = load_from_dir(dir.path()).unwrap();

        assert_eq!(migrations[0].checksum.len(), 32);
        assert_ne!(migrations[0].checksum, migrations[1].checksum);
    }

    #[test]
    fn test_execution_time_clamps_to_column_range() {
        assert_eq!(elapsed_ms(Duration::from_millis(250)), 250);
        assert_eq!(elapsed_ms(Duration::from_secs(0)), 0);
        assert_eq!(elapsed_ms(Duration::from_secs(u64::MAX / 1000)), i32::MAX);
    }

    #[test]
    fn test_missing_directory_is_an_error() {
        let result = load_from_dir("/nonexistent/migrations");
        assert!(matches!(result, Err(Error::MigrationError(_))));
    }
}
