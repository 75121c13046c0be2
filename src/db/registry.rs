//! Named connection pool registry
//!
//! Tracks one pool per name, creating pools lazily and reusing live ones.
//! The registry is an explicit object passed by reference to call sites;
//! there is no process-wide singleton.

use std::time::Duration;

use indexmap::IndexMap;
use sqlx::PgPool;
use tracing::info;

use crate::config::DatabaseConfig;
use crate::db::connection::{self, ConnectSpec, PoolSettings};
use crate::error::{Error, Result};

/// Name of the pool serving regular application queries.
pub const DEFAULT_POOL_NAME: &str = "default";

/// Name of the pool reserved for migration runs.
pub const MIGRATION_POOL_NAME: &str = "migration-pool";

/// Default size of the default pool.
pub const DEFAULT_POOL_SIZE: u32 = 15;

/// Default size of the migration pool.
pub const MIGRATION_POOL_SIZE: u32 = 10;

/// Registry of named connection pools.
///
/// At most one pool per name exists at any time. Pools are kept in insertion
/// order, which fixes the shutdown order of [`close_all`](Self::close_all).
#[derive(Debug, Default)]
pub struct PoolRegistry {
    pools: IndexMap<String, PgPool>,
}

impl PoolRegistry {
    pub fn new() -> Self {
        Self {
            pools: IndexMap::new(),
        }
    }

    /// Return the pool under `name`, creating it if absent or stale.
    ///
    /// A live (non-closed) pool is reused as-is. Otherwise connection options
    /// are resolved from `spec` and `settings` and a fresh pool replaces any
    /// stale entry. Connect failures propagate; no retry.
    pub async fn ensure(
        &mut self,
        name: &str,
        spec: &ConnectSpec,
        settings: &PoolSettings,
    ) -> Result<PgPool> {
        if let Some(pool) = self.pools.get(name) {
            if !pool.is_closed() {
                info!(pool = name, "Reusing connection pool");
                return Ok(pool.clone());
            }
        }

        info!(
            pool = name,
            max_connections = settings.max_connections,
            "Creating connection pool"
        );
        let pool = connection::connect(spec, settings).await?;
        self.pools.insert(name.to_string(), pool.clone());

        Ok(pool)
    }

    /// Create the default and migration pools from a database configuration.
    pub async fn ensure_default_pools(&mut self, config: &DatabaseConfig) -> Result<()> {
        let spec = ConnectSpec::uri(&config.url);
        let env_password = config.env_password();
        let acquire_timeout = Duration::from_secs(config.acquire_timeout_seconds.unwrap_or(30));
        let simple_query_mode = config.simple_query_mode.unwrap_or(false);

        self.ensure(
            DEFAULT_POOL_NAME,
            &spec,
            &PoolSettings {
                max_connections: config.pool_size.unwrap_or(DEFAULT_POOL_SIZE),
                acquire_timeout,
                env_password: env_password.clone(),
                simple_query_mode,
            },
        )
        .await?;

        self.ensure(
            MIGRATION_POOL_NAME,
            &spec,
            &PoolSettings {
                max_connections: config.migration_pool_size.unwrap_or(MIGRATION_POOL_SIZE),
                acquire_timeout,
                env_password,
                simple_query_mode,
            },
        )
        .await?;

        Ok(())
    }

    /// Look up a pool by name without creating it.
    pub fn get(&self, name: &str) -> Option<&PgPool> {
        self.pools.get(name)
    }

    /// The default pool; errors if it has not been created yet.
    pub fn default_pool(&self) -> Result<&PgPool> {
        self.get(DEFAULT_POOL_NAME)
            .ok_or_else(|| Error::DatabaseError("default pool has not been created".to_string()))
    }

    /// The migration pool; errors if it has not been created yet.
    pub fn migration_pool(&self) -> Result<&PgPool> {
        self.get(MIGRATION_POOL_NAME)
            .ok_or_else(|| Error::DatabaseError("migration pool has not been created".to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.pools.contains_key(name)
    }

    /// Pool names in creation order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.pools.keys().map(|k| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    /// Close every pool in creation order, then clear the registry.
    ///
    /// Shutdown is fail-fast: an error from a close aborts the remaining
    /// closes, leaving later pools open.
    pub async fn close_all(&mut self) -> Result<()> {
        for (name, pool) in &self.pools {
            info!(pool = name.as_str(), "Closing connection pool");
            pool.close().await;
        }
        self.pools.clear();

        Ok(())
    }
}
