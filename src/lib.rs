//! poolgate: named Postgres connection pools with advisory-lock guarded
//! migrations
//!
//! poolgate is the database coordination layer of a server platform. It keeps
//! a registry of named connection pools (created lazily, reused while live),
//! resolves credentials from the connection URI with an optional environment
//! password override, and serializes schema migrations across process
//! instances with a database-level advisory lock.

pub mod config;
pub mod db;
pub mod error;
pub mod utils;

#[cfg(test)]
mod test;

// Re-export main types for easier access
pub use config::{Config, DatabaseConfig, MigrationsConfig, TransactionMode};
pub use db::connection::{ConnectSpec, PoolSettings, ResolvedTarget};
pub use db::lock::{with_advisory_lock, MIGRATION_LOCK_NAME};
pub use db::migrations::{Migration, MigrationRecord};
pub use db::registry::{PoolRegistry, DEFAULT_POOL_NAME, MIGRATION_POOL_NAME};
pub use error::{Error, Result};

/// Initialize poolgate with the specified configuration file
pub async fn init(config_path: &str) -> Result<PoolGate> {
    let config = config::load_from_file(config_path)?;
    PoolGate::connect(config).await
}

/// The main client for interacting with poolgate
///
/// Owns the pool registry and the configuration. The registry is ordinary
/// owned state; callers that share a `PoolGate` across tasks wrap it in their
/// own synchronization.
pub struct PoolGate {
    config: Config,
    registry: PoolRegistry,
}

impl PoolGate {
    /// Create the default and migration pools and return the client.
    pub async fn connect(config: Config) -> Result<Self> {
        let mut registry = PoolRegistry::new();
        registry.ensure_default_pools(&config.database).await?;

        Ok(Self { config, registry })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &PoolRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut PoolRegistry {
        &mut self.registry
    }

    /// Load the migration directory and run pending migrations under the
    /// advisory-lock gate. Returns the number of migrations applied.
    pub async fn migrate(&self) -> Result<usize> {
        let migrations = db::migrations::load_from_dir(&self.config.migrations.directory)?;
        let pool = self.registry.migration_pool()?;

        db::migrations::migrate_guarded(pool, &migrations, &self.config.migrations).await
    }

    /// Close every pool and consume the client.
    pub async fn close(mut self) -> Result<()> {
        self.registry.close_all().await
    }
}
