//! Database connection handling
//!
//! This module resolves connection options from a URI and the environment,
//! and establishes Postgres connection pools.

use std::str::FromStr;
use std::time::Duration;

use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use url::Url;

use crate::error::{Error, Result};

/// How to reach the database: a URI string, or pre-built connect options.
#[derive(Debug, Clone)]
pub enum ConnectSpec {
    Uri(String),
    Options(PgConnectOptions),
}

impl ConnectSpec {
    pub fn uri(uri: impl Into<String>) -> Self {
        ConnectSpec::Uri(uri.into())
    }
}

/// Per-pool settings applied when a pool is created.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    /// Password override, applied only when the URI has no embedded password
    pub env_password: Option<String>,
    /// Disable server-side prepared statements
    pub simple_query_mode: bool,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 15,
            acquire_timeout: Duration::from_secs(30),
            env_password: None,
            simple_query_mode: false,
        }
    }
}

/// Outcome of password resolution for a URI connection spec.
///
/// The override password cannot be combined with a URI, so when it applies the
/// URI is decomposed into its component options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedTarget {
    /// The original URI passes through unmodified (embedded password wins)
    PassThrough(String),
    /// Parsed components plus the environment password
    Parts {
        host: Option<String>,
        port: Option<u16>,
        username: Option<String>,
        database: Option<String>,
        password: String,
    },
}

/// Apply the password resolution policy to a URI.
///
/// If `env_password` is set AND the URI contains no embedded password, the URI
/// is decomposed and the environment password fills the gap. Otherwise the URI
/// passes through unmodified. Parse failures surface here, before any connect
/// attempt.
pub fn resolve_target(uri: &str, env_password: Option<&str>) -> Result<ResolvedTarget> {
    let parsed = Url::parse(uri)?;

    let env_password = match env_password {
        Some(p) if parsed.password().is_none() => p,
        _ => return Ok(ResolvedTarget::PassThrough(uri.to_string())),
    };

    let username = match parsed.username() {
        "" => None,
        user => Some(user.to_string()),
    };
    let database = match parsed.path().trim_start_matches('/') {
        "" => None,
        db => Some(db.to_string()),
    };

    Ok(ResolvedTarget::Parts {
        host: parsed.host_str().map(|h| h.to_string()),
        port: parsed.port(),
        username,
        database,
        password: env_password.to_string(),
    })
}

/// Resolve a connection spec into sqlx connect options.
pub fn resolve_connect_options(
    spec: &ConnectSpec,
    settings: &PoolSettings,
) -> Result<PgConnectOptions> {
    let mut options = match spec {
        ConnectSpec::Uri(uri) => {
            match resolve_target(uri, settings.env_password.as_deref())? {
                ResolvedTarget::PassThrough(uri) => PgConnectOptions::from_str(&uri)
                    .map_err(|e| Error::UriError(e.to_string()))?,
                ResolvedTarget::Parts {
                    host,
                    port,
                    username,
                    database,
                    password,
                } => {
                    let mut options = PgConnectOptions::new().password(&password);
                    if let Some(host) = host {
                        options = options.host(&host);
                    }
                    if let Some(port) = port {
                        options = options.port(port);
                    }
                    if let Some(username) = username {
                        options = options.username(&username);
                    }
                    if let Some(database) = database {
                        options = options.database(&database);
                    }
                    options
                }
            }
        }
        ConnectSpec::Options(options) => options.clone(),
    };

    if settings.simple_query_mode {
        options = options.statement_cache_capacity(0);
    }

    Ok(options)
}

/// Create a new connection pool from a spec and settings.
///
/// Connect failures propagate unmodified; there is no retry.
pub async fn connect(spec: &ConnectSpec, settings: &PoolSettings) -> Result<PgPool> {
    let options = resolve_connect_options(spec, settings)?;

    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .acquire_timeout(settings.acquire_timeout)
        .connect_with(options)
        .await?;

    Ok(pool)
}
