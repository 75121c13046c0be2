//! Database module for poolgate
//!
//! This module handles connection pools, the advisory-lock gate, and
//! migrations.

pub mod connection;
pub mod lock;
pub mod migrations;
pub mod registry;

// Re-export key types
pub use connection::{ConnectSpec, PoolSettings};
pub use registry::PoolRegistry;
