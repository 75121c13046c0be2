//! Utilities for poolgate

pub mod hash;
pub mod logging;

pub use hash::string_to_pair;
