//! Domain Layer - Core mirror types and cache logic.
//!
//! This layer contains the shared market cache and the data model it
//! stores, with no network I/O. All access to mirrored state goes
//! through the cache's narrow interface.

/// Shared market cache: per-key REST entries plus the versioned frame slot.
pub mod cache;

/// REST mirror target description.
pub mod endpoint;
