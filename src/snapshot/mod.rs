//! Snapshot Module
//!
//! Bootstraps the keyspace from an RDB file once, before the server starts
//! accepting connections.
//!
//! - `rdb`: structural reader for the on-disk format
//! - `loader`: file handling and insertion into the [`StorageEngine`]
//!
//! [`StorageEngine`]: crate::storage::StorageEngine

pub mod loader;
pub mod rdb;

use std::path::PathBuf;
use thiserror::Error;

pub use loader::{load, load_into};
pub use rdb::{RdbReader, SnapshotRecord};

/// Errors raised while loading a snapshot.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// The file exists but could not be read
    #[error("failed to read snapshot {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file does not follow the snapshot format
    #[error("corrupt snapshot at offset {offset}: {reason}")]
    Corrupt { offset: usize, reason: String },
}
