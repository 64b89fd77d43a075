//! One-shot snapshot loading at startup.

use super::rdb::{RdbReader, SnapshotRecord};
use super::SnapshotError;
use crate::storage::StorageEngine;
use bytes::Bytes;
use std::io;
use std::path::Path;
use tracing::{debug, info};

/// Reads the snapshot file at `path`, returning `None` if it does not exist.
fn read_file(path: &Path) -> Result<Option<Bytes>, SnapshotError> {
    match std::fs::read(path) {
        Ok(data) => Ok(Some(Bytes::from(data))),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(SnapshotError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Parses every record of the snapshot at `path`.
///
/// A missing file is a normal fresh start and yields no records.
pub fn load(path: &Path) -> Result<Vec<SnapshotRecord>, SnapshotError> {
    match read_file(path)? {
        Some(data) => RdbReader::new(data).collect(),
        None => Ok(Vec::new()),
    }
}

/// Loads the snapshot at `path` into `engine`, returning the number of
/// records inserted.
///
/// Records are inserted as they are parsed, without expiry. If the file turns
/// out to be corrupt, everything read before the damaged region stays in the
/// store and the corruption is returned for the caller to report.
pub fn load_into(path: &Path, engine: &StorageEngine) -> Result<usize, SnapshotError> {
    let Some(data) = read_file(path)? else {
        info!(path = %path.display(), "No snapshot found, starting with an empty dataset");
        return Ok(0);
    };

    let mut loaded = 0;
    for record in RdbReader::new(data) {
        let SnapshotRecord { key, value } = match record {
            Ok(record) => record,
            Err(e) => {
                debug!(path = %path.display(), loaded, "Snapshot load stopped early");
                return Err(e);
            }
        };
        engine.set(key, value);
        loaded += 1;
    }

    info!(path = %path.display(), keys = loaded, "Snapshot loaded");
    Ok(loaded)
}
