mod atomic;

use std::fs::{self, File};
use std::io;
use std::path::Path;

use tracing::warn;

use crate::error::{IoResultExt, Result};

pub use atomic::{write_atomic, AtomicFile};

/// sync a directory to disk
pub fn fsync_dir(path: &Path) -> Result<()> {
    let dir = File::open(path).with_path(path)?;
    dir.sync_all().with_path(path)?;
    Ok(())
}

/// copy a file, creating the destination's parent directories
pub fn copy_file(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).with_path(parent)?;
    }
    fs::copy(from, to).with_path(to)?;
    Ok(())
}

/// remove empty directories from `start` upward, stopping at `stop` (exclusive)
///
/// failures are logged, never returned.
pub fn prune_empty_dirs(start: &Path, stop: &Path) {
    let mut current = start.to_path_buf();
    while current.starts_with(stop) && current != stop {
        let empty = match fs::read_dir(&current) {
            Ok(mut entries) => entries.next().is_none(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => true,
            Err(e) => {
                warn!(dir = %current.display(), error = %e, "failed to list directory");
                break;
            }
        };
        // not empty: ancestors are not empty either
        if !empty {
            break;
        }
        match fs::remove_dir(&current) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(dir = %current.display(), error = %e, "failed to remove empty directory");
                break;
            }
        }
        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => break,
        }
    }
}
