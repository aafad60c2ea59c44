//! Durable file persistence helpers.

use std::fs;
use std::io;
use std::path::Path;

use serde::Serialize;

use crate::error::PipelineError;

/// Write bytes to a temp sibling, then atomically rename over the target.
/// A crash mid-write leaves either the old file or the new one, never a
/// partial file.
pub(crate) fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Atomic write of a pretty-printed JSON value.
pub(crate) fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), PipelineError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    atomic_write(path, &bytes)?;
    Ok(())
}
