//! Index file naming and housekeeping inside a working directory. Persisted
//! indexes are named `<index_key>.<ntrain>.index`; at most one per key
//! survives an activation.

use std::path::{Path, PathBuf};

use crate::base::BASE_FILE;
use crate::error::Result;

const INDEX_SUFFIX: &str = ".index";

pub(crate) fn path_for(dir: &Path, index_key: &str, ntrain: usize) -> PathBuf {
    dir.join(format!("{index_key}.{ntrain}{INDEX_SUFFIX}"))
}

/// Largest `<ntrain>` among persisted index files for `index_key`, or 0 when
/// none exist. Entries that are not regular files or whose `<ntrain>` is not
/// an integer are skipped.
pub(crate) fn discover_latest(dir: &Path, index_key: &str) -> Result<usize> {
    let prefix = format!("{index_key}.");
    let mut latest = 0usize;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let Some(rest) = name.strip_prefix(&prefix) else {
            continue;
        };
        let Some(number) = rest.strip_suffix(INDEX_SUFFIX) else {
            continue;
        };
        let Ok(ntrain) = number.parse::<usize>() else {
            continue;
        };
        latest = latest.max(ntrain);
    }
    Ok(latest)
}

/// Removes `base.fvecs` and every `*.index` file from `dir`. The caller must
/// ensure no database is open on the directory.
pub fn clear_work_dir(dir: impl AsRef<Path>) -> Result<()> {
    let dir = dir.as_ref();
    if !dir.exists() {
        return Ok(());
    }
    tracing::info!(dir = %dir.display(), "clearing working directory");
    let base = dir.join(BASE_FILE);
    if base.exists() {
        std::fs::remove_file(&base)?;
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        if name.to_str().is_some_and(|name| name.ends_with(INDEX_SUFFIX)) {
            std::fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}
