//! Index construction off the hot path. A build starts from an owned
//! snapshot of the base (taken under the shared lock by the facade) and does
//! every kernel operation with no lock held.

use std::path::Path;

use crate::config::DbConfig;
use crate::error::{DbError, Result};
use crate::kernel::{self, Index};
use crate::registry;

/// Owned copy of the state a build works from.
pub(crate) struct BuildSnapshot {
    /// Rows in the base at snapshot time.
    pub n: usize,
    /// Rows covered by the live index at snapshot time.
    pub ntotal: usize,
    /// Training size of the live index.
    pub ntrain: usize,
    /// The first `n` rows, densely packed.
    pub data: Vec<f32>,
}

/// Produces a candidate `(index, ntrain)` pair, or `(None, ntrain)` when the
/// live index already covers the whole base at the right training size.
pub(crate) fn build(
    config: &DbConfig,
    work_dir: &Path,
    snapshot: BuildSnapshot,
) -> Result<(Option<Index>, usize)> {
    let dim = config.dim;
    let n = snapshot.n;
    tracing::info!(
        dir = %work_dir.display(),
        dim,
        index_key = %config.index_key,
        metric = config.metric.code(),
        rows = n,
        "building index"
    );

    if config.is_flat() {
        let mut index = Index::factory(dim, &config.index_key, config.metric)?;
        index.add(&snapshot.data)?;
        return Ok((Some(index), 0));
    }

    let nt = n.min((n / 10).max(config.max_train));
    if nt == snapshot.ntrain {
        if n == snapshot.ntotal {
            tracing::info!(ntrain = nt, ntotal = snapshot.ntotal, "index is current, nothing to build");
            return Ok((None, nt));
        }
        // Same training size: extend a disk copy of the current index rather
        // than touching the live one under in-flight searches.
        let path = registry::path_for(work_dir, &config.index_key, nt);
        tracing::info!(
            path = %path.display(),
            added = n - snapshot.ntotal,
            "reusing training, extending persisted index"
        );
        let mut index = kernel::read_index(&path)?;
        check_index_shape(config, &index)?;
        if index.count() != snapshot.ntotal {
            return Err(DbError::InvalidArgument(format!(
                "persisted index covers {} rows, the live index covers {}",
                index.count(),
                snapshot.ntotal
            )));
        }
        index.add(&snapshot.data[snapshot.ntotal * dim..])?;
        return Ok((Some(index), nt));
    }

    let mut index = Index::factory(dim, &config.index_key, config.metric)?;
    tracing::info!(ntrain = nt, "training index");
    index.train(&snapshot.data[..nt * dim])?;
    index.set_params(&config.query_params)?;
    tracing::info!(rows = n, "indexing base");
    index.add(&snapshot.data)?;
    Ok((Some(index), nt))
}

pub(crate) fn check_index_shape(config: &DbConfig, index: &Index) -> Result<()> {
    if index.dim() != config.dim || index.metric() != config.metric {
        return Err(DbError::InvalidArgument(format!(
            "persisted index has dim {} metric {}, database expects dim {} metric {}",
            index.dim(),
            index.metric().code(),
            config.dim,
            config.metric.code()
        )));
    }
    Ok(())
}
