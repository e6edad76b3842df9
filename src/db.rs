use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::base::BaseStore;
use crate::builder::{self, BuildSnapshot};
use crate::config::DbConfig;
use crate::error::{DbError, Result};
use crate::kernel::{self, Index};
use crate::registry;
use crate::search::{self, SearchResult};

/// Handle to a vector database bound to one working directory. Cloning is
/// cheap and shares state; one thread may write while any number search, and
/// an index build can run beside both.
#[derive(Clone)]
pub struct Db {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db")
            .field("work_dir", &self.inner.work_dir)
            .finish_non_exhaustive()
    }
}

struct Inner {
    work_dir: PathBuf,
    config: DbConfig,
    state: RwLock<DbState>,
}

pub(crate) struct DbState {
    pub(crate) store: BaseStore,
    pub(crate) index: Option<Index>,
    pub(crate) ntrain: usize,
}

impl Db {
    /// Opens a database in `work_dir`, creating the directory and base file
    /// if absent. The newest persisted index for `config.index_key` is
    /// loaded when the base still covers its training prefix; the `"Flat"`
    /// configuration instead rebuilds its exact index from the base.
    pub fn open(work_dir: impl AsRef<Path>, config: DbConfig) -> Result<Self> {
        config.validate()?;
        let work_dir = work_dir.as_ref().to_path_buf();
        let store = BaseStore::open(&work_dir, config.dim)?;
        let n = store.len();

        let mut index = None;
        let mut ntrain = 0usize;
        let ntrain_disk = registry::discover_latest(&work_dir, &config.index_key)?;
        if ntrain_disk > 0 && n >= ntrain_disk {
            let path = registry::path_for(&work_dir, &config.index_key, ntrain_disk);
            tracing::info!(path = %path.display(), ntrain = ntrain_disk, "loading index");
            let loaded = kernel::read_index(&path)?;
            builder::check_index_shape(&config, &loaded)?;
            index = Some(loaded);
            ntrain = ntrain_disk;
        } else if config.is_flat() {
            let mut flat = Index::factory(config.dim, &config.index_key, config.metric)?;
            flat.add(store.vectors())?;
            index = Some(flat);
        }

        Ok(Self {
            inner: Arc::new(Inner {
                work_dir,
                config,
                state: RwLock::new(DbState {
                    store,
                    index,
                    ntrain,
                }),
            }),
        })
    }

    /// Appends `nb` records in one write. `ids[i]` tags `xb[i*dim..(i+1)*dim]`.
    /// An empty batch is a no-op. The rows are searchable once this returns;
    /// for the `"Flat"` configuration the live index absorbs them immediately.
    pub fn add_with_ids(&self, ids: &[i64], xb: &[f32]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let dim = self.inner.config.dim;
        if xb.len() != ids.len() * dim {
            return Err(DbError::InvalidArgument(format!(
                "expected {} values for {} rows of dimension {dim}, got {}",
                ids.len() * dim,
                ids.len(),
                xb.len()
            )));
        }
        let mut state = self.inner.state.write();
        state.store.append(ids, xb)?;
        if self.inner.config.is_flat() {
            if let Some(index) = &mut state.index {
                index.add(xb)?;
            }
        }
        Ok(())
    }

    /// Builds a fresh index candidate from the current base. Returns
    /// `(None, ntrain)` when the live index already covers every row at the
    /// right training size. Kernel work runs without holding the state lock.
    pub fn build_index(&self) -> Result<(Option<Index>, usize)> {
        let snapshot = self.snapshot();
        builder::build(&self.inner.config, &self.inner.work_dir, snapshot)
    }

    /// `build_index` guarded by the backlog of uncovered rows: a build only
    /// starts when more than `exhaust_threshold` rows sit outside the live
    /// index. Meant for a periodic maintenance loop.
    pub fn try_build_index(&self, exhaust_threshold: usize) -> Result<(Option<Index>, usize)> {
        let snapshot = {
            let state = self.inner.state.read();
            let n = state.store.len();
            let ntotal = state.index.as_ref().map_or(0, Index::count);
            if n - ntotal <= exhaust_threshold {
                return Ok((None, state.ntrain));
            }
            Self::snapshot_locked(&state)
        };
        builder::build(&self.inner.config, &self.inner.work_dir, snapshot)
    }

    /// Installs a candidate produced by [`Db::build_index`]. The index is
    /// persisted (non-`"Flat"` only) and the superseded file deleted before
    /// the in-memory swap, so a crash in between leaves a loadable file on
    /// disk. `None` is a no-op.
    pub fn activate_index(&self, index: Option<Index>, ntrain: usize) -> Result<()> {
        let Some(mut index) = index else {
            return Ok(());
        };
        if !self.inner.config.is_flat() {
            let new_path = registry::path_for(&self.inner.work_dir, &self.inner.config.index_key, ntrain);
            kernel::write_index(&index, &new_path)?;
            let previous = self.inner.state.read().ntrain;
            if previous != 0 && previous != ntrain {
                let old_path =
                    registry::path_for(&self.inner.work_dir, &self.inner.config.index_key, previous);
                if let Err(err) = std::fs::remove_file(&old_path) {
                    if err.kind() != std::io::ErrorKind::NotFound {
                        let _ = std::fs::remove_file(&new_path);
                        return Err(err.into());
                    }
                }
            }
        }
        let mut state = self.inner.state.write();
        if self.inner.config.is_flat() && index.count() < state.store.len() {
            // Rows appended between the build snapshot and this swap; fold
            // them in so kernel ids keep matching base rows.
            index.add(state.store.vectors_from(index.count()))?;
        }
        let ntotal = index.count();
        state.index = Some(index);
        state.ntrain = ntrain;
        drop(state);
        tracing::info!(ntrain, ntotal, "activated index");
        Ok(())
    }

    /// Nearest neighbor of each of the `nq` query rows in `xq`. Returned ids
    /// are base row indices (`-1` and distance `0.0` when the database is
    /// empty); see [`Db::uid_of`] to recover caller identifiers.
    pub fn search(&self, nq: usize, xq: &[f32]) -> Result<SearchResult> {
        if nq == 0 {
            return Err(DbError::InvalidArgument(
                "search requires at least one query".into(),
            ));
        }
        let dim = self.inner.config.dim;
        if xq.len() != nq * dim {
            return Err(DbError::InvalidArgument(format!(
                "expected {} values for {nq} queries of dimension {dim}, got {}",
                nq * dim,
                xq.len()
            )));
        }
        let state = self.inner.state.read();
        search::run(&self.inner.config, &state, nq, xq)
    }

    /// Number of records in the base.
    pub fn len(&self) -> usize {
        self.inner.state.read().store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dim(&self) -> usize {
        self.inner.config.dim
    }

    pub fn config(&self) -> &DbConfig {
        &self.inner.config
    }

    /// Training size of the live index; 0 when none is active.
    pub fn ntrain(&self) -> usize {
        self.inner.state.read().ntrain
    }

    /// Rows covered by the live index; 0 when none is active.
    pub fn ntotal(&self) -> usize {
        let state = self.inner.state.read();
        state.index.as_ref().map_or(0, Index::count)
    }

    /// Caller identifier of a base row, as recorded by `add_with_ids`.
    pub fn uid_of(&self, row: usize) -> Option<i64> {
        self.inner.state.read().store.uid_of(row)
    }

    /// Base row of a caller identifier; duplicates resolve to the most
    /// recently appended row.
    pub fn row_of(&self, uid: i64) -> Option<usize> {
        self.inner.state.read().store.row_of(uid)
    }

    fn snapshot(&self) -> BuildSnapshot {
        let state = self.inner.state.read();
        Self::snapshot_locked(&state)
    }

    fn snapshot_locked(state: &DbState) -> BuildSnapshot {
        BuildSnapshot {
            n: state.store.len(),
            ntotal: state.index.as_ref().map_or(0, Index::count),
            ntrain: state.ntrain,
            data: state.store.vectors().to_vec(),
        }
    }
}
