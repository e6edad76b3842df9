use serde::{Deserialize, Serialize};

use crate::error::{DbError, Result};
use crate::kernel::Metric;

/// Default cap on the number of rows used to train an index. Sized for
/// IVF4096 over a one-million-row base.
pub const DEFAULT_MAX_TRAIN: usize = 160_000;

/// Default candidate fan-out per query before refinement and merging.
pub const DEFAULT_FANOUT: usize = 100;

/// Open-time database configuration. `index_key` and `query_params` are
/// opaque to the core and interpreted by the index kernel.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DbConfig {
    pub dim: usize,
    pub metric: Metric,
    pub index_key: String,
    #[serde(default)]
    pub query_params: String,
    #[serde(default = "default_max_train")]
    pub max_train: usize,
    #[serde(default = "default_fanout")]
    pub fanout: usize,
}

fn default_max_train() -> usize {
    DEFAULT_MAX_TRAIN
}

fn default_fanout() -> usize {
    DEFAULT_FANOUT
}

impl DbConfig {
    pub fn new(
        dim: usize,
        metric: Metric,
        index_key: impl Into<String>,
        query_params: impl Into<String>,
    ) -> Self {
        Self {
            dim,
            metric,
            index_key: index_key.into(),
            query_params: query_params.into(),
            max_train: DEFAULT_MAX_TRAIN,
            fanout: DEFAULT_FANOUT,
        }
    }

    /// Like [`DbConfig::new`], but takes the raw metric code callers hand
    /// across language boundaries: 0 is inner product, 1 is L2. Any other
    /// code is rejected.
    pub fn from_metric_code(
        dim: usize,
        metric: i32,
        index_key: impl Into<String>,
        query_params: impl Into<String>,
    ) -> Result<Self> {
        let metric = Metric::from_code(metric)
            .ok_or_else(|| DbError::InvalidArgument(format!("unknown metric code {metric}")))?;
        Ok(Self::new(dim, metric, index_key, query_params))
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.dim == 0 {
            return Err(DbError::InvalidArgument("dim must be positive".into()));
        }
        if self.index_key.is_empty() {
            return Err(DbError::InvalidArgument("index_key must not be empty".into()));
        }
        if self.max_train == 0 {
            return Err(DbError::InvalidArgument("max_train must be positive".into()));
        }
        if self.fanout == 0 {
            return Err(DbError::InvalidArgument("fanout must be positive".into()));
        }
        Ok(())
    }

    pub(crate) fn is_flat(&self) -> bool {
        self.index_key == "Flat"
    }
}
