//! The index kernel: everything the database core needs from an ANN index.
//!
//! Two families are understood by [`Index::factory`]: `"Flat"`, a pure exact
//! scan, and `"IVF<nlist>,Flat"`, an inverted-file index with flat posting
//! lists. Kernel ids are assigned sequentially in `add` order, so when the
//! whole base is added front to back the id of a result is its row index.

mod flat;
mod io;
mod ivf;

pub use flat::FlatIndex;
pub use io::{read_index, write_index};
pub use ivf::IvfFlatIndex;

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::simd;

/// Id placed in unfilled result slots.
pub const EMPTY_ID: i64 = -1;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Metric 0. Larger distances are better.
    InnerProduct,
    /// Metric 1 (squared Euclidean). Smaller distances are better.
    L2,
}

impl Metric {
    /// Decodes the raw wire code: 0 is inner product, 1 is L2.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Metric::InnerProduct),
            1 => Some(Metric::L2),
            _ => None,
        }
    }

    pub fn code(self) -> i32 {
        match self {
            Metric::InnerProduct => 0,
            Metric::L2 => 1,
        }
    }

    /// Whether `candidate` beats `incumbent` under this metric's ordering.
    pub fn improves(self, candidate: f32, incumbent: f32) -> bool {
        match self {
            Metric::InnerProduct => candidate > incumbent,
            Metric::L2 => candidate < incumbent,
        }
    }

    /// Distance between two rows of equal dimension.
    pub(crate) fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Metric::InnerProduct => simd::dot(a, b),
            Metric::L2 => simd::l2_sq(a, b),
        }
    }

    /// Assignment distance where smaller is always closer, used for routing
    /// rows to centroids.
    pub(crate) fn rank_distance(self, centroid: &[f32], vector: &[f32]) -> f32 {
        match self {
            Metric::InnerProduct => -simd::dot(centroid, vector),
            Metric::L2 => simd::l2_sq(centroid, vector),
        }
    }

    /// Sort key where smaller is always better, regardless of metric.
    fn rank(self, distance: f32) -> f32 {
        match self {
            Metric::InnerProduct => -distance,
            Metric::L2 => distance,
        }
    }
}

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("unknown index factory {0:?}")]
    UnknownFactory(String),

    #[error("unknown query parameter {0:?}")]
    UnknownParameter(String),

    #[error("index is not trained")]
    NotTrained,

    #[error("training set is empty")]
    EmptyTrainingSet,

    #[error("index is already trained")]
    AlreadyTrained,

    #[error("input length {len} is not a multiple of dimension {dim}")]
    RaggedInput { len: usize, dim: usize },

    #[error("index file {path} is unreadable: {reason}")]
    CorruptIndexFile { path: PathBuf, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Clone, Serialize, Deserialize)]
pub enum Index {
    Flat(FlatIndex),
    IvfFlat(IvfFlatIndex),
}

impl Index {
    /// Builds a fresh, empty index from an opaque factory string. `dim` must
    /// be positive; the database validates this at open.
    pub fn factory(dim: usize, index_key: &str, metric: Metric) -> Result<Self, KernelError> {
        debug_assert!(dim > 0);
        if index_key == "Flat" {
            return Ok(Index::Flat(FlatIndex::new(dim, metric)));
        }
        if let Some(rest) = index_key.strip_prefix("IVF") {
            if let Some((nlist, "Flat")) = rest.split_once(',') {
                if let Ok(nlist) = nlist.parse::<usize>() {
                    if nlist > 0 {
                        return Ok(Index::IvfFlat(IvfFlatIndex::new(dim, nlist, metric)));
                    }
                }
            }
        }
        Err(KernelError::UnknownFactory(index_key.to_string()))
    }

    /// Number of rows the index covers.
    pub fn count(&self) -> usize {
        match self {
            Index::Flat(index) => index.count(),
            Index::IvfFlat(index) => index.count(),
        }
    }

    pub fn dim(&self) -> usize {
        match self {
            Index::Flat(index) => index.dim(),
            Index::IvfFlat(index) => index.dim(),
        }
    }

    pub fn metric(&self) -> Metric {
        match self {
            Index::Flat(index) => index.metric(),
            Index::IvfFlat(index) => index.metric(),
        }
    }

    /// True iff searching this index already returns exact distances.
    pub fn is_exact(&self) -> bool {
        matches!(self, Index::Flat(_))
    }

    pub fn train(&mut self, x: &[f32]) -> Result<(), KernelError> {
        match self {
            Index::Flat(_) => Ok(()),
            Index::IvfFlat(index) => index.train(x),
        }
    }

    pub fn add(&mut self, x: &[f32]) -> Result<(), KernelError> {
        match self {
            Index::Flat(index) => index.add(x),
            Index::IvfFlat(index) => index.add(x),
        }
    }

    /// Top-`k` per query, best-first under the metric. Unfilled slots carry
    /// id [`EMPTY_ID`] and distance `0.0`.
    pub fn search(
        &self,
        nq: usize,
        q: &[f32],
        k: usize,
    ) -> Result<(Vec<f32>, Vec<i64>), KernelError> {
        match self {
            Index::Flat(index) => index.search(nq, q, k),
            Index::IvfFlat(index) => index.search(nq, q, k),
        }
    }

    /// Applies an opaque tuning string. The IVF family understands
    /// `"nprobe=<n>"`; keys are comma-separated. The empty string is a no-op.
    pub fn set_params(&mut self, params: &str) -> Result<(), KernelError> {
        if params.trim().is_empty() {
            return Ok(());
        }
        match self {
            Index::Flat(_) => Err(KernelError::UnknownParameter(params.to_string())),
            Index::IvfFlat(index) => index.set_params(params),
        }
    }
}

fn check_rows(x: &[f32], dim: usize) -> Result<usize, KernelError> {
    if dim == 0 || x.len() % dim != 0 {
        return Err(KernelError::RaggedInput { len: x.len(), dim });
    }
    Ok(x.len() / dim)
}

struct Slot {
    rank: f32,
    distance: f32,
    id: i64,
}

impl PartialEq for Slot {
    fn eq(&self, other: &Self) -> bool {
        self.rank == other.rank
    }
}

impl Eq for Slot {}

impl PartialOrd for Slot {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Slot {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank.partial_cmp(&other.rank).unwrap_or(Ordering::Equal)
    }
}

/// Bounded best-`k` accumulator; the heap keeps the current worst on top.
pub(crate) struct TopK {
    metric: Metric,
    k: usize,
    heap: BinaryHeap<Slot>,
}

impl TopK {
    pub(crate) fn new(metric: Metric, k: usize) -> Self {
        Self {
            metric,
            k,
            heap: BinaryHeap::with_capacity(k + 1),
        }
    }

    pub(crate) fn push(&mut self, distance: f32, id: i64) {
        if self.k == 0 {
            return;
        }
        let rank = self.metric.rank(distance);
        if self.heap.len() == self.k {
            match self.heap.peek() {
                Some(worst) if rank < worst.rank => {
                    self.heap.pop();
                }
                _ => return,
            }
        }
        self.heap.push(Slot { rank, distance, id });
    }

    /// Drains into `(distances, ids)` of exactly `k` slots, best-first.
    pub(crate) fn drain_into(self, distances: &mut Vec<f32>, ids: &mut Vec<i64>) {
        let k = self.k;
        let filled = self.heap.len();
        for slot in self.heap.into_sorted_vec() {
            distances.push(slot.distance);
            ids.push(slot.id);
        }
        for _ in filled..k {
            distances.push(0.0);
            ids.push(EMPTY_ID);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(metric: Metric, k: usize, entries: &[(f32, i64)]) -> (Vec<f32>, Vec<i64>) {
        let mut top = TopK::new(metric, k);
        for &(d, id) in entries {
            top.push(d, id);
        }
        let mut distances = Vec::new();
        let mut ids = Vec::new();
        top.drain_into(&mut distances, &mut ids);
        (distances, ids)
    }

    #[test]
    fn topk_l2_prefers_small_distances() {
        let (d, i) = collect(Metric::L2, 2, &[(3.0, 0), (1.0, 1), (2.0, 2)]);
        assert_eq!(i, vec![1, 2]);
        assert_eq!(d, vec![1.0, 2.0]);
    }

    #[test]
    fn topk_inner_product_prefers_large_distances() {
        let (d, i) = collect(Metric::InnerProduct, 2, &[(3.0, 0), (1.0, 1), (2.0, 2)]);
        assert_eq!(i, vec![0, 2]);
        assert_eq!(d, vec![3.0, 2.0]);
    }

    #[test]
    fn topk_pads_missing_slots() {
        let (d, i) = collect(Metric::L2, 4, &[(1.0, 7)]);
        assert_eq!(i, vec![7, EMPTY_ID, EMPTY_ID, EMPTY_ID]);
        assert_eq!(d, vec![1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn factory_parses_known_families() {
        assert!(Index::factory(4, "Flat", Metric::L2).unwrap().is_exact());
        let ivf = Index::factory(4, "IVF16,Flat", Metric::L2).unwrap();
        assert!(!ivf.is_exact());
        assert!(matches!(
            Index::factory(4, "HNSW32", Metric::L2),
            Err(KernelError::UnknownFactory(_))
        ));
        assert!(matches!(
            Index::factory(4, "IVF0,Flat", Metric::L2),
            Err(KernelError::UnknownFactory(_))
        ));
    }

    #[test]
    fn metric_codes_roundtrip() {
        assert_eq!(Metric::from_code(0), Some(Metric::InnerProduct));
        assert_eq!(Metric::from_code(1), Some(Metric::L2));
        assert_eq!(Metric::from_code(2), None);
        assert_eq!(Metric::InnerProduct.code(), 0);
        assert_eq!(Metric::L2.code(), 1);
    }

    #[test]
    fn set_params_rejects_unknown_keys() {
        let mut ivf = Index::factory(4, "IVF16,Flat", Metric::L2).unwrap();
        assert!(ivf.set_params("nprobe=8").is_ok());
        assert!(ivf.set_params("").is_ok());
        assert!(matches!(
            ivf.set_params("efSearch=10"),
            Err(KernelError::UnknownParameter(_))
        ));
    }
}
