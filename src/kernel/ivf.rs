use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::simd;

use super::{check_rows, KernelError, Metric, TopK};

const MAX_TRAINING_ITERS: usize = 15;
const SEED: u64 = 0x9E37_79B9;

/// Inverted-file index with flat posting lists. Training runs k-means over
/// the supplied rows; `add` routes each row to its nearest centroid; `search`
/// scans the `nprobe` most promising lists.
#[derive(Clone, Serialize, Deserialize)]
pub struct IvfFlatIndex {
    dim: usize,
    metric: Metric,
    nlist: usize,
    nprobe: usize,
    centroids: Vec<f32>,
    lists: Vec<PostingList>,
    count: usize,
}

#[derive(Clone, Default, Serialize, Deserialize)]
struct PostingList {
    ids: Vec<i64>,
    vectors: Vec<f32>,
}

impl IvfFlatIndex {
    pub fn new(dim: usize, nlist: usize, metric: Metric) -> Self {
        Self {
            dim,
            metric,
            nlist,
            nprobe: 1,
            centroids: Vec::new(),
            lists: Vec::new(),
            count: 0,
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn count(&self) -> usize {
        self.count
    }

    fn is_trained(&self) -> bool {
        !self.centroids.is_empty()
    }

    pub fn train(&mut self, x: &[f32]) -> Result<(), KernelError> {
        if self.is_trained() {
            return Err(KernelError::AlreadyTrained);
        }
        let nt = check_rows(x, self.dim)?;
        if nt == 0 {
            return Err(KernelError::EmptyTrainingSet);
        }
        let k = self.nlist.min(nt);
        self.centroids = kmeans(x, self.dim, k, self.metric);
        self.lists = vec![PostingList::default(); self.centroids.len() / self.dim];
        Ok(())
    }

    pub fn add(&mut self, x: &[f32]) -> Result<(), KernelError> {
        if !self.is_trained() {
            return Err(KernelError::NotTrained);
        }
        let rows = check_rows(x, self.dim)?;
        for row in 0..rows {
            let vector = &x[row * self.dim..(row + 1) * self.dim];
            let list = self.nearest_centroid(vector);
            self.lists[list].ids.push(self.count as i64);
            self.lists[list].vectors.extend_from_slice(vector);
            self.count += 1;
        }
        Ok(())
    }

    pub fn search(
        &self,
        nq: usize,
        q: &[f32],
        k: usize,
    ) -> Result<(Vec<f32>, Vec<i64>), KernelError> {
        if !self.is_trained() {
            return Err(KernelError::NotTrained);
        }
        if q.len() != nq * self.dim {
            return Err(KernelError::RaggedInput {
                len: q.len(),
                dim: self.dim,
            });
        }
        let mut distances = Vec::with_capacity(nq * k);
        let mut ids = Vec::with_capacity(nq * k);
        for query in q.chunks_exact(self.dim).take(nq) {
            let mut top = TopK::new(self.metric, k);
            for list in self.probe_order(query) {
                let list = &self.lists[list];
                for (slot, vector) in list.vectors.chunks_exact(self.dim).enumerate() {
                    top.push(self.metric.distance(vector, query), list.ids[slot]);
                }
            }
            top.drain_into(&mut distances, &mut ids);
        }
        Ok((distances, ids))
    }

    pub fn set_params(&mut self, params: &str) -> Result<(), KernelError> {
        for param in params.split(',') {
            let param = param.trim();
            if param.is_empty() {
                continue;
            }
            match param.split_once('=') {
                Some(("nprobe", value)) => {
                    let nprobe: usize = value
                        .trim()
                        .parse()
                        .map_err(|_| KernelError::UnknownParameter(param.to_string()))?;
                    if nprobe == 0 {
                        return Err(KernelError::UnknownParameter(param.to_string()));
                    }
                    self.nprobe = nprobe;
                }
                _ => return Err(KernelError::UnknownParameter(param.to_string())),
            }
        }
        Ok(())
    }

    fn nearest_centroid(&self, vector: &[f32]) -> usize {
        let mut best = 0usize;
        let mut best_distance = f32::INFINITY;
        for (idx, centroid) in self.centroids.chunks_exact(self.dim).enumerate() {
            let distance = self.metric.rank_distance(centroid, vector);
            if distance < best_distance {
                best_distance = distance;
                best = idx;
            }
        }
        best
    }

    /// The `nprobe` most promising lists for a query, best first.
    fn probe_order(&self, query: &[f32]) -> Vec<usize> {
        let nprobe = self.nprobe.min(self.lists.len());
        let mut top = TopK::new(self.metric, nprobe);
        for (idx, centroid) in self.centroids.chunks_exact(self.dim).enumerate() {
            top.push(self.metric.distance(centroid, query), idx as i64);
        }
        let mut distances = Vec::with_capacity(nprobe);
        let mut ids = Vec::with_capacity(nprobe);
        top.drain_into(&mut distances, &mut ids);
        ids.into_iter()
            .filter(|&id| id >= 0)
            .map(|id| id as usize)
            .collect()
    }
}

fn kmeans(x: &[f32], dim: usize, k: usize, metric: Metric) -> Vec<f32> {
    let rows = x.len() / dim;
    let mut centroids = init_kmeans_pp(x, dim, k);
    let mut assignment = vec![0usize; rows];
    for _ in 0..MAX_TRAINING_ITERS {
        for row in 0..rows {
            let vector = &x[row * dim..(row + 1) * dim];
            let mut best = 0usize;
            let mut best_distance = f32::INFINITY;
            for (idx, centroid) in centroids.chunks_exact(dim).enumerate() {
                let distance = metric.rank_distance(centroid, vector);
                if distance < best_distance {
                    best_distance = distance;
                    best = idx;
                }
            }
            assignment[row] = best;
        }
        let mut sums = vec![0.0f32; centroids.len()];
        let mut sizes = vec![0usize; centroids.len() / dim];
        for (row, &list) in assignment.iter().enumerate() {
            sizes[list] += 1;
            let vector = &x[row * dim..(row + 1) * dim];
            for (dst, &src) in sums[list * dim..(list + 1) * dim].iter_mut().zip(vector) {
                *dst += src;
            }
        }
        for (list, &size) in sizes.iter().enumerate() {
            if size == 0 {
                continue;
            }
            let inv = 1.0f32 / size as f32;
            for (dst, &src) in centroids[list * dim..(list + 1) * dim]
                .iter_mut()
                .zip(&sums[list * dim..(list + 1) * dim])
            {
                *dst = src * inv;
            }
        }
    }
    centroids
}

/// k-means++ seeding: the first centroid is drawn uniformly, each later one
/// with probability proportional to its squared distance from the chosen set.
fn init_kmeans_pp(x: &[f32], dim: usize, k: usize) -> Vec<f32> {
    let rows = x.len() / dim;
    let mut rng = StdRng::seed_from_u64(SEED);
    let mut centroids = Vec::with_capacity(k * dim);
    let first = rng.gen_range(0..rows);
    centroids.extend_from_slice(&x[first * dim..(first + 1) * dim]);
    while centroids.len() < k * dim {
        let mut weights = Vec::with_capacity(rows);
        let mut total = 0.0f32;
        for row in 0..rows {
            let vector = &x[row * dim..(row + 1) * dim];
            let mut nearest = f32::INFINITY;
            for centroid in centroids.chunks_exact(dim) {
                nearest = nearest.min(simd::l2_sq(centroid, vector));
            }
            weights.push(nearest);
            total += nearest;
        }
        if total <= f32::EPSILON {
            break;
        }
        let mut target = rng.gen::<f32>() * total;
        let mut chosen = rows - 1;
        for (row, weight) in weights.iter().enumerate() {
            target -= *weight;
            if target <= 0.0 {
                chosen = row;
                break;
            }
        }
        centroids.extend_from_slice(&x[chosen * dim..(chosen + 1) * dim]);
    }
    centroids
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn clustered_rows(clusters: usize, per_cluster: usize, dim: usize) -> Vec<f32> {
        let mut rng = StdRng::seed_from_u64(11);
        let mut rows = Vec::with_capacity(clusters * per_cluster * dim);
        for cluster in 0..clusters {
            let center = cluster as f32 * 100.0;
            for _ in 0..per_cluster {
                for _ in 0..dim {
                    rows.push(center + rng.gen::<f32>());
                }
            }
        }
        rows
    }

    #[test]
    fn add_before_train_is_rejected() {
        let mut index = IvfFlatIndex::new(4, 8, Metric::L2);
        assert!(matches!(
            index.add(&[0.0; 4]),
            Err(KernelError::NotTrained)
        ));
    }

    #[test]
    fn train_twice_is_rejected() {
        let mut index = IvfFlatIndex::new(2, 2, Metric::L2);
        index.train(&clustered_rows(2, 8, 2)).unwrap();
        assert!(matches!(
            index.train(&[0.0, 0.0]),
            Err(KernelError::AlreadyTrained)
        ));
    }

    #[test]
    fn full_probe_recovers_exact_neighbor() {
        let dim = 4;
        let rows = clustered_rows(4, 32, dim);
        let mut index = IvfFlatIndex::new(dim, 4, Metric::L2);
        index.train(&rows).unwrap();
        index.add(&rows).unwrap();
        index.set_params("nprobe=4").unwrap();
        assert_eq!(index.count(), 128);

        // Query a stored row exactly; probing every list must find it.
        let target = 77usize;
        let query = &rows[target * dim..(target + 1) * dim];
        let (d, i) = index.search(1, query, 5).unwrap();
        assert_eq!(i[0], target as i64);
        assert!(d[0].abs() < 1e-5);
    }

    #[test]
    fn probing_is_limited_by_nprobe() {
        let dim = 2;
        let rows = clustered_rows(8, 16, dim);
        let mut index = IvfFlatIndex::new(dim, 8, Metric::L2);
        index.train(&rows).unwrap();
        index.add(&rows).unwrap();
        // One list probed: fewer candidates than a full scan, slots still
        // well-formed.
        let (d, i) = index.search(1, &rows[0..dim], 3).unwrap();
        assert_eq!(d.len(), 3);
        assert_eq!(i.len(), 3);
        for &id in &i {
            assert!(id >= -1 && id < 128);
        }
        index.set_params("nprobe=8").unwrap();
        let (_, all) = index.search(1, &rows[0..dim], 3).unwrap();
        assert_eq!(all[0], 0, "probing every list must recover the row itself");
    }

    #[test]
    fn sequential_ids_follow_add_order() {
        let dim = 2;
        let rows = clustered_rows(2, 4, dim);
        let mut index = IvfFlatIndex::new(dim, 2, Metric::L2);
        index.train(&rows).unwrap();
        index.add(&rows[..4 * dim]).unwrap();
        index.add(&rows[4 * dim..]).unwrap();
        index.set_params("nprobe=2").unwrap();
        for target in [0usize, 3, 5, 7] {
            let query = &rows[target * dim..(target + 1) * dim];
            let (_, i) = index.search(1, query, 1).unwrap();
            assert_eq!(i[0], target as i64);
        }
    }
}
