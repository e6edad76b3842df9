use serde::{Deserialize, Serialize};

use super::{check_rows, KernelError, Metric, TopK};

/// Exact linear scan over densely stored rows.
#[derive(Clone, Serialize, Deserialize)]
pub struct FlatIndex {
    dim: usize,
    metric: Metric,
    data: Vec<f32>,
}

impl FlatIndex {
    pub fn new(dim: usize, metric: Metric) -> Self {
        Self {
            dim,
            metric,
            data: Vec::new(),
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn count(&self) -> usize {
        self.data.len() / self.dim
    }

    pub fn add(&mut self, x: &[f32]) -> Result<(), KernelError> {
        check_rows(x, self.dim)?;
        self.data.extend_from_slice(x);
        Ok(())
    }

    pub fn search(
        &self,
        nq: usize,
        q: &[f32],
        k: usize,
    ) -> Result<(Vec<f32>, Vec<i64>), KernelError> {
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
            for (row, vector) in self.data.chunks_exact(self.dim).enumerate() {
                top.push(self.metric.distance(vector, query), row as i64);
            }
            top.drain_into(&mut distances, &mut ids);
        }
        Ok((distances, ids))
    }
}
