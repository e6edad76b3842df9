//! Two-phase query execution: candidates from the active index, refined to
//! exact distances per query, fused with an exact scan over the rows the
//! index does not yet cover. Returned ids are base row indices.

use rayon::prelude::*;

use crate::config::DbConfig;
use crate::db::DbState;
use crate::error::Result;
use crate::kernel::{Index, EMPTY_ID};

pub struct SearchResult {
    /// Best distance per query; `0.0` when the query found nothing.
    pub distances: Vec<f32>,
    /// Best base row index per query; `-1` when the query found nothing.
    pub ids: Vec<i64>,
}

pub(crate) fn run(
    config: &DbConfig,
    state: &DbState,
    nq: usize,
    xq: &[f32],
) -> Result<SearchResult> {
    let dim = config.dim;
    let metric = config.metric;
    let k = config.fanout;
    let n = state.store.len();

    let mut distances = vec![0.0f32; nq];
    let mut ids = vec![EMPTY_ID; nq];

    if let Some(index) = &state.index {
        let (d, i) = index.search(nq, xq, k)?;
        if index.is_exact() {
            for query in 0..nq {
                ids[query] = i[query * k];
                distances[query] = d[query * k];
            }
        } else {
            // Each query gets a transient exact index over its candidate rows;
            // the winner's position maps back to the original candidate id.
            let refined: Vec<Option<(f32, i64)>> = (0..nq)
                .into_par_iter()
                .map(|query| {
                    refine(
                        config,
                        state,
                        &i[query * k..(query + 1) * k],
                        &xq[query * dim..(query + 1) * dim],
                    )
                })
                .collect::<Result<_>>()?;
            for (query, best) in refined.into_iter().enumerate() {
                if let Some((distance, id)) = best {
                    distances[query] = distance;
                    ids[query] = id;
                }
            }
        }
    }

    let ntotal = state.index.as_ref().map_or(0, Index::count);
    if ntotal < n {
        // One exact index over the uncovered rows, shared by every query.
        let mut tail = Index::factory(dim, "Flat", metric)?;
        tail.add(state.store.vectors_from(ntotal))?;
        let (d, i) = tail.search(nq, xq, k)?;
        for query in 0..nq {
            let top = i[query * k];
            if top < 0 {
                continue;
            }
            let candidate = (d[query * k], top + ntotal as i64);
            if ids[query] == EMPTY_ID || metric.improves(candidate.0, distances[query]) {
                distances[query] = candidate.0;
                ids[query] = candidate.1;
            }
        }
    }

    Ok(SearchResult { distances, ids })
}

fn refine(
    config: &DbConfig,
    state: &DbState,
    candidates: &[i64],
    query: &[f32],
) -> Result<Option<(f32, i64)>> {
    let dim = config.dim;
    let valid: Vec<i64> = candidates.iter().copied().filter(|&id| id >= 0).collect();
    if valid.is_empty() {
        return Ok(None);
    }
    let mut exact = Index::factory(dim, "Flat", config.metric)?;
    let mut rows = Vec::with_capacity(valid.len() * dim);
    for &id in &valid {
        rows.extend_from_slice(state.store.row(id as usize));
    }
    exact.add(&rows)?;
    let (d, i) = exact.search(1, query, valid.len())?;
    if i[0] < 0 {
        return Ok(None);
    }
    Ok(Some((d[0], valid[i[0] as usize])))
}
