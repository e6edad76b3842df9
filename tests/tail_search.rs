use proxima::{Db, DbConfig, Metric};
use rand::{rngs::StdRng, Rng, SeedableRng};

fn ivf_config(dim: usize, metric: Metric) -> DbConfig {
    let mut config = DbConfig::new(dim, metric, "IVF4,Flat", "nprobe=4");
    config.max_train = 64;
    config
}

#[test]
fn rows_added_after_activation_win_over_the_index() {
    let dim = 2;
    let dir = tempfile::tempdir().unwrap();
    let mut rng = StdRng::seed_from_u64(17);

    let db = Db::open(dir.path(), ivf_config(dim, Metric::L2)).unwrap();
    let rows: Vec<f32> = (0..200 * dim).map(|_| rng.gen::<f32>()).collect();
    let ids: Vec<i64> = (0..200).collect();
    db.add_with_ids(&ids, &rows).unwrap();

    let (candidate, ntrain) = db.build_index().unwrap();
    db.activate_index(candidate, ntrain).unwrap();
    assert_eq!(db.ntotal(), 200);

    // New rows far from everything the index covers.
    let mut far = Vec::new();
    let mut far_ids = Vec::new();
    for i in 0..50usize {
        far.push(1.0e6 + i as f32);
        far.push(0.0);
        far_ids.push(200 + i as i64);
    }
    db.add_with_ids(&far_ids, &far).unwrap();
    assert_eq!(db.ntotal(), 200, "adds must not grow the active index");
    assert_eq!(db.len(), 250);

    for i in 0..50usize {
        let query = &far[i * dim..(i + 1) * dim];
        let found = db.search(1, query).unwrap();
        assert_eq!(found.ids, vec![200 + i as i64], "query {i} must hit its own row");
        assert_eq!(found.distances, vec![0.0]);
    }
}

#[test]
fn reported_distances_are_exact() {
    let dim = 6;
    let dir = tempfile::tempdir().unwrap();
    let mut rng = StdRng::seed_from_u64(29);

    let db = Db::open(dir.path(), ivf_config(dim, Metric::L2)).unwrap();
    let rows: Vec<f32> = (0..300 * dim).map(|_| rng.gen::<f32>()).collect();
    let ids: Vec<i64> = (0..300).collect();
    db.add_with_ids(&ids, &rows).unwrap();
    let (candidate, ntrain) = db.build_index().unwrap();
    db.activate_index(candidate, ntrain).unwrap();

    // Leave a tail as well, so both phases contribute.
    let extra: Vec<f32> = (0..40 * dim).map(|_| rng.gen::<f32>()).collect();
    let extra_ids: Vec<i64> = (300..340).collect();
    db.add_with_ids(&extra_ids, &extra).unwrap();

    let mut all = rows.clone();
    all.extend_from_slice(&extra);

    for _ in 0..20 {
        let query: Vec<f32> = (0..dim).map(|_| rng.gen::<f32>()).collect();
        let found = db.search(1, &query).unwrap();
        let id = found.ids[0];
        assert!(id >= 0);
        let row = &all[id as usize * dim..(id as usize + 1) * dim];
        let exact: f32 = row
            .iter()
            .zip(&query)
            .map(|(a, b)| (a - b) * (a - b))
            .sum();
        assert!(
            (found.distances[0] - exact).abs() < 1e-4,
            "distance {} must equal the exact distance {exact} to row {id}",
            found.distances[0]
        );
    }
}

#[test]
fn inner_product_merge_prefers_the_larger_dot() {
    let dim = 2;
    let dir = tempfile::tempdir().unwrap();
    let mut rng = StdRng::seed_from_u64(41);

    let db = Db::open(dir.path(), ivf_config(dim, Metric::InnerProduct)).unwrap();
    // Modest magnitudes in the indexed prefix.
    let rows: Vec<f32> = (0..100 * dim).map(|_| rng.gen::<f32>()).collect();
    let ids: Vec<i64> = (0..100).collect();
    db.add_with_ids(&ids, &rows).unwrap();
    let (candidate, ntrain) = db.build_index().unwrap();
    db.activate_index(candidate, ntrain).unwrap();

    // A tail row with a far larger dot against the query direction.
    db.add_with_ids(&[100], &[100.0, 0.0]).unwrap();

    let found = db.search(1, &[1.0, 0.0]).unwrap();
    assert_eq!(found.ids, vec![100]);
    assert!((found.distances[0] - 100.0).abs() < 1e-3);
}

#[test]
fn multi_query_batches_merge_per_query() {
    let dim = 2;
    let dir = tempfile::tempdir().unwrap();

    let db = Db::open(dir.path(), ivf_config(dim, Metric::L2)).unwrap();
    let mut rng = StdRng::seed_from_u64(53);
    let rows: Vec<f32> = (0..120 * dim).map(|_| rng.gen::<f32>()).collect();
    let ids: Vec<i64> = (0..120).collect();
    db.add_with_ids(&ids, &rows).unwrap();
    let (candidate, ntrain) = db.build_index().unwrap();
    db.activate_index(candidate, ntrain).unwrap();

    db.add_with_ids(&[120], &[500.0, 500.0]).unwrap();

    // First query lives in the indexed prefix, second in the tail.
    let indexed_probe = &rows[30 * dim..31 * dim];
    let mut batch = indexed_probe.to_vec();
    batch.extend_from_slice(&[500.0, 500.0]);

    let found = db.search(2, &batch).unwrap();
    assert_eq!(found.ids, vec![30, 120]);
    assert!(found.distances[0].abs() < 1e-4);
    assert!(found.distances[1].abs() < 1e-4);
}
