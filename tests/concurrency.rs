use std::sync::atomic::{AtomicBool, Ordering};

use proxima::{Db, DbConfig, Metric};
use rand::{rngs::StdRng, Rng, SeedableRng};

#[test]
fn searches_run_beside_a_writer() {
    let dim = 4;
    let dir = tempfile::tempdir().unwrap();
    let db = Db::open(dir.path(), DbConfig::new(dim, Metric::L2, "Flat", "")).unwrap();
    db.add_with_ids(&[0], &[0.0; 4]).unwrap();

    let done = AtomicBool::new(false);
    std::thread::scope(|scope| {
        let writer_db = db.clone();
        let writer = scope.spawn(|| {
            let db = writer_db;
            let mut rng = StdRng::seed_from_u64(61);
            for batch in 0..50i64 {
                let ids: Vec<i64> = (0..10).map(|i| 1 + batch * 10 + i).collect();
                let rows: Vec<f32> = (0..10 * dim).map(|_| rng.gen::<f32>()).collect();
                db.add_with_ids(&ids, &rows).unwrap();
            }
            done.store(true, Ordering::Release);
        });

        for _ in 0..2 {
            let search_db = db.clone();
            scope.spawn(|| {
                let db = search_db;
                let mut last_len = 0usize;
                while !done.load(Ordering::Acquire) {
                    let found = db.search(1, &[0.25; 4]).unwrap();
                    let id = found.ids[0];
                    let len = db.len();
                    assert!(id >= 0, "a seeded database never returns the sentinel");
                    assert!((id as usize) < len);
                    assert!(len >= last_len, "visible size must never shrink");
                    last_len = len;
                }
            });
        }

        writer.join().unwrap();
    });

    assert_eq!(db.len(), 501);
}

#[test]
fn builds_and_activations_run_beside_searches() {
    let dim = 4;
    let dir = tempfile::tempdir().unwrap();
    let mut config = DbConfig::new(dim, Metric::L2, "IVF4,Flat", "nprobe=4");
    config.max_train = 64;
    let db = Db::open(dir.path(), config).unwrap();

    let mut rng = StdRng::seed_from_u64(67);
    let rows: Vec<f32> = (0..200 * dim).map(|_| rng.gen::<f32>()).collect();
    let ids: Vec<i64> = (0..200).collect();
    db.add_with_ids(&ids, &rows).unwrap();

    let done = AtomicBool::new(false);
    std::thread::scope(|scope| {
        let maintenance_db = db.clone();
        let maintenance = scope.spawn(|| {
            let db = maintenance_db;
            let mut rng = StdRng::seed_from_u64(71);
            for round in 0..5i64 {
                let ids: Vec<i64> = (0..20).map(|i| 200 + round * 20 + i).collect();
                let rows: Vec<f32> = (0..20 * dim).map(|_| rng.gen::<f32>()).collect();
                db.add_with_ids(&ids, &rows).unwrap();
                let (candidate, ntrain) = db.try_build_index(0).unwrap();
                db.activate_index(candidate, ntrain).unwrap();
            }
            done.store(true, Ordering::Release);
        });

        let search_db = db.clone();
        scope.spawn(|| {
            let db = search_db;
            while !done.load(Ordering::Acquire) {
                let found = db.search(1, &[0.5; 4]).unwrap();
                assert!(found.ids[0] >= 0);
                assert!((found.ids[0] as usize) < db.len());
            }
        });

        maintenance.join().unwrap();
    });

    assert_eq!(db.len(), 300);
    assert_eq!(db.ntotal(), 300);

    let (candidate, ntrain) = db.try_build_index(0).unwrap();
    assert!(candidate.is_none(), "the index already covers the base");
    assert_eq!(ntrain, 64);
}
