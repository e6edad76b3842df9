//! Embeddable approximate-nearest-neighbor vector database.
//!
//! A [`Db`] owns one working directory. Writers append `(i64 id, f32 vector)`
//! records through [`Db::add_with_ids`]; every record lands in the
//! append-only `base.fvecs` file and its in-memory mirror before the call
//! returns. Queries run through [`Db::search`], which fuses candidates from
//! the active ANN index with an exact scan over the rows added since that
//! index was built, refining ANN candidates to exact distances along the way.
//!
//! Index maintenance is explicit and non-blocking: [`Db::try_build_index`]
//! (or [`Db::build_index`]) prepares a candidate from a snapshot of the base
//! on whatever thread the caller chooses, and [`Db::activate_index`] persists
//! it and swaps it in atomically. On restart the newest persisted index is
//! picked up again.
//!
//! ```no_run
//! use proxima::{Db, DbConfig, Metric};
//!
//! # fn main() -> Result<(), proxima::DbError> {
//! let db = Db::open("./vectors", DbConfig::new(2, Metric::L2, "Flat", ""))?;
//! db.add_with_ids(&[10, 11], &[0.0, 0.0, 3.0, 4.0])?;
//! let found = db.search(1, &[3.0, 3.9])?;
//! assert_eq!(found.ids, vec![1]);
//! # Ok(())
//! # }
//! ```

pub mod base;
mod builder;
pub mod config;
pub mod error;
pub mod kernel;
mod registry;
mod search;
mod simd;

mod db;

pub use config::{DbConfig, DEFAULT_FANOUT, DEFAULT_MAX_TRAIN};
pub use db::Db;
pub use error::{DbError, Result};
pub use kernel::{read_index, write_index, Index, KernelError, Metric};
pub use registry::clear_work_dir;
pub use search::SearchResult;
