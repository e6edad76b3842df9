use std::path::PathBuf;

use thiserror::Error;

use crate::kernel::KernelError;

pub type Result<T> = std::result::Result<T, DbError>;

#[derive(Debug, Error)]
pub enum DbError {
    /// The base file size is not a whole number of records. The database
    /// refuses to open rather than guess where the valid prefix ends.
    #[error("base file {path} has length {len}, not a multiple of the record length {record_len}")]
    BaseLengthMismatch {
        path: PathBuf,
        len: u64,
        record_len: u64,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("kernel error: {0}")]
    Kernel(#[from] KernelError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}
