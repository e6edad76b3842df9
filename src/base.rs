//! Append-only base store: `base.fvecs` on disk plus a full in-memory
//! mirror. Each record is an 8-byte little-endian signed identifier followed
//! by `dim` little-endian f32 values; the file carries no header.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::{DbError, Result};

pub const BASE_FILE: &str = "base.fvecs";

pub struct BaseStore {
    file: File,
    dim: usize,
    base: Vec<f32>,
    uids: Vec<i64>,
    uid2num: HashMap<i64, usize>,
}

impl BaseStore {
    pub fn record_len(dim: usize) -> usize {
        std::mem::size_of::<i64>() + dim * std::mem::size_of::<f32>()
    }

    /// Opens (creating if absent) `dir/base.fvecs` and loads every record
    /// into the mirror. A file whose size is not a whole number of records
    /// is rejected.
    pub fn open(dir: &Path, dim: usize) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(BASE_FILE);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let record_len = Self::record_len(dim) as u64;
        let len = file.metadata()?.len();
        if len % record_len != 0 {
            return Err(DbError::BaseLengthMismatch {
                path,
                len,
                record_len,
            });
        }

        let records = (len / record_len) as usize;
        let mut base = Vec::with_capacity(records * dim);
        let mut uids = Vec::with_capacity(records);
        let mut uid2num = HashMap::with_capacity(records);
        if records > 0 {
            tracing::info!(path = %path.display(), records, "loading base file");
            let mut reader = BufReader::new(&file);
            let mut record = vec![0u8; record_len as usize];
            for num in 0..records {
                reader.read_exact(&mut record)?;
                let mut uid_bytes = [0u8; 8];
                uid_bytes.copy_from_slice(&record[..8]);
                let uid = i64::from_le_bytes(uid_bytes);
                uids.push(uid);
                uid2num.insert(uid, num);
                for value in record[8..].chunks_exact(4) {
                    base.push(f32::from_le_bytes([value[0], value[1], value[2], value[3]]));
                }
            }
        }
        file.seek(SeekFrom::End(0))?;

        Ok(Self {
            file,
            dim,
            base,
            uids,
            uid2num,
        })
    }

    /// Serializes `nb` records into one buffer, writes it in a single call,
    /// syncs, and only then extends the mirror. A failed write therefore
    /// never leaves the mirror ahead of the file.
    pub fn append(&mut self, ids: &[i64], xb: &[f32]) -> Result<()> {
        debug_assert_eq!(self.base.len(), self.dim * self.uids.len());
        debug_assert_eq!(xb.len(), ids.len() * self.dim);

        let record_len = Self::record_len(self.dim);
        let mut buf = Vec::with_capacity(ids.len() * record_len);
        for (i, &uid) in ids.iter().enumerate() {
            buf.extend_from_slice(&uid.to_le_bytes());
            for &value in &xb[i * self.dim..(i + 1) * self.dim] {
                buf.extend_from_slice(&value.to_le_bytes());
            }
        }
        self.file.write_all(&buf)?;
        self.file.sync_data()?;

        let start = self.uids.len();
        self.base.extend_from_slice(xb);
        for (i, &uid) in ids.iter().enumerate() {
            self.uid2num.insert(uid, start + i);
        }
        self.uids.extend_from_slice(ids);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.uids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.uids.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// All rows, insertion order, densely packed.
    pub fn vectors(&self) -> &[f32] {
        &self.base
    }

    /// Rows `[offset, len)`, densely packed.
    pub fn vectors_from(&self, offset: usize) -> &[f32] {
        &self.base[offset * self.dim..]
    }

    pub fn row(&self, num: usize) -> &[f32] {
        &self.base[num * self.dim..(num + 1) * self.dim]
    }

    pub fn uids(&self) -> &[i64] {
        &self.uids
    }

    pub fn uid_of(&self, num: usize) -> Option<i64> {
        self.uids.get(num).copied()
    }

    /// Row index of an identifier. Duplicate identifiers resolve to the most
    /// recently appended row.
    pub fn row_of(&self, uid: i64) -> Option<usize> {
        self.uid2num.get(&uid).copied()
    }
}
