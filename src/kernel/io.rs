//! Index file persistence: a fixed 16-byte header (magic, version, flags,
//! payload length, crc32) followed by a bincode payload. Files are written
//! to a sibling tmp path, synced, and renamed into place.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use crc32fast::Hasher;

use super::{Index, KernelError};

const INDEX_MAGIC: u32 = 0x5058_4931;
const INDEX_VERSION: u16 = 1;
const HEADER_BYTES: usize = 16;

pub fn write_index(index: &Index, path: &Path) -> Result<(), KernelError> {
    let payload = bincode::serialize(index).map_err(|err| KernelError::CorruptIndexFile {
        path: path.to_path_buf(),
        reason: format!("encode: {err}"),
    })?;
    let mut hasher = Hasher::new();
    hasher.update(&payload);
    let header = encode_header(payload.len() as u32, hasher.finalize());

    let tmp = path.with_extension("tmp");
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&tmp)?;
    file.write_all(&header)?;
    file.write_all(&payload)?;
    file.flush()?;
    file.sync_data()?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

pub fn read_index(path: &Path) -> Result<Index, KernelError> {
    let bytes = std::fs::read(path)?;
    if bytes.len() < HEADER_BYTES {
        return Err(corrupt(path, "shorter than the header"));
    }
    let (magic, version, len, crc32) = decode_header(&bytes[..HEADER_BYTES]);
    if magic != INDEX_MAGIC {
        return Err(corrupt(path, "bad magic"));
    }
    if version != INDEX_VERSION {
        return Err(corrupt(path, &format!("unsupported version {version}")));
    }
    let payload = &bytes[HEADER_BYTES..];
    if payload.len() != len as usize {
        return Err(corrupt(path, "payload length mismatch"));
    }
    let mut hasher = Hasher::new();
    hasher.update(payload);
    if hasher.finalize() != crc32 {
        return Err(corrupt(path, "checksum mismatch"));
    }
    bincode::deserialize(payload).map_err(|err| corrupt(path, &format!("decode: {err}")))
}

fn corrupt(path: &Path, reason: &str) -> KernelError {
    KernelError::CorruptIndexFile {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

fn encode_header(len: u32, crc32: u32) -> [u8; HEADER_BYTES] {
    let mut buf = [0u8; HEADER_BYTES];
    buf[0..4].copy_from_slice(&INDEX_MAGIC.to_le_bytes());
    buf[4..6].copy_from_slice(&INDEX_VERSION.to_le_bytes());
    buf[6..8].copy_from_slice(&0u16.to_le_bytes());
    buf[8..12].copy_from_slice(&len.to_le_bytes());
    buf[12..16].copy_from_slice(&crc32.to_le_bytes());
    buf
}

fn decode_header(buf: &[u8]) -> (u32, u16, u32, u32) {
    let magic = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let version = u16::from_le_bytes([buf[4], buf[5]]);
    let len = u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]);
    let crc32 = u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]);
    (magic, version, len, crc32)
}
