//! Minimal ZIP container support.
//!
//! The writer emits stored (uncompressed) entries only. The reader accepts
//! stored and deflate entries, which covers workbooks saved by common
//! spreadsheet applications.

mod reader;
mod writer;

pub use reader::{CentralEntry, ZipArchive};
pub use writer::{write_stored, ZipEntry};

pub(crate) const LOCAL_HEADER_SIG: u32 = 0x0403_4b50;
pub(crate) const CENTRAL_HEADER_SIG: u32 = 0x0201_4b50;
pub(crate) const END_OF_CENTRAL_DIR_SIG: u32 = 0x0605_4b50;

pub(crate) const LOCAL_HEADER_LEN: usize = 30;
pub(crate) const CENTRAL_HEADER_LEN: usize = 46;
pub(crate) const END_OF_CENTRAL_DIR_LEN: usize = 22;

/// Compression method: stored.
pub const METHOD_STORED: u16 = 0;
/// Compression method: deflate.
pub const METHOD_DEFLATE: u16 = 8;

/// True when `bytes` starts with a local file header signature (`PK\x03\x04`).
pub fn is_zip(bytes: &[u8]) -> bool {
    bytes.len() >= 4 && bytes[..4] == LOCAL_HEADER_SIG.to_le_bytes()
}
