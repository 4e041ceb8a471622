//! ZIP reader: EOCD scan, central directory walk, stored and deflate entries.

use std::io::Read;

use flate2::read::DeflateDecoder;
use tracing::trace;

use dl_common::{Error, Result};

use crate::crc32::crc32;

use super::{
    CENTRAL_HEADER_LEN, CENTRAL_HEADER_SIG, END_OF_CENTRAL_DIR_LEN, END_OF_CENTRAL_DIR_SIG,
    LOCAL_HEADER_LEN, LOCAL_HEADER_SIG, METHOD_DEFLATE, METHOD_STORED,
};

/// Largest archive comment the EOCD scan looks past.
const MAX_COMMENT_LEN: usize = 0xFFFF;

/// An entry as described by the central directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CentralEntry {
    pub name: String,
    pub method: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub local_offset: u32,
}

/// A parsed archive borrowing the raw bytes.
#[derive(Debug)]
pub struct ZipArchive<'a> {
    bytes: &'a [u8],
    entries: Vec<CentralEntry>,
}

fn read_u16(bytes: &[u8], offset: usize) -> Result<u16> {
    bytes
        .get(offset..offset + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .ok_or_else(|| Error::ZipStructure(format!("truncated field at offset {}", offset)))
}

fn read_u32(bytes: &[u8], offset: usize) -> Result<u32> {
    bytes
        .get(offset..offset + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| Error::ZipStructure(format!("truncated field at offset {}", offset)))
}

fn slice<'a>(bytes: &'a [u8], start: usize, len: usize, what: &str) -> Result<&'a [u8]> {
    start
        .checked_add(len)
        .and_then(|end| bytes.get(start..end))
        .ok_or_else(|| Error::ZipStructure(format!("{} extends past end of archive", what)))
}

fn find_end_of_central_dir(bytes: &[u8]) -> Result<usize> {
    if bytes.len() < END_OF_CENTRAL_DIR_LEN {
        return Err(Error::ZipStructure("file too small for a ZIP archive".into()));
    }
    let last = bytes.len() - END_OF_CENTRAL_DIR_LEN;
    let first = last.saturating_sub(MAX_COMMENT_LEN);
    let signature = END_OF_CENTRAL_DIR_SIG.to_le_bytes();
    (first..=last)
        .rev()
        .find(|&i| bytes[i..i + 4] == signature)
        .ok_or_else(|| Error::ZipStructure("end of central directory not found".into()))
}

impl<'a> ZipArchive<'a> {
    /// Locate the end-of-central-directory record and read every entry.
    pub fn parse(bytes: &'a [u8]) -> Result<Self> {
        let eocd = find_end_of_central_dir(bytes)?;
        let count = read_u16(bytes, eocd + 10)? as usize;
        let mut offset = read_u32(bytes, eocd + 16)? as usize;

        let mut entries = Vec::with_capacity(count.min(1024));
        for index in 0..count {
            if read_u32(bytes, offset)? != CENTRAL_HEADER_SIG {
                return Err(Error::ZipStructure(format!(
                    "bad central directory signature for entry {}",
                    index
                )));
            }
            let method = read_u16(bytes, offset + 10)?;
            let crc32 = read_u32(bytes, offset + 16)?;
            let compressed_size = read_u32(bytes, offset + 20)?;
            let uncompressed_size = read_u32(bytes, offset + 24)?;
            let name_len = read_u16(bytes, offset + 28)? as usize;
            let extra_len = read_u16(bytes, offset + 30)? as usize;
            let comment_len = read_u16(bytes, offset + 32)? as usize;
            let local_offset = read_u32(bytes, offset + 42)?;
            let name = slice(bytes, offset + CENTRAL_HEADER_LEN, name_len, "entry name")?;

            entries.push(CentralEntry {
                name: String::from_utf8_lossy(name).into_owned(),
                method,
                crc32,
                compressed_size,
                uncompressed_size,
                local_offset,
            });
            offset += CENTRAL_HEADER_LEN + name_len + extra_len + comment_len;
        }

        trace!(entries = entries.len(), "central directory read");
        Ok(ZipArchive { bytes, entries })
    }

    pub fn entries(&self) -> &[CentralEntry] {
        &self.entries
    }

    pub fn entry(&self, name: &str) -> Option<&CentralEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Decompressed contents of `entry`.
    ///
    /// Inflation stops one byte past the declared size, and the result must
    /// match both the declared size and the directory CRC.
    pub fn read(&self, entry: &CentralEntry) -> Result<Vec<u8>> {
        let offset = entry.local_offset as usize;
        if read_u32(self.bytes, offset)? != LOCAL_HEADER_SIG {
            return Err(Error::ZipStructure(format!(
                "bad local header signature for {}",
                entry.name
            )));
        }
        let name_len = read_u16(self.bytes, offset + 26)? as usize;
        let extra_len = read_u16(self.bytes, offset + 28)? as usize;
        let data_start = offset + LOCAL_HEADER_LEN + name_len + extra_len;
        let data = slice(
            self.bytes,
            data_start,
            entry.compressed_size as usize,
            &entry.name,
        )?;

        let out = match entry.method {
            METHOD_STORED => data.to_vec(),
            METHOD_DEFLATE => {
                let limit = u64::from(entry.uncompressed_size) + 1;
                let mut out = Vec::with_capacity((entry.uncompressed_size as usize).min(1 << 24));
                DeflateDecoder::new(data)
                    .take(limit)
                    .read_to_end(&mut out)
                    .map_err(|e| Error::ZipStructure(format!("inflate of {} failed: {}", entry.name, e)))?;
                out
            }
            method => return Err(Error::UnsupportedCompressionMethod { method }),
        };

        if out.len() as u64 != u64::from(entry.uncompressed_size) {
            return Err(Error::ZipStructure(format!(
                "{} does not match its declared size of {} bytes",
                entry.name, entry.uncompressed_size
            )));
        }
        if crc32(&out) != entry.crc32 {
            return Err(Error::ZipStructure(format!("CRC mismatch for {}", entry.name)));
        }
        Ok(out)
    }

    /// Contents of the named entry, or `None` if the archive lacks it.
    pub fn read_by_name(&self, name: &str) -> Result<Option<Vec<u8>>> {
        match self.entry(name) {
            Some(entry) => self.read(entry).map(Some),
            None => Ok(None),
        }
    }

    /// Like [`Self::read_by_name`], decoded as UTF-8 (lossily).
    pub fn read_text(&self, name: &str) -> Result<Option<String>> {
        Ok(self
            .read_by_name(name)?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zip::{write_stored, ZipEntry};

    fn archive() -> Vec<u8> {
        write_stored(&[
            ZipEntry::new("one.txt", b"first".to_vec()),
            ZipEntry::new("dir/two.xml", b"<a/>".to_vec()),
        ])
        .unwrap()
    }

    #[test]
    fn test_reads_back_written_entries() {
        let bytes = archive();
        let zip = ZipArchive::parse(&bytes).unwrap();
        assert_eq!(zip.entries().len(), 2);
        assert_eq!(zip.read_text("one.txt").unwrap().unwrap(), "first");
        assert_eq!(zip.read_text("dir/two.xml").unwrap().unwrap(), "<a/>");
        assert!(zip.read_text("missing").unwrap().is_none());
    }

    #[test]
    fn test_finds_eocd_behind_comment() {
        let mut bytes = archive();
        let len = bytes.len();
        bytes[len - 2] = 3;
        bytes.extend_from_slice(b"hey");
        let zip = ZipArchive::parse(&bytes).unwrap();
        assert_eq!(zip.entries().len(), 2);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(ZipArchive::parse(b"PK"), Err(Error::ZipStructure(_))));
        assert!(matches!(ZipArchive::parse(&[0u8; 64]), Err(Error::ZipStructure(_))));
    }

    #[test]
    fn test_truncated_central_directory_fails() {
        let bytes = archive();
        let eocd = bytes.len() - 22;
        let mut broken = bytes.clone();
        // Point the central directory at the middle of a local header.
        broken[eocd + 16..eocd + 20].copy_from_slice(&3u32.to_le_bytes());
        assert!(matches!(ZipArchive::parse(&broken), Err(Error::ZipStructure(_))));
    }

    fn deflated(name: &str, data: &[u8]) -> Vec<u8> {
        use std::io::{Cursor, Write};
        let mut writer = ::zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = ::zip::write::SimpleFileOptions::default()
            .compression_method(::zip::CompressionMethod::Deflated);
        writer.start_file(name, options).unwrap();
        writer.write_all(data).unwrap();
        writer.finish().unwrap().into_inner()
    }

    fn first_central_header(bytes: &[u8]) -> usize {
        let eocd = bytes.len() - 22;
        read_u32(bytes, eocd + 16).unwrap() as usize
    }

    #[test]
    fn test_inflates_deflate_entries() {
        let bytes = deflated("data.xml", &[b'a'; 4096]);
        let zip = ZipArchive::parse(&bytes).unwrap();
        assert_eq!(zip.entries()[0].method, METHOD_DEFLATE);
        assert_eq!(zip.read_by_name("data.xml").unwrap().unwrap(), vec![b'a'; 4096]);
    }

    #[test]
    fn test_inflate_stops_at_declared_size() {
        let mut bytes = deflated("bomb.xml", &vec![0u8; 5_000_000]);
        let central = first_central_header(&bytes);
        bytes[central + 24..central + 28].copy_from_slice(&10u32.to_le_bytes());

        let zip = ZipArchive::parse(&bytes).unwrap();
        let entry = zip.entries()[0].clone();
        assert_eq!(entry.uncompressed_size, 10);
        assert!(matches!(zip.read(&entry), Err(Error::ZipStructure(_))));
    }

    #[test]
    fn test_crc_mismatch_is_rejected() {
        let mut bytes = archive();
        // First local header is 30 bytes plus the 7-byte name "one.txt".
        bytes[37] ^= 0xFF;
        let zip = ZipArchive::parse(&bytes).unwrap();
        let err = zip.read_by_name("one.txt").unwrap_err();
        assert!(err.to_string().contains("CRC mismatch"));
        assert_eq!(zip.read_text("dir/two.xml").unwrap().unwrap(), "<a/>");
    }

    #[test]
    fn test_unknown_method_is_reported() {
        let mut bytes = archive();
        let central = bytes.len() - 22 - (46 + 7) - (46 + 11);
        bytes[central + 10] = 12; // bzip2
        let zip = ZipArchive::parse(&bytes).unwrap();
        let entry = zip.entry("one.txt").unwrap().clone();
        assert!(matches!(
            zip.read(&entry),
            Err(Error::UnsupportedCompressionMethod { method: 12 })
        ));
    }
}
