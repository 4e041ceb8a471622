//! Stored-entry ZIP writer.

use dl_common::{Error, Result};

use super::{
    CENTRAL_HEADER_LEN, CENTRAL_HEADER_SIG, END_OF_CENTRAL_DIR_LEN, END_OF_CENTRAL_DIR_SIG,
    LOCAL_HEADER_LEN, LOCAL_HEADER_SIG, METHOD_STORED,
};
use crate::crc32::crc32;

const VERSION_NEEDED: u16 = 20;
/// 1980-01-01 in MS-DOS date format; time is midnight.
const DOS_DATE: u16 = (1 << 5) | 1;
const DOS_TIME: u16 = 0;

/// One file to place in the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZipEntry {
    pub name: String,
    pub data: Vec<u8>,
}

impl ZipEntry {
    pub fn new(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        ZipEntry {
            name: name.into(),
            data: data.into(),
        }
    }
}

fn put_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn to_u32(value: usize, what: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::ZipStructure(format!("{} exceeds 4 GiB", what)))
}

fn to_u16(value: usize, what: &str) -> Result<u16> {
    u16::try_from(value).map_err(|_| Error::ZipStructure(format!("too many {}", what)))
}

/// Serialize `entries` as an uncompressed ZIP archive, in order.
pub fn write_stored(entries: &[ZipEntry]) -> Result<Vec<u8>> {
    let count = to_u16(entries.len(), "entries")?;
    let mut out = Vec::new();
    let mut central = Vec::new();

    for entry in entries {
        let name = entry.name.as_bytes();
        let name_len = to_u16(name.len(), "bytes in an entry name")?;
        let size = to_u32(entry.data.len(), "entry size")?;
        let offset = to_u32(out.len(), "archive size")?;
        let crc = crc32(&entry.data);

        out.reserve(LOCAL_HEADER_LEN + name.len() + entry.data.len());
        put_u32(&mut out, LOCAL_HEADER_SIG);
        put_u16(&mut out, VERSION_NEEDED);
        put_u16(&mut out, 0); // flags
        put_u16(&mut out, METHOD_STORED);
        put_u16(&mut out, DOS_TIME);
        put_u16(&mut out, DOS_DATE);
        put_u32(&mut out, crc);
        put_u32(&mut out, size);
        put_u32(&mut out, size);
        put_u16(&mut out, name_len);
        put_u16(&mut out, 0); // extra length
        out.extend_from_slice(name);
        out.extend_from_slice(&entry.data);

        central.reserve(CENTRAL_HEADER_LEN + name.len());
        put_u32(&mut central, CENTRAL_HEADER_SIG);
        put_u16(&mut central, VERSION_NEEDED); // made by
        put_u16(&mut central, VERSION_NEEDED);
        put_u16(&mut central, 0);
        put_u16(&mut central, METHOD_STORED);
        put_u16(&mut central, DOS_TIME);
        put_u16(&mut central, DOS_DATE);
        put_u32(&mut central, crc);
        put_u32(&mut central, size);
        put_u32(&mut central, size);
        put_u16(&mut central, name_len);
        put_u16(&mut central, 0); // extra
        put_u16(&mut central, 0); // comment
        put_u16(&mut central, 0); // disk number
        put_u16(&mut central, 0); // internal attributes
        put_u32(&mut central, 0); // external attributes
        put_u32(&mut central, offset);
        central.extend_from_slice(name);
    }

    let central_offset = to_u32(out.len(), "archive size")?;
    let central_size = to_u32(central.len(), "central directory size")?;
    out.extend_from_slice(&central);

    out.reserve(END_OF_CENTRAL_DIR_LEN);
    put_u32(&mut out, END_OF_CENTRAL_DIR_SIG);
    put_u16(&mut out, 0); // this disk
    put_u16(&mut out, 0); // disk with central directory
    put_u16(&mut out, count);
    put_u16(&mut out, count);
    put_u32(&mut out, central_size);
    put_u32(&mut out, central_offset);
    put_u16(&mut out, 0); // comment length
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_of_single_entry() {
        let bytes = write_stored(&[ZipEntry::new("a.txt", b"hello".to_vec())]).unwrap();
        // local header + name + data, central header + name, EOCD
        assert_eq!(bytes.len(), 30 + 5 + 5 + 46 + 5 + 22);
        assert_eq!(&bytes[..4], b"PK\x03\x04");
        assert_eq!(u32::from_le_bytes([bytes[14], bytes[15], bytes[16], bytes[17]]), crc32(b"hello"));
        assert_eq!(u16::from_le_bytes([bytes[26], bytes[27]]), 5);

        let central = 30 + 5 + 5;
        assert_eq!(&bytes[central..central + 4], b"PK\x01\x02");
        let eocd = bytes.len() - 22;
        assert_eq!(&bytes[eocd..eocd + 4], b"PK\x05\x06");
        assert_eq!(u16::from_le_bytes([bytes[eocd + 10], bytes[eocd + 11]]), 1);
        assert_eq!(
            u32::from_le_bytes([bytes[eocd + 16], bytes[eocd + 17], bytes[eocd + 18], bytes[eocd + 19]]),
            central as u32
        );
    }

    #[test]
    fn test_empty_archive_is_just_eocd() {
        let bytes = write_stored(&[]).unwrap();
        assert_eq!(bytes.len(), 22);
    }
}
