//! Spreadsheet import.
//!
//! All three formats reduce to a grid of strings which then goes through the
//! same row grammar ([`rows_to_table`]): row index 1 is the header and must
//! start with `time`, following rows hold elapsed seconds and values.

mod csv;
mod spreadsheet_ml;
mod xlsx;

use std::path::Path;

use serde::Serialize;
use tracing::{debug, info};

use dl_common::{normalize_label, parse_leading_f64, sanitize_text, Error, Result};

pub use self::csv::{decode_csv, parse_csv_rows};
pub use self::spreadsheet_ml::decode_spreadsheet_ml;
pub use self::xlsx::{column_letters_to_index, decode_xlsx};

use crate::zip::is_zip;

/// Name used when a file name yields nothing usable.
pub const DEFAULT_IMPORT_NAME: &str = "import";

/// One decoded data row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedRow {
    pub time_sec: f64,
    /// One entry per label; `None` where the cell was blank or not a number.
    pub values: Vec<Option<f64>>,
}

/// One worksheet (or CSV file) worth of data.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedTable {
    pub name: String,
    pub labels: Vec<String>,
    pub rows: Vec<DecodedRow>,
}

/// A file handed to the importer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSource {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl FileSource {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        FileSource {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    /// Read a file from disk, named after its final path component.
    pub fn read(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(FileSource { name, bytes })
    }

    pub fn decode(&self) -> Result<Vec<DecodedTable>> {
        decode_file(&self.bytes, &self.name)
    }
}

/// Elapsed seconds from a time cell: `12`, `1.5s`, ` 3 S `.
///
/// Returns `None` for blank, negative, or non-numeric cells.
pub fn parse_time_to_sec(raw: &str) -> Option<f64> {
    let text = raw.trim().to_lowercase();
    if text.is_empty() {
        return None;
    }
    let text = text.strip_suffix('s').unwrap_or(&text);
    parse_leading_f64(text).filter(|sec| sec.is_finite() && *sec >= 0.0)
}

/// Apply the shared row grammar to a grid of cells.
pub fn rows_to_table(rows: &[Vec<String>], name: &str) -> Result<DecodedTable> {
    if rows.len() < 2 {
        return Err(Error::MalformedImport(format!(
            "{}: expected a spacer row and a header row",
            name
        )));
    }

    let header = &rows[1];
    let first = header.first().map(|c| normalize_label(c)).unwrap_or_default();
    if first != "time" {
        return Err(Error::MalformedImport(format!(
            "{}: header row must start with \"time\"",
            name
        )));
    }

    // Keep the source column of each label so values stay aligned when a
    // header cell is blank.
    let columns: Vec<(usize, String)> = header
        .iter()
        .enumerate()
        .skip(1)
        .map(|(col, cell)| (col, sanitize_text(cell.trim())))
        .filter(|(_, label)| !label.is_empty())
        .collect();
    if columns.is_empty() {
        return Err(Error::MalformedImport(format!("{}: no series labels in header", name)));
    }

    let mut decoded = Vec::new();
    for (offset, row) in rows.iter().enumerate().skip(2) {
        if row.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }
        let time_cell = row.first().map(String::as_str).unwrap_or("");
        let time_sec = parse_time_to_sec(time_cell).ok_or_else(|| {
            Error::MalformedImport(format!(
                "{}: invalid time {:?} in row {}",
                name,
                time_cell.trim(),
                offset + 1
            ))
        })?;
        let values = columns
            .iter()
            .map(|(col, _)| {
                row.get(*col)
                    .and_then(|cell| parse_leading_f64(cell.trim()))
                    .filter(|v| v.is_finite())
            })
            .collect();
        decoded.push(DecodedRow { time_sec, values });
    }

    Ok(DecodedTable {
        name: name.to_string(),
        labels: columns.into_iter().map(|(_, label)| label).collect(),
        rows: decoded,
    })
}

/// Sanitized file name without its extension, or `import`.
pub fn file_stem_name(filename: &str) -> String {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let stem = match base.rfind('.') {
        Some(dot) if dot + 1 < base.len() => &base[..dot],
        _ => base,
    };
    let stem = sanitize_text(stem.trim());
    if stem.is_empty() {
        DEFAULT_IMPORT_NAME.to_string()
    } else {
        stem
    }
}

fn extension(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

fn strip_bom(text: &str) -> &str {
    text.strip_prefix('\u{feff}').unwrap_or(text)
}

/// Decode any supported file by extension and content sniffing.
///
/// `.xlsx` (or ZIP magic) is read as a workbook; `.xls` files that are
/// actually XML fall back to SpreadsheetML; other text starting with `<`
/// is SpreadsheetML, anything else is CSV.
pub fn decode_file(bytes: &[u8], filename: &str) -> Result<Vec<DecodedTable>> {
    let stem = file_stem_name(filename);
    let ext = extension(filename);

    let mut tables = if ext == "xlsx" || is_zip(bytes) {
        match decode_xlsx(bytes) {
            Ok(tables) => tables,
            Err(e) => {
                let text = String::from_utf8_lossy(bytes);
                if ext == "xls" && strip_bom(&text).trim_start().starts_with('<') {
                    debug!(file = filename, error = %e, "not a workbook, retrying as SpreadsheetML");
                    decode_spreadsheet_ml(strip_bom(&text))?
                } else {
                    return Err(e);
                }
            }
        }
    } else {
        let text = String::from_utf8_lossy(bytes);
        let text = strip_bom(&text);
        if text.trim_start().starts_with('<') {
            decode_spreadsheet_ml(text)?
        } else if ext == "xls" {
            return Err(Error::MalformedImport(format!(
                "{}: binary .xls workbooks are not supported",
                filename
            )));
        } else {
            vec![decode_csv(text, &stem)?]
        }
    };

    for table in &mut tables {
        if table.name.trim().is_empty() {
            table.name = stem.clone();
        }
    }
    info!(
        file = filename,
        tables = tables.len(),
        rows = tables.iter().map(|t| t.rows.len()).sum::<usize>(),
        "file decoded"
    );
    Ok(tables)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(rows: &[&[&str]]) -> Vec<Vec<String>> {
        rows.iter()
            .map(|r| r.iter().map(|c| c.to_string()).collect())
            .collect()
    }

    #[test]
    fn test_parse_time_to_sec() {
        assert_eq!(parse_time_to_sec("1.5s"), Some(1.5));
        assert_eq!(parse_time_to_sec(" 3 S "), Some(3.0));
        assert_eq!(parse_time_to_sec("0"), Some(0.0));
        assert_eq!(parse_time_to_sec("-1"), None);
        assert_eq!(parse_time_to_sec("soon"), None);
        assert_eq!(parse_time_to_sec(""), None);
    }

    #[test]
    fn test_rows_to_table_basic() {
        let rows = grid(&[&[], &["Time", "a", "b"], &["0s", "1", ""], &["1.5s", "2", "x"]]);
        let table = rows_to_table(&rows, "t").unwrap();
        assert_eq!(table.labels, vec!["a", "b"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0].values, vec![Some(1.0), None]);
        assert_eq!(table.rows[1].time_sec, 1.5);
        assert_eq!(table.rows[1].values, vec![Some(2.0), None]);
    }

    #[test]
    fn test_values_follow_their_header_column() {
        let rows = grid(&[&[], &["time", "", "b"], &["0", "9", "7"]]);
        let table = rows_to_table(&rows, "t").unwrap();
        assert_eq!(table.labels, vec!["b"]);
        assert_eq!(table.rows[0].values, vec![Some(7.0)]);
    }

    #[test]
    fn test_rows_to_table_errors() {
        let too_short = grid(&[&["time", "a"]]);
        assert!(matches!(rows_to_table(&too_short, "t"), Err(Error::MalformedImport(_))));

        let wrong_header = grid(&[&[], &["when", "a"]]);
        assert!(matches!(rows_to_table(&wrong_header, "t"), Err(Error::MalformedImport(_))));

        let no_labels = grid(&[&[], &["time", " ", "<>"]]);
        assert!(matches!(rows_to_table(&no_labels, "t"), Err(Error::MalformedImport(_))));

        let bad_time = grid(&[&[], &["time", "a"], &["-2", "1"]]);
        assert!(matches!(rows_to_table(&bad_time, "t"), Err(Error::MalformedImport(_))));
    }

    #[test]
    fn test_blank_rows_skipped() {
        let rows = grid(&[&[], &["time", "a"], &["", " "], &[], &["2", "4"]]);
        let table = rows_to_table(&rows, "t").unwrap();
        assert_eq!(table.rows.len(), 1);
    }

    #[test]
    fn test_file_stem_name() {
        assert_eq!(file_stem_name("dir/run 1.csv"), "run 1");
        assert_eq!(file_stem_name("noext"), "noext");
        assert_eq!(file_stem_name(".csv"), "import");
        assert_eq!(file_stem_name("a.b.xlsx"), "a.b");
        assert_eq!(file_stem_name("<>.csv"), "import");
    }

    #[test]
    fn test_decode_file_dispatches_csv_and_xml() {
        let csv = "\u{feff}\ntime,a\n0,1\n";
        let tables = decode_file(csv.as_bytes(), "lab.csv").unwrap();
        assert_eq!(tables[0].name, "lab");

        let xml = r#"<Workbook><Worksheet ss:Name="S"><Table><Row/><Row><Cell><Data>time</Data></Cell><Cell><Data>a</Data></Cell></Row></Table></Worksheet></Workbook>"#;
        let tables = decode_file(xml.as_bytes(), "legacy.xls").unwrap();
        assert_eq!(tables[0].name, "S");
    }

    #[test]
    fn test_binary_xls_rejected() {
        let err = decode_file(&[0xD0, 0xCF, 0x11, 0xE0], "old.xls").unwrap_err();
        assert!(matches!(err, Error::MalformedImport(_)));
    }

    #[test]
    fn test_broken_xlsx_reports_container_stage() {
        let err = decode_file(b"PK\x03\x04 not really", "x.xlsx").unwrap_err();
        assert_eq!(err.stage(), Some(&dl_common::DecodeStage::Container));
        assert!(matches!(err.root(), Error::ZipStructure(_)));
    }
}
