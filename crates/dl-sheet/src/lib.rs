//! Data Logger spreadsheet interchange.
//!
//! Export writes one worksheet per group into a stored-entry XLSX container
//! built by hand. Import accepts XLSX (stored or deflate entries), legacy
//! SpreadsheetML 2003 XML, and CSV; every format goes through the same row
//! grammar and ends up as a [`StateSnapshot`](dl_store::StateSnapshot) that
//! replaces the store.

pub mod crc32;
pub mod decoder;
pub mod encoder;
pub mod import;
pub mod xml;
pub mod zip;

pub use decoder::{
    decode_file, parse_time_to_sec, rows_to_table, DecodedRow, DecodedTable, FileSource,
};
pub use encoder::{
    build_group_table, build_xlsx, column_name, combined_export_filename, date_stamp,
    format_seconds, group_export_filename, local_date_stamp, safe_sheet_name, GroupTable,
    TableRow, XLSX_MIME,
};
pub use import::{build_import_payload, build_import_payload_with};
