//! Fuzz target for CSV import.
//!
//! Decoded tables must keep one value slot per label in every row.

#![no_main]

use libfuzzer_sys::fuzz_target;
use dl_sheet::decoder::decode_csv;

fuzz_target!(|data: &str| {
    if let Ok(table) = decode_csv(data, "fuzz") {
        for row in &table.rows {
            assert_eq!(row.values.len(), table.labels.len());
            assert!(row.time_sec >= 0.0);
        }
        let _ = dl_sheet::build_import_payload(&[table], 0);
    }
});
