//! Fuzz target for .xlsx workbook decoding.
//!
//! Workbooks come from users, so the ZIP walk, the inflater and the part
//! parsers must reject anything malformed without panicking.

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = dl_sheet::decode_file(data, "fuzz.xlsx");
});
