//! Fuzz target for SpreadsheetML 2003 decoding.

#![no_main]

use libfuzzer_sys::fuzz_target;
use dl_sheet::decoder::decode_spreadsheet_ml;

fuzz_target!(|data: &str| {
    let _ = decode_spreadsheet_ml(data);
});
