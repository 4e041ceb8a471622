//! Fuzz target for logger.json parsing and validation.

#![no_main]

use dl_config::{validate_config, LoggerConfig};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    if let Ok(config) = LoggerConfig::from_json(data) {
        let _ = validate_config(&config);
    }
});
