//! A single timestamped reading.

use serde::{Deserialize, Serialize};

/// One `(timestamp, value)` reading on a series.
///
/// `t` is milliseconds since the Unix epoch; `v` is always finite.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub t: i64,
    pub v: f64,
}

impl Sample {
    /// Build a sample, rejecting NaN and infinities.
    pub fn new(t: i64, v: f64) -> Option<Self> {
        if v.is_finite() {
            Some(Sample { t, v })
        } else {
            None
        }
    }
}
