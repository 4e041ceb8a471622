//! Group and series identity types.
//!
//! Ids have the form `group-<n>` / `series-<n>`. The numeric suffix lets a
//! store restored from a snapshot resume its counters past every id it has
//! already handed out.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Group identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub String);

/// Series identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeriesId(pub String);

const GROUP_PREFIX: &str = "group";
const SERIES_PREFIX: &str = "series";

impl GroupId {
    /// Build the id for the n-th group.
    pub fn from_counter(n: u64) -> Self {
        GroupId(format!("{}-{}", GROUP_PREFIX, n))
    }

    /// Numeric suffix, if the id has the canonical `group-<n>` shape.
    pub fn counter(&self) -> Option<u64> {
        parse_counter(&self.0, GROUP_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl SeriesId {
    /// Build the id for the n-th series.
    pub fn from_counter(n: u64) -> Self {
        SeriesId(format!("{}-{}", SERIES_PREFIX, n))
    }

    /// Numeric suffix, if the id has the canonical `series-<n>` shape.
    pub fn counter(&self) -> Option<u64> {
        parse_counter(&self.0, SERIES_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn parse_counter(id: &str, prefix: &str) -> Option<u64> {
    let rest = id.strip_prefix(prefix)?.strip_prefix('-')?;
    if rest.is_empty() || !rest.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    rest.parse().ok()
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for SeriesId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for GroupId {
    fn from(s: &str) -> Self {
        GroupId(s.to_string())
    }
}

impl From<&str> for SeriesId {
    fn from(s: &str) -> Self {
        SeriesId(s.to_string())
    }
}
