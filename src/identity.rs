//! Stable keys and direction classification derived from raw feed fields.

use log::warn;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Traversal sense of a line
#[derive(Debug, Deserialize, Serialize, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// The line id ends with `0`
    Outbound,
    /// Any other line id
    Inbound,
}

impl Direction {
    /// Classifies a line by the last character of its id.
    pub fn infer(line_id: &str) -> Self {
        if line_id.ends_with('0') {
            Direction::Outbound
        } else {
            Direction::Inbound
        }
    }

    /// Uses the explicit direction of a schedule row when there is a usable one,
    /// otherwise falls back to [Direction::infer].
    pub fn resolve(explicit: Option<&str>, line_id: &str) -> Self {
        match explicit.map(str::trim).filter(|s| !s.is_empty()) {
            None => Direction::infer(line_id),
            Some(raw) => Direction::parse(raw).unwrap_or_else(|| {
                warn!("line {line_id}: unknown direction '{raw}', using the id suffix");
                Direction::infer(line_id)
            }),
        }
    }

    /// Parses the spellings found in feeds: GTFS `0`/`1`, english and turkish names.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "0" | "outbound" | "gidiş" | "gidis" => Some(Direction::Outbound),
            "1" | "inbound" | "dönüş" | "donus" => Some(Direction::Inbound),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Outbound => "outbound",
            Direction::Inbound => "inbound",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Identity of one point of a shape. Unique per point, not per shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathPointKey {
    pub shape_id: String,
    pub sequence: u32,
}

impl PathPointKey {
    pub fn new(shape_id: impl Into<String>, sequence: u32) -> Self {
        Self {
            shape_id: shape_id.into(),
            sequence,
        }
    }

    /// Key of the point right before this one, if any
    pub fn predecessor(&self) -> Option<Self> {
        self.sequence
            .checked_sub(1)
            .map(|sequence| PathPointKey::new(self.shape_id.clone(), sequence))
    }
}

impl fmt::Display for PathPointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.shape_id, self.sequence)
    }
}

/// Splits the `stops` column of a route into station ids.
///
/// Surrounding quotes are stripped, tokens are trimmed and empty tokens dropped.
/// The position of an id in the returned list is its ordinal on the line.
pub fn parse_stop_list(raw: &str) -> Vec<String> {
    raw.trim()
        .trim_matches(|c: char| c == '"' || c == '\'')
        .split(',')
        .map(|token| token.trim().trim_matches('"').trim())
        .filter(|token| !token.is_empty())
        .map(String::from)
        .collect()
}
