//! Reminder offsets: how long before the deadline a reminder fires.

use std::fmt;
use std::str::FromStr;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use super::errors::PlanError;

/// Symbolic lead time before a deadline.
///
/// Serialized with the short spelling (`"3h"`, `"1d"`, `"3d"`); the long
/// names (`short`, `medium`, `long`) are accepted when parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OffsetToken {
    #[serde(rename = "3h", alias = "short")]
    Short,
    #[serde(rename = "1d", alias = "medium")]
    Medium,
    #[serde(rename = "3d", alias = "long")]
    Long,
}

impl OffsetToken {
    pub const ALL: [OffsetToken; 3] = [OffsetToken::Short, OffsetToken::Medium, OffsetToken::Long];

    /// Fixed duration, not calendar aware.
    pub fn duration(self) -> Duration {
        match self {
            OffsetToken::Short => Duration::hours(3),
            OffsetToken::Medium => Duration::days(1),
            OffsetToken::Long => Duration::days(3),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OffsetToken::Short => "3h",
            OffsetToken::Medium => "1d",
            OffsetToken::Long => "3d",
        }
    }
}

impl fmt::Display for OffsetToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OffsetToken {
    type Err = PlanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "3h" | "short" => Ok(OffsetToken::Short),
            "1d" | "medium" => Ok(OffsetToken::Medium),
            "3d" | "long" => Ok(OffsetToken::Long),
            other => Err(PlanError::InvalidOffset(other.to_string())),
        }
    }
}

/// Resolve a raw token to its duration. Unknown tokens are an error, never a default.
pub fn resolve(token: &str) -> Result<Duration, PlanError> {
    token.parse::<OffsetToken>().map(OffsetToken::duration)
}
