//! The two routing lanes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Named queue a record is routed into. Chosen once at submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lane {
    /// Default lane for all non-push events.
    Work,
    /// Lane for push-classified events.
    Push,
}

impl Lane {
    /// Every lane, in scan order.
    pub const ALL: [Lane; 2] = [Lane::Work, Lane::Push];

    /// Return the persisted lane name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Work => "work",
            Self::Push => "push",
        }
    }
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Lane {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "work" => Ok(Self::Work),
            "push" => Ok(Self::Push),
            other => Err(format!("unknown lane '{other}'")),
        }
    }
}
