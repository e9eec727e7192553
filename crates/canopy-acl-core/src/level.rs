//! Graded permission levels.
//!
//! Levels form a total order; "does user U have level L on node N" is
//! always answered by comparing the resolved level against the required
//! one.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A graded permission level on a node.
///
/// The ordering is total: `None < Read < Feedback < Write < Admin`.
/// Resolution is positional (closest grant wins), never by picking the
/// numerically highest level along the ancestor path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionLevel {
    /// No access.
    None = 0,
    /// May view the node and its content.
    Read = 1,
    /// May view and comment.
    Feedback = 2,
    /// May edit content and structure.
    Write = 3,
    /// Full control, including sharing and deletion.
    Admin = 4,
}

impl PermissionLevel {
    /// Encode as the stored integer.
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Decode from the stored integer.
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::None),
            1 => Some(Self::Read),
            2 => Some(Self::Feedback),
            3 => Some(Self::Write),
            4 => Some(Self::Admin),
            _ => None,
        }
    }

    /// Whether this level satisfies a required level.
    pub fn satisfies(self, required: PermissionLevel) -> bool {
        self >= required
    }
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Read => "read",
            Self::Feedback => "feedback",
            Self::Write => "write",
            Self::Admin => "admin",
        };
        write!(f, "{}", name)
    }
}
