//! Per-client display state as reported to tooling

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a client stands with respect to one audience
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DisplayState {
    /// The client is in the audience
    InAudience,

    /// The client is considered but does not pass the filter
    Blocked,

    /// No parent passes the client
    NotConsidered,
}

impl DisplayState {
    pub fn display_name(&self) -> &'static str {
        match self {
            DisplayState::InAudience => "In Audience",
            DisplayState::Blocked => "Blocked",
            DisplayState::NotConsidered => "Not Considered",
        }
    }

    /// Colour hint used by debug views
    pub fn color(&self) -> &'static str {
        match self {
            DisplayState::InAudience => "green",
            DisplayState::Blocked => "red",
            DisplayState::NotConsidered => "gray",
        }
    }
}

impl fmt::Display for DisplayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}
