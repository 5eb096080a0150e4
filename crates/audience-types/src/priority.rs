//! Priorities and arbitration claims
//!
//! A [`Claim`] is the pair an audience puts forward when it wants an
//! exclusive slot. Claims are totally ordered: higher priority first, and
//! between equal priorities the smaller [`AudienceRef`] ranks higher.

use crate::AudienceRef;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Priority of an audience rule (higher wins)
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Priority(i32);

impl Priority {
    pub const fn new(value: i32) -> Self {
        Self(value)
    }

    pub const fn value(&self) -> i32 {
        self.0
    }
}

impl From<i32> for Priority {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a challenger with the same priority as the incumbent is treated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TieBreak {
    /// Equal priorities are decided by reference ordering, so the owner is
    /// a function of the interested set alone.
    #[default]
    RefOrder,

    /// The installed owner keeps the slot against equal-priority challengers.
    Incumbent,
}

/// An audience's bid for an exclusive slot
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Claim {
    pub priority: Priority,
    pub audience: AudienceRef,
}

impl Claim {
    pub fn new(audience: AudienceRef, priority: impl Into<Priority>) -> Self {
        Self {
            priority: priority.into(),
            audience,
        }
    }

    /// Whether `self` should displace `incumbent`.
    pub fn outranks(&self, incumbent: &Claim, tie_break: TieBreak) -> bool {
        match self.priority.cmp(&incumbent.priority) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => match tie_break {
                TieBreak::RefOrder => self.audience < incumbent.audience,
                TieBreak::Incumbent => false,
            },
        }
    }
}

impl Ord for Claim {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.audience.cmp(&self.audience))
    }
}

impl PartialOrd for Claim {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Claim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.audience, self.priority)
    }
}
