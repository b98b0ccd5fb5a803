//! Market direction filter from an index's opening window.

use crate::market::{Bar, Side};
use std::fmt;

/// Index drift over the opening window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketDirection {
    Up,
    Down,
    Sideways,
}

impl MarketDirection {
    /// Compare the window's last close to its first open.
    ///
    /// Returns `None` for an empty window.
    pub fn from_opening(opening: &[&Bar]) -> Option<Self> {
        let first = opening.first()?;
        let last = opening.last()?;
        Some(if last.close > first.open {
            Self::Up
        } else if last.close < first.open {
            Self::Down
        } else {
            Self::Sideways
        })
    }

    pub fn preferred_side(self) -> Option<Side> {
        match self {
            Self::Up => Some(Side::Long),
            Self::Down => Some(Side::Short),
            Self::Sideways => None,
        }
    }
}

impl fmt::Display for MarketDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Up => write!(f, "UP"),
            Self::Down => write!(f, "DOWN"),
            Self::Sideways => write!(f, "SIDEWAYS"),
        }
    }
}

/// Sides to try, preferred first. With no preference LONG goes first.
pub fn side_order(preferred: Option<Side>) -> [Side; 2] {
    let first = preferred.unwrap_or(Side::Long);
    [first, first.opposite()]
}
