//! Error types for locator parsing.

use thiserror::Error;

/// Errors that can occur when decoding a locator string.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LocatorError {
    /// The locator string is empty.
    #[error("locator cannot be empty")]
    Empty,

    /// The locator does not have exactly three `/`-separated segments.
    #[error("invalid locator '{input}': expected 3 segments, found {found}")]
    WrongSegmentCount { input: String, found: usize },

    /// One of the segments is empty.
    #[error("invalid locator '{input}': segment {position} is empty")]
    EmptySegment { input: String, position: usize },

    /// The id segment is not a non-negative integer.
    #[error("invalid locator '{input}': bad VM id: {reason}")]
    InvalidId { input: String, reason: String },
}

impl LocatorError {
    /// Returns true if this error indicates the input was empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, LocatorError::Empty)
    }

    /// Returns the offending input, if any.
    pub fn input(&self) -> Option<&str> {
        match self {
            LocatorError::Empty => None,
            LocatorError::WrongSegmentCount { input, .. }
            | LocatorError::EmptySegment { input, .. }
            | LocatorError::InvalidId { input, .. } => Some(input),
        }
    }
}
