//! Error types for belt operations.
//!
//! Every failure here is local and recoverable: the worst case is one window
//! temporarily failing to render while navigation keeps working.

use thiserror::Error;

use crate::WindowIndex;
use crate::content::ContentError;
use crate::window::ShiftDirection;

/// Errors reported by the belt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BeltError {
    /// A shift was refused at a document edge. State is unchanged.
    #[error("{direction} shift blocked at document edge (window {edge})")]
    BoundaryBlocked {
        direction: ShiftDirection,
        /// The resident window sitting at the edge that blocked the shift.
        edge: WindowIndex,
    },

    /// The content provider failed for a window. The window stays absent
    /// from the cache; buffer state is unaffected.
    #[error("failed to load window {window}: {source}")]
    LoadFailure {
        window: WindowIndex,
        #[source]
        source: ContentError,
    },

    /// An asynchronous completion arrived for a window that is no longer
    /// resident and was discarded.
    #[error("discarded stale load for window {window}")]
    StaleCallback { window: WindowIndex },

    /// An operation was attempted in a state that does not permit it. The
    /// operation is a no-op.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// The window is not part of the resident buffer.
    #[error("window {0} is not resident")]
    NotResident(WindowIndex),

    /// `initialize` was called with a document that has no windows.
    #[error("document has no windows")]
    EmptyDocument,

    /// A navigation operation ran before `initialize`.
    #[error("belt is not initialized")]
    NotInitialized,

    /// Position capture or restore was requested without a layout engine.
    #[error("no layout engine attached")]
    NoLayoutEngine,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The runtime task that owns the belt has stopped.
    #[error("navigation queue closed")]
    QueueClosed,
}

impl BeltError {
    /// Whether the error is a refused shift at a document edge.
    pub fn is_boundary(&self) -> bool {
        matches!(self, Self::BoundaryBlocked { .. })
    }
}

/// Result type alias for belt operations.
pub type Result<T> = std::result::Result<T, BeltError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_message_names_direction_and_edge() {
        let err = BeltError::BoundaryBlocked {
            direction: ShiftDirection::Forward,
            edge: 99,
        };
        assert_eq!(
            err.to_string(),
            "forward shift blocked at document edge (window 99)"
        );
        assert!(err.is_boundary());
    }

    #[test]
    fn load_failure_exposes_provider_error_as_source() {
        use std::error::Error as _;

        let err = BeltError::LoadFailure {
            window: 4,
            source: ContentError::Generation("bad markup".into()),
        };
        assert!(err.to_string().contains("window 4"));
        assert!(err.source().is_some());
        assert!(!err.is_boundary());
    }
}
