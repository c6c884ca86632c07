//! Convenience re-exports for common `folio-rs` types.
//!
//! ```ignore
//! use folio_rs::prelude::*;
//! ```
//!
//! Covers the manager and runtime, the collaborator traits with their
//! synthetic stand-ins, configuration, events and snapshots. Window-level
//! building blocks ([`WindowBuffer`](crate::window::WindowBuffer),
//! [`PhaseController`](crate::window::PhaseController)) are left out; import
//! them from [`window`](crate::window) when needed.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::{BeltError, WindowIndex};

// ── Belt ────────────────────────────────────────────────────────────
pub use crate::config::BeltConfig;
pub use crate::manager::{ConveyorBeltManager, NavigationOutcome};
pub use crate::runtime::{BeltHandle, BeltRuntime};
pub use crate::window::{Phase, Shift, ShiftDirection};

// ── Content ─────────────────────────────────────────────────────────
pub use crate::content::{
    BatchLoad, ContentBlob, ContentError, ContentFuture, ContentProvider, LoadState, PendingLoad,
    RetryConfig, SyntheticProvider, WindowContentCache,
};

// ── Positions ───────────────────────────────────────────────────────
pub use crate::offset::{
    CharacterOffset, FixedPageLayout, LayoutEngine, ResumePosition, ViewportAnchor,
};

// ── Observation ─────────────────────────────────────────────────────
pub use crate::events::{
    BeltEvent, CompositeEventHandler, EventHandler, FnEventHandler, LoggingHandler, NoopHandler,
};
pub use crate::log_capture::{BeltTracingLayer, LogBuffer, LogLevel, LogLine};
pub use crate::snapshot::BeltSnapshot;
