//! Window residency: the resident buffer, the admission phase machine, and
//! slot-to-window mapping.
//!
//! 1. **[`buffer`]**: [`WindowBuffer`] holds the resident window indices in
//!    insertion order and implements forward/backward shifts driven by
//!    running min/max counters.
//!
//! 2. **[`phase`]**: [`PhaseController`] gates shifting. The belt starts in
//!    [`Phase::Startup`] where navigation only moves focus among resident
//!    windows, and switches to [`Phase::Steady`] once the reader has visited
//!    the unlock window and then reached the trigger window.
//!
//! 3. **[`mapper`]**: [`PositionMapper`] answers "which window belongs at
//!    display slot N" from the active window alone. Buffer storage order
//!    reflects recency, not position, and is never used for display.

pub mod buffer;
pub mod mapper;
pub mod phase;

pub use buffer::{Shift, ShiftDirection, WindowBuffer, centered_start};
pub use mapper::PositionMapper;
pub use phase::{Phase, PhaseController, PhaseTransition};
