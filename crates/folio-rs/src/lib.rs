//! Bounded sliding-window content residency for long-document readers.
//!
//! `folio-rs` keeps a fixed number of rendered document *windows* resident
//! while a reader scrolls through an arbitrarily long book, so memory stays
//! constant regardless of document length. A window is a contiguous run of
//! chapters that is loaded and rendered as one unit; the set of resident
//! windows slides along with the reader like a conveyor belt.
//!
//! The core abstraction is the [`ConveyorBeltManager`](manager::ConveyorBeltManager):
//! it owns the resident [`WindowBuffer`](window::WindowBuffer), the
//! STARTUP/STEADY [`PhaseController`](window::PhaseController), the
//! [`PositionMapper`](window::PositionMapper) and the
//! [`OffsetTracker`](offset::OffsetTracker), and drives a prefetching
//! [`WindowContentCache`](content::WindowContentCache) backed by a
//! caller-supplied [`ContentProvider`](content::ContentProvider).
//!
//! # Getting started
//!
//! ```ignore
//! use folio_rs::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), BeltError> {
//!     let provider = Arc::new(SyntheticProvider::new(100));
//!     let (belt, _task) = BeltRuntime::builder(provider)
//!         .event_handler(LoggingHandler)
//!         .spawn()?;
//!
//!     // Open the book at the first window and wait until it is displayable.
//!     belt.initialize(0, 100).await?.wait_all().await?;
//!
//!     // Report navigation as the reader scrolls.
//!     belt.enter(1).await?;
//!     belt.enter(2).await?;
//!
//!     let snapshot = belt.snapshot();
//!     println!("phase={:?} buffer={:?}", snapshot.phase, snapshot.buffer);
//!     Ok(())
//! }
//! ```
//!
//! # Where to find things
//!
//! - **Plug in a document:** implement [`ContentProvider`](content::ContentProvider)
//!   (content generation) and optionally [`LayoutEngine`](offset::LayoutEngine)
//!   (character-offset positions). [`SyntheticProvider`](content::SyntheticProvider)
//!   and [`FixedPageLayout`](offset::FixedPageLayout) are deterministic
//!   stand-ins used by the simulator and the tests.
//!
//! - **Drive navigation:** use [`BeltRuntime`](runtime::BeltRuntime) to get a
//!   cloneable [`BeltHandle`](runtime::BeltHandle) that serializes all
//!   mutations through one queue, or own a
//!   [`ConveyorBeltManager`](manager::ConveyorBeltManager) directly when the
//!   caller already is the single owner context.
//!
//! - **Observe state:** implement [`EventHandler`](events::EventHandler), use
//!   [`LoggingHandler`](events::LoggingHandler) for `tracing` output, or
//!   subscribe to [`BeltSnapshot`](snapshot::BeltSnapshot)s through
//!   [`BeltHandle::subscribe`](runtime::BeltHandle::subscribe).
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`window`] | Resident buffer and shift algorithm, phase state machine, slot mapping |
//! | [`content`] | Provider trait, coalescing cache, load retry, synthetic provider |
//! | [`offset`] | Layout-independent character-offset positions |
//! | [`manager`] | The orchestrator composing all of the above |
//! | [`runtime`] | Single-owner event queue and snapshot publication |
//! | [`events`] | Change notifications and stock handlers |
//! | [`snapshot`] | Serializable projection of observable state |
//! | [`config`] | [`BeltConfig`](config::BeltConfig) |
//! | [`script`] | Navigation scripts for the simulator |
//! | [`log_capture`] | `tracing` layer buffering log lines for frontends |

pub mod config;
pub mod content;
pub mod error;
pub mod events;
pub mod log_capture;
pub mod manager;
pub mod offset;
pub mod prelude;
pub mod runtime;
pub mod script;
pub mod snapshot;
pub mod window;

pub use error::{BeltError, Result};

/// Identifies a contiguous run of document sections that is loaded and
/// rendered as one unit. Stable for a session.
pub type WindowIndex = usize;

// ── Constants ──────────────────────────────────────────────────────

/// Default number of resident windows.
pub const DEFAULT_BUFFER_SIZE: usize = 5;

/// Startup-range slot whose window must be visited before shifting unlocks.
pub const DEFAULT_UNLOCK_SLOT: usize = 2;

/// Startup-range slot whose window switches the belt to steady state once
/// the unlock slot has been visited.
pub const DEFAULT_TRIGGER_SLOT: usize = 3;
