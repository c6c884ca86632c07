//! Change notifications emitted by the belt.
//!
//! The manager and the content cache report everything observable through
//! [`BeltEvent`] variants: session starts, phase transitions, shifts, refused
//! shifts, load traffic and position changes. Callers implement
//! [`EventHandler`] to drive a UI, collect metrics or log.
//!
//! Handlers are invoked synchronously on the thread that caused the event.
//! Load completions arrive from tokio worker tasks, so handlers must be
//! `Send + Sync` and should return quickly.
//!
//! # Choosing an event handler
//!
//! | Handler | Use case |
//! |---------|----------|
//! | [`NoopHandler`] | Tests or headless use |
//! | [`LoggingHandler`] | Structured logging via `tracing` |
//! | [`FnEventHandler`] | Quick closures for simple callbacks |
//! | [`CompositeEventHandler`] | Compose multiple handlers in order |
//! | Custom `impl EventHandler` | Full control (UI state, metrics) |

use std::sync::Arc;

use tracing::{debug, info, trace, warn};

use crate::WindowIndex;
use crate::content::ContentError;
use crate::offset::{CharacterOffset, ViewportAnchor};
use crate::snapshot::BeltSnapshot;
use crate::window::{Phase, ShiftDirection};

// ── Events ─────────────────────────────────────────────────────────

/// Events emitted by the belt.
#[derive(Debug)]
pub enum BeltEvent<'a> {
    /// `initialize` built a fresh startup buffer.
    SessionStarted {
        start: WindowIndex,
        total: usize,
        buffer: &'a [WindowIndex],
    },
    /// The reader entered a window and the belt accepted it.
    WindowEntered { window: WindowIndex, phase: Phase },
    /// An entry in startup for a window that is not resident. Nothing changed.
    EntryIgnored { window: WindowIndex },
    /// The admission phase changed while entering `window`.
    PhaseTransition {
        from: Phase,
        to: Phase,
        window: WindowIndex,
    },
    /// The buffer shifted by one window.
    Shifted {
        direction: ShiftDirection,
        inserted: WindowIndex,
        evicted: WindowIndex,
    },
    /// A shift was refused at a document edge.
    ShiftBlocked {
        direction: ShiftDirection,
        edge: WindowIndex,
    },
    /// A content generation started.
    LoadRequested { window: WindowIndex },
    /// Content for a resident window is cached and displayable.
    WindowLoaded { window: WindowIndex },
    /// The provider failed for a resident window.
    LoadFailed {
        window: WindowIndex,
        error: &'a ContentError,
    },
    /// A load finished for a window that is no longer resident.
    StaleLoadDiscarded { window: WindowIndex },
    /// An operation was refused because the belt's state does not allow it.
    InvariantViolation { detail: &'a str },
    /// A reading position was captured.
    PositionCaptured {
        window: WindowIndex,
        offset: CharacterOffset,
    },
    /// Stored positions were re-sought after a layout change.
    Relayout {
        /// Each tracked window and its anchor in the new layout.
        restored: &'a [(WindowIndex, ViewportAnchor)],
    },
    /// State after a mutating operation. Emitted once per operation.
    Snapshot(&'a BeltSnapshot),
}

impl BeltEvent<'_> {
    /// The window the event is about, when there is exactly one.
    pub fn window(&self) -> Option<WindowIndex> {
        match self {
            Self::WindowEntered { window, .. }
            | Self::EntryIgnored { window }
            | Self::PhaseTransition { window, .. }
            | Self::LoadRequested { window }
            | Self::WindowLoaded { window }
            | Self::LoadFailed { window, .. }
            | Self::StaleLoadDiscarded { window }
            | Self::PositionCaptured { window, .. } => Some(*window),
            Self::Shifted { inserted, .. } => Some(*inserted),
            _ => None,
        }
    }
}

/// Handler for belt events.
///
/// The default implementation ignores every event.
///
/// # Example
///
/// ```ignore
/// struct SlotRepainter { ui: UiHandle }
///
/// impl EventHandler for SlotRepainter {
///     fn on_event(&self, event: &BeltEvent<'_>) {
///         match event {
///             BeltEvent::WindowLoaded { window } => self.ui.repaint(*window),
///             BeltEvent::Snapshot(snapshot) => self.ui.relayout(snapshot),
///             _ => {}
///         }
///     }
/// }
/// ```
pub trait EventHandler: Send + Sync {
    /// Called for each event.
    fn on_event(&self, event: &BeltEvent<'_>) {
        let _ = event;
    }
}

impl<H: EventHandler + ?Sized> EventHandler for Arc<H> {
    fn on_event(&self, event: &BeltEvent<'_>) {
        (**self).on_event(event);
    }
}

/// A handler that ignores every event.
pub struct NoopHandler;
impl EventHandler for NoopHandler {}

/// An event handler backed by a closure.
///
/// ```ignore
/// let handler = FnEventHandler::new(|event| {
///     if let BeltEvent::ShiftBlocked { direction, .. } = event {
///         println!("end of book ({direction})");
///     }
/// });
/// ```
pub struct FnEventHandler<F>(F)
where
    F: Fn(&BeltEvent<'_>) + Send + Sync;

impl<F> FnEventHandler<F>
where
    F: Fn(&BeltEvent<'_>) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> EventHandler for FnEventHandler<F>
where
    F: Fn(&BeltEvent<'_>) + Send + Sync,
{
    fn on_event(&self, event: &BeltEvent<'_>) {
        (self.0)(event);
    }
}

/// An event handler that delegates to multiple inner handlers, in
/// registration order.
///
/// ```ignore
/// let handler = CompositeEventHandler::new()
///     .with(LoggingHandler)
///     .with(my_ui_handler);
/// ```
pub struct CompositeEventHandler {
    handlers: Vec<Box<dyn EventHandler>>,
}

impl CompositeEventHandler {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Add a handler to the chain.
    pub fn with(mut self, handler: impl EventHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    /// Conditionally add a handler to the chain.
    pub fn with_if(self, condition: bool, handler: impl EventHandler + 'static) -> Self {
        if condition { self.with(handler) } else { self }
    }

    /// Add a handler from an `Option`. `None` is a no-op.
    pub fn with_opt(self, handler: Option<impl EventHandler + 'static>) -> Self {
        match handler {
            Some(h) => self.with(h),
            None => self,
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Default for CompositeEventHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHandler for CompositeEventHandler {
    fn on_event(&self, event: &BeltEvent<'_>) {
        for handler in &self.handlers {
            handler.on_event(event);
        }
    }
}

/// An event handler that logs events via `tracing`.
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn on_event(&self, event: &BeltEvent<'_>) {
        match event {
            BeltEvent::SessionStarted {
                start,
                total,
                buffer,
            } => {
                info!("Session started at window {start} of {total}, resident {buffer:?}");
            }
            BeltEvent::WindowEntered { window, phase } => {
                debug!("Entered window {window} ({phase:?})");
            }
            BeltEvent::EntryIgnored { window } => {
                debug!("Ignored entry into non-resident window {window}");
            }
            BeltEvent::PhaseTransition { from, to, window } => {
                info!("Phase transition at window {window}: {from:?} → {to:?}");
            }
            BeltEvent::Shifted {
                direction,
                inserted,
                evicted,
            } => {
                debug!("Shifted {direction}: +{inserted} -{evicted}");
            }
            BeltEvent::ShiftBlocked { direction, edge } => {
                debug!("{direction} shift blocked at window {edge}");
            }
            BeltEvent::LoadRequested { window } => {
                trace!("Load requested for window {window}");
            }
            BeltEvent::WindowLoaded { window } => {
                debug!("Window {window} loaded");
            }
            BeltEvent::LoadFailed { window, error } => {
                warn!("Window {window} failed to load: {error}");
            }
            BeltEvent::StaleLoadDiscarded { window } => {
                debug!("Stale load for window {window} discarded");
            }
            BeltEvent::InvariantViolation { detail } => {
                warn!("Invariant violation: {detail}");
            }
            BeltEvent::PositionCaptured { window, offset } => {
                debug!("Captured position {offset} in window {window}");
            }
            BeltEvent::Relayout { restored } => {
                info!("Relayout re-sought {} position(s)", restored.len());
            }
            BeltEvent::Snapshot(snapshot) => {
                trace!("Snapshot {}", snapshot.summary_line());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn composite_dispatches_to_every_handler_in_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let first = {
            let order = order.clone();
            FnEventHandler::new(move |_| order.lock().unwrap().push("first"))
        };
        let second = {
            let order = order.clone();
            FnEventHandler::new(move |_| order.lock().unwrap().push("second"))
        };
        let handler = CompositeEventHandler::new()
            .with(first)
            .with_if(false, NoopHandler)
            .with_opt(None::<NoopHandler>)
            .with(second);
        assert_eq!(handler.len(), 2);

        handler.on_event(&BeltEvent::WindowLoaded { window: 1 });
        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn shared_handlers_receive_events() {
        let count = Arc::new(AtomicUsize::new(0));
        let handler = {
            let count = count.clone();
            Arc::new(FnEventHandler::new(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            }))
        };
        let composite = CompositeEventHandler::new().with(handler.clone());
        composite.on_event(&BeltEvent::LoadRequested { window: 0 });
        handler.on_event(&BeltEvent::LoadRequested { window: 0 });
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn window_extracts_the_subject_window() {
        assert_eq!(BeltEvent::WindowLoaded { window: 4 }.window(), Some(4));
        let shifted = BeltEvent::Shifted {
            direction: ShiftDirection::Forward,
            inserted: 9,
            evicted: 4,
        };
        assert_eq!(shifted.window(), Some(9));
        assert_eq!(BeltEvent::InvariantViolation { detail: "x" }.window(), None);
    }

    #[test]
    fn logging_handler_accepts_every_event() {
        let snapshot = BeltSnapshot::empty();
        let error = ContentError::Generation("broken".into());
        let events = [
            BeltEvent::SessionStarted {
                start: 0,
                total: 3,
                buffer: &[0, 1, 2],
            },
            BeltEvent::LoadFailed {
                window: 1,
                error: &error,
            },
            BeltEvent::Relayout { restored: &[] },
            BeltEvent::Snapshot(&snapshot),
        ];
        for event in &events {
            LoggingHandler.on_event(event);
        }
    }
}
