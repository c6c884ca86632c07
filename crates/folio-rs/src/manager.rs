//! The conveyor belt: one owner for every residency decision.
//!
//! [`ConveyorBeltManager`] composes the resident [`WindowBuffer`], the
//! [`PhaseController`], the [`PositionMapper`], the [`OffsetTracker`] and the
//! [`WindowContentCache`]. It is the only type that mutates any of them, and
//! every mutation takes `&mut self`, so whoever owns the manager is the
//! single serialization point for navigation. [`BeltRuntime`] provides such
//! an owner as a tokio task.
//!
//! # Navigation
//!
//! In [`Phase::Startup`], entering a resident window only moves focus.
//! Entering a window that is not resident is ignored. Once the reader has
//! visited the unlock window and then enters the trigger window, the belt
//! switches to [`Phase::Steady`] and rebuilds the buffer centered on it.
//!
//! In steady state the belt moves toward the entered window one window at a
//! time, shifting whenever needed to keep the buffer centered on the active
//! window (clamped at the document edges). Entering the original unlock
//! window reverts to the startup buffer.
//!
//! Every operation that changes observable state emits exactly one
//! [`BeltEvent::Snapshot`].
//!
//! # Runtime
//!
//! Loads progress in the background only when the manager is driven from
//! inside a tokio runtime. Without one, a load runs when something awaits
//! it: the [`BatchLoad`]s returned by navigation, or a
//! [`request_load`](WindowContentCache::request_load) through
//! [`cache`](ConveyorBeltManager::cache) for a window shifted in by
//! [`shift_forward`](ConveyorBeltManager::shift_forward) or
//! [`shift_backward`](ConveyorBeltManager::shift_backward). Until then the
//! window reports [`LoadState::Loading`].
//!
//! [`BeltRuntime`]: crate::runtime::BeltRuntime

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::BeltConfig;
use crate::content::{BatchLoad, ContentProvider, LoadState, WindowContentCache};
use crate::events::{BeltEvent, EventHandler, NoopHandler};
use crate::offset::{
    CharacterOffset, LayoutEngine, OffsetTracker, ResumePosition, ViewportAnchor,
};
use crate::snapshot::BeltSnapshot;
use crate::window::{
    Phase, PhaseController, PhaseTransition, PositionMapper, Shift, ShiftDirection, WindowBuffer,
    centered_start,
};
use crate::{BeltError, Result, WindowIndex};

/// What one [`on_window_entered`](ConveyorBeltManager::on_window_entered)
/// call did.
#[derive(Debug)]
pub struct NavigationOutcome {
    /// The window that was entered.
    pub window: WindowIndex,
    /// Active window afterwards.
    pub active: WindowIndex,
    /// Phase change, as `(from, to)`.
    pub transition: Option<(Phase, Phase)>,
    /// Shifts performed, in order.
    pub shifts: Vec<Shift>,
    /// Set when a step toward the window was refused at a document edge.
    pub blocked: Option<ShiftDirection>,
    /// The entry was ignored: startup entry into a non-resident window.
    pub ignored: bool,
    /// Loads started for windows that became resident.
    pub loads: BatchLoad,
}

impl NavigationOutcome {
    fn unchanged(window: WindowIndex, active: WindowIndex) -> Self {
        Self {
            window,
            active,
            transition: None,
            shifts: Vec::new(),
            blocked: None,
            ignored: false,
            loads: BatchLoad::empty(),
        }
    }

    /// Whether the buffer contents changed.
    pub fn buffer_changed(&self) -> bool {
        !self.shifts.is_empty() || self.transition.is_some()
    }

    /// Take the loads out, leaving an empty batch.
    pub fn take_loads(&mut self) -> BatchLoad {
        std::mem::replace(&mut self.loads, BatchLoad::empty())
    }
}

struct Session {
    total: usize,
    active: WindowIndex,
    buffer: WindowBuffer,
    /// The buffer built by `initialize`, restored on revert.
    startup_buffer: WindowBuffer,
}

/// Orchestrates residency, phase, slot mapping and content loading.
pub struct ConveyorBeltManager {
    config: BeltConfig,
    mapper: PositionMapper,
    phase: PhaseController,
    session: Option<Session>,
    cache: WindowContentCache,
    offsets: OffsetTracker,
    layout: Option<Arc<dyn LayoutEngine>>,
    handler: Arc<dyn EventHandler>,
    sequence: u64,
}

impl ConveyorBeltManager {
    /// Create a manager that loads content from `provider`.
    ///
    /// Fails with [`BeltError::InvalidConfig`] when `config` does not
    /// validate.
    pub fn new(provider: Arc<dyn ContentProvider>, config: BeltConfig) -> Result<Self> {
        config.validate()?;
        let cache = WindowContentCache::new(provider).with_retry(config.retry.clone());
        Ok(Self {
            mapper: PositionMapper::new(config.buffer_size),
            config,
            phase: PhaseController::new(),
            session: None,
            cache,
            offsets: OffsetTracker::new(),
            layout: None,
            handler: Arc::new(NoopHandler),
            sequence: 0,
        })
    }

    /// Report belt and load events to `handler`.
    pub fn with_event_handler(mut self, handler: impl EventHandler + 'static) -> Self {
        let handler: Arc<dyn EventHandler> = Arc::new(handler);
        self.cache = self.cache.clone().with_event_handler(Arc::clone(&handler));
        self.handler = handler;
        self
    }

    /// Attach the layout engine used for position capture and restore.
    pub fn with_layout_engine(mut self, engine: Arc<dyn LayoutEngine>) -> Self {
        self.layout = Some(engine);
        self
    }

    // ── Session ────────────────────────────────────────────────────

    /// Start a session on a document of `total` windows, focused on `start`.
    ///
    /// `start` is clamped into the document. Any previous session is
    /// discarded together with its cache and offsets. Returns the loads for
    /// the startup buffer; await them before displaying it.
    pub fn initialize(&mut self, start: WindowIndex, total: usize) -> Result<BatchLoad> {
        if total == 0 {
            warn!("refusing to initialize an empty document");
            return Err(BeltError::EmptyDocument);
        }
        let start = start.min(total - 1);
        self.cache.clear();
        self.offsets.clear();

        let buffer = WindowBuffer::centered(start, total, self.config.buffer_size);
        self.phase.arm(
            buffer.running_min(),
            buffer.len(),
            self.config.unlock_slot,
            self.config.trigger_slot,
        );
        let windows = buffer.to_vec();
        info!("session started at window {start} of {total}, resident {windows:?}");
        self.handler.on_event(&BeltEvent::SessionStarted {
            start,
            total,
            buffer: &windows,
        });

        for &window in &windows {
            self.cache.admit(window);
        }
        let loads = self.cache.request_load_batch(windows);
        self.session = Some(Session {
            total,
            active: start,
            startup_buffer: buffer.clone(),
            buffer,
        });
        self.publish();
        Ok(loads)
    }

    /// Report that the reader entered `window`.
    ///
    /// Entering the active window again changes nothing. A step toward a
    /// window past the end of the document is refused and reported in
    /// [`NavigationOutcome::blocked`]; that is not an error.
    pub fn on_window_entered(&mut self, window: WindowIndex) -> Result<NavigationOutcome> {
        let session = self.session.as_ref().ok_or(BeltError::NotInitialized)?;
        if window == session.active {
            return Ok(NavigationOutcome::unchanged(window, window));
        }
        match self.phase.phase() {
            Phase::Startup => self.enter_in_startup(window),
            Phase::Steady => self.enter_in_steady(window),
        }
    }

    fn enter_in_startup(&mut self, window: WindowIndex) -> Result<NavigationOutcome> {
        let session = self.session.as_mut().ok_or(BeltError::NotInitialized)?;
        if !session.buffer.contains(window) {
            debug!("ignoring startup entry into non-resident window {window}");
            self.handler.on_event(&BeltEvent::EntryIgnored { window });
            let mut outcome = NavigationOutcome::unchanged(window, session.active);
            outcome.ignored = true;
            return Ok(outcome);
        }

        session.active = window;
        let mut outcome = NavigationOutcome::unchanged(window, window);
        if self.phase.observe(window) == PhaseTransition::EnterSteady {
            info!("entering steady state at window {window}");
            self.handler.on_event(&BeltEvent::PhaseTransition {
                from: Phase::Startup,
                to: Phase::Steady,
                window,
            });
            outcome.transition = Some((Phase::Startup, Phase::Steady));
            outcome.loads = self.rebuild_centered(window)?;
        }
        self.handler.on_event(&BeltEvent::WindowEntered {
            window,
            phase: self.phase.phase(),
        });
        self.publish();
        Ok(outcome)
    }

    fn enter_in_steady(&mut self, window: WindowIndex) -> Result<NavigationOutcome> {
        if self.phase.revert_window() == Some(window) {
            self.phase.observe(window);
            return self.revert_to_startup(window);
        }

        let session = self.session.as_mut().ok_or(BeltError::NotInitialized)?;
        let total = session.total;
        let mut shifts = Vec::new();
        let mut blocked = None;
        let start_active = session.active;

        while session.active != window {
            let forward = window > session.active;
            let Some(next) = (if forward {
                Some(session.active + 1).filter(|&next| next < total)
            } else {
                session.active.checked_sub(1)
            }) else {
                let (direction, edge) = if forward {
                    (ShiftDirection::Forward, session.buffer.running_max())
                } else {
                    (ShiftDirection::Backward, session.buffer.running_min())
                };
                debug!("{direction} step blocked at window {edge}");
                self.handler
                    .on_event(&BeltEvent::ShiftBlocked { direction, edge });
                blocked = Some(direction);
                break;
            };

            let desired = centered_start(next, total, session.buffer.len());
            let current = session.buffer.running_min();
            let shifted = if desired > current {
                Some(session.buffer.shift_forward(total))
            } else if desired < current {
                Some(session.buffer.shift_backward())
            } else {
                None
            };
            match shifted {
                Some(Ok(shift)) => {
                    self.cache.evict(shift.evicted);
                    self.offsets.evict(shift.evicted);
                    self.handler.on_event(&BeltEvent::Shifted {
                        direction: shift.direction,
                        inserted: shift.inserted,
                        evicted: shift.evicted,
                    });
                    shifts.push(shift);
                }
                Some(Err(BeltError::BoundaryBlocked { direction, edge })) => {
                    self.handler
                        .on_event(&BeltEvent::ShiftBlocked { direction, edge });
                    blocked = Some(direction);
                    break;
                }
                Some(Err(e)) => return Err(e),
                None => {}
            }
            session.active = next;
        }

        // Windows inserted and evicted again within this event never load.
        let inserted: Vec<_> = shifts
            .iter()
            .map(|shift| shift.inserted)
            .filter(|&w| session.buffer.contains(w))
            .collect();
        for &w in &inserted {
            self.cache.admit(w);
        }
        let loads = self.cache.request_load_batch(inserted);

        let active = session.active;
        let moved = active != start_active;
        if !shifts.is_empty() {
            debug!(
                "moved {start_active} → {active} with {} shift(s), resident {:?}",
                shifts.len(),
                session.buffer.to_vec()
            );
        }
        if moved {
            self.handler.on_event(&BeltEvent::WindowEntered {
                window: active,
                phase: Phase::Steady,
            });
            self.publish();
        }
        Ok(NavigationOutcome {
            window,
            active,
            transition: None,
            shifts,
            blocked,
            ignored: false,
            loads,
        })
    }

    fn revert_to_startup(&mut self, window: WindowIndex) -> Result<NavigationOutcome> {
        let session = self.session.as_mut().ok_or(BeltError::NotInitialized)?;
        info!("reverting to startup at window {window}");
        self.handler.on_event(&BeltEvent::PhaseTransition {
            from: Phase::Steady,
            to: Phase::Startup,
            window,
        });

        self.cache.clear();
        let startup = session.startup_buffer.clone();
        self.offsets.retain(|w| startup.contains(w));
        for w in startup.iter() {
            self.cache.admit(w);
        }
        let loads = self.cache.request_load_batch(startup.iter());
        session.buffer = startup;
        session.active = window;

        self.handler.on_event(&BeltEvent::WindowEntered {
            window,
            phase: Phase::Startup,
        });
        self.publish();
        let mut outcome = NavigationOutcome::unchanged(window, window);
        outcome.transition = Some((Phase::Steady, Phase::Startup));
        outcome.loads = loads;
        Ok(outcome)
    }

    /// Replace the buffer with a fresh range centered on `center`.
    fn rebuild_centered(&mut self, center: WindowIndex) -> Result<BatchLoad> {
        let session = self.session.as_mut().ok_or(BeltError::NotInitialized)?;
        let rebuilt = WindowBuffer::centered(center, session.total, self.config.buffer_size);
        for w in session.buffer.iter().filter(|&w| !rebuilt.contains(w)) {
            self.cache.evict(w);
            self.offsets.evict(w);
        }
        for w in rebuilt.iter() {
            self.cache.admit(w);
        }
        let loads = self.cache.request_load_batch(rebuilt.iter());
        debug!("rebuilt buffer around window {center}: {:?}", rebuilt.to_vec());
        session.buffer = rebuilt;
        Ok(loads)
    }

    // ── Direct shifts ──────────────────────────────────────────────

    /// Shift the buffer forward by one window and advance the active window.
    ///
    /// The inserted window starts loading in the background; outside a
    /// tokio runtime, await `cache().request_load(shift.inserted)` to drive
    /// it. Only permitted in steady state; otherwise this is a no-op reported as
    /// [`BeltError::InvariantViolation`]. Refused at the end of the document
    /// with [`BeltError::BoundaryBlocked`].
    pub fn shift_forward(&mut self) -> Result<Shift> {
        self.direct_shift(ShiftDirection::Forward)
    }

    /// Shift the buffer backward by one window and move the active window
    /// back. Same rules as [`shift_forward`](Self::shift_forward).
    pub fn shift_backward(&mut self) -> Result<Shift> {
        self.direct_shift(ShiftDirection::Backward)
    }

    fn direct_shift(&mut self, direction: ShiftDirection) -> Result<Shift> {
        if self.session.is_none() {
            return Err(BeltError::NotInitialized);
        }
        if !self.phase.can_shift() {
            let detail = format!("{direction} shift attempted outside steady state");
            warn!("{detail}");
            self.handler
                .on_event(&BeltEvent::InvariantViolation { detail: &detail });
            return Err(BeltError::InvariantViolation(detail));
        }

        let session = self.session.as_mut().ok_or(BeltError::NotInitialized)?;
        let result = match direction {
            ShiftDirection::Forward => session.buffer.shift_forward(session.total),
            ShiftDirection::Backward => session.buffer.shift_backward(),
        };
        let shift = match result {
            Ok(shift) => shift,
            Err(BeltError::BoundaryBlocked { direction, edge }) => {
                debug!("{direction} shift blocked at window {edge}");
                self.handler
                    .on_event(&BeltEvent::ShiftBlocked { direction, edge });
                return Err(BeltError::BoundaryBlocked { direction, edge });
            }
            Err(e) => return Err(e),
        };

        // The inserted window lies past the active one, so the active window
        // stays inside the document.
        session.active = match direction {
            ShiftDirection::Forward => session.active + 1,
            ShiftDirection::Backward => session.active.saturating_sub(1),
        };
        self.cache.evict(shift.evicted);
        self.offsets.evict(shift.evicted);
        self.cache.admit(shift.inserted);
        self.handler.on_event(&BeltEvent::Shifted {
            direction: shift.direction,
            inserted: shift.inserted,
            evicted: shift.evicted,
        });
        // Runs in the background; `cache().request_load` joins it.
        drop(self.cache.request_load(shift.inserted));
        self.publish();
        Ok(shift)
    }

    // ── Positions ──────────────────────────────────────────────────

    fn layout_engine(&self) -> Result<Arc<dyn LayoutEngine>> {
        self.layout.clone().ok_or(BeltError::NoLayoutEngine)
    }

    /// Capture the reading position at `anchor` in the active window.
    pub fn capture_position(&mut self, anchor: ViewportAnchor) -> Result<CharacterOffset> {
        let window = self.active_window().ok_or(BeltError::NotInitialized)?;
        self.capture_offset(window, anchor)
    }

    /// Capture the position at `anchor` in any resident `window`.
    pub fn capture_offset(
        &mut self,
        window: WindowIndex,
        anchor: ViewportAnchor,
    ) -> Result<CharacterOffset> {
        let engine = self.layout_engine()?;
        let session = self.session.as_ref().ok_or(BeltError::NotInitialized)?;
        if !session.buffer.contains(window) {
            return Err(BeltError::NotResident(window));
        }
        let offset = self.offsets.capture(engine.as_ref(), window, anchor);
        debug!("captured {offset} in window {window}");
        self.handler
            .on_event(&BeltEvent::PositionCaptured { window, offset });
        self.publish();
        Ok(offset)
    }

    /// Store a known offset for a resident window, e.g. a saved bookmark.
    pub fn record_position(&mut self, window: WindowIndex, offset: CharacterOffset) -> Result<()> {
        let session = self.session.as_ref().ok_or(BeltError::NotInitialized)?;
        if !session.buffer.contains(window) {
            return Err(BeltError::NotResident(window));
        }
        self.offsets.record(window, offset);
        self.handler
            .on_event(&BeltEvent::PositionCaptured { window, offset });
        self.publish();
        Ok(())
    }

    /// Seek to `window`'s stored position in the current layout.
    ///
    /// Returns `None` when no position was captured for it.
    pub fn restore_position(&self, window: WindowIndex) -> Result<Option<ViewportAnchor>> {
        let engine = self.layout_engine()?;
        Ok(self.offsets.restore(engine.as_ref(), window))
    }

    /// Capture the active position before the layout changes.
    pub fn begin_relayout(&mut self, anchor: ViewportAnchor) -> Result<CharacterOffset> {
        self.capture_position(anchor)
    }

    /// Re-seek every stored position after the layout changed.
    ///
    /// Returns the new anchor of each tracked window, ascending.
    pub fn finish_relayout(&mut self) -> Result<Vec<(WindowIndex, ViewportAnchor)>> {
        let engine = self.layout_engine()?;
        if self.session.is_none() {
            return Err(BeltError::NotInitialized);
        }
        let restored = self.offsets.relayout(engine.as_ref());
        info!("relayout restored {} position(s)", restored.len());
        self.handler
            .on_event(&BeltEvent::Relayout { restored: &restored });
        self.publish();
        Ok(restored)
    }

    /// Where to resume reading: the active window and its captured offset.
    pub fn resume_position(&self) -> Option<ResumePosition> {
        let window = self.active_window()?;
        let offset = self.offsets.get(window)?;
        Some(ResumePosition { window, offset })
    }

    // ── Queries ────────────────────────────────────────────────────

    /// Window displayed at `slot`, or `None` when the slot is empty or the
    /// belt is not initialized.
    pub fn window_at_slot(&self, slot: usize) -> Option<WindowIndex> {
        let session = self.session.as_ref()?;
        self.mapper
            .window_at_slot(session.active, slot, session.total)
    }

    pub fn phase(&self) -> Phase {
        self.phase.phase()
    }

    /// Whether the unlock window has been visited since the last reset.
    pub fn is_unlocked(&self) -> bool {
        self.phase.is_unlocked()
    }

    pub fn active_window(&self) -> Option<WindowIndex> {
        self.session.as_ref().map(|s| s.active)
    }

    /// Windows in the document, or 0 before `initialize`.
    pub fn total_windows(&self) -> usize {
        self.session.as_ref().map_or(0, |s| s.total)
    }

    /// Resident windows, oldest insertion first.
    pub fn buffer(&self) -> Vec<WindowIndex> {
        self.session
            .as_ref()
            .map(|s| s.buffer.to_vec())
            .unwrap_or_default()
    }

    pub fn is_resident(&self, window: WindowIndex) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.buffer.contains(window))
    }

    pub fn load_state(&self, window: WindowIndex) -> LoadState {
        self.cache.load_state(window)
    }

    pub fn cache(&self) -> &WindowContentCache {
        &self.cache
    }

    pub fn offsets(&self) -> &OffsetTracker {
        &self.offsets
    }

    pub fn config(&self) -> &BeltConfig {
        &self.config
    }

    /// Sequence number of the latest published snapshot.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Current observable state.
    pub fn snapshot(&self) -> BeltSnapshot {
        let Some(session) = &self.session else {
            return BeltSnapshot {
                sequence: self.sequence,
                ..BeltSnapshot::empty()
            };
        };
        let buffer = session.buffer.to_vec();
        BeltSnapshot {
            sequence: self.sequence,
            phase: self.phase.phase(),
            active_window: Some(session.active),
            total_windows: session.total,
            slots: self.mapper.layout(session.active, session.total),
            readiness: self.cache.load_states(&buffer),
            buffer,
            resume: self.resume_position(),
        }
    }

    fn publish(&mut self) {
        self.sequence += 1;
        let snapshot = self.snapshot();
        self.handler.on_event(&BeltEvent::Snapshot(&snapshot));
    }

    /// Check the structural invariants of the current state.
    ///
    /// The buffer never exceeds its capacity or holds duplicates; in steady
    /// state it is contiguous and contains the active window; cached content
    /// and stored offsets belong to resident windows only.
    pub fn verify(&self) -> Result<()> {
        let Some(session) = &self.session else {
            return Ok(());
        };
        let windows = session.buffer.to_vec();
        let distinct: HashSet<_> = windows.iter().copied().collect();
        if windows.len() > self.config.buffer_size || distinct.len() != windows.len() {
            return Err(BeltError::InvariantViolation(format!(
                "malformed buffer {windows:?}"
            )));
        }
        if self.phase.is_steady()
            && (!session.buffer.is_contiguous() || !distinct.contains(&session.active))
        {
            return Err(BeltError::InvariantViolation(format!(
                "steady buffer {windows:?} not contiguous around window {}",
                session.active
            )));
        }
        if let Some(stray) = self
            .cache
            .cached_windows()
            .into_iter()
            .chain(self.offsets.windows())
            .find(|w| !distinct.contains(w))
        {
            return Err(BeltError::InvariantViolation(format!(
                "window {stray} has state but is not resident"
            )));
        }
        Ok(())
    }
}
