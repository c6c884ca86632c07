//! STARTUP/STEADY admission state machine.
//!
//! The belt opens in [`Phase::Startup`]: the initial windows are resident and
//! navigation only moves focus among them. Shifting is locked until the
//! reader has visited the *unlock* window and then reaches the *trigger*
//! window, at which point the controller reports
//! [`PhaseTransition::EnterSteady`]. The transition is latched: it fires once
//! and stays in effect until the reader navigates back to the unlock window,
//! which reports [`PhaseTransition::RevertToStartup`] and clears the latch so
//! the cycle can repeat.
//!
//! The unlock and trigger windows are the windows sitting at the configured
//! slots of the startup range. When the startup range is too short to reach
//! a slot, that window does not exist and the belt never leaves startup (the
//! whole document is resident anyway).

use serde::{Deserialize, Serialize};

use crate::WindowIndex;

/// Admission phase of the belt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Initial phase: no shifting, focus moves among resident windows.
    Startup,
    /// Steady state: navigation shifts the buffer to stay centered.
    Steady,
}

/// Phase change reported by [`PhaseController::observe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseTransition {
    /// No change.
    None,
    /// Startup → steady: rebuild the buffer around the entered window.
    EnterSteady,
    /// Steady → startup: restore the original startup buffer.
    RevertToStartup,
}

/// Tracks the phase and the unlock latch for one session.
#[derive(Debug, Clone)]
pub struct PhaseController {
    phase: Phase,
    unlocked: bool,
    unlock_window: Option<WindowIndex>,
    trigger_window: Option<WindowIndex>,
    steady_entries: u32,
}

impl Default for PhaseController {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseController {
    /// A controller in startup with no unlock or trigger window armed.
    pub fn new() -> Self {
        Self {
            phase: Phase::Startup,
            unlocked: false,
            unlock_window: None,
            trigger_window: None,
            steady_entries: 0,
        }
    }

    /// Reset to startup and resolve the unlock and trigger windows from the
    /// startup range `start..start + width`.
    pub fn arm(&mut self, start: WindowIndex, width: usize, unlock_slot: usize, trigger_slot: usize) {
        self.phase = Phase::Startup;
        self.unlocked = false;
        self.steady_entries = 0;
        self.unlock_window = (unlock_slot < width).then_some(start + unlock_slot);
        self.trigger_window = (trigger_slot < width).then_some(start + trigger_slot);
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_steady(&self) -> bool {
        self.phase == Phase::Steady
    }

    /// Shifts are only permitted in steady state.
    pub fn can_shift(&self) -> bool {
        self.is_steady()
    }

    /// Whether the unlock window has been visited since the last reset.
    pub fn is_unlocked(&self) -> bool {
        self.unlocked
    }

    pub fn unlock_window(&self) -> Option<WindowIndex> {
        self.unlock_window
    }

    pub fn trigger_window(&self) -> Option<WindowIndex> {
        self.trigger_window
    }

    /// Entering this window while steady reverts to startup. It is the
    /// original unlock window.
    pub fn revert_window(&self) -> Option<WindowIndex> {
        self.unlock_window
    }

    /// How many times steady state has been entered this session.
    pub fn steady_entries(&self) -> u32 {
        self.steady_entries
    }

    /// Feed an entered window and report the resulting transition.
    ///
    /// In startup, the caller must only feed windows that are resident.
    pub fn observe(&mut self, window: WindowIndex) -> PhaseTransition {
        match self.phase {
            Phase::Startup => {
                if Some(window) == self.unlock_window {
                    self.unlocked = true;
                }
                if self.unlocked && Some(window) == self.trigger_window {
                    self.phase = Phase::Steady;
                    self.steady_entries += 1;
                    return PhaseTransition::EnterSteady;
                }
                PhaseTransition::None
            }
            Phase::Steady => {
                if Some(window) == self.revert_window() {
                    self.phase = Phase::Startup;
                    self.unlocked = false;
                    return PhaseTransition::RevertToStartup;
                }
                PhaseTransition::None
            }
        }
    }
}
