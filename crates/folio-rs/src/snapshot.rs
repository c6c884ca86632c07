//! Serializable projection of the belt's observable state.
//!
//! A [`BeltSnapshot`] is taken after every mutating operation and published
//! through [`BeltEvent::Snapshot`](crate::events::BeltEvent::Snapshot) and the
//! runtime's watch channel. It carries everything a frontend needs to lay out
//! the display slots without querying the manager: phase, active window,
//! resident buffer, slot mapping and per-window readiness.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::WindowIndex;
use crate::content::LoadState;
use crate::offset::ResumePosition;
use crate::window::Phase;

/// Point-in-time view of the belt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeltSnapshot {
    /// Incremented once per mutating operation.
    pub sequence: u64,
    pub phase: Phase,
    /// `None` before `initialize`.
    pub active_window: Option<WindowIndex>,
    pub total_windows: usize,
    /// Resident windows, oldest insertion first.
    pub buffer: Vec<WindowIndex>,
    /// Window displayed at each slot, in slot order.
    pub slots: Vec<Option<WindowIndex>>,
    /// Readiness of every resident window.
    pub readiness: BTreeMap<WindowIndex, LoadState>,
    /// Reading position in the active window, when one was captured.
    pub resume: Option<ResumePosition>,
}

impl Default for BeltSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}

impl BeltSnapshot {
    /// The snapshot of a belt that has not been initialized.
    pub fn empty() -> Self {
        Self {
            sequence: 0,
            phase: Phase::Startup,
            active_window: None,
            total_windows: 0,
            buffer: Vec::new(),
            slots: Vec::new(),
            readiness: BTreeMap::new(),
            resume: None,
        }
    }

    pub fn window_at_slot(&self, slot: usize) -> Option<WindowIndex> {
        self.slots.get(slot).copied().flatten()
    }

    /// Whether `window`'s content is cached.
    pub fn is_ready(&self, window: WindowIndex) -> bool {
        self.readiness.get(&window).is_some_and(LoadState::is_ready)
    }

    /// Number of resident windows whose content is cached.
    pub fn ready_count(&self) -> usize {
        self.readiness.values().filter(|s| s.is_ready()).count()
    }

    /// Compact human-readable form, e.g.
    /// `#4 steady active=3 buffer=[1, 2, 3, 4, 5] ready=5/5`.
    pub fn summary_line(&self) -> String {
        let phase = match self.phase {
            Phase::Startup => "startup",
            Phase::Steady => "steady",
        };
        let active = self
            .active_window
            .map_or_else(|| "-".to_string(), |w| w.to_string());
        format!(
            "#{} {phase} active={active} buffer={:?} ready={}/{}",
            self.sequence,
            self.buffer,
            self.ready_count(),
            self.buffer.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offset::CharacterOffset;

    fn sample() -> BeltSnapshot {
        BeltSnapshot {
            sequence: 4,
            phase: Phase::Steady,
            active_window: Some(3),
            total_windows: 100,
            buffer: vec![1, 2, 3, 4, 5],
            slots: vec![Some(1), Some(2), Some(3), Some(4), Some(5)],
            readiness: [
                (1, LoadState::Ready),
                (2, LoadState::Ready),
                (3, LoadState::Ready),
                (4, LoadState::Loading),
                (5, LoadState::Failed("busy".into())),
            ]
            .into_iter()
            .collect(),
            resume: Some(ResumePosition {
                window: 3,
                offset: CharacterOffset(1200),
            }),
        }
    }

    #[test]
    fn empty_snapshot_has_no_active_window() {
        let snap = BeltSnapshot::default();
        assert_eq!(snap.phase, Phase::Startup);
        assert_eq!(snap.active_window, None);
        assert_eq!(snap.window_at_slot(2), None);
        assert_eq!(snap.summary_line(), "#0 startup active=- buffer=[] ready=0/0");
    }

    #[test]
    fn summary_counts_ready_windows() {
        let snap = sample();
        assert_eq!(
            snap.summary_line(),
            "#4 steady active=3 buffer=[1, 2, 3, 4, 5] ready=3/5"
        );
        assert!(snap.is_ready(3));
        assert!(!snap.is_ready(4));
        assert_eq!(snap.window_at_slot(2), Some(3));
        assert_eq!(snap.window_at_slot(9), None);
    }

    #[test]
    fn snapshot_serializes_to_json() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["phase"], "steady");
        assert_eq!(json["active_window"], 3);
        assert_eq!(json["readiness"]["3"]["state"], "ready");
        assert_eq!(json["readiness"]["5"]["reason"], "busy");
        assert_eq!(json["resume"]["offset"], 1200);
    }

    #[test]
    fn snapshot_survives_json() {
        let snap = sample();
        let text = serde_json::to_string(&snap).unwrap();
        let back: BeltSnapshot = serde_json::from_str(&text).unwrap();
        assert_eq!(back, snap);
    }
}
