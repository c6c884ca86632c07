//! Fixed-capacity buffer of resident windows and the shift algorithm.
//!
//! Entries are kept oldest-first. A forward shift drops the oldest entry and
//! appends `running_max + 1`; a backward shift drops the newest entry and
//! prepends `running_min - 1`. The next id always comes from the running
//! counters, never from reading the current extremes of the collection, so
//! long shift sequences cannot drift or produce colliding ids.

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::{BeltError, Result, WindowIndex};

/// Direction of a buffer shift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShiftDirection {
    /// Toward the end of the document.
    Forward,
    /// Toward the start of the document.
    Backward,
}

impl fmt::Display for ShiftDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forward => f.write_str("forward"),
            Self::Backward => f.write_str("backward"),
        }
    }
}

/// A completed shift: one window left the buffer, one entered it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shift {
    pub direction: ShiftDirection,
    pub inserted: WindowIndex,
    pub evicted: WindowIndex,
}

/// First window of a range of `width` windows centered on `center`, clamped
/// so the range stays inside `0..total`.
///
/// `width` must not exceed `total`.
pub fn centered_start(center: WindowIndex, total: usize, width: usize) -> WindowIndex {
    let start = center.saturating_sub(width / 2);
    start.min(total.saturating_sub(width))
}

/// Insertion-ordered set of resident window indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowBuffer {
    /// Oldest entry at the front, newest at the back.
    entries: VecDeque<WindowIndex>,
    capacity: usize,
    running_min: WindowIndex,
    running_max: WindowIndex,
}

impl WindowBuffer {
    /// Build a buffer holding `min(capacity, total)` consecutive windows
    /// centered on `center` and clamped at the document edges.
    ///
    /// `center` is clamped into the document; `total` and `capacity` must be
    /// non-zero.
    pub fn centered(center: WindowIndex, total: usize, capacity: usize) -> Self {
        debug_assert!(total > 0 && capacity > 0);
        let width = capacity.min(total);
        let center = center.min(total.saturating_sub(1));
        let start = centered_start(center, total, width);
        let end = start + width;
        Self {
            entries: (start..end).collect(),
            capacity,
            running_min: start,
            running_max: end.saturating_sub(1),
        }
    }

    /// Maximum number of resident windows.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `window` is resident.
    pub fn contains(&self, window: WindowIndex) -> bool {
        self.entries.contains(&window)
    }

    /// Resident windows, oldest insertion first.
    pub fn iter(&self) -> impl Iterator<Item = WindowIndex> + '_ {
        self.entries.iter().copied()
    }

    /// Resident windows, oldest insertion first.
    pub fn to_vec(&self) -> Vec<WindowIndex> {
        self.entries.iter().copied().collect()
    }

    /// Lowest window the buffer has been shifted to.
    pub fn running_min(&self) -> WindowIndex {
        self.running_min
    }

    /// Highest window the buffer has been shifted to.
    pub fn running_max(&self) -> WindowIndex {
        self.running_max
    }

    /// Whether the resident windows form one run of consecutive integers.
    pub fn is_contiguous(&self) -> bool {
        let mut sorted = self.to_vec();
        sorted.sort_unstable();
        sorted.windows(2).all(|pair| pair[1] == pair[0] + 1)
    }

    /// Drop the oldest window and append `running_max + 1`.
    ///
    /// Refused with [`BeltError::BoundaryBlocked`] when the new window would
    /// fall at or past `total`; the buffer is left unchanged.
    pub fn shift_forward(&mut self, total: usize) -> Result<Shift> {
        let next = self.running_max + 1;
        if next >= total {
            return Err(BeltError::BoundaryBlocked {
                direction: ShiftDirection::Forward,
                edge: self.running_max,
            });
        }
        let evicted = self
            .entries
            .pop_front()
            .ok_or_else(|| BeltError::InvariantViolation("shift on an empty buffer".into()))?;
        self.entries.push_back(next);
        self.running_max = next;
        self.running_min += 1;
        trace!("buffer shifted forward: +{next} -{evicted}");
        Ok(Shift {
            direction: ShiftDirection::Forward,
            inserted: next,
            evicted,
        })
    }

    /// Drop the newest window and prepend `running_min - 1`.
    ///
    /// Refused with [`BeltError::BoundaryBlocked`] when the buffer already
    /// starts at window 0; the buffer is left unchanged.
    pub fn shift_backward(&mut self) -> Result<Shift> {
        let Some(prev) = self.running_min.checked_sub(1) else {
            return Err(BeltError::BoundaryBlocked {
                direction: ShiftDirection::Backward,
                edge: self.running_min,
            });
        };
        let evicted = self
            .entries
            .pop_back()
            .ok_or_else(|| BeltError::InvariantViolation("shift on an empty buffer".into()))?;
        self.entries.push_front(prev);
        self.running_min = prev;
        self.running_max = self.running_max.saturating_sub(1);
        trace!("buffer shifted backward: +{prev} -{evicted}");
        Ok(Shift {
            direction: ShiftDirection::Backward,
            inserted: prev,
            evicted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn assert_well_formed(buffer: &WindowBuffer) {
        assert!(buffer.len() <= buffer.capacity());
        let distinct: HashSet<_> = buffer.iter().collect();
        assert_eq!(distinct.len(), buffer.len(), "duplicate entries");
        assert!(buffer.is_contiguous());
    }

    #[test]
    fn centered_range_clamps_at_start() {
        let buffer = WindowBuffer::centered(0, 100, 5);
        assert_eq!(buffer.to_vec(), vec![0, 1, 2, 3, 4]);
        assert_eq!(buffer.running_min(), 0);
        assert_eq!(buffer.running_max(), 4);
    }

    #[test]
    fn centered_range_in_the_middle() {
        let buffer = WindowBuffer::centered(3, 100, 5);
        assert_eq!(buffer.to_vec(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn centered_range_clamps_at_end() {
        let buffer = WindowBuffer::centered(99, 100, 5);
        assert_eq!(buffer.to_vec(), vec![95, 96, 97, 98, 99]);
    }

    #[test]
    fn short_document_holds_every_window() {
        let buffer = WindowBuffer::centered(0, 3, 5);
        assert_eq!(buffer.to_vec(), vec![0, 1, 2]);
        assert_eq!(buffer.capacity(), 5);
        assert_well_formed(&buffer);
    }

    #[test]
    fn center_past_the_end_is_clamped() {
        let buffer = WindowBuffer::centered(500, 10, 5);
        assert_eq!(buffer.to_vec(), vec![5, 6, 7, 8, 9]);
    }

    #[test]
    fn consecutive_forward_shifts_insert_sequential_ids() {
        let mut buffer = WindowBuffer::centered(2, 100, 5);
        let initial_max = buffer.running_max();
        let inserted: Vec<_> = (0..20)
            .map(|_| buffer.shift_forward(100).unwrap().inserted)
            .collect();
        let expected: Vec<_> = (initial_max + 1..=initial_max + 20).collect();
        assert_eq!(inserted, expected);
        assert_well_formed(&buffer);
    }

    #[test]
    fn forward_shift_evicts_oldest() {
        let mut buffer = WindowBuffer::centered(2, 100, 5);
        let shift = buffer.shift_forward(100).unwrap();
        assert_eq!(shift.evicted, 0);
        assert_eq!(shift.inserted, 5);
        assert_eq!(buffer.to_vec(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn backward_shift_prepends_below_running_min() {
        let mut buffer = WindowBuffer::centered(10, 100, 5);
        let shift = buffer.shift_backward().unwrap();
        assert_eq!(shift.inserted, 7);
        assert_eq!(shift.evicted, 12);
        assert_eq!(buffer.to_vec(), vec![7, 8, 9, 10, 11]);
    }

    #[test]
    fn interleaved_shifts_never_repeat_or_drift() {
        let mut buffer = WindowBuffer::centered(10, 100, 5);
        for step in 0..50 {
            let before_max = buffer.running_max();
            let before_min = buffer.running_min();
            if step % 3 == 2 {
                let shift = buffer.shift_backward().unwrap();
                assert_eq!(shift.inserted, before_min - 1);
            } else {
                let shift = buffer.shift_forward(100).unwrap();
                assert_eq!(shift.inserted, before_max + 1);
            }
            assert_well_formed(&buffer);
            assert_eq!(buffer.len(), 5);
        }
    }

    #[test]
    fn forward_shift_at_document_end_is_blocked() {
        let mut buffer = WindowBuffer::centered(99, 100, 5);
        let before = buffer.clone();
        let err = buffer.shift_forward(100).unwrap_err();
        assert_eq!(
            err,
            BeltError::BoundaryBlocked {
                direction: ShiftDirection::Forward,
                edge: 99
            }
        );
        assert_eq!(buffer, before);
    }

    #[test]
    fn backward_shift_at_document_start_is_blocked() {
        let mut buffer = WindowBuffer::centered(0, 100, 5);
        let before = buffer.clone();
        assert!(buffer.shift_backward().unwrap_err().is_boundary());
        assert_eq!(buffer, before);
    }

    #[test]
    fn short_document_blocks_every_shift() {
        let mut buffer = WindowBuffer::centered(1, 3, 5);
        assert!(buffer.shift_forward(3).is_err());
        assert!(buffer.shift_backward().is_err());
        assert_eq!(buffer.to_vec(), vec![0, 1, 2]);
    }

    #[test]
    fn centered_start_handles_small_widths() {
        assert_eq!(centered_start(0, 1, 1), 0);
        assert_eq!(centered_start(7, 10, 1), 7);
        assert_eq!(centered_start(7, 10, 4), 5);
    }
}
