//! Fixed display slot → logical window mapping.

use crate::WindowIndex;

/// Maps fixed display slots to windows relative to the active window.
///
/// `window_at_slot(slot) = active + (slot - center)`. The mapping depends on
/// the active window only; it never looks at the buffer's storage order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionMapper {
    slots: usize,
    center: usize,
}

impl PositionMapper {
    /// A mapper over `slots` display slots, focused on the middle one.
    pub fn new(slots: usize) -> Self {
        Self {
            slots,
            center: slots / 2,
        }
    }

    /// Number of display slots.
    pub fn slots(&self) -> usize {
        self.slots
    }

    /// The reading-focus slot.
    pub fn center(&self) -> usize {
        self.center
    }

    /// Window displayed at `slot`, or `None` when the slot does not exist or
    /// maps outside `0..total`.
    pub fn window_at_slot(
        &self,
        active: WindowIndex,
        slot: usize,
        total: usize,
    ) -> Option<WindowIndex> {
        if slot >= self.slots {
            return None;
        }
        let window = if slot >= self.center {
            active.checked_add(slot - self.center)?
        } else {
            active.checked_sub(self.center - slot)?
        };
        (window < total).then_some(window)
    }

    /// Slot displaying `window`, if it is within reach of the active window.
    pub fn slot_of_window(&self, active: WindowIndex, window: WindowIndex) -> Option<usize> {
        let slot = if window >= active {
            self.center.checked_add(window - active)?
        } else {
            self.center.checked_sub(active - window)?
        };
        (slot < self.slots).then_some(slot)
    }

    /// Window at every slot, in slot order.
    pub fn layout(&self, active: WindowIndex, total: usize) -> Vec<Option<WindowIndex>> {
        (0..self.slots)
            .map(|slot| self.window_at_slot(active, slot, total))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn center_slot_is_always_the_active_window() {
        let mapper = PositionMapper::new(5);
        for active in [0, 1, 2, 50, 98, 99] {
            assert_eq!(mapper.window_at_slot(active, mapper.center(), 100), Some(active));
        }
    }

    #[test]
    fn slots_are_relative_to_active() {
        let mapper = PositionMapper::new(5);
        assert_eq!(
            mapper.layout(10, 100),
            vec![Some(8), Some(9), Some(10), Some(11), Some(12)]
        );
    }

    #[test]
    fn slots_before_document_start_are_empty() {
        let mapper = PositionMapper::new(5);
        assert_eq!(
            mapper.layout(0, 100),
            vec![None, None, Some(0), Some(1), Some(2)]
        );
    }

    #[test]
    fn slots_past_document_end_are_empty() {
        let mapper = PositionMapper::new(5);
        assert_eq!(mapper.window_at_slot(99, 3, 100), None);
        assert_eq!(mapper.window_at_slot(99, 1, 100), Some(98));
    }

    #[test]
    fn unknown_slot_maps_to_nothing() {
        let mapper = PositionMapper::new(5);
        assert_eq!(mapper.window_at_slot(10, 5, 100), None);
    }

    #[test]
    fn slot_of_window_inverts_the_mapping() {
        let mapper = PositionMapper::new(5);
        for slot in 0..5 {
            let window = mapper.window_at_slot(10, slot, 100).unwrap();
            assert_eq!(mapper.slot_of_window(10, window), Some(slot));
        }
        assert_eq!(mapper.slot_of_window(10, 13), None);
        assert_eq!(mapper.slot_of_window(10, 7), None);
    }

    #[test]
    fn windows_near_the_index_limit_do_not_overflow() {
        let mapper = PositionMapper::new(5);
        assert_eq!(mapper.slot_of_window(0, usize::MAX), None);
        assert_eq!(mapper.slot_of_window(usize::MAX, usize::MAX), Some(2));
        assert_eq!(mapper.slot_of_window(usize::MAX, usize::MAX - 1), Some(1));
        assert_eq!(mapper.window_at_slot(usize::MAX, 4, usize::MAX), None);
        assert_eq!(mapper.window_at_slot(usize::MAX - 1, 0, usize::MAX), Some(usize::MAX - 3));
    }
}
