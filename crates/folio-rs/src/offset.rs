//! Layout-independent reading positions.
//!
//! A page index stops meaning anything as soon as the font size changes. A
//! [`CharacterOffset`] (characters from the start of a window to the
//! reference point) does not, so positions are captured as offsets and
//! translated back into a [`ViewportAnchor`] of whatever layout is current
//! when they are restored.
//!
//! The translation in both directions belongs to the caller's
//! [`LayoutEngine`]. [`OffsetTracker`] stores one offset per resident window
//! and re-seeks all of them against the new layout on
//! [`relayout`](OffsetTracker::relayout).

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::WindowIndex;

/// Characters from a window's start to a reference point.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct CharacterOffset(pub usize);

impl fmt::Display for CharacterOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "char {}", self.0)
    }
}

/// A position in the current layout, in the layout engine's own units
/// (typically a page or column index). Only meaningful until the next
/// layout change.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ViewportAnchor(pub usize);

/// Where to resume reading: a window and an offset into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumePosition {
    pub window: WindowIndex,
    pub offset: CharacterOffset,
}

/// Translates between layout positions and character offsets.
///
/// Implemented by the text layout collaborator. Both methods describe the
/// layout as it is at the time of the call.
pub trait LayoutEngine: Send + Sync {
    /// Characters in `window` preceding `anchor`.
    fn character_offset(&self, window: WindowIndex, anchor: ViewportAnchor) -> CharacterOffset;

    /// Bring the position holding `offset` into view and return its anchor.
    fn seek(&self, window: WindowIndex, offset: CharacterOffset) -> ViewportAnchor;
}

/// Captured offsets, one per window.
#[derive(Debug, Clone, Default)]
pub struct OffsetTracker {
    offsets: HashMap<WindowIndex, CharacterOffset>,
    relayouts: u64,
}

impl OffsetTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture the offset of `anchor` in `window` and remember it.
    pub fn capture(
        &mut self,
        engine: &dyn LayoutEngine,
        window: WindowIndex,
        anchor: ViewportAnchor,
    ) -> CharacterOffset {
        let offset = engine.character_offset(window, anchor);
        self.offsets.insert(window, offset);
        offset
    }

    /// Remember an offset obtained elsewhere, e.g. a persisted bookmark.
    pub fn record(&mut self, window: WindowIndex, offset: CharacterOffset) {
        self.offsets.insert(window, offset);
    }

    pub fn get(&self, window: WindowIndex) -> Option<CharacterOffset> {
        self.offsets.get(&window).copied()
    }

    /// Seek to the stored offset of `window`, if there is one.
    pub fn restore(&self, engine: &dyn LayoutEngine, window: WindowIndex) -> Option<ViewportAnchor> {
        self.get(window).map(|offset| engine.seek(window, offset))
    }

    /// Forget `window`'s offset. Returns whether one was stored.
    pub fn evict(&mut self, window: WindowIndex) -> bool {
        self.offsets.remove(&window).is_some()
    }

    /// Keep only offsets of windows for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(WindowIndex) -> bool) {
        self.offsets.retain(|&window, _| keep(window));
    }

    pub fn clear(&mut self) {
        self.offsets.clear();
    }

    /// Re-seek every stored offset against the engine's current layout.
    ///
    /// Offsets are kept as they are; only the anchors change. Returns the new
    /// anchor of each tracked window in ascending window order.
    pub fn relayout(&mut self, engine: &dyn LayoutEngine) -> Vec<(WindowIndex, ViewportAnchor)> {
        self.relayouts += 1;
        let mut restored: Vec<_> = self
            .offsets
            .iter()
            .map(|(&window, &offset)| (window, engine.seek(window, offset)))
            .collect();
        restored.sort_unstable_by_key(|&(window, _)| window);
        debug!("relayout #{} re-sought {} offset(s)", self.relayouts, restored.len());
        restored
    }

    /// Number of layout changes handled.
    pub fn relayouts(&self) -> u64 {
        self.relayouts
    }

    /// Windows with a stored offset, ascending.
    pub fn windows(&self) -> Vec<WindowIndex> {
        let mut windows: Vec<_> = self.offsets.keys().copied().collect();
        windows.sort_unstable();
        windows
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}

// ── Fixed page layout ──────────────────────────────────────────────

/// Paginates every window into pages of a fixed number of characters.
///
/// A stand-in for a real text layout: changing
/// [`chars_per_page`](Self::set_chars_per_page) models a font-size change.
/// Anchors are page indices.
#[derive(Debug)]
pub struct FixedPageLayout {
    chars_per_page: AtomicUsize,
    window_chars: usize,
    /// Page each window was last sought to.
    pages: Mutex<HashMap<WindowIndex, ViewportAnchor>>,
}

impl FixedPageLayout {
    /// A layout over windows of `window_chars` characters.
    ///
    /// `chars_per_page` is raised to at least 1.
    pub fn new(window_chars: usize, chars_per_page: usize) -> Self {
        Self {
            chars_per_page: AtomicUsize::new(chars_per_page.max(1)),
            window_chars,
            pages: Mutex::new(HashMap::new()),
        }
    }

    pub fn chars_per_page(&self) -> usize {
        self.chars_per_page.load(Ordering::SeqCst)
    }

    /// Change the page size. Existing anchors become meaningless.
    pub fn set_chars_per_page(&self, chars: usize) {
        self.chars_per_page.store(chars.max(1), Ordering::SeqCst);
    }

    /// Pages per window in the current layout (at least one).
    pub fn page_count(&self) -> usize {
        self.window_chars.div_ceil(self.chars_per_page()).max(1)
    }

    /// Page `window` was last sought to.
    pub fn current_page(&self, window: WindowIndex) -> Option<ViewportAnchor> {
        self.pages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&window)
            .copied()
    }
}

impl LayoutEngine for FixedPageLayout {
    fn character_offset(&self, _window: WindowIndex, anchor: ViewportAnchor) -> CharacterOffset {
        let chars = anchor.0.saturating_mul(self.chars_per_page());
        CharacterOffset(chars.min(self.window_chars))
    }

    fn seek(&self, window: WindowIndex, offset: CharacterOffset) -> ViewportAnchor {
        let page = (offset.0 / self.chars_per_page()).min(self.page_count() - 1);
        let anchor = ViewportAnchor(page);
        self.pages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(window, anchor);
        anchor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_are_counted_in_characters() {
        let layout = FixedPageLayout::new(4000, 1000);
        assert_eq!(layout.page_count(), 4);
        assert_eq!(layout.character_offset(0, ViewportAnchor(2)), CharacterOffset(2000));
        assert_eq!(layout.character_offset(0, ViewportAnchor(9)), CharacterOffset(4000));
    }

    #[test]
    fn seek_clamps_to_the_last_page() {
        let layout = FixedPageLayout::new(4000, 1000);
        assert_eq!(layout.seek(3, CharacterOffset(4000)), ViewportAnchor(3));
        assert_eq!(layout.current_page(3), Some(ViewportAnchor(3)));
    }

    #[test]
    fn capture_then_restore_in_the_same_layout() {
        let layout = FixedPageLayout::new(4000, 1000);
        let mut tracker = OffsetTracker::new();
        let offset = tracker.capture(&layout, 7, ViewportAnchor(1));
        assert_eq!(offset, CharacterOffset(1000));
        assert_eq!(tracker.restore(&layout, 7), Some(ViewportAnchor(1)));
        assert_eq!(tracker.restore(&layout, 8), None);
    }

    #[test]
    fn offsets_survive_relayout() {
        let layout = FixedPageLayout::new(4000, 1000);
        let mut tracker = OffsetTracker::new();
        tracker.capture(&layout, 3, ViewportAnchor(2));
        tracker.capture(&layout, 4, ViewportAnchor(3));

        // Larger font: fewer characters per page, same text position.
        layout.set_chars_per_page(500);
        let restored = tracker.relayout(&layout);
        assert_eq!(restored, vec![(3, ViewportAnchor(4)), (4, ViewportAnchor(6))]);
        assert_eq!(tracker.get(3), Some(CharacterOffset(2000)));
        assert_eq!(tracker.relayouts(), 1);

        // And back: the original pages come back exactly.
        layout.set_chars_per_page(1000);
        assert_eq!(
            tracker.relayout(&layout),
            vec![(3, ViewportAnchor(2)), (4, ViewportAnchor(3))]
        );
    }

    #[test]
    fn evict_and_retain_forget_offsets() {
        let mut tracker = OffsetTracker::new();
        for window in 0..5 {
            tracker.record(window, CharacterOffset(window * 10));
        }
        assert!(tracker.evict(0));
        assert!(!tracker.evict(0));
        tracker.retain(|window| window >= 3);
        assert_eq!(tracker.windows(), vec![3, 4]);
        tracker.clear();
        assert!(tracker.is_empty());
    }

    #[test]
    fn zero_page_size_is_raised_to_one() {
        let layout = FixedPageLayout::new(10, 0);
        assert_eq!(layout.chars_per_page(), 1);
        assert_eq!(layout.page_count(), 10);
    }
}
