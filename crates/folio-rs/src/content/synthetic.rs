//! Deterministic in-process [`ContentProvider`] for the simulator and tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::{ContentBlob, ContentError, ContentFuture, ContentProvider};
use crate::WindowIndex;

const FILLER: &str = "It was a bright cold day in April, and the clocks were striking thirteen. ";

/// Generates placeholder prose for a document of `total` windows.
///
/// Supports simulated latency, permanently failing windows, and windows
/// that fail transiently a fixed number of times before succeeding.
#[derive(Debug)]
pub struct SyntheticProvider {
    total: usize,
    chars_per_window: usize,
    latency: Duration,
    failing: HashSet<WindowIndex>,
    transient: Mutex<HashMap<WindowIndex, u32>>,
    calls: AtomicUsize,
}

impl SyntheticProvider {
    /// A provider for `total` windows of 4000 characters each, no latency.
    pub fn new(total: usize) -> Self {
        Self {
            total,
            chars_per_window: 4000,
            latency: Duration::ZERO,
            failing: HashSet::new(),
            transient: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_chars_per_window(mut self, chars: usize) -> Self {
        self.chars_per_window = chars;
        self
    }

    /// Sleep this long before producing each window.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Make generation fail permanently for these windows.
    pub fn with_failing(mut self, windows: impl IntoIterator<Item = WindowIndex>) -> Self {
        self.failing.extend(windows);
        self
    }

    /// Make `window` fail transiently `times` times before succeeding.
    pub fn with_transient_failures(self, window: WindowIndex, times: u32) -> Self {
        self.transient
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(window, times);
        self
    }

    /// Number of `generate` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The body every generation of `window` produces.
    pub fn body_for(&self, window: WindowIndex) -> String {
        format!("[window {window}] ")
            .chars()
            .chain(FILLER.chars().cycle())
            .take(self.chars_per_window)
            .collect()
    }

    fn take_transient_failure(&self, window: WindowIndex) -> bool {
        let mut transient = self.transient.lock().unwrap_or_else(|e| e.into_inner());
        match transient.get_mut(&window) {
            Some(left) if *left > 0 => {
                *left -= 1;
                true
            }
            _ => false,
        }
    }
}

impl ContentProvider for SyntheticProvider {
    fn generate(&self, window: WindowIndex) -> ContentFuture<'_> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            if window >= self.total {
                return Err(ContentError::OutOfRange(window));
            }
            if self.failing.contains(&window) {
                return Err(ContentError::Generation(format!(
                    "window {window} has malformed markup"
                )));
            }
            if self.take_transient_failure(window) {
                return Err(ContentError::Unavailable(format!(
                    "window {window} source busy"
                )));
            }
            Ok(ContentBlob::new(window, self.body_for(window)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn generates_fixed_length_bodies() {
        let provider = SyntheticProvider::new(10).with_chars_per_window(120);
        let blob = provider.generate(3).await.unwrap();
        assert_eq!(blob.char_count(), 120);
        assert!(blob.body().starts_with("[window 3] "));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn generation_is_pure_in_window_index() {
        let provider = SyntheticProvider::new(10);
        let a = provider.generate(5).await.unwrap();
        let b = provider.generate(5).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn out_of_range_windows_fail() {
        let provider = SyntheticProvider::new(3);
        assert_eq!(
            provider.generate(3).await.unwrap_err(),
            ContentError::OutOfRange(3)
        );
    }

    #[tokio::test]
    async fn failing_windows_fail_permanently() {
        let provider = SyntheticProvider::new(10).with_failing([4]);
        for _ in 0..3 {
            assert!(!provider.generate(4).await.unwrap_err().is_transient());
        }
        assert!(provider.generate(5).await.is_ok());
    }

    #[tokio::test]
    async fn transient_failures_run_out() {
        let provider = SyntheticProvider::new(10).with_transient_failures(2, 2);
        assert!(provider.generate(2).await.unwrap_err().is_transient());
        assert!(provider.generate(2).await.unwrap_err().is_transient());
        assert!(provider.generate(2).await.is_ok());
    }
}
