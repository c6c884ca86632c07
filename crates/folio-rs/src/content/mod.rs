//! Window content: the provider seam, the coalescing cache, and load retry.
//!
//! A [`ContentProvider`] turns a window index into a [`ContentBlob`]. It may
//! be slow, so the [`WindowContentCache`] runs generations on tokio worker
//! tasks, coalesces concurrent requests for the same window into one
//! in-flight load, and keeps at most one blob per resident window.

pub mod cache;
pub mod retry;
pub mod synthetic;

pub use cache::{BatchLoad, CacheStats, LoadState, PendingLoad, WindowContentCache};
pub use retry::RetryConfig;
pub use synthetic::SyntheticProvider;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;

use crate::WindowIndex;

/// Rendered content of one window.
///
/// Cheap to clone: the body is reference-counted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentBlob {
    window: WindowIndex,
    body: Arc<str>,
}

impl ContentBlob {
    pub fn new(window: WindowIndex, body: impl Into<Arc<str>>) -> Self {
        Self {
            window,
            body: body.into(),
        }
    }

    /// The window this content belongs to.
    pub fn window(&self) -> WindowIndex {
        self.window
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// Length of the body in characters.
    pub fn char_count(&self) -> usize {
        self.body.chars().count()
    }
}

/// Failure reported by a [`ContentProvider`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContentError {
    /// The content could not be produced right now; retrying may succeed.
    #[error("content temporarily unavailable: {0}")]
    Unavailable(String),
    /// Generation failed for good.
    #[error("content generation failed: {0}")]
    Generation(String),
    /// The window does not exist in the document.
    #[error("window {0} is outside the document")]
    OutOfRange(WindowIndex),
}

impl ContentError {
    /// Whether a retry may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Boxed future returned by [`ContentProvider::generate`].
pub type ContentFuture<'a> =
    Pin<Box<dyn Future<Output = Result<ContentBlob, ContentError>> + Send + 'a>>;

/// Produces window content for the cache.
///
/// Implementations must be safe to call from background tasks and pure in
/// the window index and the underlying document: generating the same window
/// twice yields equivalent content.
///
/// # Example
///
/// ```ignore
/// struct Chapters { html: Vec<String> }
///
/// impl ContentProvider for Chapters {
///     fn generate(&self, window: WindowIndex) -> ContentFuture<'_> {
///         Box::pin(async move {
///             self.html
///                 .get(window)
///                 .map(|body| ContentBlob::new(window, body.as_str()))
///                 .ok_or(ContentError::OutOfRange(window))
///         })
///     }
/// }
/// ```
pub trait ContentProvider: Send + Sync {
    /// Generate the content of `window`.
    ///
    /// Uses a boxed future so the trait stays dyn-compatible.
    fn generate(&self, window: WindowIndex) -> ContentFuture<'_>;
}
