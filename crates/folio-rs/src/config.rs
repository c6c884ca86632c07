//! Configuration for the [`ConveyorBeltManager`](crate::manager::ConveyorBeltManager).
//!
//! The defaults describe a five-window belt that unlocks shifting once the
//! reader has visited startup slot 2 and then reaches slot 3:
//!
//! ```ignore
//! let config = BeltConfig::default();
//! ```
//!
//! Override individual settings with the builder methods:
//!
//! ```ignore
//! let config = BeltConfig::default()
//!     .with_buffer_size(7)
//!     .with_unlock_slot(3)
//!     .with_trigger_slot(4)
//!     .with_retry(RetryConfig::with_retries(4));
//! ```

use crate::content::RetryConfig;
use crate::{BeltError, DEFAULT_BUFFER_SIZE, DEFAULT_TRIGGER_SLOT, DEFAULT_UNLOCK_SLOT, Result};

/// Default capacity of the runtime's navigation queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Belt configuration.
#[derive(Debug, Clone)]
pub struct BeltConfig {
    /// Number of resident windows. Default: `5`.
    pub buffer_size: usize,
    /// Startup-range slot that unlocks the steady transition. Default: `2`.
    pub unlock_slot: usize,
    /// Startup-range slot that switches to steady state once unlocked.
    /// Default: `3`.
    pub trigger_slot: usize,
    /// Retry policy for transient content-provider failures.
    pub retry: RetryConfig,
    /// Capacity of the runtime navigation queue. Default: `64`.
    pub queue_capacity: usize,
}

impl Default for BeltConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            unlock_slot: DEFAULT_UNLOCK_SLOT,
            trigger_slot: DEFAULT_TRIGGER_SLOT,
            retry: RetryConfig::default(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl BeltConfig {
    /// Set the number of resident windows.
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Set the unlock slot.
    pub fn with_unlock_slot(mut self, slot: usize) -> Self {
        self.unlock_slot = slot;
        self
    }

    /// Set the steady-trigger slot.
    pub fn with_trigger_slot(mut self, slot: usize) -> Self {
        self.trigger_slot = slot;
        self
    }

    /// Set the load retry policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Set the navigation queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// The reading-focus slot: the middle of the buffer.
    pub fn center_slot(&self) -> usize {
        self.buffer_size / 2
    }

    /// Check that the settings describe a usable belt.
    pub fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 {
            return Err(BeltError::InvalidConfig(
                "buffer_size must be at least 1".into(),
            ));
        }
        if self.unlock_slot >= self.buffer_size || self.trigger_slot >= self.buffer_size {
            return Err(BeltError::InvalidConfig(format!(
                "unlock slot {} and trigger slot {} must be below buffer_size {}",
                self.unlock_slot, self.trigger_slot, self.buffer_size
            )));
        }
        if self.unlock_slot == self.trigger_slot {
            return Err(BeltError::InvalidConfig(
                "unlock and trigger slots must differ".into(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(BeltError::InvalidConfig(
                "queue_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_describe_five_window_belt() {
        let config = BeltConfig::default();
        assert_eq!(config.buffer_size, 5);
        assert_eq!(config.center_slot(), 2);
        assert_eq!(config.unlock_slot, 2);
        assert_eq!(config.trigger_slot, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_overrides_fields() {
        let config = BeltConfig::default()
            .with_buffer_size(7)
            .with_unlock_slot(3)
            .with_trigger_slot(4)
            .with_queue_capacity(8);
        assert_eq!(config.center_slot(), 3);
        assert_eq!(config.queue_capacity, 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn slots_outside_buffer_are_rejected() {
        let config = BeltConfig::default().with_buffer_size(3).with_trigger_slot(3);
        assert!(matches!(
            config.validate(),
            Err(BeltError::InvalidConfig(_))
        ));
    }

    #[test]
    fn zero_sized_buffer_is_rejected() {
        let config = BeltConfig::default().with_buffer_size(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn identical_unlock_and_trigger_are_rejected() {
        let config = BeltConfig::default().with_unlock_slot(3);
        assert!(config.validate().is_err());
    }
}
