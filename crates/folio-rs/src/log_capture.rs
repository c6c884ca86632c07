//! A `tracing` layer that buffers log lines for a frontend to drain.
//!
//! The simulator prints the belt's log output between its own step reports
//! instead of letting it interleave on stderr. [`BeltTracingLayer`] pushes
//! each event into a [`LogBuffer`] with its own mutex, so logging from load
//! workers never waits on the caller, and the caller drains the buffer at
//! its own pace.

use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::Subscriber;
use tracing_subscriber::layer::Layer;
use tracing_subscriber::registry::LookupSpan;

/// Lines kept before the buffer is trimmed.
pub const MAX_LOG_LINES: usize = 2000;
/// Lines kept after trimming.
pub const LOG_TRIM_TO: usize = 1200;

/// One captured log event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    /// Local wall-clock time, `HH:MM:SS`.
    pub time: String,
    pub level: LogLevel,
    /// Module path the event came from.
    pub target: String,
    pub message: String,
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.time, self.level.label(), self.message)
    }
}

/// Log severity level (mirrors tracing levels).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Short fixed-width label for display.
    pub fn label(self) -> &'static str {
        match self {
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO ",
            Self::Warn => "WARN ",
            Self::Error => "ERROR",
        }
    }
}

impl From<tracing::Level> for LogLevel {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::TRACE => Self::Trace,
            tracing::Level::DEBUG => Self::Debug,
            tracing::Level::INFO => Self::Info,
            tracing::Level::WARN => Self::Warn,
            tracing::Level::ERROR => Self::Error,
        }
    }
}

/// A shared buffer of pending log lines.
#[derive(Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<LogLine>>>);

impl LogBuffer {
    /// Drain all pending log lines.
    pub fn drain(&self) -> Vec<LogLine> {
        let mut buf = self.0.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *buf)
    }

    /// Number of pending lines.
    pub fn len(&self) -> usize {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push(&self, line: LogLine) {
        let mut buf = self.0.lock().unwrap_or_else(|e| e.into_inner());
        buf.push(line);
        // Cap the buffer so a burst before the next drain stays bounded.
        if buf.len() > MAX_LOG_LINES {
            let trim_to = buf.len() - LOG_TRIM_TO;
            buf.drain(..trim_to);
        }
    }
}

/// A [`tracing_subscriber::Layer`] that captures events at or above a
/// minimum level into a [`LogBuffer`].
pub struct BeltTracingLayer {
    buffer: LogBuffer,
    min_level: LogLevel,
}

impl BeltTracingLayer {
    /// Create a layer capturing `info` and above, and its buffer.
    pub fn new() -> (Self, LogBuffer) {
        let buffer = LogBuffer::default();
        (
            Self {
                buffer: buffer.clone(),
                min_level: LogLevel::Info,
            },
            buffer,
        )
    }

    /// Capture events at `level` and above.
    pub fn with_min_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }
}

impl<S: Subscriber + for<'a> LookupSpan<'a>> Layer<S> for BeltTracingLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let level = LogLevel::from(*event.metadata().level());
        if level < self.min_level {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let mut message = visitor.message;
        if !visitor.fields.is_empty() {
            let extras: Vec<String> = visitor
                .fields
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect();
            if message.is_empty() {
                message = extras.join(" ");
            } else {
                message = format!("{message} {{{}}}", extras.join(", "));
            }
        }

        self.buffer.push(LogLine {
            time: Local::now().format("%H:%M:%S").to_string(),
            level,
            target: event.metadata().target().to_string(),
            message,
        });
    }
}

/// Extracts the message and extra fields from a tracing event.
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: Vec<(String, String)>,
}

impl tracing::field::Visit for MessageVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
        let raw = format!("{value:?}");
        if field.name() == "message" {
            self.message = raw
                .strip_prefix('"')
                .and_then(|s| s.strip_suffix('"'))
                .map(str::to_string)
                .unwrap_or(raw);
        } else {
            self.fields.push((field.name().to_string(), raw));
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields
                .push((field.name().to_string(), value.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    fn capture(layer: BeltTracingLayer, emit: impl FnOnce()) {
        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, emit);
    }

    #[test]
    fn captures_messages_and_fields() {
        let (layer, buffer) = BeltTracingLayer::new();
        capture(layer, || {
            tracing::info!("entered window {}", 3);
            tracing::warn!(window = 7, "load failed");
        });

        let lines = buffer.drain();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].level, LogLevel::Info);
        assert_eq!(lines[0].message, "entered window 3");
        assert_eq!(lines[1].message, "load failed {window=7}");
        assert!(buffer.is_empty());
    }

    #[test]
    fn events_below_the_minimum_level_are_dropped() {
        let (layer, buffer) = BeltTracingLayer::new();
        capture(layer.with_min_level(LogLevel::Warn), || {
            tracing::debug!("shifted");
            tracing::info!("steady");
            tracing::warn!("violation");
        });
        let lines = buffer.drain();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].level, LogLevel::Warn);
    }

    #[test]
    fn buffer_is_trimmed_when_full() {
        let buffer = LogBuffer::default();
        for i in 0..=MAX_LOG_LINES {
            buffer.push(LogLine {
                time: String::new(),
                level: LogLevel::Info,
                target: String::new(),
                message: i.to_string(),
            });
        }
        let lines = buffer.drain();
        assert_eq!(lines.len(), LOG_TRIM_TO);
        assert_eq!(lines.last().unwrap().message, MAX_LOG_LINES.to_string());
    }

    #[test]
    fn labels_are_fixed_width() {
        for level in [LogLevel::Trace, LogLevel::Info, LogLevel::Error] {
            assert_eq!(level.label().len(), 5);
        }
    }
}
