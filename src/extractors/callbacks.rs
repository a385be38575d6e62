//! Progress, log, error and step reporting for extractor runs
//!
//! Extractors report only through `ExtractorCallbacks`; the delivery
//! mechanism (tracing, a channel to a UI thread, a test recorder) is chosen
//! by whoever starts the run.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Severity passed to `on_log`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        }
    }
}

/// Observer of one extractor phase
pub trait ExtractorCallbacks: Send + Sync {
    fn on_progress(&self, current: u64, total: u64, message: &str);
    fn on_log(&self, message: &str, level: LogLevel);
    fn on_error(&self, message: &str, detail: &str);
    fn on_step(&self, name: &str);
    /// Polled by extractors at every file or batch boundary
    fn is_cancelled(&self) -> bool;
}

// ============================================================================
// Cancellation
// ============================================================================

/// Shared cooperative cancellation flag
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Implementations
// ============================================================================

/// Forwards every report into `tracing`
#[derive(Debug, Clone, Default)]
pub struct TracingCallbacks {
    extractor: String,
    token: CancellationToken,
}

impl TracingCallbacks {
    pub fn new(extractor: impl Into<String>) -> Self {
        Self {
            extractor: extractor.into(),
            token: CancellationToken::new(),
        }
    }

    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }
}

impl ExtractorCallbacks for TracingCallbacks {
    fn on_progress(&self, current: u64, total: u64, message: &str) {
        debug!(extractor = %self.extractor, current, total, "{}", message);
    }

    fn on_log(&self, message: &str, level: LogLevel) {
        match level {
            LogLevel::Debug => debug!(extractor = %self.extractor, "{}", message),
            LogLevel::Info => info!(extractor = %self.extractor, "{}", message),
            LogLevel::Warning => warn!(extractor = %self.extractor, "{}", message),
            LogLevel::Error => error!(extractor = %self.extractor, "{}", message),
        }
    }

    fn on_error(&self, message: &str, detail: &str) {
        error!(extractor = %self.extractor, detail, "{}", message);
    }

    fn on_step(&self, name: &str) {
        info!(extractor = %self.extractor, step = name, "Step");
    }

    fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Event forwarded by `ChannelCallbacks`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CallbackEvent {
    Progress { current: u64, total: u64, message: String },
    Log { message: String, level: LogLevel },
    Error { message: String, detail: String },
    Step { name: String },
}

/// Sends every report over a channel (e.g. to a UI thread)
///
/// A closed receiver is ignored; the run keeps going.
pub struct ChannelCallbacks {
    sender: Sender<CallbackEvent>,
    token: CancellationToken,
}

impl ChannelCallbacks {
    pub fn new(sender: Sender<CallbackEvent>, token: CancellationToken) -> Self {
        Self { sender, token }
    }

    fn send(&self, event: CallbackEvent) {
        let _ = self.sender.send(event);
    }
}

impl ExtractorCallbacks for ChannelCallbacks {
    fn on_progress(&self, current: u64, total: u64, message: &str) {
        self.send(CallbackEvent::Progress { current, total, message: message.to_string() });
    }

    fn on_log(&self, message: &str, level: LogLevel) {
        self.send(CallbackEvent::Log { message: message.to_string(), level });
    }

    fn on_error(&self, message: &str, detail: &str) {
        self.send(CallbackEvent::Error {
            message: message.to_string(),
            detail: detail.to_string(),
        });
    }

    fn on_step(&self, name: &str) {
        self.send(CallbackEvent::Step { name: name.to_string() });
    }

    fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Wraps caller callbacks so the runner's token also cancels the run
pub(crate) struct GuardedCallbacks<'a> {
    inner: &'a dyn ExtractorCallbacks,
    token: &'a CancellationToken,
}

impl<'a> GuardedCallbacks<'a> {
    pub(crate) fn new(inner: &'a dyn ExtractorCallbacks, token: &'a CancellationToken) -> Self {
        Self { inner, token }
    }
}

impl ExtractorCallbacks for GuardedCallbacks<'_> {
    fn on_progress(&self, current: u64, total: u64, message: &str) {
        self.inner.on_progress(current, total, message);
    }

    fn on_log(&self, message: &str, level: LogLevel) {
        self.inner.on_log(message, level);
    }

    fn on_error(&self, message: &str, detail: &str) {
        self.inner.on_error(message, detail);
    }

    fn on_step(&self, name: &str) {
        self.inner.on_step(name);
    }

    fn is_cancelled(&self) -> bool {
        self.token.is_cancelled() || self.inner.is_cancelled()
    }
}
