//! Transient user-facing notifications.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::warn;

pub const PROCESSING_FAILED: &str = "Audio processing failed. Please try again.";
pub const PLAYBACK_FAILED: &str = "Dubbed audio playback failed.";

/// A message shown to the user, dismissed after `ttl`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub message: String,
    pub ttl: Duration,
}

pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str, ttl: Duration);
}

/// Writes notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, message: &str, ttl: Duration) {
        warn!(ttl_ms = ttl.as_millis() as u64, "{message}");
    }
}

/// Forwards notifications to a receiver (UI layer, tests).
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, message: &str, ttl: Duration) {
        let _ = self.tx.send(Notification {
            message: message.to_string(),
            ttl,
        });
    }
}
