//! Status surface exposed to the embedding host.
//!
//! The sequencer only knows the [`StatusReporter`] trait. Two implementations
//! ship with the crate: [`LogReporter`] writes everything to `tracing`, and
//! [`ChannelReporter`] forwards [`StatusUpdate`]s to a host event loop.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Host callbacks. Implementations must return promptly; they are called from
/// inside the sequencer's phase handlers.
pub trait StatusReporter: Send + Sync {
    /// An outscan (or the settle delay) started or ended.
    fn in_progress(&self, active: bool);

    /// Human-readable status line.
    fn message(&self, message: &str);

    /// The sequence ended; nothing further will be started.
    fn finished(&self);
}

/// One status callback, as delivered by [`ChannelReporter`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusUpdate {
    /// `in_progress` callback
    InProgress(bool),
    /// `message` callback
    Message(String),
    /// `finished` callback
    Finished,
}

/// Reports through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl StatusReporter for LogReporter {
    fn in_progress(&self, active: bool) {
        tracing::debug!(active, "Outscan in progress");
    }

    fn message(&self, message: &str) {
        tracing::info!("{}", message);
    }

    fn finished(&self) {
        tracing::info!("Trial sequence finished");
    }
}

/// Forwards every callback to an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    tx: mpsc::UnboundedSender<StatusUpdate>,
}

impl ChannelReporter {
    /// Create a reporter and the receiver the host reads from.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<StatusUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, update: StatusUpdate) {
        if self.tx.send(update).is_err() {
            tracing::trace!("Status receiver dropped");
        }
    }
}

impl StatusReporter for ChannelReporter {
    fn in_progress(&self, active: bool) {
        self.send(StatusUpdate::InProgress(active));
    }

    fn message(&self, message: &str) {
        self.send(StatusUpdate::Message(message.to_string()));
    }

    fn finished(&self) {
        self.send(StatusUpdate::Finished);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    fn test_channel_reporter_preserves_order() {
        let (reporter, mut rx) = ChannelReporter::new();
        reporter.in_progress(true);
        reporter.message("moving");
        reporter.finished();

        assert_eq!(rx.try_recv().unwrap(), StatusUpdate::InProgress(true));
        assert_eq!(
            rx.try_recv().unwrap(),
            StatusUpdate::Message("moving".to_string())
        );
        assert_eq!(rx.try_recv().unwrap(), StatusUpdate::Finished);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_channel_reporter_tolerates_dropped_receiver() {
        let (reporter, rx) = ChannelReporter::new();
        drop(rx);
        reporter.message("nobody listening");
        reporter.finished();
    }

    #[traced_test]
    #[test]
    fn test_log_reporter_writes_messages() {
        LogReporter.message("sled: cleaning up");
        LogReporter.finished();
        assert!(logs_contain("sled: cleaning up"));
        assert!(logs_contain("Trial sequence finished"));
    }
}
