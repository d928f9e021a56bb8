//! Outbound reset notifications.
//!
//! The balancer never waits on delivery: evictions are handed to a
//! [`ResetNotifier`] after all locks are released, and the notifier is
//! expected to return immediately.

use tether_types::NodeMessage;
use tokio::sync::mpsc;
use tracing::warn;

/// Sink for messages addressed to a node's channel.
pub trait ResetNotifier: Send + Sync {
    /// Publish `message` on `channel`. Must not block.
    fn publish(&self, channel: &str, message: NodeMessage);
}

/// A message bound for a named channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    /// Destination channel, e.g. `reset-channel-10.0.0.1:8080`.
    pub channel: String,
    /// The message.
    pub message: NodeMessage,
}

/// Notifier that forwards into an unbounded channel.
///
/// The receiving half is typically drained by a task that relays to the
/// real pub/sub transport.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ChannelNotifier {
    /// Create a notifier and the receiver its messages arrive on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ResetNotifier for ChannelNotifier {
    fn publish(&self, channel: &str, message: NodeMessage) {
        let outbound = Outbound {
            channel: channel.to_string(),
            message,
        };
        if let Err(e) = self.tx.send(outbound) {
            warn!(channel = %e.0.channel, connection_id = %e.0.message.connection_id, "notification receiver dropped, message lost");
        }
    }
}

/// Notifier that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullNotifier;

impl ResetNotifier for NullNotifier {
    fn publish(&self, _channel: &str, _message: NodeMessage) {}
}
