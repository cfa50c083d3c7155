//! Structured event emission for every state change and attempt boundary.
//! Sinks must never block the attempt loop; the channel-backed sink here
//! drops events rather than apply back-pressure to a caller that stops
//! draining its receiver.

use crate::types::{ErrorCategory, OperationState};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// One observability event, emitted alongside a matching `tracing` call at
/// the same call site.
#[derive(Debug, Clone)]
pub struct RecoveryEvent {
    pub operation_id: String,
    pub function_name: String,
    pub attempt: u32,
    pub state: OperationState,
    pub category: Option<ErrorCategory>,
    pub delay: Option<Duration>,
    pub strategy: String,
}

/// A non-blocking destination for recovery events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: RecoveryEvent);
}

/// Sink that logs every event via `tracing` and nothing else. The default
/// when no sink is configured.
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: RecoveryEvent) {
        debug!(
            operation_id = %event.operation_id,
            function = %event.function_name,
            attempt = event.attempt,
            state = ?event.state,
            category = ?event.category,
            delay_ms = event.delay.map(|d| d.as_millis()),
            strategy = %event.strategy,
            "recovery event"
        );
    }
}

/// Sink backed by an unbounded `mpsc` channel: `emit` never awaits, so a
/// slow or absent receiver cannot delay the attempt loop. Events are
/// dropped silently if the receiver has been closed.
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<RecoveryEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RecoveryEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: RecoveryEvent) {
        // An unbounded send is non-blocking by construction; a closed
        // receiver just means nobody is watching anymore.
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_sink_delivers_events_in_order() {
        let (sink, mut rx) = ChannelSink::new();
        sink.emit(RecoveryEvent {
            operation_id: "op-1".into(),
            function_name: "f".into(),
            attempt: 0,
            state: OperationState::InProgress,
            category: None,
            delay: None,
            strategy: "fixed".into(),
        });
        sink.emit(RecoveryEvent {
            operation_id: "op-1".into(),
            function_name: "f".into(),
            attempt: 1,
            state: OperationState::Success,
            category: None,
            delay: Some(Duration::from_millis(10)),
            strategy: "fixed".into(),
        });

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.attempt, 0);
        assert_eq!(second.attempt, 1);
    }

    #[test]
    fn channel_sink_emit_does_not_block_when_receiver_is_dropped() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        sink.emit(RecoveryEvent {
            operation_id: "op-1".into(),
            function_name: "f".into(),
            attempt: 0,
            state: OperationState::Failed,
            category: None,
            delay: None,
            strategy: "fixed".into(),
        });
    }
}
