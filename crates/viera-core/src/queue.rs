// ── Message queue ──
//
// Decouples device I/O from state handling. Producers (discovery,
// polling, event listener, command execution) enqueue; the dispatch tick
// drains one message at a time through the consumer chain.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use strum::Display;
use viera_api::DeviceDescriptor;

use crate::model::{ConnectionState, DeviceId, Property, PropertyValue};

/// Closed set of messages flowing through the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueMessage {
    DeviceDiscovered {
        connector: String,
        device: DeviceId,
        descriptor: DeviceDescriptor,
    },
    DeviceConnectionStateChanged {
        connector: String,
        device: DeviceId,
        state: ConnectionState,
    },
    ChannelPropertyStateChanged {
        connector: String,
        device: DeviceId,
        property: Property,
        value: PropertyValue,
    },
}

/// Variant tag consumers declare to claim messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum MessageKind {
    DeviceDiscovered,
    DeviceConnectionStateChanged,
    ChannelPropertyStateChanged,
}

impl QueueMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::DeviceDiscovered { .. } => MessageKind::DeviceDiscovered,
            Self::DeviceConnectionStateChanged { .. } => MessageKind::DeviceConnectionStateChanged,
            Self::ChannelPropertyStateChanged { .. } => MessageKind::ChannelPropertyStateChanged,
        }
    }

    pub fn connector(&self) -> &str {
        match self {
            Self::DeviceDiscovered { connector, .. }
            | Self::DeviceConnectionStateChanged { connector, .. }
            | Self::ChannelPropertyStateChanged { connector, .. } => connector,
        }
    }

    pub fn device(&self) -> &DeviceId {
        match self {
            Self::DeviceDiscovered { device, .. }
            | Self::DeviceConnectionStateChanged { device, .. }
            | Self::ChannelPropertyStateChanged { device, .. } => device,
        }
    }
}

/// Unbounded FIFO shared between producers and the dispatch tick.
#[derive(Debug, Default)]
pub struct Queue {
    messages: Mutex<VecDeque<QueueMessage>>,
}

impl Queue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message. Never blocks on consumers and never fails.
    pub fn enqueue(&self, message: QueueMessage) {
        self.lock().push_back(message);
    }

    /// Remove the oldest message; `None` when the queue is empty.
    pub fn dequeue(&self) -> Option<QueueMessage> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<QueueMessage>> {
        // a panic mid-push cannot leave the deque inconsistent
        self.messages.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn state(device: &str, state: ConnectionState) -> QueueMessage {
        QueueMessage::DeviceConnectionStateChanged {
            connector: "viera".into(),
            device: device.into(),
            state,
        }
    }

    #[test]
    fn dequeue_order_matches_enqueue_order() {
        let queue = Queue::new();
        let sent: Vec<QueueMessage> = (0..50)
            .map(|i| state(&format!("tv-{i}"), ConnectionState::Connected))
            .collect();

        for message in &sent {
            queue.enqueue(message.clone());
        }
        assert_eq!(queue.len(), 50);

        let received: Vec<QueueMessage> = std::iter::from_fn(|| queue.dequeue()).collect();
        assert_eq!(received, sent);
    }

    #[test]
    fn empty_queue_returns_sentinel() {
        let queue = Queue::new();
        assert!(queue.is_empty());
        assert_eq!(queue.dequeue(), None);

        queue.enqueue(state("tv", ConnectionState::Lost));
        assert!(queue.dequeue().is_some());
        assert_eq!(queue.dequeue(), None);
    }

    #[test]
    fn messages_report_kind_and_routing() {
        let message = QueueMessage::ChannelPropertyStateChanged {
            connector: "viera".into(),
            device: "tv-1".into(),
            property: Property::Volume,
            value: PropertyValue::Level(10),
        };
        assert_eq!(message.kind(), MessageKind::ChannelPropertyStateChanged);
        assert_eq!(message.connector(), "viera");
        assert_eq!(message.device().as_str(), "tv-1");
    }
}
