use std::sync::Arc;

use tracing::info;

use crate::consumers::Consumer;
use crate::queue::{MessageKind, QueueMessage};
use crate::registry::DeviceRegistry;
use crate::sink::{NormalizedMessage, Sink};

/// Applies connection-state transitions to the registry.
///
/// Transitions for devices the registry does not know are rejected.
pub struct ConnectionStateConsumer {
    registry: Arc<dyn DeviceRegistry>,
    sink: Arc<dyn Sink>,
}

impl ConnectionStateConsumer {
    pub fn new(registry: Arc<dyn DeviceRegistry>, sink: Arc<dyn Sink>) -> Self {
        Self { registry, sink }
    }
}

impl Consumer for ConnectionStateConsumer {
    fn kind(&self) -> MessageKind {
        MessageKind::DeviceConnectionStateChanged
    }

    fn consume(&self, message: &QueueMessage) -> bool {
        let QueueMessage::DeviceConnectionStateChanged {
            connector,
            device,
            state,
        } = message
        else {
            return false;
        };

        let Some(previous) = self.registry.set_state(device, *state) else {
            return false;
        };
        if previous != *state {
            info!(%device, from = %previous, to = %state, "connection state changed");
        }
        self.sink.publish(NormalizedMessage::DeviceConnectionState {
            connector: connector.clone(),
            device: device.clone(),
            state: *state,
        });
        true
    }
}
