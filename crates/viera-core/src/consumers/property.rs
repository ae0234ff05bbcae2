use std::sync::Arc;

use crate::consumers::Consumer;
use crate::queue::{MessageKind, QueueMessage};
use crate::registry::DeviceRegistry;
use crate::sink::{NormalizedMessage, Sink};

/// Forwards channel property updates for known devices.
pub struct PropertyStateConsumer {
    registry: Arc<dyn DeviceRegistry>,
    sink: Arc<dyn Sink>,
}

impl PropertyStateConsumer {
    pub fn new(registry: Arc<dyn DeviceRegistry>, sink: Arc<dyn Sink>) -> Self {
        Self { registry, sink }
    }
}

impl Consumer for PropertyStateConsumer {
    fn kind(&self) -> MessageKind {
        MessageKind::ChannelPropertyStateChanged
    }

    fn consume(&self, message: &QueueMessage) -> bool {
        let QueueMessage::ChannelPropertyStateChanged {
            connector,
            device,
            property,
            value,
        } = message
        else {
            return false;
        };
        if self.registry.device(device).is_none() {
            return false;
        }

        self.sink.publish(NormalizedMessage::PropertyState {
            connector: connector.clone(),
            device: device.clone(),
            channel: property.channel().to_owned(),
            property: *property,
            value: value.clone(),
        });
        true
    }
}
