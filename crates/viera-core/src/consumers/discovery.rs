use std::sync::Arc;

use tracing::info;

use crate::consumers::Consumer;
use crate::queue::{MessageKind, QueueMessage};
use crate::registry::DeviceRegistry;
use crate::sink::{NormalizedMessage, Sink};

/// Records discovered televisions and announces them to the sink.
pub struct DiscoveryConsumer {
    registry: Arc<dyn DeviceRegistry>,
    sink: Arc<dyn Sink>,
}

impl DiscoveryConsumer {
    pub fn new(registry: Arc<dyn DeviceRegistry>, sink: Arc<dyn Sink>) -> Self {
        Self { registry, sink }
    }
}

impl Consumer for DiscoveryConsumer {
    fn kind(&self) -> MessageKind {
        MessageKind::DeviceDiscovered
    }

    fn consume(&self, message: &QueueMessage) -> bool {
        let QueueMessage::DeviceDiscovered {
            connector,
            device,
            descriptor,
        } = message
        else {
            return false;
        };
        if descriptor.identifier.is_empty() || descriptor.identifier != device.as_str() {
            return false;
        }

        if self.registry.upsert(descriptor.clone()) {
            info!(%device, model = %descriptor.model, "new device registered");
        }
        self.sink.publish(NormalizedMessage::DeviceDiscovered {
            connector: connector.clone(),
            device: descriptor.clone(),
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MemoryRegistry;
    use crate::registry::tests::descriptor;
    use crate::sink::BroadcastSink;

    #[test]
    fn registers_and_announces() {
        let registry = Arc::new(MemoryRegistry::new());
        let sink = BroadcastSink::new();
        let mut rx = sink.subscribe();
        let consumer = DiscoveryConsumer::new(registry.clone(), Arc::new(sink));

        let handled = consumer.consume(&QueueMessage::DeviceDiscovered {
            connector: "viera".into(),
            device: "tv-1".into(),
            descriptor: descriptor("tv-1"),
        });
        assert!(handled);
        assert_eq!(registry.len(), 1);
        assert!(matches!(
            rx.try_recv(),
            Ok(NormalizedMessage::DeviceDiscovered { .. })
        ));
    }

    #[test]
    fn rejects_mismatched_identifier() {
        let registry = Arc::new(MemoryRegistry::new());
        let consumer = DiscoveryConsumer::new(registry.clone(), Arc::new(BroadcastSink::new()));

        let handled = consumer.consume(&QueueMessage::DeviceDiscovered {
            connector: "viera".into(),
            device: "tv-2".into(),
            descriptor: descriptor("tv-1"),
        });
        assert!(!handled);
        assert!(registry.is_empty());
    }
}
