// ── Output sink ──
//
// Normalized messages leave the connector through a `Sink`. The host
// decides what to do with them (persist, forward, render).

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;
use viera_api::DeviceDescriptor;

use crate::model::{ConnectionState, DeviceId, Property, PropertyValue};

const SINK_CHANNEL_SIZE: usize = 256;

/// Host-facing output message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NormalizedMessage {
    DeviceDiscovered {
        connector: String,
        #[serde(flatten)]
        device: DeviceDescriptor,
    },
    DeviceConnectionState {
        connector: String,
        device: DeviceId,
        state: ConnectionState,
    },
    PropertyState {
        connector: String,
        device: DeviceId,
        channel: String,
        property: Property,
        value: PropertyValue,
    },
}

/// External collaborator receiving normalized output.
pub trait Sink: Send + Sync {
    fn publish(&self, message: NormalizedMessage);
}

/// Fan-out sink over a `tokio::sync::broadcast` channel.
///
/// Publishing with no subscribers drops the message.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<NormalizedMessage>,
}

impl BroadcastSink {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(SINK_CHANNEL_SIZE);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NormalizedMessage> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new()
    }
}

impl Sink for BroadcastSink {
    fn publish(&self, message: NormalizedMessage) {
        trace!(?message, "publish");
        let _ = self.tx.send(message);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn property_state_serializes_flat() {
        let message = NormalizedMessage::PropertyState {
            connector: "viera".into(),
            device: "tv-1".into(),
            channel: Property::Volume.channel().into(),
            property: Property::Volume,
            value: PropertyValue::Level(30),
        };
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({
                "type": "property_state",
                "connector": "viera",
                "device": "tv-1",
                "channel": "audio",
                "property": "volume",
                "value": 30,
            })
        );
    }

    #[test]
    fn discovered_device_flattens_descriptor() {
        let message = NormalizedMessage::DeviceDiscovered {
            connector: "viera".into(),
            device: crate::registry::tests::descriptor("tv-1"),
        };
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["type"], "device_discovered");
        assert_eq!(value["serial"], "tv-1");
        assert_eq!(value["hdmi"].as_array().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn broadcast_reaches_subscribers() {
        let sink = BroadcastSink::new();
        let mut rx = sink.subscribe();
        sink.publish(NormalizedMessage::DeviceConnectionState {
            connector: "viera".into(),
            device: "tv-1".into(),
            state: ConnectionState::Lost,
        });
        match rx.recv().await.unwrap() {
            NormalizedMessage::DeviceConnectionState { state, .. } => {
                assert_eq!(state, ConnectionState::Lost);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
