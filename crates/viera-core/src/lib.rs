// viera-core: Connector runtime between viera-api and a host system (registry + sink).

pub mod config;
pub mod connector;
pub mod consumers;
pub mod error;
pub mod model;
pub mod queue;
pub mod registry;
pub mod sink;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{ConnectorConfig, Credentials, DeviceConfig};
pub use connector::Connector;
pub use consumers::{Consumer, Consumers, DispatchOutcome};
pub use error::CoreError;
pub use model::{ConnectionState, DeviceId, Property, PropertyValue};
pub use queue::{MessageKind, Queue, QueueMessage};
pub use registry::{DeviceRecord, DeviceRegistry, MemoryRegistry};
pub use sink::{BroadcastSink, NormalizedMessage, Sink};

// Wire-level types that appear in this crate's public API.
pub use viera_api::{Action, AuthorizationResult, DeviceDescriptor, Key};
