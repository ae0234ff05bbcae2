// viera-api: Async Rust client for Panasonic VIERA televisions (discovery, pairing, control)

pub mod crypto;
pub mod discovery;
pub mod error;
pub mod events;
pub mod keys;
pub mod pairing;
pub mod session;
pub mod soap;
pub mod television;
pub mod transport;

pub use crypto::SessionKeys;
pub use discovery::{Application, DeviceDescriptor, Discovery, HdmiInput, SsdpResponse};
pub use error::Error;
pub use events::{EventListener, PropertyChange, Subscription, TelevisionEvent};
pub use keys::Key;
pub use pairing::{AuthorizationResult, Pairing, PairingState, PinChallenge};
pub use session::Session;
pub use soap::{Service, SoapClient};
pub use television::{Action, Television};
pub use transport::TransportConfig;
