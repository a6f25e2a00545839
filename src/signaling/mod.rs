pub mod link;
pub mod messages;
pub mod websocket;

pub use link::{LinkConnector, LinkEnd, LinkEvent, LinkEvents, SignalingLink};
pub use messages::{IncomingMessage, OutgoingMessage};
pub use websocket::WebSocketConnector;
