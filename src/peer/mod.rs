pub mod connection;
pub mod context;
pub mod ice;
pub mod negotiation;
pub mod state;
pub mod types;

pub use connection::WebRtcContextFactory;
pub use context::{ContextEvent, ContextFactory, EventSink, NegotiationContext, TaggedEvent};
pub use ice::{IceConfigSource, IceConfiguration};
pub use negotiation::{NegotiationSession, SessionDeps};
pub use state::{NegotiationState, SessionReport};
pub use types::{ClientIdentity, IceCandidate, Role, RoomAssignment, SessionDescription, TrackKind};
