pub mod api;
pub mod chat;
pub mod commands;
pub mod config;
pub mod error;
pub mod logger;
pub mod media;
pub mod peer;
pub mod session;
pub mod signaling;
pub mod utils;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use api::{ApiClient, ReportSink, ServerStats};
pub use commands::{Command, SessionHandle};
pub use config::ClientConfig;
pub use error::{Result, SessionError};
pub use session::{Collaborators, SessionCoordinator, SessionState, SessionView};

use media::SilentDevices;
use peer::WebRtcContextFactory;
use signaling::WebSocketConnector;
use std::sync::Arc;

/// Собирает координатор с настоящими коллабораторами: HTTP API сервера,
/// websocket сигнализацией и webrtc-rs. Устройства передаются снаружи.
pub fn connect(
    config: ClientConfig,
    devices: Arc<dyn media::MediaDevices>,
) -> Result<(SessionCoordinator, SessionHandle, ApiClient)> {
    let server = config.server()?;
    let api = ApiClient::new(server.clone(), config.ice_fetch_timeout())?;
    let deps = Collaborators {
        ice: Arc::new(api.clone()),
        media: devices,
        connector: Arc::new(WebSocketConnector::new(server)),
        contexts: Arc::new(WebRtcContextFactory::new()),
        reports: Arc::new(api.clone()),
    };
    let (coordinator, handle) = SessionCoordinator::new(config, deps);
    Ok((coordinator, handle, api))
}

/// Клиент без камеры и микрофона
pub fn connect_silent(config: ClientConfig) -> Result<(SessionCoordinator, SessionHandle, ApiClient)> {
    connect(config, Arc::new(SilentDevices))
}
