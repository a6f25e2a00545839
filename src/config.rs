// Конфигурация приложения
// В режиме разработки логируем подробно, в продакшене только предупреждения

use crate::error::{Result, SessionError};
use crate::peer::types::ClientIdentity;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

#[cfg(debug_assertions)]
pub const DEFAULT_LOG_LEVEL: &str = "debug";

#[cfg(not(debug_assertions))]
pub const DEFAULT_LOG_LEVEL: &str = "warn";

/// Больше интересов сервер всё равно не учитывает
pub const MAX_INTERESTS: usize = 5;

/// Пауза перед повторным `ready`, чтобы не долбить сервер подбора
pub const DEFAULT_REANNOUNCE_DELAY: Duration = Duration::from_millis(500);

pub const DEFAULT_ICE_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClientConfig {
    /// HTTP адрес сервера, websocket адрес выводится из него
    pub server_url: String,
    pub interests: Vec<String>,
    pub reannounce_delay_ms: u64,
    pub ice_fetch_timeout_ms: u64,
    /// если не задан, идентификатор генерируется
    pub identity_hint: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8001".into(),
            interests: Vec::new(),
            reannounce_delay_ms: DEFAULT_REANNOUNCE_DELAY.as_millis() as u64,
            ice_fetch_timeout_ms: DEFAULT_ICE_FETCH_TIMEOUT.as_millis() as u64,
            identity_hint: None,
        }
    }
}

impl ClientConfig {
    pub fn server(&self) -> Result<Url> {
        Ok(Url::parse(&self.server_url)?)
    }

    pub fn reannounce_delay(&self) -> Duration {
        Duration::from_millis(self.reannounce_delay_ms)
    }

    pub fn ice_fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.ice_fetch_timeout_ms)
    }

    /// Интересы без пустых строк, не больше `MAX_INTERESTS`
    pub fn normalized_interests(&self) -> Vec<String> {
        self.interests
            .iter()
            .map(|i| i.trim())
            .filter(|i| !i.is_empty())
            .take(MAX_INTERESTS)
            .map(str::to_owned)
            .collect()
    }
}

/// `http://host/base` → `ws://host/base/ws/{client_id}` (https → wss)
pub fn ws_endpoint(server: &Url, identity: &ClientIdentity) -> Result<Url> {
    let mut url = server.clone();
    let scheme = match server.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(SessionError::Connect(format!(
                "unsupported server scheme: {other}"
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| SessionError::Connect(format!("cannot switch {server} to {scheme}")))?;
    push_segments(&mut url, &["ws", identity.as_str()])?;
    Ok(url)
}

/// `http://host/base` → `http://host/base/api/{path}`
pub fn api_endpoint(server: &Url, path: &str) -> Result<Url> {
    let mut url = server.clone();
    push_segments(&mut url, &["api", path])?;
    Ok(url)
}

fn push_segments(url: &mut Url, segments: &[&str]) -> Result<()> {
    let display = url.to_string();
    let mut path = url
        .path_segments_mut()
        .map_err(|_| SessionError::Connect(format!("{display} cannot be a base url")))?;
    path.pop_if_empty().extend(segments);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn websocket_endpoint_follows_http_scheme() {
        let id = ClientIdentity::new("client_1");
        let plain = ws_endpoint(&Url::parse("http://localhost:8001").unwrap(), &id).unwrap();
        assert_eq!(plain.as_str(), "ws://localhost:8001/ws/client_1");

        let tls = ws_endpoint(&Url::parse("https://chat.example.org/app/").unwrap(), &id).unwrap();
        assert_eq!(tls.as_str(), "wss://chat.example.org/app/ws/client_1");
    }

    #[test]
    fn api_endpoint_appends_prefix() {
        let url = api_endpoint(&Url::parse("http://localhost:8001/").unwrap(), "config").unwrap();
        assert_eq!(url.as_str(), "http://localhost:8001/api/config");
    }

    #[test]
    fn interests_are_trimmed_and_capped() {
        let config = ClientConfig {
            interests: vec![
                " music ".into(),
                "".into(),
                "games".into(),
                "a".into(),
                "b".into(),
                "c".into(),
                "d".into(),
            ],
            ..Default::default()
        };
        assert_eq!(
            config.normalized_interests(),
            vec!["music", "games", "a", "b", "c"]
        );
    }

    #[test]
    fn partial_config_uses_defaults() {
        let config: ClientConfig =
            serde_json::from_str(r#"{"server_url":"https://chat.example.org"}"#).unwrap();
        assert_eq!(config.reannounce_delay(), DEFAULT_REANNOUNCE_DELAY);
        assert!(config.identity_hint.is_none());
    }
}
