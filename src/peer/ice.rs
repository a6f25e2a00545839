use crate::error::{Result, SessionError};
use crate::peer::types::{IceCandidate, IceServerConfig};
use crate::utils::add_ice_url_scheme;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use webrtc::ice_transport::ice_server::RTCIceServer;

/// Дефолтные серверы на случай, если `/config` недоступен
static FALLBACK_ICE_SERVERS: Lazy<Vec<IceServerConfig>> = Lazy::new(|| {
    vec![
        IceServerConfig {
            urls: vec!["stun:stun.l.google.com:19302".into()],
            username: None,
            credential: None,
        },
        IceServerConfig {
            urls: vec!["stun:stun1.l.google.com:19302".into()],
            username: None,
            credential: None,
        },
    ]
});

/// Список ICE серверов. Получается один раз при старте и дальше не меняется.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceConfiguration {
    servers: Arc<Vec<IceServerConfig>>,
}

impl IceConfiguration {
    /// Нормализует список: дописывает схему, выкидывает записи без URL.
    /// Пустой результат считается ошибкой.
    pub fn new(servers: Vec<IceServerConfig>) -> Result<Self> {
        let servers: Vec<IceServerConfig> = servers
            .into_iter()
            .filter_map(|server| {
                let urls: Vec<String> = server
                    .urls
                    .iter()
                    .map(|u| u.trim())
                    .filter(|u| !u.is_empty())
                    .map(|u| add_ice_url_scheme(u, &server))
                    .collect();
                if urls.is_empty() {
                    debug!("Dropping ICE server entry without urls");
                    return None;
                }
                Some(IceServerConfig { urls, ..server })
            })
            .collect();

        if servers.is_empty() {
            return Err(SessionError::InvalidIceConfig(
                "no usable ICE servers".into(),
            ));
        }
        Ok(Self {
            servers: Arc::new(servers),
        })
    }

    pub fn fallback() -> Self {
        Self {
            servers: Arc::new(FALLBACK_ICE_SERVERS.clone()),
        }
    }

    pub fn servers(&self) -> &[IceServerConfig] {
        &self.servers
    }

    /// Серверы в формате webrtc
    pub fn rtc_ice_servers(&self) -> Vec<RTCIceServer> {
        self.servers
            .iter()
            .map(|config| RTCIceServer {
                urls: config.urls.clone(),
                username: config.username.clone().unwrap_or_default(),
                credential: config.credential.clone().unwrap_or_default(),
                ..Default::default()
            })
            .collect()
    }
}

/// Откуда берётся ICE конфигурация (обычно `GET /api/config`)
#[async_trait]
pub trait IceConfigSource: Send + Sync {
    async fn fetch_ice_config(&self) -> Result<IceConfiguration>;
}

/// Получает конфигурацию; при любой ошибке или таймауте возвращает запасную.
/// Сессия никогда не создаётся без конфигурации.
pub async fn resolve_ice_configuration(
    source: &dyn IceConfigSource,
    limit: Duration,
) -> IceConfiguration {
    match timeout(limit, source.fetch_ice_config()).await {
        Ok(Ok(config)) => {
            info!("ICE config fetched: {} servers", config.servers().len());
            config
        }
        Ok(Err(e)) => {
            warn!("Error fetching ICE config: {e}, using fallback");
            IceConfiguration::fallback()
        }
        Err(_) => {
            warn!(
                "ICE config fetch timed out after {} ms, using fallback",
                limit.as_millis()
            );
            IceConfiguration::fallback()
        }
    }
}

pub fn analyze_candidates(candidates: &[IceCandidate]) {
    let mut host_count = 0;
    let mut srflx_count = 0;
    let mut relay_count = 0;

    for candidate in candidates {
        if candidate.candidate.contains("typ host") {
            host_count += 1;
        } else if candidate.candidate.contains("typ srflx") {
            srflx_count += 1;
        } else if candidate.candidate.contains("typ relay") {
            relay_count += 1;
        }
    }

    debug!(
        "Candidate analysis: {} host, {} srflx, {} relay",
        host_count, srflx_count, relay_count
    );

    if relay_count == 0 && !candidates.is_empty() {
        debug!("No TURN relay candidates sent, connection through symmetric NAT may fail");
    }
}
