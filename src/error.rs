use thiserror::Error;

/// Ошибки клиента. Ни одна из них не фатальна для процесса:
/// координатор переводит каждую в одно из состояний `Waiting`, `Failed` или `Disconnected`.
#[derive(Debug, Error)]
pub enum SessionError {
    /// сигнальный канал закрыт, отправка невозможна
    #[error("signaling link closed")]
    LinkClosed,

    #[error("media unavailable: {0}")]
    MediaUnavailable(String),

    /// ответ без offer, битое описание, offer у инициатора и т.п.
    #[error("negotiation protocol violation: {0}")]
    NegotiationProtocolViolation(String),

    #[error("connectivity failed: {0}")]
    ConnectivityFailed(String),

    /// результат пришёл после закрытия своей сессии
    #[error("stale callback for session #{0}")]
    StaleCallback(u64),

    #[error("signaling connect failed: {0}")]
    Connect(String),

    #[error("invalid ICE configuration: {0}")]
    InvalidIceConfig(String),

    #[error(transparent)]
    WebRtc(#[from] webrtc::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Url(#[from] url::ParseError),
}

impl SessionError {
    /// Ошибки, после которых сессию можно продолжать как ни в чём не бывало.
    pub fn is_ignorable(&self) -> bool {
        matches!(
            self,
            SessionError::NegotiationProtocolViolation(_) | SessionError::StaleCallback(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
