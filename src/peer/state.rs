use crate::peer::types::TrackKind;

/// ========== NEGOTIATION STATE ==========

/// Состояние одной попытки переговоров
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Idle,
    AwaitingOffer,
    OfferSent,
    AnswerSent,
    Negotiating,
    Established,
    Closed,
}

impl NegotiationState {
    pub fn is_closed(self) -> bool {
        self == NegotiationState::Closed
    }
}

/// Итог, который сессия сообщает координатору
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionReport {
    /// соединение с собеседником установлено
    Connected,
    /// связь пропала, идёт перезапуск ICE
    Recovering,
    RemoteTrack(TrackKind),
    /// собеседник потерян, контекст уже закрыт
    PeerLost(String),
}

/// ========== CONSTANTS ==========

/// Сколько раз перезапускаем ICE, прежде чем сдаться
pub const MAX_ICE_RESTARTS: u32 = 1;

/// Размер пула ICE кандидатов
pub const ICE_CANDIDATE_POOL_SIZE: u8 = 10;
