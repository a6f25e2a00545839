//! Граница между переговорами и конкретной реализацией peer connection.
//! Контекст умеет делать описания и принимать кандидатов, а обо всём,
//! что происходит асинхронно, сообщает событиями в общий таймлайн.

use crate::error::Result;
use crate::media::LocalTrack;
use crate::peer::ice::IceConfiguration;
use crate::peer::types::{CoarseState, IceCandidate, SessionDescription, TrackKind};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// То, что контекст сообщает сам, без запроса
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextEvent {
    /// найден локальный кандидат
    LocalCandidate(IceCandidate),
    /// сбор кандидатов закончен
    GatheringComplete,
    /// собеседник прислал трек
    RemoteTrack(TrackKind),
    ConnectionState(CoarseState),
    /// ICE ушёл в failed
    IceFailed,
}

/// Событие с номером сессии, которой оно принадлежит
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedEvent {
    pub generation: u64,
    pub event: ContextEvent,
}

/// Куда контекст складывает события. Клонируется в колбэки.
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<TaggedEvent>,
}

impl EventSink {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<TaggedEvent>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Если таймлайн уже не слушает, событие просто теряется
    pub fn emit(&self, event: ContextEvent) {
        let _ = self.tx.send(TaggedEvent {
            generation: self.generation,
            event,
        });
    }
}

/// Живой peer connection одной сессии
#[async_trait]
pub trait NegotiationContext: Send + Sync {
    /// Присоединяет локальные треки (без остановки устройств при закрытии)
    async fn attach_tracks(&self, tracks: &[LocalTrack]) -> Result<()>;

    /// Создаёт offer и ставит его локальным описанием
    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription>;

    /// Ставит удалённый offer, создаёт и ставит answer
    async fn accept_offer(&self, offer: SessionDescription) -> Result<SessionDescription>;

    async fn apply_answer(&self, answer: SessionDescription) -> Result<()>;

    async fn add_candidate(&self, candidate: IceCandidate) -> Result<()>;

    async fn close(&self);
}

/// Создаёт контексты; реализация для webrtc в `peer::connection`
#[async_trait]
pub trait ContextFactory: Send + Sync {
    async fn create(
        &self,
        ice: &IceConfiguration,
        sink: EventSink,
    ) -> Result<Arc<dyn NegotiationContext>>;
}
