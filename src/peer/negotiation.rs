//! Одна попытка переговоров с одним собеседником: offer/answer, кандидаты,
//! отслеживание состояния соединения и один перезапуск ICE.
//!
//! Все методы вызываются из одного таймлайна координатора, поэтому
//! между `await` внутри метода никто не может закрыть сессию под ногами.
//! События контекста несут номер сессии, и после закрытия координатор их
//! просто выбрасывает.

use crate::error::{Result, SessionError};
use crate::logger::dump_candidate;
use crate::media::MediaSource;
use crate::peer::context::{ContextEvent, ContextFactory, EventSink, NegotiationContext, TaggedEvent};
use crate::peer::ice::{analyze_candidates, IceConfiguration};
use crate::peer::state::{NegotiationState, SessionReport, MAX_ICE_RESTARTS};
use crate::peer::types::{ClientIdentity, CoarseState, IceCandidate, Role, SessionDescription};
use crate::signaling::{OutgoingMessage, SignalingLink};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Всё, что нужно сессии снаружи
#[derive(Clone)]
pub struct SessionDeps {
    pub factory: Arc<dyn ContextFactory>,
    pub ice: IceConfiguration,
    pub link: SignalingLink,
    pub events: mpsc::UnboundedSender<TaggedEvent>,
}

pub struct NegotiationSession {
    generation: u64,
    local: ClientIdentity,
    peer: ClientIdentity,
    role: Option<Role>,
    state: NegotiationState,
    deps: SessionDeps,
    context: Option<Arc<dyn NegotiationContext>>,
    media: Option<Arc<dyn MediaSource>>,
    connected: bool,
    restarts: u32,
    // текущий эпизод отказа уже обработан перезапуском
    failure_handled: bool,
    sent_candidates: Vec<IceCandidate>,
}

impl NegotiationSession {
    pub fn new(
        generation: u64,
        local: ClientIdentity,
        peer: ClientIdentity,
        media: Option<Arc<dyn MediaSource>>,
        deps: SessionDeps,
    ) -> Self {
        Self {
            generation,
            local,
            peer,
            role: None,
            state: NegotiationState::Idle,
            deps,
            context: None,
            media,
            connected: false,
            restarts: 0,
            failure_handled: false,
            sent_candidates: Vec::new(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    pub fn peer(&self) -> &ClientIdentity {
        &self.peer
    }

    pub fn has_context(&self) -> bool {
        self.context.is_some()
    }

    /// Создаёт контекст и, если мы инициатор, сразу отправляет offer.
    /// Без подсказки роль вычисляется по идентификаторам.
    pub async fn start(&mut self, role_hint: Option<Role>) -> Result<()> {
        match self.state {
            NegotiationState::Idle => {}
            NegotiationState::Closed => {
                debug!("start() on closed session #{}", self.generation);
                return Ok(());
            }
            other => {
                return Err(SessionError::NegotiationProtocolViolation(format!(
                    "start() in state {other:?}"
                )))
            }
        }

        let role = match role_hint.or_else(|| Role::for_pair(&self.local, &self.peer)) {
            Some(role) => role,
            None => {
                return Err(SessionError::NegotiationProtocolViolation(format!(
                    "peer identity equals ours ({})",
                    self.local
                )))
            }
        };
        self.role = Some(role);
        info!(
            "Session #{} with {}: local={} role={:?}",
            self.generation, self.peer, self.local, role
        );

        self.ensure_context().await?;

        match role {
            Role::Initiator => {
                info!("Creating offer as initiator");
                self.send_offer(false).await
            }
            Role::Responder => {
                info!("Waiting for offer from peer");
                self.state = NegotiationState::AwaitingOffer;
                Ok(())
            }
        }
    }

    /// Удалённый offer. Допустим в `Idle`/`AwaitingOffer`, а у отвечающей стороны
    /// ещё и как перезапуск/пересогласование. Если контекста нет, offer считается
    /// доказательством нашей роли и контекст создаётся на месте.
    pub async fn on_remote_offer(&mut self, offer: SessionDescription) -> Result<()> {
        if self.state.is_closed() {
            debug!("Offer for closed session #{} ignored", self.generation);
            return Ok(());
        }
        if self.role == Some(Role::Initiator) {
            return Err(SessionError::NegotiationProtocolViolation(
                "offer received by initiator (glare)".into(),
            ));
        }
        match self.state {
            NegotiationState::Idle
            | NegotiationState::AwaitingOffer
            | NegotiationState::Negotiating
            | NegotiationState::Established => {}
            other => {
                return Err(SessionError::NegotiationProtocolViolation(format!(
                    "offer in state {other:?}"
                )))
            }
        }

        if self.role.is_none() {
            info!("Offer arrived before start, acting as responder");
            self.role = Some(Role::Responder);
        }
        let ctx = self.ensure_context().await?;

        debug!("Setting remote description (offer)");
        let answer = ctx.accept_offer(offer).await?;
        self.state = NegotiationState::AnswerSent;
        self.failure_handled = false;

        info!("Sending answer");
        self.deps.link.send(OutgoingMessage::Answer { sdp: answer })?;
        self.state = self.settled_state();
        Ok(())
    }

    /// Удалённый answer. Без отправленного offer это нарушение протокола:
    /// сообщение игнорируется, сессия продолжается.
    pub async fn on_remote_answer(&mut self, answer: SessionDescription) -> Result<()> {
        if self.state.is_closed() {
            debug!("Answer for closed session #{} ignored", self.generation);
            return Ok(());
        }
        if self.state != NegotiationState::OfferSent {
            return Err(SessionError::NegotiationProtocolViolation(format!(
                "answer without offer (state {:?})",
                self.state
            )));
        }
        let Some(ctx) = self.context.clone() else {
            return Err(SessionError::NegotiationProtocolViolation(
                "answer without context".into(),
            ));
        };

        debug!("Setting remote description (answer)");
        ctx.apply_answer(answer).await?;
        self.failure_handled = false;
        self.state = self.settled_state();
        Ok(())
    }

    /// Кандидат собеседника. Без контекста он выбрасывается, очереди нет.
    pub async fn on_remote_candidate(&mut self, candidate: IceCandidate) -> Result<()> {
        if self.state.is_closed() {
            debug!("Candidate for closed session #{} ignored", self.generation);
            return Ok(());
        }
        let Some(ctx) = self.context.clone() else {
            warn!("Received ICE candidate but no peer connection exists, dropping it");
            return Ok(());
        };
        match ctx.add_candidate(candidate).await {
            Ok(()) => debug!("Successfully added ICE candidate"),
            // плохой кандидат не повод рвать сессию
            Err(e) => warn!("Error adding ICE candidate: {e}"),
        }
        Ok(())
    }

    /// Локальные треки появились позже, чем сессия стартовала
    pub async fn attach_media(&mut self, media: Arc<dyn MediaSource>) -> Result<()> {
        if self.state.is_closed() {
            return Ok(());
        }
        self.media = Some(media.clone());
        let Some(ctx) = self.context.clone() else {
            // треки подхватятся при создании контекста
            return Ok(());
        };

        let tracks = media.tracks();
        if tracks.is_empty() {
            return Ok(());
        }
        ctx.attach_tracks(&tracks).await?;
        info!("Attached {} late local tracks", tracks.len());

        let offer_already_out = matches!(
            self.state,
            NegotiationState::OfferSent
                | NegotiationState::Negotiating
                | NegotiationState::Established
        );
        if self.role == Some(Role::Initiator) && offer_already_out {
            info!("Renegotiating to carry late tracks");
            self.send_offer(false).await?;
        }
        Ok(())
    }

    /// Событие контекста. Возвращает то, что нужно знать координатору.
    pub async fn handle_event(&mut self, event: ContextEvent) -> Result<Option<SessionReport>> {
        if self.state.is_closed() {
            return Ok(None);
        }

        match event {
            ContextEvent::LocalCandidate(candidate) => {
                dump_candidate("LOCAL", &candidate);
                if !self.deps.link.is_open() {
                    // после рестарта ICE кандидаты всё равно соберутся заново
                    debug!("Link closed, local candidate lost");
                    return Ok(None);
                }
                self.sent_candidates.push(candidate.clone());
                if let Err(e) = self
                    .deps
                    .link
                    .send(OutgoingMessage::IceCandidate { candidate })
                {
                    debug!("Local candidate lost: {e}");
                }
                Ok(None)
            }

            ContextEvent::GatheringComplete => {
                debug!("All ICE candidates have been sent");
                analyze_candidates(&self.sent_candidates);
                self.sent_candidates.clear();
                Ok(None)
            }

            ContextEvent::RemoteTrack(kind) => {
                info!("Received remote {:?} track", kind);
                Ok(Some(SessionReport::RemoteTrack(kind)))
            }

            ContextEvent::ConnectionState(CoarseState::Connected) => {
                info!("WebRTC connection established!");
                self.connected = true;
                self.failure_handled = false;
                self.state = NegotiationState::Established;
                Ok(Some(SessionReport::Connected))
            }

            ContextEvent::ConnectionState(CoarseState::Connecting) => {
                debug!("Connection state: connecting");
                Ok(None)
            }

            ContextEvent::ConnectionState(CoarseState::Disconnected) => {
                warn!("Connection disconnected");
                Ok(Some(self.lose_peer("peer connection disconnected").await))
            }

            ContextEvent::ConnectionState(CoarseState::Closed) => {
                Ok(Some(self.lose_peer("peer connection closed").await))
            }

            ContextEvent::ConnectionState(CoarseState::Failed) | ContextEvent::IceFailed => {
                self.on_connectivity_failure().await
            }
        }
    }

    /// Идемпотентно, из любого состояния. Устройства не останавливает.
    pub async fn close(&mut self) {
        if let Some(ctx) = self.context.take() {
            info!("Closing peer connection of session #{}", self.generation);
            ctx.close().await;
        }
        self.media = None;
        self.sent_candidates.clear();
        self.state = NegotiationState::Closed;
    }

    async fn on_connectivity_failure(&mut self) -> Result<Option<SessionReport>> {
        if self.failure_handled {
            debug!("Failure already handled by a pending ICE restart");
            return Ok(None);
        }
        if self.restarts >= MAX_ICE_RESTARTS {
            let reason = SessionError::ConnectivityFailed(format!(
                "ICE failed after {} restart(s)",
                self.restarts
            ));
            return Ok(Some(self.lose_peer(&reason.to_string()).await));
        }

        self.restarts += 1;
        self.failure_handled = true;
        warn!("ICE connection failed, attempting restart");

        if self.role == Some(Role::Initiator) {
            if let Err(e) = self.send_offer(true).await {
                let reason = SessionError::ConnectivityFailed(format!("ICE restart failed: {e}"));
                return Ok(Some(self.lose_peer(&reason.to_string()).await));
            }
        } else {
            debug!("Responder waits for the initiator's restart offer");
        }
        Ok(Some(SessionReport::Recovering))
    }

    async fn lose_peer(&mut self, reason: &str) -> SessionReport {
        warn!("Session #{} lost peer: {}", self.generation, reason);
        self.close().await;
        SessionReport::PeerLost(reason.to_string())
    }

    async fn send_offer(&mut self, ice_restart: bool) -> Result<()> {
        let ctx = self.ensure_context().await?;
        let offer = ctx.create_offer(ice_restart).await?;
        self.deps.link.send(OutgoingMessage::Offer { sdp: offer })?;
        info!("Sent offer (ice_restart={})", ice_restart);
        self.state = NegotiationState::OfferSent;
        Ok(())
    }

    /// Существующий контекст переиспользуется, новый создаётся только если его нет
    async fn ensure_context(&mut self) -> Result<Arc<dyn NegotiationContext>> {
        if let Some(ctx) = &self.context {
            return Ok(ctx.clone());
        }

        let sink = EventSink::new(self.generation, self.deps.events.clone());
        let ctx = self.deps.factory.create(&self.deps.ice, sink).await?;

        match &self.media {
            Some(media) => {
                let tracks = media.tracks();
                debug!("Adding {} local tracks to peer connection", tracks.len());
                // без треков сессия всё равно живёт, они добавятся позже
                if let Err(e) = ctx.attach_tracks(&tracks).await {
                    warn!("Failed to attach local tracks: {e}");
                }
            }
            None => debug!("Local media not ready yet, tracks will be attached later"),
        }

        self.context = Some(ctx.clone());
        Ok(ctx)
    }

    fn settled_state(&self) -> NegotiationState {
        if self.connected {
            NegotiationState::Established
        } else {
            NegotiationState::Negotiating
        }
    }
}
