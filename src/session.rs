//! Верхний автомат клиента: медиа → сигнальный канал → ожидание пары →
//! одна сессия переговоров → снова ожидание.
//!
//! Всё изменяемое состояние принадлежит одной задаче `SessionCoordinator::run`.
//! Колбэки транспорта и peer connection попадают сюда только через каналы,
//! поэтому переходы никогда не перемешиваются.

use crate::api::ReportSink;
use crate::chat::{ChatEntry, ChatRelay};
use crate::commands::{Command, SessionHandle};
use crate::config::ClientConfig;
use crate::error::{Result, SessionError};
use crate::logger::Notifier;
use crate::media::{MediaDevices, MediaSource};
use crate::peer::context::{ContextFactory, TaggedEvent};
use crate::peer::ice::{resolve_ice_configuration, IceConfigSource, IceConfiguration};
use crate::peer::negotiation::{NegotiationSession, SessionDeps};
use crate::peer::state::SessionReport;
use crate::peer::types::{ClientIdentity, RoomAssignment, TrackKind};
use crate::signaling::{IncomingMessage, LinkConnector, LinkEvent, OutgoingMessage, SignalingLink};
use crate::utils::client_id;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

const NOTICE_CAPACITY: usize = 64;

/// Единственный источник правды для UI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Waiting,
    Connecting,
    Connected,
    Failed,
}

/// Снимок всего, что показывает UI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionView {
    pub state: SessionState,
    pub identity: ClientIdentity,
    pub peer: Option<ClientIdentity>,
    pub room: Option<String>,
    pub chat: Vec<ChatEntry>,
    pub audio_enabled: bool,
    pub video_enabled: bool,
    pub remote_tracks: Vec<TrackKind>,
}

/// Внешние зависимости координатора
#[derive(Clone)]
pub struct Collaborators {
    pub ice: Arc<dyn IceConfigSource>,
    pub media: Arc<dyn MediaDevices>,
    pub connector: Arc<dyn LinkConnector>,
    pub contexts: Arc<dyn ContextFactory>,
    pub reports: Arc<dyn ReportSink>,
}

/// Почему уходим от текущего собеседника
#[derive(Debug, Clone, PartialEq, Eq)]
enum Departure {
    /// пользователь нажал skip
    Skip,
    /// сервер сообщил, что собеседник ушёл
    PeerLeft,
    /// связь не поднялась или пропала
    PeerLost(String),
    /// переговоры сломались на нашей стороне
    NegotiationFailed(String),
}

impl Departure {
    /// сервер уже разорвал пару сам только при `peer_disconnected`
    fn notify_server(&self) -> bool {
        !matches!(self, Departure::PeerLeft)
    }
}

pub struct SessionCoordinator {
    config: ClientConfig,
    deps: Collaborators,
    identity: ClientIdentity,
    commands: mpsc::UnboundedReceiver<Command>,
    view_tx: watch::Sender<SessionView>,
    notifier: Notifier,

    state: SessionState,
    ice: IceConfiguration,
    media: Option<Arc<dyn MediaSource>>,
    link: Option<SignalingLink>,
    room: Option<RoomAssignment>,
    session: Option<NegotiationSession>,
    generation: u64,
    chat: ChatRelay,
    remote_tracks: Vec<TrackKind>,
    reannounce_at: Option<Instant>,
    ctx_tx: mpsc::UnboundedSender<TaggedEvent>,
    ctx_rx: mpsc::UnboundedReceiver<TaggedEvent>,
}

impl SessionCoordinator {
    pub fn new(config: ClientConfig, deps: Collaborators) -> (Self, SessionHandle) {
        let identity = match &config.identity_hint {
            Some(hint) if !hint.trim().is_empty() => ClientIdentity::new(hint.trim()),
            _ => ClientIdentity::new(client_id()),
        };
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (ctx_tx, ctx_rx) = mpsc::unbounded_channel();
        let notifier = Notifier::new(NOTICE_CAPACITY);

        let initial = SessionView {
            state: SessionState::Disconnected,
            identity: identity.clone(),
            peer: None,
            room: None,
            chat: Vec::new(),
            audio_enabled: false,
            video_enabled: false,
            remote_tracks: Vec::new(),
        };
        let (view_tx, view_rx) = watch::channel(initial);
        let handle = SessionHandle::new(cmd_tx, view_rx, notifier.clone());

        let coordinator = Self {
            config,
            deps,
            identity,
            commands: cmd_rx,
            view_tx,
            notifier,
            state: SessionState::Disconnected,
            ice: IceConfiguration::fallback(),
            media: None,
            link: None,
            room: None,
            session: None,
            generation: 0,
            chat: ChatRelay::new(),
            remote_tracks: Vec::new(),
            reannounce_at: None,
            ctx_tx,
            ctx_rx,
        };
        (coordinator, handle)
    }

    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    /// Работает до `disconnect` (Ok) или потери сигнального канала (`LinkClosed`).
    /// Без медиа в `Waiting` не входит и возвращает `MediaUnavailable`.
    pub async fn run(mut self) -> Result<()> {
        info!("Starting session coordinator as {}", self.identity);

        self.ice = resolve_ice_configuration(&*self.deps.ice, self.config.ice_fetch_timeout()).await;

        match self.deps.media.acquire().await {
            Ok(media) => {
                info!("Local media acquired");
                self.media = Some(media);
                self.publish();
            }
            Err(e) => {
                error!("Error accessing media devices: {e}");
                self.notifier
                    .emit_error(format!("Camera/microphone unavailable: {e}"));
                self.set_state(SessionState::Failed);
                return Err(e);
            }
        }

        let (link, mut link_events) = match self.deps.connector.connect(&self.identity).await {
            Ok(pair) => pair,
            Err(e) => {
                error!("Failed to open signaling link: {e}");
                self.notifier.emit_error(format!("Connection error: {e}"));
                self.release_media();
                self.set_state(SessionState::Disconnected);
                return Err(e);
            }
        };
        self.link = Some(link);
        self.announce_ready();

        loop {
            let reannounce = self.reannounce_at;
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(Command::Disconnect) => {
                        self.shutdown(true).await;
                        return Ok(());
                    }
                    Some(cmd) => self.handle_command(cmd).await,
                    None => {
                        info!("All session handles dropped, disconnecting");
                        self.shutdown(true).await;
                        return Ok(());
                    }
                },

                event = link_events.recv() => match event {
                    Some(LinkEvent::Message(msg)) => self.handle_message(msg).await,
                    Some(LinkEvent::Closed) | None => {
                        error!("Signaling link closed");
                        self.notifier.emit_error("Connection to server lost");
                        self.shutdown(false).await;
                        return Err(SessionError::LinkClosed);
                    }
                },

                Some(tagged) = self.ctx_rx.recv() => self.handle_context_event(tagged).await,

                _ = sleep_until(reannounce.unwrap_or_else(Instant::now)), if reannounce.is_some() => {
                    self.reannounce_at = None;
                    self.announce_ready();
                }
            }
        }
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Skip => {
                if self.room.is_none() && self.session.is_none() {
                    debug!("Skip with no partner, nothing to do");
                    return;
                }
                info!("Skipping to next person");
                self.leave_partner(Departure::Skip).await;
            }
            Command::ToggleAudio => self.toggle(TrackKind::Audio),
            Command::ToggleVideo => self.toggle(TrackKind::Video),
            Command::SendChat(text) => {
                let Some(link) = &self.link else { return };
                if self.chat.send(link, &text).is_some() {
                    self.publish();
                }
            }
            Command::Report(reason) => self.report(reason),
            // обрабатывается в цикле run
            Command::Disconnect => {}
        }
    }

    async fn handle_message(&mut self, msg: IncomingMessage) {
        match msg {
            IncomingMessage::Waiting => {
                if self.session.is_none() {
                    info!("Waiting for a partner");
                    self.set_state(SessionState::Waiting);
                    self.notifier.emit_waiting();
                }
            }

            IncomingMessage::Paired { peer_id, room_id } => {
                self.begin_pairing(peer_id, room_id).await;
            }

            IncomingMessage::PeerDisconnected => {
                if self.room.is_none() && self.session.is_none() {
                    debug!("peer_disconnected without a partner, ignoring");
                    return;
                }
                info!("Partner disconnected");
                self.leave_partner(Departure::PeerLeft).await;
            }

            IncomingMessage::Disconnected => debug!("Server acknowledged disconnect"),

            IncomingMessage::Offer { sdp, .. } => {
                let Some(session) = self.session.as_mut() else {
                    warn!("Offer without a partner, ignoring");
                    return;
                };
                let result = session.on_remote_offer(sdp).await;
                self.after_negotiation_step(result).await;
            }

            IncomingMessage::Answer { sdp, .. } => {
                let Some(session) = self.session.as_mut() else {
                    warn!("Answer without a partner, ignoring");
                    return;
                };
                let result = session.on_remote_answer(sdp).await;
                self.after_negotiation_step(result).await;
            }

            IncomingMessage::IceCandidate { candidate, .. } => {
                let Some(candidate) = candidate else {
                    debug!("Remote end-of-candidates");
                    return;
                };
                match self.session.as_mut() {
                    Some(session) => {
                        let result = session.on_remote_candidate(candidate).await;
                        self.after_negotiation_step(result).await;
                    }
                    None => warn!("Received ICE candidate but no session exists, dropping it"),
                }
            }

            IncomingMessage::ChatMessage { message, .. } => {
                if self.room.is_none() {
                    // сообщение от прежнего собеседника, пришедшее уже после ухода
                    debug!("Chat message without a partner dropped");
                    return;
                }
                let entry = self.chat.receive(message);
                self.notifier.emit_message(entry);
                self.publish();
            }

            IncomingMessage::Unknown => warn!("Unknown signaling message ignored"),
        }
    }

    async fn handle_context_event(&mut self, tagged: TaggedEvent) {
        let report = match self.session.as_mut() {
            Some(session) if session.generation() == tagged.generation => {
                session.handle_event(tagged.event).await
            }
            _ => {
                debug!("{}", SessionError::StaleCallback(tagged.generation));
                return;
            }
        };

        match report {
            Ok(Some(report)) => self.on_session_report(report).await,
            Ok(None) => {}
            Err(e) => self.after_negotiation_step(Err(e)).await,
        }
    }

    async fn on_session_report(&mut self, report: SessionReport) {
        match report {
            SessionReport::Connected => {
                if self.state != SessionState::Connected {
                    info!("Connected to partner");
                    self.set_state(SessionState::Connected);
                    self.notifier.emit_connected();
                }
            }
            SessionReport::Recovering => {
                self.notifier.emit_connection_problem();
                self.notifier.emit_connection_recovering();
            }
            SessionReport::RemoteTrack(kind) => {
                if !self.remote_tracks.contains(&kind) {
                    self.remote_tracks.push(kind);
                }
                self.notifier.emit_remote_track(kind);
                self.publish();
            }
            SessionReport::PeerLost(reason) => {
                self.notifier.emit_connection_failed();
                self.leave_partner(Departure::PeerLost(reason)).await;
            }
        }
    }

    /// Нарушения протокола только логируются, прочие ошибки рвут текущую пару
    async fn after_negotiation_step(&mut self, result: Result<()>) {
        match result {
            Ok(()) => {}
            Err(e) if e.is_ignorable() => warn!("Ignoring signaling message: {e}"),
            // событие Closed придёт следом и всё разберёт
            Err(SessionError::LinkClosed) => debug!("Negotiation step hit a closed link"),
            Err(e) => {
                error!("Negotiation failed: {e}");
                self.leave_partner(Departure::NegotiationFailed(e.to_string()))
                    .await;
            }
        }
    }

    async fn begin_pairing(&mut self, peer: ClientIdentity, room: String) {
        info!("Paired with {} in room {}", peer, room);
        // повторный paired не должен оставить висящий контекст
        if let Some(mut old) = self.session.take() {
            warn!("Pairing while a session is live, closing the old one");
            old.close().await;
        }
        self.reannounce_at = None;
        self.chat.clear();
        self.remote_tracks.clear();
        self.room = Some(RoomAssignment {
            peer: peer.clone(),
            room,
        });
        self.set_state(SessionState::Connecting);

        let Some(link) = self.link.clone() else {
            return;
        };
        self.generation += 1;
        let mut session = NegotiationSession::new(
            self.generation,
            self.identity.clone(),
            peer,
            self.media.clone(),
            SessionDeps {
                factory: self.deps.contexts.clone(),
                ice: self.ice.clone(),
                link,
                events: self.ctx_tx.clone(),
            },
        );
        let started = session.start(None).await;
        self.session = Some(session);

        if let Err(e) = started {
            error!("Failed to start negotiation: {e}");
            self.leave_partner(Departure::NegotiationFailed(e.to_string()))
                .await;
        }
    }

    /// Закрывает сессию, чистит чат и комнату и через паузу снова шлёт `ready`
    async fn leave_partner(&mut self, why: Departure) {
        debug!("Leaving partner: {:?}", why);
        if let Some(mut session) = self.session.take() {
            session.close().await;
        }
        let had_room = self.room.take().is_some();
        self.chat.clear();
        self.remote_tracks.clear();

        if had_room && why.notify_server() {
            if let Some(link) = &self.link {
                let _ = link.send(OutgoingMessage::Disconnect);
            }
        }
        if why == Departure::PeerLeft {
            self.notifier.emit_peer_left();
        }

        self.schedule_reannounce();
        self.set_state(SessionState::Waiting);
    }

    /// Следующий `ready` не раньше чем через паузу; повторный вызов только переносит его
    fn schedule_reannounce(&mut self) {
        let at = Instant::now() + self.config.reannounce_delay();
        debug!(
            "Re-announcing in {} ms",
            self.config.reannounce_delay().as_millis()
        );
        self.reannounce_at = Some(at);
    }

    fn announce_ready(&mut self) {
        let Some(link) = &self.link else { return };
        let interests = self.config.normalized_interests();
        match link.send(OutgoingMessage::Ready { interests }) {
            Ok(()) => {
                info!("Announced ready for pairing");
                if self.session.is_none() {
                    self.set_state(SessionState::Waiting);
                }
            }
            Err(e) => debug!("Cannot announce ready: {e}"),
        }
    }

    fn toggle(&mut self, kind: TrackKind) {
        let Some(media) = &self.media else { return };
        match media.toggle(kind) {
            Some(enabled) => {
                info!("{:?} {}", kind, if enabled { "enabled" } else { "muted" });
                self.publish();
            }
            None => debug!("No local {:?} track to toggle", kind),
        }
    }

    fn report(&self, reason: String) {
        let Some(room) = &self.room else {
            warn!("No peer to report");
            return;
        };
        let reports = self.deps.reports.clone();
        let reporter = self.identity.clone();
        let reported = room.peer.clone();
        // отправка жалобы ни на что в сессии не влияет
        tokio::spawn(async move {
            if let Err(e) = reports.submit_report(&reporter, &reported, &reason).await {
                warn!("Error submitting report: {e}");
            }
        });
    }

    /// Полный разбор: сессия, канал, устройства. `notify_server` только при
    /// добровольном отключении, когда канал ещё жив.
    async fn shutdown(&mut self, notify_server: bool) {
        info!("Disconnecting");
        if let Some(mut session) = self.session.take() {
            session.close().await;
        }
        if let Some(link) = self.link.take() {
            if notify_server {
                let _ = link.send(OutgoingMessage::Disconnect);
            }
            link.close();
        }
        self.room = None;
        self.chat.clear();
        self.remote_tracks.clear();
        self.reannounce_at = None;
        self.release_media();
        self.set_state(SessionState::Disconnected);
    }

    fn release_media(&mut self) {
        if let Some(media) = self.media.take() {
            media.stop();
        }
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            info!("Session state: {:?} -> {:?}", self.state, state);
            self.state = state;
        }
        self.publish();
    }

    fn publish(&self) {
        let (audio_enabled, video_enabled) = match &self.media {
            Some(media) => (
                media.is_enabled(TrackKind::Audio),
                media.is_enabled(TrackKind::Video),
            ),
            None => (false, false),
        };
        self.view_tx.send_replace(SessionView {
            state: self.state,
            identity: self.identity.clone(),
            peer: self.room.as_ref().map(|r| r.peer.clone()),
            room: self.room.as_ref().map(|r| r.room.clone()),
            chat: self.chat.entries().to_vec(),
            audio_enabled,
            video_enabled,
            remote_tracks: self.remote_tracks.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::Notice;
    use crate::media::SilentMedia;
    use crate::peer::types::SessionDescription;
    use crate::peer::WebRtcContextFactory;
    use crate::signaling::LinkEnd;
    use crate::testing::{
        FailingIce, FakeContextFactory, RecordingReports, ScriptedConnector, SharedDevices,
    };
    use std::time::Duration;

    struct Rig {
        handle: SessionHandle,
        end: LinkEnd,
        factory: Arc<FakeContextFactory>,
        media: Arc<SilentMedia>,
        reports: Arc<RecordingReports>,
        task: tokio::task::JoinHandle<Result<()>>,
    }

    async fn rig(identity: &str) -> Rig {
        let (connector, mut ends) = ScriptedConnector::channel();
        let factory = Arc::new(FakeContextFactory::new());
        let media = Arc::new(SilentMedia::new());
        let reports = Arc::new(RecordingReports::default());
        let config = ClientConfig {
            identity_hint: Some(identity.into()),
            ..Default::default()
        };
        let (coordinator, handle) = SessionCoordinator::new(
            config,
            Collaborators {
                ice: Arc::new(FailingIce),
                media: Arc::new(SharedDevices::new(media.clone())),
                connector: Arc::new(connector),
                contexts: factory.clone(),
                reports: reports.clone(),
            },
        );
        let task = tokio::spawn(coordinator.run());
        let (_, end) = ends.recv().await.unwrap();
        Rig {
            handle,
            end,
            factory,
            media,
            reports,
            task,
        }
    }

    async fn next_tag(end: &mut LinkEnd) -> &'static str {
        end.next_outgoing().await.unwrap().tag()
    }

    #[tokio::test(start_paused = true)]
    async fn announces_ready_and_waits() {
        let mut rig = rig("A1").await;
        assert_eq!(next_tag(&mut rig.end).await, "ready");
        rig.handle
            .wait_for(|v| v.state == SessionState::Waiting)
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn chat_log_is_cleared_on_new_pairing() {
        let mut rig = rig("B2").await;
        assert_eq!(next_tag(&mut rig.end).await, "ready");

        rig.end.deliver(IncomingMessage::Paired {
            peer_id: ClientIdentity::new("A1"),
            room_id: "r1".into(),
        });
        rig.end.deliver(IncomingMessage::ChatMessage {
            message: "hello".into(),
            from: None,
            timestamp: None,
        });
        rig.handle.wait_for(|v| v.chat.len() == 1).await.unwrap();

        rig.end.deliver(IncomingMessage::Paired {
            peer_id: ClientIdentity::new("A3"),
            room_id: "r2".into(),
        });
        let view = rig
            .handle
            .wait_for(|v| v.room.as_deref() == Some("r2"))
            .await
            .unwrap();
        assert!(view.chat.is_empty());
        // старый контекст закрыт до создания нового
        assert_eq!(rig.factory.count(), 2);
        assert!(rig.factory.created()[0].is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_stops_media_and_notifies_server() {
        let mut rig = rig("A1").await;
        assert_eq!(next_tag(&mut rig.end).await, "ready");

        rig.handle.disconnect();
        assert_eq!(rig.task.await.unwrap().ok(), Some(()));
        assert_eq!(next_tag(&mut rig.end).await, "disconnect");
        assert!(rig.media.is_stopped());
        assert_eq!(rig.handle.state(), SessionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_every_handle_disconnects() {
        let rig = rig("A1").await;
        let Rig {
            handle, media, task, ..
        } = rig;
        drop(handle);
        assert!(task.await.unwrap().is_ok());
        assert!(media.is_stopped());
    }

    #[tokio::test(start_paused = true)]
    async fn link_loss_tears_down_to_disconnected() {
        let rig = rig("A1").await;
        let watch = rig.handle.watch();
        drop(rig.end);

        let result = rig.task.await.unwrap();
        assert!(matches!(result, Err(SessionError::LinkClosed)));
        assert_eq!(watch.borrow().state, SessionState::Disconnected);
        assert!(rig.media.is_stopped());
    }

    #[tokio::test(start_paused = true)]
    async fn toggles_flip_view_flags() {
        let mut rig = rig("A1").await;
        assert_eq!(next_tag(&mut rig.end).await, "ready");
        rig.handle
            .wait_for(|v| v.audio_enabled && v.video_enabled)
            .await
            .unwrap();

        rig.handle.toggle_audio();
        let view = rig.handle.wait_for(|v| !v.audio_enabled).await.unwrap();
        assert!(view.video_enabled);
    }

    #[tokio::test(start_paused = true)]
    async fn report_goes_to_sink_only_with_peer() {
        let mut rig = rig("B2").await;
        assert_eq!(next_tag(&mut rig.end).await, "ready");

        rig.handle.report("spam");
        // команда и сообщение сервера идут разными каналами
        tokio::time::sleep(Duration::from_millis(1)).await;
        rig.end.deliver(IncomingMessage::Paired {
            peer_id: ClientIdentity::new("A1"),
            room_id: "r1".into(),
        });
        rig.handle
            .wait_for(|v| v.state == SessionState::Connecting)
            .await
            .unwrap();
        rig.handle.report("inappropriate: rude");
        tokio::time::sleep(Duration::from_millis(10)).await;

        let reports = rig.reports.submitted();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].1, ClientIdentity::new("A1"));
        assert_eq!(reports[0].2, "inappropriate: rude");
    }

    #[tokio::test(start_paused = true)]
    async fn chat_from_previous_partner_is_dropped() {
        let mut rig = rig("B2").await;
        assert_eq!(next_tag(&mut rig.end).await, "ready");
        let mut notices = rig.handle.notices();

        rig.end.deliver(IncomingMessage::Paired {
            peer_id: ClientIdentity::new("A1"),
            room_id: "r1".into(),
        });
        rig.handle
            .wait_for(|v| v.state == SessionState::Connecting)
            .await
            .unwrap();
        rig.handle.skip();
        rig.handle
            .wait_for(|v| v.state == SessionState::Waiting && v.room.is_none())
            .await
            .unwrap();

        rig.end.deliver(IncomingMessage::ChatMessage {
            message: "are you still there?".into(),
            from: Some(ClientIdentity::new("A1")),
            timestamp: None,
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(rig.handle.view().chat.is_empty());
        while let Ok(notice) = notices.try_recv() {
            assert!(!matches!(notice, Notice::Message(_)), "{notice:?}");
        }
    }

    #[tokio::test]
    async fn malformed_answer_keeps_the_pairing() {
        let (connector, mut ends) = ScriptedConnector::channel();
        let (coordinator, handle) = SessionCoordinator::new(
            ClientConfig {
                identity_hint: Some("A1".into()),
                ..Default::default()
            },
            Collaborators {
                ice: Arc::new(FailingIce),
                media: Arc::new(SharedDevices::new(Arc::new(SilentMedia::new()))),
                connector: Arc::new(connector),
                contexts: Arc::new(WebRtcContextFactory::new()),
                reports: Arc::new(RecordingReports::default()),
            },
        );
        let task = tokio::spawn(coordinator.run());
        let (_, mut end) = ends.recv().await.unwrap();
        assert_eq!(next_tag(&mut end).await, "ready");

        end.deliver(IncomingMessage::Paired {
            peer_id: ClientIdentity::new("B2"),
            room_id: "r1".into(),
        });
        assert_eq!(next_tag(&mut end).await, "offer");

        end.deliver(IncomingMessage::Answer {
            sdp: SessionDescription::answer("garbage"),
            from: Some(ClientIdentity::new("B2")),
        });
        // чат идёт тем же каналом и обрабатывается после answer
        end.deliver(IncomingMessage::ChatMessage {
            message: "hello?".into(),
            from: Some(ClientIdentity::new("B2")),
            timestamp: None,
        });
        let view = handle.wait_for(|v| v.chat.len() == 1).await.unwrap();
        assert_eq!(view.state, SessionState::Connecting);
        assert_eq!(view.room.as_deref(), Some("r1"));

        let sent: Vec<&str> = std::iter::from_fn(|| end.try_next_outgoing())
            .map(|m| m.tag())
            .collect();
        assert!(!sent.contains(&"disconnect"), "{sent:?}");
        assert!(!sent.contains(&"ready"), "{sent:?}");

        handle.disconnect();
        assert!(task.await.unwrap().is_ok());
    }
}
