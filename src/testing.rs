//! Фейки для тестов: peer connection без сети, сигнальный сервер в памяти
//! и заглушки HTTP коллабораторов.

use crate::api::ReportSink;
use crate::error::{Result, SessionError};
use crate::media::{LocalTrack, MediaDevices, MediaSource, SilentMedia};
use crate::peer::context::{ContextEvent, ContextFactory, EventSink, NegotiationContext};
use crate::peer::ice::{IceConfigSource, IceConfiguration};
use crate::peer::types::{
    ClientIdentity, CoarseState, IceCandidate, SessionDescription, TrackKind,
};
use crate::signaling::{IncomingMessage, LinkConnector, LinkEnd, LinkEvents, OutgoingMessage, SignalingLink};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::debug;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Что с фейковым контекстом делали
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeCall {
    AttachTracks(Vec<TrackKind>),
    CreateOffer { ice_restart: bool },
    AcceptOffer(String),
    ApplyAnswer(String),
    AddCandidate(IceCandidate),
    Close,
}

/// Контекст, который «соединяется», как только обмен описаниями завершён
pub struct FakeContext {
    id: usize,
    sink: EventSink,
    auto_connect: bool,
    calls: Mutex<Vec<FakeCall>>,
    offers: AtomicUsize,
    closed: AtomicBool,
}

impl FakeContext {
    pub fn calls(&self) -> Vec<FakeCall> {
        lock(&self.calls).clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Событие от имени контекста, как будто его прислал транспорт
    pub fn emit(&self, event: ContextEvent) {
        self.sink.emit(event);
    }

    fn record(&self, call: FakeCall) {
        lock(&self.calls).push(call);
    }

    fn local_candidate(&self) -> IceCandidate {
        IceCandidate {
            candidate: format!(
                "candidate:{id} 1 udp 2122260223 10.0.0.{id} {port} typ host",
                id = self.id,
                port = 50000 + self.id
            ),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(SessionError::ConnectivityFailed(format!(
                "context {} already closed",
                self.id
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl NegotiationContext for FakeContext {
    async fn attach_tracks(&self, tracks: &[LocalTrack]) -> Result<()> {
        self.ensure_open()?;
        self.record(FakeCall::AttachTracks(
            tracks.iter().map(|t| t.kind).collect(),
        ));
        Ok(())
    }

    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription> {
        self.ensure_open()?;
        self.record(FakeCall::CreateOffer { ice_restart });
        let n = self.offers.fetch_add(1, Ordering::SeqCst);
        self.sink
            .emit(ContextEvent::LocalCandidate(self.local_candidate()));
        Ok(SessionDescription::offer(format!("offer-{}-{}", self.id, n)))
    }

    async fn accept_offer(&self, offer: SessionDescription) -> Result<SessionDescription> {
        self.ensure_open()?;
        self.record(FakeCall::AcceptOffer(offer.sdp.clone()));
        self.sink
            .emit(ContextEvent::LocalCandidate(self.local_candidate()));
        if self.auto_connect {
            self.sink
                .emit(ContextEvent::ConnectionState(CoarseState::Connecting));
            self.sink
                .emit(ContextEvent::ConnectionState(CoarseState::Connected));
        }
        Ok(SessionDescription::answer(format!("answer-to-{}", offer.sdp)))
    }

    async fn apply_answer(&self, answer: SessionDescription) -> Result<()> {
        self.ensure_open()?;
        self.record(FakeCall::ApplyAnswer(answer.sdp));
        if self.auto_connect {
            self.sink
                .emit(ContextEvent::ConnectionState(CoarseState::Connected));
        }
        Ok(())
    }

    async fn add_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.ensure_open()?;
        self.record(FakeCall::AddCandidate(candidate));
        Ok(())
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.record(FakeCall::Close);
        }
    }
}

/// Создаёт `FakeContext` и запоминает всё созданное
pub struct FakeContextFactory {
    auto_connect: bool,
    created: Mutex<Vec<Arc<FakeContext>>>,
    ice_seen: Mutex<Vec<IceConfiguration>>,
}

impl FakeContextFactory {
    /// Контексты сами не соединяются, события шлёт тест
    pub fn new() -> Self {
        Self {
            auto_connect: false,
            created: Mutex::new(Vec::new()),
            ice_seen: Mutex::new(Vec::new()),
        }
    }

    /// Контексты сообщают `Connected` после обмена описаниями
    pub fn connecting() -> Self {
        Self {
            auto_connect: true,
            ..Self::new()
        }
    }

    pub fn created(&self) -> Vec<Arc<FakeContext>> {
        lock(&self.created).clone()
    }

    pub fn last(&self) -> Option<Arc<FakeContext>> {
        lock(&self.created).last().cloned()
    }

    pub fn count(&self) -> usize {
        lock(&self.created).len()
    }

    /// С какими ICE конфигурациями создавались контексты
    pub fn ice_seen(&self) -> Vec<IceConfiguration> {
        lock(&self.ice_seen).clone()
    }
}

impl Default for FakeContextFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContextFactory for FakeContextFactory {
    async fn create(
        &self,
        ice: &IceConfiguration,
        sink: EventSink,
    ) -> Result<Arc<dyn NegotiationContext>> {
        let mut created = lock(&self.created);
        let ctx = Arc::new(FakeContext {
            id: created.len() + 1,
            sink,
            auto_connect: self.auto_connect,
            calls: Mutex::new(Vec::new()),
            offers: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        });
        created.push(ctx.clone());
        lock(&self.ice_seen).push(ice.clone());
        Ok(ctx)
    }
}

/// `/api/config` недоступен
pub struct FailingIce;

#[async_trait]
impl IceConfigSource for FailingIce {
    async fn fetch_ice_config(&self) -> Result<IceConfiguration> {
        Err(SessionError::Connect("config endpoint unreachable".into()))
    }
}

/// `/api/config` отдаёт заранее заданный список
pub struct FixedIce(pub IceConfiguration);

#[async_trait]
impl IceConfigSource for FixedIce {
    async fn fetch_ice_config(&self) -> Result<IceConfiguration> {
        Ok(self.0.clone())
    }
}

/// Отдаёт один и тот же источник, чтобы тест видел его флаги и `stop()`
pub struct SharedDevices(Arc<SilentMedia>);

impl SharedDevices {
    pub fn new(media: Arc<SilentMedia>) -> Self {
        Self(media)
    }
}

#[async_trait]
impl MediaDevices for SharedDevices {
    async fn acquire(&self) -> Result<Arc<dyn MediaSource>> {
        Ok(self.0.clone())
    }
}

/// Запоминает жалобы: (кто, на кого, причина)
#[derive(Default)]
pub struct RecordingReports {
    submitted: Mutex<Vec<(ClientIdentity, ClientIdentity, String)>>,
}

impl RecordingReports {
    pub fn submitted(&self) -> Vec<(ClientIdentity, ClientIdentity, String)> {
        lock(&self.submitted).clone()
    }
}

#[async_trait]
impl ReportSink for RecordingReports {
    async fn submit_report(
        &self,
        reporter: &ClientIdentity,
        reported: &ClientIdentity,
        reason: &str,
    ) -> Result<()> {
        lock(&self.submitted).push((reporter.clone(), reported.clone(), reason.to_owned()));
        Ok(())
    }
}

/// Отдаёт тесту транспортный конец каждого открытого канала
pub struct ScriptedConnector {
    ends: mpsc::UnboundedSender<(ClientIdentity, LinkEnd)>,
}

impl ScriptedConnector {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<(ClientIdentity, LinkEnd)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { ends: tx }, rx)
    }
}

#[async_trait]
impl LinkConnector for ScriptedConnector {
    async fn connect(&self, identity: &ClientIdentity) -> Result<(SignalingLink, LinkEvents)> {
        let (link, events, end) = SignalingLink::channel(identity.clone());
        self.ends
            .send((identity.clone(), end))
            .map_err(|_| SessionError::Connect("test dropped the connector".into()))?;
        Ok((link, events))
    }
}

enum ServerEvent {
    Joined(ClientIdentity, mpsc::UnboundedSender<IncomingMessage>),
    Message(ClientIdentity, OutgoingMessage),
    Left(ClientIdentity),
    Kick(ClientIdentity),
}

/// Сервер подбора в памяти: очередь ожидания, комнаты из двух человек
/// и пересылка offer/answer/кандидатов/чата собеседнику с полем `from`.
pub struct RelayServer {
    events: mpsc::UnboundedSender<ServerEvent>,
    received: Arc<Mutex<Vec<(ClientIdentity, OutgoingMessage)>>>,
}

impl RelayServer {
    pub fn start() -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let received = Arc::new(Mutex::new(Vec::new()));
        tokio::spawn(relay_loop(rx, received.clone()));
        Arc::new(Self {
            events: tx,
            received,
        })
    }

    /// Всё, что клиенты прислали серверу, в порядке получения
    pub fn received(&self) -> Vec<(ClientIdentity, OutgoingMessage)> {
        lock(&self.received).clone()
    }

    /// Сколько сообщений с тегом `tag` прислал клиент
    pub fn count(&self, from: &ClientIdentity, tag: &str) -> usize {
        lock(&self.received)
            .iter()
            .filter(|(id, msg)| id == from && msg.tag() == tag)
            .count()
    }

    /// Обрывает транспорт клиента, как при падении сокета
    pub fn kick(&self, id: &ClientIdentity) {
        let _ = self.events.send(ServerEvent::Kick(id.clone()));
    }
}

#[async_trait]
impl LinkConnector for RelayServer {
    async fn connect(&self, identity: &ClientIdentity) -> Result<(SignalingLink, LinkEvents)> {
        let (link, events, end) = SignalingLink::channel(identity.clone());
        let (deliver_tx, deliver_rx) = mpsc::unbounded_channel();
        self.events
            .send(ServerEvent::Joined(identity.clone(), deliver_tx))
            .map_err(|_| SessionError::Connect("relay server stopped".into()))?;
        tokio::spawn(client_pump(
            identity.clone(),
            end,
            deliver_rx,
            self.events.clone(),
        ));
        Ok((link, events))
    }
}

async fn client_pump(
    id: ClientIdentity,
    mut end: LinkEnd,
    mut deliveries: mpsc::UnboundedReceiver<IncomingMessage>,
    server: mpsc::UnboundedSender<ServerEvent>,
) {
    let close_signal = end.close_signal();
    loop {
        tokio::select! {
            biased;

            outgoing = end.next_outgoing() => match outgoing {
                Some(msg) => {
                    let _ = server.send(ServerEvent::Message(id.clone(), msg));
                }
                None => break,
            },

            delivery = deliveries.recv() => match delivery {
                Some(msg) => {
                    end.deliver(msg);
                }
                None => break,
            },

            _ = close_signal.wait() => {
                while let Some(msg) = end.try_next_outgoing() {
                    let _ = server.send(ServerEvent::Message(id.clone(), msg));
                }
                break;
            }
        }
    }
    let _ = server.send(ServerEvent::Left(id));
}

#[derive(Default)]
struct Relay {
    clients: HashMap<ClientIdentity, mpsc::UnboundedSender<IncomingMessage>>,
    waiting: Vec<ClientIdentity>,
    partners: HashMap<ClientIdentity, ClientIdentity>,
    rooms: usize,
}

impl Relay {
    fn send(&self, to: &ClientIdentity, msg: IncomingMessage) {
        if let Some(tx) = self.clients.get(to) {
            let _ = tx.send(msg);
        }
    }

    fn leave_room(&mut self, id: &ClientIdentity) {
        if let Some(peer) = self.partners.remove(id) {
            self.partners.remove(&peer);
            self.send(&peer, IncomingMessage::PeerDisconnected);
        }
    }

    fn match_user(&mut self, id: &ClientIdentity) {
        let candidate = self.waiting.iter().position(|w| w != id);
        match candidate {
            Some(pos) => {
                let other = self.waiting.remove(pos);
                self.waiting.retain(|w| w != id);
                self.rooms += 1;
                let room_id = format!("room_{}", self.rooms);
                self.partners.insert(id.clone(), other.clone());
                self.partners.insert(other.clone(), id.clone());
                self.send(
                    id,
                    IncomingMessage::Paired {
                        peer_id: other.clone(),
                        room_id: room_id.clone(),
                    },
                );
                self.send(
                    &other,
                    IncomingMessage::Paired {
                        peer_id: id.clone(),
                        room_id,
                    },
                );
            }
            None => {
                if !self.waiting.contains(id) {
                    self.waiting.push(id.clone());
                }
                self.send(id, IncomingMessage::Waiting);
            }
        }
    }

    fn relay(&self, from: &ClientIdentity, msg: IncomingMessage) {
        match self.partners.get(from) {
            Some(peer) => self.send(peer, msg),
            None => debug!("{} has no partner, {} dropped", from, msg.tag()),
        }
    }

    fn on_message(&mut self, id: ClientIdentity, msg: OutgoingMessage) {
        let from = Some(id.clone());
        match msg {
            OutgoingMessage::Ready { .. } => self.match_user(&id),
            OutgoingMessage::Disconnect => {
                self.leave_room(&id);
                self.send(&id, IncomingMessage::Disconnected);
            }
            OutgoingMessage::Offer { sdp } => self.relay(&id, IncomingMessage::Offer { sdp, from }),
            OutgoingMessage::Answer { sdp } => {
                self.relay(&id, IncomingMessage::Answer { sdp, from })
            }
            OutgoingMessage::IceCandidate { candidate } => self.relay(
                &id,
                IncomingMessage::IceCandidate {
                    candidate: Some(candidate),
                    from,
                },
            ),
            OutgoingMessage::ChatMessage { message } => self.relay(
                &id,
                IncomingMessage::ChatMessage {
                    message,
                    from,
                    timestamp: None,
                },
            ),
        }
    }

    fn on_left(&mut self, id: &ClientIdentity) {
        self.leave_room(id);
        self.waiting.retain(|w| w != id);
        self.clients.remove(id);
    }
}

async fn relay_loop(
    mut events: mpsc::UnboundedReceiver<ServerEvent>,
    received: Arc<Mutex<Vec<(ClientIdentity, OutgoingMessage)>>>,
) {
    let mut relay = Relay::default();
    while let Some(event) = events.recv().await {
        match event {
            ServerEvent::Joined(id, tx) => {
                relay.clients.insert(id, tx);
            }
            ServerEvent::Message(id, msg) => {
                lock(&received).push((id.clone(), msg.clone()));
                relay.on_message(id, msg);
            }
            ServerEvent::Left(id) => relay.on_left(&id),
            ServerEvent::Kick(id) => {
                // без отправителя насос клиента завершится и канал закроется
                relay.clients.remove(&id);
            }
        }
    }
}
