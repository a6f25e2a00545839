use crate::error::{Result, SessionError};
use crate::peer::types::ClientIdentity;
use crate::signaling::messages::{IncomingMessage, OutgoingMessage};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info};

#[derive(Debug)]
struct Shared {
    open: AtomicBool,
    closed: Notify,
}

impl Shared {
    /// true, если закрыли именно сейчас
    fn mark_closed(&self) -> bool {
        let was_open = self.open.swap(false, Ordering::SeqCst);
        if was_open {
            self.closed.notify_one();
        }
        was_open
    }
}

/// Событие сигнального канала
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Message(IncomingMessage),
    /// канал закрыт; приходит ровно один раз и последним
    Closed,
}

/// Отправляющая сторона единственного сигнального соединения.
/// Сообщения уходят в порядке вызова `send`.
#[derive(Debug, Clone)]
pub struct SignalingLink {
    identity: ClientIdentity,
    outbound: mpsc::UnboundedSender<OutgoingMessage>,
    shared: Arc<Shared>,
}

impl SignalingLink {
    /// Создаёт связку: ссылка для клиента, поток событий и транспортный конец,
    /// который обслуживает websocket (или тестовый сервер).
    pub fn channel(identity: ClientIdentity) -> (SignalingLink, LinkEvents, LinkEnd) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            open: AtomicBool::new(true),
            closed: Notify::new(),
        });

        let link = SignalingLink {
            identity,
            outbound: out_tx,
            shared: shared.clone(),
        };
        let events = LinkEvents {
            inbound: in_rx,
            shared: shared.clone(),
            finished: false,
        };
        let end = LinkEnd {
            outbound: out_rx,
            inbound: in_tx,
            shared,
        };
        (link, events, end)
    }

    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    pub fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst)
    }

    /// После закрытия отправка не падает, а возвращает `LinkClosed`
    pub fn send(&self, msg: OutgoingMessage) -> Result<()> {
        if !self.is_open() {
            debug!("Dropping {} on closed link", msg.tag());
            return Err(SessionError::LinkClosed);
        }
        let tag = msg.tag();
        self.outbound.send(msg).map_err(|_| {
            self.shared.mark_closed();
            SessionError::LinkClosed
        })?;
        debug!("Queued {} for signaling server", tag);
        Ok(())
    }

    /// Идемпотентно
    pub fn close(&self) {
        if self.shared.mark_closed() {
            info!("Signaling link closed by client {}", self.identity);
        }
    }
}

/// Входящие события сигнального канала
#[derive(Debug)]
pub struct LinkEvents {
    inbound: mpsc::UnboundedReceiver<IncomingMessage>,
    shared: Arc<Shared>,
    finished: bool,
}

impl LinkEvents {
    /// `Closed` отдаётся один раз, после него всегда `None`
    pub async fn recv(&mut self) -> Option<LinkEvent> {
        if self.finished {
            return None;
        }
        match self.inbound.recv().await {
            Some(msg) => Some(LinkEvent::Message(msg)),
            None => {
                self.finished = true;
                self.shared.mark_closed();
                Some(LinkEvent::Closed)
            }
        }
    }
}

/// Транспортный конец канала
#[derive(Debug)]
pub struct LinkEnd {
    outbound: mpsc::UnboundedReceiver<OutgoingMessage>,
    inbound: mpsc::UnboundedSender<IncomingMessage>,
    shared: Arc<Shared>,
}

impl LinkEnd {
    /// Следующее сообщение для сервера
    pub async fn next_outgoing(&mut self) -> Option<OutgoingMessage> {
        self.outbound.recv().await
    }

    /// Уже поставленное в очередь сообщение, без ожидания
    pub fn try_next_outgoing(&mut self) -> Option<OutgoingMessage> {
        self.outbound.try_recv().ok()
    }

    /// Передаёт сообщение сервера клиенту
    pub fn deliver(&self, msg: IncomingMessage) -> bool {
        self.inbound.send(msg).is_ok()
    }

    pub fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst)
    }

    pub fn close_signal(&self) -> CloseSignal {
        CloseSignal {
            shared: self.shared.clone(),
        }
    }
}

/// Срабатывает, когда клиент закрыл канал
#[derive(Debug, Clone)]
pub struct CloseSignal {
    shared: Arc<Shared>,
}

impl CloseSignal {
    pub async fn wait(&self) {
        while self.shared.open.load(Ordering::SeqCst) {
            self.shared.closed.notified().await;
        }
    }
}

/// Открывает сигнальное соединение под заданным идентификатором
#[async_trait]
pub trait LinkConnector: Send + Sync {
    async fn connect(&self, identity: &ClientIdentity) -> Result<(SignalingLink, LinkEvents)>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link() -> (SignalingLink, LinkEvents, LinkEnd) {
        SignalingLink::channel(ClientIdentity::new("A1"))
    }

    #[tokio::test]
    async fn messages_keep_send_order() {
        let (link, _events, mut end) = link();
        link.send(OutgoingMessage::Ready { interests: vec![] }).unwrap();
        link.send(OutgoingMessage::ChatMessage {
            message: "one".into(),
        })
        .unwrap();
        link.send(OutgoingMessage::Disconnect).unwrap();

        assert_eq!(end.next_outgoing().await.unwrap().tag(), "ready");
        assert_eq!(end.next_outgoing().await.unwrap().tag(), "chat_message");
        assert_eq!(end.next_outgoing().await.unwrap().tag(), "disconnect");
    }

    #[tokio::test]
    async fn transport_loss_emits_closed_once() {
        let (link, mut events, end) = link();
        end.deliver(IncomingMessage::Waiting);
        drop(end);

        assert_eq!(
            events.recv().await,
            Some(LinkEvent::Message(IncomingMessage::Waiting))
        );
        assert_eq!(events.recv().await, Some(LinkEvent::Closed));
        assert_eq!(events.recv().await, None);
        assert_eq!(events.recv().await, None);

        assert!(!link.is_open());
        assert!(matches!(
            link.send(OutgoingMessage::Disconnect),
            Err(SessionError::LinkClosed)
        ));
    }

    #[tokio::test]
    async fn local_close_wakes_transport() {
        let (link, _events, end) = link();
        let signal = end.close_signal();
        let waiter = tokio::spawn(async move { signal.wait().await });

        link.close();
        link.close();
        waiter.await.unwrap();
        assert!(!end.is_open());
        assert!(link.send(OutgoingMessage::Disconnect).is_err());
    }
}
