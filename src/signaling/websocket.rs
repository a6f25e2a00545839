use crate::config::ws_endpoint;
use crate::error::{Result, SessionError};
use crate::peer::types::ClientIdentity;
use crate::signaling::link::{LinkConnector, LinkEnd, LinkEvents, SignalingLink};
use crate::signaling::messages::IncomingMessage;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Сигнальный канал поверх websocket `ws(s)://host/ws/{client_id}`
pub struct WebSocketConnector {
    server: Url,
}

impl WebSocketConnector {
    pub fn new(server: Url) -> Self {
        Self { server }
    }
}

#[async_trait]
impl LinkConnector for WebSocketConnector {
    async fn connect(&self, identity: &ClientIdentity) -> Result<(SignalingLink, LinkEvents)> {
        let endpoint = ws_endpoint(&self.server, identity)?;
        let (ws_stream, _) = connect_async(endpoint.as_str())
            .await
            .map_err(|err| SessionError::Connect(format!("websocket connect failed: {err}")))?;
        info!("WebSocket connected with client ID: {}", identity);

        let (link, events, end) = SignalingLink::channel(identity.clone());
        tokio::spawn(pump(ws_stream, end));
        Ok((link, events))
    }
}

/// Гоняет сообщения между сокетом и каналом, пока одна из сторон не закроется.
/// Когда `end` дропается, клиент получает `LinkEvent::Closed`.
async fn pump(ws_stream: WsStream, mut end: LinkEnd) {
    let (mut ws_write, mut ws_read) = ws_stream.split();
    let close_signal = end.close_signal();

    loop {
        tokio::select! {
            // сначала отправляем то, что уже в очереди (например, disconnect перед close)
            biased;

            outgoing = end.next_outgoing() => {
                let Some(msg) = outgoing else { break };
                match msg.encode() {
                    Ok(text) => {
                        debug!("-> {}", msg.tag());
                        if let Err(e) = ws_write.send(Message::Text(text)).await {
                            warn!("WebSocket send failed: {e}");
                            break;
                        }
                    }
                    Err(e) => warn!("Failed to encode {}: {e}", msg.tag()),
                }
            }

            incoming = ws_read.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => deliver_text(&end, &text),
                    Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                        Ok(text) => deliver_text(&end, &text),
                        Err(_) => warn!("Dropping non UTF-8 binary frame"),
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        info!("WebSocket closed by server");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => {
                        debug!("WebSocket already closed");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket error: {e}");
                        break;
                    }
                }
            }

            _ = close_signal.wait() => {
                // дописываем хвост очереди и закрываемся
                while let Some(msg) = end.try_next_outgoing() {
                    if let Ok(text) = msg.encode() {
                        let _ = ws_write.send(Message::Text(text)).await;
                    }
                }
                let _ = ws_write.send(Message::Close(None)).await;
                debug!("WebSocket close frame sent");
                break;
            }
        }
    }
}

fn deliver_text(end: &LinkEnd, text: &str) {
    match IncomingMessage::decode(text) {
        Ok(msg) => {
            debug!("<- {}", msg.tag());
            end.deliver(msg);
        }
        // битое сообщение не ломает канал
        Err(e) => warn!("Ignoring malformed signaling message: {e}"),
    }
}
