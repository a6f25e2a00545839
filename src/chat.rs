//! Текстовый чат через сигнальный сервер. Сообщения к паре не привязаны:
//! сервер сам решает, кому их переслать, и лог очищается при смене собеседника.

use crate::signaling::{OutgoingMessage, SignalingLink};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatEntry {
    pub text: String,
    pub is_local: bool,
    pub at: DateTime<Utc>,
}

/// Лог сообщений в порядке появления
#[derive(Debug, Default, Clone)]
pub struct ChatRelay {
    entries: Vec<ChatEntry>,
}

impl ChatRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Пустые сообщения и сообщения при закрытом канале не отправляются
    /// и в лог не попадают.
    pub fn send(&mut self, link: &SignalingLink, text: &str) -> Option<ChatEntry> {
        if text.trim().is_empty() {
            return None;
        }
        if !link.is_open() {
            debug!("Chat message dropped, link closed");
            return None;
        }
        link.send(OutgoingMessage::ChatMessage {
            message: text.to_owned(),
        })
        .ok()?;

        let entry = ChatEntry {
            text: text.to_owned(),
            is_local: true,
            at: Utc::now(),
        };
        self.entries.push(entry.clone());
        Some(entry)
    }

    /// Сообщение собеседника, время локальное
    pub fn receive(&mut self, text: String) -> ChatEntry {
        let entry = ChatEntry {
            text,
            is_local: false,
            at: Utc::now(),
        };
        self.entries.push(entry.clone());
        entry
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn entries(&self) -> &[ChatEntry] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::types::ClientIdentity;

    #[test]
    fn send_appends_local_entry_and_queues_message() {
        let (link, _events, mut end) = SignalingLink::channel(ClientIdentity::new("A1"));
        let mut chat = ChatRelay::new();

        let entry = chat.send(&link, "hi").unwrap();
        assert!(entry.is_local);
        assert_eq!(chat.entries().len(), 1);
        assert_eq!(
            end.try_next_outgoing(),
            Some(OutgoingMessage::ChatMessage {
                message: "hi".into()
            })
        );
    }

    #[test]
    fn blank_or_offline_messages_are_not_sent() {
        let (link, _events, mut end) = SignalingLink::channel(ClientIdentity::new("A1"));
        let mut chat = ChatRelay::new();

        assert!(chat.send(&link, "   ").is_none());
        link.close();
        assert!(chat.send(&link, "hello").is_none());

        assert!(chat.entries().is_empty());
        assert!(end.try_next_outgoing().is_none());
    }

    #[test]
    fn receive_keeps_order_and_clear_empties() {
        let mut chat = ChatRelay::new();
        chat.receive("one".into());
        chat.receive("two".into());
        let texts: Vec<_> = chat.entries().iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["one", "two"]);
        assert!(chat.entries().iter().all(|e| !e.is_local));

        chat.clear();
        assert!(chat.entries().is_empty());
    }
}
