use crate::error::Result;
use crate::peer::types::{ClientIdentity, IceCandidate, SessionDescription};
use serde::{Deserialize, Serialize};

/// Сообщения клиент → сервер
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutgoingMessage {
    /// готов к подбору собеседника
    Ready {
        #[serde(default)]
        interests: Vec<String>,
    },
    /// выйти из текущей пары
    Disconnect,
    Offer {
        sdp: SessionDescription,
    },
    Answer {
        sdp: SessionDescription,
    },
    IceCandidate {
        candidate: IceCandidate,
    },
    ChatMessage {
        message: String,
    },
}

impl OutgoingMessage {
    pub fn tag(&self) -> &'static str {
        match self {
            OutgoingMessage::Ready { .. } => "ready",
            OutgoingMessage::Disconnect => "disconnect",
            OutgoingMessage::Offer { .. } => "offer",
            OutgoingMessage::Answer { .. } => "answer",
            OutgoingMessage::IceCandidate { .. } => "ice_candidate",
            OutgoingMessage::ChatMessage { .. } => "chat_message",
        }
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Сообщения сервер → клиент. Пересылаемые сообщения сервер дополняет полем `from`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IncomingMessage {
    /// собеседника пока нет
    Waiting,
    Paired {
        peer_id: ClientIdentity,
        room_id: String,
    },
    PeerDisconnected,
    /// подтверждение нашего `disconnect`
    Disconnected,
    Offer {
        sdp: SessionDescription,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<ClientIdentity>,
    },
    Answer {
        sdp: SessionDescription,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<ClientIdentity>,
    },
    IceCandidate {
        #[serde(default)]
        candidate: Option<IceCandidate>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<ClientIdentity>,
    },
    ChatMessage {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<ClientIdentity>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

impl IncomingMessage {
    pub fn tag(&self) -> &'static str {
        match self {
            IncomingMessage::Waiting => "waiting",
            IncomingMessage::Paired { .. } => "paired",
            IncomingMessage::PeerDisconnected => "peer_disconnected",
            IncomingMessage::Disconnected => "disconnected",
            IncomingMessage::Offer { .. } => "offer",
            IncomingMessage::Answer { .. } => "answer",
            IncomingMessage::IceCandidate { .. } => "ice_candidate",
            IncomingMessage::ChatMessage { .. } => "chat_message",
            IncomingMessage::Unknown => "unknown",
        }
    }

    pub fn decode(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ready_carries_interests() {
        let msg = OutgoingMessage::Ready {
            interests: vec!["music".into()],
        };
        let value: serde_json::Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(value, json!({"type": "ready", "interests": ["music"]}));
    }

    #[test]
    fn disconnect_has_empty_payload() {
        let value: serde_json::Value =
            serde_json::from_str(&OutgoingMessage::Disconnect.encode().unwrap()).unwrap();
        assert_eq!(value, json!({"type": "disconnect"}));
    }

    #[test]
    fn offer_uses_browser_description_shape() {
        let msg = OutgoingMessage::Offer {
            sdp: SessionDescription::offer("v=0\r\n"),
        };
        let value: serde_json::Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"type": "offer", "sdp": {"type": "offer", "sdp": "v=0\r\n"}})
        );
    }

    #[test]
    fn decodes_server_messages() {
        let paired =
            IncomingMessage::decode(r#"{"type":"paired","room_id":"r1","peer_id":"B2"}"#).unwrap();
        assert_eq!(
            paired,
            IncomingMessage::Paired {
                peer_id: ClientIdentity::new("B2"),
                room_id: "r1".into()
            }
        );

        let cand = IncomingMessage::decode(
            r#"{"type":"ice_candidate","candidate":{"candidate":"candidate:0 1 udp 1 1.2.3.4 9 typ host","sdpMid":"0","sdpMLineIndex":0},"from":"A1"}"#,
        )
        .unwrap();
        match cand {
            IncomingMessage::IceCandidate {
                candidate: Some(c),
                from,
            } => {
                assert_eq!(c.sdp_mline_index, Some(0));
                assert_eq!(from, Some(ClientIdentity::new("A1")));
            }
            other => panic!("unexpected {other:?}"),
        }

        let chat = IncomingMessage::decode(
            r#"{"type":"chat_message","message":"hi","from":"A1","timestamp":"2024-01-01T00:00:00+00:00"}"#,
        )
        .unwrap();
        assert!(matches!(chat, IncomingMessage::ChatMessage { ref message, .. } if message == "hi"));
    }

    #[test]
    fn unknown_tags_are_tolerated() {
        assert_eq!(
            IncomingMessage::decode(r#"{"type":"stats","online_users":3}"#).unwrap(),
            IncomingMessage::Unknown
        );
    }

    #[test]
    fn malformed_description_is_rejected() {
        assert!(IncomingMessage::decode(r#"{"type":"answer","sdp":{"sdp":"v=0"}}"#).is_err());
    }
}
