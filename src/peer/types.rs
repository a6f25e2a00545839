use serde::{Deserialize, Deserializer, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Идентификатор клиента, выданный на время одного сигнального соединения
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ClientIdentity(String);

impl ClientIdentity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Результат одного события `paired`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomAssignment {
    pub peer: ClientIdentity,
    pub room: String,
}

/// Кто создаёт первый offer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

impl Role {
    /// Роль считается без лишнего обмена сообщениями: чей идентификатор меньше
    /// (побайтовое лексикографическое сравнение), тот и инициатор.
    /// Одинаковые идентификаторы роли не дают вообще.
    pub fn for_pair(local: &ClientIdentity, peer: &ClientIdentity) -> Option<Role> {
        match local.cmp(peer) {
            Ordering::Less => Some(Role::Initiator),
            Ordering::Greater => Some(Role::Responder),
            Ordering::Equal => None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// Описание сессии в том виде, в каком оно ходит по сигнальному каналу
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// ICE кандидат для WebRTC соединения
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,
}

/// Конфигурация ICE сервера, как её отдаёт `GET /api/config`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct IceServerConfig {
    #[serde(deserialize_with = "one_or_many")]
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

// сервер может прислать "urls": "stun:..." вместо списка
fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(url) => vec![url],
        OneOrMany::Many(urls) => urls,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

/// Грубое состояние соединения, которое сообщает контекст
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoarseState {
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exactly_one_side_initiates() {
        let pairs = [
            ("A1", "B2"),
            ("client_1700000000000_ab", "client_1700000000001_00"),
            ("z", "Z"),
            ("", "x"),
            ("client_9", "client_10"),
        ];
        for (a, b) in pairs {
            let a = ClientIdentity::new(a);
            let b = ClientIdentity::new(b);
            let left = Role::for_pair(&a, &b).unwrap();
            let right = Role::for_pair(&b, &a).unwrap();
            assert_ne!(left, right, "{a} vs {b}");
        }
    }

    #[test]
    fn a1_wins_against_b2() {
        let a = ClientIdentity::new("A1");
        let b = ClientIdentity::new("B2");
        assert_eq!(Role::for_pair(&a, &b), Some(Role::Initiator));
        assert_eq!(Role::for_pair(&b, &a), Some(Role::Responder));
    }

    #[test]
    fn identical_identities_have_no_role() {
        let a = ClientIdentity::new("same");
        assert_eq!(Role::for_pair(&a, &a.clone()), None);
    }

    #[test]
    fn ice_server_urls_accept_string_or_list() {
        let one: IceServerConfig =
            serde_json::from_str(r#"{"urls":"stun:stun.example.org:3478"}"#).unwrap();
        assert_eq!(one.urls, vec!["stun:stun.example.org:3478".to_string()]);

        let many: IceServerConfig = serde_json::from_str(
            r#"{"urls":["turn:t.example.org"],"username":"u","credential":"p"}"#,
        )
        .unwrap();
        assert_eq!(many.urls.len(), 1);
        assert_eq!(many.username.as_deref(), Some("u"));
    }

    #[test]
    fn candidate_uses_browser_field_names() {
        let cand = IceCandidate {
            candidate: "candidate:1 1 udp 2122260223 10.0.0.2 50000 typ host".into(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
        };
        let json = serde_json::to_value(&cand).unwrap();
        assert_eq!(json["sdpMid"], "0");
        assert_eq!(json["sdpMLineIndex"], 0);
    }
}
