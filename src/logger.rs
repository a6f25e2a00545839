use crate::chat::ChatEntry;
use crate::peer::types::{IceCandidate, TrackKind};
use tokio::sync::broadcast;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use webrtc::peer_connection::RTCPeerConnection;

/// Логирование с временными метками. `RUST_LOG` важнее переданного уровня.
pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("pairchat_lib={level},pairchat={level},warn")));
    // повторная инициализация (например, в тестах) не ошибка
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Печать ICE-candidate при появлении (Trickle-ICE)
pub fn dump_candidate(label: &str, cand: &IceCandidate) {
    debug!(
        "Trickle {label}: candidate={} sdp_mid={:?} sdp_mline_index={:?}",
        cand.candidate, cand.sdp_mid, cand.sdp_mline_index
    );
}

/// Быстрый снимок getStats → выбранная пара
pub async fn dump_selected_pair(pc: &RTCPeerConnection, moment: &str) {
    let stats = pc.get_stats().await;
    for (_, v) in stats.reports {
        if let webrtc::stats::StatsReportType::CandidatePair(pair) = v {
            if pair.nominated {
                info!(
                    "STATS {moment}: {}:{}  type: {:?}  bytes={}/{} state={:?}",
                    pair.local_candidate_id,
                    pair.remote_candidate_id,
                    pair.stats_type,
                    pair.bytes_sent,
                    pair.bytes_received,
                    pair.state
                );
            }
        }
    }
}

/// Уведомления для UI. Состояние целиком лежит в `SessionView`,
/// здесь только разовые события, которые показываются пользователю.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Connected,
    Waiting,
    PeerLeft,
    ConnectionProblem,
    ConnectionRecovering,
    ConnectionFailed,
    RemoteTrack(TrackKind),
    Message(ChatEntry),
    Error(String),
}

/// Рассылает уведомления всем подписчикам
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Notice>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.tx.subscribe()
    }

    fn emit_state(&self, notice: Notice) {
        debug!("emit_state called with event: {:?}", notice);
        // подписчиков может не быть, это нормально
        if self.tx.send(notice).is_err() {
            debug!("No UI subscribers for notice");
        }
    }

    pub fn emit_connected(&self) {
        self.emit_state(Notice::Connected);
    }

    pub fn emit_waiting(&self) {
        self.emit_state(Notice::Waiting);
    }

    pub fn emit_peer_left(&self) {
        self.emit_state(Notice::PeerLeft);
    }

    pub fn emit_connection_problem(&self) {
        debug!("emit_connection_problem called - connection issues detected");
        self.emit_state(Notice::ConnectionProblem);
    }

    pub fn emit_connection_recovering(&self) {
        self.emit_state(Notice::ConnectionRecovering);
    }

    pub fn emit_connection_failed(&self) {
        self.emit_state(Notice::ConnectionFailed);
    }

    pub fn emit_remote_track(&self, kind: TrackKind) {
        self.emit_state(Notice::RemoteTrack(kind));
    }

    pub fn emit_message(&self, entry: ChatEntry) {
        self.emit_state(Notice::Message(entry));
    }

    pub fn emit_error(&self, text: impl Into<String>) {
        self.emit_state(Notice::Error(text.into()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn notices_reach_every_subscriber() {
        let notifier = Notifier::new(8);
        let mut a = notifier.subscribe();
        let mut b = notifier.subscribe();

        notifier.emit_waiting();
        notifier.emit_connected();

        assert_eq!(a.recv().await.unwrap(), Notice::Waiting);
        assert_eq!(a.recv().await.unwrap(), Notice::Connected);
        assert_eq!(b.recv().await.unwrap(), Notice::Waiting);
    }

    #[test]
    fn emitting_without_subscribers_is_fine() {
        Notifier::new(1).emit_error("nobody listens");
    }
}
