use crate::error::{Result, SessionError};
use crate::logger::dump_selected_pair;
use crate::media::LocalTrack;
use crate::peer::context::{ContextEvent, ContextFactory, EventSink, NegotiationContext};
use crate::peer::ice::IceConfiguration;
use crate::peer::state::ICE_CANDIDATE_POOL_SIZE;
use crate::peer::types::{CoarseState, IceCandidate, SdpKind, SessionDescription, TrackKind};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::offer_answer_options::RTCOfferOptions;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_remote::TrackRemote;

/// Создаёт peer connection на webrtc-rs
#[derive(Debug, Default)]
pub struct WebRtcContextFactory;

impl WebRtcContextFactory {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ContextFactory for WebRtcContextFactory {
    async fn create(
        &self,
        ice: &IceConfiguration,
        sink: EventSink,
    ) -> Result<Arc<dyn NegotiationContext>> {
        let pc = new_peer(ice, sink).await?;
        Ok(Arc::new(WebRtcContext {
            pc,
            attached: Mutex::new(HashSet::new()),
        }))
    }
}

/// создаём Peer и подписываемся на всё, что нужно переговорам
async fn new_peer(ice: &IceConfiguration, sink: EventSink) -> Result<Arc<RTCPeerConnection>> {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs()?;
    let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;

    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build();

    let pc = Arc::new(api.new_peer_connection(rtc_config(ice)).await?);
    info!(
        "Peer connection created for session #{} with {} ICE servers",
        sink.generation(),
        ice.servers().len()
    );

    // Обработчик для локальных кандидатов
    let cand_sink = sink.clone();
    pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
        match cand {
            Some(c) => match c.to_json() {
                Ok(init) => cand_sink.emit(ContextEvent::LocalCandidate(IceCandidate {
                    candidate: init.candidate,
                    sdp_mid: init.sdp_mid,
                    sdp_mline_index: init.sdp_mline_index,
                })),
                Err(e) => warn!("Cannot serialize local candidate: {e}"),
            },
            // cand == None означает конец сбора
            None => cand_sink.emit(ContextEvent::GatheringComplete),
        }
        Box::pin(async {})
    }));

    let track_sink = sink.clone();
    pc.on_track(Box::new(
        move |track: Arc<TrackRemote>, _receiver: Arc<RTCRtpReceiver>, _tr: Arc<RTCRtpTransceiver>| {
            let kind = match track.kind() {
                RTPCodecType::Audio => Some(TrackKind::Audio),
                RTPCodecType::Video => Some(TrackKind::Video),
                _ => None,
            };
            if let Some(kind) = kind {
                track_sink.emit(ContextEvent::RemoteTrack(kind));
            }
            // отрисовка снаружи, здесь только вычитываем RTP, чтобы не копился буфер
            Box::pin(async move {
                tokio::spawn(async move {
                    while track.read_rtp().await.is_ok() {}
                    debug!("Remote track {} ended", track.id());
                });
            })
        },
    ));

    let ice_sink = sink.clone();
    pc.on_ice_connection_state_change(Box::new(move |st: RTCIceConnectionState| {
        debug!("ICE connection state changed to: {:?}", st);
        if st == RTCIceConnectionState::Failed {
            ice_sink.emit(ContextEvent::IceFailed);
        }
        Box::pin(async {})
    }));

    // делаем копию для обработчика состояний
    let pc_state = Arc::downgrade(&pc);
    pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
        info!("Peer connection state changed to: {:?}", st);
        let coarse = match st {
            RTCPeerConnectionState::Connecting => Some(CoarseState::Connecting),
            RTCPeerConnectionState::Connected => Some(CoarseState::Connected),
            RTCPeerConnectionState::Disconnected => Some(CoarseState::Disconnected),
            RTCPeerConnectionState::Failed => Some(CoarseState::Failed),
            RTCPeerConnectionState::Closed => Some(CoarseState::Closed),
            _ => None,
        };
        if matches!(
            st,
            RTCPeerConnectionState::Disconnected | RTCPeerConnectionState::Failed
        ) {
            if let Some(pc) = pc_state.upgrade() {
                tokio::spawn(async move {
                    dump_selected_pair(&pc, "BEFORE-FAIL").await;
                });
            }
        }
        if let Some(coarse) = coarse {
            sink.emit(ContextEvent::ConnectionState(coarse));
        }
        Box::pin(async {})
    }));

    Ok(pc)
}

/// Создает конфигурацию для peer connection
fn rtc_config(ice: &IceConfiguration) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: ice.rtc_ice_servers(),
        ice_candidate_pool_size: ICE_CANDIDATE_POOL_SIZE,
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

fn to_rtc(desc: SessionDescription) -> webrtc::error::Result<RTCSessionDescription> {
    match desc.kind {
        SdpKind::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpKind::Answer => RTCSessionDescription::answer(desc.sdp),
    }
}

/// Чужое описание не разобралось или не подходит к состоянию peer connection.
/// Это ошибка собеседника, а не нашего соединения.
fn rejected(kind: SdpKind, e: webrtc::Error) -> SessionError {
    SessionError::NegotiationProtocolViolation(format!("remote {kind:?} rejected: {e}"))
}

pub struct WebRtcContext {
    pc: Arc<RTCPeerConnection>,
    // id уже добавленных треков, повторный add_track падает
    attached: Mutex<HashSet<String>>,
}

impl WebRtcContext {
    async fn set_remote(&self, desc: SessionDescription) -> Result<()> {
        let kind = desc.kind;
        let remote = to_rtc(desc).map_err(|e| rejected(kind, e))?;
        self.pc
            .set_remote_description(remote)
            .await
            .map_err(|e| rejected(kind, e))
    }

    /// Ставит описание локальным и отдаёт то, что получилось после установки
    async fn commit_local(&self, desc: RTCSessionDescription, kind: SdpKind) -> Result<SessionDescription> {
        let created = desc.sdp.clone();
        self.pc.set_local_description(desc).await?;
        let sdp = self
            .pc
            .local_description()
            .await
            .map(|d| d.sdp)
            .unwrap_or(created);
        Ok(SessionDescription { kind, sdp })
    }
}

#[async_trait]
impl NegotiationContext for WebRtcContext {
    async fn attach_tracks(&self, tracks: &[LocalTrack]) -> Result<()> {
        let mut attached = self.attached.lock().await;
        for local in tracks {
            let id = local.track.id().to_owned();
            if attached.contains(&id) {
                continue;
            }
            let sender = self.pc.add_track(local.track.clone()).await?;
            attached.insert(id);
            debug!("Added local {:?} track", local.kind);

            // RTCP надо вычитывать, иначе интерцепторы стоят
            tokio::spawn(async move {
                let mut buf = vec![0u8; 1500];
                while sender.read(&mut buf).await.is_ok() {}
            });
        }
        Ok(())
    }

    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription> {
        let options = RTCOfferOptions {
            ice_restart,
            voice_activity_detection: false,
        };
        let offer = self.pc.create_offer(Some(options)).await?;
        self.commit_local(offer, SdpKind::Offer).await
    }

    async fn accept_offer(&self, offer: SessionDescription) -> Result<SessionDescription> {
        self.set_remote(offer).await?;
        let answer = self.pc.create_answer(None).await?;
        self.commit_local(answer, SdpKind::Answer).await
    }

    async fn apply_answer(&self, answer: SessionDescription) -> Result<()> {
        self.set_remote(answer).await
    }

    async fn add_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: None,
            })
            .await?;
        Ok(())
    }

    async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            warn!("Error while closing peer connection: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{MediaSource, SilentMedia};
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn offer_carries_attached_tracks() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let ctx = WebRtcContextFactory::new()
            .create(&IceConfiguration::fallback(), EventSink::new(1, tx))
            .await
            .unwrap();

        let media = SilentMedia::new();
        ctx.attach_tracks(&media.tracks()).await.unwrap();
        // повторно те же треки не добавляются
        ctx.attach_tracks(&media.tracks()).await.unwrap();

        let offer = ctx.create_offer(false).await.unwrap();
        assert_eq!(offer.kind, SdpKind::Offer);
        assert!(offer.sdp.contains("m=audio"));
        assert!(offer.sdp.contains("m=video"));
        ctx.close().await;
    }

    #[tokio::test]
    async fn two_contexts_exchange_descriptions() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let factory = WebRtcContextFactory::new();
        let ice = IceConfiguration::fallback();
        let a = factory.create(&ice, EventSink::new(1, tx.clone())).await.unwrap();
        let b = factory.create(&ice, EventSink::new(2, tx)).await.unwrap();

        let media = SilentMedia::new();
        a.attach_tracks(&media.tracks()).await.unwrap();

        let offer = a.create_offer(false).await.unwrap();
        let answer = b.accept_offer(offer).await.unwrap();
        assert_eq!(answer.kind, SdpKind::Answer);
        a.apply_answer(answer).await.unwrap();

        a.close().await;
        b.close().await;
    }

    #[tokio::test]
    async fn malformed_remote_description_is_a_protocol_violation() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let factory = WebRtcContextFactory::new();
        let ice = IceConfiguration::fallback();
        let a = factory.create(&ice, EventSink::new(1, tx.clone())).await.unwrap();
        let b = factory.create(&ice, EventSink::new(2, tx)).await.unwrap();

        let err = b
            .accept_offer(SessionDescription::offer("garbage"))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::NegotiationProtocolViolation(_)));

        let media = SilentMedia::new();
        a.attach_tracks(&media.tracks()).await.unwrap();
        let offer = a.create_offer(false).await.unwrap();
        let err = a
            .apply_answer(SessionDescription::answer("garbage"))
            .await
            .unwrap_err();
        assert!(err.is_ignorable());

        // после отказа оба контекста продолжают переговоры как обычно
        let answer = b.accept_offer(offer).await.unwrap();
        a.apply_answer(answer).await.unwrap();

        a.close().await;
        b.close().await;
    }
}
