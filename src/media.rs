//! Локальный источник аудио/видео. Захват устройств живёт снаружи,
//! здесь только то, что нужно переговорам: треки и флаги включения.

use crate::error::{Result, SessionError};
use crate::peer::types::TrackKind;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

/// Один локальный трек
#[derive(Clone)]
pub struct LocalTrack {
    pub kind: TrackKind,
    pub track: Arc<dyn TrackLocal + Send + Sync>,
}

impl std::fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTrack")
            .field("kind", &self.kind)
            .field("id", &self.track.id())
            .finish()
    }
}

/// Изменяемый локальный источник. Один на всё время жизни координатора,
/// между собеседниками треки только отсоединяются и присоединяются заново.
pub trait MediaSource: Send + Sync {
    fn tracks(&self) -> Vec<LocalTrack>;

    fn is_enabled(&self, kind: TrackKind) -> bool;

    /// Возвращает новое значение флага или `None`, если трека такого типа нет
    fn toggle(&self, kind: TrackKind) -> Option<bool>;

    /// Останавливает устройства; только при полном disconnect
    fn stop(&self);
}

/// Захват устройств
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn acquire(&self) -> Result<Arc<dyn MediaSource>>;
}

/// Источник с одним Opus и одним VP8 треком, в которые никто не пишет сэмплы.
/// Нужен для клиента без камеры и микрофона (только текст).
pub struct SilentMedia {
    audio: LocalTrack,
    video: LocalTrack,
    audio_enabled: AtomicBool,
    video_enabled: AtomicBool,
    stopped: AtomicBool,
}

impl SilentMedia {
    pub fn new() -> Self {
        let audio = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                ..Default::default()
            },
            "audio".to_owned(),
            "pairchat-local".to_owned(),
        ));
        let video = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                ..Default::default()
            },
            "video".to_owned(),
            "pairchat-local".to_owned(),
        ));
        Self {
            audio: LocalTrack {
                kind: TrackKind::Audio,
                track: audio,
            },
            video: LocalTrack {
                kind: TrackKind::Video,
                track: video,
            },
            audio_enabled: AtomicBool::new(true),
            video_enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn flag(&self, kind: TrackKind) -> &AtomicBool {
        match kind {
            TrackKind::Audio => &self.audio_enabled,
            TrackKind::Video => &self.video_enabled,
        }
    }
}

impl Default for SilentMedia {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaSource for SilentMedia {
    fn tracks(&self) -> Vec<LocalTrack> {
        if self.is_stopped() {
            return Vec::new();
        }
        vec![self.audio.clone(), self.video.clone()]
    }

    fn is_enabled(&self, kind: TrackKind) -> bool {
        self.flag(kind).load(Ordering::SeqCst)
    }

    fn toggle(&self, kind: TrackKind) -> Option<bool> {
        if self.is_stopped() {
            return None;
        }
        // fetch_xor возвращает старое значение
        Some(!self.flag(kind).fetch_xor(true, Ordering::SeqCst))
    }

    fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            info!("Local media stopped");
        }
    }
}

/// Устройства, которые всегда отдают `SilentMedia`
pub struct SilentDevices;

#[async_trait]
impl MediaDevices for SilentDevices {
    async fn acquire(&self) -> Result<Arc<dyn MediaSource>> {
        Ok(Arc::new(SilentMedia::new()))
    }
}

/// Устройства, которых нет
pub struct NoDevices;

#[async_trait]
impl MediaDevices for NoDevices {
    async fn acquire(&self) -> Result<Arc<dyn MediaSource>> {
        Err(SessionError::MediaUnavailable(
            "no capture devices available".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggle_flips_flags_independently() {
        let media = SilentMedia::new();
        assert_eq!(media.toggle(TrackKind::Audio), Some(false));
        assert!(!media.is_enabled(TrackKind::Audio));
        assert!(media.is_enabled(TrackKind::Video));
        assert_eq!(media.toggle(TrackKind::Audio), Some(true));
    }

    #[test]
    fn stopped_media_has_no_tracks() {
        let media = SilentMedia::new();
        assert_eq!(media.tracks().len(), 2);
        media.stop();
        media.stop();
        assert!(media.tracks().is_empty());
        assert_eq!(media.toggle(TrackKind::Video), None);
    }

    #[tokio::test]
    async fn no_devices_reports_unavailable() {
        let err = NoDevices.acquire().await.err().unwrap();
        assert!(matches!(err, SessionError::MediaUnavailable(_)));
    }
}
