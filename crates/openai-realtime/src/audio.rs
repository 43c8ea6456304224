//! Outbound audio. The peer connection only ever sees a local Opus track;
//! where its samples come from is the [`AudioSource`]'s business.

use async_trait::async_trait;
use bytes::Bytes;
use std::{
    io::Cursor,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tutor_core::SessionError;
use webrtc::{
    api::media_engine::MIME_TYPE_OPUS,
    media::{Sample, io::ogg_reader::OggReader},
    rtp_transceiver::rtp_codec::RTCRtpCodecCapability,
    track::track_local::track_local_static_sample::TrackLocalStaticSample,
};

const OPUS_CLOCK_RATE: u32 = 48_000;
const OPUS_FRAME: Duration = Duration::from_millis(20);

/// Grants microphone-like audio for one session.
#[async_trait]
pub trait AudioSource: Send + Sync {
    /// Fails with `SessionError::Permission` when audio is unavailable.
    async fn acquire(&self) -> Result<MicrophoneTrack, SessionError>;

    /// Tracks acquired from this source and not yet stopped.
    fn active_tracks(&self) -> usize;
}

/// Builds the Opus track every source feeds.
pub fn opus_track() -> Arc<TrackLocalStaticSample> {
    Arc::new(TrackLocalStaticSample::new(
        RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_owned(),
            clock_rate: OPUS_CLOCK_RATE,
            channels: 2,
            ..Default::default()
        },
        "audio".to_owned(),
        "tutor-mic".to_owned(),
    ))
}

/// A live outbound track. Stopping is idempotent and also happens on drop.
pub struct MicrophoneTrack {
    track: Arc<TrackLocalStaticSample>,
    pump: Option<JoinHandle<()>>,
    active: Option<Arc<AtomicUsize>>,
}

impl MicrophoneTrack {
    /// Registers the track as active on `gauge` until stopped.
    pub fn new(
        track: Arc<TrackLocalStaticSample>,
        pump: Option<JoinHandle<()>>,
        gauge: Arc<AtomicUsize>,
    ) -> Self {
        gauge.fetch_add(1, Ordering::SeqCst);
        Self {
            track,
            pump,
            active: Some(gauge),
        }
    }

    pub fn local_track(&self) -> Arc<TrackLocalStaticSample> {
        self.track.clone()
    }

    pub fn is_live(&self) -> bool {
        self.active.is_some()
    }

    pub fn stop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        if let Some(gauge) = self.active.take() {
            gauge.fetch_sub(1, Ordering::SeqCst);
            debug!("Microphone track stopped");
        }
    }
}

impl Drop for MicrophoneTrack {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Streams a pre-recorded Ogg/Opus file at real-time pace.
pub struct OggOpusFileSource {
    path: PathBuf,
    active: Arc<AtomicUsize>,
}

impl OggOpusFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl AudioSource for OggOpusFileSource {
    async fn acquire(&self) -> Result<MicrophoneTrack, SessionError> {
        let data = tokio::fs::read(&self.path).await.map_err(|e| {
            SessionError::Permission(format!("cannot open {}: {}", self.path.display(), e))
        })?;
        let (reader, header) = OggReader::new(Cursor::new(data), true).map_err(|e| {
            SessionError::Permission(format!("{} is not Ogg/Opus: {}", self.path.display(), e))
        })?;
        info!(
            path = %self.path.display(),
            channels = header.channels,
            sample_rate = header.sample_rate,
            "Audio input acquired"
        );

        let track = opus_track();
        let pump = tokio::spawn(pump_pages(reader, track.clone()));
        Ok(MicrophoneTrack::new(track, Some(pump), self.active.clone()))
    }

    fn active_tracks(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

async fn pump_pages(mut reader: OggReader<Cursor<Vec<u8>>>, track: Arc<TrackLocalStaticSample>) {
    let mut ticker = tokio::time::interval(OPUS_FRAME);
    let mut last_granule: u64 = 0;
    loop {
        let (page, header) = match reader.parse_next_page() {
            Ok(next) => next,
            Err(e) => {
                debug!(error = %e, "Audio input exhausted");
                return;
            }
        };
        let samples = header.granule_position.saturating_sub(last_granule);
        last_granule = header.granule_position;
        let duration = if samples == 0 {
            OPUS_FRAME
        } else {
            Duration::from_millis(samples * 1000 / u64::from(OPUS_CLOCK_RATE))
        };

        ticker.tick().await;
        let sample = Sample {
            data: Bytes::from(page.to_vec()),
            duration,
            ..Default::default()
        };
        if let Err(e) = track.write_sample(&sample).await {
            warn!(error = %e, "Writing audio sample failed");
            return;
        }
    }
}

/// Produces a track that never carries audio. Useful for text-only runs.
#[derive(Default)]
pub struct SilentSource {
    active: Arc<AtomicUsize>,
}

impl SilentSource {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AudioSource for SilentSource {
    async fn acquire(&self) -> Result<MicrophoneTrack, SessionError> {
        Ok(MicrophoneTrack::new(opus_track(), None, self.active.clone()))
    }

    fn active_tracks(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}
