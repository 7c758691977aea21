//! Local media acquisition and track control
//!
//! Toggling a track flips its `enabled` flag in place; the track stays
//! attached to every peer connection, so remote peers see a muted or
//! frozen frame instead of a renegotiation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::models::generate_id;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }
}

/// Handle to a single media track. Clones share the underlying track, so
/// a flag flipped here is observed by every connection the track is
/// attached to.
#[derive(Debug, Clone)]
pub struct MediaTrack {
    id: Arc<str>,
    kind: TrackKind,
    enabled: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
}

impl MediaTrack {
    pub fn new(kind: TrackKind, enabled: bool) -> Self {
        Self {
            id: generate_id().into(),
            kind,
            enabled: Arc::new(AtomicBool::new(enabled)),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Stop capture permanently. Idempotent.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// A bundle of media tracks, local or remote. The track set is fixed at
/// acquisition; mute state changes via the per-track `enabled` flags.
#[derive(Debug, Clone)]
pub struct MediaStream {
    id: Arc<str>,
    tracks: Arc<Vec<MediaTrack>>,
}

impl MediaStream {
    pub fn new(tracks: Vec<MediaTrack>) -> Self {
        Self {
            id: generate_id().into(),
            tracks: Arc::new(tracks),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn track(&self, kind: TrackKind) -> Option<&MediaTrack> {
        self.tracks.iter().find(|t| t.kind() == kind)
    }

    pub fn stop_all(&self) {
        for track in self.tracks.iter() {
            track.stop();
        }
    }
}

/// Device capture seam. Real deployments implement this over the
/// platform's capture stack; [`SyntheticMediaSource`] serves tests and
/// in-process use.
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Acquire the local camera/microphone stream.
    ///
    /// Fails with [`Error::MediaAccessDenied`] when the device or its
    /// permission is unavailable.
    async fn acquire(&self, video: bool, audio: bool) -> Result<MediaStream>;
}

/// Capture source producing silent/black synthetic tracks.
#[derive(Default)]
pub struct SyntheticMediaSource {
    deny_access: bool,
}

impl SyntheticMediaSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// A source that refuses every acquisition, for permission-denied
    /// paths.
    pub fn denied() -> Self {
        Self { deny_access: true }
    }
}

#[async_trait]
impl MediaSource for SyntheticMediaSource {
    async fn acquire(&self, video: bool, audio: bool) -> Result<MediaStream> {
        if self.deny_access {
            return Err(Error::MediaAccessDenied(
                "device permission refused".to_string(),
            ));
        }
        if !video && !audio {
            return Err(Error::InvalidInput(
                "at least one of video/audio must be requested".to_string(),
            ));
        }

        let mut tracks = Vec::new();
        if video {
            tracks.push(MediaTrack::new(TrackKind::Video, true));
        }
        if audio {
            tracks.push(MediaTrack::new(TrackKind::Audio, true));
        }
        Ok(MediaStream::new(tracks))
    }
}

/// Owns the acquired local stream for the lifetime of a call.
pub struct LocalMediaController {
    stream: MediaStream,
    released: AtomicBool,
}

impl LocalMediaController {
    pub async fn acquire(source: &dyn MediaSource, video: bool, audio: bool) -> Result<Self> {
        let stream = source.acquire(video, audio).await?;
        Ok(Self {
            stream,
            released: AtomicBool::new(false),
        })
    }

    pub fn stream(&self) -> &MediaStream {
        &self.stream
    }

    /// Flip the video track's enabled flag. Returns the new state, or
    /// `false` when no video track was acquired. Never detaches the
    /// track or triggers renegotiation.
    pub fn toggle_video(&self) -> bool {
        self.toggle(TrackKind::Video)
    }

    /// Flip the audio track's enabled flag. Returns the new state.
    pub fn toggle_audio(&self) -> bool {
        self.toggle(TrackKind::Audio)
    }

    fn toggle(&self, kind: TrackKind) -> bool {
        match self.stream.track(kind) {
            Some(track) => {
                let next = !track.is_enabled();
                track.set_enabled(next);
                next
            }
            None => false,
        }
    }

    pub fn video_enabled(&self) -> bool {
        self.stream
            .track(TrackKind::Video)
            .is_some_and(MediaTrack::is_enabled)
    }

    pub fn audio_enabled(&self) -> bool {
        self.stream
            .track(TrackKind::Audio)
            .is_some_and(MediaTrack::is_enabled)
    }

    /// Stop every owned track. Idempotent; the second call is a no-op.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stream.stop_all();
    }
}
