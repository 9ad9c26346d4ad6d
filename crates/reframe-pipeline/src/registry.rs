//! Container format plugins, looked up by name.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use reframe_media::mux::DEFAULT_CHUNK_DURATION;
use reframe_media::{ByteSource, DemuxedMedia, Mp4Muxer, MuxSample, MuxTrack, VideoDescription};

/// Demux and mux support for one container type.
#[async_trait]
pub trait ContainerFormat: Send + Sync {
    fn name(&self) -> &'static str;

    async fn demux(&self, source: &dyn ByteSource) -> reframe_media::Result<DemuxedMedia>;

    /// Create a writer whose tracks mirror `media`: its first video track,
    /// with `video` overriding codec and description when given, plus the
    /// audio tracks the format can carry.
    fn create_muxer(
        &self,
        media: &DemuxedMedia,
        video: Option<VideoDescription>,
        chunk_duration_secs: f64,
    ) -> reframe_media::Result<Box<dyn ContainerMuxer>>;
}

/// Output side of a [`ContainerFormat`].
pub trait ContainerMuxer: Send {
    fn push_video_sample(&mut self, sample: MuxSample) -> reframe_media::Result<()>;

    /// Push a sample of source audio track `track_index`. Samples of tracks
    /// the format could not carry are dropped.
    fn push_audio_sample(
        &mut self,
        track_index: usize,
        sample: MuxSample,
    ) -> reframe_media::Result<()>;

    fn finish(self: Box<Self>) -> reframe_media::Result<Bytes>;
}

/// Progressive MP4.
#[derive(Debug, Clone, Copy, Default)]
pub struct Mp4Format;

#[async_trait]
impl ContainerFormat for Mp4Format {
    fn name(&self) -> &'static str {
        "mp4"
    }

    async fn demux(&self, source: &dyn ByteSource) -> reframe_media::Result<DemuxedMedia> {
        reframe_media::demux(source).await
    }

    fn create_muxer(
        &self,
        media: &DemuxedMedia,
        video: Option<VideoDescription>,
        chunk_duration_secs: f64,
    ) -> reframe_media::Result<Box<dyn ContainerMuxer>> {
        let source_video = media
            .video_track()
            .ok_or(reframe_media::Error::NoVideoTrack)?;
        let mut video_track = MuxTrack::from_track(source_video)?;
        if let Some(description) = video {
            video_track.set_video_description(description)?;
        }

        let mut tracks = vec![video_track];
        let mut audio_map = Vec::with_capacity(media.audio_tracks.len());
        let mut accepted = 0;
        for track in &media.audio_tracks {
            match MuxTrack::from_track(track) {
                Ok(mux_track) => {
                    audio_map.push(Some(accepted));
                    accepted += 1;
                    tracks.push(mux_track);
                }
                Err(e) => {
                    tracing::warn!("dropping audio track {}: {e}", track.id);
                    audio_map.push(None);
                }
            }
        }

        let chunk_duration = if chunk_duration_secs > 0.0 {
            chunk_duration_secs
        } else {
            DEFAULT_CHUNK_DURATION
        };
        Ok(Box::new(Mp4ContainerMuxer {
            muxer: Mp4Muxer::new(tracks).with_chunk_duration(chunk_duration),
            audio_map,
        }))
    }
}

struct Mp4ContainerMuxer {
    muxer: Mp4Muxer,
    /// Source audio track index to muxer audio index.
    audio_map: Vec<Option<usize>>,
}

impl ContainerMuxer for Mp4ContainerMuxer {
    fn push_video_sample(&mut self, sample: MuxSample) -> reframe_media::Result<()> {
        self.muxer.push_video_sample(0, sample)
    }

    fn push_audio_sample(
        &mut self,
        track_index: usize,
        sample: MuxSample,
    ) -> reframe_media::Result<()> {
        match self.audio_map.get(track_index).copied().flatten() {
            Some(index) => self.muxer.push_audio_sample(index, sample),
            None => Ok(()),
        }
    }

    fn finish(self: Box<Self>) -> reframe_media::Result<Bytes> {
        self.muxer.finish()
    }
}

/// Named container formats available to the pipeline.
#[derive(Clone)]
pub struct FormatRegistry {
    formats: HashMap<String, Arc<dyn ContainerFormat>>,
}

impl FormatRegistry {
    pub fn empty() -> Self {
        Self {
            formats: HashMap::new(),
        }
    }

    /// Registry with the built-in `mp4` format.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(Mp4Format));
        registry
    }

    pub fn register(&mut self, format: Arc<dyn ContainerFormat>) {
        self.formats.insert(format.name().to_string(), format);
    }

    /// Look up a format by name, case-insensitively.
    pub fn get(&self, name: &str) -> Option<Arc<dyn ContainerFormat>> {
        self.formats.get(&name.to_ascii_lowercase()).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.formats.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for FormatRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for FormatRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormatRegistry")
            .field("formats", &self.names())
            .finish()
    }
}
