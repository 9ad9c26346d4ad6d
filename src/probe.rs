//! Track summaries for `reframe probe`.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use reframe_media::mp4::TrackSummary;
use reframe_media::{demux, ByteSource, FileSource, Track, TrackKind};
use serde::Serialize;

/// What a demux pass learned about one file.
#[derive(Debug, Clone, Serialize)]
pub struct MediaReport {
    pub file: PathBuf,
    pub size: u64,
    pub major_brand: Option<String>,
    pub duration_secs: f64,
    pub tracks: Vec<TrackSummary>,
}

/// Demux `path` and summarize its tracks.
pub async fn probe_file(path: &Path) -> Result<MediaReport> {
    let source = FileSource::open(path)
        .await
        .with_context(|| format!("Failed to open {:?}", path))?;
    let media = demux(&source)
        .await
        .with_context(|| format!("Failed to demux {:?}", path))?;

    Ok(MediaReport {
        file: path.to_path_buf(),
        size: source.size(),
        major_brand: media
            .major_brand
            .map(|brand| String::from_utf8_lossy(&brand).into_owned()),
        duration_secs: media.duration_secs(),
        tracks: media
            .video_tracks
            .iter()
            .chain(&media.audio_tracks)
            .map(Track::summary)
            .collect(),
    })
}

impl fmt::Display for MediaReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "File: {}", self.file.display())?;
        writeln!(f, "Size: {} bytes", self.size)?;
        if let Some(ref brand) = self.major_brand {
            writeln!(f, "Brand: {}", brand)?;
        }
        let secs = self.duration_secs as u64;
        writeln!(
            f,
            "Duration: {:02}:{:02}:{:02}",
            secs / 3600,
            (secs / 60) % 60,
            secs % 60
        )?;

        for track in &self.tracks {
            let codec = track.codec.as_deref().unwrap_or("unknown");
            match track.kind {
                TrackKind::Video => writeln!(
                    f,
                    "\n[{}] video {} {}x{}",
                    track.id,
                    codec,
                    track.width.unwrap_or(0),
                    track.height.unwrap_or(0)
                )?,
                TrackKind::Audio => writeln!(
                    f,
                    "\n[{}] audio {} {}ch {} Hz",
                    track.id,
                    codec,
                    track.channel_count.unwrap_or(0),
                    track.sample_rate.unwrap_or(0)
                )?,
            }
            writeln!(
                f,
                "    timescale {}, {:.3}s, {} samples in {} chunks",
                track.timescale, track.duration_secs, track.sample_count, track.chunk_count
            )?;
            match track.sync_sample_count {
                Some(n) => writeln!(f, "    {} keyframes", n)?,
                None => writeln!(f, "    all samples are keyframes")?,
            }
        }
        Ok(())
    }
}
