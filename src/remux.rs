//! `reframe remux`: run the full pipeline with passthrough engines.

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use reframe_media::{demux, FileSource};
use reframe_pipeline::{
    EventSender, PassthroughCodecs, TranscodeEvent, TranscodeOptions, Transcoder,
};

/// Outcome of one remux.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemuxSummary {
    pub frames: u32,
    pub bytes_written: u64,
}

/// Remux `input` into `output`.
///
/// With no `codec` the source video codec is kept, so the passthrough
/// engines accept any avc1/av01 source as-is. A `codec` from another family
/// than the source is rejected, since the bitstream is never re-encoded.
pub async fn remux_file(
    input: &Path,
    output: &Path,
    mut options: TranscodeOptions,
    codec: Option<String>,
) -> Result<RemuxSummary> {
    let source = FileSource::open(input)
        .await
        .with_context(|| format!("Failed to open {:?}", input))?;

    options.output.codec = match codec {
        Some(codec) => codec,
        None => {
            let media = demux(&source)
                .await
                .with_context(|| format!("Failed to demux {:?}", input))?;
            media
                .video_track()
                .and_then(|track| track.codec.clone())
                .with_context(|| format!("No video codec found in {:?}", input))?
        }
    };
    tracing::info!("Remuxing {:?} as {}", input, options.output.codec);

    let frames = Arc::new(AtomicU32::new(0));
    let events = {
        let frames = Arc::clone(&frames);
        EventSender::new(move |event| match event {
            TranscodeEvent::StateChanged(state) => tracing::debug!("State: {}", state),
            TranscodeEvent::EncodeProgress { encoded, total } => {
                frames.store(encoded, Ordering::Relaxed);
                if encoded == total || encoded % 250 == 0 {
                    tracing::info!("Encoded {}/{} frames", encoded, total);
                }
            }
            _ => {}
        })
    };

    let mut transcoder =
        Transcoder::new(options, Arc::new(PassthroughCodecs::new())).with_events(events);

    let token = transcoder.cancellation_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling");
            token.cancel();
        }
    });
    let result = transcoder.run(&source).await;
    interrupt.abort();

    let bytes = result.with_context(|| format!("Failed to remux {:?}", input))?;
    tokio::fs::write(output, &bytes)
        .await
        .with_context(|| format!("Failed to write {:?}", output))?;

    Ok(RemuxSummary {
        frames: frames.load(Ordering::Relaxed),
        bytes_written: bytes.len() as u64,
    })
}
