//! Integration tests for the `probe` and `remux` commands over files on disk.

use std::path::Path;

use bytes::Bytes;
use reframe::probe::probe_file;
use reframe::remux::remux_file;
use reframe_media::{demux, FileSource, Mp4Muxer, MuxSample, MuxTrack, TrackKind};
use reframe_pipeline::TranscodeOptions;

const AVCC: [u8; 18] = [
    0x01, 0x64, 0x00, 0x1F, 0xFF, 0xE1, 0x00, 0x04, 0x67, 0x64, 0x00, 0x1F, 0x01, 0x00, 0x03,
    0x68, 0xEE, 0x3C,
];

const AV1C: [u8; 4] = [0x81, 0x08, 0x0C, 0x00];

const ESDS: [u8; 27] = [
    0x03, 0x19, 0x00, 0x01, 0x00, 0x04, 0x11, 0x40, 0x15, 0x00, 0x00, 0x00, 0x00, 0x01, 0xF4,
    0x00, 0x00, 0x01, 0xF4, 0x00, 0x05, 0x02, 0x12, 0x10, 0x06, 0x01, 0x02,
];

/// 2 seconds of 25 fps video, keyframe every 25 frames, plus AAC audio.
fn write_source(path: &Path, codec: &str, description: &'static [u8]) {
    let video = MuxTrack::video(codec, 12800, 640, 360)
        .unwrap()
        .with_description(Bytes::from_static(description));
    let audio = MuxTrack::audio("mp4a.40.2", 44100, 2, 44100)
        .unwrap()
        .with_description(Bytes::from_static(&ESDS));
    let mut muxer = Mp4Muxer::new(vec![video, audio]);
    for i in 0..50u32 {
        muxer
            .push_video_sample(
                0,
                MuxSample {
                    data: Bytes::from(vec![(i % 251) as u8; 200 + (i as usize % 7) * 10]),
                    duration: 512,
                    is_key_frame: i % 25 == 0,
                },
            )
            .unwrap();
    }
    for _ in 0..86u32 {
        muxer
            .push_audio_sample(
                0,
                MuxSample {
                    data: Bytes::from_static(&[0x21; 24]),
                    duration: 1024,
                    is_key_frame: true,
                },
            )
            .unwrap();
    }
    std::fs::write(path, muxer.finish().unwrap()).unwrap();
}

#[tokio::test]
async fn probe_reports_tracks() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("in.mp4");
    write_source(&path, "avc1.64001f", &AVCC);

    let report = probe_file(&path).await.unwrap();
    assert_eq!(report.major_brand.as_deref(), Some("isom"));
    assert_eq!(report.tracks.len(), 2);

    let video = &report.tracks[0];
    assert_eq!(video.kind, TrackKind::Video);
    assert_eq!(video.codec.as_deref(), Some("avc1.64001f"));
    assert_eq!((video.width, video.height), (Some(640), Some(360)));
    assert_eq!(video.sample_count, 50);
    assert_eq!(video.sync_sample_count, Some(2));
    assert_eq!(video.chunk_count, 2);

    let audio = &report.tracks[1];
    assert_eq!(audio.kind, TrackKind::Audio);
    assert_eq!(audio.codec.as_deref(), Some("mp4a.40.2"));
    assert_eq!(audio.channel_count, Some(2));
    assert_eq!(audio.sample_count, 86);
    assert_eq!(audio.sync_sample_count, None);

    let text = report.to_string();
    assert!(text.contains("video avc1.64001f 640x360"), "{text}");
    assert!(text.contains("audio mp4a.40.2 2ch 44100 Hz"), "{text}");

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["tracks"][0]["kind"], "video");
    assert_eq!(json["tracks"][1]["sample_rate"], 44100);
}

#[tokio::test]
async fn probe_rejects_non_mp4() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.txt");
    std::fs::write(&path, b"not an mp4 at all").unwrap();
    assert!(probe_file(&path).await.is_err());
}

#[tokio::test]
async fn remux_round_trips_avc() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.mp4");
    let output = dir.path().join("out.mp4");
    write_source(&input, "avc1.64001f", &AVCC);

    let summary = remux_file(&input, &output, TranscodeOptions::default(), None)
        .await
        .unwrap();
    assert_eq!(summary.frames, 50);
    assert_eq!(summary.bytes_written, std::fs::metadata(&output).unwrap().len());

    let before = demux(&FileSource::open(&input).await.unwrap()).await.unwrap();
    let after = demux(&FileSource::open(&output).await.unwrap()).await.unwrap();
    let (src, dst) = (before.video_track().unwrap(), after.video_track().unwrap());
    assert_eq!(dst.codec, src.codec);
    assert_eq!(dst.description, src.description);
    assert_eq!(dst.sample_sizes, src.sample_sizes);
    assert_eq!(dst.time_to_samples, src.time_to_samples);
    assert_eq!(dst.sync_samples, src.sync_samples);
    assert_eq!(after.audio_tracks[0].sample_sizes, before.audio_tracks[0].sample_sizes);
    assert!((after.duration_secs() - 2.0).abs() < 1e-9);
}

#[tokio::test]
async fn remux_keeps_av1_source_codec() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.mp4");
    let output = dir.path().join("out.mp4");
    write_source(&input, "av01.0.08M.08", &AV1C);

    remux_file(&input, &output, TranscodeOptions::default(), None)
        .await
        .unwrap();

    let report = probe_file(&output).await.unwrap();
    assert_eq!(report.tracks[0].codec.as_deref(), Some("av01.0.08M.08"));
    assert_eq!(report.tracks[0].sample_count, 50);
}

#[tokio::test]
async fn remux_rejects_unsupported_codec() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.mp4");
    let output = dir.path().join("out.mp4");
    write_source(&input, "avc1.64001f", &AVCC);

    let err = remux_file(
        &input,
        &output,
        TranscodeOptions::default(),
        Some("hvc1.1.6.L93.B0".into()),
    )
    .await
    .unwrap_err();
    assert!(format!("{err:#}").contains("CodecUnsupported"), "{err:#}");
    assert!(!output.exists());
}

#[tokio::test]
async fn remux_rejects_codec_family_change() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.mp4");
    let output = dir.path().join("out.mp4");
    write_source(&input, "av01.0.08M.08", &AV1C);

    let err = remux_file(
        &input,
        &output,
        TranscodeOptions::default(),
        Some("avc1.640028".into()),
    )
    .await
    .unwrap_err();
    let message = format!("{err:#}");
    assert!(message.contains("CodecUnsupported"), "{message}");
    assert!(message.contains("av01.0.08M.08"), "{message}");
    assert!(!output.exists());
}
