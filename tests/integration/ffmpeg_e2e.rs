// End-to-end tests that actually run FFmpeg
//
// Skipped when ffmpeg (with libmp3lame) is not installed.

use audioshrink::engine::{
    EncodeRequest, EncoderSession, Event, EventKind, FfmpegChannelFactory, SessionState,
};
use std::fs;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use crate::common::ffmpeg_runner::*;

// Helper to check if FFmpeg is available, skip test if not
macro_rules! require_ffmpeg {
    () => {
        if !is_ffmpeg_available() || !has_encoder("libmp3lame") {
            eprintln!("Skipping test: FFmpeg with libmp3lame not available");
            return;
        }
    };
}

fn run(request: EncodeRequest) -> (SessionState, Vec<Event>) {
    let factory = Arc::new(FfmpegChannelFactory::new("ffmpeg"));
    let mut session = EncoderSession::new(request, factory).unwrap();

    let events = Arc::new(Mutex::new(Vec::new()));
    for kind in [
        EventKind::Progress,
        EventKind::Success,
        EventKind::Fail,
        EventKind::Abort,
    ] {
        let events = Arc::clone(&events);
        session.on(kind, move |event, _| events.lock().unwrap().push(event.clone()));
    }

    session.convert().unwrap();
    let state = session.wait().unwrap();
    let events = events.lock().unwrap().clone();
    (state, events)
}

#[test]
fn e2e_compress_mp3_to_lower_bitrate() {
    require_ffmpeg!();

    let temp_dir = TempDir::new().unwrap();
    let input = temp_dir.path().join("tone.mp3");
    generate_test_tone(&input, 2.0, 192).expect("Failed to generate test tone");
    let original = fs::read(&input).unwrap();

    let request = EncodeRequest::new("tone.mp3", original.clone())
        .unwrap()
        .with_bit_rate(64)
        .unwrap();
    let (state, events) = run(request);

    assert_eq!(state, SessionState::Completed, "events: {:?}", events.last());
    assert!(events.iter().any(|e| matches!(e, Event::Progress(_))));
    match events.last() {
        Some(Event::Success(output)) => {
            assert_eq!(output.name, "tone.mp3");
            assert_eq!(output.blob.mime_type, "audio/mp3");
            assert!(!output.buffer.is_empty());
            assert!(output.buffer.len() < original.len());
        }
        other => panic!("expected success, got {:?}", other),
    }
}

#[test]
fn e2e_bitrate_guard_skips_small_source() {
    require_ffmpeg!();

    let temp_dir = TempDir::new().unwrap();
    let input = temp_dir.path().join("small.mp3");
    generate_test_tone(&input, 2.0, 64).expect("Failed to generate test tone");

    let request = EncodeRequest::new("small.mp3", fs::read(&input).unwrap())
        .unwrap()
        .with_bit_rate(128)
        .unwrap();
    let (state, events) = run(request);

    assert_eq!(state, SessionState::Aborted);
    assert!(!events.iter().any(|e| matches!(e, Event::Success(_))));
    // The container-level bitrate includes tag overhead, so only its shape is checked
    assert!(matches!(
        events.last(),
        Some(Event::Abort { message }) if message.contains("kb/s) is already lower")
    ));
}

#[test]
fn e2e_ogg_output_from_mp3() {
    require_ffmpeg!();
    if !has_encoder("libvorbis") {
        eprintln!("Skipping test: libvorbis not available");
        return;
    }

    let temp_dir = TempDir::new().unwrap();
    let input = temp_dir.path().join("tone.mp3");
    generate_test_tone(&input, 1.0, 192).expect("Failed to generate test tone");

    let request = EncodeRequest::with_explicit_format(
        "tone.mp3",
        fs::read(&input).unwrap(),
        audioshrink::engine::AudioFormat::Ogg,
    )
    .unwrap()
    .with_bit_rate(96)
    .unwrap();
    let (state, events) = run(request);

    assert_eq!(state, SessionState::Completed);
    match events.last() {
        Some(Event::Success(output)) => {
            assert_eq!(output.name, "tone.ogg");
            assert!(output.buffer.starts_with(b"OggS"));
        }
        other => panic!("expected success, got {:?}", other),
    }
}
