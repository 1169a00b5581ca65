// Session lifecycle over a scripted channel: events, guard, output selection

use audioshrink::engine::{
    AudioFormat, EncodeRequest, EncoderChannel, EncoderSession, EngineError, Event, EventKind,
    ProgressMode, SessionOptions, SessionState, WorkerMessage,
};
use std::sync::{Arc, Mutex};

use crate::common::scripted::*;

type Log = Arc<Mutex<Vec<String>>>;

const ALL_KINDS: [EventKind; 8] = [
    EventKind::Ready,
    EventKind::Stdout,
    EventKind::Stderr,
    EventKind::Progress,
    EventKind::Done,
    EventKind::Success,
    EventKind::Fail,
    EventKind::Abort,
];

fn describe(event: &Event) -> String {
    match event {
        Event::Ready => "ready".to_string(),
        Event::Stdout(line) => format!("stdout:{}", line),
        Event::Stderr(_) => "stderr".to_string(),
        Event::Progress(pct) => format!("progress:{}", pct),
        Event::Done(report) => format!("done:{}", report.code),
        Event::Success(output) => format!("success:{}", output.name),
        Event::Fail(report) => format!("fail:{}", report.code),
        Event::Abort { message } => format!("abort:{}", message),
    }
}

fn record_all(session: &mut EncoderSession) -> Log {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    for kind in ALL_KINDS {
        let log = Arc::clone(&log);
        session.on(kind, move |event, _| {
            log.lock().unwrap().push(describe(event));
        });
    }
    log
}

fn entries(log: &Log, prefix: &str) -> Vec<String> {
    log.lock()
        .unwrap()
        .iter()
        .filter(|e| e.starts_with(prefix))
        .cloned()
        .collect()
}

fn terminal_entries(log: &Log) -> Vec<String> {
    log.lock()
        .unwrap()
        .iter()
        .filter(|e| {
            e.starts_with("success:") || e.starts_with("fail:") || e.starts_with("abort:")
        })
        .cloned()
        .collect()
}

fn mp3_request(kbps: u32) -> EncodeRequest {
    EncodeRequest::new("song.mp3", vec![0u8; 64])
        .unwrap()
        .with_bit_rate(kbps)
        .unwrap()
}

fn successful_script(source_kbps: u32) -> Vec<WorkerMessage> {
    let mut script = encode_log(source_kbps);
    script.push(done(0, &[("song.mp3", "smaller")]));
    script
}

#[test]
fn test_full_encode_emits_progress_then_single_success() {
    let factory = ScriptedFactory::new(successful_script(320));
    let mut session = EncoderSession::new(mp3_request(128), factory.clone()).unwrap();
    let log = record_all(&mut session);

    session.convert().unwrap();
    assert_eq!(session.wait().unwrap(), SessionState::Completed);

    assert_eq!(
        entries(&log, "progress:"),
        vec!["progress:25", "progress:50", "progress:100"]
    );
    assert_eq!(terminal_entries(&log), vec!["success:song.mp3"]);
    assert_eq!(session.duration(), Some(60.0));
    assert_eq!(session.source_bit_rate(), Some(320));

    // The ready message was queued when the channel opened
    assert_eq!(entries(&log, "ready"), vec!["ready"]);

    // Exactly one command, carrying the input file
    let commands = factory.last().commands();
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].files.len(), 1);
    assert_eq!(commands[0].files[0].name, "song.mp3");
    assert_eq!(commands[0].arguments[0], "-i");
}

#[test]
fn test_success_payload_is_resolvable_through_blob_store() {
    let factory = ScriptedFactory::new(successful_script(320));
    let mut session = EncoderSession::new(mp3_request(128), factory).unwrap();

    let url: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&url);
    session.on(EventKind::Success, move |event, _| {
        if let Event::Success(output) = event {
            assert_eq!(output.blob.mime_type, "audio/mp3");
            assert_eq!(&*output.buffer, b"smaller");
            *slot.lock().unwrap() = Some(output.url.clone());
        }
    });

    session.convert().unwrap();
    session.wait().unwrap();

    let url = url.lock().unwrap().clone().expect("success carried a url");
    assert!(url.starts_with("blob:audioshrink/"));

    let blobs = session.blob_store();
    let blob = blobs.resolve(&url).unwrap();
    assert_eq!(&*blob.data, b"smaller");
    assert!(blobs.revoke(&url));
    assert!(blobs.resolve(&url).is_none());
}

#[test]
fn test_bitrate_guard_aborts_and_suppresses_success() {
    // Source already at 96kb/s, target 128kb/s: the done message that follows
    // in the script must never produce a success
    let factory = ScriptedFactory::new(successful_script(96));
    let mut session = EncoderSession::new(mp3_request(128), factory.clone()).unwrap();
    let log = record_all(&mut session);

    session.convert().unwrap();
    assert_eq!(session.wait().unwrap(), SessionState::Aborted);
    session.pump();

    let terminal = terminal_entries(&log);
    assert_eq!(terminal.len(), 1);
    assert!(terminal[0].starts_with("abort:"));
    assert!(terminal[0].contains("(96kb/s)"));
    assert!(factory.last().is_terminated());
}

#[test]
fn test_bitrate_guard_equal_rate_also_aborts() {
    let factory = ScriptedFactory::new(successful_script(128));
    let mut session = EncoderSession::new(mp3_request(128), factory).unwrap();
    let log = record_all(&mut session);

    session.convert().unwrap();
    assert_eq!(session.wait().unwrap(), SessionState::Aborted);
    assert_eq!(terminal_entries(&log).len(), 1);
}

#[test]
fn test_guard_disabled_lets_low_bitrate_through() {
    let factory = ScriptedFactory::new(successful_script(64));
    let options = SessionOptions {
        bitrate_guard: false,
        ..Default::default()
    };
    let mut session = EncoderSession::with_options(mp3_request(128), factory, options).unwrap();
    let log = record_all(&mut session);

    session.convert().unwrap();
    assert_eq!(session.wait().unwrap(), SessionState::Completed);
    assert_eq!(terminal_entries(&log), vec!["success:song.mp3"]);
}

#[test]
fn test_nonzero_exit_fails_once() {
    let mut script = encode_log(320);
    script.push(done(1, &[]));
    let factory = ScriptedFactory::new(script);
    let mut session = EncoderSession::new(mp3_request(128), factory).unwrap();
    let log = record_all(&mut session);

    session.convert().unwrap();
    assert_eq!(session.wait().unwrap(), SessionState::Failed);
    assert_eq!(entries(&log, "done:"), vec!["done:1"]);
    assert_eq!(terminal_entries(&log), vec!["fail:1"]);
}

#[test]
fn test_zero_exit_without_outputs_fails() {
    let mut script = encode_log(320);
    script.push(done(0, &[]));
    let factory = ScriptedFactory::new(script);
    let mut session = EncoderSession::new(mp3_request(128), factory).unwrap();
    let log = record_all(&mut session);

    session.convert().unwrap();
    assert_eq!(session.wait().unwrap(), SessionState::Failed);
    assert_eq!(terminal_entries(&log), vec!["fail:0"]);
}

#[test]
fn test_output_matching_container_is_preferred() {
    let mut script = encode_log(320);
    script.push(done(
        0,
        &[("cover.jpg", "jpeg"), ("track.mp4", "aac"), ("zz.log", "log")],
    ));
    let factory = ScriptedFactory::new(script);
    let req = EncodeRequest::with_explicit_format("track.wav", vec![1u8; 8], AudioFormat::Aac)
        .unwrap()
        .with_bit_rate(128)
        .unwrap();
    let mut session = EncoderSession::new(req, factory).unwrap();
    let log = record_all(&mut session);

    session.convert().unwrap();
    session.wait().unwrap();
    assert_eq!(terminal_entries(&log), vec!["success:track.mp4"]);
}

#[test]
fn test_stdout_is_re_emitted() {
    let mut script = vec![WorkerMessage::Stdout("hello".to_string())];
    script.extend(successful_script(320));
    let factory = ScriptedFactory::new(script);
    let mut session = EncoderSession::new(mp3_request(128), factory).unwrap();
    let log = record_all(&mut session);

    session.convert().unwrap();
    session.wait().unwrap();
    assert_eq!(entries(&log, "stdout:"), vec!["stdout:hello"]);
}

#[test]
fn test_off_all_silences_kind() {
    let factory = ScriptedFactory::new(successful_script(320));
    let mut session = EncoderSession::new(mp3_request(128), factory).unwrap();
    let log = record_all(&mut session);

    let extra = Arc::clone(&log);
    session.on(EventKind::Progress, move |_, _| {
        extra.lock().unwrap().push("progress:extra".to_string());
    });
    session.off(EventKind::Progress, None);

    session.convert().unwrap();
    session.wait().unwrap();
    assert!(entries(&log, "progress:").is_empty());
    assert_eq!(terminal_entries(&log), vec!["success:song.mp3"]);
}

#[test]
fn test_raw_progress_mode_passes_overshoot_through() {
    let script = vec![
        stderr("  Duration: 00:00:10.00, start: 0.000000, bitrate: 320 kb/s"),
        stderr("size=1kB time=00:00:05.00 bitrate=1.0kbits/s"),
        stderr("size=2kB time=00:00:10.50 bitrate=1.0kbits/s"),
        stderr("size=2kB time=00:00:04.00 bitrate=1.0kbits/s"),
        done(0, &[("song.mp3", "x")]),
    ];

    for (mode, expected) in [
        (
            ProgressMode::Raw,
            vec!["progress:50", "progress:105", "progress:40"],
        ),
        (ProgressMode::Monotonic, vec!["progress:50", "progress:100"]),
    ] {
        let factory = ScriptedFactory::new(script.clone());
        let options = SessionOptions {
            progress_mode: mode,
            ..Default::default()
        };
        let mut session =
            EncoderSession::with_options(mp3_request(128), factory, options).unwrap();
        let log = record_all(&mut session);

        session.convert().unwrap();
        session.wait().unwrap();
        assert_eq!(entries(&log, "progress:"), expected, "mode {:?}", mode);
    }
}

#[test]
fn test_malformed_timestamps_skip_progress() {
    let script = vec![
        stderr("  Duration: 00:00:10.00, start: 0.000000, bitrate: 320 kb/s"),
        stderr("size=N/A time=N/A bitrate=N/A speed=N/A"),
        stderr("size=1kB time=00:00:05.00 bitrate=1.0kbits/s"),
        done(0, &[("song.mp3", "x")]),
    ];
    let factory = ScriptedFactory::new(script);
    let mut session = EncoderSession::new(mp3_request(128), factory).unwrap();
    let log = record_all(&mut session);

    session.convert().unwrap();
    session.wait().unwrap();
    assert_eq!(entries(&log, "progress:"), vec!["progress:50"]);
}

#[test]
fn test_second_convert_is_rejected() {
    let factory = ScriptedFactory::new(successful_script(320));
    let mut session = EncoderSession::new(mp3_request(128), factory.clone()).unwrap();

    session.convert().unwrap();
    assert!(matches!(
        session.convert(),
        Err(EngineError::InvalidState { .. })
    ));
    session.wait().unwrap();
    assert!(matches!(
        session.convert(),
        Err(EngineError::InvalidState { .. })
    ));
    assert_eq!(factory.last().commands().len(), 1);
}

#[test]
fn test_unknown_extension_never_opens_a_channel() {
    let result = EncodeRequest::new("voice.flac", vec![0u8; 4]);
    assert!(matches!(result, Err(EngineError::UnknownFormat(ext)) if ext == "flac"));
}
