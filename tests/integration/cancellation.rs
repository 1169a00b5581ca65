// Abort paths: user cancel, cross-thread cancel, deadlines, channel replacement

use audioshrink::engine::{
    DEFAULT_CANCEL_MESSAGE, EncodeRequest, EncoderChannel, EncoderSession, EngineError, Event,
    EventKind, SessionOptions, SessionState,
};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::common::scripted::*;

fn request() -> EncodeRequest {
    EncodeRequest::new("song.mp3", vec![0u8; 16]).unwrap()
}

fn terminal_log(session: &mut EncoderSession) -> Arc<Mutex<Vec<String>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    for kind in [EventKind::Success, EventKind::Fail, EventKind::Abort] {
        let log = Arc::clone(&log);
        session.on(kind, move |event, _| {
            let entry = match event {
                Event::Success(out) => format!("success:{}", out.name),
                Event::Fail(report) => format!("fail:{}", report.code),
                Event::Abort { message } => format!("abort:{}", message),
                _ => unreachable!(),
            };
            log.lock().unwrap().push(entry);
        });
    }
    log
}

fn long_script() -> Vec<audioshrink::engine::WorkerMessage> {
    let mut script = encode_log(320);
    script.push(done(0, &[("song.mp3", "late")]));
    script
}

#[test]
fn test_cancel_after_completion_emits_nothing() {
    let factory = ScriptedFactory::new(long_script());
    let mut session = EncoderSession::new(request(), factory).unwrap();
    let log = terminal_log(&mut session);

    session.convert().unwrap();
    session.wait().unwrap();
    session.cancel(Some("too late")).cancel(None);

    assert_eq!(session.state(), SessionState::Completed);
    assert_eq!(*log.lock().unwrap(), vec!["success:song.mp3"]);
}

#[test]
fn test_cancel_is_idempotent_and_uses_default_message() {
    let factory =
        ScriptedFactory::with_delivery(long_script(), Delivery::Paced(Duration::from_secs(5)));
    let mut session = EncoderSession::new(request(), factory.clone()).unwrap();
    let log = terminal_log(&mut session);

    session.convert().unwrap();
    session.cancel(None);
    session.cancel(Some("again"));

    assert_eq!(session.state(), SessionState::Aborted);
    assert_eq!(
        *log.lock().unwrap(),
        vec![format!("abort:{}", DEFAULT_CANCEL_MESSAGE)]
    );
    assert!(factory.last().is_terminated());
}

#[test]
fn test_cancel_before_convert_blocks_convert() {
    let factory = ScriptedFactory::new(long_script());
    let mut session = EncoderSession::new(request(), factory.clone()).unwrap();
    let log = terminal_log(&mut session);

    session.cancel(Some("changed my mind"));
    assert!(matches!(
        session.convert(),
        Err(EngineError::InvalidState { .. })
    ));
    assert!(factory.last().commands().is_empty());
    assert_eq!(*log.lock().unwrap(), vec!["abort:changed my mind"]);
}

#[test]
fn test_handle_cancels_from_another_thread() {
    let factory = ScriptedFactory::with_delivery(
        long_script(),
        Delivery::Paced(Duration::from_millis(200)),
    );
    let mut session = EncoderSession::new(request(), factory.clone()).unwrap();
    let log = terminal_log(&mut session);
    let handle = session.handle();

    session.convert().unwrap();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        handle.cancel(Some("stopped from ui"))
    });

    assert_eq!(session.wait().unwrap(), SessionState::Aborted);
    assert!(canceller.join().unwrap());
    assert!(factory.last().is_terminated());

    // Nothing the paced channel might still deliver can add a second outcome
    thread::sleep(Duration::from_millis(300));
    session.pump();
    assert_eq!(*log.lock().unwrap(), vec!["abort:stopped from ui"]);
}

#[test]
fn test_listener_can_cancel_through_handle() {
    let factory = ScriptedFactory::new(long_script());
    let mut session = EncoderSession::new(request(), factory).unwrap();
    let log = terminal_log(&mut session);

    session.on(EventKind::Progress, |event, handle| {
        if let Event::Progress(pct) = event {
            if *pct >= 50 {
                handle.cancel(Some("halfway is enough"));
            }
        }
    });

    session.convert().unwrap();
    assert_eq!(session.wait().unwrap(), SessionState::Aborted);
    session.pump();
    assert_eq!(*log.lock().unwrap(), vec!["abort:halfway is enough"]);
}

#[test]
fn test_deadline_aborts_slow_encode() {
    let factory = ScriptedFactory::with_delivery(
        long_script(),
        Delivery::Paced(Duration::from_millis(500)),
    );
    let options = SessionOptions {
        deadline: Some(Duration::from_millis(100)),
        ..Default::default()
    };
    let mut session = EncoderSession::with_options(request(), factory, options).unwrap();
    let log = terminal_log(&mut session);

    let started = Instant::now();
    session.convert().unwrap();
    assert_eq!(session.wait().unwrap(), SessionState::Aborted);
    assert!(started.elapsed() < Duration::from_secs(2));

    let log = log.lock().unwrap();
    assert_eq!(log.len(), 1);
    assert!(log[0].contains("timed out"), "got {:?}", log[0]);
}

#[test]
fn test_replace_ignores_stale_channel_messages() {
    let factory = ScriptedFactory::new(long_script());
    let mut session = EncoderSession::new(request(), factory.clone()).unwrap();
    let log = terminal_log(&mut session);
    let first = factory.last();

    session.replace().unwrap();
    let second = factory.last();
    assert_eq!(first.terminate_calls(), 1);
    assert_eq!(second.generation(), first.generation() + 1);
    assert_eq!(session.state(), SessionState::Initializing);

    // A straggler from the replaced channel must not finish the session
    first.inject(done(1, &[]));
    session.pump();
    assert_eq!(session.state(), SessionState::Initializing);

    session.convert().unwrap();
    assert_eq!(session.wait().unwrap(), SessionState::Completed);
    assert!(first.commands().is_empty());
    assert_eq!(second.commands().len(), 1);
    assert_eq!(*log.lock().unwrap(), vec!["success:song.mp3"]);
}

#[test]
fn test_replace_refused_once_finished() {
    let factory = ScriptedFactory::new(long_script());
    let mut session = EncoderSession::new(request(), factory.clone()).unwrap();

    session.cancel(None);
    assert!(matches!(
        session.replace(),
        Err(EngineError::InvalidState { .. })
    ));
    assert_eq!(factory.opened().len(), 1);
}
