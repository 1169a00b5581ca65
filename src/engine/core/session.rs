// Encoder session: drives one encode through a worker channel and turns its
// log stream into lifecycle events

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::args::build_arguments;
use super::blob::BlobStore;
use super::error::EngineError;
use super::events::{Event, EventBus, EventKind, ListenerId};
use super::log_parser::LogParser;
use super::state::{ProgressMode, ProgressTracker, SessionState};
use super::types::{
    AudioFormat, Blob, DoneReport, EncodeRequest, EncodedOutput, InputFile, WorkerCommand,
    WorkerMessage,
};
use crate::engine::worker::{ChannelFactory, EncoderChannel, Inbound, Outbox};

pub const DEFAULT_CANCEL_MESSAGE: &str = "cancelled by the user";

/// Tunables for a session
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub progress_mode: ProgressMode,
    /// Abort when the source bitrate is already at or below the target
    pub bitrate_guard: bool,
    /// Cancel the encode if it has not finished this long after `convert()`
    pub deadline: Option<Duration>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            progress_mode: ProgressMode::default(),
            bitrate_guard: true,
            deadline: None,
        }
    }
}

#[derive(Default)]
struct ChannelSlot {
    generation: u64,
    channel: Option<Arc<dyn EncoderChannel>>,
}

/// Shared control surface of a session
///
/// Listeners receive one with every event; callers can clone it and cancel
/// from another thread while the session is being pumped.
#[derive(Clone)]
pub struct SessionHandle {
    id: Uuid,
    terminal: Arc<AtomicBool>,
    slot: Arc<Mutex<ChannelSlot>>,
    tx: Sender<Inbound>,
}

impl SessionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Whether a terminal event has been claimed
    pub fn is_finished(&self) -> bool {
        self.terminal.load(Ordering::SeqCst)
    }

    /// Hard-stop the encoder and queue an abort
    ///
    /// The abort event is delivered by the thread pumping the session.
    /// Returns false when the session had already finished, in which case
    /// nothing is emitted.
    pub fn cancel(&self, message: Option<&str>) -> bool {
        let claimed = self.claim_terminal();
        self.terminate_channel();
        if claimed {
            let message = message.unwrap_or(DEFAULT_CANCEL_MESSAGE).to_string();
            let _ = self.tx.send(Inbound::Cancelled { message });
        }
        claimed
    }

    fn claim_terminal(&self) -> bool {
        self.terminal
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn lock_slot(&self) -> std::sync::MutexGuard<'_, ChannelSlot> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn terminate_channel(&self) {
        if let Some(channel) = &self.lock_slot().channel {
            channel.terminate();
        }
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// One encode of one input file
///
/// The session owns at most one live worker channel. Inbound messages are
/// dispatched on the caller's thread by [`pump`](Self::pump) or
/// [`wait`](Self::wait), one at a time and in arrival order.
pub struct EncoderSession {
    request: EncodeRequest,
    options: SessionOptions,
    factory: Arc<dyn ChannelFactory>,
    state: SessionState,
    parser: LogParser,
    progress: ProgressTracker,
    bus: EventBus<Event, SessionHandle>,
    handle: SessionHandle,
    inbox: Receiver<Inbound>,
    blobs: Arc<BlobStore>,
    started_at: Option<Instant>,
}

impl EncoderSession {
    /// Create a session and open its worker channel
    pub fn new(
        request: EncodeRequest,
        factory: Arc<dyn ChannelFactory>,
    ) -> Result<Self, EngineError> {
        Self::with_options(request, factory, SessionOptions::default())
    }

    pub fn with_options(
        request: EncodeRequest,
        factory: Arc<dyn ChannelFactory>,
        options: SessionOptions,
    ) -> Result<Self, EngineError> {
        let (tx, inbox) = mpsc::channel();
        let handle = SessionHandle {
            id: Uuid::new_v4(),
            terminal: Arc::new(AtomicBool::new(false)),
            slot: Arc::new(Mutex::new(ChannelSlot::default())),
            tx,
        };

        let mut session = Self {
            request,
            progress: ProgressTracker::new(options.progress_mode),
            options,
            factory,
            state: SessionState::Idle,
            parser: LogParser::new(),
            bus: EventBus::new(),
            handle,
            inbox,
            blobs: BlobStore::new(),
            started_at: None,
        };
        session.replace()?;
        Ok(session)
    }

    pub fn id(&self) -> Uuid {
        self.handle.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn request(&self) -> &EncodeRequest {
        &self.request
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    pub fn blob_store(&self) -> Arc<BlobStore> {
        self.blobs.clone()
    }

    /// Input duration, once the encoder has reported it
    pub fn duration(&self) -> Option<f64> {
        self.parser.duration_s
    }

    pub fn source_bit_rate(&self) -> Option<u32> {
        self.parser.source_bit_rate
    }

    /// Generation of the current channel; bumps on every `replace()`
    pub fn generation(&self) -> u64 {
        self.handle.lock_slot().generation
    }

    pub fn on<F>(&mut self, kind: EventKind, listener: F) -> ListenerId
    where
        F: FnMut(&Event, &SessionHandle) + Send + 'static,
    {
        self.bus.on(kind, listener)
    }

    pub fn off(&mut self, kind: EventKind, id: Option<ListenerId>) -> &mut Self {
        self.bus.off(kind, id);
        self
    }

    /// Publish an event to this session's listeners
    pub fn trigger(&mut self, event: Event) -> &mut Self {
        self.bus.trigger(&event, &self.handle);
        self
    }

    /// Open a fresh worker channel
    ///
    /// Any previous channel is terminated before the new one is opened, and
    /// messages it still had in flight are ignored from then on.
    pub fn replace(&mut self) -> Result<&mut Self, EngineError> {
        if !self.state.can_replace() || self.handle.is_finished() {
            return Err(EngineError::InvalidState {
                op: "replace the channel",
                state: self.state,
            });
        }

        {
            let mut slot = self.handle.lock_slot();
            if let Some(old) = slot.channel.take() {
                old.terminate();
                debug!(session = %self.handle.id, generation = slot.generation, "previous channel terminated");
            }
            slot.generation += 1;

            let outbox = Outbox::new(slot.generation, self.handle.tx.clone());
            match self.factory.open(outbox) {
                Ok(channel) => slot.channel = Some(channel),
                Err(e) => {
                    self.state = SessionState::Idle;
                    return Err(e);
                }
            }
        }

        self.parser = LogParser::new();
        self.progress = ProgressTracker::new(self.options.progress_mode);
        self.started_at = None;
        self.state = SessionState::Initializing;
        Ok(self)
    }

    /// Send the encode command; returns without waiting for the encoder
    pub fn convert(&mut self) -> Result<(), EngineError> {
        if self.state == SessionState::Idle {
            self.replace()?;
        }
        if !self.state.can_convert() || self.handle.is_finished() {
            return Err(EngineError::InvalidState {
                op: "convert",
                state: self.state,
            });
        }

        let channel = self
            .current_channel()
            .ok_or(EngineError::ChannelUnavailable)?;

        let req = &self.request;
        let command = WorkerCommand {
            arguments: build_arguments(&req.file_name, req.bit_rate, req.format),
            files: vec![InputFile {
                name: req.file_name.clone(),
                buffer: req.file_buffer.clone(),
            }],
        };

        info!(
            session = %self.handle.id,
            file = %req.file_name,
            format = %req.format,
            kbps = req.bit_rate,
            "starting encode"
        );

        self.state = SessionState::Running;
        self.started_at = Some(Instant::now());

        if let Err(e) = channel.post(command) {
            if channel.is_terminated() && self.handle.is_finished() {
                // A handle cancelled while the command was being posted
                debug!(session = %self.handle.id, "cancelled before the encoder started");
                return Ok(());
            }
            warn!(session = %self.handle.id, "Failed to post encode command: {}", e);
            if self.handle.claim_terminal() {
                self.enter_terminal(SessionState::Failed);
                self.emit(Event::Fail(DoneReport {
                    code: -1,
                    output_files: BTreeMap::new(),
                }));
            }
            return Err(e);
        }

        Ok(())
    }

    /// Hard-stop the encoder and emit `Abort`
    ///
    /// Safe to call in any state and any number of times; only the call that
    /// ends the session emits anything.
    pub fn cancel(&mut self, message: Option<&str>) -> &mut Self {
        let claimed = self.handle.claim_terminal();
        self.handle.terminate_channel();

        if claimed {
            let message = message.unwrap_or(DEFAULT_CANCEL_MESSAGE).to_string();
            info!(session = %self.handle.id, reason = %message, "encode aborted");
            self.enter_terminal(SessionState::Aborted);
            self.emit(Event::Abort { message });
        } else {
            debug!(session = %self.handle.id, "cancel ignored; session already finished");
        }
        self
    }

    /// Dispatch every queued message without blocking; returns how many
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        loop {
            match self.inbox.try_recv() {
                Ok(inbound) => {
                    self.handle_inbound(inbound);
                    handled += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        self.check_deadline();
        handled
    }

    /// Dispatch messages until the session reaches a terminal state
    pub fn wait(&mut self) -> Result<SessionState, EngineError> {
        let waitable = self.state == SessionState::Running
            || self.state.is_terminal()
            || self.handle.is_finished();
        if !waitable {
            return Err(EngineError::InvalidState {
                op: "wait",
                state: self.state,
            });
        }

        while !self.state.is_terminal() {
            let inbound = match self.time_left() {
                Some(left) => match self.inbox.recv_timeout(left) {
                    Ok(inbound) => Some(inbound),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => {
                        return Err(EngineError::ChannelUnavailable);
                    }
                },
                None => Some(
                    self.inbox
                        .recv()
                        .map_err(|_| EngineError::ChannelUnavailable)?,
                ),
            };

            match inbound {
                Some(inbound) => self.handle_inbound(inbound),
                None => self.check_deadline(),
            }
        }

        Ok(self.state)
    }

    /// Dispatch one inbound worker message as if it came from the current channel
    pub fn dispatch(&mut self, message: WorkerMessage) {
        let generation = self.generation();
        self.handle_inbound(Inbound::Worker {
            generation,
            message,
        });
    }

    fn handle_inbound(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::Cancelled { message } => {
                if !self.state.is_terminal() {
                    info!(session = %self.handle.id, reason = %message, "encode aborted");
                    self.enter_terminal(SessionState::Aborted);
                    self.emit(Event::Abort { message });
                }
            }
            Inbound::Worker {
                generation,
                message,
            } => {
                if generation != self.generation() {
                    debug!(session = %self.handle.id, generation, "dropping message from replaced channel");
                } else if self.handle.is_finished() {
                    debug!(session = %self.handle.id, "dropping message after session finished");
                } else {
                    self.on_worker_message(message);
                }
            }
        }
    }

    fn on_worker_message(&mut self, message: WorkerMessage) {
        match message {
            WorkerMessage::Ready => {
                self.emit(Event::Ready);
            }
            WorkerMessage::Stdout(line) => {
                self.emit(Event::Stdout(line));
            }
            WorkerMessage::Stderr(line) => {
                self.emit(Event::Stderr(line.clone()));
                if !self.handle.is_finished() {
                    self.on_stderr(&line);
                }
            }
            WorkerMessage::Done(report) => {
                self.emit(Event::Done(report.clone()));
                if !self.handle.is_finished() {
                    self.on_done(report);
                }
            }
        }
    }

    fn on_stderr(&mut self, line: &str) {
        let update = self.parser.parse_line(line);

        if let Some(raw) = update.progress {
            if let Some(pct) = self.progress.admit(raw) {
                self.emit(Event::Progress(pct));
            }
        }

        if !self.options.bitrate_guard {
            return;
        }
        if let Some(source) = self.parser.source_bit_rate {
            let target = self.request.bit_rate;
            if source <= target {
                warn!(
                    session = %self.handle.id,
                    source_kbps = source,
                    target_kbps = target,
                    "source bitrate does not exceed target; aborting"
                );
                let reason = format!(
                    "audio bitrate ({}kb/s) is already lower than or equal to the {}kb/s target; no need to compress",
                    source, target
                );
                self.cancel(Some(&reason));
            }
        }
    }

    fn on_done(&mut self, report: DoneReport) {
        if !self.handle.claim_terminal() {
            return;
        }

        let selected = if report.succeeded() {
            select_output(&report.output_files, self.request.format)
                .map(|(name, buffer)| (name.clone(), buffer.clone()))
        } else {
            None
        };

        match selected {
            Some((name, buffer)) => {
                let blob = Blob::new(buffer.clone(), self.request.format.mime_type());
                let url = self.blobs.create_object_url(blob.clone());
                info!(
                    session = %self.handle.id,
                    output = %name,
                    bytes = buffer.len(),
                    elapsed_ms = self.started_at.map(|t| t.elapsed().as_millis() as u64),
                    "encode succeeded"
                );
                let output = EncodedOutput {
                    name,
                    buffer,
                    blob,
                    url,
                };
                self.enter_terminal(SessionState::Completed);
                self.emit(Event::Success(output));
            }
            None => {
                warn!(
                    session = %self.handle.id,
                    code = report.code,
                    outputs = report.output_files.len(),
                    "encode failed"
                );
                self.enter_terminal(SessionState::Failed);
                self.emit(Event::Fail(report));
            }
        }
    }

    fn emit(&mut self, event: Event) {
        self.bus.trigger(&event, &self.handle);
    }

    fn current_channel(&self) -> Option<Arc<dyn EncoderChannel>> {
        self.handle.lock_slot().channel.clone()
    }

    /// Move to a terminal state and release the channel
    fn enter_terminal(&mut self, state: SessionState) {
        self.state = state;
        if let Some(channel) = self.handle.lock_slot().channel.take() {
            channel.terminate();
        }
    }

    fn time_left(&self) -> Option<Duration> {
        let deadline = self.options.deadline?;
        let started = self.started_at?;
        Some(deadline.saturating_sub(started.elapsed()))
    }

    fn check_deadline(&mut self) {
        if self.state != SessionState::Running {
            return;
        }
        if let (Some(deadline), Some(left)) = (self.options.deadline, self.time_left()) {
            if left.is_zero() {
                let reason = format!("encode timed out after {}s", deadline.as_secs_f64());
                self.cancel(Some(&reason));
            }
        }
    }
}

impl Drop for EncoderSession {
    fn drop(&mut self) {
        if let Some(channel) = self.handle.lock_slot().channel.take() {
            channel.terminate();
        }
    }
}

/// Pick the output to deliver: the first (by name) whose extension matches
/// the requested container, otherwise the first by name
pub fn select_output(
    outputs: &BTreeMap<String, Arc<[u8]>>,
    format: AudioFormat,
) -> Option<(&String, &Arc<[u8]>)> {
    let wanted = format.container_extension();
    outputs
        .iter()
        .find(|(name, _)| {
            super::types::file_extension(name).is_some_and(|ext| ext.eq_ignore_ascii_case(wanted))
        })
        .or_else(|| outputs.iter().next())
}
