// Worker channel: the message-passing link to an isolated encoder process

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::core::{DoneReport, EngineError, WorkerCommand, WorkerMessage, format_command};

/// Item on a session's inbound queue
#[derive(Debug)]
pub(crate) enum Inbound {
    /// Message from the channel opened as `generation`
    Worker {
        generation: u64,
        message: WorkerMessage,
    },
    /// A [`SessionHandle`](super::core::SessionHandle) already terminated the channel
    Cancelled { message: String },
}

/// Sending half handed to a channel when it is opened
///
/// Every message is tagged with the generation of the channel it belongs to,
/// so a session can ignore stragglers from a channel it already replaced.
#[derive(Debug, Clone)]
pub struct Outbox {
    generation: u64,
    tx: Sender<Inbound>,
}

impl Outbox {
    pub(crate) fn new(generation: u64, tx: Sender<Inbound>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns false once the receiving session is gone
    pub fn send(&self, message: WorkerMessage) -> bool {
        self.tx
            .send(Inbound::Worker {
                generation: self.generation,
                message,
            })
            .is_ok()
    }
}

/// A live link to one encoder instance
pub trait EncoderChannel: Send + Sync {
    /// Hand a command to the encoder; returns without waiting for it to run
    fn post(&self, command: WorkerCommand) -> Result<(), EngineError>;

    /// Hard-stop the encoder. Calling this more than once is a no-op.
    fn terminate(&self);

    fn is_terminated(&self) -> bool;
}

/// Opens encoder channels for a session
pub trait ChannelFactory: Send + Sync {
    fn open(&self, outbox: Outbox) -> Result<Arc<dyn EncoderChannel>, EngineError>;
}

/// Opens [`FfmpegChannel`]s for a given encoder binary
#[derive(Debug, Clone)]
pub struct FfmpegChannelFactory {
    encoder_path: PathBuf,
}

impl FfmpegChannelFactory {
    pub fn new(encoder_path: impl Into<PathBuf>) -> Self {
        Self {
            encoder_path: encoder_path.into(),
        }
    }
}

impl ChannelFactory for FfmpegChannelFactory {
    fn open(&self, outbox: Outbox) -> Result<Arc<dyn EncoderChannel>, EngineError> {
        Ok(Arc::new(FfmpegChannel::open(
            self.encoder_path.clone(),
            outbox,
        )))
    }
}

/// Runs ffmpeg as a child process inside a private scratch directory
///
/// Input files are staged under `in/` before the process starts and the
/// process runs in `out/`; every file present there when it exits is
/// reported as an output.
pub struct FfmpegChannel {
    encoder_path: PathBuf,
    outbox: Outbox,
    child: Arc<Mutex<Option<Child>>>,
    terminated: Arc<AtomicBool>,
    posted: AtomicBool,
}

impl FfmpegChannel {
    /// Open the channel and announce readiness on the outbox
    pub fn open(encoder_path: PathBuf, outbox: Outbox) -> Self {
        let channel = Self {
            encoder_path,
            outbox,
            child: Arc::new(Mutex::new(None)),
            terminated: Arc::new(AtomicBool::new(false)),
            posted: AtomicBool::new(false),
        };
        channel.outbox.send(WorkerMessage::Ready);
        channel
    }

    fn spawn(&self, command: WorkerCommand) -> Result<(), EngineError> {
        let scratch = tempfile::Builder::new()
            .prefix("audioshrink-")
            .tempdir()?;

        let input_dir = scratch.path().join("in");
        let output_dir = scratch.path().join("out");
        fs::create_dir(&input_dir)?;
        fs::create_dir(&output_dir)?;

        let mut inputs = HashMap::new();
        for file in &command.files {
            let staged = input_dir.join(scratch_file_name(&file.name)?);
            fs::write(&staged, &file.buffer)?;
            inputs.insert(file.name.clone(), staged);
        }
        let arguments = stage_input_arguments(&command.arguments, &inputs);

        // Staging a large buffer takes a while; a terminate() during it wins
        if self.is_terminated() {
            debug!(generation = self.outbox.generation(), "terminated while staging inputs");
            return Err(EngineError::ChannelUnavailable);
        }

        let program = self.encoder_path.to_string_lossy().to_string();
        info!(
            generation = self.outbox.generation(),
            command = %format_command(&program, &command.arguments),
            "starting encoder"
        );

        let mut cmd = Command::new(&self.encoder_path);
        cmd.arg("-hide_banner")
            .arg("-nostdin")
            .args(&arguments)
            .current_dir(&output_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|source| EngineError::Spawn {
            program: program.clone(),
            source,
        })?;

        let stdout = child.stdout.take().ok_or(EngineError::ChannelUnavailable)?;
        let stderr = child.stderr.take().ok_or(EngineError::ChannelUnavailable)?;
        {
            // terminate() sets the flag before taking this lock, so checking
            // under the lock means one of the two sides always kills the child
            let mut slot = self.child.lock().unwrap_or_else(|e| e.into_inner());
            if self.is_terminated() {
                let _ = child.kill();
                let _ = child.wait();
                debug!(pid = child.id(), "terminated while starting; encoder killed");
                return Err(EngineError::ChannelUnavailable);
            }
            *slot = Some(child);
        }

        let out_box = self.outbox.clone();
        let stdout_thread = thread::spawn(move || {
            split_log_lines(stdout, |line| {
                out_box.send(WorkerMessage::Stdout(line));
            })
        });
        let err_box = self.outbox.clone();
        let stderr_thread = thread::spawn(move || {
            split_log_lines(stderr, |line| {
                err_box.send(WorkerMessage::Stderr(line));
            })
        });

        let child_slot = self.child.clone();
        let terminated = self.terminated.clone();
        let outbox = self.outbox.clone();
        thread::spawn(move || {
            let _ = stdout_thread.join();
            let _ = stderr_thread.join();

            let code = wait_for_exit(&child_slot);

            if terminated.load(Ordering::SeqCst) {
                debug!(generation = outbox.generation(), "encoder terminated; no report");
                return;
            }

            let report = match collect_outputs(&scratch.path().join("out")) {
                Ok(output_files) => DoneReport { code, output_files },
                Err(e) => {
                    warn!("Failed to read encoder outputs: {}", e);
                    DoneReport {
                        code,
                        output_files: BTreeMap::new(),
                    }
                }
            };
            debug!(
                code = report.code,
                outputs = report.output_files.len(),
                "encoder exited"
            );
            outbox.send(WorkerMessage::Done(report));
            // scratch dir is removed when `scratch` drops here
        });

        Ok(())
    }
}

impl EncoderChannel for FfmpegChannel {
    fn post(&self, command: WorkerCommand) -> Result<(), EngineError> {
        if self.is_terminated() || self.posted.swap(true, Ordering::SeqCst) {
            return Err(EngineError::ChannelUnavailable);
        }
        self.spawn(command)
    }

    fn terminate(&self) {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut slot = self.child.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(child) = slot.as_mut() {
            // Already-exited children report an error here; nothing to do
            let _ = child.kill();
            debug!(pid = child.id(), "encoder process killed");
        }
    }

    fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }
}

impl Drop for FfmpegChannel {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Poll the child without holding the lock across a blocking wait, so
/// `terminate()` can always get in
fn wait_for_exit(child_slot: &Mutex<Option<Child>>) -> i32 {
    loop {
        {
            let mut slot = child_slot.lock().unwrap_or_else(|e| e.into_inner());
            match slot.as_mut().map(Child::try_wait) {
                Some(Ok(Some(status))) => return status.code().unwrap_or(-1),
                Some(Ok(None)) => {}
                Some(Err(e)) => {
                    warn!("Failed to wait for encoder: {}", e);
                    return -1;
                }
                None => return -1,
            }
        }
        thread::sleep(Duration::from_millis(20));
    }
}

/// Reduce a caller-supplied name to a bare file name inside the scratch dir
fn scratch_file_name(name: &str) -> Result<String, EngineError> {
    Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| {
            EngineError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid input file name: {}", name),
            ))
        })
}

fn collect_outputs(output_dir: &Path) -> io::Result<BTreeMap<String, Arc<[u8]>>> {
    let mut outputs = BTreeMap::new();
    for entry in fs::read_dir(output_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        let data = fs::read(entry.path())?;
        outputs.insert(name, Arc::from(data));
    }
    Ok(outputs)
}

/// Point `-i <name>` arguments at the staged copy of that input
///
/// The encoder runs inside the output directory, so an output that shares
/// its input's name (mp3 to mp3) never collides with it.
fn stage_input_arguments(arguments: &[String], inputs: &HashMap<String, PathBuf>) -> Vec<String> {
    let mut staged = Vec::with_capacity(arguments.len());
    let mut after_input_flag = false;
    for arg in arguments {
        if let Some(path) = inputs.get(arg).filter(|_| after_input_flag) {
            staged.push(path.to_string_lossy().into_owned());
        } else {
            staged.push(arg.clone());
        }
        after_input_flag = arg == "-i";
    }
    staged
}

/// Split a log stream into lines on `\n` or `\r`
///
/// ffmpeg rewrites its status line in place with carriage returns, so both
/// count as terminators. Blank lines are dropped.
pub fn split_log_lines<R: Read>(mut reader: R, mut emit: impl FnMut(String)) {
    let mut buf = [0u8; 4096];
    let mut pending = Vec::new();

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        };
        for &byte in &buf[..n] {
            if byte == b'\n' || byte == b'\r' {
                if !pending.is_empty() {
                    emit(String::from_utf8_lossy(&pending).into_owned());
                    pending.clear();
                }
            } else {
                pending.push(byte);
            }
        }
    }

    if !pending.is_empty() {
        emit(String::from_utf8_lossy(&pending).into_owned());
    }
}
