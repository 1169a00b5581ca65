mod args;
mod blob;
mod error;
mod events;
mod ffmpeg_info;
mod log;
mod log_parser;
mod session;
mod state;
mod types;

pub use args::{build_arguments, format_command, output_file_name};
pub use blob::BlobStore;
pub use error::EngineError;
pub use events::{Event, EventBus, EventKind, ListenerId, Tagged};
pub use ffmpeg_info::{
    AudioProbe, ffmpeg_version, parse_encoder_listing, parse_ffprobe_output, probe_audio,
    sibling_ffprobe, supported_formats,
};
pub use log::{DEBUG_LOG_FILE, debug_log_path, init_logging, parse_level};
pub use log_parser::{LogParser, LogUpdate, time_to_seconds};
pub use session::{
    DEFAULT_CANCEL_MESSAGE, EncoderSession, SessionHandle, SessionOptions, select_output,
};
pub use state::{ProgressMode, ProgressTracker, SessionState};
pub use types::{
    AudioFormat, Blob, DEFAULT_BIT_RATE_KBPS, DEFAULT_ENCODER_PATH, DoneReport, EncodeRequest,
    EncodedOutput, FormatSource, InputFile, WorkerCommand, WorkerMessage, file_extension,
};
