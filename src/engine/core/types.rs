use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use super::error::EngineError;

pub const DEFAULT_BIT_RATE_KBPS: u32 = 128;
pub const DEFAULT_ENCODER_PATH: &str = "ffmpeg";

/// Target audio formats the encoder command can be built for
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    #[default]
    Mp3,
    Ogg,
    Aac,
    Wma,
}

impl AudioFormat {
    pub const ALL: [AudioFormat; 4] = [
        AudioFormat::Mp3,
        AudioFormat::Ogg,
        AudioFormat::Aac,
        AudioFormat::Wma,
    ];

    pub fn name(self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Ogg => "ogg",
            AudioFormat::Aac => "aac",
            AudioFormat::Wma => "wma",
        }
    }

    /// ffmpeg audio codec used for this format
    pub fn codec(self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "libmp3lame",
            AudioFormat::Ogg => "libvorbis",
            AudioFormat::Aac => "libfdk_aac",
            AudioFormat::Wma => "wmav1",
        }
    }

    /// Extension of the container the encoder writes
    pub fn container_extension(self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Ogg => "ogg",
            AudioFormat::Aac => "mp4",
            AudioFormat::Wma => "asf",
        }
    }

    pub fn mime_type(self) -> String {
        format!("audio/{}", self.name())
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AudioFormat {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mp3" => Ok(AudioFormat::Mp3),
            "ogg" => Ok(AudioFormat::Ogg),
            "aac" => Ok(AudioFormat::Aac),
            "wma" => Ok(AudioFormat::Wma),
            _ => Err(EngineError::UnknownFormat(s.to_string())),
        }
    }
}

/// Where the request's target format came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatSource {
    Explicit,
    Extension,
    Default, // File name had no extension
}

/// Extension after the last dot, if any
pub fn file_extension(file_name: &str) -> Option<&str> {
    file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty())
}

/// Everything needed to run one encode
#[derive(Debug, Clone)]
pub struct EncodeRequest {
    pub file_name: String,
    pub file_buffer: Arc<[u8]>,
    pub bit_rate: u32, // kb/s
    pub format: AudioFormat,
    pub format_source: FormatSource,
    pub encoder_path: PathBuf,
}

impl EncodeRequest {
    /// Create a request with the default bitrate and the format inferred from
    /// the file name extension (mp3 when there is none)
    pub fn new(
        file_name: impl Into<String>,
        file_buffer: impl Into<Arc<[u8]>>,
    ) -> Result<Self, EngineError> {
        let file_name = file_name.into();
        if file_name.trim().is_empty() {
            return Err(EngineError::EmptyFileName);
        }

        let (format, format_source) = match file_extension(&file_name) {
            Some(ext) => (ext.parse()?, FormatSource::Extension),
            None => (AudioFormat::default(), FormatSource::Default),
        };

        Ok(Self {
            file_name,
            file_buffer: file_buffer.into(),
            bit_rate: DEFAULT_BIT_RATE_KBPS,
            format,
            format_source,
            encoder_path: PathBuf::from(DEFAULT_ENCODER_PATH),
        })
    }

    /// Like [`EncodeRequest::new`] but with an explicit target format, which
    /// replaces extension inference entirely
    pub fn with_explicit_format(
        file_name: impl Into<String>,
        file_buffer: impl Into<Arc<[u8]>>,
        format: AudioFormat,
    ) -> Result<Self, EngineError> {
        let file_name = file_name.into();
        if file_name.trim().is_empty() {
            return Err(EngineError::EmptyFileName);
        }

        Ok(Self {
            file_name,
            file_buffer: file_buffer.into(),
            bit_rate: DEFAULT_BIT_RATE_KBPS,
            format,
            format_source: FormatSource::Explicit,
            encoder_path: PathBuf::from(DEFAULT_ENCODER_PATH),
        })
    }

    pub fn with_bit_rate(mut self, kbps: u32) -> Result<Self, EngineError> {
        if kbps == 0 {
            return Err(EngineError::InvalidBitRate);
        }
        self.bit_rate = kbps;
        Ok(self)
    }

    pub fn with_encoder_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.encoder_path = path.into();
        self
    }
}

/// An input file handed to the encoder alongside the command
#[derive(Debug, Clone)]
pub struct InputFile {
    pub name: String,
    pub buffer: Arc<[u8]>,
}

/// Outbound message: run the encoder with these arguments over these files
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    pub arguments: Vec<String>,
    pub files: Vec<InputFile>,
}

/// Final report of an encoder run
#[derive(Debug, Clone, Default)]
pub struct DoneReport {
    pub code: i32,
    pub output_files: BTreeMap<String, Arc<[u8]>>,
}

impl DoneReport {
    pub fn succeeded(&self) -> bool {
        self.code == 0 && !self.output_files.is_empty()
    }
}

/// Inbound message from the worker channel
#[derive(Debug, Clone)]
pub enum WorkerMessage {
    Ready,
    Stdout(String),
    Stderr(String),
    Done(DoneReport),
}

/// Binary object tagged with a MIME type
#[derive(Debug, Clone)]
pub struct Blob {
    pub mime_type: String,
    pub data: Arc<[u8]>,
}

impl Blob {
    pub fn new(data: Arc<[u8]>, mime_type: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Payload of a successful encode
#[derive(Debug, Clone)]
pub struct EncodedOutput {
    pub name: String,
    pub buffer: Arc<[u8]>,
    pub blob: Blob,
    pub url: String,
}
