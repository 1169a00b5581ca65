use serde::{Deserialize, Serialize};

/// Lifecycle of an encoder session
///
/// `Idle -> Initializing -> Running -> {Completed | Failed | Aborted}`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Initializing, // Channel open, no command sent yet
    Running,
    Completed,
    Failed,
    Aborted,
}

impl SessionState {
    /// Completed, Failed and Aborted are final; nothing leaves them
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Failed | SessionState::Aborted
        )
    }

    /// Whether `convert()` may be issued from this state
    pub fn can_convert(self) -> bool {
        matches!(self, SessionState::Idle | SessionState::Initializing)
    }

    /// Whether the worker channel may be (re)opened from this state
    pub fn can_replace(self) -> bool {
        !self.is_terminal()
    }
}

/// How session progress values are post-processed before being emitted
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProgressMode {
    /// Clamp to 0..=100 and never report a value lower than the last one
    #[default]
    Monotonic,
    /// Pass the encoder-derived value through unchanged
    Raw,
}

/// Applies the configured [`ProgressMode`] to raw percentages
#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
    mode: ProgressMode,
    last: Option<u32>,
}

impl ProgressTracker {
    pub fn new(mode: ProgressMode) -> Self {
        Self { mode, last: None }
    }

    /// Returns the value to emit, or `None` when the update should be dropped
    pub fn admit(&mut self, raw: u32) -> Option<u32> {
        match self.mode {
            ProgressMode::Raw => {
                self.last = Some(raw);
                Some(raw)
            }
            ProgressMode::Monotonic => {
                let clamped = raw.min(100);
                match self.last {
                    Some(prev) if clamped < prev => None,
                    _ => {
                        self.last = Some(clamped);
                        Some(clamped)
                    }
                }
            }
        }
    }

    pub fn last(&self) -> Option<u32> {
        self.last
    }
}
