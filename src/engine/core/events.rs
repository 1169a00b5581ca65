// Typed publish/subscribe for session events

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use tracing::warn;

use super::types::{DoneReport, EncodedOutput};

/// Events that can name the channel they are published on
pub trait Tagged {
    type Kind: Copy + Eq + Hash + Debug;

    fn kind(&self) -> Self::Kind;
}

/// Handle returned by [`EventBus::on`], used to remove exactly that listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener<E, C> = Box<dyn FnMut(&E, &C) + Send>;

/// Per-instance event bus with ordered, synchronously dispatched listeners
///
/// Listeners receive the event and a context value supplied by the owner at
/// dispatch time. A panicking listener is logged and skipped; the listeners
/// after it still run.
pub struct EventBus<E: Tagged, C> {
    listeners: HashMap<E::Kind, Vec<(ListenerId, Listener<E, C>)>>,
    next_id: u64,
}

impl<E: Tagged, C> Default for EventBus<E, C> {
    fn default() -> Self {
        Self {
            listeners: HashMap::new(),
            next_id: 0,
        }
    }
}

impl<E: Tagged, C> EventBus<E, C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a listener to the end of `kind`'s list
    pub fn on<F>(&mut self, kind: E::Kind, listener: F) -> ListenerId
    where
        F: FnMut(&E, &C) + Send + 'static,
    {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.listeners
            .entry(kind)
            .or_default()
            .push((id, Box::new(listener)));
        id
    }

    /// Remove one listener, or every listener of `kind` when `id` is `None`
    pub fn off(&mut self, kind: E::Kind, id: Option<ListenerId>) -> &mut Self {
        match id {
            None => {
                self.listeners.remove(&kind);
            }
            Some(id) => {
                if let Some(list) = self.listeners.get_mut(&kind) {
                    if let Some(pos) = list.iter().position(|(lid, _)| *lid == id) {
                        list.remove(pos);
                    }
                }
            }
        }
        self
    }

    pub fn listener_count(&self, kind: E::Kind) -> usize {
        self.listeners.get(&kind).map_or(0, Vec::len)
    }

    /// Invoke every listener registered for the event's kind, in order
    pub fn trigger(&mut self, event: &E, ctx: &C) -> &mut Self {
        let kind = event.kind();
        if let Some(list) = self.listeners.get_mut(&kind) {
            for (id, listener) in list.iter_mut() {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| listener(event, ctx)));
                if outcome.is_err() {
                    warn!(?kind, listener = id.0, "event listener panicked; continuing");
                }
            }
        }
        self
    }
}

/// Channels a session publishes on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Ready,
    Stdout,
    Stderr,
    Progress,
    Done,
    Success,
    Fail,
    Abort,
}

impl EventKind {
    pub fn name(self) -> &'static str {
        match self {
            EventKind::Ready => "ready",
            EventKind::Stdout => "stdout",
            EventKind::Stderr => "stderr",
            EventKind::Progress => "progress",
            EventKind::Done => "done",
            EventKind::Success => "success",
            EventKind::Fail => "fail",
            EventKind::Abort => "abort",
        }
    }

    /// Success, Fail and Abort end a session; exactly one of them is emitted
    pub fn is_terminal(self) -> bool {
        matches!(self, EventKind::Success | EventKind::Fail | EventKind::Abort)
    }
}

/// Session event with its payload
#[derive(Debug, Clone)]
pub enum Event {
    Ready,
    Stdout(String),
    Stderr(String),
    Progress(u32),
    Done(DoneReport),
    Success(EncodedOutput),
    Fail(DoneReport),
    Abort { message: String },
}

impl Tagged for Event {
    type Kind = EventKind;

    fn kind(&self) -> EventKind {
        match self {
            Event::Ready => EventKind::Ready,
            Event::Stdout(_) => EventKind::Stdout,
            Event::Stderr(_) => EventKind::Stderr,
            Event::Progress(_) => EventKind::Progress,
            Event::Done(_) => EventKind::Done,
            Event::Success(_) => EventKind::Success,
            Event::Fail(_) => EventKind::Fail,
            Event::Abort { .. } => EventKind::Abort,
        }
    }
}
