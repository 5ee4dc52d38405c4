//! Local publish/subscribe bus with bounded replay.
//!
//! Components never call each other for cross-cutting signals such as
//! "a session started" or "the installation left probation". They emit a
//! [`BusEvent`] and whoever cares subscribes to its [`EventCode`].
//!
//! The bus keeps the last few events of every code so a late subscriber can
//! ask for a replay of what it missed.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Number of events kept per code for replay.
pub const DEFAULT_REPLAY_DEPTH: usize = 10;

/// Discriminant used to subscribe to a family of events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCode {
    SessionStarted,
    ExitedPushProbation,
    ExitedProfileProbation,
    ExitedProbation,
    ProjectChanged,
}

/// Events carried by the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    /// A new user session began.
    SessionStarted,
    /// The push probation flag flipped to out-of-probation.
    ExitedPushProbation,
    /// The profile probation flag flipped to out-of-probation.
    ExitedProfileProbation,
    /// The installation as a whole left probation (first flag to flip).
    ExitedProbation,
    /// The server reported a project key different from the last one seen.
    ProjectChanged { old: Option<String>, new: String },
}

impl BusEvent {
    /// Code this event is published under.
    pub fn code(&self) -> EventCode {
        match self {
            BusEvent::SessionStarted => EventCode::SessionStarted,
            BusEvent::ExitedPushProbation => EventCode::ExitedPushProbation,
            BusEvent::ExitedProfileProbation => EventCode::ExitedProfileProbation,
            BusEvent::ExitedProbation => EventCode::ExitedProbation,
            BusEvent::ProjectChanged { .. } => EventCode::ProjectChanged,
        }
    }
}

#[derive(Default)]
struct Topic {
    history: VecDeque<BusEvent>,
    subscribers: Vec<mpsc::UnboundedSender<BusEvent>>,
}

/// Receiving end of a subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    code: EventCode,
    rx: mpsc::UnboundedReceiver<BusEvent>,
}

impl Subscription {
    /// Code this subscription listens to.
    pub fn code(&self) -> EventCode {
        self.code
    }

    /// Wait for the next event. Returns `None` once the bus is dropped.
    pub async fn recv(&mut self) -> Option<BusEvent> {
        self.rx.recv().await
    }

    /// Take the next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<BusEvent> {
        self.rx.try_recv().ok()
    }
}

/// Typed publish/subscribe bus.
pub struct LocalEventBus {
    topics: Mutex<HashMap<EventCode, Topic>>,
    replay_depth: usize,
}

impl LocalEventBus {
    /// Create a bus with the default replay depth.
    pub fn new() -> Self {
        Self::with_replay_depth(DEFAULT_REPLAY_DEPTH)
    }

    /// Create a bus that keeps `replay_depth` events per code.
    pub fn with_replay_depth(replay_depth: usize) -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            replay_depth,
        }
    }

    /// Publish an event to current subscribers and record it for replay.
    pub fn emit(&self, event: BusEvent) {
        let code = event.code();
        let mut topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        let topic = topics.entry(code).or_default();

        topic.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        debug!(
            "Emitted {:?} to {} subscriber(s)",
            code,
            topic.subscribers.len()
        );

        if self.replay_depth > 0 {
            if topic.history.len() == self.replay_depth {
                topic.history.pop_front();
            }
            topic.history.push_back(event);
        }
    }

    /// Subscribe to future events of `code`.
    pub fn subscribe(&self, code: EventCode) -> Subscription {
        self.register(code, false)
    }

    /// Subscribe to `code`, first receiving the recorded history in emit order.
    pub fn subscribe_with_replay(&self, code: EventCode) -> Subscription {
        self.register(code, true)
    }

    /// Recorded history for `code`, oldest first.
    pub fn history(&self, code: EventCode) -> Vec<BusEvent> {
        let topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        topics
            .get(&code)
            .map(|t| t.history.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn register(&self, code: EventCode, replay: bool) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        // History is pushed under the same lock as registration, so a
        // concurrent emit is delivered exactly once.
        let mut topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        let topic = topics.entry(code).or_default();

        if replay {
            trace!("Replaying {} {:?} event(s)", topic.history.len(), code);
            for event in &topic.history {
                let _ = tx.send(event.clone());
            }
        }
        topic.subscribers.push(tx);

        Subscription { code, rx }
    }
}

impl Default for LocalEventBus {
    fn default() -> Self {
        Self::new()
    }
}
