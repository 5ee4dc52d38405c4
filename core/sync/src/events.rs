//! Event delivery buffer.
//!
//! Tracked events are kept in memory and delivered in batches. Every
//! [`EventBuffer::track`] restarts a short debounce timer; when it fires, one
//! attempt takes up to a batch worth of events (reserved names first) and
//! hands them to the [`EventSender`] with fixed-spacing retries. Events leave
//! the buffer only once the server acknowledged them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, warn};
use uuid::Uuid;

use attrsync_common::{Error, Result};

use crate::config::EventBufferConfig;
use crate::retry::{RetryConfig, RetryExecutor};

/// An event waiting for delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedEvent {
    pub id: Uuid,
    pub name: String,
    pub date: DateTime<Utc>,
    pub params: Value,
}

impl QueuedEvent {
    pub fn new(name: impl Into<String>, params: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            date: Utc::now(),
            params,
        }
    }
}

/// Delivers a batch of events.
#[async_trait]
pub trait EventSender: Send + Sync {
    /// `Ok` means every event of the batch was acknowledged.
    async fn send_events(&self, events: &[QueuedEvent]) -> Result<()>;
}

/// Result of one delivery attempt.
#[derive(Debug)]
enum AttemptOutcome {
    /// Nothing buffered.
    Idle,
    /// Another attempt is in flight.
    Busy,
    /// A batch was acknowledged.
    Sent { remaining: usize },
    /// Every try of the batch failed.
    Failed(Error),
}

#[derive(Default)]
struct BufferState {
    events: Vec<QueuedEvent>,
    sending: bool,
    debounce: Option<JoinHandle<()>>,
    last_auth_log: Option<Instant>,
}

struct Inner {
    sender: Arc<dyn EventSender>,
    config: EventBufferConfig,
    state: Mutex<BufferState>,
    idle: Notify,
}

/// Batching, retrying event buffer. Cheap to clone.
#[derive(Clone)]
pub struct EventBuffer {
    inner: Arc<Inner>,
}

impl EventBuffer {
    pub fn new(sender: Arc<dyn EventSender>, config: EventBufferConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                sender,
                config,
                state: Mutex::new(BufferState::default()),
                idle: Notify::new(),
            }),
        }
    }

    /// Buffer an event and restart the debounce timer.
    ///
    /// Must be called from within a tokio runtime.
    pub fn track(&self, name: impl Into<String>, params: Value) -> Uuid {
        let event = QueuedEvent::new(name, params);
        let id = event.id;

        let mut state = self.lock();
        state.events.push(event);
        if let Some(previous) = state.debounce.take() {
            previous.abort();
        }

        // The timer task only sleeps; the attempt runs in its own task so a
        // later restart cannot cancel a send that already started.
        let buffer = self.clone();
        let delay = self.inner.config.debounce();
        state.debounce = Some(tokio::spawn(async move {
            sleep(delay).await;
            buffer.schedule_attempt();
        }));

        id
    }

    /// Number of buffered events, in-flight ones included.
    pub fn len(&self) -> usize {
        self.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the buffered events in their current order.
    pub fn pending(&self) -> Vec<QueuedEvent> {
        self.lock().events.clone()
    }

    /// Run one delivery attempt now. A success with a backlog schedules the
    /// next attempt immediately.
    pub async fn attempt_send(&self) {
        match self.send_once().await {
            AttemptOutcome::Sent { remaining } if remaining > 0 => self.schedule_attempt(),
            _ => {}
        }
    }

    /// Deliver everything buffered, skipping the debounce.
    ///
    /// Stops at the first batch whose attempts are all exhausted.
    pub async fn flush(&self) -> Result<()> {
        if let Some(timer) = self.lock().debounce.take() {
            timer.abort();
        }

        loop {
            // Registered before the check so a concurrent finish is not missed.
            let idle = self.inner.idle.notified();
            match self.send_once().await {
                AttemptOutcome::Idle => return Ok(()),
                AttemptOutcome::Sent { .. } => continue,
                AttemptOutcome::Failed(e) => return Err(e),
                AttemptOutcome::Busy => idle.await,
            }
        }
    }

    fn schedule_attempt(&self) {
        let buffer = self.clone();
        tokio::spawn(async move { buffer.attempt_send().await });
    }

    async fn send_once(&self) -> AttemptOutcome {
        let config = &self.inner.config;
        let batch = {
            let mut state = self.lock();
            if state.sending {
                return AttemptOutcome::Busy;
            }
            if state.events.is_empty() {
                return AttemptOutcome::Idle;
            }
            state.sending = true;

            let prefix = config.reserved_prefix.as_str();
            state
                .events
                .sort_by_key(|event| !event.name.starts_with(prefix));
            // An empty batch would "succeed" forever without draining anything.
            let take = config.batch_size.max(1).min(state.events.len());
            state.events[..take].to_vec()
        };

        debug!("Sending {} event(s)", batch.len());
        let retry = RetryExecutor::new(RetryConfig::fixed(
            config.max_attempts,
            config.retry_delay(),
        ));
        let sender = &self.inner.sender;
        let result = retry
            .execute_with_condition(|| sender.send_events(&batch), |e| !e.is_auth_error())
            .await;

        let outcome = {
            let mut state = self.lock();
            state.sending = false;
            match result {
                Ok(()) => {
                    let sent: HashSet<Uuid> = batch.iter().map(|event| event.id).collect();
                    state.events.retain(|event| !sent.contains(&event.id));
                    debug!(
                        "Delivered {} event(s), {} left",
                        sent.len(),
                        state.events.len()
                    );
                    AttemptOutcome::Sent {
                        remaining: state.events.len(),
                    }
                }
                Err(e) => {
                    warn!(
                        "Could not deliver {} event(s), keeping them buffered: {}",
                        batch.len(),
                        e
                    );
                    if e.is_auth_error() {
                        self.log_auth_failure(&mut state, &e);
                    }
                    AttemptOutcome::Failed(e)
                }
            }
        };

        self.inner.idle.notify_waiters();
        outcome
    }

    fn log_auth_failure(&self, state: &mut BufferState, e: &Error) {
        let now = Instant::now();
        let cooldown = self.inner.config.auth_log_cooldown();
        if state
            .last_auth_log
            .is_some_and(|last| now.duration_since(last) < cooldown)
        {
            return;
        }
        state.last_auth_log = Some(now);
        error!(
            "Event delivery was rejected by the server ({}). Check that the API key is valid for this project.",
            e
        );
    }

    fn lock(&self) -> MutexGuard<'_, BufferState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
