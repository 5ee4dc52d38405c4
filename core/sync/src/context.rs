//! Wiring of the sync components.

use serde_json::Value;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;

use attrsync_common::Result;
use attrsync_storage::KeyValueStore;

use crate::attributes::AttributeEditor;
use crate::bus::{BusEvent, LocalEventBus};
use crate::config::SyncConfig;
use crate::coordinator::{ApplyOutcome, SyncCoordinator};
use crate::events::EventBuffer;
use crate::executor::RequestExecutor;
use crate::probation::{ProbationGate, ProbationKind};
use crate::queue::SequentialTaskQueue;
use crate::webservice::{AttributesWebservice, TrackWebservice};

/// Everything one installation needs to sync, built once and passed around.
pub struct SyncContext {
    config: SyncConfig,
    bus: Arc<LocalEventBus>,
    queue: SequentialTaskQueue,
    probation: Arc<ProbationGate>,
    events: EventBuffer,
    coordinator: SyncCoordinator,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SyncContext {
    /// Build the context and spawn its task queue.
    ///
    /// Must be called from within a tokio runtime. Call [`SyncContext::start`]
    /// to begin reacting to bus events.
    pub fn new(
        config: SyncConfig,
        store: Arc<dyn KeyValueStore>,
        executor: Arc<dyn RequestExecutor>,
    ) -> Self {
        let bus = Arc::new(LocalEventBus::with_replay_depth(config.bus_replay_depth));
        let (queue, worker) = SequentialTaskQueue::spawn();
        let probation = Arc::new(ProbationGate::new(store.clone(), bus.clone()));

        let attributes_ws = Arc::new(AttributesWebservice::new(
            executor.clone(),
            probation.clone(),
        ));
        let track_ws = Arc::new(TrackWebservice::new(executor, probation.clone()));

        let events = EventBuffer::new(track_ws, config.events.clone());
        let coordinator = SyncCoordinator::new(
            &config,
            store,
            attributes_ws,
            probation.clone(),
            queue.clone(),
            bus.clone(),
        );

        Self {
            config,
            bus,
            queue,
            probation,
            events,
            coordinator,
            tasks: Mutex::new(vec![worker]),
        }
    }

    /// Subscribe the coordinator to the bus.
    pub fn start(&self) {
        let listeners = self.coordinator.start();
        self.lock_tasks().extend(listeners);
        info!("Sync context started");
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn bus(&self) -> &Arc<LocalEventBus> {
        &self.bus
    }

    pub fn queue(&self) -> &SequentialTaskQueue {
        &self.queue
    }

    pub fn probation(&self) -> &Arc<ProbationGate> {
        &self.probation
    }

    pub fn events(&self) -> &EventBuffer {
        &self.events
    }

    pub fn coordinator(&self) -> &SyncCoordinator {
        &self.coordinator
    }

    /// Record and apply attribute edits.
    pub async fn edit<F>(&self, f: F) -> Result<ApplyOutcome>
    where
        F: FnOnce(&mut AttributeEditor),
    {
        self.coordinator.edit(f).await
    }

    /// Signal a new user session.
    pub fn start_session(&self) {
        self.bus.emit(BusEvent::SessionStarted);
    }

    /// Leave one probation. Returns whether the flag flipped.
    pub async fn exit_probation(&self, kind: ProbationKind) -> Result<bool> {
        self.probation.exit_probation(kind).await
    }

    /// Buffer an event for delivery.
    pub fn track(&self, name: impl Into<String>, params: Value) -> Uuid {
        self.events.track(name, params)
    }

    /// Wait for queued attribute work, then deliver buffered events.
    ///
    /// Bus listeners get one scheduling turn first so work triggered by a
    /// just-emitted event is queued. On a multi-threaded runtime that is not
    /// guaranteed.
    pub async fn flush(&self) -> Result<()> {
        tokio::task::yield_now().await;
        self.coordinator.flush().await?;
        self.events.flush().await
    }

    /// Stop the listeners and the task queue worker.
    pub fn shutdown(&self) {
        for task in self.lock_tasks().drain(..) {
            task.abort();
        }
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for SyncContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}
