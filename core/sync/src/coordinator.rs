//! Attribute sync coordinator.
//!
//! Owns the protocol that keeps the local attribute snapshot and the server
//! in agreement:
//!
//! 1. An edit is applied by the writer and diffed against the persisted
//!    snapshot. Unchanged snapshots stop here.
//! 2. The new snapshot is persisted and the transaction id and last check
//!    are cleared.
//! 3. While in probation the version is pinned to `1` and nothing is sent.
//! 4. Otherwise the version is bumped and a send is scheduled.
//! 5. A send posts the snapshot with its version and stores the returned
//!    transaction id.
//! 6. A check (on session start, throttled) asks the server what to do with
//!    the stored transaction: nothing, bump past the server, or resend.
//!
//! Every step runs as a task on the [`SequentialTaskQueue`], so steps from
//! different triggers never interleave.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use attrsync_common::Result;
use attrsync_storage::KeyValueStore;

use crate::attributes::{
    snapshot_changed, AttributeEditor, AttributeState, AttributeWriter, OperationBatch, TagState,
};
use crate::bus::{BusEvent, EventCode, LocalEventBus};
use crate::config::SyncConfig;
use crate::probation::ProbationGate;
use crate::queue::SequentialTaskQueue;
use crate::state::{SyncState, SyncStateStore};
use crate::webservice::{AttributesWebservice, CheckAction};

/// What [`SyncCoordinator::apply`] did with a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The snapshot did not change.
    Unchanged,
    /// Persisted, but held back by probation.
    Gated,
    /// Persisted and a send for `version` was scheduled.
    Scheduled { version: u64 },
}

/// Attribute sync protocol driver. Cheap to clone.
#[derive(Clone)]
pub struct SyncCoordinator {
    writer: AttributeWriter,
    state: SyncStateStore,
    webservice: Arc<AttributesWebservice>,
    probation: Arc<ProbationGate>,
    queue: SequentialTaskQueue,
    bus: Arc<LocalEventBus>,
    check_throttle: Duration,
}

impl SyncCoordinator {
    pub fn new(
        config: &SyncConfig,
        store: Arc<dyn KeyValueStore>,
        webservice: Arc<AttributesWebservice>,
        probation: Arc<ProbationGate>,
        queue: SequentialTaskQueue,
        bus: Arc<LocalEventBus>,
    ) -> Self {
        Self {
            writer: AttributeWriter::new(config.limits, config.attributes.compat_mode),
            state: SyncStateStore::new(store),
            webservice,
            probation,
            queue,
            bus,
            check_throttle: config.attributes.check_throttle(),
        }
    }

    /// Listen for session starts and probation exits.
    ///
    /// Events emitted before this call are replayed.
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        let mut sessions = self.bus.subscribe_with_replay(EventCode::SessionStarted);
        let on_session = self.clone();
        let session_listener = tokio::spawn(async move {
            while sessions.recv().await.is_some() {
                on_session.on_session_start();
            }
        });

        let mut exits = self.bus.subscribe_with_replay(EventCode::ExitedProbation);
        let on_exit = self.clone();
        let exit_listener = tokio::spawn(async move {
            while exits.recv().await.is_some() {
                on_exit.on_exited_probation();
            }
        });

        vec![session_listener, exit_listener]
    }

    /// Record edits and apply them.
    pub async fn edit<F>(&self, f: F) -> Result<ApplyOutcome>
    where
        F: FnOnce(&mut AttributeEditor),
    {
        let mut editor = AttributeEditor::new();
        f(&mut editor);
        self.apply(editor.build()).await
    }

    /// Apply a batch and schedule what follows.
    ///
    /// # Errors
    /// - `Error::Capacity` if the batch would exceed a limit; nothing is
    ///   persisted in that case
    pub async fn apply(&self, batch: OperationBatch) -> Result<ApplyOutcome> {
        if batch.is_empty() {
            return Ok(ApplyOutcome::Unchanged);
        }
        let this = self.clone();
        self.queue
            .run("apply", async move { this.apply_now(batch).await })
            .await
    }

    /// Queue a send of the current snapshot.
    pub fn schedule_send(&self) {
        let this = self.clone();
        self.queue.post("send", async move { this.send_now().await });
    }

    /// Queue a throttled check of the current transaction.
    pub fn schedule_check(&self) {
        let this = self.clone();
        self.queue.post("check", async move { this.check_now().await });
    }

    /// Move past a server version.
    ///
    /// Only applies if the local version is still `from`. Returns whether
    /// the bump happened.
    pub async fn bump_version(&self, from: u64, server_version: u64) -> Result<bool> {
        let this = self.clone();
        self.queue
            .run("bump", async move { this.bump_version_now(from, server_version).await })
            .await
    }

    /// A new session started.
    pub fn on_session_start(&self) {
        debug!("Session started, scheduling attribute check");
        self.schedule_check();
    }

    /// The installation left probation: send whatever was gated.
    pub fn on_exited_probation(&self) {
        let this = self.clone();
        self.queue.post("exited_probation", async move {
            let version = this.state.version().await?;
            if version == 0 {
                debug!("Exited probation with nothing to send");
                return Ok(());
            }
            this.state.set_version(version + 1).await?;
            this.state.set_transaction_id(None).await?;
            info!("Exited probation, sending attributes version {}", version + 1);
            this.send_now().await
        });
    }

    /// Persisted attributes.
    pub async fn attributes(&self) -> Result<AttributeState> {
        let state = self.state.clone();
        self.queue
            .run("read_attributes", async move { state.attributes().await })
            .await
    }

    /// Persisted tags.
    pub async fn tags(&self) -> Result<TagState> {
        let state = self.state.clone();
        self.queue
            .run("read_tags", async move { state.tags().await })
            .await
    }

    /// Persisted version bookkeeping.
    pub async fn sync_state(&self) -> Result<SyncState> {
        let state = self.state.clone();
        self.queue
            .run("read_sync_state", async move { state.load().await })
            .await
    }

    /// Wait for every task posted before this call.
    ///
    /// Work that those tasks post while they are still running lands behind
    /// this flush and is not awaited.
    pub async fn flush(&self) -> Result<()> {
        self.queue.flush().await
    }

    async fn apply_now(&self, batch: OperationBatch) -> Result<ApplyOutcome> {
        let current = self.state.snapshot().await?;
        let next = match self.writer.apply(&current, &batch) {
            Ok(next) => next,
            Err(e) => {
                warn!("Rejecting attribute edit, nothing was saved: {}", e);
                return Err(e.into());
            }
        };

        if !snapshot_changed(&current, &next) {
            debug!("Attribute edit left the snapshot unchanged");
            return Ok(ApplyOutcome::Unchanged);
        }

        self.state.set_attributes(&next.attributes).await?;
        self.state.set_tags(&next.tags).await?;
        self.state.set_transaction_id(None).await?;
        self.state.set_last_check(None).await?;

        if !self.probation.is_out_of_any_probation().await {
            debug!("In probation, holding attributes back");
            self.state.set_version(1).await?;
            return Ok(ApplyOutcome::Gated);
        }

        let version = self.state.version().await? + 1;
        self.state.set_version(version).await?;
        self.schedule_send();
        Ok(ApplyOutcome::Scheduled { version })
    }

    async fn send_now(&self) -> Result<()> {
        let sync = self.state.load().await?;
        if !sync.needs_send() {
            debug!(
                "Nothing to send (version {}, acknowledged: {})",
                sync.version,
                sync.transaction_id.is_some()
            );
            return Ok(());
        }

        let snapshot = self.state.snapshot().await?;
        let response = self
            .webservice
            .send(&snapshot.attributes, &snapshot.tags, sync.version)
            .await?;

        if response.version != sync.version {
            debug!(
                "Discarding send acknowledgment for version {} (sent {})",
                response.version, sync.version
            );
            return Ok(());
        }

        self.state
            .set_transaction_id(Some(&response.transaction_id))
            .await?;
        info!(
            "Attributes version {} acknowledged as {}",
            sync.version, response.transaction_id
        );
        Ok(())
    }

    async fn check_now(&self) -> Result<()> {
        let sync = self.state.load().await?;
        let transaction_id = match &sync.transaction_id {
            Some(id) if sync.can_check() => id.clone(),
            _ => {
                debug!("No acknowledged transaction to check");
                return Ok(());
            }
        };

        let now = Utc::now().timestamp_millis();
        if let Some(last) = sync.last_check {
            let elapsed = now.saturating_sub(last);
            if elapsed >= 0 && (elapsed as u128) < self.check_throttle.as_millis() {
                debug!("Last check was {} ms ago, skipping", elapsed);
                return Ok(());
            }
        }

        let response = self.webservice.check(&transaction_id, sync.version).await?;

        if let Some(project_key) = response.project_key {
            self.update_project_key(project_key).await?;
        }

        match response.action {
            CheckAction::Ok => {
                self.state.set_last_check(Some(now)).await?;
                debug!("Attributes version {} confirmed", sync.version);
            }
            CheckAction::Bump => match response.version {
                Some(server) if server >= sync.version => {
                    self.bump_version_now(sync.version, server).await?;
                }
                other => debug!(
                    "Ignoring bump to {:?} behind local version {}",
                    other, sync.version
                ),
            },
            CheckAction::Resend => {
                info!("Server asked to resend attributes version {}", sync.version);
                self.state.set_transaction_id(None).await?;
                self.send_now().await?;
            }
            CheckAction::Recheck => debug!("Server asked to check again later"),
        }
        Ok(())
    }

    async fn bump_version_now(&self, from: u64, server_version: u64) -> Result<bool> {
        let current = self.state.version().await?;
        if current != from {
            debug!(
                "Discarding bump from {}: local version is now {}",
                from, current
            );
            return Ok(false);
        }

        let version = server_version + 1;
        info!("Bumping attributes version {} -> {}", current, version);
        self.state.set_version(version).await?;
        self.state.set_transaction_id(None).await?;
        self.send_now().await?;
        Ok(true)
    }

    async fn update_project_key(&self, project_key: String) -> Result<()> {
        let old = self.state.project_key().await?;
        if old.as_deref() == Some(project_key.as_str()) {
            return Ok(());
        }

        info!("Project changed from {:?} to {}", old, project_key);
        self.state.set_project_key(&project_key).await?;
        self.bus.emit(BusEvent::ProjectChanged {
            old,
            new: project_key,
        });
        Ok(())
    }
}
