//! Probation gate.
//!
//! A fresh installation is "in probation": nothing is synchronized with the
//! server until a qualifying event happens (a push subscription or a login).
//! Two flags track this independently and each only ever flips one way.

use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use attrsync_common::Result;
use attrsync_storage::{keys, KeyValueStore, KeyValueStoreExt};

use crate::bus::{BusEvent, LocalEventBus};

/// Which probation flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbationKind {
    Push,
    Profile,
}

impl ProbationKind {
    fn store_key(self) -> &'static str {
        match self {
            ProbationKind::Push => keys::PUSH_OUT_OF_PROBATION,
            ProbationKind::Profile => keys::PROFILE_OUT_OF_PROBATION,
        }
    }

    fn other(self) -> Self {
        match self {
            ProbationKind::Push => ProbationKind::Profile,
            ProbationKind::Profile => ProbationKind::Push,
        }
    }

    fn exit_event(self) -> BusEvent {
        match self {
            ProbationKind::Push => BusEvent::ExitedPushProbation,
            ProbationKind::Profile => BusEvent::ExitedProfileProbation,
        }
    }
}

/// Cached view of one probation flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProbationState {
    /// Not read from the store yet.
    #[default]
    Unknown,
    /// Last read said "in probation". Re-read on next query.
    InProbation,
    /// Out of probation. Final for the process lifetime.
    OutOfProbation,
}

#[derive(Debug, Default)]
struct Cache {
    push: ProbationState,
    profile: ProbationState,
}

impl Cache {
    fn get(&self, kind: ProbationKind) -> ProbationState {
        match kind {
            ProbationKind::Push => self.push,
            ProbationKind::Profile => self.profile,
        }
    }

    fn set(&mut self, kind: ProbationKind, state: ProbationState) {
        match kind {
            ProbationKind::Push => self.push = state,
            ProbationKind::Profile => self.profile = state,
        }
    }
}

/// In-memory cached view over the persisted probation flags.
pub struct ProbationGate {
    store: Arc<dyn KeyValueStore>,
    bus: Arc<LocalEventBus>,
    cache: Mutex<Cache>,
    transition: tokio::sync::Mutex<()>,
}

impl ProbationGate {
    /// Create a gate. Nothing is read until the first query.
    pub fn new(store: Arc<dyn KeyValueStore>, bus: Arc<LocalEventBus>) -> Self {
        Self {
            store,
            bus,
            cache: Mutex::new(Cache::default()),
            transition: tokio::sync::Mutex::new(()),
        }
    }

    /// Cached state without touching the store.
    pub fn cached(&self, kind: ProbationKind) -> ProbationState {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).get(kind)
    }

    /// Resolve the state of one flag, reading the store unless already out.
    pub async fn state(&self, kind: ProbationKind) -> Result<ProbationState> {
        if self.cached(kind) == ProbationState::OutOfProbation {
            return Ok(ProbationState::OutOfProbation);
        }

        let out: Option<bool> = self.store.get_typed(kind.store_key()).await?;
        let state = if out.unwrap_or(false) {
            ProbationState::OutOfProbation
        } else {
            ProbationState::InProbation
        };

        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        // Another task may have flipped the flag while we were reading.
        if cache.get(kind) != ProbationState::OutOfProbation {
            cache.set(kind, state);
        }
        Ok(cache.get(kind))
    }

    /// Whether one flag is out of probation. Read failures count as "in".
    pub async fn is_out_of_probation(&self, kind: ProbationKind) -> bool {
        match self.state(kind).await {
            Ok(state) => state == ProbationState::OutOfProbation,
            Err(e) => {
                warn!("Could not read {:?} probation flag: {}", kind, e);
                false
            }
        }
    }

    /// Whether the installation may talk to the server at all.
    pub async fn is_out_of_any_probation(&self) -> bool {
        self.is_out_of_probation(ProbationKind::Push).await
            || self.is_out_of_probation(ProbationKind::Profile).await
    }

    /// Flip a flag to out-of-probation.
    ///
    /// Emits the flag's bus event on transition, plus
    /// [`BusEvent::ExitedProbation`] when it is the first flag to flip.
    /// Returns whether a transition happened.
    pub async fn exit_probation(&self, kind: ProbationKind) -> Result<bool> {
        let _guard = self.transition.lock().await;

        if self.state(kind).await? == ProbationState::OutOfProbation {
            return Ok(false);
        }
        let other_out = self.state(kind.other()).await? == ProbationState::OutOfProbation;

        self.store.set_typed(kind.store_key(), &true).await?;
        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .set(kind, ProbationState::OutOfProbation);

        info!("Exited {:?} probation", kind);
        self.bus.emit(kind.exit_event());
        if !other_out {
            self.bus.emit(BusEvent::ExitedProbation);
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventCode;
    use attrsync_storage::MemoryStore;
    use serde_json::json;

    fn gate() -> (ProbationGate, MemoryStore, Arc<LocalEventBus>) {
        let store = MemoryStore::new();
        let bus = Arc::new(LocalEventBus::new());
        let gate = ProbationGate::new(Arc::new(store.clone()), bus.clone());
        (gate, store, bus)
    }

    #[tokio::test]
    async fn test_starts_unknown_then_in_probation() {
        let (gate, _store, _bus) = gate();
        assert_eq!(gate.cached(ProbationKind::Push), ProbationState::Unknown);

        assert!(!gate.is_out_of_probation(ProbationKind::Push).await);
        assert_eq!(gate.cached(ProbationKind::Push), ProbationState::InProbation);
        assert!(!gate.is_out_of_any_probation().await);
    }

    #[tokio::test]
    async fn test_reads_persisted_flag() {
        let (gate, store, _bus) = gate();
        store
            .set(keys::PROFILE_OUT_OF_PROBATION, json!(true))
            .await
            .unwrap();

        assert!(gate.is_out_of_probation(ProbationKind::Profile).await);
        assert!(gate.is_out_of_any_probation().await);
    }

    #[tokio::test]
    async fn test_in_probation_is_reread() {
        let (gate, store, _bus) = gate();
        assert!(!gate.is_out_of_probation(ProbationKind::Push).await);

        store.set(keys::PUSH_OUT_OF_PROBATION, json!(true)).await.unwrap();
        assert!(gate.is_out_of_probation(ProbationKind::Push).await);
    }

    #[tokio::test]
    async fn test_out_of_probation_is_cached_forever() {
        let (gate, store, _bus) = gate();
        gate.exit_probation(ProbationKind::Push).await.unwrap();

        store.remove(keys::PUSH_OUT_OF_PROBATION).await.unwrap();
        assert!(gate.is_out_of_probation(ProbationKind::Push).await);
    }

    #[tokio::test]
    async fn test_exit_emits_events_once() {
        let (gate, store, bus) = gate();
        let mut overall = bus.subscribe(EventCode::ExitedProbation);
        let mut push = bus.subscribe(EventCode::ExitedPushProbation);

        assert!(gate.exit_probation(ProbationKind::Push).await.unwrap());
        assert!(!gate.exit_probation(ProbationKind::Push).await.unwrap());

        assert_eq!(push.try_recv(), Some(BusEvent::ExitedPushProbation));
        assert!(push.try_recv().is_none());
        assert_eq!(overall.try_recv(), Some(BusEvent::ExitedProbation));
        assert!(overall.try_recv().is_none());
        assert_eq!(
            store.get(keys::PUSH_OUT_OF_PROBATION).await.unwrap(),
            Some(json!(true))
        );
    }

    #[tokio::test]
    async fn test_second_flag_does_not_reemit_overall_exit() {
        let (gate, _store, bus) = gate();
        let mut overall = bus.subscribe(EventCode::ExitedProbation);
        let mut profile = bus.subscribe(EventCode::ExitedProfileProbation);

        gate.exit_probation(ProbationKind::Push).await.unwrap();
        gate.exit_probation(ProbationKind::Profile).await.unwrap();

        assert_eq!(profile.try_recv(), Some(BusEvent::ExitedProfileProbation));
        assert_eq!(overall.try_recv(), Some(BusEvent::ExitedProbation));
        assert!(overall.try_recv().is_none());
    }
}
