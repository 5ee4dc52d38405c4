//! attrsync sync core
//!
//! This crate keeps a local snapshot of custom attributes and tags in
//! agreement with a remote server, and delivers tracked events:
//! - Attribute editor, writer and differ
//! - Version/transaction reconciliation (the coordinator)
//! - Batching, retrying event delivery
//! - A sequential task queue serializing all state mutations
//! - A local event bus with bounded replay
//!
//! [`SyncContext`] wires the pieces together.

pub mod attributes;
pub mod bus;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod events;
pub mod executor;
pub mod probation;
pub mod queue;
pub mod retry;
pub mod state;
pub mod webservice;

// Re-export main types
pub use attributes::{
    AttributeEditor, AttributeLimits, AttributeType, AttributeValue, AttributeWriter,
    EmailMarketing, OperationBatch, Snapshot,
};
pub use bus::{BusEvent, EventCode, LocalEventBus, Subscription};
pub use config::{AttributeSyncConfig, EndpointConfig, EventBufferConfig, SyncConfig};
pub use context::SyncContext;
pub use coordinator::{ApplyOutcome, SyncCoordinator};
pub use events::{EventBuffer, EventSender, QueuedEvent};
pub use executor::{HttpRequestExecutor, RequestExecutor, WebserviceRequest};
pub use probation::{ProbationGate, ProbationKind, ProbationState};
pub use queue::{SequentialTaskQueue, TaskQueueWorker};
pub use retry::{RetryConfig, RetryExecutor};
pub use state::{SyncState, SyncStateStore};
pub use webservice::{AttributesWebservice, CheckAction, CheckResponse, SendResponse, TrackWebservice};
