//! Attribute editing, state reduction and diffing.
//!
//! The flow is: an [`AttributeEditor`] records validated operations, `build()`
//! freezes them into an [`OperationBatch`], an [`AttributeWriter`] reduces the
//! batch over the current [`Snapshot`], and [`diff`] decides whether the
//! result differs from what was persisted.

pub mod diff;
pub mod editor;
pub mod value;
pub mod writer;

pub use diff::{diff, diff_tags, has_changed, snapshot_changed, tags_changed, AttributeDiff, TagDiff};
pub use editor::{AttributeEditor, AttributeInput, EmailMarketing, Operation, OperationBatch};
pub use value::{
    attributes_to_wire, tags_to_wire, ArrayDelta, AttributeData, AttributeState, AttributeType,
    AttributeValue, Snapshot, TagState,
};
pub use writer::{AttributeLimits, AttributeWriter, WriteError};
