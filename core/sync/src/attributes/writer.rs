//! Attribute state writer.
//!
//! A pure reducer: given the current [`Snapshot`] and an [`OperationBatch`],
//! produce the next snapshot. Either the whole batch applies or, when a
//! capacity limit is exceeded afterwards, nothing does.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

use attrsync_common::limits::{
    DEFAULT_MAX_ARRAY_ATTRIBUTES, DEFAULT_MAX_ARRAY_ITEMS, DEFAULT_MAX_ATTRIBUTES,
};
use attrsync_common::{AttributeKey, Error};

use super::editor::{Operation, OperationBatch};
use super::value::{ArrayDelta, AttributeData, AttributeState, AttributeType, AttributeValue, Snapshot};

/// Capacity limits enforced after a batch is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttributeLimits {
    /// Live custom attributes, native attributes excluded.
    pub max_attributes: usize,
    /// Live ARRAY attributes.
    pub max_array_attributes: usize,
    /// Items in one materialized array.
    pub max_array_items: usize,
}

impl Default for AttributeLimits {
    fn default() -> Self {
        Self {
            max_attributes: DEFAULT_MAX_ATTRIBUTES,
            max_array_attributes: DEFAULT_MAX_ARRAY_ATTRIBUTES,
            max_array_items: DEFAULT_MAX_ARRAY_ITEMS,
        }
    }
}

/// Why a batch was rolled back.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WriteError {
    #[error("Too many attributes: {count} (max {max})")]
    TooManyAttributes { count: usize, max: usize },

    #[error("Too many array attributes: {count} (max {max})")]
    TooManyArrayAttributes { count: usize, max: usize },

    #[error("Array attribute '{key}' has {count} items (max {max})")]
    TooManyArrayItems {
        key: AttributeKey,
        count: usize,
        max: usize,
    },
}

impl From<WriteError> for Error {
    fn from(e: WriteError) -> Self {
        Error::Capacity(e.to_string())
    }
}

/// Applies operation batches to snapshots.
#[derive(Debug, Clone, Copy)]
pub struct AttributeWriter {
    limits: AttributeLimits,
    compat_mode: bool,
}

impl AttributeWriter {
    /// `compat_mode` materializes full sets for array edits on unknown keys;
    /// otherwise they are recorded as `$add`/`$remove` deltas.
    pub fn new(limits: AttributeLimits, compat_mode: bool) -> Self {
        Self {
            limits,
            compat_mode,
        }
    }

    /// Apply `batch` on top of `current`. `current` is never modified.
    pub fn apply(&self, current: &Snapshot, batch: &OperationBatch) -> Result<Snapshot, WriteError> {
        let mut next = current.clone();

        for operation in batch {
            self.apply_one(&mut next, operation);
        }

        self.check_limits(&next.attributes)?;
        Ok(next)
    }

    fn apply_one(&self, snapshot: &mut Snapshot, operation: &Operation) {
        let attributes = &mut snapshot.attributes;
        match operation {
            Operation::SetAttribute { key, value } => {
                attributes.insert(key.clone(), value.clone());
            }
            Operation::RemoveAttribute { key } => {
                let attr_type = attributes
                    .get(key)
                    .map_or(AttributeType::Unknown, |v| v.attr_type);
                attributes.insert(key.clone(), AttributeValue::removed(attr_type));
            }
            Operation::AddToArray { key, values } => {
                let next = self.add_to_array(attributes.get(key), values);
                attributes.insert(key.clone(), next);
            }
            Operation::RemoveFromArray { key, values } => {
                if let Some(next) = self.remove_from_array(attributes.get(key), values) {
                    attributes.insert(key.clone(), next);
                }
            }
            Operation::SetLanguage(language) => {
                set_native(attributes, "language", language.clone());
            }
            Operation::SetRegion(region) => {
                set_native(attributes, "region", region.clone());
            }
            Operation::SetEmail(email) => {
                set_native(attributes, "email", email.clone());
            }
            Operation::SetEmailMarketing(state) => {
                set_native(
                    attributes,
                    "email_marketing",
                    state.map(|s| s.as_str().to_string()),
                );
            }
            Operation::AddTag { collection, tag } => {
                snapshot
                    .tags
                    .entry(collection.clone())
                    .or_default()
                    .insert(tag.clone());
            }
            Operation::RemoveTag { collection, tag } => {
                if let Some(tags) = snapshot.tags.get_mut(collection) {
                    tags.remove(tag);
                    if tags.is_empty() {
                        snapshot.tags.remove(collection);
                    }
                }
            }
            Operation::ClearTagCollection(collection) => {
                snapshot.tags.remove(collection);
            }
            Operation::ClearTags => snapshot.tags.clear(),
        }
    }

    fn add_to_array(
        &self,
        existing: Option<&AttributeValue>,
        values: &BTreeSet<String>,
    ) -> AttributeValue {
        let data = match existing.and_then(|v| v.value.as_ref()) {
            Some(AttributeData::Array(items)) => {
                AttributeData::Array(items.union(values).cloned().collect())
            }
            Some(AttributeData::ArrayDelta(delta)) => {
                let mut delta = delta.clone();
                delta.add.get_or_insert_with(BTreeSet::new).extend(values.iter().cloned());
                prune(&mut delta.remove, values);
                AttributeData::ArrayDelta(delta)
            }
            // Removed or non-array values restart from scratch.
            Some(_) => AttributeData::Array(values.clone()),
            None if existing.is_some() || self.compat_mode => AttributeData::Array(values.clone()),
            None => AttributeData::ArrayDelta(ArrayDelta {
                add: Some(values.clone()),
                remove: None,
            }),
        };
        AttributeValue::new(AttributeType::Array, data)
    }

    /// `None` leaves the key untouched.
    fn remove_from_array(
        &self,
        existing: Option<&AttributeValue>,
        values: &BTreeSet<String>,
    ) -> Option<AttributeValue> {
        match existing {
            None if self.compat_mode => None,
            None => Some(AttributeValue::new(
                AttributeType::Array,
                AttributeData::ArrayDelta(ArrayDelta {
                    add: None,
                    remove: Some(values.clone()),
                }),
            )),
            Some(value) => match &value.value {
                Some(AttributeData::Array(items)) => {
                    let remaining: BTreeSet<String> = items.difference(values).cloned().collect();
                    if remaining.is_empty() {
                        Some(AttributeValue::removed(AttributeType::Array))
                    } else {
                        Some(AttributeValue::new(
                            AttributeType::Array,
                            AttributeData::Array(remaining),
                        ))
                    }
                }
                Some(AttributeData::ArrayDelta(delta)) => {
                    let mut delta = delta.clone();
                    delta
                        .remove
                        .get_or_insert_with(BTreeSet::new)
                        .extend(values.iter().cloned());
                    prune(&mut delta.add, values);
                    Some(AttributeValue::new(
                        AttributeType::Array,
                        AttributeData::ArrayDelta(delta),
                    ))
                }
                _ => None,
            },
        }
    }

    fn check_limits(&self, attributes: &AttributeState) -> Result<(), WriteError> {
        let live = attributes
            .iter()
            .filter(|(key, value)| !key.is_native() && !value.is_removed());

        let mut count = 0;
        let mut arrays = 0;
        for (key, value) in live {
            count += 1;
            if value.is_live_array() {
                arrays += 1;
            }
            if let Some(AttributeData::Array(items)) = &value.value {
                if items.len() > self.limits.max_array_items {
                    return Err(WriteError::TooManyArrayItems {
                        key: key.clone(),
                        count: items.len(),
                        max: self.limits.max_array_items,
                    });
                }
            }
        }

        if arrays > self.limits.max_array_attributes {
            return Err(WriteError::TooManyArrayAttributes {
                count: arrays,
                max: self.limits.max_array_attributes,
            });
        }
        if count > self.limits.max_attributes {
            return Err(WriteError::TooManyAttributes {
                count,
                max: self.limits.max_attributes,
            });
        }
        Ok(())
    }
}

impl Default for AttributeWriter {
    fn default() -> Self {
        Self::new(AttributeLimits::default(), true)
    }
}

fn set_native(attributes: &mut AttributeState, name: &str, value: Option<String>) {
    let value = match value {
        Some(text) => AttributeValue::new(AttributeType::String, AttributeData::Text(text)),
        None => AttributeValue::removed(AttributeType::String),
    };
    attributes.insert(AttributeKey::native(name), value);
}

fn prune(set: &mut Option<BTreeSet<String>>, values: &BTreeSet<String>) {
    if let Some(items) = set {
        items.retain(|item| !values.contains(item));
        if items.is_empty() {
            *set = None;
        }
    }
}
