//! Structural comparison of attribute and tag snapshots.

use std::collections::BTreeSet;

use super::value::{AttributeState, Snapshot, TagState};

/// Entries that differ between two attribute maps.
///
/// `added` holds entries of the new map that are absent from, or differ in,
/// the old one. `removed` is the same from the old map's side.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeDiff {
    pub added: AttributeState,
    pub removed: AttributeState,
}

impl AttributeDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Tags that differ between two tag maps, per collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TagDiff {
    pub added: TagState,
    pub removed: TagState,
}

impl TagDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Compare two attribute maps. Type and value must both match for an entry
/// to be considered unchanged.
pub fn diff(old: &AttributeState, new: &AttributeState) -> AttributeDiff {
    let one_side = |from: &AttributeState, against: &AttributeState| -> AttributeState {
        from.iter()
            .filter(|(key, value)| against.get(*key) != Some(*value))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    };

    AttributeDiff {
        added: one_side(new, old),
        removed: one_side(old, new),
    }
}

/// Whether two attribute maps differ.
pub fn has_changed(old: &AttributeState, new: &AttributeState) -> bool {
    !diff(old, new).is_empty()
}

/// Compare two tag maps.
pub fn diff_tags(old: &TagState, new: &TagState) -> TagDiff {
    let one_side = |from: &TagState, against: &TagState| -> TagState {
        let empty = BTreeSet::new();
        from.iter()
            .filter_map(|(collection, tags)| {
                let other = against.get(collection).unwrap_or(&empty);
                let missing: BTreeSet<String> = tags.difference(other).cloned().collect();
                (!missing.is_empty()).then(|| (collection.clone(), missing))
            })
            .collect()
    };

    TagDiff {
        added: one_side(new, old),
        removed: one_side(old, new),
    }
}

/// Whether two tag maps differ.
pub fn tags_changed(old: &TagState, new: &TagState) -> bool {
    !diff_tags(old, new).is_empty()
}

/// Whether anything the server cares about differs between two snapshots.
pub fn snapshot_changed(old: &Snapshot, new: &Snapshot) -> bool {
    has_changed(&old.attributes, &new.attributes) || tags_changed(&old.tags, &new.tags)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::value::{AttributeData, AttributeType, AttributeValue};
    use attrsync_common::{AttributeKey, TagCollection};
    use proptest::prelude::*;

    fn key(k: &str) -> AttributeKey {
        AttributeKey::new(k).unwrap()
    }

    fn text(s: &str) -> AttributeValue {
        AttributeValue::new(AttributeType::String, AttributeData::Text(s.to_string()))
    }

    #[test]
    fn test_changed_value_appears_on_both_sides() {
        let old = AttributeState::from([(key("name"), text("ada"))]);
        let new = AttributeState::from([(key("name"), text("grace"))]);

        let d = diff(&old, &new);
        assert_eq!(d.added.get(&key("name")), Some(&text("grace")));
        assert_eq!(d.removed.get(&key("name")), Some(&text("ada")));
        assert!(has_changed(&old, &new));
    }

    #[test]
    fn test_type_change_is_a_change() {
        let old = AttributeState::from([(key("zip"), text("1"))]);
        let new = AttributeState::from([(
            key("zip"),
            AttributeValue::new(AttributeType::Url, AttributeData::Text("1".to_string())),
        )]);

        assert!(has_changed(&old, &new));
    }

    #[test]
    fn test_set_order_is_irrelevant() {
        let array = |items: &[&str]| {
            AttributeValue::new(
                AttributeType::Array,
                AttributeData::Array(items.iter().map(|s| s.to_string()).collect()),
            )
        };
        let old = AttributeState::from([(key("os"), array(&["linux", "bsd"]))]);
        let new = AttributeState::from([(key("os"), array(&["bsd", "linux"]))]);

        assert!(!has_changed(&old, &new));
    }

    #[test]
    fn test_removal_marker_is_a_change() {
        let old = AttributeState::from([(key("name"), text("ada"))]);
        let new = AttributeState::from([(key("name"), AttributeValue::removed(AttributeType::String))]);

        assert!(has_changed(&old, &new));
    }

    #[test]
    fn test_tag_diff() {
        let c = TagCollection::new("interests").unwrap();
        let set = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>();
        let old = TagState::from([(c.clone(), set(&["cars", "music"]))]);
        let new = TagState::from([(c.clone(), set(&["music", "ski"]))]);

        let d = diff_tags(&old, &new);
        assert_eq!(d.added, TagState::from([(c.clone(), set(&["ski"]))]));
        assert_eq!(d.removed, TagState::from([(c, set(&["cars"]))]));
        assert!(tags_changed(&old, &new));
        assert!(!tags_changed(&new, &new));
    }

    #[test]
    fn test_snapshot_changed_considers_tags() {
        let old = Snapshot::default();
        let mut new = Snapshot::default();
        assert!(!snapshot_changed(&old, &new));

        new.tags.insert(
            TagCollection::new("sports").unwrap(),
            BTreeSet::from(["ski".to_string()]),
        );
        assert!(snapshot_changed(&old, &new));
    }

    proptest! {
        #[test]
        fn prop_diff_with_self_is_empty(
            entries in proptest::collection::btree_map("[a-z_]{1,30}", ("[a-z]{0,10}", any::<i64>()), 0..20)
        ) {
            let state: AttributeState = entries
                .into_iter()
                .map(|(k, (s, n))| {
                    let value = if n % 2 == 0 {
                        text(&s)
                    } else {
                        AttributeValue::new(AttributeType::Integer, AttributeData::Integer(n))
                    };
                    (key(&k), value)
                })
                .collect();

            prop_assert!(diff(&state, &state).is_empty());
            prop_assert!(!has_changed(&state, &state.clone()));
        }
    }
}
