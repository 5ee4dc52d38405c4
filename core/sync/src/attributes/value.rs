//! Attribute value model and its wire encoding.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};

use attrsync_common::{AttributeKey, TagCollection};

/// Declared type of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeType {
    String,
    Boolean,
    Integer,
    Float,
    Date,
    Url,
    Array,
    /// Only used for deletions of keys that were never seen locally.
    Unknown,
}

impl AttributeType {
    /// Suffix appended to the key in the send payload (`"<key>.<suffix>"`).
    pub fn wire_suffix(self) -> &'static str {
        match self {
            AttributeType::String => "s",
            AttributeType::Boolean => "b",
            AttributeType::Integer => "i",
            AttributeType::Float => "f",
            AttributeType::Date => "t",
            AttributeType::Url => "u",
            AttributeType::Array => "a",
            AttributeType::Unknown => "n",
        }
    }
}

/// Partial update of an array attribute.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrayDelta {
    #[serde(rename = "$add", default, skip_serializing_if = "Option::is_none")]
    pub add: Option<BTreeSet<String>>,
    #[serde(rename = "$remove", default, skip_serializing_if = "Option::is_none")]
    pub remove: Option<BTreeSet<String>>,
}

/// Concrete value of an attribute.
///
/// URL values are stored as [`AttributeData::Text`]; the type lives on
/// [`AttributeValue`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum AttributeData {
    Text(String),
    Bool(bool),
    Integer(i64),
    Float(f64),
    /// Epoch milliseconds.
    Date(i64),
    Array(BTreeSet<String>),
    ArrayDelta(ArrayDelta),
}

impl AttributeData {
    fn to_wire(&self) -> Value {
        match self {
            AttributeData::Text(s) => Value::String(s.clone()),
            AttributeData::Bool(b) => Value::Bool(*b),
            AttributeData::Integer(i) | AttributeData::Date(i) => json!(i),
            AttributeData::Float(f) => json!(f),
            AttributeData::Array(items) => json!(items),
            AttributeData::ArrayDelta(delta) => json!(delta),
        }
    }
}

/// A typed attribute value. `value: None` means "removed".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeValue {
    #[serde(rename = "type")]
    pub attr_type: AttributeType,
    pub value: Option<AttributeData>,
}

impl AttributeValue {
    /// A present value.
    pub fn new(attr_type: AttributeType, value: AttributeData) -> Self {
        Self {
            attr_type,
            value: Some(value),
        }
    }

    /// A deletion marker.
    pub fn removed(attr_type: AttributeType) -> Self {
        Self {
            attr_type,
            value: None,
        }
    }

    pub fn is_removed(&self) -> bool {
        self.value.is_none()
    }

    /// Whether this value occupies an ARRAY slot for capacity purposes.
    pub fn is_live_array(&self) -> bool {
        self.attr_type == AttributeType::Array && self.value.is_some()
    }
}

/// Attribute map keyed by normalized key.
pub type AttributeState = BTreeMap<AttributeKey, AttributeValue>;

/// Tag map keyed by normalized collection name.
pub type TagState = BTreeMap<TagCollection, BTreeSet<String>>;

/// Everything the writer produces and the coordinator persists.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub attributes: AttributeState,
    pub tags: TagState,
}

/// Encode attributes as the `attrs` object of the send payload.
pub fn attributes_to_wire(attributes: &AttributeState) -> Value {
    let mut out = Map::new();
    for (key, value) in attributes {
        let wire_key = format!("{}.{}", key, value.attr_type.wire_suffix());
        let wire_value = value
            .value
            .as_ref()
            .map(AttributeData::to_wire)
            .unwrap_or(Value::Null);
        out.insert(wire_key, wire_value);
    }
    Value::Object(out)
}

/// Encode tags as the `tags` object of the send payload.
pub fn tags_to_wire(tags: &TagState) -> Value {
    let mut out = Map::new();
    for (collection, values) in tags {
        out.insert(collection.to_string(), json!(values));
    }
    Value::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(k: &str) -> AttributeKey {
        AttributeKey::new(k).unwrap()
    }

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_wire_encoding() {
        let mut attributes = AttributeState::new();
        attributes.insert(
            key("age"),
            AttributeValue::new(AttributeType::Integer, AttributeData::Integer(42)),
        );
        attributes.insert(
            key("site"),
            AttributeValue::new(
                AttributeType::Url,
                AttributeData::Text("https://example.com/".to_string()),
            ),
        );
        attributes.insert(
            key("os"),
            AttributeValue::new(AttributeType::Array, AttributeData::Array(set(&["linux"]))),
        );
        attributes.insert(key("gone"), AttributeValue::removed(AttributeType::Unknown));

        let wire = attributes_to_wire(&attributes);
        assert_eq!(
            wire,
            json!({
                "age.i": 42,
                "site.u": "https://example.com/",
                "os.a": ["linux"],
                "gone.n": null,
            })
        );
    }

    #[test]
    fn test_delta_wire_encoding() {
        let mut attributes = AttributeState::new();
        attributes.insert(
            key("os"),
            AttributeValue::new(
                AttributeType::Array,
                AttributeData::ArrayDelta(ArrayDelta {
                    add: Some(set(&["linux"])),
                    remove: None,
                }),
            ),
        );

        assert_eq!(
            attributes_to_wire(&attributes),
            json!({ "os.a": { "$add": ["linux"] } })
        );
    }

    #[test]
    fn test_persisted_form_roundtrips() {
        let mut attributes = AttributeState::new();
        attributes.insert(
            key("ratio"),
            AttributeValue::new(AttributeType::Float, AttributeData::Float(0.5)),
        );
        attributes.insert(
            key("born"),
            AttributeValue::new(AttributeType::Date, AttributeData::Date(1_700_000_000_000)),
        );

        let json = serde_json::to_value(&attributes).unwrap();
        let restored: AttributeState = serde_json::from_value(json).unwrap();
        assert_eq!(restored, attributes);
    }

    #[test]
    fn test_tags_wire_encoding() {
        let mut tags = TagState::new();
        tags.insert(TagCollection::new("interests").unwrap(), set(&["cars", "music"]));

        assert_eq!(tags_to_wire(&tags), json!({ "interests": ["cars", "music"] }));
    }
}
