//! Attribute operation editor.
//!
//! The editor validates user intent and records it as a list of
//! [`Operation`]s. Invalid calls are dropped with a warning; the editor never
//! fails. Calling [`AttributeEditor::build`] consumes the editor, so a batch
//! cannot change once it has been handed to the writer.

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use tracing::warn;
use url::Url;

use attrsync_common::limits::{
    MAX_ARRAY_ITEM_LENGTH, MAX_EMAIL_LENGTH, MAX_LOCALE_LENGTH, MAX_STRING_LENGTH, MAX_URL_LENGTH,
};
use attrsync_common::{AttributeKey, Error, Result, TagCollection};

use super::value::{AttributeData, AttributeType, AttributeValue};

/// Untyped user input, before coercion.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeInput {
    Text(String),
    Number(f64),
    Bool(bool),
    Date(DateTime<Utc>),
    Url(Url),
    StringArray(Vec<String>),
}

impl From<&str> for AttributeInput {
    fn from(value: &str) -> Self {
        AttributeInput::Text(value.to_string())
    }
}

impl From<String> for AttributeInput {
    fn from(value: String) -> Self {
        AttributeInput::Text(value)
    }
}

impl From<f64> for AttributeInput {
    fn from(value: f64) -> Self {
        AttributeInput::Number(value)
    }
}

impl From<i64> for AttributeInput {
    fn from(value: i64) -> Self {
        AttributeInput::Number(value as f64)
    }
}

impl From<i32> for AttributeInput {
    fn from(value: i32) -> Self {
        AttributeInput::Number(f64::from(value))
    }
}

impl From<bool> for AttributeInput {
    fn from(value: bool) -> Self {
        AttributeInput::Bool(value)
    }
}

impl From<DateTime<Utc>> for AttributeInput {
    fn from(value: DateTime<Utc>) -> Self {
        AttributeInput::Date(value)
    }
}

impl From<Url> for AttributeInput {
    fn from(value: Url) -> Self {
        AttributeInput::Url(value)
    }
}

impl From<Vec<String>> for AttributeInput {
    fn from(value: Vec<String>) -> Self {
        AttributeInput::StringArray(value)
    }
}

impl From<Vec<&str>> for AttributeInput {
    fn from(value: Vec<&str>) -> Self {
        AttributeInput::StringArray(value.into_iter().map(String::from).collect())
    }
}

/// Email marketing subscription state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailMarketing {
    Subscribed,
    Unsubscribed,
}

impl EmailMarketing {
    pub fn as_str(self) -> &'static str {
        match self {
            EmailMarketing::Subscribed => "subscribed",
            EmailMarketing::Unsubscribed => "unsubscribed",
        }
    }
}

/// A validated edit. `None` on native setters means "remove".
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    SetAttribute {
        key: AttributeKey,
        value: AttributeValue,
    },
    RemoveAttribute {
        key: AttributeKey,
    },
    AddToArray {
        key: AttributeKey,
        values: BTreeSet<String>,
    },
    RemoveFromArray {
        key: AttributeKey,
        values: BTreeSet<String>,
    },
    SetLanguage(Option<String>),
    SetRegion(Option<String>),
    SetEmail(Option<String>),
    SetEmailMarketing(Option<EmailMarketing>),
    AddTag {
        collection: TagCollection,
        tag: String,
    },
    RemoveTag {
        collection: TagCollection,
        tag: String,
    },
    ClearTagCollection(TagCollection),
    ClearTags,
}

/// Frozen, ordered list of operations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperationBatch {
    operations: Vec<Operation>,
}

impl OperationBatch {
    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

impl From<Vec<Operation>> for OperationBatch {
    fn from(operations: Vec<Operation>) -> Self {
        Self { operations }
    }
}

impl<'a> IntoIterator for &'a OperationBatch {
    type Item = &'a Operation;
    type IntoIter = std::slice::Iter<'a, Operation>;

    fn into_iter(self) -> Self::IntoIter {
        self.operations.iter()
    }
}

/// Chainable builder of attribute operations.
#[derive(Debug, Default)]
pub struct AttributeEditor {
    operations: Vec<Operation>,
}

impl AttributeEditor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of operations recorded so far.
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Freeze the recorded operations.
    pub fn build(self) -> OperationBatch {
        OperationBatch {
            operations: self.operations,
        }
    }

    /// Set an attribute, detecting its type from the input.
    pub fn set_attribute(&mut self, key: &str, value: impl Into<AttributeInput>) -> &mut Self {
        let value = value.into();
        let result = AttributeKey::new(key).and_then(|key| Ok((key, detect(value)?)));
        self.record("set_attribute", result.map(|(key, value)| Operation::SetAttribute { key, value }))
    }

    /// Set an attribute with an explicit type, coercing the input.
    pub fn set_typed_attribute(
        &mut self,
        key: &str,
        value: impl Into<AttributeInput>,
        attr_type: AttributeType,
    ) -> &mut Self {
        let value = value.into();
        let result =
            AttributeKey::new(key).and_then(|key| Ok((key, coerce(value, attr_type)?)));
        self.record(
            "set_typed_attribute",
            result.map(|(key, value)| Operation::SetAttribute { key, value }),
        )
    }

    pub fn remove_attribute(&mut self, key: &str) -> &mut Self {
        let result = AttributeKey::new(key).map(|key| Operation::RemoveAttribute { key });
        self.record("remove_attribute", result)
    }

    pub fn add_to_array<I, S>(&mut self, key: &str, values: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let result = AttributeKey::new(key)
            .and_then(|key| Ok((key, normalize_items(values)?)))
            .map(|(key, values)| Operation::AddToArray { key, values });
        self.record("add_to_array", result)
    }

    pub fn remove_from_array<I, S>(&mut self, key: &str, values: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let result = AttributeKey::new(key)
            .and_then(|key| Ok((key, normalize_items(values)?)))
            .map(|(key, values)| Operation::RemoveFromArray { key, values });
        self.record("remove_from_array", result)
    }

    pub fn set_language(&mut self, language: Option<&str>) -> &mut Self {
        let result = optional_text(language, MAX_LOCALE_LENGTH, "Language").map(Operation::SetLanguage);
        self.record("set_language", result)
    }

    pub fn set_region(&mut self, region: Option<&str>) -> &mut Self {
        let result = optional_text(region, MAX_LOCALE_LENGTH, "Region").map(Operation::SetRegion);
        self.record("set_region", result)
    }

    pub fn set_email(&mut self, email: Option<&str>) -> &mut Self {
        let result = optional_text(email, MAX_EMAIL_LENGTH, "Email").and_then(|email| {
            match &email {
                Some(address) if !address.contains('@') => Err(Error::InvalidInput(format!(
                    "'{}' is not an email address",
                    address
                ))),
                _ => Ok(Operation::SetEmail(email)),
            }
        });
        self.record("set_email", result)
    }

    pub fn set_email_marketing(&mut self, state: Option<EmailMarketing>) -> &mut Self {
        self.record("set_email_marketing", Ok(Operation::SetEmailMarketing(state)))
    }

    pub fn add_tag(&mut self, collection: &str, tag: &str) -> &mut Self {
        let result = TagCollection::new(collection)
            .and_then(|collection| Ok((collection, normalize_item(tag)?)))
            .map(|(collection, tag)| Operation::AddTag { collection, tag });
        self.record("add_tag", result)
    }

    pub fn remove_tag(&mut self, collection: &str, tag: &str) -> &mut Self {
        let result = TagCollection::new(collection)
            .and_then(|collection| Ok((collection, normalize_item(tag)?)))
            .map(|(collection, tag)| Operation::RemoveTag { collection, tag });
        self.record("remove_tag", result)
    }

    pub fn clear_tag_collection(&mut self, collection: &str) -> &mut Self {
        let result = TagCollection::new(collection).map(Operation::ClearTagCollection);
        self.record("clear_tag_collection", result)
    }

    pub fn clear_tags(&mut self) -> &mut Self {
        self.record("clear_tags", Ok(Operation::ClearTags))
    }

    fn record(&mut self, call: &str, operation: Result<Operation>) -> &mut Self {
        match operation {
            Ok(operation) => self.operations.push(operation),
            Err(e) => warn!("Ignoring {}: {}", call, e),
        }
        self
    }
}

/// Type detection for untyped input.
fn detect(input: AttributeInput) -> Result<AttributeValue> {
    match input {
        AttributeInput::Url(url) => url_value(url.as_str()),
        AttributeInput::Text(text) => string_value(text),
        AttributeInput::Date(date) => Ok(AttributeValue::new(
            AttributeType::Date,
            AttributeData::Date(date.timestamp_millis()),
        )),
        AttributeInput::Number(n) => {
            let n = finite(n)?;
            if n.fract() == 0.0 {
                integer_value(n)
            } else {
                Ok(AttributeValue::new(AttributeType::Float, AttributeData::Float(n)))
            }
        }
        AttributeInput::Bool(b) => Ok(AttributeValue::new(
            AttributeType::Boolean,
            AttributeData::Bool(b),
        )),
        AttributeInput::StringArray(items) => Ok(AttributeValue::new(
            AttributeType::Array,
            AttributeData::Array(normalize_items(items)?),
        )),
    }
}

/// Coercion for explicitly typed input.
fn coerce(input: AttributeInput, attr_type: AttributeType) -> Result<AttributeValue> {
    match (attr_type, input) {
        (AttributeType::String, AttributeInput::Text(text)) => string_value(text),
        (AttributeType::String, AttributeInput::Number(n)) => string_value(number_to_string(finite(n)?)),
        (AttributeType::Integer, AttributeInput::Number(n)) => integer_value(finite(n)?.ceil()),
        (AttributeType::Integer, AttributeInput::Text(text)) => {
            integer_value(parse_number(&text)?.ceil())
        }
        (AttributeType::Float, AttributeInput::Number(n)) => Ok(AttributeValue::new(
            AttributeType::Float,
            AttributeData::Float(finite(n)?),
        )),
        (AttributeType::Float, AttributeInput::Text(text)) => Ok(AttributeValue::new(
            AttributeType::Float,
            AttributeData::Float(parse_number(&text)?),
        )),
        (AttributeType::Boolean, AttributeInput::Bool(b)) => Ok(AttributeValue::new(
            AttributeType::Boolean,
            AttributeData::Bool(b),
        )),
        (AttributeType::Boolean, AttributeInput::Number(n)) => Ok(AttributeValue::new(
            AttributeType::Boolean,
            AttributeData::Bool(finite(n)? != 0.0),
        )),
        (AttributeType::Date, AttributeInput::Date(date)) => Ok(AttributeValue::new(
            AttributeType::Date,
            AttributeData::Date(date.timestamp_millis()),
        )),
        (AttributeType::Date, AttributeInput::Number(n)) => Ok(AttributeValue::new(
            AttributeType::Date,
            AttributeData::Date(to_i64(finite(n)?.trunc())?),
        )),
        (AttributeType::Url, AttributeInput::Url(url)) => url_value(url.as_str()),
        (AttributeType::Url, AttributeInput::Text(text)) => {
            let url = Url::parse(&text)
                .map_err(|e| Error::InvalidInput(format!("'{}' is not a URL: {}", text, e)))?;
            url_value(url.as_str())
        }
        (AttributeType::Array, AttributeInput::StringArray(items)) => Ok(AttributeValue::new(
            AttributeType::Array,
            AttributeData::Array(normalize_items(items)?),
        )),
        (attr_type, input) => Err(Error::InvalidInput(format!(
            "Cannot coerce {:?} to {:?}",
            input, attr_type
        ))),
    }
}

fn finite(n: f64) -> Result<f64> {
    if n.is_finite() {
        Ok(n)
    } else {
        Err(Error::InvalidInput(format!("{} is not a finite number", n)))
    }
}

fn to_i64(n: f64) -> Result<i64> {
    // i64::MAX is not representable as f64; compare against 2^63.
    if n >= -9_223_372_036_854_775_808.0 && n < 9_223_372_036_854_775_808.0 {
        Ok(n as i64)
    } else {
        Err(Error::InvalidInput(format!("{} does not fit an integer", n)))
    }
}

fn parse_number(text: &str) -> Result<f64> {
    let n: f64 = text
        .trim()
        .parse()
        .map_err(|_| Error::InvalidInput(format!("'{}' is not a number", text)))?;
    finite(n)
}

fn number_to_string(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

fn integer_value(n: f64) -> Result<AttributeValue> {
    Ok(AttributeValue::new(
        AttributeType::Integer,
        AttributeData::Integer(to_i64(n)?),
    ))
}

fn string_value(text: String) -> Result<AttributeValue> {
    if text.chars().count() > MAX_STRING_LENGTH {
        return Err(Error::InvalidInput(format!(
            "String value is longer than {} characters",
            MAX_STRING_LENGTH
        )));
    }
    Ok(AttributeValue::new(AttributeType::String, AttributeData::Text(text)))
}

fn url_value(url: &str) -> Result<AttributeValue> {
    if url.len() > MAX_URL_LENGTH {
        return Err(Error::InvalidInput(format!(
            "URL is longer than {} characters",
            MAX_URL_LENGTH
        )));
    }
    Ok(AttributeValue::new(
        AttributeType::Url,
        AttributeData::Text(url.to_string()),
    ))
}

fn normalize_item(item: &str) -> Result<String> {
    if item.is_empty() {
        return Err(Error::InvalidInput("Array items cannot be empty".to_string()));
    }
    if item.chars().count() > MAX_ARRAY_ITEM_LENGTH {
        return Err(Error::InvalidInput(format!(
            "Array item '{}' is longer than {} characters",
            item, MAX_ARRAY_ITEM_LENGTH
        )));
    }
    Ok(item.to_lowercase())
}

fn normalize_items<I, S>(items: I) -> Result<BTreeSet<String>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    items
        .into_iter()
        .map(|item| normalize_item(item.as_ref()))
        .collect()
}

fn optional_text(value: Option<&str>, max: usize, what: &str) -> Result<Option<String>> {
    match value {
        None => Ok(None),
        Some(text) if text.trim().is_empty() => {
            Err(Error::InvalidInput(format!("{} cannot be empty", what)))
        }
        Some(text) if text.chars().count() > max => Err(Error::InvalidInput(format!(
            "{} is longer than {} characters",
            what, max
        ))),
        Some(text) => Ok(Some(text.to_string())),
    }
}
