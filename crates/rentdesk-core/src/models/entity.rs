//! Entity and payload models
//!
//! Entities are schemaless JSON objects: the sync layer only cares about their
//! `id` and their last-update timestamp, everything else is opaque business data.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

use super::DatasetKind;

const ID_KEY: &str = "id";
const LAST_UPDATED_KEY: &str = "last_updated";

/// Keys accepted as the per-entity update timestamp, in lookup order.
const LAST_UPDATED_KEYS: [&str; 3] = [LAST_UPDATED_KEY, "lastUpdated", "updated_at"];

/// A single record inside a dataset (one reservation, one cleaning task, ...)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Entity(Map<String, Value>);

impl Entity {
    /// Create an empty entity
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stable identifier, if the entity has one.
    ///
    /// Numeric ids are rendered as strings so `5` and `"5"` name the same record.
    #[must_use]
    pub fn id(&self) -> Option<String> {
        match self.0.get(ID_KEY)? {
            Value::String(id) if !id.trim().is_empty() => Some(id.clone()),
            Value::Number(id) => Some(id.to_string()),
            _ => None,
        }
    }

    /// Per-entity last-update timestamp in Unix ms.
    ///
    /// Accepts integer milliseconds or RFC 3339 strings.
    #[must_use]
    pub fn last_updated(&self) -> Option<i64> {
        LAST_UPDATED_KEYS
            .iter()
            .find_map(|key| self.0.get(*key))
            .and_then(|value| match value {
                Value::Number(number) => number.as_i64(),
                Value::String(text) => chrono::DateTime::parse_from_rfc3339(text)
                    .ok()
                    .map(|timestamp| timestamp.timestamp_millis()),
                _ => None,
            })
    }

    /// Set the `id` field
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.0.insert(ID_KEY.to_string(), Value::String(id.into()));
        self
    }

    /// Set the `last_updated` field
    #[must_use]
    pub fn with_last_updated(mut self, last_updated: i64) -> Self {
        self.0
            .insert(LAST_UPDATED_KEY.to_string(), Value::from(last_updated));
        self
    }

    /// Set an arbitrary field
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Read an arbitrary field
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Borrow the underlying JSON object
    #[must_use]
    pub const fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Convert into a JSON value
    #[must_use]
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for Entity {
    fn from(value: Map<String, Value>) -> Self {
        Self(value)
    }
}

impl TryFrom<Value> for Entity {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(Error::InvalidInput(format!(
                "expected a JSON object, got {}",
                json_type_name(&other)
            ))),
        }
    }
}

/// Data carried by an envelope: a collection for most datasets, one object for singletons
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", content = "data", rename_all = "snake_case")]
pub enum Payload {
    Collection(Vec<Entity>),
    Single(Entity),
}

impl Payload {
    /// Parse raw JSON into the payload shape expected for `kind`.
    ///
    /// Collection datasets require an array of objects; singleton datasets
    /// require a single object.
    pub fn from_json(kind: DatasetKind, value: Value) -> Result<Self> {
        if kind.is_collection() {
            let Value::Array(items) = value else {
                return Err(Error::InvalidInput(format!(
                    "{kind} expects a JSON array, got {}",
                    json_type_name(&value)
                )));
            };
            items
                .into_iter()
                .map(Entity::try_from)
                .collect::<Result<Vec<_>>>()
                .map(Self::Collection)
        } else {
            match value {
                Value::Object(map) => Ok(Self::Single(Entity(map))),
                other => Err(Error::InvalidInput(format!(
                    "{kind} expects a JSON object, got {}",
                    json_type_name(&other)
                ))),
            }
        }
    }

    /// Whether this payload has the shape `kind` expects
    #[must_use]
    pub const fn matches(&self, kind: DatasetKind) -> bool {
        matches!(
            (self, kind.is_collection()),
            (Self::Collection(_), true) | (Self::Single(_), false)
        )
    }

    /// Borrow the entities (a singleton yields one)
    #[must_use]
    pub fn entities(&self) -> &[Entity] {
        match self {
            Self::Collection(items) => items,
            Self::Single(entity) => std::slice::from_ref(entity),
        }
    }

    /// Number of entities
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities().len()
    }

    /// Whether there are no entities
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities().is_empty()
    }

    /// Render back to plain JSON (array or object)
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Collection(items) => Value::Array(
                items
                    .iter()
                    .map(|entity| Value::Object(entity.0.clone()))
                    .collect(),
            ),
            Self::Single(entity) => Value::Object(entity.0.clone()),
        }
    }
}

pub(crate) const fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
