//! The flat JSON envelope exchanged over the connection.
//!
//! An envelope is a single JSON object. Three keys are reserved:
//!
//! | key | type | meaning |
//! |-----|------|---------|
//! | `eventType` | string | message kind, compared through [`normalize`](crate::websocket::normalize) |
//! | `requestId` | string | correlation token for request/response pairs |
//! | `error` | string | non-empty value marks a failed request |
//!
//! Every other key is caller payload and lives at the same level.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};

use crate::error::{TransportError, TransportResult};

/// Reserved key naming the message kind.
pub const EVENT_TYPE_KEY: &str = "eventType";
/// Reserved key carrying the correlation token.
pub const REQUEST_ID_KEY: &str = "requestId";
/// Reserved key signalling a failed request.
pub const ERROR_KEY: &str = "error";

/// A flat key/value message.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Envelope(Map<String, Value>);

impl Envelope {
    /// Create an envelope with the given `eventType`.
    pub fn new(event_type: impl Into<String>) -> Self {
        let mut map = Map::new();
        map.insert(EVENT_TYPE_KEY.to_string(), Value::String(event_type.into()));
        Self(map)
    }

    /// Wrap an existing JSON object.
    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Serialize any value into an envelope. The value must serialize to a JSON object.
    pub fn from_serialize<T: Serialize>(value: &T) -> TransportResult<Self> {
        match serde_json::to_value(value)? {
            Value::Object(map) => Ok(Self(map)),
            other => Err(TransportError::malformed(format!(
                "envelope must be a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// Parse an inbound text frame.
    pub fn parse(text: &str) -> TransportResult<Self> {
        match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => Ok(Self(map)),
            Ok(other) => Err(TransportError::malformed(format!(
                "expected a JSON object, got {}",
                json_kind(&other)
            ))),
            Err(e) => Err(TransportError::malformed(e.to_string())),
        }
    }

    /// Deserialize the whole envelope into a typed value.
    pub fn to_typed<T: DeserializeOwned>(&self) -> TransportResult<T> {
        Ok(serde_json::from_value(Value::Object(self.0.clone()))?)
    }

    /// The `eventType`, if present and a string.
    pub fn event_type(&self) -> Option<&str> {
        self.get_str(EVENT_TYPE_KEY)
    }

    /// The `requestId`, if present, a string and non-empty.
    pub fn request_id(&self) -> Option<&str> {
        self.get_str(REQUEST_ID_KEY).filter(|id| !id.is_empty())
    }

    /// The `error` field, if present, a string and non-empty.
    pub fn error(&self) -> Option<&str> {
        self.get_str(ERROR_KEY).filter(|e| !e.is_empty())
    }

    /// Set the `requestId`.
    pub fn set_request_id(&mut self, request_id: impl Into<String>) {
        self.0
            .insert(REQUEST_ID_KEY.to_string(), Value::String(request_id.into()));
    }

    /// Builder form of [`Envelope::set_request_id`].
    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.set_request_id(request_id);
        self
    }

    /// Builder form of [`Envelope::insert`].
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert a payload field, returning the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    /// Look up any field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Look up a string field.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Borrow the underlying object.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Consume into the underlying object.
    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    /// Render as compact JSON text for the wire.
    pub fn to_text(&self) -> String {
        Value::Object(self.0.clone()).to_string()
    }
}

impl From<Map<String, Value>> for Envelope {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
