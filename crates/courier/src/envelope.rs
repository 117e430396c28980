//! # Envelopes
//!
//! JSON bodies exchanged over the broker. Routing information never lives in
//! the body; see [`crate::properties`] for that.
//!
//! ```text
//! request: {"data": {...}}
//! success: {"state": "success", "result": {...}}
//! error:   {"state": "error",   "result": {"Exception": "..."}}
//! ```
//!
//! Encoding goes through `serde_json`, which writes non-ASCII characters
//! as-is rather than escaping them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use crate::error::EnvelopeError;

/// Key under which an error reply carries its failure text.
pub const EXCEPTION_KEY: &str = "Exception";

/// A job request. `data` is opaque to the protocol but must be an object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub data: Map<String, Value>,
}

impl RequestEnvelope {
    pub fn new(data: Map<String, Value>) -> Self {
        Self { data }
    }

    /// Builds a request from an arbitrary JSON value, which must be an object.
    pub fn from_value(data: Value) -> Result<Self, EnvelopeError> {
        Ok(Self { data: serde_json::from_value(data)? })
    }

    pub fn encode(&self) -> Result<Vec<u8>, EnvelopeError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes a request body. A missing or non-object `data` is an error.
    pub fn decode(body: &[u8]) -> Result<Self, EnvelopeError> {
        Ok(serde_json::from_slice(body)?)
    }
}

/// Outcome marker carried in every reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyState {
    Success,
    Error,
}

/// A job reply, either a success carrying job-specific fields or an error
/// carrying the failure text under [`EXCEPTION_KEY`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyEnvelope {
    pub state: ReplyState,
    pub result: Value,
}

impl ReplyEnvelope {
    pub fn success(result: Value) -> Self {
        Self {
            state: ReplyState::Success,
            result,
        }
    }

    /// Builds an error reply from anything printable.
    pub fn error(failure: impl ToString) -> Self {
        let mut result = Map::new();
        result.insert(EXCEPTION_KEY.to_string(), Value::String(failure.to_string()));
        Self {
            state: ReplyState::Error,
            result: Value::Object(result),
        }
    }

    pub fn is_success(&self) -> bool {
        self.state == ReplyState::Success
    }

    /// Returns the failure text of an error reply.
    pub fn exception(&self) -> Option<&str> {
        match self.state {
            ReplyState::Success => None,
            ReplyState::Error => self.result.get(EXCEPTION_KEY).and_then(Value::as_str),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, EnvelopeError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(body: &[u8]) -> Result<Self, EnvelopeError> {
        Ok(serde_json::from_slice(body)?)
    }
}
