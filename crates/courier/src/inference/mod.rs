//! # Inference
//!
//! The boundary between the protocol and the model. A worker only ever sees
//! an [`InferenceAdapter`]: it hands over the request's `data` object and gets
//! back either the reply's `result` or an error whose text ends up in an error
//! reply.
//!
//! Adapters are synchronous and may block; the worker runs them on a blocking
//! thread.
//!
//! * [`classify::Classifier`] - text in, `{label, confidence}` out
//! * [`detect::Detector`] - image path in, `{image, labels}` out
//! * [`command::CommandAdapter`] - delegates to an external program over stdin/stdout
//!
//! Any `Fn(&Map<String, Value>) -> Result<Value, InferenceError>` closure is an
//! adapter too.

pub mod classify;
pub mod command;
pub mod detect;

use serde_json::{Map, Value};

/// Error returned by an adapter. Any error type will do; only its message is
/// sent back to the requester.
pub type InferenceError = Box<dyn std::error::Error + Send + Sync>;

/// A synchronous, possibly failing inference function.
///
/// The returned value becomes the reply's `result` and must be a JSON object.
/// Anything else is answered with an error reply.
pub trait InferenceAdapter: Send + Sync + 'static {
    fn infer(&self, data: &Map<String, Value>) -> Result<Value, InferenceError>;
}

impl<F> InferenceAdapter for F
where
    F: Fn(&Map<String, Value>) -> Result<Value, InferenceError> + Send + Sync + 'static,
{
    fn infer(&self, data: &Map<String, Value>) -> Result<Value, InferenceError> {
        self(data)
    }
}

/// Reads a required string field from a request's `data`.
pub(crate) fn required_str<'a>(data: &'a Map<String, Value>, key: &str) -> Result<&'a str, InferenceError> {
    match data.get(key) {
        Some(Value::String(value)) => Ok(value),
        Some(other) => Err(format!("field `{key}` must be a string, got {other}").into()),
        None => Err(format!("missing field `{key}`").into()),
    }
}
