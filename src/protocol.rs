//! Response envelope wire format and the string <-> bytes codec.
//!
//! Every response crosses the boundary as encoded JSON:
//! `{ "ok"?: <any>, "err"?: { "message": <string> }, "promiseId"?: <integer> }`
//! with exactly one of `ok` / `err`. `promiseId` is present only on completions
//! of asynchronous calls.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::constants::PromiseId;
use crate::error::{BridgeError, ProtocolViolation};

const KEY_OK: &str = "ok";
const KEY_ERR: &str = "err";
const KEY_PROMISE_ID: &str = "promiseId";

/// String <-> bytes conversion supplied by the host.
pub trait Codec {
    fn encode(&self, text: &str) -> Vec<u8>;
    fn decode<'a>(&self, bytes: &'a [u8]) -> Result<Cow<'a, str>, ProtocolViolation>;
}

/// Plain UTF-8. Decoding borrows when the bytes are valid.
#[derive(Debug, Clone, Copy, Default)]
pub struct Utf8Codec;

impl Codec for Utf8Codec {
    fn encode(&self, text: &str) -> Vec<u8> {
        text.as_bytes().to_vec()
    }

    fn decode<'a>(&self, bytes: &'a [u8]) -> Result<Cow<'a, str>, ProtocolViolation> {
        std::str::from_utf8(bytes)
            .map(Cow::Borrowed)
            .map_err(|e| ProtocolViolation::MalformedEnvelope(format!("not UTF-8: {e}")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDescriptor {
    pub message: String,
}

/// Success value or error descriptor. `Ok(Value::Null)` is a real success.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Ok(Value),
    Err(ErrorDescriptor),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub outcome: Outcome,
    pub promise_id: Option<PromiseId>,
}

impl Envelope {
    pub fn ok(value: Value) -> Self {
        Self {
            outcome: Outcome::Ok(value),
            promise_id: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Err(ErrorDescriptor {
                message: message.into(),
            }),
            promise_id: None,
        }
    }

    pub fn with_promise_id(mut self, promise_id: PromiseId) -> Self {
        self.promise_id = Some(promise_id);
        self
    }

    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        match &self.outcome {
            Outcome::Ok(value) => {
                map.insert(KEY_OK.to_string(), value.clone());
            }
            Outcome::Err(descriptor) => {
                let mut err = Map::new();
                err.insert("message".to_string(), Value::from(descriptor.message.clone()));
                map.insert(KEY_ERR.to_string(), Value::Object(err));
            }
        }
        if let Some(id) = self.promise_id {
            map.insert(KEY_PROMISE_ID.to_string(), Value::from(id));
        }
        Value::Object(map)
    }

    /// Validate a parsed JSON value as an envelope. Unknown keys are ignored;
    /// an explicit `"err": null` counts as absent.
    pub fn from_value(value: Value) -> Result<Self, ProtocolViolation> {
        let Value::Object(mut map) = value else {
            return Err(ProtocolViolation::MalformedEnvelope(
                "envelope is not a JSON object".to_string(),
            ));
        };

        let promise_id = match map.remove(KEY_PROMISE_ID) {
            None | Some(Value::Null) => None,
            Some(v) => Some(v.as_u64().ok_or_else(|| {
                ProtocolViolation::MalformedEnvelope(format!(
                    "promiseId {v} is not a non-negative integer"
                ))
            })?),
        };

        let err = match map.remove(KEY_ERR) {
            None | Some(Value::Null) => None,
            Some(v) => Some(serde_json::from_value::<ErrorDescriptor>(v).map_err(|e| {
                ProtocolViolation::MalformedEnvelope(format!("bad error descriptor: {e}"))
            })?),
        };

        let outcome = match (map.remove(KEY_OK), err) {
            (Some(_), Some(_)) => {
                return Err(ProtocolViolation::MalformedEnvelope(
                    "both ok and err are present".to_string(),
                ));
            }
            (None, None) => {
                return Err(ProtocolViolation::MalformedEnvelope(
                    "neither ok nor err is present".to_string(),
                ));
            }
            (Some(value), None) => Outcome::Ok(value),
            (None, Some(descriptor)) => Outcome::Err(descriptor),
        };

        Ok(Self {
            outcome,
            promise_id,
        })
    }

    /// An error descriptor always raises; a success value is returned as-is.
    pub fn unwrap_response(self) -> Result<Value, BridgeError> {
        match self.outcome {
            Outcome::Ok(value) => Ok(value),
            Outcome::Err(ErrorDescriptor { message }) => Err(BridgeError::Application { message }),
        }
    }
}

pub fn encode_value(codec: &dyn Codec, value: &Value) -> Vec<u8> {
    codec.encode(&value.to_string())
}

pub fn encode_envelope(codec: &dyn Codec, envelope: &Envelope) -> Vec<u8> {
    encode_value(codec, &envelope.to_value())
}

pub fn decode_value(codec: &dyn Codec, bytes: &[u8]) -> Result<Value, ProtocolViolation> {
    let text = codec.decode(bytes)?;
    serde_json::from_str(&text)
        .map_err(|e| ProtocolViolation::MalformedEnvelope(format!("invalid JSON: {e}")))
}

pub fn decode_envelope(codec: &dyn Codec, bytes: &[u8]) -> Result<Envelope, ProtocolViolation> {
    Envelope::from_value(decode_value(codec, bytes)?)
}
