//! Inbound response parsing.
//!
//! Responses arrive as a single object or an array of objects:
//!
//! ```text
//! { "jobId": "<ulid>", "header": <any|absent>, "error": {"code": <int>, ...} | absent, ...result fields }
//! ```
//!
//! Result fields are opaque to the engine; the raw object is kept intact and
//! handed to callers.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::{ErrorCodes, JobId};

/// The `error` member of a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    #[serde(default)]
    pub code: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ResponseError {
    /// Interpret whatever the server put under `error`.
    ///
    /// Objects are read leniently (missing code is 0); any other non-null
    /// value becomes the message.
    fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Object(_) => Some(serde_json::from_value(value.clone()).unwrap_or(Self {
                code: 0,
                message: None,
                data: Some(value.clone()),
            })),
            Value::String(message) => Some(Self {
                code: 0,
                message: Some(message.clone()),
                data: None,
            }),
            other => Some(Self {
                code: 0,
                message: None,
                data: Some(other.clone()),
            }),
        }
    }
}

impl fmt::Display for ResponseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "code {}: {}", self.code, message),
            None => write!(f, "code {}", self.code),
        }
    }
}

/// A decoded inbound response.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    job_id: Option<JobId>,
    header: Option<Value>,
    error: Option<ResponseError>,
    raw: Value,
}

impl Response {
    pub fn from_value(raw: Value) -> Self {
        let job_id = JobId::from_json(&raw);
        let header = raw.get("header").filter(|h| !h.is_null()).cloned();
        let error = raw.get("error").and_then(ResponseError::from_json);
        Self {
            job_id,
            header,
            error,
            raw,
        }
    }

    /// Synthesize a `jobId`-less error response for a failed discrete round trip.
    pub(crate) fn synthetic_error(code: i64, message: impl Into<String>, data: Option<Value>) -> Value {
        let mut error = json!({ "code": code, "message": message.into() });
        if let Some(data) = data {
            error["data"] = data;
        }
        json!({ "error": error })
    }

    /// Decode the body of a discrete round trip.
    ///
    /// Non-JSON bodies and transport failures degrade into a synthetic error
    /// response so the dispatcher still receives something it can drop.
    pub(crate) fn decode_discrete<E: fmt::Display>(reply: Result<String, E>) -> Value {
        match reply {
            Ok(body) => serde_json::from_str(&body).unwrap_or_else(|e| {
                Self::synthetic_error(
                    ErrorCodes::PARSE_ERROR,
                    format!("invalid response body: {}", e),
                    Some(Value::String(body)),
                )
            }),
            Err(e) => Self::synthetic_error(ErrorCodes::TRANSPORT_ERROR, e.to_string(), None),
        }
    }

    pub fn job_id(&self) -> Option<JobId> {
        self.job_id
    }

    pub fn header(&self) -> Option<&Value> {
        self.header.as_ref()
    }

    pub fn error(&self) -> Option<&ResponseError> {
        self.error.as_ref()
    }

    /// True when this response ends a stream normally (error code 205).
    pub fn is_stream_complete(&self) -> bool {
        self.error
            .as_ref()
            .is_some_and(|e| e.code == ErrorCodes::STREAM_COMPLETE)
    }

    /// Look up a result field of the raw response.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.raw.get(key)
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }
}
