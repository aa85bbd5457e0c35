//! Outbound request envelope.

use serde::Serialize;
use serde_json::Value;

use super::JobId;

/// Value of the `jsonrpc` field on every envelope.
pub const PROTOCOL_VERSION: &str = "2.0";

/// Operation mode of a job, serialized as the envelope `type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobKind {
    /// One-shot request/response.
    Call,
    /// Server-push stream, alive until a terminal response.
    Stream,
}

/// One serialized unit of a call or stream request.
///
/// Wire shape:
///
/// ```text
/// { "jsonrpc": "2.0", "jobId": "<ulid>", "type": "CALL"|"STREAM",
///   "method": "<string>", "params": <any>, "header": <any|absent> }
/// ```
///
/// Everything but `header` is fixed at construction; `header` is refreshed
/// from responses when a stream is re-issued over the discrete transport.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    #[serde(rename = "jsonrpc")]
    protocol_version: &'static str,
    #[serde(rename = "jobId")]
    job_id: JobId,
    #[serde(rename = "type")]
    kind: JobKind,
    method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    header: Option<Value>,
}

impl Envelope {
    pub fn new(
        kind: JobKind,
        method: impl Into<String>,
        params: Option<Value>,
        header: Option<Value>,
    ) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            job_id: JobId::new(),
            kind,
            method: method.into(),
            params,
            header,
        }
    }

    pub fn call(method: impl Into<String>, params: Option<Value>, header: Option<Value>) -> Self {
        Self::new(JobKind::Call, method, params, header)
    }

    pub fn stream(method: impl Into<String>, params: Option<Value>, header: Option<Value>) -> Self {
        Self::new(JobKind::Stream, method, params, header)
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn params(&self) -> Option<&Value> {
        self.params.as_ref()
    }

    pub fn header(&self) -> Option<&Value> {
        self.header.as_ref()
    }

    /// Replace the header with the one a response carried (absent clears it).
    pub(crate) fn refresh_header(&mut self, header: Option<Value>) {
        self.header = header;
    }

    /// Serialize a group of envelopes as one payload.
    ///
    /// A single envelope is written as an object, anything larger as an array.
    pub fn serialize_group(group: &[Envelope]) -> serde_json::Result<String> {
        match group {
            [single] => serde_json::to_string(single),
            many => serde_json::to_string(many),
        }
    }
}
