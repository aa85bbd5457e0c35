//! Client-generated identifiers for jobs and batches.
//!
//! Both identifiers are ULIDs generated on the client, so an envelope carries a
//! valid identity even when it was built before any connection existed.

use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Identifier correlating an envelope with the response(s) it produces.
///
/// Serialized as the canonical 26-character ULID string in the `jobId` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobId(Ulid);

impl JobId {
    /// Generate a fresh, collision-negligible job id.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Extract the `jobId` of an inbound message.
    ///
    /// Returns `None` when the field is missing, not a string, or not a ULID.
    pub fn from_json(message: &serde_json::Value) -> Option<Self> {
        let raw = message.get("jobId")?.as_str()?;
        Ulid::from_string(raw).ok().map(Self)
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for JobId {
    type Error = ulid::DecodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Ulid::from_string(&value).map(Self)
    }
}

impl From<JobId> for String {
    fn from(id: JobId) -> Self {
        id.0.to_string()
    }
}

/// Identifier of the set of jobs issued by one `call` / `streamrx` invocation.
///
/// Never leaves the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BatchId(Ulid);

impl BatchId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
