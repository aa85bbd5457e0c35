//! Wire types for the call/stream protocol.
//!
//! ## Module Structure
//!
//! - `job_id` - JobId and BatchId identifiers generated client-side
//! - `envelope` - Outbound request envelope (`CALL` / `STREAM`)
//! - `response` - Inbound response parsing
//! - `error_codes` - Reserved and synthetic error codes

mod envelope;
mod error_codes;
mod job_id;
mod response;

pub use envelope::{Envelope, JobKind, PROTOCOL_VERSION};
pub use error_codes::ErrorCodes;
pub use job_id::{BatchId, JobId};
pub use response::{Response, ResponseError};
