//! Error codes carried in response `error.code`.

/// Reserved and engine-synthesized error codes.
pub struct ErrorCodes;

impl ErrorCodes {
    /// Server-signaled graceful end of a stream. Terminal for STREAM jobs only.
    pub const STREAM_COMPLETE: i64 = 205;

    /// Discrete reply body was not valid JSON (JSON-RPC reserved).
    pub const PARSE_ERROR: i64 = -32700;

    /// Discrete round trip failed before a body was received.
    pub const TRANSPORT_ERROR: i64 = -32000;
}
