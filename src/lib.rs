//! Client-side RPC engine with call and stream operations over a WebSocket,
//! falling back to HTTP round trips whenever the socket is unavailable.

pub mod client;
pub mod config;
mod engine;
pub mod error;
pub mod protocol;
pub mod sink;
pub mod transport;

pub use client::{CallRequest, Invocation, PendingCall, RpcClient, StreamReceiver, StreamRequest};
pub use config::{EngineSettings, RpcSettings, load_settings};
pub use engine::{ConnectionMode, ConnectionState};
pub use error::{RpcError, RpcResult};
pub use protocol::{Envelope, JobId, JobKind, Response, ResponseError};
pub use sink::{CallSink, StreamControl, StreamEvent, StreamSink};
