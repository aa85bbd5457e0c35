//! Transport seams used by the engine.
//!
//! The engine talks to two kinds of transport:
//!
//! - a bidirectional, push-capable channel opened through a [`DuplexConnector`]
//!   and driven through a [`DuplexLink`];
//! - a discrete request/response channel, [`DiscreteTransport`], used whenever
//!   the bidirectional link is not connected.
//!
//! ## Module Structure
//!
//! - `websocket` - tokio-tungstenite connector
//! - `http` - reqwest POST transport
//! - `memory` - in-process transports driven by tests or embedders

pub mod http;
pub mod memory;
pub mod websocket;

use std::collections::BTreeMap;
use std::future::Future;

use thiserror::Error;
use tokio::sync::mpsc;

pub use http::HttpTransport;
pub use websocket::WebSocketConnector;

/// Transport-level failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Opening the bidirectional transport failed
    #[error("connect failed: {0}")]
    Connect(String),

    /// The peer refused the connection
    #[error("connection refused")]
    Refused,

    /// A discrete round trip failed before a body was received
    #[error("request failed: {0}")]
    Request(String),

    /// The link or exchange was torn down
    #[error("transport closed")]
    Closed,
}

/// Why the engine closes a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Too many transport errors in one health window
    Unstable,
    /// The caller asked for a fresh connection
    Reconnect,
    /// A link from an attempt that is no longer current
    Superseded,
    /// The engine is shutting down
    Shutdown,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Unstable => "unstable",
            CloseReason::Reconnect => "reconnect",
            CloseReason::Superseded => "superseded",
            CloseReason::Shutdown => "shutdown",
        }
    }
}

/// Command from the engine to an open link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkCommand {
    /// Write one text frame
    Send(String),
    /// Close the link
    Close(CloseReason),
}

/// Event from an open link to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// One inbound text frame
    Message(String),
    /// Non-fatal transport error, counted by the health monitor
    Error(String),
    /// The link is gone
    Closed,
}

/// An open bidirectional link.
///
/// Created by a [`DuplexConnector`] once the transport is open. The engine
/// owns it exclusively.
#[derive(Debug)]
pub struct DuplexLink {
    commands: mpsc::UnboundedSender<LinkCommand>,
    events: mpsc::UnboundedReceiver<LinkEvent>,
}

impl DuplexLink {
    pub fn new(
        commands: mpsc::UnboundedSender<LinkCommand>,
        events: mpsc::UnboundedReceiver<LinkEvent>,
    ) -> Self {
        Self { commands, events }
    }

    pub(crate) fn into_parts(
        self,
    ) -> (
        mpsc::UnboundedSender<LinkCommand>,
        mpsc::UnboundedReceiver<LinkEvent>,
    ) {
        (self.commands, self.events)
    }
}

/// Opens the bidirectional transport.
pub trait DuplexConnector: Send + Sync + 'static {
    /// Start opening a link.
    ///
    /// Resolves to the open link, or to an error if the transport failed while
    /// connecting.
    fn connect(&self) -> impl Future<Output = Result<DuplexLink, TransportError>> + Send + 'static;
}

/// One discrete request: the serialized envelope group plus HTTP-style headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscreteRequest {
    pub body: String,
    pub headers: BTreeMap<String, String>,
}

/// Request/response transport with no server push.
pub trait DiscreteTransport: Send + Sync + 'static {
    /// Hand one request to the transport.
    ///
    /// The hand-off happens when this is called; the returned future only
    /// waits for the response body.
    fn exchange(
        &self,
        request: DiscreteRequest,
    ) -> impl Future<Output = Result<String, TransportError>> + Send + 'static;
}
