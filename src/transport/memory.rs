//! In-process transports.
//!
//! [`memory_duplex`] and [`memory_discrete`] return a client half, handed to the
//! engine, and a server half that lets the caller play the remote end: accept
//! or refuse connections, read frames, push responses, inject errors, and
//! answer discrete exchanges.

use std::future::Future;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use super::{
    CloseReason, DiscreteRequest, DiscreteTransport, DuplexConnector, DuplexLink, LinkCommand, LinkEvent,
    TransportError,
};

#[derive(Default)]
struct ConnectorScript {
    refuse_remaining: usize,
    attempts: Vec<Instant>,
}

/// Client half of an in-memory bidirectional transport.
pub struct MemoryConnector {
    script: Arc<Mutex<ConnectorScript>>,
    peers: mpsc::UnboundedSender<MemoryPeer>,
}

/// Server half of an in-memory bidirectional transport.
pub struct MemoryServer {
    script: Arc<Mutex<ConnectorScript>>,
    peers: mpsc::UnboundedReceiver<MemoryPeer>,
}

/// Create a connected in-memory connector/server pair.
pub fn memory_duplex() -> (MemoryConnector, MemoryServer) {
    let script = Arc::new(Mutex::new(ConnectorScript::default()));
    let (tx, rx) = mpsc::unbounded_channel();
    (
        MemoryConnector {
            script: Arc::clone(&script),
            peers: tx,
        },
        MemoryServer { script, peers: rx },
    )
}

impl DuplexConnector for MemoryConnector {
    fn connect(&self) -> impl Future<Output = Result<DuplexLink, TransportError>> + Send + 'static {
        let refused = {
            let mut script = self.script.lock().unwrap_or_else(|e| e.into_inner());
            script.attempts.push(Instant::now());
            if script.refuse_remaining > 0 {
                script.refuse_remaining -= 1;
                true
            } else {
                false
            }
        };

        let result = if refused {
            Err(TransportError::Refused)
        } else {
            let (command_tx, command_rx) = mpsc::unbounded_channel();
            let (event_tx, event_rx) = mpsc::unbounded_channel();
            let peer = MemoryPeer {
                frames: command_rx,
                events: event_tx,
                close_reason: None,
            };
            match self.peers.send(peer) {
                Ok(()) => Ok(DuplexLink::new(command_tx, event_rx)),
                Err(_) => Err(TransportError::Refused),
            }
        };
        std::future::ready(result)
    }
}

impl MemoryServer {
    /// Refuse the next `count` connection attempts.
    pub fn refuse_next(&self, count: usize) {
        let mut script = self.script.lock().unwrap_or_else(|e| e.into_inner());
        script.refuse_remaining = count;
    }

    /// Instants at which connection attempts were made, oldest first.
    pub fn attempts(&self) -> Vec<Instant> {
        let script = self.script.lock().unwrap_or_else(|e| e.into_inner());
        script.attempts.clone()
    }

    /// Wait for the next accepted connection.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.peers.recv().await
    }
}

/// The remote end of one accepted in-memory link.
pub struct MemoryPeer {
    frames: mpsc::UnboundedReceiver<LinkCommand>,
    events: mpsc::UnboundedSender<LinkEvent>,
    close_reason: Option<CloseReason>,
}

impl MemoryPeer {
    /// Wait for the next frame the client sent, decoded as JSON.
    ///
    /// Returns `None` once the client closed the link.
    pub async fn recv_frame(&mut self) -> Option<Value> {
        loop {
            match self.frames.recv().await? {
                LinkCommand::Send(text) => match serde_json::from_str(&text) {
                    Ok(value) => return Some(value),
                    Err(_) => continue,
                },
                LinkCommand::Close(reason) => {
                    self.close_reason = Some(reason);
                    return None;
                }
            }
        }
    }

    /// Next frame if one is already buffered.
    pub fn try_recv_frame(&mut self) -> Option<Value> {
        match self.frames.try_recv().ok()? {
            LinkCommand::Send(text) => serde_json::from_str(&text).ok(),
            LinkCommand::Close(reason) => {
                self.close_reason = Some(reason);
                None
            }
        }
    }

    /// Why the client closed the link, once its close command was read.
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason
    }

    /// Stop reading frames; further client writes fail while the link stays
    /// open for pushes.
    pub fn stop_reading(&mut self) {
        self.frames.close();
    }

    /// Push a message to the client.
    pub fn push(&self, message: Value) {
        let _ = self.events.send(LinkEvent::Message(message.to_string()));
    }

    /// Push raw text to the client.
    pub fn push_raw(&self, text: impl Into<String>) {
        let _ = self.events.send(LinkEvent::Message(text.into()));
    }

    /// Report a transport error to the client.
    pub fn error(&self, message: impl Into<String>) {
        let _ = self.events.send(LinkEvent::Error(message.into()));
    }

    /// Close the link from the server side.
    pub fn close(&self) {
        let _ = self.events.send(LinkEvent::Closed);
    }
}

/// Client half of an in-memory discrete transport.
pub struct MemoryDiscrete {
    exchanges: mpsc::UnboundedSender<PendingExchange>,
}

/// Server half of an in-memory discrete transport.
pub struct MemoryDiscreteServer {
    exchanges: mpsc::UnboundedReceiver<PendingExchange>,
}

/// Create a connected in-memory discrete transport pair.
pub fn memory_discrete() -> (MemoryDiscrete, MemoryDiscreteServer) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        MemoryDiscrete { exchanges: tx },
        MemoryDiscreteServer { exchanges: rx },
    )
}

impl DiscreteTransport for MemoryDiscrete {
    fn exchange(
        &self,
        request: DiscreteRequest,
    ) -> impl Future<Output = Result<String, TransportError>> + Send + 'static {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self.exchanges.send(PendingExchange {
            request,
            reply: reply_tx,
        });
        async move { reply_rx.await.unwrap_or(Err(TransportError::Closed)) }
    }
}

impl MemoryDiscreteServer {
    /// Wait for the next exchange handed to the transport.
    pub async fn next(&mut self) -> Option<PendingExchange> {
        self.exchanges.recv().await
    }

    /// Next exchange if one was already handed over.
    pub fn try_next(&mut self) -> Option<PendingExchange> {
        self.exchanges.try_recv().ok()
    }
}

/// A discrete request awaiting its response.
///
/// Dropping it without answering fails the exchange with
/// [`TransportError::Closed`].
pub struct PendingExchange {
    pub request: DiscreteRequest,
    reply: oneshot::Sender<Result<String, TransportError>>,
}

impl PendingExchange {
    /// The request body decoded as JSON (`Null` if it is not JSON).
    pub fn body(&self) -> Value {
        serde_json::from_str(&self.request.body).unwrap_or(Value::Null)
    }

    /// Answer with a JSON body.
    pub fn respond(self, body: Value) {
        let _ = self.reply.send(Ok(body.to_string()));
    }

    /// Answer with a raw body.
    pub fn respond_raw(self, body: impl Into<String>) {
        let _ = self.reply.send(Ok(body.into()));
    }

    /// Fail the round trip.
    pub fn fail(self, error: TransportError) {
        let _ = self.reply.send(Err(error));
    }
}
