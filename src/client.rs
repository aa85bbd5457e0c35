//! Public client handle.
//!
//! [`RpcClient`] is a cheap, cloneable handle to one engine task. Requests are
//! described with [`CallRequest`] / [`StreamRequest`] builders; each produces
//! one envelope per [`Invocation`] and all envelopes of one request travel as
//! one batch.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::config::EngineSettings;
use crate::engine::{
    ConnectionMode, ConnectionState, EngineEvent, EngineHandle, InitialConnection, ResolverKind,
    Submission, spawn_engine,
};
use crate::error::{RpcError, RpcResult};
use crate::protocol::{Envelope, JobId, Response};
use crate::sink::{
    CallHooks, CallSink, CallbackStreamSink, ChannelStreamSink, StreamControl, StreamEvent,
    StreamSink,
};
use crate::transport::{DiscreteTransport, DuplexConnector, HttpTransport, WebSocketConnector};

/// One sub-request of a call or stream request.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    method: String,
    params: Option<Value>,
    header: Option<Value>,
}

impl Invocation {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            params: None,
            header: None,
        }
    }

    pub fn params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }

    pub fn header(mut self, header: Value) -> Self {
        self.header = Some(header);
        self
    }
}

/// Invocations shared by both request kinds.
///
/// Explicit `calls` come first and the flattened single `method`, if any, last.
#[derive(Debug, Clone, Default)]
struct Invocations {
    calls: Vec<Invocation>,
    method: Option<String>,
    params: Option<Value>,
    header: Option<Value>,
}

impl Invocations {
    fn into_envelopes(self, make: fn(String, Option<Value>, Option<Value>) -> Envelope) -> Vec<Envelope> {
        let flattened = self.method.map(|method| Invocation {
            method,
            params: self.params,
            header: self.header,
        });
        self.calls
            .into_iter()
            .chain(flattened)
            .map(|inv| make(inv.method, inv.params, inv.header))
            .collect()
    }
}

/// A `call` request: one or more one-shot invocations.
#[derive(Clone, Default)]
pub struct CallRequest {
    invocations: Invocations,
    hooks: CallHooks,
}

impl CallRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.invocations.method = Some(method.into());
        self
    }

    pub fn params(mut self, params: Value) -> Self {
        self.invocations.params = Some(params);
        self
    }

    pub fn header(mut self, header: Value) -> Self {
        self.invocations.header = Some(header);
        self
    }

    pub fn call(mut self, invocation: Invocation) -> Self {
        self.invocations.calls.push(invocation);
        self
    }

    pub fn calls(mut self, invocations: impl IntoIterator<Item = Invocation>) -> Self {
        self.invocations.calls.extend(invocations);
        self
    }

    /// Run on every successful response before its future settles.
    pub fn callback(mut self, callback: impl Fn(&Response) + Send + Sync + 'static) -> Self {
        self.hooks.on_success = Some(Arc::new(callback));
        self
    }

    /// Run on every error response before its future settles.
    pub fn catch_callback(mut self, callback: impl Fn(&Response) + Send + Sync + 'static) -> Self {
        self.hooks.on_error = Some(Arc::new(callback));
        self
    }
}

/// A `streamrx` request: one or more server-push invocations.
#[derive(Clone, Default)]
pub struct StreamRequest {
    invocations: Invocations,
    sink: CallbackStreamSink,
}

impl StreamRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.invocations.method = Some(method.into());
        self
    }

    pub fn params(mut self, params: Value) -> Self {
        self.invocations.params = Some(params);
        self
    }

    pub fn header(mut self, header: Value) -> Self {
        self.invocations.header = Some(header);
        self
    }

    pub fn call(mut self, invocation: Invocation) -> Self {
        self.invocations.calls.push(invocation);
        self
    }

    pub fn calls(mut self, invocations: impl IntoIterator<Item = Invocation>) -> Self {
        self.invocations.calls.extend(invocations);
        self
    }

    /// Run on every data response.
    pub fn callback(
        mut self,
        callback: impl Fn(&Response, &StreamControl) + Send + Sync + 'static,
    ) -> Self {
        self.sink.callback = Some(Arc::new(callback));
        self
    }

    /// Run on every non-terminal error response.
    pub fn catch_callback(mut self, callback: impl Fn(&Response) + Send + Sync + 'static) -> Self {
        self.sink.catch_callback = Some(Arc::new(callback));
        self
    }

    /// Run once with the terminal response of each stream.
    pub fn final_callback(mut self, callback: impl Fn(&Response) + Send + Sync + 'static) -> Self {
        self.sink.final_callback = Some(Arc::new(callback));
        self
    }
}

/// Future for the single response of one call.
///
/// Resolves to the response, to [`RpcError::Remote`] when it carried an
/// `error`, or to [`RpcError::EngineStopped`] if the engine went away first.
#[derive(Debug)]
pub struct PendingCall {
    job_id: JobId,
    rx: oneshot::Receiver<Result<Response, RpcError>>,
}

impl PendingCall {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }
}

impl Future for PendingCall {
    type Output = RpcResult<Response>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| Err(RpcError::EngineStopped)))
    }
}

/// Channel-backed view of a stream request.
///
/// Yields `None` once every stream of the request completed (or the engine
/// stopped).
#[derive(Debug)]
pub struct StreamReceiver {
    job_ids: Vec<JobId>,
    rx: mpsc::UnboundedReceiver<StreamEvent>,
}

impl StreamReceiver {
    pub fn job_ids(&self) -> &[JobId] {
        &self.job_ids
    }

    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }
}

/// Handle to an RPC engine.
///
/// Clones share the engine; it stops when the last clone is dropped.
#[derive(Clone)]
pub struct RpcClient {
    engine: Arc<EngineHandle>,
}

impl RpcClient {
    /// Start an engine over the given transports.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<C, D>(settings: &EngineSettings, connector: C, discrete: D) -> Self
    where
        C: DuplexConnector,
        D: DiscreteTransport,
    {
        Self {
            engine: Arc::new(spawn_engine(settings, connector, discrete)),
        }
    }

    /// Start an engine over WebSocket and HTTP, with URLs derived from `settings`.
    pub fn connect(settings: &EngineSettings) -> RpcResult<Self> {
        let discrete = HttpTransport::new(settings.http_url()?);
        let connector = WebSocketConnector::new(settings.websocket_url()?);
        Ok(Self::spawn(settings, connector, discrete))
    }

    /// Issue a call request; one future per invocation, `calls` first.
    pub fn call(&self, request: CallRequest) -> Vec<PendingCall> {
        let mut pending = Vec::new();
        self.call_to(request, |envelope| {
            let (tx, rx) = oneshot::channel();
            pending.push(PendingCall {
                job_id: envelope.job_id(),
                rx,
            });
            let sink: Box<dyn CallSink> = Box::new(tx);
            sink
        });
        pending
    }

    /// Issue a call request, settling each invocation through its own sink.
    pub fn call_to(
        &self,
        request: CallRequest,
        mut make_sink: impl FnMut(&Envelope) -> Box<dyn CallSink>,
    ) -> Vec<JobId> {
        let CallRequest { invocations, hooks } = request;
        let envelopes =
            invocations.into_envelopes(|method, params, header| Envelope::call(method, params, header));
        let job_ids = envelopes.iter().map(Envelope::job_id).collect();
        let jobs = envelopes
            .into_iter()
            .map(|envelope| {
                let kind = ResolverKind::Call {
                    hooks: hooks.clone(),
                    sink: make_sink(&envelope),
                };
                (envelope, kind)
            })
            .collect();
        self.submit(jobs);
        job_ids
    }

    /// Call a single method.
    pub async fn call_method(&self, method: impl Into<String>, params: Option<Value>) -> RpcResult<Response> {
        let mut request = CallRequest::new().method(method);
        if let Some(params) = params {
            request = request.params(params);
        }
        match self.call(request).pop() {
            Some(pending) => pending.await,
            None => Err(RpcError::EngineStopped),
        }
    }

    /// Issue a stream request whose notifications go to the request's callbacks.
    pub fn streamrx(&self, request: StreamRequest) -> Vec<JobId> {
        let StreamRequest { invocations, sink } = request;
        self.submit_streams(invocations, Arc::new(sink))
    }

    /// Issue a stream request and receive its notifications through a channel.
    ///
    /// Callbacks set on `request` are not used.
    pub fn stream(&self, request: StreamRequest) -> StreamReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        let job_ids = self.stream_to(request, Arc::new(ChannelStreamSink::new(tx)));
        StreamReceiver { job_ids, rx }
    }

    /// Issue a stream request whose notifications go to `sink`.
    ///
    /// Callbacks set on `request` are not used.
    pub fn stream_to(&self, request: StreamRequest, sink: Arc<dyn StreamSink>) -> Vec<JobId> {
        self.submit_streams(request.invocations, sink)
    }

    fn submit_streams(&self, invocations: Invocations, sink: Arc<dyn StreamSink>) -> Vec<JobId> {
        let envelopes =
            invocations.into_envelopes(|method, params, header| Envelope::stream(method, params, header));
        let job_ids = envelopes.iter().map(Envelope::job_id).collect();
        let jobs = envelopes
            .into_iter()
            .map(|envelope| {
                let kind = ResolverKind::Stream {
                    sink: Arc::clone(&sink),
                    control: StreamControl::new(),
                };
                (envelope, kind)
            })
            .collect();
        self.submit(jobs);
        job_ids
    }

    fn submit(&self, jobs: Vec<(Envelope, ResolverKind)>) {
        if jobs.is_empty() {
            return;
        }
        // On a stopped engine the resolvers drop here and their futures fail
        let _ = self
            .engine
            .events
            .send(EngineEvent::Submit(Submission::new(jobs)));
    }

    /// True when the bidirectional transport is connected.
    pub fn is_open(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.engine.state.borrow()
    }

    /// True when the engine never uses the bidirectional transport.
    pub fn is_discrete_only(&self) -> bool {
        self.engine.discrete_only
    }

    /// Drop the current link (if any) and connect again right away.
    pub fn manual_reconnect(&self) {
        let _ = self.engine.events.send(EngineEvent::Reconnect);
    }

    /// Wait for the first connection to settle.
    ///
    /// Resolves immediately in discrete-only mode. Fails if the very first
    /// connect attempt failed; later disconnects never affect it.
    pub async fn ready(&self) -> RpcResult<ConnectionMode> {
        let mut initial = self.engine.initial.clone();
        let settled = initial
            .wait_for(|outcome| !outcome.is_pending())
            .await
            .map_err(|_| RpcError::EngineStopped)?;
        match &*settled {
            InitialConnection::Ready(mode) => Ok(*mode),
            InitialConnection::Failed(message) => Err(RpcError::initial_connection(message.clone())),
            InitialConnection::Pending => Err(RpcError::EngineStopped),
        }
    }
}
