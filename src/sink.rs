//! Notification capabilities for pending operations.
//!
//! A call settles exactly once through a [`CallSink`]; a stream is notified
//! incrementally through a [`StreamSink`] until a terminal response.

use std::fmt;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::error::RpcError;
use crate::protocol::Response;

/// Callback invoked with a response.
pub type Callback = Arc<dyn Fn(&Response) + Send + Sync>;

/// Stream data callback, also handed the stream's [`StreamControl`].
pub type DataCallback = Arc<dyn Fn(&Response, &StreamControl) + Send + Sync>;

/// Receives the single outcome of a call.
///
/// `Err` carries the response whose `error` member was set.
pub trait CallSink: Send {
    fn settle(self: Box<Self>, outcome: Result<Response, Response>);
}

impl CallSink for oneshot::Sender<Result<Response, RpcError>> {
    fn settle(self: Box<Self>, outcome: Result<Response, Response>) {
        // The caller may have dropped its PendingCall
        let _ = (*self).send(outcome.map_err(RpcError::remote));
    }
}

/// Receives every increment of a stream.
pub trait StreamSink: Send + Sync {
    /// A non-error response; the stream stays alive.
    fn on_data(&self, response: &Response, control: &StreamControl);

    /// An error response other than the terminal code; the stream stays alive.
    fn on_error(&self, _response: &Response) {}

    /// The terminal response (code 205); no further notifications follow.
    fn on_complete(&self, _response: &Response) {}
}

/// Cancellation-request token offered to stream consumers.
///
/// Requesting cancellation only records the request: the engine sends no
/// cancel message and keeps redelivering the stream.
// TODO: emit a cancel envelope and drop the resolver once the server protocol defines one.
#[derive(Clone, Default)]
pub struct StreamControl {
    token: CancellationToken,
}

impl StreamControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl fmt::Debug for StreamControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamControl")
            .field("cancel_requested", &self.is_cancel_requested())
            .finish()
    }
}

/// Success and error hooks run before a call's future settles.
#[derive(Clone, Default)]
pub struct CallHooks {
    pub(crate) on_success: Option<Callback>,
    pub(crate) on_error: Option<Callback>,
}

impl CallHooks {
    pub(crate) fn success(&self, response: &Response) {
        if let Some(callback) = &self.on_success {
            callback(response);
        }
    }

    pub(crate) fn error(&self, response: &Response) {
        if let Some(callback) = &self.on_error {
            callback(response);
        }
    }
}

/// Stream sink assembled from optional closures.
#[derive(Clone, Default)]
pub struct CallbackStreamSink {
    pub(crate) callback: Option<DataCallback>,
    pub(crate) catch_callback: Option<Callback>,
    pub(crate) final_callback: Option<Callback>,
}

impl StreamSink for CallbackStreamSink {
    fn on_data(&self, response: &Response, control: &StreamControl) {
        if let Some(callback) = &self.callback {
            callback(response, control);
        }
    }

    fn on_error(&self, response: &Response) {
        if let Some(callback) = &self.catch_callback {
            callback(response);
        }
    }

    fn on_complete(&self, response: &Response) {
        if let Some(callback) = &self.final_callback {
            callback(response);
        }
    }
}

/// One stream notification delivered through a channel.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Data(Response),
    Error(Response),
    Complete(Response),
}

impl StreamEvent {
    pub fn response(&self) -> &Response {
        match self {
            StreamEvent::Data(r) | StreamEvent::Error(r) | StreamEvent::Complete(r) => r,
        }
    }
}

/// Stream sink that forwards notifications into an unbounded channel.
pub struct ChannelStreamSink {
    tx: mpsc::UnboundedSender<StreamEvent>,
}

impl ChannelStreamSink {
    pub fn new(tx: mpsc::UnboundedSender<StreamEvent>) -> Self {
        Self { tx }
    }
}

impl StreamSink for ChannelStreamSink {
    fn on_data(&self, response: &Response, _control: &StreamControl) {
        let _ = self.tx.send(StreamEvent::Data(response.clone()));
    }

    fn on_error(&self, response: &Response) {
        let _ = self.tx.send(StreamEvent::Error(response.clone()));
    }

    fn on_complete(&self, response: &Response) {
        let _ = self.tx.send(StreamEvent::Complete(response.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    #[tokio::test]
    async fn oneshot_sink_maps_error_to_remote() {
        let (tx, rx) = oneshot::channel();
        let sink: Box<dyn CallSink> = Box::new(tx);
        sink.settle(Err(Response::from_value(json!({"error": {"code": 9}}))));

        let outcome = rx.await.unwrap();
        match outcome {
            Err(RpcError::Remote(response)) => assert_eq!(response.error().unwrap().code, 9),
            other => panic!("expected remote error, got {:?}", other),
        }
    }

    #[test]
    fn oneshot_sink_tolerates_dropped_receiver() {
        let (tx, rx) = oneshot::channel();
        drop(rx);
        let sink: Box<dyn CallSink> = Box::new(tx);
        sink.settle(Ok(Response::from_value(json!({}))));
    }

    #[test]
    fn callback_sink_routes_each_kind() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (a, b, c) = (Arc::clone(&seen), Arc::clone(&seen), Arc::clone(&seen));
        let sink = CallbackStreamSink {
            callback: Some(Arc::new(move |_, _| a.lock().unwrap().push("data"))),
            catch_callback: Some(Arc::new(move |_| b.lock().unwrap().push("error"))),
            final_callback: Some(Arc::new(move |_| c.lock().unwrap().push("complete"))),
        };

        let response = Response::from_value(json!({}));
        let control = StreamControl::new();
        sink.on_data(&response, &control);
        sink.on_error(&response);
        sink.on_complete(&response);

        assert_eq!(*seen.lock().unwrap(), vec!["data", "error", "complete"]);
    }

    #[test]
    fn stream_control_records_cancel_request() {
        let control = StreamControl::new();
        let shared = control.clone();
        assert!(!control.is_cancel_requested());
        shared.request_cancel();
        assert!(control.is_cancel_requested());
    }

    #[test]
    fn channel_sink_forwards_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = ChannelStreamSink::new(tx);
        let response = Response::from_value(json!({"n": 1}));

        sink.on_data(&response, &StreamControl::new());
        sink.on_complete(&response);

        assert_eq!(rx.try_recv().unwrap(), StreamEvent::Data(response.clone()));
        assert_eq!(rx.try_recv().unwrap(), StreamEvent::Complete(response));
    }
}
