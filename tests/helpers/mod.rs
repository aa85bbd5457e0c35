//! Shared fixtures for engine integration tests.
//!
//! Note: We use `helpers/mod.rs` instead of `helpers.rs` because Cargo
//! auto-discovers top-level `.rs` files in `tests/` as integration tests.

#![allow(dead_code)]

use std::time::Duration;

use serde_json::{Value, json};
use wsrpc::{EngineSettings, PendingCall, RpcClient};
use wsrpc::transport::memory::{
    MemoryDiscreteServer, MemoryPeer, MemoryServer, memory_discrete, memory_duplex,
};

/// A client wired to in-memory transports, plus the server ends.
pub struct Harness {
    pub client: RpcClient,
    pub socket: MemoryServer,
    pub http: MemoryDiscreteServer,
}

impl Harness {
    /// Accept the next link, failing the test if none arrives.
    pub async fn accept(&mut self) -> MemoryPeer {
        self.socket.accept().await.expect("connector should hand over a peer")
    }

    /// Next discrete exchange, failing the test if none arrives.
    pub async fn next_exchange(&mut self) -> wsrpc::transport::memory::PendingExchange {
        self.http.next().await.expect("discrete transport should see a request")
    }
}

/// Spawn a client over in-memory transports.
///
/// `refuse` connection attempts are refused before the first one is made.
pub fn spawn_with(settings: EngineSettings, refuse: usize) -> Harness {
    let (connector, socket) = memory_duplex();
    let (discrete, http) = memory_discrete();
    socket.refuse_next(refuse);
    let client = RpcClient::spawn(&settings, connector, discrete);
    Harness {
        client,
        socket,
        http,
    }
}

pub fn spawn_default() -> Harness {
    spawn_with(EngineSettings::default(), 0)
}

pub fn spawn_discrete_only() -> Harness {
    let settings = EngineSettings {
        disable_websocket: true,
        ..Default::default()
    };
    spawn_with(settings, 0)
}

/// Let every runnable task finish its work.
///
/// Under a paused clock this also advances time by one millisecond.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// The envelopes of a payload, whether it was sent as an object or an array.
pub fn envelopes(payload: &Value) -> Vec<Value> {
    match payload {
        Value::Array(items) => items.clone(),
        other => vec![other.clone()],
    }
}

/// Job ids of a payload, in payload order.
pub fn job_ids(payload: &Value) -> Vec<String> {
    envelopes(payload)
        .iter()
        .filter_map(|e| e["jobId"].as_str().map(str::to_string))
        .collect()
}

/// Methods of a payload, in payload order.
pub fn methods(payload: &Value) -> Vec<String> {
    envelopes(payload)
        .iter()
        .filter_map(|e| e["method"].as_str().map(str::to_string))
        .collect()
}

/// Build a response to `job_id` with extra fields merged in.
pub fn reply(job_id: &str, fields: Value) -> Value {
    let mut response = json!({ "jobId": job_id });
    if let (Some(target), Value::Object(extra)) = (response.as_object_mut(), fields) {
        target.extend(extra);
    }
    response
}

/// Terminal stream response.
pub fn complete(job_id: &str) -> Value {
    reply(job_id, json!({"error": {"code": 205, "message": "done"}}))
}

/// Assert a call has not settled yet, without consuming it.
pub fn assert_pending(call: &mut PendingCall) {
    let mut task = tokio_test::task::spawn(call);
    tokio_test::assert_pending!(task.poll());
}
