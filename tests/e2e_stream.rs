//! End-to-end tests for server-push streams.

mod helpers;

use std::sync::{Arc, Mutex};

use helpers::{complete, job_ids, methods, reply, settle, spawn_default, spawn_discrete_only};
use serde_json::{Value, json};
use wsrpc::{Invocation, StreamEvent, StreamRequest};

fn kind(event: &StreamEvent) -> &'static str {
    match event {
        StreamEvent::Data(_) => "data",
        StreamEvent::Error(_) => "error",
        StreamEvent::Complete(_) => "complete",
    }
}

#[tokio::test(start_paused = true)]
async fn socket_stream_delivers_until_complete() {
    let mut h = spawn_default();
    let mut peer = h.accept().await;
    h.client.ready().await.unwrap();

    let mut stream = h.client.stream(StreamRequest::new().method("ticks").params(json!({"every": 1})));
    let frame = peer.recv_frame().await.unwrap();
    assert_eq!(frame["type"], "STREAM");
    let job = job_ids(&frame)[0].clone();
    assert_eq!(stream.job_ids()[0].to_string(), job);

    peer.push(reply(&job, json!({"n": 1})));
    peer.push(reply(&job, json!({"error": {"code": 500, "message": "hiccup"}})));
    peer.push(reply(&job, json!({"n": 2})));
    peer.push(complete(&job));

    let mut kinds = Vec::new();
    while let Some(event) = stream.recv().await {
        kinds.push(kind(&event));
    }
    assert_eq!(kinds, vec!["data", "error", "data", "complete"]);

    // Nothing left to redeliver after the terminal response
    peer.close();
    let mut peer = h.accept().await;
    settle().await;
    assert!(peer.try_recv_frame().is_none());
    assert!(h.http.try_next().is_none());
}

#[tokio::test(start_paused = true)]
async fn streamrx_runs_callbacks_and_cancel_is_advisory() {
    let mut h = spawn_default();
    let mut peer = h.accept().await;
    h.client.ready().await.unwrap();

    let log = Arc::new(Mutex::new(Vec::<String>::new()));
    let (data_log, error_log, final_log) = (log.clone(), log.clone(), log.clone());
    let ids = h.client.streamrx(
        StreamRequest::new()
            .method("feed")
            .callback(move |response, control| {
                data_log.lock().unwrap().push(format!("data {}", response.get("n").unwrap_or(&Value::Null)));
                control.request_cancel();
            })
            .catch_callback(move |_| error_log.lock().unwrap().push("error".to_string()))
            .final_callback(move |_| final_log.lock().unwrap().push("final".to_string())),
    );
    let job = ids[0].to_string();
    peer.recv_frame().await.unwrap();

    peer.push(reply(&job, json!({"n": 1})));
    peer.push(reply(&job, json!({"error": {"code": 1}})));
    peer.push(reply(&job, json!({"n": 2})));
    peer.push(complete(&job));
    settle().await;

    assert_eq!(
        *log.lock().unwrap(),
        vec!["data 1", "error", "data 2", "final"]
    );
}

#[tokio::test(start_paused = true)]
async fn disconnect_redelivers_only_live_batch_members() {
    let mut h = spawn_default();
    let mut peer = h.accept().await;
    h.client.ready().await.unwrap();

    let mut stream = h.client.stream(
        StreamRequest::new()
            .call(Invocation::new("s1"))
            .call(Invocation::new("s2"))
            .call(Invocation::new("s3")),
    );
    let frame = peer.recv_frame().await.unwrap();
    let ids = job_ids(&frame);
    assert_eq!(methods(&frame), vec!["s1", "s2", "s3"]);

    peer.push(complete(&ids[1]));
    assert!(matches!(stream.recv().await, Some(StreamEvent::Complete(_))));

    peer.close();
    let exchange = h.next_exchange().await;
    assert_eq!(job_ids(&exchange.body()), vec![ids[0].clone(), ids[2].clone()]);

    let mut peer = h.accept().await;
    let frame = peer.recv_frame().await.unwrap();
    assert_eq!(job_ids(&frame), vec![ids[0].clone(), ids[2].clone()]);
}

#[tokio::test(start_paused = true)]
async fn discrete_stream_is_reissued_with_refreshed_header() {
    let mut h = spawn_discrete_only();
    let mut stream = h
        .client
        .stream(StreamRequest::new().method("poll").header(json!({"cursor": "0"})));

    let exchange = h.next_exchange().await;
    let job = job_ids(&exchange.body())[0].clone();
    assert_eq!(exchange.body()["header"], json!({"cursor": "0"}));
    exchange.respond(reply(&job, json!({"header": {"cursor": "1"}, "n": 1})));

    let exchange = h.next_exchange().await;
    assert_eq!(job_ids(&exchange.body()), vec![job.clone()]);
    assert_eq!(exchange.body()["header"], json!({"cursor": "1"}));
    assert_eq!(exchange.request.headers.get("cursor").map(String::as_str), Some("1"));
    assert!(matches!(stream.recv().await, Some(StreamEvent::Data(_))));

    exchange.respond(complete(&job));
    assert!(matches!(stream.recv().await, Some(StreamEvent::Complete(_))));
    assert!(stream.recv().await.is_none());
    settle().await;
    assert!(h.http.try_next().is_none());
}

#[tokio::test(start_paused = true)]
async fn discrete_batch_is_reissued_once_per_reply() {
    let mut h = spawn_discrete_only();
    let mut stream = h.client.stream(
        StreamRequest::new()
            .call(Invocation::new("a"))
            .call(Invocation::new("b")),
    );

    let exchange = h.next_exchange().await;
    let ids = job_ids(&exchange.body());
    exchange.respond(json!([
        reply(&ids[0], json!({"header": "ha"})),
        reply(&ids[1], json!({"header": "hb"})),
    ]));

    let exchange = h.next_exchange().await;
    let body = exchange.body();
    assert_eq!(job_ids(&body), ids);
    assert_eq!(body[0]["header"], "ha");
    assert_eq!(body[1]["header"], "hb");
    settle().await;
    assert!(h.http.try_next().is_none());

    exchange.respond(json!([complete(&ids[0]), reply(&ids[1], json!({"n": 2}))]));
    let exchange = h.next_exchange().await;
    assert_eq!(job_ids(&exchange.body()), vec![ids[1].clone()]);
    // No header on the reply clears the envelope header
    assert!(exchange.body().get("header").is_none());

    let mut kinds = Vec::new();
    for _ in 0..4 {
        kinds.push(kind(&stream.recv().await.unwrap()));
    }
    assert_eq!(kinds, vec!["data", "data", "complete", "data"]);
}

#[tokio::test(start_paused = true)]
async fn discrete_stream_error_pauses_reissue() {
    let mut h = spawn_discrete_only();
    let mut stream = h.client.stream(StreamRequest::new().method("flaky"));

    let exchange = h.next_exchange().await;
    let job = job_ids(&exchange.body())[0].clone();
    exchange.respond(reply(&job, json!({"error": {"code": 503}})));

    assert!(matches!(stream.recv().await, Some(StreamEvent::Error(_))));
    settle().await;
    assert!(h.http.try_next().is_none());
}
