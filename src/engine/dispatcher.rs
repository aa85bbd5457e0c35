//! Message dispatcher: applies call and stream semantics to inbound responses.
//!
//! # Paths
//!
//! - Calls are terminal after one response, whatever the connection state.
//! - Streams on a connected link are applied in place: the server pushes the
//!   next increment on its own.
//! - Streams answered while the link is *not* connected (discrete round trips)
//!   are kept alive by re-issuing: each batch is re-derived once per inbound
//!   message and its surviving members come back as one group to enqueue.

use std::collections::HashMap;

use serde_json::Value;

use super::batch::BatchTracker;
use super::correlation::{CorrelationTable, ResolverKind};
use crate::protocol::{BatchId, Envelope, JobId, Response};

const LOG_TARGET: &str = "wsrpc::dispatcher";

/// What became of a stream after one response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamFate {
    /// Data delivered; the stream goes on
    Alive,
    /// Non-terminal error delivered
    Errored,
    /// Terminal code; the resolver is gone
    Completed,
}

/// Borrowing view over the engine's bookkeeping for one inbound message.
pub(crate) struct Dispatcher<'a> {
    table: &'a mut CorrelationTable,
    batches: &'a mut BatchTracker,
}

impl<'a> Dispatcher<'a> {
    pub(crate) fn new(table: &'a mut CorrelationTable, batches: &'a mut BatchTracker) -> Self {
        Self { table, batches }
    }

    /// Apply one inbound message (an object or an array of objects).
    ///
    /// Returns the envelope groups to enqueue, oldest batch first. Only the
    /// not-connected stream path produces any.
    pub(crate) fn dispatch(&mut self, message: Value, connected: bool) -> Vec<Vec<Envelope>> {
        let mut offline: Vec<(BatchId, Vec<Response>)> = Vec::new();
        let mut offline_index: HashMap<BatchId, usize> = HashMap::new();

        for response in normalize(message) {
            let Some(job_id) = response.job_id() else {
                log::debug!(
                    target: LOG_TARGET,
                    "Dropping response without jobId: {}",
                    response.raw()
                );
                continue;
            };
            let Some(resolver) = self.table.lookup(&job_id) else {
                log::debug!(target: LOG_TARGET, "Dropping response for unknown job {}", job_id);
                continue;
            };

            let (is_stream, batch_id) = (resolver.is_stream(), resolver.batch_id);

            if !is_stream {
                self.settle_call(job_id, response);
            } else if connected {
                self.apply_stream(job_id, &response);
            } else {
                match offline_index.get(&batch_id) {
                    Some(&i) => offline[i].1.push(response),
                    None => {
                        offline_index.insert(batch_id, offline.len());
                        offline.push((batch_id, vec![response]));
                    }
                }
            }
        }

        offline
            .into_iter()
            .filter_map(|(batch_id, responses)| self.rederive_batch(batch_id, responses))
            .collect()
    }

    /// Remove the call, run its hook, then settle it.
    fn settle_call(&mut self, job_id: JobId, response: Response) {
        let Some(resolver) = self.table.remove(&job_id) else {
            return;
        };
        self.batches.remove_member(&resolver.batch_id, &job_id);

        let ResolverKind::Call { hooks, sink } = resolver.kind else {
            return;
        };
        if response.error().is_some() {
            hooks.error(&response);
            sink.settle(Err(response));
        } else {
            hooks.success(&response);
            sink.settle(Ok(response));
        }
    }

    /// Apply one response to a stream resolver.
    fn apply_stream(&mut self, job_id: JobId, response: &Response) -> StreamFate {
        if response.is_stream_complete() {
            let Some(resolver) = self.table.remove(&job_id) else {
                return StreamFate::Completed;
            };
            self.batches.remove_member(&resolver.batch_id, &job_id);
            if let ResolverKind::Stream { sink, .. } = &resolver.kind {
                sink.on_complete(response);
            }
            return StreamFate::Completed;
        }

        let Some(resolver) = self.table.lookup(&job_id) else {
            return StreamFate::Completed;
        };
        let ResolverKind::Stream { sink, control } = &resolver.kind else {
            return StreamFate::Completed;
        };

        if response.error().is_some() {
            sink.on_error(response);
            StreamFate::Errored
        } else {
            sink.on_data(response, control);
            StreamFate::Alive
        }
    }

    /// Rebuild one batch from the responses it received in this message.
    ///
    /// Members with no response are re-issued unchanged. A member that got
    /// data is re-issued with the response's header. A member that errored
    /// stays registered but leaves the batch; a completed member is gone.
    /// Responding jobs that are no longer listed in the batch are treated as
    /// if appended to it.
    fn rederive_batch(&mut self, batch_id: BatchId, responses: Vec<Response>) -> Option<Vec<Envelope>> {
        let mut members = self.batches.members_of(&batch_id).to_vec();
        for response in &responses {
            if let Some(job_id) = response.job_id()
                && !members.contains(&job_id)
            {
                members.push(job_id);
            }
        }

        let mut survivors = Vec::with_capacity(members.len());
        let mut group = Vec::with_capacity(members.len());

        for job_id in members {
            let mut answered = responses
                .iter()
                .filter(|response| response.job_id() == Some(job_id))
                .peekable();

            if answered.peek().is_none() {
                if let Some(resolver) = self.table.lookup(&job_id) {
                    survivors.push(job_id);
                    group.push(resolver.envelope.clone());
                }
                continue;
            }

            let mut fate = StreamFate::Alive;
            let mut header = None;
            for response in answered {
                fate = self.apply_stream(job_id, response);
                if fate != StreamFate::Alive {
                    break;
                }
                header = Some(response.header().cloned());
            }

            if fate == StreamFate::Alive
                && let Some(resolver) = self.table.get_mut(&job_id)
            {
                if let Some(header) = header {
                    resolver.envelope.refresh_header(header);
                }
                survivors.push(job_id);
                group.push(resolver.envelope.clone());
            }
        }

        self.batches.register(batch_id, survivors);
        if group.is_empty() { None } else { Some(group) }
    }
}

/// Turn an inbound message into individual responses.
fn normalize(message: Value) -> Vec<Response> {
    match message {
        Value::Array(items) => items.into_iter().map(Response::from_value).collect(),
        other => vec![Response::from_value(other)],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{CallHooks, ChannelStreamSink, StreamControl, StreamEvent};
    use crate::error::RpcError;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use tokio::sync::{mpsc, oneshot};

    struct Fixture {
        table: CorrelationTable,
        batches: BatchTracker,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                table: CorrelationTable::new(),
                batches: BatchTracker::new(),
            }
        }

        fn dispatch(&mut self, message: Value, connected: bool) -> Vec<Vec<Envelope>> {
            Dispatcher::new(&mut self.table, &mut self.batches).dispatch(message, connected)
        }

        fn add_call(
            &mut self,
            hooks: CallHooks,
        ) -> (JobId, oneshot::Receiver<Result<Response, RpcError>>) {
            let batch = BatchId::new();
            let (tx, rx) = oneshot::channel();
            let job = self.table.register(
                batch,
                Envelope::call("ping", None, None),
                ResolverKind::Call {
                    hooks,
                    sink: Box::new(tx),
                },
            );
            self.batches.register(batch, vec![job]);
            (job, rx)
        }

        fn add_streams(
            &mut self,
            count: usize,
        ) -> (BatchId, Vec<JobId>, mpsc::UnboundedReceiver<StreamEvent>) {
            let batch = BatchId::new();
            let (tx, rx) = mpsc::unbounded_channel();
            let sink = Arc::new(ChannelStreamSink::new(tx));
            let jobs: Vec<JobId> = (0..count)
                .map(|i| {
                    self.table.register(
                        batch,
                        Envelope::stream(format!("feed{}", i), None, Some(json!({"cursor": 0}))),
                        ResolverKind::Stream {
                            sink: sink.clone(),
                            control: StreamControl::new(),
                        },
                    )
                })
                .collect();
            self.batches.register(batch, jobs.clone());
            (batch, jobs, rx)
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<StreamEvent>) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn call_success_runs_hook_then_settles() {
        let mut fx = Fixture::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let hook_seen = seen.clone();
        let hooks = CallHooks {
            on_success: Some(Arc::new(move |r: &Response| {
                hook_seen.lock().unwrap().push(r.get("result").cloned())
            })),
            on_error: None,
        };
        let (job, mut rx) = fx.add_call(hooks);

        let requeue = fx.dispatch(json!({"jobId": job.to_string(), "result": "pong"}), true);

        assert!(requeue.is_empty());
        assert_eq!(*seen.lock().unwrap(), vec![Some(json!("pong"))]);
        let response = rx.try_recv().unwrap().unwrap();
        assert_eq!(response.get("result"), Some(&json!("pong")));
        assert!(!fx.table.contains(&job));
        assert_eq!(fx.batches.len(), 0);
    }

    #[test]
    fn call_error_runs_error_hook_then_rejects() {
        let mut fx = Fixture::new();
        let errors = Arc::new(Mutex::new(0));
        let counter = errors.clone();
        let hooks = CallHooks {
            on_success: None,
            on_error: Some(Arc::new(move |_: &Response| *counter.lock().unwrap() += 1)),
        };
        let (job, mut rx) = fx.add_call(hooks);

        fx.dispatch(json!({"jobId": job.to_string(), "error": {"code": 3}}), false);

        assert_eq!(*errors.lock().unwrap(), 1);
        match rx.try_recv().unwrap() {
            Err(RpcError::Remote(response)) => assert_eq!(response.error().unwrap().code, 3),
            other => panic!("expected remote error, got {:?}", other),
        }
        assert!(!fx.table.contains(&job));
    }

    #[test]
    fn second_response_to_call_is_dropped() {
        let mut fx = Fixture::new();
        let (job, _rx) = fx.add_call(CallHooks::default());
        let response = json!({"jobId": job.to_string()});

        fx.dispatch(response.clone(), true);
        assert!(fx.dispatch(response, true).is_empty());
        assert_eq!(fx.table.len(), 0);
    }

    #[test]
    fn responses_without_known_job_are_dropped() {
        let mut fx = Fixture::new();
        let (_batch, _jobs, mut rx) = fx.add_streams(1);

        let requeue = fx.dispatch(
            json!([
                {"error": {"code": -32700, "message": "bad body"}},
                {"jobId": JobId::new().to_string(), "result": 1},
                {"jobId": "not-a-ulid"},
                42
            ]),
            false,
        );

        assert!(requeue.is_empty());
        assert!(drain(&mut rx).is_empty());
        assert_eq!(fx.table.len(), 1);
    }

    #[test]
    fn connected_stream_data_and_error_keep_resolver() {
        let mut fx = Fixture::new();
        let (_batch, jobs, mut rx) = fx.add_streams(1);
        let id = jobs[0].to_string();

        let requeue = fx.dispatch(
            json!([
                {"jobId": id, "n": 1},
                {"jobId": id, "error": {"code": 500}},
                {"jobId": id, "n": 2}
            ]),
            true,
        );

        assert!(requeue.is_empty());
        let kinds: Vec<_> = drain(&mut rx)
            .into_iter()
            .map(|e| match e {
                StreamEvent::Data(_) => "data",
                StreamEvent::Error(_) => "error",
                StreamEvent::Complete(_) => "complete",
            })
            .collect();
        assert_eq!(kinds, vec!["data", "error", "data"]);
        assert!(fx.table.contains(&jobs[0]));
    }

    #[test]
    fn connected_stream_complete_removes_resolver_and_member() {
        let mut fx = Fixture::new();
        let (batch, jobs, mut rx) = fx.add_streams(2);

        fx.dispatch(json!({"jobId": jobs[0].to_string(), "error": {"code": 205}}), true);

        assert!(!fx.table.contains(&jobs[0]));
        assert_eq!(fx.batches.members_of(&batch), &[jobs[1]]);
        assert!(matches!(drain(&mut rx).as_slice(), [StreamEvent::Complete(_)]));
    }

    #[test]
    fn offline_data_requeues_batch_with_refreshed_header() {
        let mut fx = Fixture::new();
        let (batch, jobs, mut rx) = fx.add_streams(3);

        let requeue = fx.dispatch(
            json!({"jobId": jobs[1].to_string(), "header": {"cursor": 7}, "n": 1}),
            false,
        );

        assert_eq!(requeue.len(), 1);
        let group = &requeue[0];
        let ids: Vec<JobId> = group.iter().map(Envelope::job_id).collect();
        assert_eq!(ids, jobs);
        assert_eq!(group[0].header(), Some(&json!({"cursor": 0})));
        assert_eq!(group[1].header(), Some(&json!({"cursor": 7})));
        assert_eq!(group[2].header(), Some(&json!({"cursor": 0})));
        assert_eq!(fx.batches.members_of(&batch), jobs.as_slice());
        assert!(matches!(drain(&mut rx).as_slice(), [StreamEvent::Data(_)]));
    }

    #[test]
    fn offline_data_without_header_clears_it() {
        let mut fx = Fixture::new();
        let (_batch, jobs, _rx) = fx.add_streams(1);

        let requeue = fx.dispatch(json!({"jobId": jobs[0].to_string()}), false);

        assert_eq!(requeue[0][0].header(), None);
        assert_eq!(fx.table.lookup(&jobs[0]).unwrap().envelope.header(), None);
    }

    #[test]
    fn offline_complete_drops_member_from_reissue() {
        let mut fx = Fixture::new();
        let (batch, jobs, _rx) = fx.add_streams(3);

        let requeue = fx.dispatch(
            json!({"jobId": jobs[1].to_string(), "error": {"code": 205}}),
            false,
        );

        let ids: Vec<JobId> = requeue[0].iter().map(Envelope::job_id).collect();
        assert_eq!(ids, vec![jobs[0], jobs[2]]);
        assert_eq!(fx.batches.members_of(&batch), &[jobs[0], jobs[2]]);
        assert!(!fx.table.contains(&jobs[1]));
    }

    #[test]
    fn offline_error_leaves_batch_but_stays_registered() {
        let mut fx = Fixture::new();
        let (batch, jobs, mut rx) = fx.add_streams(2);

        let requeue = fx.dispatch(
            json!({"jobId": jobs[0].to_string(), "error": {"code": 500}}),
            false,
        );

        let ids: Vec<JobId> = requeue[0].iter().map(Envelope::job_id).collect();
        assert_eq!(ids, vec![jobs[1]]);
        assert_eq!(fx.batches.members_of(&batch), &[jobs[1]]);
        assert!(fx.table.contains(&jobs[0]));
        assert!(matches!(drain(&mut rx).as_slice(), [StreamEvent::Error(_)]));
    }

    /// An array reply for the whole batch re-issues it once, not once per element.
    #[test]
    fn offline_array_rederives_each_batch_once() {
        let mut fx = Fixture::new();
        let (_batch, jobs, mut rx) = fx.add_streams(3);

        let requeue = fx.dispatch(
            json!([
                {"jobId": jobs[0].to_string(), "header": "h0"},
                {"jobId": jobs[1].to_string(), "error": {"code": 205}},
                {"jobId": jobs[2].to_string(), "header": "h2"}
            ]),
            false,
        );

        assert_eq!(requeue.len(), 1);
        let group = &requeue[0];
        assert_eq!(
            group.iter().map(Envelope::job_id).collect::<Vec<_>>(),
            vec![jobs[0], jobs[2]]
        );
        assert_eq!(group[0].header(), Some(&json!("h0")));
        assert_eq!(group[1].header(), Some(&json!("h2")));
        assert_eq!(drain(&mut rx).len(), 3);
    }

    #[test]
    fn offline_batch_fully_completed_requeues_nothing() {
        let mut fx = Fixture::new();
        let (batch, jobs, _rx) = fx.add_streams(1);

        let requeue = fx.dispatch(
            json!({"jobId": jobs[0].to_string(), "error": {"code": 205}}),
            false,
        );

        assert!(requeue.is_empty());
        assert!(fx.batches.members_of(&batch).is_empty());
        assert_eq!(fx.table.len(), 0);
    }

    /// A stream that errored earlier is re-admitted when it answers again.
    #[test]
    fn offline_responder_outside_batch_is_appended() {
        let mut fx = Fixture::new();
        let (batch, jobs, _rx) = fx.add_streams(2);
        fx.batches.remove_member(&batch, &jobs[0]);

        let requeue = fx.dispatch(json!({"jobId": jobs[0].to_string()}), false);

        let ids: Vec<JobId> = requeue[0].iter().map(Envelope::job_id).collect();
        assert_eq!(ids, vec![jobs[1], jobs[0]]);
    }

    #[test]
    fn data_callback_receives_cancel_token() {
        let mut fx = Fixture::new();
        let batch = BatchId::new();
        let control = StreamControl::new();
        let sink = Arc::new(crate::sink::CallbackStreamSink {
            callback: Some(Arc::new(|_: &Response, control: &StreamControl| control.request_cancel())),
            ..Default::default()
        });
        let job = fx.table.register(
            batch,
            Envelope::stream("feed", None, None),
            ResolverKind::Stream {
                sink,
                control: control.clone(),
            },
        );
        fx.batches.register(batch, vec![job]);

        let requeue = fx.dispatch(json!({"jobId": job.to_string()}), false);

        assert!(control.is_cancel_requested());
        // Cancellation is advisory: the stream is still re-issued
        assert_eq!(requeue.len(), 1);
        assert!(fx.table.contains(&job));
    }
}
