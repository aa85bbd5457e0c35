//! The RPC engine task.
//!
//! # Architecture
//!
//! One tokio task owns every piece of engine state: the connection state and
//! link, backoff and health counters, the correlation table, the batch tracker
//! and the outbound queue. Callers, link pumps, discrete round trips and timers
//! all talk to it through a single unbounded channel of [`EngineEvent`]s, so
//! no engine state sits behind a lock and a drain can never re-enter itself.
//!
//! ## Module Structure
//!
//! - `connection_state` - connection states and the transition table
//! - `backoff` - reconnect delay
//! - `health` - per-window transport error counter
//! - `correlation` - job id to resolver
//! - `batch` - job ids issued together
//! - `outbound_queue` - serialized groups awaiting a transport
//! - `dispatcher` - call and stream semantics for inbound responses
//! - `event` - engine input events

mod backoff;
mod batch;
mod connection_state;
mod correlation;
mod dispatcher;
mod event;
mod health;
mod outbound_queue;

use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, info, warn};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::config::EngineSettings;
use crate::protocol::{Envelope, Response};
use crate::transport::{
    CloseReason, DiscreteRequest, DiscreteTransport, DuplexConnector, DuplexLink, LinkCommand,
    LinkEvent, TransportError,
};

use backoff::Backoff;
use batch::BatchTracker;
use connection_state::{ConnectionEvent, transition};
use correlation::CorrelationTable;
use dispatcher::Dispatcher;
use health::{HealthMonitor, HealthVerdict};
use outbound_queue::{OutboundItem, OutboundQueue};

pub use connection_state::{ConnectionMode, ConnectionState};
pub(crate) use connection_state::InitialConnection;
pub(crate) use correlation::ResolverKind;
pub(crate) use event::{EngineEvent, Submission};

const LOG_TARGET: &str = "wsrpc::engine";

/// Handle to a running engine task.
///
/// Dropping it cancels the task.
pub(crate) struct EngineHandle {
    pub(crate) events: mpsc::UnboundedSender<EngineEvent>,
    pub(crate) state: watch::Receiver<ConnectionState>,
    pub(crate) initial: watch::Receiver<InitialConnection>,
    pub(crate) discrete_only: bool,
    _shutdown: DropGuard,
}

/// Spawn an engine on the current tokio runtime.
///
/// With `disable_websocket` set the connector is never used and the engine
/// runs in discrete-only mode.
pub(crate) fn spawn_engine<C, D>(settings: &EngineSettings, connector: C, discrete: D) -> EngineHandle
where
    C: DuplexConnector,
    D: DiscreteTransport,
{
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
    let (initial_tx, initial_rx) = watch::channel(InitialConnection::Pending);
    let shutdown = CancellationToken::new();

    let connector = (!settings.disable_websocket).then(|| Arc::new(connector));
    let discrete_only = connector.is_none();

    let engine = Engine {
        connector,
        discrete: Arc::new(discrete),
        default_headers: settings.default_headers.clone(),
        events_tx: events_tx.clone(),
        events_rx,
        state: ConnectionState::Disconnected,
        state_tx,
        initial_tx,
        link: None,
        epoch: 0,
        reconnect_ticket: 0,
        health_generation: 0,
        backoff: Backoff::new(settings.reconnect),
        health: HealthMonitor::new(settings.health),
        table: CorrelationTable::new(),
        batches: BatchTracker::new(),
        queue: OutboundQueue::new(),
    };
    tokio::spawn(engine.run(shutdown.clone()));

    EngineHandle {
        events: events_tx,
        state: state_rx,
        initial: initial_rx,
        discrete_only,
        _shutdown: shutdown.drop_guard(),
    }
}

struct Engine<C, D> {
    /// `None` in discrete-only mode
    connector: Option<Arc<C>>,
    discrete: Arc<D>,
    default_headers: BTreeMap<String, String>,
    events_tx: mpsc::UnboundedSender<EngineEvent>,
    events_rx: mpsc::UnboundedReceiver<EngineEvent>,

    state: ConnectionState,
    state_tx: watch::Sender<ConnectionState>,
    initial_tx: watch::Sender<InitialConnection>,
    /// Command side of the open link, present only while one exists
    link: Option<mpsc::UnboundedSender<LinkCommand>>,
    /// Identifies the current connect attempt and its link
    epoch: u64,
    /// Identifies the reconnect timer that may still fire
    reconnect_ticket: u64,
    /// Identifies the health tick chain of the current connection
    health_generation: u64,
    backoff: Backoff,
    health: HealthMonitor,

    table: CorrelationTable,
    batches: BatchTracker,
    queue: OutboundQueue,
}

impl<C, D> Engine<C, D>
where
    C: DuplexConnector,
    D: DiscreteTransport,
{
    async fn run(mut self, shutdown: CancellationToken) {
        self.start();

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    debug!(target: LOG_TARGET, "Engine cancelled, shutting down");
                    break;
                }

                event = self.events_rx.recv() => match event {
                    Some(event) => self.handle(event),
                    None => break,
                },
            }
        }

        if let Some(link) = self.link.take() {
            let _ = link.send(LinkCommand::Close(CloseReason::Shutdown));
        }
    }

    fn start(&mut self) {
        if self.connector.is_some() {
            self.begin_connect();
        } else {
            info!(target: LOG_TARGET, "Bidirectional transport disabled, using discrete transport only");
            self.settle_initial(InitialConnection::Ready(ConnectionMode::DiscreteOnly));
        }
    }

    fn handle(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Submit(submission) => self.submit(submission),
            EngineEvent::Reconnect => self.manual_reconnect(),
            EngineEvent::LinkOpened { epoch, link } => self.on_link_opened(epoch, link),
            EngineEvent::LinkFailed { epoch, error } => self.on_link_failed(epoch, error),
            EngineEvent::Link { epoch, event } => self.on_link_event(epoch, event),
            EngineEvent::DiscreteReply(message) => self.dispatch(message),
            EngineEvent::ReconnectDue { ticket } => self.on_reconnect_due(ticket),
            EngineEvent::HealthTick { generation } => self.on_health_tick(generation),
        }
    }

    // ---- connection manager ----

    /// Apply a state machine event; returns whether it was valid.
    fn apply(&mut self, event: ConnectionEvent) -> bool {
        let Some(next) = transition(self.state, event) else {
            debug!(
                target: LOG_TARGET,
                "Ignoring {:?} in state {:?}", event, self.state
            );
            return false;
        };
        info!(target: LOG_TARGET, "Connection {:?} -> {:?}", self.state, next);
        self.state = next;
        self.state_tx.send_replace(next);
        true
    }

    fn begin_connect(&mut self) {
        let Some(connector) = self.connector.clone() else {
            return;
        };
        if !self.apply(ConnectionEvent::ConnectStarted) {
            return;
        }

        self.epoch += 1;
        let epoch = self.epoch;
        let attempt = connector.connect();
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let event = match attempt.await {
                Ok(link) => EngineEvent::LinkOpened { epoch, link },
                Err(error) => EngineEvent::LinkFailed { epoch, error },
            };
            let _ = events.send(event);
        });
    }

    fn on_link_opened(&mut self, epoch: u64, link: DuplexLink) {
        let (commands, link_events) = link.into_parts();
        if epoch != self.epoch || self.state != ConnectionState::Connecting {
            debug!(target: LOG_TARGET, "Closing superseded link from attempt {}", epoch);
            let _ = commands.send(LinkCommand::Close(CloseReason::Superseded));
            return;
        }

        let events = self.events_tx.clone();
        tokio::spawn(pump_link(epoch, link_events, events));
        self.link = Some(commands);
        self.apply(ConnectionEvent::Opened);

        self.backoff.reset();
        self.restart_health();
        self.settle_initial(InitialConnection::Ready(ConnectionMode::Duplex));
        self.requeue_all();
    }

    fn on_link_failed(&mut self, epoch: u64, error: TransportError) {
        if epoch != self.epoch {
            return;
        }
        warn!(target: LOG_TARGET, "Connect attempt failed: {}", error);
        self.health.record_error();

        if self.apply(ConnectionEvent::ConnectFailed) {
            self.settle_initial(InitialConnection::Failed(error.to_string()));
            self.schedule_reconnect();
        }
    }

    fn on_link_event(&mut self, epoch: u64, event: LinkEvent) {
        if epoch != self.epoch {
            debug!(target: LOG_TARGET, "Ignoring event from stale link {}", epoch);
            return;
        }

        match event {
            LinkEvent::Message(text) => match serde_json::from_str::<Value>(&text) {
                Ok(message) => self.dispatch(message),
                Err(e) => warn!(target: LOG_TARGET, "Dropping undecodable frame: {}", e),
            },
            LinkEvent::Error(message) => {
                warn!(target: LOG_TARGET, "Transport error: {}", message);
                self.health.record_error();
            }
            LinkEvent::Closed => self.on_link_closed(),
        }
    }

    fn on_link_closed(&mut self) {
        self.link = None;
        if self.apply(ConnectionEvent::Closed) {
            self.requeue_all();
        }
        self.schedule_reconnect();
    }

    /// Close the link from our side and run the disconnect path.
    ///
    /// The epoch moves on so the link's own `Closed` is ignored.
    fn force_close(&mut self, reason: CloseReason) {
        if let Some(link) = self.link.take() {
            let _ = link.send(LinkCommand::Close(reason));
        }
        self.epoch += 1;
        if self.apply(ConnectionEvent::ForceClosed) {
            self.requeue_all();
        }
    }

    fn schedule_reconnect(&mut self) {
        if self.connector.is_none() {
            return;
        }
        self.reconnect_ticket += 1;
        let ticket = self.reconnect_ticket;
        let delay = self.backoff.advance();
        debug!(target: LOG_TARGET, "Reconnecting in {:?}", delay);

        let events = self.events_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(EngineEvent::ReconnectDue { ticket });
        });
    }

    fn on_reconnect_due(&mut self, ticket: u64) {
        if ticket == self.reconnect_ticket && self.state == ConnectionState::Disconnected {
            self.begin_connect();
        }
    }

    fn manual_reconnect(&mut self) {
        if self.connector.is_none() {
            return;
        }
        match self.state {
            ConnectionState::Connecting => {
                debug!(target: LOG_TARGET, "Manual reconnect ignored while connecting");
            }
            ConnectionState::Connected => {
                info!(target: LOG_TARGET, "Manual reconnect: closing current link");
                self.force_close(CloseReason::Reconnect);
                self.reconnect_ticket += 1;
                self.begin_connect();
            }
            ConnectionState::Disconnected => {
                self.reconnect_ticket += 1;
                self.begin_connect();
            }
        }
    }

    fn restart_health(&mut self) {
        self.health.restart();
        self.health_generation += 1;
        self.schedule_health_tick(self.health_generation);
    }

    fn schedule_health_tick(&self, generation: u64) {
        let interval = self.health.interval();
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            let _ = events.send(EngineEvent::HealthTick { generation });
        });
    }

    fn on_health_tick(&mut self, generation: u64) {
        if generation != self.health_generation {
            return;
        }
        if let HealthVerdict::Unstable { errors } = self.health.tick()
            && self.state == ConnectionState::Connected
        {
            warn!(
                target: LOG_TARGET,
                "{} transport errors in one window, falling back to discrete transport", errors
            );
            self.force_close(CloseReason::Unstable);
            self.schedule_reconnect();
        }
        self.schedule_health_tick(generation);
    }

    fn settle_initial(&self, outcome: InitialConnection) {
        self.initial_tx.send_if_modified(|current| {
            if current.is_pending() {
                *current = outcome;
                true
            } else {
                false
            }
        });
    }

    // ---- queue ----

    fn submit(&mut self, submission: Submission) {
        let Submission { batch_id, jobs } = submission;
        let mut group = Vec::with_capacity(jobs.len());
        let mut members = Vec::with_capacity(jobs.len());
        for (envelope, kind) in jobs {
            members.push(self.table.register(batch_id, envelope.clone(), kind));
            group.push(envelope);
        }
        self.batches.register(batch_id, members);
        self.enqueue(&group);
    }

    fn enqueue(&mut self, group: &[Envelope]) {
        if let Err(e) = self.queue.push_group(group) {
            warn!(target: LOG_TARGET, "Failed to serialize envelopes: {}", e);
            return;
        }
        self.drain();
    }

    /// Hand every queued item to a transport, oldest first.
    fn drain(&mut self) {
        while let Some(item) = self.queue.pop() {
            self.transmit(item);
        }
    }

    fn transmit(&mut self, item: OutboundItem) {
        if self.state == ConnectionState::Connected
            && let Some(link) = &self.link
        {
            match link.send(LinkCommand::Send(item.payload.clone())) {
                Ok(()) => return,
                Err(_) => warn!(target: LOG_TARGET, "Link gone, sending over discrete transport"),
            }
        }

        let headers = item.request_headers(&self.default_headers);
        let reply = self.discrete.exchange(DiscreteRequest {
            body: item.payload,
            headers,
        });
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let message = Response::decode_discrete(reply.await);
            let _ = events.send(EngineEvent::DiscreteReply(message));
        });
    }

    /// Put every outstanding envelope back on the queue, one group per batch.
    fn requeue_all(&mut self) {
        let live = self.table.live_by_batch();
        if live.is_empty() {
            return;
        }
        info!(
            target: LOG_TARGET,
            "Requeueing {} outstanding jobs in {} batches",
            self.table.len(),
            live.len()
        );

        self.batches.reset(
            live.iter()
                .map(|(batch_id, group)| (*batch_id, group.iter().map(Envelope::job_id).collect())),
        );
        for (_, group) in live {
            self.enqueue(&group);
        }
    }

    // ---- dispatcher ----

    fn dispatch(&mut self, message: Value) {
        let connected = self.state == ConnectionState::Connected;
        let requeue = Dispatcher::new(&mut self.table, &mut self.batches).dispatch(message, connected);
        for group in requeue {
            self.enqueue(&group);
        }
    }
}

/// Forward one link's events to the engine, then report it closed.
async fn pump_link(
    epoch: u64,
    mut link_events: mpsc::UnboundedReceiver<LinkEvent>,
    events: mpsc::UnboundedSender<EngineEvent>,
) {
    while let Some(event) = link_events.recv().await {
        let closed = event == LinkEvent::Closed;
        if events.send(EngineEvent::Link { epoch, event }).is_err() || closed {
            return;
        }
    }
    let _ = events.send(EngineEvent::Link {
        epoch,
        event: LinkEvent::Closed,
    });
}
