//! Connection state machine for the bidirectional transport.

/// State of the bidirectional transport as seen by the engine.
///
/// This is the single source of truth for "connected": it only becomes
/// `Connected` once the engine has processed the open (requeue and health
/// restart included).
///
/// State transitions:
/// - Disconnected -> Connecting (connect attempt started)
/// - Connecting -> Connected (link opened)
/// - Connecting -> Disconnected (attempt failed)
/// - Connected -> Disconnected (link closed, or force-closed by the engine)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No link; traffic flows over the discrete transport
    Disconnected,
    /// Connect attempt in flight
    Connecting,
    /// Link open and bookkeeping done
    Connected,
}

/// How the engine ended up carrying traffic once its first connection settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMode {
    /// The bidirectional transport opened
    Duplex,
    /// The bidirectional transport is disabled; every request is a discrete round trip
    DiscreteOnly,
}

/// Outcome of the very first connection attempt.
///
/// Settles once; later disconnects are handled by the reconnect loop alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum InitialConnection {
    Pending,
    Ready(ConnectionMode),
    Failed(String),
}

impl InitialConnection {
    pub(crate) fn is_pending(&self) -> bool {
        matches!(self, InitialConnection::Pending)
    }
}

/// Inputs to the connection state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectionEvent {
    ConnectStarted,
    Opened,
    ConnectFailed,
    Closed,
    ForceClosed,
}

/// Transition table. `None` means the event does not apply in `state`.
pub(crate) fn transition(state: ConnectionState, event: ConnectionEvent) -> Option<ConnectionState> {
    use ConnectionEvent::*;
    use ConnectionState::*;

    match (state, event) {
        (Disconnected, ConnectStarted) => Some(Connecting),
        (Connecting, Opened) => Some(Connected),
        (Connecting, ConnectFailed) => Some(Disconnected),
        (Connected, Closed) | (Connected, ForceClosed) => Some(Disconnected),
        _ => None,
    }
}
