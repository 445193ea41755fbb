//! Connection lifecycle state machine.
//!
//! ```text
//! Disconnected --Open--> Connecting --HandshakeSucceeded--> Connected
//!      ^                     |                                  |
//!      |              HandshakeFailed                   Close / RemoteShutdown
//!      |                     v                                  v
//!      |                   Failed                          Disconnecting
//!      |                                                        |
//!      +-------------------TeardownComplete---------------------+
//!
//! any state --TransportError--> Failed --Open--> Connecting
//! ```
//!
//! Transitions are serialized and every observer runs, in registration
//! order, before the transition returns. The machine also gates inbound
//! delivery: frames are only handed out once every `Connected` observer has
//! returned and the frames held back before them have been released, so
//! bindings made from those observers are in place first and arrival order
//! is kept.

use crate::error::{AgentError, Result};
use crate::transport::InboundFrame;
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Not connected; the initial state.
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Normal operation.
    Connected,
    /// Orderly teardown in progress.
    Disconnecting,
    /// Unrecoverable transport error. Only `Open` leaves this state.
    Failed,
}

impl ConnectionState {
    /// The state reached by applying `event`, if the transition is allowed.
    pub fn next(self, event: &ConnectionEvent) -> Option<ConnectionState> {
        use ConnectionEvent as E;
        use ConnectionState as S;

        match (self, event) {
            (S::Disconnected | S::Failed, E::Open) => Some(S::Connecting),
            (S::Connecting, E::HandshakeSucceeded) => Some(S::Connected),
            (S::Connecting, E::HandshakeFailed(_)) => Some(S::Failed),
            (S::Connected, E::Close | E::RemoteShutdown) => Some(S::Disconnecting),
            (S::Disconnecting, E::TeardownComplete) => Some(S::Disconnected),
            (_, E::TransportError(_)) => Some(S::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnecting => "disconnecting",
            ConnectionState::Failed => "failed",
        })
    }
}

/// Signals that drive the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The host asked to connect.
    Open,
    HandshakeSucceeded,
    HandshakeFailed(String),
    /// The host asked to disconnect.
    Close,
    /// The broker asked us to go away.
    RemoteShutdown,
    /// The transport confirmed teardown.
    TeardownComplete,
    /// Unrecoverable transport error.
    TransportError(String),
}

impl fmt::Display for ConnectionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionEvent::Open => f.write_str("open"),
            ConnectionEvent::HandshakeSucceeded => f.write_str("handshake succeeded"),
            ConnectionEvent::HandshakeFailed(reason) => write!(f, "handshake failed: {reason}"),
            ConnectionEvent::Close => f.write_str("close"),
            ConnectionEvent::RemoteShutdown => f.write_str("remote shutdown"),
            ConnectionEvent::TeardownComplete => f.write_str("teardown complete"),
            ConnectionEvent::TransportError(reason) => write!(f, "transport error: {reason}"),
        }
    }
}

/// Callback notified of every transition, with the context it is attached to.
pub type StateObserver<C> = Arc<dyn Fn(&C, ConnectionState) -> anyhow::Result<()> + Send + Sync>;

/// Result of applying an event.
#[derive(Debug)]
pub struct Transition {
    pub from: ConnectionState,
    pub to: ConnectionState,
    pub observer_failures: usize,
    generation: u64,
}

/// What the gate decided for an inbound frame.
#[derive(Debug)]
pub enum Admission {
    /// Deliver now.
    Deliver(InboundFrame),
    /// Held until the `Connected` observers have run and earlier frames
    /// have been released.
    Deferred,
    /// Dropped.
    Rejected(AgentError),
}

#[derive(Debug, Default)]
struct Gate {
    open: bool,
    backlog: VecDeque<InboundFrame>,
    /// Bumped by every transition; a release from an older one is stale.
    generation: u64,
}

/// Serialized connection state plus its ordered observers.
pub struct ConnectionStateMachine<C> {
    transition: Mutex<()>,
    state: RwLock<ConnectionState>,
    observers: RwLock<Vec<StateObserver<C>>>,
    gate: Mutex<Gate>,
    max_pending: usize,
}

impl<C> ConnectionStateMachine<C> {
    pub fn new(max_pending: usize) -> Self {
        Self {
            transition: Mutex::new(()),
            state: RwLock::new(ConnectionState::Disconnected),
            observers: RwLock::new(Vec::new()),
            gate: Mutex::new(Gate::default()),
            max_pending,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Observers registered during a transition are notified from the next one on.
    pub fn register_observer<F>(&self, observer: F)
    where
        F: Fn(&C, ConnectionState) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.observers.write().push(Arc::new(observer));
    }

    pub fn observer_count(&self) -> usize {
        self.observers.read().len()
    }

    /// Apply `event`, notifying observers with `ctx`.
    ///
    /// Observers must not apply events themselves: the transition lock is
    /// held while they run.
    pub fn apply(&self, ctx: &C, event: ConnectionEvent) -> Result<Transition> {
        let _serial = self.transition.lock();

        let from = self.state();
        if from == ConnectionState::Failed && matches!(event, ConnectionEvent::TransportError(_)) {
            debug!(%event, "already failed, ignoring");
            return Ok(Transition {
                from,
                to: from,
                observer_failures: 0,
                generation: 0,
            });
        }

        let to = from
            .next(&event)
            .ok_or_else(|| AgentError::InvalidTransition {
                from,
                event: event.clone(),
            })?;

        let generation;
        {
            let mut gate = self.gate.lock();
            gate.open = false;
            gate.generation += 1;
            if !matches!(to, ConnectionState::Connecting | ConnectionState::Connected)
                && !gate.backlog.is_empty()
            {
                warn!(
                    discarded = gate.backlog.len(),
                    state = %to,
                    "connection lost, discarding pending frames"
                );
                gate.backlog.clear();
            }
            generation = gate.generation;
            *self.state.write() = to;
        }
        info!(%from, %to, %event, "connection state changed");

        let observers = self.observers.read().clone();
        let mut observer_failures = 0;
        for (index, observer) in observers.iter().enumerate() {
            if let Err(err) = observer(ctx, to) {
                observer_failures += 1;
                warn!(observer = index, state = %to, "state observer failed: {err:#}");
            }
        }

        Ok(Transition {
            from,
            to,
            observer_failures,
            generation,
        })
    }

    /// Hand out the next frame held back before `transition` reached
    /// `Connected`, oldest first.
    ///
    /// The gate opens once the backlog is empty, so the caller must keep
    /// calling this until it returns `None`. Frames admitted meanwhile queue
    /// behind the backlog. Returns `None` straight away when `transition`
    /// did not connect or a later transition has already happened.
    pub fn release_next(&self, transition: &Transition) -> Option<InboundFrame> {
        if transition.to != ConnectionState::Connected {
            return None;
        }
        let mut gate = self.gate.lock();
        if gate.generation != transition.generation {
            return None;
        }
        let next = gate.backlog.pop_front();
        if next.is_none() {
            gate.open = true;
        }
        next
    }

    /// Decide what happens to an inbound frame.
    pub fn admit(&self, frame: InboundFrame) -> Admission {
        let mut gate = self.gate.lock();
        if gate.open {
            return Admission::Deliver(frame);
        }

        match self.state() {
            ConnectionState::Connecting | ConnectionState::Connected => {
                if gate.backlog.len() >= self.max_pending {
                    Admission::Rejected(AgentError::BacklogFull(self.max_pending))
                } else {
                    gate.backlog.push_back(frame);
                    Admission::Deferred
                }
            }
            state => Admission::Rejected(AgentError::NotConnected(state)),
        }
    }

    /// Frames currently held back.
    pub fn pending(&self) -> usize {
        self.gate.lock().backlog.len()
    }
}
