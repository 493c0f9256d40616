use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};

use tracing::debug;

use shoal_core::error::EventBusError;
use shoal_core::event::{Channel, Event, EventBus, EventPayload, EventSource};

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport is disconnected")]
    Disconnected,

    #[error("transport channel closed")]
    Closed,
}

/// An outbound frame handed to the socket layer.
///
/// Message frames carry the client-generated id so the server echo can be
/// deduplicated against the optimistic local copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Global {
        id: String,
        body: String,
    },
    Private {
        id: String,
        to: String,
        body: String,
    },
    Typing {
        active: bool,
    },
}

/// The bidirectional socket connection, seen from the client core.
///
/// Implementations own the inbound direction: server pushes are published as
/// `socket.*` events on the session's event bus. The outbound direction is
/// `emit`, which reports delivery as a result rather than a callback, so a
/// send attempted while the connection is down is observable to the caller
/// instead of silently dropped.
pub trait Transport: Send + Sync {
    fn emit(&self, frame: OutboundFrame) -> Result<(), TransportError>;

    fn is_connected(&self) -> bool;
}

/// In-memory transport: inbound pushes are injected by the driver (tests, the
/// demo binary), outbound frames are recorded for inspection.
pub struct LoopbackTransport {
    bus: Arc<dyn EventBus>,
    connected: AtomicBool,
    sent: Mutex<Vec<OutboundFrame>>,
}

impl LoopbackTransport {
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self {
            bus,
            connected: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Simulate the socket coming up; publishes `socket.connection.up`.
    pub fn connect(&self) -> Result<(), EventBusError> {
        self.connected.store(true, Ordering::Relaxed);
        self.publish("socket.connection.up", EventPayload::Connected)
    }

    /// Simulate the socket dropping; publishes `socket.connection.down`.
    pub fn disconnect(&self, reason: &str) -> Result<(), EventBusError> {
        self.connected.store(false, Ordering::Relaxed);
        self.publish(
            "socket.connection.down",
            EventPayload::Disconnected {
                reason: reason.to_string(),
            },
        )
    }

    /// Simulate a successful reconnect; publishes `socket.connection.reconnected`.
    pub fn reconnect(&self, attempt: u32) -> Result<(), EventBusError> {
        self.connected.store(true, Ordering::Relaxed);
        self.publish(
            "socket.connection.reconnected",
            EventPayload::Reconnected { attempt },
        )
    }

    /// Inject a server push. The channel is derived from the payload kind;
    /// non-socket payloads are rejected.
    pub fn inject(&self, payload: EventPayload) -> Result<(), EventBusError> {
        let channel = match &payload {
            EventPayload::Connected => "socket.connection.up",
            EventPayload::Disconnected { .. } => "socket.connection.down",
            EventPayload::Reconnected { .. } => "socket.connection.reconnected",
            EventPayload::MessageReceived { .. } => "socket.message.received",
            EventPayload::PrivateMessageReceived { .. } => "socket.message.private",
            EventPayload::TypingRoster { .. } => "socket.typing.changed",
            EventPayload::UserRoster { .. } => "socket.users.changed",
            EventPayload::UserJoined { .. } => "socket.user.joined",
            EventPayload::UserLeft { .. } => "socket.user.left",
            other => {
                return Err(EventBusError::InvalidChannel(format!(
                    "not a socket payload: {other:?}"
                )));
            }
        };
        self.publish(channel, payload)
    }

    /// Frames emitted so far, in order.
    pub fn sent_frames(&self) -> Vec<OutboundFrame> {
        self.sent.lock().unwrap().clone()
    }

    fn publish(&self, channel: &str, payload: EventPayload) -> Result<(), EventBusError> {
        self.bus
            .publish(Event::new(Channel::new(channel)?, EventSource::Socket, payload))
    }
}

impl Transport for LoopbackTransport {
    fn emit(&self, frame: OutboundFrame) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::Relaxed) {
            return Err(TransportError::Disconnected);
        }
        debug!(?frame, "loopback transport emit");
        self.sent.lock().unwrap().push(frame);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}
