use chrono::{DateTime, Utc};
use globset::{Glob, GlobMatcher};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::EventBusError;
use crate::message::{Message, WireMessage, WireUser};

/// A validated, dot-separated channel name such as `socket.message.received`.
///
/// The leading segment is the domain and decides which broadcast channel the
/// event rides on. Only `socket` (pushes from the transport) and `system`
/// (results and signals produced by the client itself) exist.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Channel(String);

impl Channel {
    pub fn new(name: impl Into<String>) -> Result<Self, EventBusError> {
        let name = name.into();
        if Self::is_valid(&name) {
            Ok(Self(name))
        } else {
            Err(EventBusError::InvalidChannel(name))
        }
    }

    /// Lowercase segments of `[a-z0-9]` joined by single dots, starting with
    /// a known domain.
    pub fn is_valid(name: &str) -> bool {
        let mut segments = name.split('.');
        if !matches!(segments.next(), Some("socket" | "system")) {
            return false;
        }
        segments.all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        })
    }

    pub fn domain(&self) -> &str {
        self.0.split('.').next().unwrap_or("")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Channel> for String {
    fn from(channel: Channel) -> Self {
        channel.0
    }
}

/// Envelope carried by every event on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub channel: Channel,

    /// Creation time (UTC), not delivery time.
    pub timestamp: DateTime<Utc>,

    pub id: Uuid,

    /// Which component produced the event.
    pub source: EventSource,

    pub payload: EventPayload,
}

impl Event {
    pub fn new(channel: Channel, source: EventSource, payload: EventPayload) -> Self {
        Self {
            channel,
            timestamp: Utc::now(),
            id: Uuid::new_v4(),
            source,
            payload,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "camelCase")]
pub enum EventSource {
    /// The socket transport adapter.
    Socket,
    /// A client-side component, named (session controller, history loader).
    System(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum EventPayload {
    // ── Socket lifecycle events ──────────────────────────────────
    Connected,
    Disconnected {
        reason: String,
    },
    Reconnected {
        attempt: u32,
    },

    // ── Socket push events ───────────────────────────────────────
    MessageReceived {
        message: WireMessage,
    },
    PrivateMessageReceived {
        message: WireMessage,
    },
    TypingRoster {
        usernames: Vec<String>,
    },
    UserRoster {
        users: Vec<WireUser>,
    },
    UserJoined {
        username: String,
    },
    UserLeft {
        username: String,
    },

    // ── System events (controller / history loader) ──────────────
    HistoryPageLoaded {
        epoch: u64,
        messages: Vec<Message>,
    },
    HistoryPageFailed {
        epoch: u64,
        error: String,
    },
    ConnectionLost {
        reason: String,
    },
    ErrorOccurred {
        component: String,
        message: String,
        recoverable: bool,
    },
}

pub trait EventBus: Send + Sync + 'static {
    fn publish(&self, event: Event) -> Result<(), EventBusError>;
    fn subscribe(&self, pattern: &str) -> Result<EventSubscription, EventBusError>;
}

/// Event bus over one `tokio::sync::broadcast` channel per domain.
///
/// Publishing never blocks and never fails for lack of subscribers; a slow
/// subscriber observes `Lagged` rather than stalling publishers.
#[derive(Clone)]
pub struct BroadcastEventBus {
    socket_sender: broadcast::Sender<Event>,
    system_sender: broadcast::Sender<Event>,
}

impl BroadcastEventBus {
    pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

    pub fn new(channel_capacity: usize) -> Self {
        let capacity = channel_capacity.max(1);
        Self {
            socket_sender: broadcast::channel(capacity).0,
            system_sender: broadcast::channel(capacity).0,
        }
    }

    fn sender_for_domain(&self, domain: &str) -> Option<&broadcast::Sender<Event>> {
        match domain {
            "socket" => Some(&self.socket_sender),
            "system" => Some(&self.system_sender),
            _ => None,
        }
    }

    /// Which domain receivers a pattern needs. A glob in the first segment
    /// (`*`, `{socket,system}`, ...) taps both domains; a literal first
    /// segment taps exactly its own.
    fn receivers_for_pattern(&self, pattern: &str) -> Result<DomainReceivers, EventBusError> {
        let first = pattern.split('.').next().unwrap_or_default();

        if segment_has_glob(first) {
            return Ok(DomainReceivers {
                socket: Some(self.socket_sender.subscribe()),
                system: Some(self.system_sender.subscribe()),
            });
        }

        match first {
            "socket" => Ok(DomainReceivers {
                socket: Some(self.socket_sender.subscribe()),
                system: None,
            }),
            "system" => Ok(DomainReceivers {
                socket: None,
                system: Some(self.system_sender.subscribe()),
            }),
            _ => Err(EventBusError::InvalidPattern(pattern.to_string())),
        }
    }
}

impl Default for BroadcastEventBus {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CHANNEL_CAPACITY)
    }
}

impl EventBus for BroadcastEventBus {
    fn publish(&self, event: Event) -> Result<(), EventBusError> {
        let sender = self
            .sender_for_domain(event.channel.domain())
            .ok_or_else(|| EventBusError::InvalidChannel(event.channel.to_string()))?;

        // A send error only means nobody is listening right now.
        let _ = sender.send(event);
        Ok(())
    }

    fn subscribe(&self, pattern: &str) -> Result<EventSubscription, EventBusError> {
        let matcher = Glob::new(pattern)
            .map_err(|_| EventBusError::InvalidPattern(pattern.to_string()))?
            .compile_matcher();
        let receivers = self.receivers_for_pattern(pattern)?;

        Ok(EventSubscription { matcher, receivers })
    }
}

struct DomainReceivers {
    socket: Option<broadcast::Receiver<Event>>,
    system: Option<broadcast::Receiver<Event>>,
}

/// A live subscription: receives from the tapped domains and yields only the
/// events whose channel matches the glob pattern.
pub struct EventSubscription {
    matcher: GlobMatcher,
    receivers: DomainReceivers,
}

impl EventSubscription {
    pub async fn recv(&mut self) -> Result<Event, EventBusError> {
        loop {
            let received = tokio::select! {
                result = next_event(self.receivers.socket.as_mut()) => result,
                result = next_event(self.receivers.system.as_mut()) => result,
            };

            match received {
                Ok(event) if self.matcher.is_match(event.channel.as_str()) => return Ok(event),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(EventBusError::ChannelClosed);
                }
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    return Err(EventBusError::Lagged(count));
                }
            }
        }
    }
}

/// Receive from one domain tap, or park forever if this subscription does not
/// tap that domain (so the select! never completes on it).
async fn next_event(
    receiver: Option<&mut broadcast::Receiver<Event>>,
) -> Result<Event, broadcast::error::RecvError> {
    match receiver {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}

fn segment_has_glob(segment: &str) -> bool {
    segment.chars().any(|c| "*?[]{}!".contains(c))
}


#[cfg(test)]
mod event_bus_tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn make_event(channel: &str, payload: EventPayload) -> Event {
        Event::new(
            Channel::new(channel).unwrap(),
            EventSource::System("test".into()),
            payload,
        )
    }

    fn socket_event(channel: &str, payload: EventPayload) -> Event {
        Event::new(Channel::new(channel).unwrap(), EventSource::Socket, payload)
    }

    #[tokio::test]
    async fn publish_to_socket_routes_to_socket_subscriber() {
        let bus = BroadcastEventBus::default();
        let mut sub = bus.subscribe("socket.**").unwrap();

        bus.publish(socket_event(
            "socket.user.joined",
            EventPayload::UserJoined {
                username: "alice".into(),
            },
        ))
        .unwrap();

        let event = timeout(Duration::from_millis(100), sub.recv())
            .await
            .expect("timed out")
            .unwrap();
        assert_eq!(event.channel.as_str(), "socket.user.joined");
    }

    #[tokio::test]
    async fn socket_event_not_received_by_system_subscriber() {
        let bus = BroadcastEventBus::default();
        let mut sub = bus.subscribe("system.**").unwrap();

        bus.publish(socket_event(
            "socket.user.joined",
            EventPayload::UserJoined {
                username: "alice".into(),
            },
        ))
        .unwrap();

        let result = timeout(Duration::from_millis(50), sub.recv()).await;
        assert!(
            result.is_err(),
            "system subscriber should not receive socket events"
        );
    }

    #[tokio::test]
    async fn publish_succeeds_with_no_subscribers() {
        let bus = BroadcastEventBus::default();
        let result = bus.publish(make_event(
            "system.connection.lost",
            EventPayload::ConnectionLost {
                reason: "transport closed".into(),
            },
        ));
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn glob_star_matches_single_segment() {
        let bus = BroadcastEventBus::default();
        let mut sub = bus.subscribe("socket.connection.*").unwrap();

        bus.publish(socket_event(
            "socket.typing.changed",
            EventPayload::TypingRoster { usernames: vec![] },
        ))
        .unwrap();
        bus.publish(socket_event(
            "socket.connection.up",
            EventPayload::Connected,
        ))
        .unwrap();

        let event = timeout(Duration::from_millis(100), sub.recv())
            .await
            .expect("timed out")
            .unwrap();
        assert_eq!(event.channel.as_str(), "socket.connection.up");
    }

    #[tokio::test]
    async fn brace_pattern_receives_both_domains() {
        let bus = BroadcastEventBus::default();
        let mut sub = bus.subscribe("{socket,system}.**").unwrap();

        bus.publish(socket_event(
            "socket.connection.up",
            EventPayload::Connected,
        ))
        .unwrap();
        bus.publish(make_event(
            "system.history.failed",
            EventPayload::HistoryPageFailed {
                epoch: 1,
                error: "boom".into(),
            },
        ))
        .unwrap();

        let mut channels = Vec::new();
        for _ in 0..2 {
            let event = timeout(Duration::from_millis(100), sub.recv())
                .await
                .expect("timed out")
                .unwrap();
            channels.push(event.channel.as_str().to_string());
        }

        channels.sort();
        assert_eq!(
            channels,
            vec!["socket.connection.up", "system.history.failed"]
        );
    }

    #[tokio::test]
    async fn subscribe_invalid_pattern_returns_error() {
        let bus = BroadcastEventBus::default();
        assert!(bus.subscribe("[invalid").is_err());
        assert!(bus.subscribe("").is_err());
        assert!(matches!(
            bus.subscribe("unknown.domain.event"),
            Err(EventBusError::InvalidPattern(_))
        ));
    }

    #[tokio::test]
    async fn events_within_domain_preserve_publish_order() {
        let bus = BroadcastEventBus::default();
        let mut sub = bus.subscribe("socket.**").unwrap();

        for i in 0..10 {
            bus.publish(socket_event(
                "socket.message.received",
                EventPayload::MessageReceived {
                    message: WireMessage {
                        id: Some(format!("msg{i}")),
                        ..Default::default()
                    },
                },
            ))
            .unwrap();
        }

        for i in 0..10 {
            let event = timeout(Duration::from_millis(100), sub.recv())
                .await
                .expect("timed out")
                .unwrap();
            match &event.payload {
                EventPayload::MessageReceived { message } => {
                    assert_eq!(
                        message.id.as_deref(),
                        Some(format!("msg{i}").as_str()),
                        "out of order at index {i}"
                    );
                }
                _ => panic!("unexpected payload"),
            }
        }
    }

    #[tokio::test]
    async fn lagged_subscriber_returns_lagged_error() {
        let bus = BroadcastEventBus::new(2);
        let mut sub = bus.subscribe("system.**").unwrap();

        // Overflow the small buffer
        for i in 0..10 {
            bus.publish(make_event(
                "system.error",
                EventPayload::ErrorOccurred {
                    component: "test".into(),
                    message: format!("event {i}"),
                    recoverable: true,
                },
            ))
            .unwrap();
        }

        let result = sub.recv().await;
        assert!(
            matches!(result, Err(EventBusError::Lagged(_))),
            "expected Lagged error, got {result:?}"
        );
    }

    #[tokio::test]
    async fn channel_closed_when_bus_dropped() {
        let mut sub;
        {
            let bus = BroadcastEventBus::default();
            sub = bus.subscribe("socket.**").unwrap();
        }

        let result = sub.recv().await;
        assert!(matches!(result, Err(EventBusError::ChannelClosed)));
    }

    #[tokio::test]
    async fn zero_capacity_clamped_to_one() {
        let bus = BroadcastEventBus::new(0);
        let mut sub = bus.subscribe("socket.**").unwrap();

        bus.publish(socket_event(
            "socket.connection.up",
            EventPayload::Connected,
        ))
        .unwrap();

        let event = timeout(Duration::from_millis(100), sub.recv())
            .await
            .expect("timed out")
            .unwrap();
        assert_eq!(event.channel.as_str(), "socket.connection.up");
    }

    #[tokio::test]
    async fn trait_object_publish_and_subscribe() {
        let bus: Box<dyn EventBus> = Box::new(BroadcastEventBus::default());
        let mut sub = bus.subscribe("socket.**").unwrap();

        bus.publish(socket_event(
            "socket.connection.up",
            EventPayload::Connected,
        ))
        .unwrap();

        let event = timeout(Duration::from_millis(100), sub.recv())
            .await
            .expect("timed out")
            .unwrap();
        assert_eq!(event.channel.as_str(), "socket.connection.up");
    }
}
