use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use shoal_core::error::EventBusError;
use shoal_core::event::{Channel, Event, EventBus, EventPayload, EventSource};
use shoal_core::message::{Message, Scope, User, WireMessage};
use shoal_history::{HistoryLoader, HistoryService, PaginationState};
use shoal_notify::NotificationSink;
use shoal_presence::PresenceTracker;
use shoal_timeline::Timeline;
use shoal_transport::{OutboundFrame, Transport, TransportError};

const SESSION_SOURCE: &str = "session";

/// What the viewer is currently looking at. Exactly one context is active at
/// a time; switching clears the timeline and pagination, which are scoped
/// per-context and never shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationContext {
    Global,
    Private { peer_id: String, peer_name: String },
}

impl ConversationContext {
    pub fn private(peer: &User) -> Self {
        Self::Private {
            peer_id: peer.id.clone(),
            peer_name: peer.username.clone(),
        }
    }

    pub fn scope(&self) -> Scope {
        match self {
            Self::Global => Scope::Global,
            Self::Private { peer_id, .. } => Scope::Private(peer_id.clone()),
        }
    }

    /// A live message belongs in this context iff it is global in the global
    /// room, or private with the active peer as the other participant.
    pub fn is_visible(&self, message: &Message) -> bool {
        match (self, &message.scope) {
            (Self::Global, Scope::Global) => true,
            (Self::Private { peer_id, .. }, Scope::Private(peer)) => peer == peer_id,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connected,
}

impl ConnectionStatus {
    pub fn label(&self) -> &str {
        match self {
            Self::Disconnected => "Disconnected",
            Self::Connected => "Connected",
        }
    }
}

/// The whole mutable session, as one explicit value owned by the controller.
/// The presentation layer reads it through [`SessionController::state`]; all
/// mutation goes through controller methods.
pub struct SessionState {
    pub context: ConversationContext,
    /// Bumped on every context switch; history responses carry the epoch of
    /// the context they were requested for, and stale ones are discarded.
    pub epoch: u64,
    pub timeline: Timeline,
    pub presence: PresenceTracker,
    pub pagination: PaginationState,
    pub connection: ConnectionStatus,
    pub draft: String,
}

impl SessionState {
    fn new(self_username: &str, page_size: u32) -> Self {
        Self {
            context: ConversationContext::Global,
            epoch: 0,
            timeline: Timeline::new(),
            presence: PresenceTracker::new(self_username),
            pagination: PaginationState::new(page_size),
            connection: ConnectionStatus::Disconnected,
            draft: String::new(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("cannot send an empty message")]
    Empty,

    #[error("message was not delivered: {0}")]
    NotDelivered(#[from] TransportError),
}

/// Returned from a successful send; carries the client-assigned message id
/// so the caller can correlate the eventual echo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    pub id: String,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("event bus error: {0}")]
    EventBus(#[from] EventBusError),
}

/// Top-level orchestrator: owns the conversation context, dispatches socket
/// events into the timeline and presence tracker, and exposes the intent API
/// consumed by the presentation layer.
pub struct SessionController<H: HistoryService> {
    state: SessionState,
    bus: Arc<dyn EventBus>,
    transport: Arc<dyn Transport>,
    sink: Arc<dyn NotificationSink>,
    loader: HistoryLoader<H>,
    self_user: User,
}

impl<H: HistoryService> SessionController<H> {
    pub fn new(
        self_user: User,
        bus: Arc<dyn EventBus>,
        transport: Arc<dyn Transport>,
        history: Arc<H>,
        sink: Arc<dyn NotificationSink>,
        page_size: u32,
    ) -> Self {
        let loader = HistoryLoader::new(history, bus.clone(), self_user.id.clone());
        Self {
            state: SessionState::new(&self_user.username, page_size),
            bus,
            transport,
            sink,
            loader,
            self_user,
        }
    }

    /// Read-only snapshot for the presentation layer.
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn self_user(&self) -> &User {
        &self.self_user
    }

    /// Apply one event from the socket or a resolved history fetch. Events
    /// are discrete, non-overlapping reactions; nothing here blocks.
    pub fn handle_event(&mut self, event: &Event) {
        match &event.payload {
            EventPayload::Connected => {
                self.state.connection = ConnectionStatus::Connected;
            }
            EventPayload::Reconnected { attempt } => {
                // Deliberately no history or presence refetch: the server
                // pushes fresh rosters, and the timeline stays as last known.
                debug!(attempt, "transport reconnected");
                self.state.connection = ConnectionStatus::Connected;
            }
            EventPayload::Disconnected { reason } => {
                self.state.connection = ConnectionStatus::Disconnected;
                self.publish_system(
                    "system.connection.lost",
                    EventPayload::ConnectionLost {
                        reason: reason.clone(),
                    },
                );
            }
            EventPayload::MessageReceived { message }
            | EventPayload::PrivateMessageReceived { message } => {
                self.on_socket_message(message.clone());
            }
            EventPayload::TypingRoster { usernames } => {
                self.state.presence.apply_typing_list(usernames.clone());
            }
            EventPayload::UserRoster { users } => {
                self.state.presence.apply_user_list(users.clone());
            }
            EventPayload::UserJoined { username } => {
                let notice = self.state.presence.user_joined(username);
                self.state.timeline.append_live(notice);
            }
            EventPayload::UserLeft { username } => {
                let notice = self.state.presence.user_left(username);
                self.state.timeline.append_live(notice);
            }
            EventPayload::HistoryPageLoaded { epoch, messages } => {
                if *epoch != self.state.epoch {
                    debug!(
                        page_epoch = epoch,
                        current_epoch = self.state.epoch,
                        "discarding history page for a stale context"
                    );
                    return;
                }
                self.state.pagination.complete_page(messages.len());
                self.state.timeline.prepend_history(messages.clone());
            }
            EventPayload::HistoryPageFailed { epoch, error } => {
                if *epoch != self.state.epoch {
                    return;
                }
                warn!(error = %error, "history page fetch failed, window left for retry");
                self.state.pagination.complete_failed();
            }
            // Published by this component; nothing to apply.
            EventPayload::ConnectionLost { .. } | EventPayload::ErrorOccurred { .. } => {}
        }
    }

    /// Route a pushed message record into the active timeline or the
    /// out-of-band notification channel.
    fn on_socket_message(&mut self, record: WireMessage) {
        let message = match record.into_message(&self.self_user.id) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "dropping malformed message event");
                self.publish_system(
                    "system.error",
                    EventPayload::ErrorOccurred {
                        component: SESSION_SOURCE.to_string(),
                        message: e.to_string(),
                        recoverable: true,
                    },
                );
                return;
            }
        };

        if self.state.context.is_visible(&message) {
            self.state.timeline.append_live(message);
        } else if message.scope.is_private() && message.sender_id != self.self_user.id {
            // A private message for the viewer while another thread is open:
            // never merged into the wrong conversation, surfaced out of band.
            debug!(sender = %message.sender, "private message outside the active thread");
            let title = format!("Private message from {}", message.sender);
            if let Err(e) = self.sink.notify(&title, &message.body) {
                warn!(error = %e, "notification sink failed");
            }
        }
    }

    /// Send the text to the active context. The message is appended
    /// optimistically once the transport accepts it; the server echo carrying
    /// the same id deduplicates against the local copy. A transport refusal
    /// (e.g. disconnected) is returned to the caller and leaves no trace.
    pub fn send_message(&mut self, text: &str) -> Result<SendReceipt, SendError> {
        let body = text.trim();
        if body.is_empty() {
            return Err(SendError::Empty);
        }

        let id = Uuid::new_v4().to_string();
        let frame = match &self.state.context {
            ConversationContext::Global => OutboundFrame::Global {
                id: id.clone(),
                body: body.to_string(),
            },
            ConversationContext::Private { peer_id, .. } => OutboundFrame::Private {
                id: id.clone(),
                to: peer_id.clone(),
                body: body.to_string(),
            },
        };
        self.transport.emit(frame)?;

        let message = Message {
            id: id.clone(),
            sender: self.self_user.username.clone(),
            sender_id: self.self_user.id.clone(),
            body: body.to_string(),
            timestamp: Utc::now(),
            scope: self.state.context.scope(),
        };
        self.state.timeline.append_live(message);
        self.set_composing_text("");

        Ok(SendReceipt { id })
    }

    /// Switch the active context: clears the timeline, resets pagination,
    /// bumps the epoch (orphaning any in-flight fetch), and starts the new
    /// context's initial history load.
    pub fn switch_to(&mut self, context: ConversationContext) {
        debug!(?context, "switching conversation context");
        self.state.context = context;
        self.state.epoch += 1;
        self.state.timeline.reset();
        self.state.pagination.reset();
        self.load_earlier();
    }

    /// Page backward through the active context's history. A no-op while a
    /// fetch is in flight or after the context is exhausted.
    pub fn load_earlier(&mut self) {
        if !self.state.pagination.try_begin() {
            debug!("history fetch already in flight or context exhausted");
            return;
        }
        self.loader.spawn_fetch(
            self.state.context.scope(),
            self.state.epoch,
            self.state.pagination.offset,
            self.state.pagination.limit,
        );
    }

    /// Update the local draft; emits a typing signal on every empty/non-empty
    /// boundary crossing. A refused signal is logged, never fatal.
    pub fn set_composing_text(&mut self, text: &str) {
        self.state.draft = text.to_string();
        if let Some(active) = self.state.presence.set_local_typing(!text.is_empty()) {
            if let Err(e) = self.transport.emit(OutboundFrame::Typing { active }) {
                warn!(error = %e, "typing signal not sent");
            }
        }
    }

    /// Drive the controller from the bus until it closes. The loop owns the
    /// single subscription for the session; it is released when the loop
    /// returns, and context switches never re-register handlers.
    pub async fn run(mut self) -> Result<Self, SessionError> {
        let mut sub = self.bus.subscribe("{socket,system}.**")?;

        loop {
            match sub.recv().await {
                Ok(event) => self.handle_event(&event),
                Err(EventBusError::ChannelClosed) => {
                    debug!("event bus closed, session controller stopping");
                    return Ok(self);
                }
                Err(EventBusError::Lagged(count)) => {
                    warn!(count, "session controller lagged, some events dropped");
                }
                Err(e) => return Err(SessionError::EventBus(e)),
            }
        }
    }

    fn publish_system(&self, channel: &str, payload: EventPayload) {
        let event = Event::new(
            Channel::new(channel).unwrap(),
            EventSource::System(SESSION_SOURCE.to_string()),
            payload,
        );
        if let Err(e) = self.bus.publish(event) {
            warn!(error = %e, "failed to publish session event");
        }
    }
}
