use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Display name used for synthetic timeline notices (joins, leaves).
pub const SYSTEM_SENDER: &str = "System";

/// Stable identity reserved for synthetic notices. Real peers are keyed by
/// socket-assigned ids, which never take this form.
pub const SYSTEM_SENDER_ID: &str = "shoal:system";

/// Which conversation a message belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "peer", rename_all = "camelCase")]
pub enum Scope {
    /// The shared room every connected user sees.
    Global,
    /// A pairwise thread; `peer` is the *other* participant's stable id,
    /// which is not necessarily the viewer.
    Private(String),
}

impl Scope {
    pub fn is_private(&self) -> bool {
        matches!(self, Scope::Private(_))
    }

    pub fn peer(&self) -> Option<&str> {
        match self {
            Scope::Global => None,
            Scope::Private(peer) => Some(peer),
        }
    }
}

/// A single timeline entry. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique id, comparable for deduplication.
    pub id: String,

    /// Display name of the sender (not unique across users).
    pub sender: String,

    /// Stable sender identity used for routing and equality checks.
    pub sender_id: String,

    /// Plain-text body.
    pub body: String,

    /// Ordering key (UTC).
    pub timestamp: DateTime<Utc>,

    /// Global feed or a specific pairwise thread.
    pub scope: Scope,
}

impl Message {
    /// Total-order key: timestamp first, id as the tie breaker.
    pub fn ordering_key(&self) -> (DateTime<Utc>, &str) {
        (self.timestamp, self.id.as_str())
    }

    /// Construct a synthetic notice carrying the reserved `System` identity.
    pub fn system_notice(body: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            sender: SYSTEM_SENDER.to_string(),
            sender_id: SYSTEM_SENDER_ID.to_string(),
            body: body.into(),
            timestamp: Utc::now(),
            scope: Scope::Global,
        }
    }

    pub fn is_system_notice(&self) -> bool {
        self.sender_id == SYSTEM_SENDER_ID
    }
}

/// A connected user as reported by the roster snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Stable identity.
    pub id: String,

    /// Display name; may collide across users and is never used for routing.
    pub username: String,
}

/// A decode failure for a pushed or fetched record. The offending record is
/// dropped with a diagnostic; it is never inserted un-orderable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireDecodeError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("unparseable timestamp `{0}`")]
    BadTimestamp(String),
}

/// Message record as it appears on the socket and the history endpoint.
///
/// Every field is optional at the wire layer; [`WireMessage::into_message`]
/// enforces what the timeline actually requires.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WireMessage {
    pub id: Option<String>,
    pub sender: Option<String>,
    pub sender_id: Option<String>,
    pub message: Option<String>,
    pub timestamp: Option<String>,
    pub is_private: Option<bool>,
    pub recipient_id: Option<String>,
}

impl WireMessage {
    /// Validate and convert into a domain [`Message`].
    ///
    /// `viewer_id` resolves the private-thread peer: for a private record the
    /// peer is the participant who is not the viewer.
    pub fn into_message(self, viewer_id: &str) -> Result<Message, WireDecodeError> {
        let id = self
            .id
            .filter(|id| !id.is_empty())
            .ok_or(WireDecodeError::MissingField("id"))?;
        let raw_timestamp = self
            .timestamp
            .ok_or(WireDecodeError::MissingField("timestamp"))?;
        let timestamp = raw_timestamp
            .parse::<DateTime<Utc>>()
            .map_err(|_| WireDecodeError::BadTimestamp(raw_timestamp))?;
        let body = self
            .message
            .ok_or(WireDecodeError::MissingField("message"))?;
        let sender = self
            .sender
            .filter(|s| !s.is_empty())
            .ok_or(WireDecodeError::MissingField("sender"))?;
        // Older server builds omit senderId on archived rows; the display
        // name is the only identity available there.
        let sender_id = self
            .sender_id
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| sender.clone());

        let scope = if self.is_private.unwrap_or(false) {
            let peer = if sender_id == viewer_id {
                self.recipient_id
                    .filter(|r| !r.is_empty())
                    .ok_or(WireDecodeError::MissingField("recipientId"))?
            } else {
                sender_id.clone()
            };
            Scope::Private(peer)
        } else {
            Scope::Global
        };

        Ok(Message {
            id,
            sender,
            sender_id,
            body,
            timestamp,
            scope,
        })
    }
}

/// User record as it appears in `user_list` snapshots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WireUser {
    pub id: Option<String>,
    pub username: Option<String>,
}

impl WireUser {
    pub fn into_user(self) -> Result<User, WireDecodeError> {
        let id = self
            .id
            .filter(|id| !id.is_empty())
            .ok_or(WireDecodeError::MissingField("id"))?;
        let username = self
            .username
            .filter(|u| !u.is_empty())
            .ok_or(WireDecodeError::MissingField("username"))?;
        Ok(User { id, username })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire(id: &str, ts: &str) -> WireMessage {
        WireMessage {
            id: Some(id.to_string()),
            sender: Some("alice".to_string()),
            sender_id: Some("s-alice".to_string()),
            message: Some("hello".to_string()),
            timestamp: Some(ts.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn decodes_global_message() {
        let msg = wire("m1", "2024-05-01T10:00:00Z")
            .into_message("s-me")
            .unwrap();
        assert_eq!(msg.id, "m1");
        assert_eq!(msg.sender, "alice");
        assert_eq!(msg.sender_id, "s-alice");
        assert_eq!(msg.scope, Scope::Global);
    }

    #[test]
    fn decodes_inbound_private_message_with_sender_as_peer() {
        let mut record = wire("m2", "2024-05-01T10:00:00Z");
        record.is_private = Some(true);
        let msg = record.into_message("s-me").unwrap();
        assert_eq!(msg.scope, Scope::Private("s-alice".to_string()));
    }

    #[test]
    fn decodes_own_private_message_with_recipient_as_peer() {
        let mut record = wire("m3", "2024-05-01T10:00:00Z");
        record.sender_id = Some("s-me".to_string());
        record.is_private = Some(true);
        record.recipient_id = Some("s-bob".to_string());
        let msg = record.into_message("s-me").unwrap();
        assert_eq!(msg.scope, Scope::Private("s-bob".to_string()));
    }

    #[test]
    fn rejects_missing_id() {
        let mut record = wire("m4", "2024-05-01T10:00:00Z");
        record.id = None;
        assert_eq!(
            record.into_message("s-me").unwrap_err(),
            WireDecodeError::MissingField("id")
        );
    }

    #[test]
    fn rejects_unparseable_timestamp() {
        let record = wire("m5", "yesterday-ish");
        assert!(matches!(
            record.into_message("s-me").unwrap_err(),
            WireDecodeError::BadTimestamp(_)
        ));
    }

    #[test]
    fn sender_id_falls_back_to_display_name() {
        let mut record = wire("m6", "2024-05-01T10:00:00Z");
        record.sender_id = None;
        let msg = record.into_message("s-me").unwrap();
        assert_eq!(msg.sender_id, "alice");
    }

    #[test]
    fn wire_record_round_trips_camel_case() {
        let json = r#"{"id":"m7","sender":"bob","senderId":"s-bob","message":"hey","timestamp":"2024-05-01T10:00:00Z","isPrivate":true}"#;
        let record: WireMessage = serde_json::from_str(json).unwrap();
        assert_eq!(record.sender_id.as_deref(), Some("s-bob"));
        assert_eq!(record.is_private, Some(true));
    }

    #[test]
    fn system_notice_uses_reserved_identity() {
        let notice = Message::system_notice("carol joined the chat");
        assert_eq!(notice.sender, SYSTEM_SENDER);
        assert_eq!(notice.sender_id, SYSTEM_SENDER_ID);
        assert!(notice.is_system_notice());
        assert_eq!(notice.scope, Scope::Global);
    }

    #[test]
    fn decodes_captured_global_record() {
        let raw = shoal_test_support::fixtures::wire("message-global.json");
        let record: WireMessage = serde_json::from_str(&raw).unwrap();
        let msg = record.into_message("sock-self").unwrap();
        assert_eq!(msg.sender, "alice");
        assert_eq!(msg.sender_id, "sock-91ab24");
        assert_eq!(msg.scope, Scope::Global);
    }

    #[test]
    fn decodes_captured_private_record() {
        let raw = shoal_test_support::fixtures::wire("message-private.json");
        let record: WireMessage = serde_json::from_str(&raw).unwrap();
        let msg = record.into_message("sock-self").unwrap();
        assert_eq!(msg.scope, Scope::Private("sock-2277fe".to_string()));
    }

    #[test]
    fn captured_malformed_record_is_rejected() {
        let raw = shoal_test_support::fixtures::wire("message-malformed.json");
        let record: WireMessage = serde_json::from_str(&raw).unwrap();
        assert_eq!(
            record.into_message("sock-self").unwrap_err(),
            WireDecodeError::MissingField("timestamp")
        );
    }

    #[test]
    fn decodes_captured_user_list() {
        let raw = shoal_test_support::fixtures::wire("user-list.json");
        let records: Vec<WireUser> = serde_json::from_str(&raw).unwrap();
        let users: Vec<User> = records
            .into_iter()
            .map(|r| r.into_user().unwrap())
            .collect();
        assert_eq!(users.len(), 3);
        assert_eq!(users[0].username, "alice");
    }

    #[test]
    fn wire_user_requires_id_and_username() {
        let user = WireUser {
            id: Some("s-dave".to_string()),
            username: Some("dave".to_string()),
        };
        assert_eq!(
            user.into_user().unwrap(),
            User {
                id: "s-dave".to_string(),
                username: "dave".to_string()
            }
        );

        let missing = WireUser {
            id: None,
            username: Some("dave".to_string()),
        };
        assert_eq!(
            missing.into_user().unwrap_err(),
            WireDecodeError::MissingField("id")
        );
    }
}
