use std::collections::HashMap;

use tracing::warn;

use shoal_core::message::{Message, User, WireUser};

/// Tracks who is online and who is typing, from transport-pushed snapshots.
///
/// Both sets are full replacements: the server broadcasts complete rosters,
/// the latest snapshot wins, and nothing is diffed or retained. The tracker
/// also owns the local composition edge so the controller only signals typing
/// when the draft crosses the empty/non-empty boundary.
#[derive(Debug)]
pub struct PresenceTracker {
    self_name: String,
    users: HashMap<String, User>,
    typing: Vec<String>,
    local_typing: bool,
}

impl PresenceTracker {
    pub fn new(self_name: impl Into<String>) -> Self {
        Self {
            self_name: self_name.into(),
            users: HashMap::new(),
            typing: Vec::new(),
            local_typing: false,
        }
    }

    /// Replace the online-user set with the latest snapshot. Records missing
    /// id or username are dropped with a diagnostic.
    pub fn apply_user_list(&mut self, users: Vec<WireUser>) {
        self.users = users
            .into_iter()
            .filter_map(|record| match record.into_user() {
                Ok(user) => Some((user.id.clone(), user)),
                Err(e) => {
                    warn!(error = %e, "dropping malformed user record");
                    None
                }
            })
            .collect();
    }

    /// Replace the typing set with the latest snapshot, excluding the local
    /// viewer. The tracker never reports the viewer as typing to themselves.
    pub fn apply_typing_list(&mut self, usernames: Vec<String>) {
        self.typing = usernames
            .into_iter()
            .filter(|name| *name != self.self_name)
            .collect();
    }

    /// Record the local composition state. Returns `Some(state)` only when the
    /// state changed, i.e. on an empty/non-empty boundary crossing, so the
    /// caller can emit exactly one signal per transition.
    pub fn set_local_typing(&mut self, is_typing: bool) -> Option<bool> {
        if self.local_typing == is_typing {
            return None;
        }
        self.local_typing = is_typing;
        Some(is_typing)
    }

    pub fn is_local_typing(&self) -> bool {
        self.local_typing
    }

    /// Synthesize the transient "joined" timeline notice.
    pub fn user_joined(&self, username: &str) -> Message {
        Message::system_notice(format!("{username} joined the chat"))
    }

    /// Synthesize the transient "left" timeline notice.
    pub fn user_left(&self, username: &str) -> Message {
        Message::system_notice(format!("{username} left the chat"))
    }

    pub fn is_online(&self, id: &str) -> bool {
        self.users.contains_key(id)
    }

    pub fn user(&self, id: &str) -> Option<&User> {
        self.users.get(id)
    }

    /// Online users sorted by display name for a stable snapshot.
    pub fn online_users(&self) -> Vec<&User> {
        let mut users: Vec<&User> = self.users.values().collect();
        users.sort_by(|a, b| a.username.cmp(&b.username).then(a.id.cmp(&b.id)));
        users
    }

    pub fn online_count(&self) -> usize {
        self.users.len()
    }

    /// Peers currently typing, viewer excluded.
    pub fn typing_users(&self) -> &[String] {
        &self.typing
    }
}
