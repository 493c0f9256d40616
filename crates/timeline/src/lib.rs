use std::collections::HashSet;

use tracing::debug;

use shoal_core::message::Message;

/// The ordered, deduplicated message sequence for the active conversation
/// context.
///
/// The store holds whatever it is given: visibility filtering happens in the
/// session controller before insertion, and wire-level validation happens at
/// decode. Two invariants are maintained here and only here: entries are
/// totally ordered by `(timestamp, id)`, and no two entries share an id.
#[derive(Debug, Default)]
pub struct Timeline {
    entries: Vec<Message>,
    ids: HashSet<String>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a live-pushed (or locally sent, or synthetic system) message at
    /// its ordered position. Returns `false` if the id is already present.
    pub fn append_live(&mut self, message: Message) -> bool {
        if self.ids.contains(&message.id) {
            debug!(id = %message.id, "duplicate message id, skipping");
            return false;
        }
        self.insert_ordered(message);
        true
    }

    /// Merge a history page ordered newest-first, restoring oldest-first
    /// order. Ids already present are skipped, so re-fetching the same page
    /// after a race is harmless. Returns how many entries were inserted.
    pub fn prepend_history(&mut self, page: Vec<Message>) -> usize {
        let mut inserted = 0;
        for message in page.into_iter().rev() {
            if self.ids.contains(&message.id) {
                debug!(id = %message.id, "history page entry already present, skipping");
                continue;
            }
            self.insert_ordered(message);
            inserted += 1;
        }
        inserted
    }

    /// Clear the sequence. The only way the store shrinks; called on context
    /// switch.
    pub fn reset(&mut self) {
        self.entries.clear();
        self.ids.clear();
    }

    /// The current sequence, oldest first.
    pub fn messages(&self) -> &[Message] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// A derived read-only view; the underlying sequence is never mutated by
    /// filtering.
    pub fn filter_view<'a, P>(&'a self, predicate: P) -> Vec<&'a Message>
    where
        P: Fn(&Message) -> bool,
    {
        self.entries.iter().filter(|m| predicate(m)).collect()
    }

    /// Case-insensitive search over body and sender display name.
    pub fn search<'a>(&'a self, keyword: &str) -> Vec<&'a Message> {
        let keyword = keyword.to_lowercase();
        self.filter_view(|m| {
            m.body.to_lowercase().contains(&keyword) || m.sender.to_lowercase().contains(&keyword)
        })
    }

    fn insert_ordered(&mut self, message: Message) {
        let position = self.entries.partition_point(|existing| {
            (existing.timestamp, existing.id.as_str()) <= (message.timestamp, message.id.as_str())
        });
        self.ids.insert(message.id.clone());
        self.entries.insert(position, message);
    }
}
