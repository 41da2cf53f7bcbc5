use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

/// Cancellation tokens keyed by the status message an operation reports to.
/// Message ids are only unique within a chat, so keys carry the chat id.
///
/// Pressing "ignore" on a status message cancels its token; the extraction
/// or polling work behind that message checks the token at its own check
/// points and drops its side effects. Entries are evicted when the owning
/// operation finishes, so the map only holds in-flight messages.
#[derive(Debug)]
pub(crate) struct CancellationRegistry {
    root: CancellationToken,
    tokens: DashMap<(i64, i64), CancellationToken>,
}

impl CancellationRegistry {
    pub(crate) fn new(root: CancellationToken) -> Self {
        Self { root, tokens: DashMap::new() }
    }

    /// Hands out the token for `message_id`. An entry that already exists
    /// (including one that was ignored) is returned as is.
    pub(crate) fn register(&self, chat_id: i64, message_id: i64) -> CancellationToken {
        self.tokens.entry((chat_id, message_id)).or_insert_with(|| self.root.child_token()).clone()
    }

    /// Returns false when nothing is in flight for `message_id`.
    pub(crate) fn mark_ignored(&self, chat_id: i64, message_id: i64) -> bool {
        match self.tokens.get(&(chat_id, message_id)) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub(crate) fn is_ignored(&self, chat_id: i64, message_id: i64) -> bool {
        self.tokens.get(&(chat_id, message_id)).map(|token| token.is_cancelled()).unwrap_or(false)
    }

    /// Removes the entry and reports whether it had been ignored.
    pub(crate) fn consume_ignored(&self, chat_id: i64, message_id: i64) -> bool {
        self.tokens.remove(&(chat_id, message_id)).map(|(_, token)| token.is_cancelled()).unwrap_or(false)
    }

    /// Eviction on natural completion.
    pub(crate) fn release(&self, chat_id: i64, message_id: i64) {
        self.tokens.remove(&(chat_id, message_id));
    }

    pub(crate) fn len(&self) -> usize {
        self.tokens.len()
    }
}
