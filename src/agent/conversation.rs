//! Bounded conversation window
//!
//! [`ConversationStore`] keeps the ordered message log sent to the model on
//! every completion. When the window is full the oldest messages are
//! evicted first. A system message, if set, is pinned at the front and is
//! never evicted.

use std::collections::VecDeque;

use crate::providers::{Message, Role};

/// Ordered, bounded log of conversation messages
///
/// # Window accounting
///
/// `window` is the maximum number of messages returned by
/// [`ConversationStore::snapshot`], counting the pinned system message. A
/// window of `0` means unbounded.
///
/// # Examples
///
/// ```
/// use mcphost::agent::ConversationStore;
/// use mcphost::providers::Message;
///
/// let mut store = ConversationStore::new(3);
/// store.append(Message::system("Be brief."));
/// store.append(Message::user("one"));
/// store.append(Message::user("two"));
/// store.append(Message::user("three"));
///
/// let snapshot = store.snapshot();
/// assert_eq!(snapshot.len(), 3);
/// assert_eq!(snapshot[0].content.as_deref(), Some("Be brief."));
/// assert_eq!(snapshot[1].content.as_deref(), Some("two"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct ConversationStore {
    pinned: Option<Message>,
    messages: VecDeque<Message>,
    window: usize,
}

impl ConversationStore {
    /// Create an empty store
    ///
    /// # Arguments
    ///
    /// * `window` - Maximum message count including the pinned message
    ///   (`0` = unbounded)
    pub fn new(window: usize) -> Self {
        Self {
            pinned: None,
            messages: VecDeque::new(),
            window,
        }
    }

    /// Create a store with a pinned system prompt
    pub fn with_system_prompt(window: usize, prompt: impl Into<String>) -> Self {
        let mut store = Self::new(window);
        store.append(Message::system(prompt));
        store
    }

    /// Add a message at the tail, then evict down to the window
    ///
    /// A system message replaces the pinned message instead of joining the
    /// log.
    pub fn append(&mut self, message: Message) {
        if message.role == Role::System {
            self.pinned = Some(message);
        } else {
            self.messages.push_back(message);
        }
        self.evict();
    }

    fn evict(&mut self) {
        if self.window == 0 {
            return;
        }
        let capacity = self.window.saturating_sub(usize::from(self.pinned.is_some()));
        while self.messages.len() > capacity {
            if let Some(evicted) = self.messages.pop_front() {
                tracing::trace!("Evicted {} message from conversation window", evicted.role);
            }
        }
    }

    /// Ordered copy of the window, pinned message first
    pub fn snapshot(&self) -> Vec<Message> {
        self.pinned
            .iter()
            .chain(self.messages.iter())
            .cloned()
            .collect()
    }

    /// Remove every message except the pinned one
    pub fn reset(&mut self) {
        self.messages.clear();
    }

    /// The pinned system message, if any
    pub fn pinned(&self) -> Option<&Message> {
        self.pinned.as_ref()
    }

    /// Configured window size (`0` = unbounded)
    pub fn window(&self) -> usize {
        self.window
    }

    /// Number of messages in the window, including the pinned one
    pub fn len(&self) -> usize {
        self.messages.len() + usize::from(self.pinned.is_some())
    }

    /// Whether the window holds no messages
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
