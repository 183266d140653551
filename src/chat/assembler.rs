//! Stream assembler
//!
//! Owns the rendered message list and applies text deltas to the open
//! assistant message. The list is published through a `watch` channel so the
//! UI can observe it without the assembler ever waiting on a reader.

use tokio::sync::watch;

use super::message::{Message, Role};

/// Replacement content for an assistant message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Plain text
    Text(String),
    /// Image reference
    Image(String),
}

/// Appends streamed deltas onto the last message of an observable list
#[derive(Debug)]
pub struct StreamAssembler {
    messages: watch::Sender<Vec<Message>>,
}

impl Default for StreamAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamAssembler {
    /// Create an assembler with an empty message list
    #[must_use]
    pub fn new() -> Self {
        let (messages, _) = watch::channel(Vec::new());
        Self { messages }
    }

    /// Append a finished user message
    pub fn push_user(&self, content: &str) {
        self.messages.send_modify(|list| list.push(Message::user(content)));
    }

    /// Open a new, empty assistant message and return its index
    ///
    /// Any assistant message that is still open is closed first so that at
    /// most one message receives deltas.
    pub fn begin_assistant(&self) -> usize {
        let mut index = 0;
        self.messages.send_modify(|list| {
            for message in list.iter_mut().filter(|m| m.open) {
                message.open = false;
            }
            list.push(Message::pending_assistant());
            index = list.len() - 1;
        });
        index
    }

    /// Concatenate a delta onto the last message
    ///
    /// If the last message is not an open assistant message a new one is
    /// opened, so deltas never land on an earlier entry.
    pub fn append_delta(&self, delta: &str) {
        if delta.is_empty() {
            return;
        }

        self.messages.send_modify(|list| match list.last_mut() {
            Some(last) if last.is_open_assistant() => last.content.push_str(delta),
            _ => {
                let mut message = Message::pending_assistant();
                message.content.push_str(delta);
                list.push(message);
            }
        });
    }

    /// Replace the content of the assistant message at `index` and close it
    ///
    /// Returns `false` if `index` does not point at an assistant message.
    pub fn replace(&self, index: usize, reply: Reply) -> bool {
        self.messages.send_if_modified(|list| {
            let Some(message) = list.get_mut(index) else {
                return false;
            };
            if message.role != Role::Assistant {
                return false;
            }

            match reply {
                Reply::Text(text) => {
                    message.content = text;
                    message.image = None;
                }
                Reply::Image(url) => {
                    message.content.clear();
                    message.image = Some(url);
                }
            }
            message.open = false;
            true
        })
    }

    /// Replace the last message's content with text and close it
    pub fn replace_last(&self, text: &str) -> bool {
        let len = self.messages.borrow().len();
        len > 0 && self.replace(len - 1, Reply::Text(text.to_string()))
    }

    /// Close the open assistant message, returning its final state
    pub fn finish_open(&self) -> Option<Message> {
        let mut finished = None;
        self.messages.send_if_modified(|list| {
            match list.last_mut() {
                Some(last) if last.is_open_assistant() => {
                    last.open = false;
                    finished = Some(last.clone());
                    true
                }
                _ => false,
            }
        });
        finished
    }

    /// Content of the open assistant message, if any
    #[must_use]
    pub fn open_content(&self) -> Option<String> {
        self.messages
            .borrow()
            .last()
            .filter(|m| m.is_open_assistant())
            .map(|m| m.content.clone())
    }

    /// Copy of the current message list
    #[must_use]
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.borrow().clone()
    }

    /// Observe the message list
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Vec<Message>> {
        self.messages.subscribe()
    }
}
