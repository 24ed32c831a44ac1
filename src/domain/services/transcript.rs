#[cfg(test)]
#[path = "transcript_test.rs"]
mod tests;

use crate::domain::models::Message;

/// Ordered message log for the active thread. Entries are never removed or
/// reordered, only their text changes.
#[derive(Clone, Debug, Default)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    pub fn from_messages(messages: Vec<Message>) -> Transcript {
        return Transcript { messages };
    }

    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Returns false when no message has the given id.
    pub fn update_text(&mut self, id: &str, text: &str) -> bool {
        let found = self.messages.iter_mut().find(|message| {
            return message.id() == id;
        });

        if let Some(message) = found {
            message.text = text.to_string();
            return true;
        }

        return false;
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        return self.messages.iter().find(|message| {
            return message.id() == id;
        });
    }

    pub fn snapshot(&self) -> Vec<Message> {
        return self.messages.clone();
    }

    pub fn len(&self) -> usize {
        return self.messages.len();
    }

    pub fn is_empty(&self) -> bool {
        return self.messages.is_empty();
    }
}
