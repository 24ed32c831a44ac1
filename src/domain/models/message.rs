#[cfg(test)]
#[path = "message_test.rs"]
mod tests;

use chrono::Utc;
use serde_derive::Deserialize;
use serde_derive::Serialize;
use uuid::Uuid;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(default = "generate_id")]
    id: String,
    pub timestamp: i64,
    pub role: Role,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_message_id: Option<String>,
}

pub fn now_millis() -> i64 {
    return Utc::now().timestamp_millis();
}

pub fn generate_id() -> String {
    return Uuid::new_v4().to_string();
}

impl Message {
    pub fn new(role: Role, text: &str) -> Message {
        return Message {
            id: generate_id(),
            timestamp: now_millis(),
            role,
            text: text.to_string(),
            client_message_id: None,
        };
    }

    /// Optimistic user message. The client message id lets the backend
    /// deduplicate the copy it stores against the one shown locally.
    pub fn user(text: &str, client_message_id: &str) -> Message {
        let mut message = Message::new(Role::User, text);
        message.client_message_id = Some(client_message_id.to_string());
        return message;
    }

    pub fn assistant(text: &str) -> Message {
        return Message::new(Role::Assistant, text);
    }

    pub fn id(&self) -> &str {
        return &self.id;
    }
}
