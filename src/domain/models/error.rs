#[cfg(test)]
#[path = "error_test.rs"]
mod tests;

use serde_json::Value;
use thiserror::Error;

const MAX_ERROR_BODY_CHARS: usize = 300;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ChatError {
    /// Non-2xx response or a network failure, `status` is absent for the
    /// latter.
    #[error("{}", transport_display(.status, .message))]
    Transport {
        status: Option<u16>,
        message: String,
    },
    /// Required backend settings are missing, no request was made.
    #[error("{0}")]
    Configuration(String),
}

fn transport_display(status: &Option<u16>, message: &str) -> String {
    if let Some(code) = status {
        return format!("request failed with status {code}: {message}");
    }

    return format!("request failed: {message}");
}

impl ChatError {
    pub fn transport(status: Option<u16>, message: &str) -> ChatError {
        return ChatError::Transport {
            status,
            message: message.to_string(),
        };
    }

    /// Builds a transport error from a failed response body. JSON bodies are
    /// searched for the usual message fields, anything else is used as plain
    /// text.
    pub fn from_response_body(status: u16, body: &str) -> ChatError {
        return ChatError::transport(Some(status), &extract_error_message(status, body));
    }

    pub fn status(&self) -> Option<u16> {
        if let ChatError::Transport { status, .. } = self {
            return *status;
        }

        return None;
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> ChatError {
        return ChatError::transport(
            err.status().map(|status| {
                return status.as_u16();
            }),
            &err.to_string(),
        );
    }
}

pub fn extract_error_message(status: u16, body: &str) -> String {
    let trimmed = body.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        let candidates = [
            value.get("message"),
            value.get("error").and_then(|err| {
                return err.get("message");
            }),
            value.get("error"),
            value.get("detail"),
        ];
        for candidate in candidates.into_iter().flatten() {
            if let Some(text) = candidate.as_str() {
                if !text.trim().is_empty() {
                    return text.trim().to_string();
                }
            }
        }
    }

    if trimmed.is_empty() {
        return format!("HTTP {status}");
    }

    let mut text: String = trimmed.chars().take(MAX_ERROR_BODY_CHARS).collect();
    if trimmed.chars().count() > MAX_ERROR_BODY_CHARS {
        text.push('…');
    }

    return text;
}
