#[cfg(test)]
#[path = "notice_test.rs"]
mod tests;

use once_cell::sync::Lazy;
use regex::Regex;

/// Text shown in an assistant placeholder before anything arrives.
pub const INTERIM_TEXT: &str = "Thinking…";

pub const STOPPED_TEXT: &str = "Stopped.";

pub const EMPTY_STREAM_TEXT: &str =
    "The server closed the stream without sending any content. Try sending your message again.";

pub const NO_RESPONSE_TEXT: &str =
    "No response from the server. It may be busy, try sending your message again.";

pub const MISSING_API_URL_TEXT: &str = "No chat backend is configured. Set `api-url` in your config file, or pass `--api-url`, and try again.";

// Interim status lines some backends stream while a tool (web search) runs,
// e.g. "[browsing...]" or "Searching the web…".
static SEARCHING_PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    return Regex::new(
        r"(?i)^(\[\s*(searching|browsing)[^\]\n]*\]|(searching|browsing)[^\n]{0,80}(\.\.\.|…))$",
    )
    .expect("searching placeholder pattern is valid");
});

pub fn is_searching_placeholder(text: &str) -> bool {
    return SEARCHING_PLACEHOLDER.is_match(text.trim());
}

pub fn error_text(reason: &str) -> String {
    return format!("The backend failed with the following error: {reason}");
}

/// Marks a placeholder as stopped, keeping whatever partial answer it holds.
pub fn stopped_text(current: &str) -> String {
    let partial = current.trim_end();
    if partial.is_empty() || partial == INTERIM_TEXT {
        return STOPPED_TEXT.to_string();
    }

    return format!("{partial}\n\n{STOPPED_TEXT}");
}
