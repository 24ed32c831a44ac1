#[cfg(test)]
#[path = "poller_test.rs"]
mod tests;

use tokio::time;
use tokio::time::Instant;

use super::OperationHandle;
use super::SessionController;
use super::SessionToken;
use crate::domain::models::is_searching_placeholder;
use crate::domain::models::Message;
use crate::domain::models::Role;
use crate::domain::models::INTERIM_TEXT;

/// Where a polled answer belongs once it shows up.
#[derive(Clone, Debug)]
pub struct PollTarget {
    pub thread_id: String,
    pub token: SessionToken,
    /// Only assistant replies at or after this time count as answers.
    pub user_timestamp: i64,
    pub placeholder_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PollOutcome {
    Committed(String),
    Cancelled,
    Stale,
    DeadlineElapsed,
}

/// Latest assistant reply written at or after `since`. Replies sharing a
/// timestamp keep their server order.
pub fn latest_assistant_reply(messages: &[Message], since: i64) -> Option<&Message> {
    let mut replies = messages
        .iter()
        .filter(|message| {
            return message.role == Role::Assistant && message.timestamp >= since;
        })
        .collect::<Vec<&Message>>();
    replies.sort_by_key(|message| {
        return message.timestamp;
    });

    return replies.pop();
}

pub fn is_final_answer(text: &str) -> bool {
    let trimmed = text.trim();
    return !trimmed.is_empty() && trimmed != INTERIM_TEXT && !is_searching_placeholder(trimmed);
}

impl SessionController {
    /// Re-reads the thread until the backend has a final assistant answer
    /// for the send described by `target`, then writes it into the
    /// placeholder.
    pub async fn poll_for_final_answer(
        &self,
        target: &PollTarget,
        operation: &OperationHandle,
    ) -> PollOutcome {
        let deadline = Instant::now() + self.settings.poll_deadline;
        let mut last_seen: Option<String> = None;
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            let fetched = tokio::select! {
                biased;
                _ = operation.cancelled() => {
                    return PollOutcome::Cancelled;
                }
                res = self.backend.get_thread(&target.thread_id) => res,
            };
            if operation.is_cancelled() {
                return PollOutcome::Cancelled;
            }
            if !self.is_current(&target.token) {
                return PollOutcome::Stale;
            }

            match fetched {
                Ok(detail) => {
                    let latest = latest_assistant_reply(&detail.messages, target.user_timestamp)
                        .map(|message| {
                            return message.text.to_string();
                        });

                    if let Some(text) = latest {
                        if is_final_answer(&text) && last_seen.as_deref() != Some(text.as_str()) {
                            let committed = self.apply_if_current(&target.token, |state| {
                                state.transcript.update_text(&target.placeholder_id, &text);
                            });
                            if !committed {
                                return PollOutcome::Stale;
                            }

                            tracing::debug!(
                                thread_id = %target.thread_id,
                                attempts,
                                "polled final answer"
                            );
                            self.refresh_threads_in_background();
                            return PollOutcome::Committed(text);
                        }
                        last_seen = Some(text);
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        thread_id = %target.thread_id,
                        attempts,
                        error = ?err,
                        "failed to poll thread"
                    );
                }
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(
                    thread_id = %target.thread_id,
                    attempts,
                    "gave up waiting for the final answer"
                );
                return PollOutcome::DeadlineElapsed;
            }

            let wake_at = std::cmp::min(now + self.settings.poll_interval, deadline);
            tokio::select! {
                biased;
                _ = operation.cancelled() => {
                    return PollOutcome::Cancelled;
                }
                _ = time::sleep_until(wake_at) => {}
            }
        }
    }
}
