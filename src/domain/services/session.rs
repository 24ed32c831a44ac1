#[cfg(test)]
#[path = "session_test.rs"]
mod tests;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::Duration;

use anyhow::Result;
use futures::StreamExt;
use serde_json::Map;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time;
use tokio::time::Instant;

use super::ActiveThread;
use super::CancelReason;
use super::OperationHandle;
use super::OperationKind;
use super::OperationSlot;
use super::PollOutcome;
use super::PollTarget;
use super::SessionToken;
use super::StreamDecoder;
use super::TextBatcher;
use super::TimeoutGuard;
use super::Transcript;
use crate::configuration::Config;
use crate::configuration::ConfigKey;
use crate::domain::models::error_text;
use crate::domain::models::generate_id;
use crate::domain::models::is_searching_placeholder;
use crate::domain::models::stopped_text;
use crate::domain::models::BackendBox;
use crate::domain::models::Capabilities;
use crate::domain::models::ChatError;
use crate::domain::models::ChatStreamRequest;
use crate::domain::models::Message;
use crate::domain::models::SendOutcome;
use crate::domain::models::SendState;
use crate::domain::models::SessionEvent;
use crate::domain::models::Thread;
use crate::domain::models::ThreadStatus;
use crate::domain::models::EMPTY_STREAM_TEXT;
use crate::domain::models::INTERIM_TEXT;
use crate::domain::models::NO_RESPONSE_TEXT;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionSettings {
    pub first_byte_timeout: Duration,
    pub progress_timeout: Duration,
    /// Pending characters that force a transcript update.
    pub flush_threshold: usize,
    pub flush_interval: Duration,
    pub poll_interval: Duration,
    pub poll_deadline: Duration,
    pub thread_list_limit: usize,
    pub capabilities: Capabilities,
}

impl Default for SessionSettings {
    fn default() -> SessionSettings {
        return SessionSettings {
            first_byte_timeout: Duration::from_secs(30),
            progress_timeout: Duration::from_secs(120),
            flush_threshold: 2048,
            flush_interval: Duration::from_millis(50),
            poll_interval: Duration::from_millis(1200),
            poll_deadline: Duration::from_secs(60),
            thread_list_limit: 50,
            capabilities: Capabilities::default(),
        };
    }
}

impl SessionSettings {
    pub fn from_config() -> Result<SessionSettings> {
        return Ok(SessionSettings {
            first_byte_timeout: Duration::from_millis(Config::get_u64(
                ConfigKey::FirstByteTimeout,
            )?),
            progress_timeout: Duration::from_millis(Config::get_u64(ConfigKey::ProgressTimeout)?),
            poll_interval: Duration::from_millis(Config::get_u64(ConfigKey::PollInterval)?),
            poll_deadline: Duration::from_millis(Config::get_u64(ConfigKey::PollDeadline)?),
            thread_list_limit: Config::get_u64(ConfigKey::ThreadListLimit)? as usize,
            capabilities: Capabilities {
                web_search: Config::get_bool(ConfigKey::WebSearch),
            },
            ..SessionSettings::default()
        });
    }
}

#[derive(Debug, Default)]
pub(super) struct SessionState {
    pub(super) active: ActiveThread,
    pub(super) transcript: Transcript,
    pub(super) operation: OperationSlot,
    threads: Vec<Thread>,
    statuses: HashMap<String, ThreadStatus>,
    metadata: Option<Map<String, Value>>,
    send_state: SendState,
}

impl SessionState {
    fn transcript_event(&self) -> Option<SessionEvent> {
        let thread_id = self.active.thread_id()?.to_string();
        return Some(SessionEvent::TranscriptChanged {
            thread_id,
            messages: self.transcript.snapshot(),
        });
    }

    fn is_streaming(&self) -> bool {
        return self
            .operation
            .current()
            .map(|operation| {
                return operation.kind() != OperationKind::Hydrate;
            })
            .unwrap_or(false);
    }
}

/// Everything one send needs to find its way back into the session.
struct SendContext {
    token: SessionToken,
    operation: OperationHandle,
    placeholder_id: String,
    user_timestamp: i64,
    request: ChatStreamRequest,
}

/// Drives the conversation for the active thread: optimistic inserts,
/// streaming into a placeholder, fallback polling, and thread switches.
///
/// Cheap to clone; clones share the same session. Every asynchronous
/// continuation holds a [`SessionToken`] and its writes are dropped once the
/// token is no longer current.
#[derive(Clone)]
pub struct SessionController {
    pub(super) backend: BackendBox,
    pub(super) settings: SessionSettings,
    state: Arc<Mutex<SessionState>>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionController {
    pub fn new(
        backend: BackendBox,
        settings: SessionSettings,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> SessionController {
        return SessionController {
            backend,
            settings,
            state: Arc::new(Mutex::new(SessionState::default())),
            events,
        };
    }

    pub(super) fn with_state<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        return f(&mut state);
    }

    pub(super) fn is_current(&self, token: &SessionToken) -> bool {
        return self.with_state(|state| {
            return state.active.is_current(token);
        });
    }

    /// Applies `f` and publishes the transcript only while `token` is
    /// current. Returns whether anything was applied.
    pub(super) fn apply_if_current(
        &self,
        token: &SessionToken,
        f: impl FnOnce(&mut SessionState),
    ) -> bool {
        let event = self.with_state(|state| {
            if !state.active.is_current(token) {
                return None;
            }
            f(state);
            return state.transcript_event();
        });

        match event {
            Some(event) => {
                self.emit(event);
                return true;
            }
            None => {
                tracing::debug!(
                    thread_id = %token.thread_id,
                    epoch = token.epoch,
                    "dropping update from stale operation"
                );
                return false;
            }
        }
    }

    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("session event receiver dropped");
        }
    }

    pub fn snapshot(&self) -> Vec<Message> {
        return self.with_state(|state| {
            return state.transcript.snapshot();
        });
    }

    pub fn threads(&self) -> Vec<Thread> {
        return self.with_state(|state| {
            return state.threads.clone();
        });
    }

    pub fn thread_status(&self, thread_id: &str) -> ThreadStatus {
        return self.with_state(|state| {
            return state.statuses.get(thread_id).cloned().unwrap_or_default();
        });
    }

    pub fn active_thread_id(&self) -> Option<String> {
        return self.with_state(|state| {
            return state.active.thread_id().map(|id| return id.to_string());
        });
    }

    /// True while a send (streaming or polling) can still be stopped.
    pub fn is_streaming(&self) -> bool {
        return self.with_state(|state| {
            return state.is_streaming();
        });
    }

    pub fn can_stop(&self) -> bool {
        return self.is_streaming();
    }

    pub fn send_state(&self) -> SendState {
        return self.with_state(|state| {
            return state.send_state;
        });
    }

    /// Metadata object from the most recent framed stream of this thread.
    pub fn last_metadata(&self) -> Option<Map<String, Value>> {
        return self.with_state(|state| {
            return state.metadata.clone();
        });
    }

    /// Stops the in-flight send, if any. The send itself marks its
    /// placeholder as stopped.
    pub fn stop(&self) -> bool {
        return self.with_state(|state| {
            if !state.is_streaming() {
                return false;
            }
            return state.operation.interrupt(CancelReason::UserStop);
        });
    }

    /// Makes `thread_id` the active thread and loads its history. Whatever
    /// was in flight is cancelled and its results are discarded.
    pub async fn switch_thread(&self, thread_id: &str) {
        let (token, operation, events) = self.with_state(|state| {
            let token = state.active.activate(thread_id);
            let operation =
                state
                    .operation
                    .start(OperationKind::Hydrate, None, CancelReason::ThreadSwitch);
            state.transcript = Transcript::default();
            state.metadata = None;
            state.send_state = SendState::Idle;

            let status = ThreadStatus {
                loading: true,
                error: None,
            };
            state.statuses.insert(thread_id.to_string(), status.clone());

            let events = vec![
                SessionEvent::TranscriptChanged {
                    thread_id: thread_id.to_string(),
                    messages: vec![],
                },
                SessionEvent::ThreadStatusChanged {
                    thread_id: thread_id.to_string(),
                    status,
                },
                SessionEvent::StreamingChanged(false),
            ];

            return (token, operation, events);
        });
        for event in events {
            self.emit(event);
        }

        let fetched = tokio::select! {
            biased;
            _ = operation.cancelled() => None,
            res = self.backend.get_thread(thread_id) => Some(res),
        };

        let status = match fetched {
            None => {
                tracing::debug!(thread_id, "thread hydration cancelled");
                ThreadStatus::default()
            }
            Some(Ok(detail)) => {
                tracing::debug!(
                    thread_id,
                    messages = detail.messages.len(),
                    "thread hydrated"
                );
                self.apply_if_current(&token, |state| {
                    state.transcript = Transcript::from_messages(detail.messages);
                });
                ThreadStatus::default()
            }
            Some(Err(err)) => {
                tracing::warn!(thread_id, error = ?err, "failed to load thread");
                ThreadStatus {
                    loading: false,
                    error: Some(err.to_string()),
                }
            }
        };

        let updated = self.with_state(|state| {
            state.operation.release(operation.id());
            let rehydrating = state
                .operation
                .current()
                .map(|current| {
                    return current.kind() == OperationKind::Hydrate;
                })
                .unwrap_or(false);
            if rehydrating && state.active.thread_id() == Some(thread_id) {
                return false;
            }
            state.statuses.insert(thread_id.to_string(), status.clone());
            return true;
        });
        if updated {
            self.emit(SessionEvent::ThreadStatusChanged {
                thread_id: thread_id.to_string(),
                status,
            });
        }
    }

    pub async fn refresh_threads(&self) -> Result<Vec<Thread>, ChatError> {
        let page = self
            .backend
            .list_threads(self.settings.thread_list_limit)
            .await?;

        self.with_state(|state| {
            state.threads = page.items.clone();
        });
        self.emit(SessionEvent::ThreadsChanged(page.items.clone()));

        return Ok(page.items);
    }

    pub(super) fn refresh_threads_in_background(&self) {
        let controller = self.clone();
        tokio::spawn(async move {
            if let Err(err) = controller.refresh_threads().await {
                tracing::debug!(error = ?err, "background thread refresh failed");
            }
        });
    }

    /// Creates a thread on the backend and makes it the active one.
    pub async fn create_thread(&self, title: &str) -> Result<String, ChatError> {
        let created = self.backend.create_thread(title).await?;
        if let Err(err) = self.refresh_threads().await {
            tracing::warn!(error = ?err, "failed to refresh threads after create");
        }
        self.switch_thread(&created.thread_id).await;

        return Ok(created.thread_id);
    }

    /// Sends `text` to the active thread and streams the reply into a
    /// placeholder message.
    ///
    /// Only transport failures of the active thread come back as errors, the
    /// placeholder already shows them. Everything else (stops, timeouts,
    /// stale results, empty streams) is reported through [`SendOutcome`].
    pub async fn send_message(&self, text: &str) -> Result<SendOutcome, ChatError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(SendOutcome::Rejected);
        }

        let Some(ctx) = self.begin_send(text) else {
            tracing::debug!("no thread selected, ignoring send");
            return Ok(SendOutcome::Rejected);
        };
        self.emit(SessionEvent::StreamingChanged(true));

        if let Err(err) = self.backend.ensure_configured() {
            tracing::error!(error = ?err, "chat backend is not configured");
            self.set_placeholder_text(&ctx, &err.to_string());
            self.finish_send(&ctx, SendState::Errored);
            return Ok(SendOutcome::Misconfigured);
        }

        let res = self.stream_reply(&ctx).await;
        let final_state = match &res {
            Ok(SendOutcome::Finalized) => SendState::Finalized,
            Ok(SendOutcome::Stopped) => SendState::Stopped,
            Ok(SendOutcome::Stale) => SendState::Idle,
            Ok(_) | Err(_) => SendState::Errored,
        };
        self.finish_send(&ctx, final_state);

        return res;
    }

    fn begin_send(&self, text: &str) -> Option<SendContext> {
        let prepared = self.with_state(|state| {
            let thread_id = state.active.thread_id()?.to_string();

            if let Some(previous) = state.operation.cancel(CancelReason::Superseded) {
                if let Some(previous_placeholder) = previous.placeholder_id() {
                    let current = state
                        .transcript
                        .get(previous_placeholder)
                        .map(|message| return message.text.to_string());
                    if let Some(current) = current {
                        state
                            .transcript
                            .update_text(previous_placeholder, &stopped_text(&current));
                    }
                }
            }

            let client_message_id = generate_id();
            let user = Message::user(text, &client_message_id);
            let placeholder = Message::assistant(INTERIM_TEXT);
            let user_timestamp = user.timestamp;
            let placeholder_id = placeholder.id().to_string();
            state.transcript.append(user);
            state.transcript.append(placeholder);

            let token = state.active.advance()?;
            let operation = state.operation.start(
                OperationKind::Stream,
                Some(placeholder_id.clone()),
                CancelReason::Superseded,
            );
            state.send_state = SendState::Awaiting;

            let ctx = SendContext {
                token,
                operation,
                placeholder_id,
                user_timestamp,
                request: ChatStreamRequest {
                    thread_id,
                    text: text.to_string(),
                    client_message_id,
                    capabilities: self.settings.capabilities,
                },
            };

            return Some((ctx, state.transcript_event()));
        });

        let (ctx, event) = prepared?;
        if let Some(event) = event {
            self.emit(event);
        }

        return Some(ctx);
    }

    fn finish_send(&self, ctx: &SendContext, final_state: SendState) {
        let released = self.with_state(|state| {
            if state.active.is_current(&ctx.token) {
                state.send_state = final_state;
            }
            return state.operation.release(ctx.operation.id());
        });

        if released {
            self.emit(SessionEvent::StreamingChanged(false));
        }
    }

    fn set_placeholder_text(&self, ctx: &SendContext, text: &str) -> bool {
        return self.apply_if_current(&ctx.token, |state| {
            state.transcript.update_text(&ctx.placeholder_id, text);
        });
    }

    fn set_send_state(&self, ctx: &SendContext, send_state: SendState) {
        self.with_state(|state| {
            if state.active.is_current(&ctx.token) {
                state.send_state = send_state;
            }
        });
    }

    fn flush(&self, ctx: &SendContext, batcher: &mut TextBatcher) {
        if let Some(total) = batcher.flush() {
            self.set_placeholder_text(ctx, total);
        }
    }

    async fn stream_reply(&self, ctx: &SendContext) -> Result<SendOutcome, ChatError> {
        let operation = &ctx.operation;
        let mut guard = TimeoutGuard::new(
            operation.clone(),
            self.settings.first_byte_timeout,
            self.settings.progress_timeout,
        );
        guard.arm_first_byte();

        let response = tokio::select! {
            biased;
            _ = operation.cancelled() => None,
            res = self.backend.post_chat_stream(ctx.request.clone()) => Some(res),
        };
        let mut stream = match response {
            None => {
                guard.clear();
                return self.on_cancelled(ctx, operation).await;
            }
            Some(Err(err)) => {
                return self.on_transport_error(ctx, err);
            }
            Some(Ok(stream)) => stream,
        };

        let mut decoder = StreamDecoder::new();
        let mut batcher =
            TextBatcher::new(self.settings.flush_threshold, self.settings.flush_interval);
        let mut bytes_received: usize = 0;

        loop {
            let flush_at = batcher.deadline();
            tokio::select! {
                biased;
                _ = operation.cancelled() => {
                    guard.clear();
                    self.flush(ctx, &mut batcher);
                    return self.on_cancelled(ctx, operation).await;
                }
                _ = time::sleep_until(flush_at.unwrap_or_else(Instant::now)), if flush_at.is_some() => {
                    self.flush(ctx, &mut batcher);
                }
                chunk = stream.next() => match chunk {
                    Some(Ok(bytes)) => {
                        if bytes.is_empty() {
                            continue;
                        }
                        if bytes_received == 0 {
                            self.set_send_state(ctx, SendState::Receiving);
                        }
                        bytes_received += bytes.len();
                        guard.record_progress();

                        let decoded = decoder.decode(&bytes);
                        if let Some(metadata) = decoded.metadata {
                            tracing::debug!(metadata = ?metadata, "stream metadata");
                            self.with_state(|state| {
                                if state.active.is_current(&ctx.token) {
                                    state.metadata = Some(metadata);
                                }
                            });
                        }
                        if !decoded.text.is_empty() && batcher.push(&decoded.text) {
                            self.flush(ctx, &mut batcher);
                        }
                    }
                    Some(Err(err)) => {
                        guard.clear();
                        self.flush(ctx, &mut batcher);
                        return self.on_transport_error(ctx, err);
                    }
                    None => {
                        break;
                    }
                }
            }
        }
        guard.clear();

        let tail = decoder.finish();
        if !tail.text.is_empty() {
            batcher.push(&tail.text);
        }
        self.flush(ctx, &mut batcher);

        let text = batcher.accumulated().to_string();
        return self.on_stream_end(ctx, bytes_received, &text).await;
    }

    async fn on_stream_end(
        &self,
        ctx: &SendContext,
        bytes_received: usize,
        text: &str,
    ) -> Result<SendOutcome, ChatError> {
        if !self.is_current(&ctx.token) {
            tracing::debug!(thread_id = %ctx.token.thread_id, "stream finished for a stale thread");
            return Ok(SendOutcome::Stale);
        }

        if bytes_received == 0 {
            tracing::warn!(thread_id = %ctx.token.thread_id, "stream closed without content");
            self.set_placeholder_text(ctx, EMPTY_STREAM_TEXT);
            return Ok(SendOutcome::EmptyStream);
        }

        let trimmed = text.trim();
        if trimmed.is_empty() || is_searching_placeholder(trimmed) {
            tracing::debug!(
                thread_id = %ctx.token.thread_id,
                bytes_received,
                "stream produced no usable answer, polling for it"
            );
            return self.fall_back_to_polling(ctx).await;
        }

        self.refresh_threads_in_background();
        return Ok(SendOutcome::Finalized);
    }

    async fn on_cancelled(
        &self,
        ctx: &SendContext,
        operation: &OperationHandle,
    ) -> Result<SendOutcome, ChatError> {
        if operation.reason() == Some(CancelReason::Inactivity) {
            if !self.is_current(&ctx.token) {
                return Ok(SendOutcome::Stale);
            }
            tracing::warn!(thread_id = %ctx.token.thread_id, "stream stalled, polling for the answer");
            return self.fall_back_to_polling(ctx).await;
        }

        return Ok(self.settle_cancelled(ctx, operation.reason()));
    }

    fn settle_cancelled(&self, ctx: &SendContext, reason: Option<CancelReason>) -> SendOutcome {
        match reason {
            Some(CancelReason::UserStop) => {
                let applied = self.apply_if_current(&ctx.token, |state| {
                    let current = state
                        .transcript
                        .get(&ctx.placeholder_id)
                        .map(|message| return message.text.to_string())
                        .unwrap_or_default();
                    state
                        .transcript
                        .update_text(&ctx.placeholder_id, &stopped_text(&current));
                });
                if applied {
                    return SendOutcome::Stopped;
                }
                return SendOutcome::Stale;
            }
            Some(CancelReason::FirstByteTimeout) => {
                tracing::warn!(thread_id = %ctx.token.thread_id, "no response before first-byte timeout");
                if self.set_placeholder_text(ctx, NO_RESPONSE_TEXT) {
                    return SendOutcome::TimedOut;
                }
                return SendOutcome::Stale;
            }
            Some(CancelReason::Inactivity) => {
                return SendOutcome::Unresolved;
            }
            Some(CancelReason::ThreadSwitch) | Some(CancelReason::Superseded) | None => {
                return SendOutcome::Stale;
            }
        }
    }

    fn on_transport_error(
        &self,
        ctx: &SendContext,
        err: ChatError,
    ) -> Result<SendOutcome, ChatError> {
        if !self.is_current(&ctx.token) {
            tracing::debug!(error = ?err, "ignoring failure of a stale stream");
            return Ok(SendOutcome::Stale);
        }

        tracing::error!(
            thread_id = %ctx.token.thread_id,
            status = ?err.status(),
            error = ?err,
            "chat stream failed"
        );
        self.set_placeholder_text(ctx, &error_text(&err.to_string()));
        return Err(err);
    }

    async fn fall_back_to_polling(&self, ctx: &SendContext) -> Result<SendOutcome, ChatError> {
        let operation = if ctx.operation.is_cancelled() {
            self.with_state(|state| {
                if !state.active.is_current(&ctx.token) {
                    return None;
                }
                return state
                    .operation
                    .renew(ctx.operation.id(), OperationKind::Poll);
            })
        } else {
            Some(ctx.operation.clone())
        };
        let Some(operation) = operation else {
            return Ok(SendOutcome::Stale);
        };
        if operation.is_cancelled() {
            return Ok(self.settle_cancelled(ctx, operation.reason()));
        }

        self.set_send_state(ctx, SendState::PollingFallback);
        let target = PollTarget {
            thread_id: ctx.token.thread_id.to_string(),
            token: ctx.token.clone(),
            user_timestamp: ctx.user_timestamp,
            placeholder_id: ctx.placeholder_id.to_string(),
        };

        match self.poll_for_final_answer(&target, &operation).await {
            PollOutcome::Committed(_) => {
                return Ok(SendOutcome::Finalized);
            }
            PollOutcome::Cancelled => {
                return Ok(self.settle_cancelled(ctx, operation.reason()));
            }
            PollOutcome::Stale => {
                return Ok(SendOutcome::Stale);
            }
            PollOutcome::DeadlineElapsed => {
                return Ok(SendOutcome::Unresolved);
            }
        }
    }
}
