use super::Message;
use super::Thread;
use super::ThreadStatus;

/// Notifications pushed to the view layer whenever session state changes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    TranscriptChanged {
        thread_id: String,
        messages: Vec<Message>,
    },
    ThreadsChanged(Vec<Thread>),
    ThreadStatusChanged {
        thread_id: String,
        status: ThreadStatus,
    },
    StreamingChanged(bool),
}
