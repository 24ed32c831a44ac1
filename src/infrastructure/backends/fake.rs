use std::collections::VecDeque;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::channel::mpsc;

use crate::domain::models::ByteStream;
use crate::domain::models::ChatBackend;
use crate::domain::models::ChatError;
use crate::domain::models::ChatStreamRequest;
use crate::domain::models::CreatedThread;
use crate::domain::models::Thread;
use crate::domain::models::ThreadDetail;
use crate::domain::models::ThreadPage;
use crate::domain::models::MISSING_API_URL_TEXT;

pub type ChunkSender = mpsc::UnboundedSender<Result<Bytes, ChatError>>;

type ScriptedStream = Result<mpsc::UnboundedReceiver<Result<Bytes, ChatError>>, ChatError>;

/// In-memory backend whose streams are fed by the test through channels.
#[derive(Default)]
pub struct FakeBackend {
    unconfigured: bool,
    get_thread_delay: Duration,
    threads: Mutex<Vec<Thread>>,
    details: Mutex<VecDeque<Result<ThreadDetail, ChatError>>>,
    streams: Mutex<VecDeque<ScriptedStream>>,
    requests: Mutex<Vec<ChatStreamRequest>>,
    pub list_calls: AtomicUsize,
    pub get_thread_calls: AtomicUsize,
    pub post_calls: AtomicUsize,
}

impl FakeBackend {
    pub fn with_threads(threads: Vec<Thread>) -> FakeBackend {
        let backend = FakeBackend::default();
        *backend.threads.lock().unwrap() = threads;
        return backend;
    }

    pub fn unconfigured() -> FakeBackend {
        return FakeBackend {
            unconfigured: true,
            ..FakeBackend::default()
        };
    }

    pub fn with_get_thread_delay(delay: Duration) -> FakeBackend {
        return FakeBackend {
            get_thread_delay: delay,
            ..FakeBackend::default()
        };
    }

    /// Queues a stream for the next send and returns the handle feeding it.
    /// Dropping the handle ends the stream.
    pub fn script_stream(&self) -> ChunkSender {
        let (tx, rx) = mpsc::unbounded();
        self.streams.lock().unwrap().push_back(Ok(rx));
        return tx;
    }

    pub fn fail_stream(&self, err: ChatError) {
        self.streams.lock().unwrap().push_back(Err(err));
    }

    pub fn queue_detail(&self, detail: Result<ThreadDetail, ChatError>) {
        self.details.lock().unwrap().push_back(detail);
    }

    pub fn requests(&self) -> Vec<ChatStreamRequest> {
        return self.requests.lock().unwrap().clone();
    }

    pub fn calls(counter: &AtomicUsize) -> usize {
        return counter.load(Ordering::SeqCst);
    }
}

pub fn send_chunk(tx: &ChunkSender, bytes: &[u8]) {
    tx.unbounded_send(Ok(Bytes::copy_from_slice(bytes))).unwrap();
}

#[async_trait]
impl ChatBackend for FakeBackend {
    fn ensure_configured(&self) -> Result<(), ChatError> {
        if self.unconfigured {
            return Err(ChatError::Configuration(MISSING_API_URL_TEXT.to_string()));
        }

        return Ok(());
    }

    async fn list_threads(&self, limit: usize) -> Result<ThreadPage, ChatError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let items = self
            .threads
            .lock()
            .unwrap()
            .iter()
            .take(limit)
            .cloned()
            .collect::<Vec<Thread>>();

        return Ok(ThreadPage {
            items,
            next_page_token: None,
        });
    }

    async fn create_thread(&self, title: &str) -> Result<CreatedThread, ChatError> {
        let mut threads = self.threads.lock().unwrap();
        let thread_id = format!("t-{}", threads.len() + 1);
        threads.insert(
            0,
            Thread {
                thread_id: thread_id.to_string(),
                title: title.to_string(),
                created_at: 0,
                updated_at: 0,
            },
        );

        return Ok(CreatedThread { thread_id });
    }

    async fn get_thread(&self, thread_id: &str) -> Result<ThreadDetail, ChatError> {
        self.get_thread_calls.fetch_add(1, Ordering::SeqCst);
        if !self.get_thread_delay.is_zero() {
            tokio::time::sleep(self.get_thread_delay).await;
        }

        let queued = self.details.lock().unwrap().pop_front();
        return queued.unwrap_or_else(|| {
            return Ok(ThreadDetail {
                thread_id: thread_id.to_string(),
                title: "".to_string(),
                updated_at: 0,
                messages: vec![],
            });
        });
    }

    async fn post_chat_stream(&self, request: ChatStreamRequest) -> Result<ByteStream, ChatError> {
        self.post_calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);

        let scripted = self.streams.lock().unwrap().pop_front();
        match scripted {
            Some(Ok(rx)) => return Ok(Box::pin(rx)),
            Some(Err(err)) => return Err(err),
            None => {
                let (_, rx) = mpsc::unbounded::<Result<Bytes, ChatError>>();
                return Ok(Box::pin(rx));
            }
        }
    }
}
