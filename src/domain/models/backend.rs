use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde_derive::Deserialize;
use serde_derive::Serialize;

use super::ChatError;
use super::CreatedThread;
use super::ThreadDetail;
use super::ThreadPage;

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ChatError>> + Send>>;

pub type BackendBox = Arc<dyn ChatBackend + Send + Sync>;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub web_search: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatStreamRequest {
    pub thread_id: String,
    pub text: String,
    pub client_message_id: String,
    pub capabilities: Capabilities,
}

#[async_trait]
pub trait ChatBackend {
    /// Used before any request is issued to verify the backend can be reached
    /// at all. Implementations report a missing base URL here so no network
    /// call is attempted.
    fn ensure_configured(&self) -> Result<(), ChatError> {
        return Ok(());
    }

    async fn list_threads(&self, limit: usize) -> Result<ThreadPage, ChatError>;

    async fn create_thread(&self, title: &str) -> Result<CreatedThread, ChatError>;

    /// Returns the authoritative history of a thread. Used both to hydrate a
    /// thread when it becomes active and to reconcile a stream that produced
    /// no usable answer.
    async fn get_thread(&self, thread_id: &str) -> Result<ThreadDetail, ChatError>;

    /// Starts a streamed reply. The returned stream yields raw body bytes,
    /// which are either plain UTF-8 text or a JSON metadata preamble, eight
    /// zero bytes, then text.
    async fn post_chat_stream(&self, request: ChatStreamRequest) -> Result<ByteStream, ChatError>;
}
