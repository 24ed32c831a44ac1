use anyhow::Result;
use futures::StreamExt;
use mockito::Matcher;
use serde_json::json;

use super::HttpBackend;
use crate::domain::models::Capabilities;
use crate::domain::models::ChatBackend;
use crate::domain::models::ChatError;
use crate::domain::models::ChatStreamRequest;
use crate::domain::models::Role;
use crate::domain::models::MISSING_API_URL_TEXT;

impl HttpBackend {
    fn with_url(url: String) -> HttpBackend {
        return HttpBackend::new(&url, "access-abc", "identity-xyz");
    }
}

fn stream_request() -> ChatStreamRequest {
    return ChatStreamRequest {
        thread_id: "t-1".to_string(),
        text: "Hello there".to_string(),
        client_message_id: "c-1".to_string(),
        capabilities: Capabilities { web_search: true },
    };
}

#[tokio::test]
async fn it_lists_threads() -> Result<()> {
    let body = json!({
        "items": [
            { "threadId": "t-1", "title": "First", "createdAt": 1, "updatedAt": 2 },
            { "threadId": "t-2", "title": "Second", "createdAt": 3, "updatedAt": 4 }
        ],
        "nextPageToken": "next"
    });

    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/threads")
        .match_query(Matcher::UrlEncoded("limit".to_string(), "25".to_string()))
        .match_header("authorization", "Bearer access-abc")
        .with_status(200)
        .with_body(body.to_string())
        .create_async()
        .await;

    let backend = HttpBackend::with_url(server.url());
    let page = backend.list_threads(25).await?;
    mock.assert_async().await;

    assert_eq!(page.items.len(), 2);
    assert_eq!(page.items[1].thread_id, "t-2");
    assert_eq!(page.items[1].title, "Second");
    assert_eq!(page.next_page_token, Some("next".to_string()));

    return Ok(());
}

#[tokio::test]
async fn it_creates_threads() -> Result<()> {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/threads")
        .match_header("authorization", "Bearer access-abc")
        .match_body(Matcher::Json(json!({ "title": "Release notes" })))
        .with_status(201)
        .with_body(json!({ "threadId": "t-new" }).to_string())
        .create_async()
        .await;

    let backend = HttpBackend::with_url(server.url());
    let created = backend.create_thread("Release notes").await?;
    mock.assert_async().await;

    assert_eq!(created.thread_id, "t-new");

    return Ok(());
}

#[tokio::test]
async fn it_gets_thread_details() -> Result<()> {
    let body = json!({
        "threadId": "t-1",
        "title": "First",
        "updatedAt": 10,
        "messages": [
            { "id": "m-1", "timestamp": 1, "role": "user", "text": "Hi" },
            { "timestamp": 2, "role": "assistant", "text": "Hello!" }
        ]
    });

    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/threads/t-1")
        .match_header("authorization", "Bearer access-abc")
        .with_status(200)
        .with_body(body.to_string())
        .create_async()
        .await;

    let backend = HttpBackend::with_url(server.url());
    let detail = backend.get_thread("t-1").await?;
    mock.assert_async().await;

    assert_eq!(detail.messages.len(), 2);
    assert_eq!(detail.messages[0].id(), "m-1");
    assert_eq!(detail.messages[1].role, Role::Assistant);
    assert!(!detail.messages[1].id().is_empty());

    return Ok(());
}

#[tokio::test]
async fn it_streams_chat_bytes() -> Result<()> {
    let mut body = br#"{"model":"x"}"#.to_vec();
    body.extend_from_slice(&test_utils::DELIMITER);
    body.extend_from_slice("Hello".as_bytes());

    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/chat/stream")
        .match_header("authorization", "Bearer identity-xyz")
        .match_body(Matcher::Json(json!({
            "threadId": "t-1",
            "text": "Hello there",
            "clientMessageId": "c-1",
            "capabilities": { "webSearch": true }
        })))
        .with_status(200)
        .with_body(body.clone())
        .create_async()
        .await;

    let backend = HttpBackend::with_url(server.url());
    let mut stream = backend.post_chat_stream(stream_request()).await?;

    let mut received: Vec<u8> = vec![];
    while let Some(chunk) = stream.next().await {
        received.extend_from_slice(&chunk?);
    }
    mock.assert_async().await;

    assert_eq!(received, body);

    return Ok(());
}

#[tokio::test]
async fn it_extracts_json_error_messages() -> Result<()> {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/chat/stream")
        .with_status(429)
        .with_body(json!({ "error": { "message": "Slow down" } }).to_string())
        .create_async()
        .await;

    let backend = HttpBackend::with_url(server.url());
    let res = backend.post_chat_stream(stream_request()).await;
    mock.assert_async().await;

    let err = match res {
        Ok(_) => panic!("expected the stream request to fail"),
        Err(err) => err,
    };
    assert_eq!(err, ChatError::transport(Some(429), "Slow down"));
    assert_eq!(err.status(), Some(429));

    return Ok(());
}

#[tokio::test]
async fn it_extracts_plain_text_error_messages() -> Result<()> {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/threads/missing")
        .with_status(404)
        .with_body("thread not found\n")
        .create_async()
        .await;

    let backend = HttpBackend::with_url(server.url());
    let res = backend.get_thread("missing").await;
    mock.assert_async().await;

    assert_eq!(res, Err(ChatError::transport(Some(404), "thread not found")));

    return Ok(());
}

#[tokio::test]
async fn it_fails_on_unreadable_bodies() -> Result<()> {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/threads/t-1")
        .with_status(200)
        .with_body("<html>oops</html>")
        .create_async()
        .await;

    let backend = HttpBackend::with_url(server.url());
    let res = backend.get_thread("t-1").await;
    mock.assert_async().await;

    assert!(matches!(res, Err(ChatError::Transport { status: None, .. })));

    return Ok(());
}

#[tokio::test]
async fn it_refuses_requests_without_a_url() -> Result<()> {
    let backend = HttpBackend::new("  ", "access-abc", "identity-xyz");

    assert_eq!(
        backend.ensure_configured(),
        Err(ChatError::Configuration(MISSING_API_URL_TEXT.to_string()))
    );
    assert_eq!(
        backend.list_threads(10).await,
        Err(ChatError::Configuration(MISSING_API_URL_TEXT.to_string()))
    );
    assert!(matches!(
        backend.post_chat_stream(stream_request()).await,
        Err(ChatError::Configuration(_))
    ));

    return Ok(());
}

#[tokio::test]
async fn it_trims_trailing_slashes_from_the_url() -> Result<()> {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/threads/t-1")
        .with_status(200)
        .with_body(json!({ "threadId": "t-1" }).to_string())
        .create_async()
        .await;

    let backend = HttpBackend::with_url(format!("{}/", server.url()));
    let detail = backend.get_thread("t-1").await?;
    mock.assert_async().await;

    assert_eq!(detail.thread_id, "t-1");
    assert!(detail.messages.is_empty());

    return Ok(());
}
