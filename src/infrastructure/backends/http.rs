#[cfg(test)]
#[path = "http_test.rs"]
mod tests;

use async_trait::async_trait;
use futures::stream::TryStreamExt;
use reqwest::RequestBuilder;
use reqwest::Response;
use serde::de::DeserializeOwned;
use serde_derive::Serialize;

use crate::configuration::Config;
use crate::configuration::ConfigKey;
use crate::domain::models::ByteStream;
use crate::domain::models::ChatBackend;
use crate::domain::models::ChatError;
use crate::domain::models::ChatStreamRequest;
use crate::domain::models::CreatedThread;
use crate::domain::models::ThreadDetail;
use crate::domain::models::ThreadPage;
use crate::domain::models::MISSING_API_URL_TEXT;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct CreateThreadRequest<'a> {
    title: &'a str,
}

/// Chat backend reached over HTTP. Thread calls use the access token, the
/// streaming endpoint uses the identity token.
pub struct HttpBackend {
    url: String,
    access_token: String,
    identity_token: String,
    client: reqwest::Client,
}

impl Default for HttpBackend {
    fn default() -> HttpBackend {
        return HttpBackend::new(
            &Config::get(ConfigKey::ApiUrl),
            &Config::get(ConfigKey::AccessToken),
            &Config::get(ConfigKey::IdentityToken),
        );
    }
}

impl HttpBackend {
    pub fn new(url: &str, access_token: &str, identity_token: &str) -> HttpBackend {
        return HttpBackend {
            url: url.trim().trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
            identity_token: identity_token.to_string(),
            client: reqwest::Client::new(),
        };
    }

    fn endpoint(&self, path: &str) -> String {
        return format!("{url}{path}", url = self.url);
    }

    fn with_token(req: RequestBuilder, token: &str) -> RequestBuilder {
        if token.is_empty() {
            return req;
        }

        return req.bearer_auth(token);
    }

    async fn check_status(res: Response, call: &str) -> Result<Response, ChatError> {
        let status = res.status();
        if status.is_success() {
            return Ok(res);
        }

        let body = res.text().await.unwrap_or_default();
        let err = ChatError::from_response_body(status.as_u16(), &body);
        tracing::error!(status = status.as_u16(), error = %err, call, "chat backend request failed");

        return Err(err);
    }

    async fn read_json<T: DeserializeOwned>(
        &self,
        req: RequestBuilder,
        call: &str,
    ) -> Result<T, ChatError> {
        self.ensure_configured()?;

        let res = HttpBackend::check_status(req.send().await?, call).await?;
        let body = res.text().await?;
        match serde_json::from_str::<T>(&body) {
            Ok(parsed) => return Ok(parsed),
            Err(err) => {
                tracing::error!(error = ?err, call, "chat backend returned an unreadable body");
                return Err(ChatError::transport(
                    None,
                    &format!("unexpected response from {call}: {err}"),
                ));
            }
        }
    }
}

#[async_trait]
impl ChatBackend for HttpBackend {
    fn ensure_configured(&self) -> Result<(), ChatError> {
        if self.url.is_empty() {
            return Err(ChatError::Configuration(MISSING_API_URL_TEXT.to_string()));
        }

        return Ok(());
    }

    #[allow(clippy::implicit_return)]
    async fn list_threads(&self, limit: usize) -> Result<ThreadPage, ChatError> {
        let req = self
            .client
            .get(self.endpoint("/threads"))
            .query(&[("limit", limit)]);
        let req = HttpBackend::with_token(req, &self.access_token);

        return self.read_json::<ThreadPage>(req, "list threads").await;
    }

    #[allow(clippy::implicit_return)]
    async fn create_thread(&self, title: &str) -> Result<CreatedThread, ChatError> {
        let req = self
            .client
            .post(self.endpoint("/threads"))
            .json(&CreateThreadRequest { title });
        let req = HttpBackend::with_token(req, &self.access_token);

        return self.read_json::<CreatedThread>(req, "create thread").await;
    }

    #[allow(clippy::implicit_return)]
    async fn get_thread(&self, thread_id: &str) -> Result<ThreadDetail, ChatError> {
        let req = self
            .client
            .get(self.endpoint(&format!("/threads/{thread_id}")));
        let req = HttpBackend::with_token(req, &self.access_token);

        return self.read_json::<ThreadDetail>(req, "get thread").await;
    }

    #[allow(clippy::implicit_return)]
    async fn post_chat_stream(&self, request: ChatStreamRequest) -> Result<ByteStream, ChatError> {
        self.ensure_configured()?;

        let req = self
            .client
            .post(self.endpoint("/chat/stream"))
            .json(&request);
        let req = HttpBackend::with_token(req, &self.identity_token);

        let res = HttpBackend::check_status(req.send().await?, "chat stream").await?;
        tracing::debug!(thread_id = %request.thread_id, "chat stream opened");

        let stream = res.bytes_stream().map_err(ChatError::from);
        return Ok(Box::pin(stream));
    }
}
