//! [`ChatApi`] over HTTPS with `reqwest`.

use std::time::Duration;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use skillchat_proto::message::{Message, UserId};
use skillchat_proto::roster::{ContactProfile, ConversationSummary, RosterContext};
use url::Url;

use super::{ApiError, ChatApi, SendRequest, ThreadPage};

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// REST client for the messaging endpoints below `base`.
#[derive(Debug, Clone)]
pub struct HttpChatApi {
    client: reqwest::Client,
    base: Url,
    token: String,
}

impl HttpChatApi {
    /// Build a client for `base` (e.g. `https://lms.example.edu/api`).
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Transport`] if the TLS backend cannot initialise.
    pub fn new(base: &Url, token: String) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        Ok(Self::with_client(client, base, token))
    }

    /// Build with a preconfigured `reqwest` client.
    #[must_use]
    pub fn with_client(client: reqwest::Client, base: &Url, token: String) -> Self {
        Self {
            client,
            base: base.clone(),
            token,
        }
    }

    /// `{base}/messages/<segments…>`, each segment percent-encoded so an
    /// opaque id can never escape its path position.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| ApiError::Transport(format!("{} cannot carry a path", self.base)))?
            .pop_if_empty()
            .push("messages")
            .extend(segments);
        Ok(url)
    }

    async fn execute(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, ApiError> {
        let response = request
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = response.text().await.unwrap_or_default();
        Err(map_status(status, text))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ApiError> {
        self.execute(request)
            .await?
            .json()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }
}

/// Map a non-success status to an [`ApiError`].
fn map_status(status: StatusCode, body: String) -> ApiError {
    match status {
        StatusCode::UNAUTHORIZED => ApiError::Unauthorized,
        StatusCode::NOT_FOUND => ApiError::NotFound,
        StatusCode::TOO_MANY_REQUESTS => ApiError::RateLimited,
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => ApiError::Validation(body),
        other => ApiError::Server(other.as_u16()),
    }
}

impl ChatApi for HttpChatApi {
    async fn fetch_contacts(&self, context: &RosterContext) -> Result<Vec<ContactProfile>, ApiError> {
        let request = self
            .client
            .get(self.endpoint(&["contacts"])?)
            .query(&[("context", context.as_str())]);
        self.get_json(request).await
    }

    async fn fetch_conversations(&self) -> Result<Vec<ConversationSummary>, ApiError> {
        self.get_json(self.client.get(self.endpoint(&["conversations"])?))
            .await
    }

    async fn fetch_thread(&self, partner: &UserId) -> Result<ThreadPage, ApiError> {
        let page: ThreadPage = self
            .get_json(self.client.get(self.endpoint(&["thread", partner.as_str()])?))
            .await?;
        for message in &page.messages {
            message
                .validate_inbound()
                .map_err(|e| ApiError::Decode(e.to_string()))?;
        }
        Ok(page)
    }

    async fn mark_thread_read(&self, partner: &UserId) -> Result<(), ApiError> {
        let url = self.endpoint(&["thread", partner.as_str(), "read"])?;
        self.execute(self.client.put(url))
            .await
            .map(|_| ())
    }

    async fn send_message(&self, partner: &UserId, body: &str) -> Result<Message, ApiError> {
        let request = self.client.post(self.endpoint(&[])?).json(&SendRequest {
            receiver_id: partner.clone(),
            content: body.to_string(),
        });
        let message: Message = self.get_json(request).await?;
        message
            .validate_inbound()
            .map_err(|e| ApiError::Decode(e.to_string()))?;
        Ok(message)
    }
}
