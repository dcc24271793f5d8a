//! REST adapter for the collaborator traits

use super::{ConversationSource, CustomerDirectory, StatusCommands};
use crate::config::ChatConfig;
use crate::error::CollaboratorError;
use crate::model::{Conversation, ConversationStatus, Customer, Message};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Talks to the support backend over HTTP
///
/// - `GET  {base}/conversations`
/// - `GET  {base}/conversations/{id}/messages`
/// - `PATCH {base}/conversations/{id}/status`
/// - `GET  {base}/customers/{id}`
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: Url,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusUpdate {
    status: ConversationStatus,
}

impl HttpBackend {
    pub fn new(config: &ChatConfig) -> Result<Self, CollaboratorError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| CollaboratorError::network(format!("Failed to create HTTP client: {e}")))?;
        Self::with_client(client, &config.api_url)
    }

    pub fn with_client(client: Client, base_url: &str) -> Result<Self, CollaboratorError> {
        let base_url = Url::parse(base_url).map_err(|e| {
            CollaboratorError::rejected(format!("Invalid API URL {base_url}: {e}"))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(CollaboratorError::rejected(format!(
                "Invalid API URL {base_url}: cannot hold a path"
            )));
        }
        Ok(Self { client, base_url })
    }

    /// Append path segments to the base URL; each segment is percent-encoded
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        segments: &[&str],
    ) -> Result<T, CollaboratorError> {
        let url = self.url(segments);
        tracing::debug!(%url, "GET");
        let response = self.client.get(url).send().await.map_err(transport_error)?;
        let response = check_status(response).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| CollaboratorError::decode(e.to_string()))
    }
}

fn transport_error(e: reqwest::Error) -> CollaboratorError {
    CollaboratorError::network(e.to_string())
}

/// Classify non-success responses
async fn check_status(response: Response) -> Result<Response, CollaboratorError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(classify(status, &body))
}

fn classify(status: StatusCode, body: &str) -> CollaboratorError {
    let message = if body.is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status}: {body}")
    };
    if status == StatusCode::NOT_FOUND {
        CollaboratorError::not_found(message)
    } else if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        CollaboratorError::network(message)
    } else {
        CollaboratorError::rejected(message)
    }
}

#[async_trait]
impl ConversationSource for HttpBackend {
    async fn list_conversations(&self) -> Result<Vec<Conversation>, CollaboratorError> {
        self.get_json(&["conversations"]).await
    }

    async fn fetch_history(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<Message>, CollaboratorError> {
        self.get_json(&["conversations", conversation_id, "messages"])
            .await
    }
}

#[async_trait]
impl StatusCommands for HttpBackend {
    async fn set_bot_enabled(
        &self,
        conversation_id: &str,
        enabled: bool,
    ) -> Result<(), CollaboratorError> {
        let url = self.url(&["conversations", conversation_id, "status"]);
        let body = StatusUpdate {
            status: ConversationStatus::from_bot_enabled(enabled),
        };
        tracing::debug!(%url, enabled, "PATCH conversation status");
        let response = self
            .client
            .patch(url)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;
        check_status(response).await?;
        Ok(())
    }
}

#[async_trait]
impl CustomerDirectory for HttpBackend {
    async fn lookup_customer(&self, customer_id: &str) -> Result<Customer, CollaboratorError> {
        self.get_json(&["customers", customer_id]).await
    }
}
