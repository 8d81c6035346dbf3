//! The remote store boundary and its REST client.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use super::types::{ReminderInput, RemoteReminder, RemoteTag, TagInput};
use crate::auth::TokenRefreshGate;
use crate::error::{ConfigError, RemoteError, TransportError};
use crate::storage::SyncConfig;

/// Server-side reminder and tag collections. Ids are remote ids.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn list_reminders(&self) -> Result<Vec<RemoteReminder>, RemoteError>;
    async fn create_reminder(&self, input: &ReminderInput) -> Result<RemoteReminder, RemoteError>;
    async fn update_reminder(
        &self,
        id: &str,
        input: &ReminderInput,
    ) -> Result<RemoteReminder, RemoteError>;
    async fn delete_reminder(&self, id: &str) -> Result<(), RemoteError>;

    async fn list_tags(&self) -> Result<Vec<RemoteTag>, RemoteError>;
    async fn create_tag(&self, input: &TagInput) -> Result<RemoteTag, RemoteError>;
    async fn update_tag(&self, id: &str, input: &TagInput) -> Result<RemoteTag, RemoteError>;
    async fn delete_tag(&self, id: &str) -> Result<(), RemoteError>;
}

/// JSON-over-HTTP remote store:
///
/// - `GET/POST {base}/reminders`, `PUT/DELETE {base}/reminders/{id}`
/// - `GET/POST {base}/tags`, `PUT/DELETE {base}/tags/{id}`
///
/// Every call is authorized through the [`TokenRefreshGate`].
pub struct HttpRemoteStore {
    client: Client,
    base: Url,
    gate: Arc<TokenRefreshGate>,
}

impl HttpRemoteStore {
    pub fn new(client: Client, base: Url, gate: Arc<TokenRefreshGate>) -> Result<Self, ConfigError> {
        if base.cannot_be_a_base() {
            return Err(ConfigError::InvalidValue {
                key: "sync.base_url".into(),
                message: format!("'{base}' cannot be used as a base URL"),
            });
        }
        Ok(Self { client, base, gate })
    }

    /// Build a client with the configured timeout against `sync.base_url`.
    pub fn from_config(config: &SyncConfig, gate: Arc<TokenRefreshGate>) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                key: "sync.request_timeout_secs".into(),
                message: e.to_string(),
            })?;
        Self::new(client, config.base_url()?, gate)
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Send one authorized request and return the successful response.
    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<serde_json::Value>,
    ) -> Result<Response, RemoteError> {
        debug!(%method, %url, "remote request");
        self.gate
            .authorized_request(|token| {
                let mut request = self
                    .client
                    .request(method.clone(), url.clone())
                    .bearer_auth(token);
                if let Some(body) = &body {
                    request = request.json(body);
                }
                async move { check_status(request.send().await?).await }
            })
            .await
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        method: Method,
        url: Url,
        body: Option<serde_json::Value>,
    ) -> Result<T, RemoteError> {
        let resp = self.send(method, url, body).await?;
        let parsed = resp
            .json::<T>()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))?;
        Ok(parsed)
    }
}

fn to_body<T: serde::Serialize>(input: &T) -> Result<serde_json::Value, RemoteError> {
    serde_json::to_value(input)
        .map_err(|e| RemoteError::Transport(TransportError::Decode(e.to_string())))
}

async fn check_status(resp: Response) -> Result<Response, TransportError> {
    let status = resp.status();
    match status {
        StatusCode::UNAUTHORIZED => Err(TransportError::Unauthorized),
        StatusCode::NOT_FOUND => Err(TransportError::NotFound),
        s if s.is_success() => Ok(resp),
        s => {
            let body = resp.text().await.unwrap_or_default();
            Err(TransportError::Status {
                status: s.as_u16(),
                body,
            })
        }
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn list_reminders(&self) -> Result<Vec<RemoteReminder>, RemoteError> {
        self.send_json(Method::GET, self.endpoint(&["reminders"]), None)
            .await
    }

    async fn create_reminder(&self, input: &ReminderInput) -> Result<RemoteReminder, RemoteError> {
        self.send_json(
            Method::POST,
            self.endpoint(&["reminders"]),
            Some(to_body(input)?),
        )
        .await
    }

    async fn update_reminder(
        &self,
        id: &str,
        input: &ReminderInput,
    ) -> Result<RemoteReminder, RemoteError> {
        self.send_json(
            Method::PUT,
            self.endpoint(&["reminders", id]),
            Some(to_body(input)?),
        )
        .await
    }

    async fn delete_reminder(&self, id: &str) -> Result<(), RemoteError> {
        self.send(Method::DELETE, self.endpoint(&["reminders", id]), None)
            .await?;
        Ok(())
    }

    async fn list_tags(&self) -> Result<Vec<RemoteTag>, RemoteError> {
        self.send_json(Method::GET, self.endpoint(&["tags"]), None).await
    }

    async fn create_tag(&self, input: &TagInput) -> Result<RemoteTag, RemoteError> {
        self.send_json(Method::POST, self.endpoint(&["tags"]), Some(to_body(input)?))
            .await
    }

    async fn update_tag(&self, id: &str, input: &TagInput) -> Result<RemoteTag, RemoteError> {
        self.send_json(
            Method::PUT,
            self.endpoint(&["tags", id]),
            Some(to_body(input)?),
        )
        .await
    }

    async fn delete_tag(&self, id: &str) -> Result<(), RemoteError> {
        self.send(Method::DELETE, self.endpoint(&["tags", id]), None)
            .await?;
        Ok(())
    }
}
