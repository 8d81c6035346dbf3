//! Exchange of the long-lived refresh credential for a new access token.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use crate::error::AuthError;

/// Result of a successful refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    /// Rotated refresh credential, when the server issued one.
    pub refresh_token: Option<String>,
    /// Lifetime of the access token in seconds.
    pub expires_in: Option<i64>,
}

#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, AuthError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    error: Option<String>,
    error_description: Option<String>,
}

/// OAuth 2.0 `refresh_token` grant against a token endpoint.
#[derive(Debug, Clone)]
pub struct OAuthRefresher {
    client: Client,
    token_url: Url,
    client_id: String,
    client_secret: Option<String>,
}

impl OAuthRefresher {
    pub fn new(client: Client, token_url: Url, client_id: impl Into<String>) -> Self {
        Self {
            client,
            token_url,
            client_id: client_id.into(),
            client_secret: None,
        }
    }

    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }
}

#[async_trait]
impl TokenRefresher for OAuthRefresher {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, AuthError> {
        let mut params = vec![
            ("client_id", self.client_id.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];
        if let Some(secret) = &self.client_secret {
            params.push(("client_secret", secret.as_str()));
        }

        debug!(token_url = %self.token_url, "refreshing access token");
        let resp = self
            .client
            .post(self.token_url.clone())
            .form(&params)
            .send()
            .await
            .map_err(|e| AuthError::RefreshFailed(e.to_string()))?;

        let status = resp.status();
        let body: TokenResponse = resp
            .json()
            .await
            .map_err(|e| AuthError::RefreshFailed(format!("invalid token response: {e}")))?;

        if let Some(error) = body.error {
            let detail = body.error_description.unwrap_or_default();
            warn!(%status, %error, "token endpoint refused refresh");
            return Err(AuthError::RefreshFailed(format!("{error} {detail}").trim().to_string()));
        }
        if !status.is_success() {
            return Err(AuthError::RefreshFailed(format!("token endpoint returned {status}")));
        }
        let access_token = body
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AuthError::RefreshFailed("response has no access_token".into()))?;

        Ok(TokenGrant {
            access_token,
            refresh_token: body.refresh_token,
            expires_in: body.expires_in,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn refresher(server: &mockito::Server) -> OAuthRefresher {
        let url = Url::parse(&format!("{}/token", server.url())).unwrap();
        OAuthRefresher::new(Client::new(), url, "nudge-app")
    }

    #[tokio::test]
    async fn refresh_posts_form_and_parses_grant() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
                Matcher::UrlEncoded("refresh_token".into(), "r-old".into()),
                Matcher::UrlEncoded("client_id".into(), "nudge-app".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"a-new","refresh_token":"r-new","expires_in":3600}"#)
            .create_async()
            .await;

        let grant = refresher(&server).refresh("r-old").await.unwrap();
        mock.assert_async().await;
        assert_eq!(
            grant,
            TokenGrant {
                access_token: "a-new".into(),
                refresh_token: Some("r-new".into()),
                expires_in: Some(3600),
            }
        );
    }

    #[tokio::test]
    async fn oauth_error_body_fails_refresh() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_status(400)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error":"invalid_grant","error_description":"revoked"}"#)
            .create_async()
            .await;

        let err = refresher(&server).refresh("r-old").await.unwrap_err();
        assert_eq!(err, AuthError::RefreshFailed("invalid_grant revoked".into()));
    }

    #[tokio::test]
    async fn missing_access_token_fails_refresh() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"token_type":"Bearer"}"#)
            .create_async()
            .await;

        assert!(matches!(
            refresher(&server).refresh("r-old").await,
            Err(AuthError::RefreshFailed(_))
        ));
    }
}
