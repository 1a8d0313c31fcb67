use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::core::{app_error::AppError, middleware::Role};

/// Identity resolved from a bearer token by the hosted auth provider.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthUser {
    pub id: Uuid,
    pub email: Option<String>,
    pub role: Role,
}

#[derive(Deserialize)]
struct RemoteUser {
    id: Uuid,
    email: Option<String>,
    #[serde(default)]
    app_metadata: Value,
    #[serde(default)]
    user_metadata: Value,
}

impl RemoteUser {
    /// `app_metadata` is only writable server-side, so it wins over `user_metadata`.
    /// Accounts created before roles existed default to clients.
    fn role(&self) -> Role {
        [&self.app_metadata, &self.user_metadata]
            .into_iter()
            .filter_map(|meta| meta.get("role").and_then(Value::as_str))
            .find_map(|raw| raw.parse().ok())
            .unwrap_or(Role::Client)
    }
}

#[derive(Clone)]
pub struct AuthClient {
    http: Client,
    url: String,
    api_key: String,
}

impl AuthClient {
    pub fn new(http: Client, url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    /// Resolves the token's owner; `Ok(None)` means the token is invalid or expired.
    pub async fn get_user(&self, token: &str) -> Result<Option<AuthUser>> {
        let response = self
            .http
            .get(format!("{}/auth/v1/user", self.url))
            .bearer_auth(token)
            .header("apikey", &self.api_key)
            .send()
            .await
            .map_err(|_| AppError::ServiceUnreachable("AuthService".into()))?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => {
                return Ok(None);
            }
            status if !status.is_success() => {
                return Err(anyhow::anyhow!("Auth provider answered with {status}"));
            }
            _ => {}
        }

        let user: RemoteUser = response
            .json()
            .await
            .context("Failed to parse auth user JSON")?;

        Ok(Some(AuthUser {
            id: user.id,
            role: user.role(),
            email: user.email,
        }))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[tokio::test]
    async fn resolves_user_and_role_from_metadata() {
        let server = MockServer::start().await;
        let id = Uuid::new_v4();

        Mock::given(method("GET"))
            .and(path("/auth/v1/user"))
            .and(header("Authorization", "Bearer good-token"))
            .and(header("apikey", "anon"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": id,
                "email": "ana@example.com",
                "user_metadata": { "role": "provider" }
            })))
            .mount(&server)
            .await;

        let client = AuthClient::new(Client::new(), server.uri(), "anon");
        let user = client.get_user("good-token").await.unwrap().unwrap();

        assert_eq!(user.id, id);
        assert_eq!(user.role, Role::Provider);
        assert_eq!(user.email.as_deref(), Some("ana@example.com"));
    }

    #[tokio::test]
    async fn app_metadata_role_takes_precedence() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/auth/v1/user"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": Uuid::new_v4(),
                "app_metadata": { "role": "client" },
                "user_metadata": { "role": "provider" }
            })))
            .mount(&server)
            .await;

        let client = AuthClient::new(Client::new(), server.uri(), "anon");
        let user = client.get_user("t").await.unwrap().unwrap();
        assert_eq!(user.role, Role::Client);
    }

    #[tokio::test]
    async fn rejected_token_yields_none() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/auth/v1/user"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let client = AuthClient::new(Client::new(), server.uri(), "anon");
        assert!(client.get_user("expired").await.unwrap().is_none());
    }
}
