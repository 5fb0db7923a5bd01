//! Token Exchange
//!
//! Single responsibility: Trade the authorization code from AUTHORIZE for an
//! access token that AUTHENTICATE accepts.
//!
//! # Authentication Flow
//!
//! 1. **Authorize on the RPC socket**
//!    - Send `AUTHORIZE` with the client id and scopes
//!    - The peer answers with a short-lived authorization code
//!
//! 2. **Exchange the code over HTTP**
//!    - `POST {token_url}` with `{"code": ...}`
//!    - A 200 answer carries `{"access_token": ...}`
//!
//! 3. **Authenticate on the RPC socket**
//!    - Send `AUTHENTICATE` with the access token
//!
//! Step 2 lives behind `TokenExchange` so the handshake can be driven
//! without the remote endpoint.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::RpcError;

/// Handshake context held between the AUTHORIZE answer and the token exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSession {
    code: String,
}

impl AuthSession {
    pub fn new(code: impl Into<String>) -> Self {
        Self { code: code.into() }
    }

    pub fn code(&self) -> &str {
        &self.code
    }
}

/// An access token accepted by AUTHENTICATE.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(<redacted>)")
    }
}

/// Trades an authorization code for an access token.
#[async_trait]
pub trait TokenExchange: Send + Sync {
    async fn exchange_code(&self, code: &str) -> Result<AccessToken, RpcError>;
}

#[derive(Debug, Serialize)]
struct TokenRequest<'a> {
    code: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// `TokenExchange` backed by the overlay token endpoint.
pub struct HttpTokenExchange {
    client: Client,
    endpoint: String,
}

impl HttpTokenExchange {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, RpcError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RpcError::TokenExchange(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl TokenExchange for HttpTokenExchange {
    async fn exchange_code(&self, code: &str) -> Result<AccessToken, RpcError> {
        debug!(endpoint = %self.endpoint, "Exchanging authorization code");

        let response = self
            .client
            .post(&self.endpoint)
            .json(&TokenRequest { code })
            .send()
            .await
            .map_err(|e| RpcError::TokenExchange(format!("Request failed: {}", e)))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(RpcError::TokenExchange(format!(
                "Token endpoint returned {}",
                status
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| RpcError::TokenExchange(format!("Malformed token response: {}", e)))?;

        info!("Access token obtained");
        Ok(AccessToken(body.access_token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn exchange_for(server: &MockServer) -> HttpTokenExchange {
        HttpTokenExchange::new(
            format!("{}/overlay/token", server.uri()),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_exchange_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/overlay/token"))
            .and(body_json(json!({"code": "abc"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "tok1"})))
            .expect(1)
            .mount(&server)
            .await;

        let exchange = exchange_for(&server).await;
        let token = assert_ok!(exchange.exchange_code("abc").await);
        assert_eq!(token.as_str(), "tok1");
    }

    #[tokio::test]
    async fn test_exchange_non_200() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({"message": "nope"})))
            .mount(&server)
            .await;

        let exchange = exchange_for(&server).await;
        let err = assert_err!(exchange.exchange_code("abc").await);
        assert!(matches!(err, RpcError::TokenExchange(_)));
    }

    #[tokio::test]
    async fn test_exchange_malformed_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let exchange = exchange_for(&server).await;
        let err = assert_err!(exchange.exchange_code("abc").await);
        assert!(matches!(err, RpcError::TokenExchange(_)));
    }

    #[test]
    fn test_access_token_debug_is_redacted() {
        let token = AccessToken::new("secret");
        assert!(!format!("{:?}", token).contains("secret"));
    }
}
