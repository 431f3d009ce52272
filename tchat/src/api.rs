//! Client for the chat server's REST surface.
//!
//! Every authenticated call carries `Authorization: Bearer <token>`.
//! 401 and 403 responses surface as [`ApiError::Authentication`]; failures
//! to reach the server surface as [`ApiError::Network`].

use std::time::Duration;

use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

use tchat_proto::api::{
    ChatSummary, ErrorBody, HistoryItem, LoginRequest, LoginResponse, PublicKeyBody,
    RegisterRequest, UserProfile,
};

/// Errors returned by REST calls.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Credentials were rejected or the token is invalid or expired.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The server could not be reached.
    #[error("could not reach the server: {0}")]
    Network(#[source] reqwest::Error),

    /// The server refused the request.
    #[error("request rejected ({status}): {message}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Reason reported by the server, or a generic one.
        message: String,
    },

    /// The response body was not what the endpoint documents.
    #[error("unexpected response body: {0}")]
    Decode(#[source] reqwest::Error),

    /// The configured base URL cannot be extended with an endpoint path.
    #[error("invalid API URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The HTTP client could not be built.
    #[error("HTTP client setup failed: {0}")]
    Client(#[source] reqwest::Error),
}

/// REST client bound to one server base URL.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base: Url,
}

impl ApiClient {
    /// Create a client for `base_url` (e.g. `http://localhost:9090/api`).
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidUrl`] if `base_url` does not parse, or
    /// [`ApiError::Client`] if the HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let mut base = Url::parse(base_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ApiError::Client)?;
        Ok(Self { http, base })
    }

    /// Base URL every endpoint path is resolved against.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base
    }

    fn request(&self, method: Method, path: &str, token: Option<&str>) -> Result<RequestBuilder, ApiError> {
        let url = self.base.join(path)?;
        let builder = self.http.request(method, url);
        Ok(match token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        })
    }

    async fn execute(builder: RequestBuilder) -> Result<Response, ApiError> {
        let response = builder.send().await.map_err(ApiError::Network)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response
            .json::<ErrorBody>()
            .await
            .ok()
            .and_then(|body| body.message)
            .unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string()
            });
        tracing::debug!(status = status.as_u16(), %message, "API request failed");
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            Err(ApiError::Authentication(message))
        } else {
            Err(ApiError::Rejected {
                status: status.as_u16(),
                message,
            })
        }
    }

    async fn json<T: DeserializeOwned>(builder: RequestBuilder) -> Result<T, ApiError> {
        Self::execute(builder)
            .await?
            .json::<T>()
            .await
            .map_err(ApiError::Decode)
    }

    /// `POST /users/login`.
    ///
    /// # Errors
    ///
    /// [`ApiError::Authentication`] for bad credentials, otherwise see
    /// [`ApiError`].
    pub async fn login(&self, username: &str, password: &str) -> Result<LoginResponse, ApiError> {
        let body = LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        };
        Self::json(self.request(Method::POST, "users/login", None)?.json(&body)).await
    }

    /// `POST /users/register`.
    ///
    /// # Errors
    ///
    /// [`ApiError::Rejected`] when the server refuses the registration.
    pub async fn register(&self, username: &str, email: &str, password: &str) -> Result<(), ApiError> {
        let body = RegisterRequest {
            username: username.to_string(),
            email: email.to_string(),
            password: password.to_string(),
        };
        Self::execute(self.request(Method::POST, "users/register", None)?.json(&body)).await?;
        Ok(())
    }

    /// `GET /users/me`: checks that `token` is still accepted.
    ///
    /// # Errors
    ///
    /// [`ApiError::Authentication`] when the token is invalid or expired.
    pub async fn me(&self, token: &str) -> Result<UserProfile, ApiError> {
        Self::json(self.request(Method::GET, "users/me", Some(token))?).await
    }

    /// `POST /users/publicKey` with the stripped public key.
    ///
    /// # Errors
    ///
    /// See [`ApiError`].
    pub async fn publish_public_key(&self, token: &str, stripped_key: &str) -> Result<(), ApiError> {
        let body = PublicKeyBody {
            public_key: stripped_key.to_string(),
        };
        Self::execute(self.request(Method::POST, "users/publicKey", Some(token))?.json(&body)).await?;
        Ok(())
    }

    /// `GET /users/{id}/publicKey`.
    ///
    /// # Errors
    ///
    /// See [`ApiError`].
    pub async fn public_key(&self, token: &str, user_id: &str) -> Result<String, ApiError> {
        let path = format!("users/{user_id}/publicKey");
        let body: PublicKeyBody = Self::json(self.request(Method::GET, &path, Some(token))?).await?;
        Ok(body.public_key)
    }

    /// `GET /messages`: one summary per conversation.
    ///
    /// # Errors
    ///
    /// See [`ApiError`].
    pub async fn chats(&self, token: &str) -> Result<Vec<ChatSummary>, ApiError> {
        Self::json(self.request(Method::GET, "messages", Some(token))?).await
    }

    /// `GET /messages/{contactId}`: conversation history, newest first, each
    /// message carrying the copy sealed for the caller. Malformed entries are
    /// returned as [`HistoryItem::Malformed`] rather than failing the call.
    ///
    /// # Errors
    ///
    /// See [`ApiError`].
    pub async fn history(&self, token: &str, contact_id: &str) -> Result<Vec<HistoryItem>, ApiError> {
        let path = format!("messages/{contact_id}");
        Self::json(self.request(Method::GET, &path, Some(token))?).await
    }

    /// `GET /users/search?username=`.
    ///
    /// # Errors
    ///
    /// See [`ApiError`].
    pub async fn search(&self, token: &str, username: &str) -> Result<Vec<ChatSummary>, ApiError> {
        let builder = self
            .request(Method::GET, "users/search", Some(token))?
            .query(&[("username", username)]);
        Self::json(builder).await
    }
}
