//! API client for the user directory REST service.
//!
//! This module provides the `ApiClient` struct. Each public method wraps
//! exactly one HTTP call and validates the response body against the
//! expected record shape.

use std::time::Duration;

use anyhow::Result;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::models::{Comment, NewUser, Post, User, UserPatch};

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
/// 15s fails fast enough that a dead network flips to cached data quickly.
const REQUEST_TIMEOUT_SECS: u64 = 15;

/// API client for the user directory.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    /// Create a new API client against the given base endpoint
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self::with_client(client, base_url))
    }

    /// Create a client sharing an existing connection pool
    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send a request, mapping transport and status failures.
    async fn send(&self, request: RequestBuilder, action: &'static str) -> Result<reqwest::Response, ApiError> {
        let response = request.send().await.map_err(|source| {
            debug!(action, error = %source, "Request failed before a response arrived");
            ApiError::Network { action, source }
        })?;

        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            warn!(action, status = status.as_u16(), "Request returned error status");
            Err(ApiError::from_status(action, status))
        }
    }

    /// Read the body and validate it against `T`.
    async fn parse<T: DeserializeOwned>(
        response: reqwest::Response,
        action: &'static str,
        resource: &'static str,
    ) -> Result<T, ApiError> {
        let text = response
            .text()
            .await
            .map_err(|source| ApiError::Network { action, source })?;

        serde_json::from_str(&text).map_err(|e| {
            warn!(action, kind = "validation", error = %e, "Response failed shape validation");
            ApiError::invalid_data(resource, e)
        })
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        action: &'static str,
        resource: &'static str,
    ) -> Result<T, ApiError> {
        let url = self.url(path);
        debug!(url = %url, "GET");
        let response = self.send(self.client.get(&url), action).await?;
        Self::parse(response, action, resource).await
    }

    // ===== Users =====

    /// `GET /users`
    pub async fn fetch_users(&self) -> Result<Vec<User>, ApiError> {
        self.get("/users", "fetch users", "user").await
    }

    /// `GET /users/{id}`
    pub async fn fetch_user(&self, user_id: u64) -> Result<User, ApiError> {
        self.get(&format!("/users/{}", user_id), "fetch user", "user").await
    }

    /// `POST /users`
    pub async fn create_user(&self, user: &NewUser) -> Result<User, ApiError> {
        let action = "create user";
        let url = self.url("/users");
        debug!(url = %url, "POST");
        let response = self.send(self.client.post(&url).json(user), action).await?;
        Self::parse(response, action, "user").await
    }

    /// `PUT /users/{id}` with the patch fields plus the id.
    pub async fn update_user(&self, user_id: u64, patch: &UserPatch) -> Result<User, ApiError> {
        let action = "update user";
        let mut body = serde_json::to_value(patch).map_err(|e| ApiError::invalid_data("user", e))?;
        if let Some(map) = body.as_object_mut() {
            map.insert("id".to_string(), serde_json::Value::from(user_id));
        }

        let url = self.url(&format!("/users/{}", user_id));
        debug!(url = %url, "PUT");
        let response = self.send(self.client.put(&url).json(&body), action).await?;
        Self::parse(response, action, "user").await
    }

    /// `DELETE /users/{id}`. The response body is ignored.
    pub async fn delete_user(&self, user_id: u64) -> Result<(), ApiError> {
        let url = self.url(&format!("/users/{}", user_id));
        debug!(url = %url, "DELETE");
        self.send(self.client.delete(&url), "delete user").await?;
        Ok(())
    }

    // ===== Posts & Comments =====

    /// `GET /posts?userId={id}`
    pub async fn fetch_posts_by_user(&self, user_id: u64) -> Result<Vec<Post>, ApiError> {
        self.get(&format!("/posts?userId={}", user_id), "fetch posts", "post").await
    }

    /// `GET /posts/{id}/comments`
    pub async fn fetch_comments_by_post(&self, post_id: u64) -> Result<Vec<Comment>, ApiError> {
        self.get(&format!("/posts/{}/comments", post_id), "fetch comments", "comment")
            .await
    }

    /// Lightweight reachability check used by the connectivity monitor.
    /// Any HTTP response counts as reachable; only transport failures do not.
    pub async fn probe(&self) -> bool {
        match self.client.head(&self.base_url).send().await {
            Ok(_) => true,
            Err(e) => {
                debug!(error = %e, "Connectivity probe failed");
                false
            }
        }
    }
}
