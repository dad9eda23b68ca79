//! REST client for the tutoring service.
//!
//! Requests carry `Authorization: Bearer <token>` whenever the session holds
//! one. A 401 from any endpoint logs the session out.

mod types;

pub use types::*;

use std::sync::Arc;

use reqwest::{header, Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::config::ClientConfig;
use crate::error::{ApiError, ApiResult};
use crate::realtime::TrainingStatus;
use crate::session::SessionStore;

/// REST client
#[derive(Debug, Clone)]
pub struct ApiClient {
    base: String,
    client: Client,
    session: Arc<SessionStore>,
}

impl ApiClient {
    pub fn new(config: &ClientConfig, session: Arc<SessionStore>) -> ApiResult<Self> {
        url::Url::parse(&config.api_url)?;
        let client = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .build()?;

        Ok(Self {
            base: config.api_url.trim_end_matches('/').to_string(),
            client,
            session,
        })
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    pub async fn health(&self) -> ApiResult<HealthReport> {
        self.execute(self.request(Method::GET, "/health")).await
    }

    /// Create an account and log in as it.
    pub async fn register(&self, registration: &Registration) -> ApiResult<AuthResponse> {
        let auth: AuthResponse = self
            .execute(self.request(Method::POST, "/auth/register").json(registration))
            .await?;
        self.remember(&auth)?;
        Ok(auth)
    }

    pub async fn login(&self, credentials: &Credentials) -> ApiResult<AuthResponse> {
        let auth: AuthResponse = self
            .execute(self.request(Method::POST, "/auth/login").json(credentials))
            .await?;
        self.remember(&auth)?;
        Ok(auth)
    }

    /// Local only; the service keeps no server-side session.
    pub fn logout(&self) -> ApiResult<()> {
        self.session.clear()?;
        tracing::info!("logged out");
        Ok(())
    }

    pub async fn solve(&self, problem: &str) -> ApiResult<SolveResponse> {
        #[derive(Serialize)]
        struct Body<'a> {
            problem: &'a str,
        }

        self.execute(self.request(Method::POST, "/solve").json(&Body { problem }))
            .await
    }

    pub async fn submit_training_data(&self, data: &NewTrainingData) -> ApiResult<TrainingSubmission> {
        self.execute(self.request(Method::POST, "/train").json(data))
            .await
    }

    pub async fn training_data(&self, page: u32, limit: u32) -> ApiResult<Page<TrainingRecord>> {
        self.execute(
            self.request(Method::GET, "/training-data")
                .query(&[("page", page), ("limit", limit)]),
        )
        .await
    }

    /// Kick off a retraining run. A run already in progress comes back as a 409 rejection.
    pub async fn retrain(&self) -> ApiResult<RetrainResponse> {
        self.execute(self.request(Method::POST, "/retrain")).await
    }

    pub async fn training_status(&self) -> ApiResult<TrainingStatus> {
        self.execute(self.request(Method::GET, "/training/status"))
            .await
    }

    pub async fn solution_history(
        &self,
        user_id: i64,
        page: u32,
        limit: u32,
    ) -> ApiResult<Page<HistoryEntry>> {
        self.execute(
            self.request(Method::GET, "/solutions/history")
                .query(&[("userId", user_id)])
                .query(&[("page", page), ("limit", limit)]),
        )
        .await
    }

    fn remember(&self, auth: &AuthResponse) -> ApiResult<()> {
        self.session.save(auth.token.clone(), auth.user.clone())?;
        if let Some(user) = &auth.user {
            tracing::info!("signed in as {}", user.username);
        }
        Ok(())
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base, path);
        tracing::debug!("{method} {url}");

        let builder = self.client.request(method, url);
        match self.session.token() {
            Some(token) => builder.header(header::AUTHORIZATION, format!("Bearer {token}")),
            None => builder,
        }
    }

    async fn execute<T: DeserializeOwned>(&self, request: RequestBuilder) -> ApiResult<T> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        if status.is_success() {
            return Ok(serde_json::from_slice(&body)?);
        }

        let message = error_message(&body);
        tracing::debug!("request failed with {status}: {message}");

        if status == StatusCode::UNAUTHORIZED {
            if let Err(e) = self.session.clear() {
                tracing::warn!("failed to clear session after 401: {e}");
            }
        }
        Err(ApiError::from_status(status, message))
    }
}

/// The service reports failures as `{"error": "..."}`; fall back to `message` or raw text.
fn error_message(body: &[u8]) -> String {
    if let Ok(value) = serde_json::from_slice::<Value>(body) {
        for key in ["error", "message"] {
            if let Some(text) = value.get(key).and_then(Value::as_str) {
                return text.to_string();
            }
        }
    }
    String::from_utf8_lossy(body).trim().to_string()
}
