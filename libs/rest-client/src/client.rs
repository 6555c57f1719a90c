use std::time::Duration;

use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;

use pubsub_api::BackendError;

use crate::wire::ErrorBody;

pub const DEFAULT_ENDPOINT: &str = "https://pubsub.googleapis.com/v1";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Connection settings for the REST backend.
#[derive(Debug, Clone)]
pub struct RestConfig {
    pub project: String,
    /// API base URL. Ignored when `emulator_host` is set.
    pub endpoint: Option<String>,
    /// `host:port` of a local emulator. Plain HTTP, no credentials.
    pub emulator_host: Option<String>,
    /// OAuth2 bearer token.
    pub access_token: Option<String>,
    pub timeout: Duration,
}

impl RestConfig {
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            endpoint: None,
            emulator_host: None,
            access_token: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn base_url(&self) -> String {
        match (&self.emulator_host, &self.endpoint) {
            (Some(host), _) => format!("http://{host}/v1"),
            (None, Some(endpoint)) => endpoint.trim_end_matches('/').to_string(),
            (None, None) => DEFAULT_ENDPOINT.to_string(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  HTTP client
// ═══════════════════════════════════════════════════════════════

pub(crate) struct RestClient {
    http: reqwest::Client,
    base: String,
    project: String,
    token: Option<String>,
}

impl RestClient {
    pub(crate) fn new(config: &RestConfig) -> Result<Self, BackendError> {
        if config.project.is_empty() {
            return Err(BackendError::config("project is required"));
        }
        let token = match &config.emulator_host {
            Some(_) => None,
            None => {
                let token = config.access_token.clone().filter(|t| !t.is_empty());
                if token.is_none() {
                    return Err(BackendError::config(
                        "an access token is required (--token or PUBSUB_ACCESS_TOKEN) unless PUBSUB_EMULATOR_HOST is set",
                    ));
                }
                token
            }
        };
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| BackendError::config(format!("HTTP client: {e}")))?;
        Ok(Self { http, base: config.base_url(), project: config.project.clone(), token })
    }

    pub(crate) fn topic_path(&self, topic: &str) -> String {
        resource_path(&self.project, "topics", topic)
    }

    pub(crate) fn subscription_path(&self, subscription: &str) -> String {
        resource_path(&self.project, "subscriptions", subscription)
    }

    pub(crate) fn project_path(&self) -> String {
        format!("projects/{}", self.project)
    }

    /// Send a request and decode the JSON response. An empty body decodes
    /// as `{}`.
    pub(crate) async fn call<B, T>(&self, method: Method, path: &str, body: Option<&B>) -> Result<T, BackendError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}/{}", self.base, path);
        let mut req = self.http.request(method.clone(), &url);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        if let Some(body) = body {
            req = req
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(serde_json::to_vec(body)?);
        }

        tracing::trace!(%method, %url, "request");
        let resp = req
            .send()
            .await
            .map_err(|e| BackendError::io(format!("HTTP request failed: {e}")))?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| BackendError::io(format!("read response body: {e}")))?;

        if !status.is_success() {
            return Err(status_error(status, path, &text));
        }
        let text = if text.trim().is_empty() { "{}" } else { text.as_str() };
        Ok(serde_json::from_str(text)?)
    }
}

fn resource_path(project: &str, collection: &str, name: &str) -> String {
    if name.starts_with("projects/") {
        name.to_string()
    } else {
        format!("projects/{project}/{collection}/{name}")
    }
}

/// Map a non-success status to a categorized error.
pub(crate) fn status_error(status: StatusCode, path: &str, body: &str) -> BackendError {
    let detail = serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.error.message)
        .ok()
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| body.trim().to_string());
    let message = format!("{path}: HTTP {status}: {detail}");
    match status {
        StatusCode::NOT_FOUND => BackendError::not_found(message),
        StatusCode::CONFLICT => BackendError::already_exists(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => BackendError::permission(message),
        _ => BackendError::io(message),
    }
}
