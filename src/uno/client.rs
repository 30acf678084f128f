//! Thin wrapper around the overlay control API.
//!
//! Every call is a `PUT {base}/{overlay_id}/api` with a JSON body `{command, ...payload}`.
//! Transport failures never surface as errors: they come back as a response with status 0
//! so the worker can account for the attempt and back off.

use std::{sync::Arc, time::Duration};

use futures::future::BoxFuture;
use reqwest::{Client, StatusCode};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use super::rate_headers::{CapturedRateLimit, capture_rate_limit};

/// Failures raised while talking to the overlay service.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Building the HTTP client failed.
    #[error("failed to build overlay client")]
    Build {
        #[source]
        source: reqwest::Error,
    },
    /// The request could not be sent or timed out.
    #[error("failed to send `{command}` to overlay `{overlay_id}`")]
    Send {
        overlay_id: String,
        command: String,
        #[source]
        source: reqwest::Error,
    },
    /// Reading the response body failed.
    #[error("failed to read overlay response for `{command}`")]
    Body {
        command: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Outcome of one remote call.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteResponse {
    /// HTTP status, or 0 when the request never completed.
    pub status: u16,
    /// Decoded JSON body; non-JSON text is kept as a string value.
    pub body: Option<Value>,
    /// Rate-limit header captured from the response.
    pub rate_limit: Option<CapturedRateLimit>,
}

impl RemoteResponse {
    /// Response used when the request failed at the transport level.
    pub fn transport_failure() -> Self {
        Self {
            status: 0,
            body: None,
            rate_limit: None,
        }
    }

    /// HTTP 2xx.
    pub fn is_success(&self) -> bool {
        StatusCode::from_u16(self.status).is_ok_and(|status| status.is_success())
    }

    /// Command deliveries additionally require an object body.
    pub fn command_succeeded(&self) -> bool {
        self.is_success() && matches!(self.body, Some(Value::Object(_)))
    }

    /// Query result, unwrapped from `{payload: ...}` when the remote wraps it.
    pub fn query_value(&self) -> Option<Value> {
        if !self.is_success() {
            return None;
        }
        match &self.body {
            Some(Value::Object(map)) if map.contains_key("payload") => map.get("payload").cloned(),
            other => other.clone(),
        }
    }

    /// Retry hint from a `retry_after` or `retryAfter` body field, in seconds.
    pub fn retry_after(&self) -> Option<Duration> {
        let Some(Value::Object(map)) = &self.body else {
            return None;
        };
        let raw = map.get("retry_after").or_else(|| map.get("retryAfter"))?;
        let seconds = match raw {
            Value::Number(number) => number.as_f64()?,
            Value::String(text) => text.trim().parse::<f64>().ok()?,
            _ => return None,
        };
        (seconds.is_finite() && seconds >= 0.0).then(|| Duration::from_secs_f64(seconds))
    }
}

/// Abstraction over the overlay service so workers can run against a fake in tests.
pub trait OverlayApi: Send + Sync {
    /// Execute one command against an overlay.
    fn execute(
        &self,
        overlay_id: &str,
        command: &str,
        payload: Option<&Map<String, Value>>,
    ) -> BoxFuture<'static, RemoteResponse>;
}

/// Shared handle to the overlay service.
pub type SharedOverlayApi = Arc<dyn OverlayApi>;

/// Connection settings for [`OverlayClient`].
#[derive(Debug, Clone)]
pub struct OverlayClientConfig {
    pub base_url: String,
    pub bearer: Option<String>,
    pub timeout: Duration,
}

/// `reqwest`-backed implementation of [`OverlayApi`].
#[derive(Clone)]
pub struct OverlayClient {
    client: Client,
    base_url: Arc<str>,
    bearer: Option<Arc<str>>,
}

impl OverlayClient {
    /// Build a client; the timeout applies to every request.
    pub fn new(config: OverlayClientConfig) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|source| ClientError::Build { source })?;

        Ok(Self {
            client,
            base_url: Arc::from(config.base_url.trim_end_matches('/')),
            bearer: config
                .bearer
                .filter(|token| !token.trim().is_empty())
                .map(Arc::from),
        })
    }

    async fn send(
        &self,
        overlay_id: &str,
        command: &str,
        payload: Option<Map<String, Value>>,
    ) -> Result<RemoteResponse, ClientError> {
        let url = format!("{}/{}/api", self.base_url, overlay_id);
        let mut body = Map::new();
        body.insert("command".into(), Value::String(command.to_string()));
        if let Some(payload) = payload {
            body.extend(payload);
        }

        let mut builder = self.client.put(&url).json(&body);
        if let Some(token) = &self.bearer {
            builder = builder.bearer_auth(token.as_ref());
        }

        let response = builder.send().await.map_err(|source| ClientError::Send {
            overlay_id: overlay_id.to_string(),
            command: command.to_string(),
            source,
        })?;

        let status = response.status();
        let rate_limit = capture_rate_limit(
            response
                .headers()
                .iter()
                .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v))),
        );
        let text = response.text().await.map_err(|source| ClientError::Body {
            command: command.to_string(),
            source,
        })?;

        let body = if text.trim().is_empty() {
            None
        } else {
            Some(serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text)))
        };

        Ok(RemoteResponse {
            status: status.as_u16(),
            body,
            rate_limit,
        })
    }
}

impl OverlayApi for OverlayClient {
    fn execute(
        &self,
        overlay_id: &str,
        command: &str,
        payload: Option<&Map<String, Value>>,
    ) -> BoxFuture<'static, RemoteResponse> {
        let client = self.clone();
        let overlay_id = overlay_id.to_string();
        let command = command.to_string();
        let payload = payload.cloned();
        Box::pin(async move {
            match client.send(&overlay_id, &command, payload).await {
                Ok(response) => {
                    debug!(%overlay_id, %command, status = response.status, "overlay call");
                    response
                }
                Err(err) => {
                    warn!(%overlay_id, %command, error = %err, "overlay call failed");
                    RemoteResponse::transport_failure()
                }
            }
        })
    }
}
