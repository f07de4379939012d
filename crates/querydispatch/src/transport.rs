use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::error::DispatchError;

/// REST prefix under which query endpoints are served.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiVersion {
    /// The legacy `/api` prefix.
    V1,
    /// The `/api2` prefix used by all query endpoints.
    #[default]
    V2,
}

impl ApiVersion {
    /// The URL path segment for this prefix.
    pub fn prefix(self) -> &'static str {
        match self {
            ApiVersion::V1 => "api",
            ApiVersion::V2 => "api2",
        }
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// The network boundary of the dispatch layer.
///
/// The dispatcher treats responses as opaque JSON values; everything about
/// retries, timeouts and connection pooling lives behind this seam.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issues a POST to `{base}/{prefix}/{endpoint}` with a JSON body.
    async fn post(
        &self,
        api_version: ApiVersion,
        endpoint: &str,
        payload: &Value,
    ) -> Result<Value, DispatchError>;
}

/// [`Transport`] over HTTP, backed by a shared connection pool.
#[derive(Debug)]
pub struct HttpTransport {
    base_url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpTransport {
    /// Creates a transport for the backend at `base_url`.
    ///
    /// The `timeout` is a fixed ceiling for one whole round trip; queries
    /// exceeding it fail with [`DispatchError::Timeout`] and are never
    /// retried by this layer.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::ClientBuilder::new()
            .gzip(true)
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .unwrap();

        HttpTransport {
            base_url: base_url.into(),
            timeout,
            client,
        }
    }

    fn url(&self, api_version: ApiVersion, endpoint: &str) -> String {
        format!(
            "{}/{}/{}",
            self.base_url.trim_end_matches('/'),
            api_version.prefix(),
            endpoint.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post(
        &self,
        api_version: ApiVersion,
        endpoint: &str,
        payload: &Value,
    ) -> Result<Value, DispatchError> {
        let url = self.url(api_version, endpoint);
        tracing::trace!(url, "issuing query");

        let response = self
            .client
            .post(&url)
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DispatchError::Timeout(self.timeout)
                } else {
                    DispatchError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DispatchError::Transport(format!("{status}: {body}")));
        }

        let value: Value = response
            .json()
            .await
            .map_err(|e| DispatchError::Transport(format!("malformed response: {e}")))?;

        if let Some(message) = application_failure(&value) {
            return Err(DispatchError::Application(message));
        }

        Ok(value)
    }
}

/// Detects the backend's failure envelope: a success response whose body is
/// an object carrying `"success": false` or a non-null `"error"` field.
fn application_failure(value: &Value) -> Option<String> {
    let object = value.as_object()?;

    let failed = object.get("success").and_then(Value::as_bool) == Some(false);
    let error = object.get("error").filter(|error| !error.is_null());
    if !failed && error.is_none() {
        return None;
    }

    Some(match error {
        Some(Value::String(message)) => message.clone(),
        Some(other) => other.to_string(),
        None => "request failed".to_string(),
    })
}
