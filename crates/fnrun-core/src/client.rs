//! HTTP client for a function server.
//!
//! One endpoint, one method: the event is POSTed as JSON to
//! `http://localhost:<port>/` and the response body is either the handler's
//! return value or `{"error": {"message": ..., "stack": ...}}`.

use crate::error::{CoreError, Result};
use hyper::client::HttpConnector;
use hyper::header::CONTENT_TYPE;
use hyper::{Body, Client, Method, Request, StatusCode, Uri};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error payload reported by a throwing handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    /// Error message.
    #[serde(default)]
    pub message: String,
    /// Stack trace.
    #[serde(default)]
    pub stack: String,
}

/// Client bound to a single function server endpoint.
#[derive(Debug, Clone)]
pub struct FunctionClient {
    http: Client<HttpConnector>,
    endpoint: Uri,
}

impl FunctionClient {
    /// Client for a function server listening on `port` on loopback.
    pub fn for_port(port: u16) -> Result<Self> {
        Self::new(&format!("http://localhost:{port}/"))
    }

    /// Client for an arbitrary endpoint URL.
    pub fn new(endpoint: &str) -> Result<Self> {
        let endpoint: Uri = endpoint
            .parse()
            .map_err(|e| CoreError::Request(format!("invalid endpoint {endpoint:?}: {e}")))?;
        Ok(Self {
            http: Client::new(),
            endpoint,
        })
    }

    /// The endpoint URL.
    pub fn endpoint(&self) -> &Uri {
        &self.endpoint
    }

    /// POST `event` and classify the response.
    ///
    /// Dropping the returned future aborts the request.
    pub async fn call<E: Serialize + ?Sized>(&self, event: &E) -> Result<Value> {
        let body = serde_json::to_vec(event).map_err(|source| CoreError::Serialize {
            what: "event",
            source,
        })?;
        tracing::trace!(endpoint = %self.endpoint, body_len = body.len(), "Sending event");

        let request = Request::builder()
            .method(Method::POST)
            .uri(self.endpoint.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .map_err(|e| CoreError::Request(e.to_string()))?;

        let response = self
            .http
            .request(request)
            .await
            .map_err(CoreError::Transport)?;
        let status = response.status();
        let bytes = hyper::body::to_bytes(response.into_body())
            .await
            .map_err(CoreError::Transport)?;

        tracing::trace!(status = %status, body_len = bytes.len(), "Function responded");
        classify(status, &bytes)
    }
}

/// Turn a function server response into a result value or an error.
///
/// - non-2xx: [`CoreError::Http`] with the raw body
/// - body not JSON: [`CoreError::Decode`]
/// - object with an `error` key: [`CoreError::Runtime`] when the value has
///   the `{message, stack}` shape, otherwise [`CoreError::RuntimeRaw`]
/// - anything else: the decoded value, unchanged
pub fn classify(status: StatusCode, body: &[u8]) -> Result<Value> {
    if !status.is_success() {
        return Err(CoreError::Http {
            status: status.as_u16(),
            body: String::from_utf8_lossy(body).into_owned(),
        });
    }

    let value: Value = serde_json::from_slice(body).map_err(CoreError::Decode)?;

    if let Some(error) = value.as_object().and_then(|obj| obj.get("error")) {
        return Err(match RemoteError::deserialize(error) {
            Ok(remote) => CoreError::Runtime {
                message: remote.message,
                stack: remote.stack,
            },
            Err(_) => CoreError::RuntimeRaw(error.to_string()),
        });
    }

    Ok(value)
}
