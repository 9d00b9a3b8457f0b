//! Request, handler and error types for the event stream reader.

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, Url};
use serde::Serialize;

use opstream_core::Frame;

/// Errors surfaced by [`EventStreamReader::run`](super::EventStreamReader::run).
///
/// Cancellation is never an error.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Read error: {0}")]
    Read(String),
}

impl StreamError {
    /// Whether the stream failed before `on_open` was delivered.
    pub const fn is_open_failure(&self) -> bool {
        matches!(
            self,
            Self::InvalidRequest(_) | Self::Connection(_) | Self::Status { .. }
        )
    }
}

/// Callbacks invoked by the reader, always from the task calling `run`.
///
/// Frames arrive in byte order. After `on_close` or `on_error` no further
/// callback is made for that run.
pub trait StreamHandler: Send {
    /// The backend accepted the request and the body is about to be read.
    fn on_open(&mut self) {}

    /// A deliverable frame, including `error` and `success` frames.
    fn on_message(&mut self, frame: Frame);

    /// Transport failure, reported exactly once.
    fn on_error(&mut self, _error: &StreamError) {}

    /// The stream ended normally, by a `close` frame, or by cancellation.
    fn on_close(&mut self) {}
}

/// Target of one stream session.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub(crate) method: Method,
    pub(crate) url: Url,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Option<serde_json::Value>,
}

impl StreamRequest {
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// POST with a JSON body.
    pub fn post_json(url: Url, body: &impl Serialize) -> Result<Self, StreamError> {
        let body = serde_json::to_value(body)
            .map_err(|e| StreamError::InvalidRequest(format!("unserializable body: {e}")))?;
        Ok(Self {
            method: Method::POST,
            url,
            headers: HeaderMap::new(),
            body: Some(body),
        })
    }

    #[must_use]
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Attach a bearer credential. The credential itself is not validated.
    pub fn bearer_auth(self, token: &str) -> Result<Self, StreamError> {
        let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| StreamError::InvalidRequest("Invalid token format".into()))?;
        value.set_sensitive(true);
        Ok(self.header(AUTHORIZATION, value))
    }

    pub const fn url(&self) -> &Url {
        &self.url
    }

    pub const fn method(&self) -> &Method {
        &self.method
    }

    pub(crate) fn into_builder(self, client: &reqwest::Client) -> reqwest::RequestBuilder {
        let mut builder = client.request(self.method, self.url).headers(self.headers);
        if let Some(body) = self.body {
            builder = builder.json(&body);
        }
        builder
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    fn url() -> Url {
        Url::parse("http://127.0.0.1:8080/api/instances/vm-1/logs/stream").unwrap()
    }

    #[test]
    fn bearer_auth_sets_sensitive_header() {
        let req = StreamRequest::get(url()).bearer_auth("abc123").unwrap();
        let value = req.headers.get(AUTHORIZATION).unwrap();
        assert_eq!(value.to_str().unwrap(), "Bearer abc123");
        assert!(value.is_sensitive());
    }

    #[test]
    fn bearer_auth_rejects_control_characters() {
        let err = StreamRequest::get(url()).bearer_auth("bad\ntoken").unwrap_err();
        assert!(matches!(err, StreamError::InvalidRequest(_)));
        assert!(err.is_open_failure());
    }

    #[test]
    fn post_json_keeps_body() {
        let req = StreamRequest::post_json(url(), &serde_json::json!({"command": "ls"})).unwrap();
        assert_eq!(*req.method(), Method::POST);
        assert_eq!(req.body.unwrap()["command"], "ls");
    }

    #[test]
    fn read_error_is_not_open_failure() {
        assert!(!StreamError::Read("reset".into()).is_open_failure());
        assert!(
            StreamError::Status {
                status: 401,
                body: String::new()
            }
            .is_open_failure()
        );
    }
}
