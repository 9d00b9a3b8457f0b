//! Backend API client for command execution and stream requests.

use std::time::Duration;

use reqwest::Url;
use reqwest::header::HeaderValue;
use tracing::{debug, info};

use opstream_core::config::ApiConfig;
use opstream_core::protocol::{ExecRequest, ExecResponse, describe_error_payload};

use crate::endpoints::{EndpointError, Endpoints};
use crate::stream::{StreamError, StreamRequest};

/// API client errors.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Malformed response: {0}")]
    Decode(String),

    #[error(transparent)]
    Endpoint(#[from] EndpointError),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Client for one backend.
///
/// The bearer token is sent as an `Authorization` header on plain requests,
/// attached to [`StreamRequest`]s built here, and embedded in terminal socket
/// URLs.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    endpoints: Endpoints,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(
        endpoints: Endpoints,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        crate::install_crypto_provider();
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Self::with_client(http, endpoints, token)
    }

    /// Use a preconfigured HTTP client.
    ///
    /// Install the TLS provider with [`crate::install_crypto_provider`]
    /// before building `http`; reqwest panics without one.
    pub fn with_client(
        http: reqwest::Client,
        endpoints: Endpoints,
        token: Option<String>,
    ) -> Result<Self, ApiError> {
        if let Some(token) = token.as_deref() {
            HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| ApiError::Config("Invalid token format".into()))?;
        }
        Ok(Self {
            http,
            endpoints,
            token,
        })
    }

    pub fn from_config(config: &ApiConfig) -> Result<Self, ApiError> {
        Self::new(
            Endpoints::new(&config.base_url)?,
            config.token.clone(),
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    pub const fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// Run a command to completion and return its result.
    ///
    /// A non-zero remote exit code is a successful call; only transport and
    /// HTTP-level failures are errors.
    pub async fn exec(
        &self,
        instance: &str,
        request: &ExecRequest,
    ) -> Result<ExecResponse, ApiError> {
        let url = self.endpoints.exec(instance);
        debug!(%url, command = %request.command, tty = request.tty, "Executing command");

        let mut builder = self.http.post(url).json(request);
        if let Some(token) = self.token.as_deref() {
            builder = builder.bearer_auth(token);
        }
        let resp = builder.send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(ApiError::Api {
                status: status.as_u16(),
                message: error_message(status, &body),
            });
        }

        let response: ExecResponse =
            serde_json::from_str(&body).map_err(|e| ApiError::Decode(e.to_string()))?;
        info!(
            instance,
            exit_code = response.exit_code,
            output_len = response.output.len(),
            "Command finished"
        );
        Ok(response)
    }

    /// Event stream request tailing an instance's logs.
    pub fn logs_request(
        &self,
        instance: &str,
        container: Option<&str>,
        tail: Option<u32>,
    ) -> Result<StreamRequest, StreamError> {
        self.authorize(StreamRequest::get(
            self.endpoints.logs_stream(instance, container, tail),
        ))
    }

    /// Event stream request running a command with streamed output.
    pub fn exec_stream_request(
        &self,
        instance: &str,
        request: &ExecRequest,
    ) -> Result<StreamRequest, StreamError> {
        self.authorize(StreamRequest::post_json(
            self.endpoints.exec_stream(instance),
            request,
        )?)
    }

    /// Terminal socket URL with the credential embedded.
    pub fn terminal_url(&self, instance: &str) -> Url {
        self.endpoints.terminal(instance, self.token.as_deref())
    }

    fn authorize(&self, request: StreamRequest) -> Result<StreamRequest, StreamError> {
        match self.token.as_deref() {
            Some(token) => request.bearer_auth(token),
            None => Ok(request),
        }
    }
}

fn error_message(status: reqwest::StatusCode, body: &str) -> String {
    if body.trim().is_empty() {
        return status.canonical_reason().unwrap_or("Unknown").to_string();
    }
    describe_error_payload(body)
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    fn client(token: Option<&str>) -> ApiClient {
        ApiClient::new(
            Endpoints::new("https://ops.example.com/api").unwrap(),
            token.map(String::from),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn invalid_token_is_config_error() {
        let err = ApiClient::new(
            Endpoints::new("http://h/api").unwrap(),
            Some("line\nbreak".into()),
            Duration::from_secs(1),
        )
        .unwrap_err();
        assert!(matches!(err, ApiError::Config(_)));
    }

    #[test]
    fn from_config_rejects_bad_base_url() {
        let config = ApiConfig {
            base_url: "ftp://h".into(),
            ..ApiConfig::default()
        };
        assert!(matches!(
            ApiClient::from_config(&config),
            Err(ApiError::Endpoint(EndpointError::UnsupportedScheme(_)))
        ));
    }

    #[test]
    fn terminal_url_embeds_token() {
        assert_eq!(
            client(Some("abc")).terminal_url("vm-1").as_str(),
            "wss://ops.example.com/api/instances/vm-1/terminal?token=abc"
        );
        assert_eq!(
            client(None).terminal_url("vm-1").as_str(),
            "wss://ops.example.com/api/instances/vm-1/terminal"
        );
    }

    #[test]
    fn stream_requests_carry_bearer() {
        let api = client(Some("abc"));
        let logs = api.logs_request("vm-1", None, Some(10)).unwrap();
        assert_eq!(
            logs.url().as_str(),
            "https://ops.example.com/api/instances/vm-1/logs/stream?tail=10"
        );
        assert_eq!(
            logs.headers
                .get(reqwest::header::AUTHORIZATION)
                .unwrap(),
            "Bearer abc"
        );
        let exec = api
            .exec_stream_request("vm-1", &ExecRequest::new("uptime"))
            .unwrap();
        assert_eq!(*exec.method(), reqwest::Method::POST);
    }

    #[test]
    fn error_message_prefers_payload() {
        let status = reqwest::StatusCode::CONFLICT;
        assert_eq!(
            error_message(status, r#"{"error":"instance stopped"}"#),
            "instance stopped"
        );
        assert_eq!(error_message(status, "  "), "Conflict");
    }
}
