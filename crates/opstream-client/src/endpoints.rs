//! Backend URL construction.
//!
//! All operational endpoints hang off `{base}/instances/{instance}/`. The
//! terminal socket lives on the same host with the scheme swapped to
//! `ws`/`wss`, and carries its credential as a `?token=` query parameter
//! since the socket handshake cannot carry an `Authorization` header.

use reqwest::Url;

/// Errors from [`Endpoints::new`].
#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    #[error("Invalid base URL {url}: {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),
}

/// URL builder for one backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    base: Url,
    socket_base: Url,
}

impl Endpoints {
    pub fn new(base_url: &str) -> Result<Self, EndpointError> {
        let invalid = |reason: String| EndpointError::InvalidBaseUrl {
            url: base_url.to_string(),
            reason,
        };

        let mut base = Url::parse(base_url).map_err(|e| invalid(e.to_string()))?;
        if base.cannot_be_a_base() {
            return Err(invalid("not a hierarchical URL".into()));
        }
        base.set_query(None);
        base.set_fragment(None);

        let socket_scheme = match base.scheme() {
            "http" => "ws",
            "https" => "wss",
            other => return Err(EndpointError::UnsupportedScheme(other.to_string())),
        };
        let mut socket_base = base.clone();
        socket_base
            .set_scheme(socket_scheme)
            .map_err(|()| EndpointError::UnsupportedScheme(socket_scheme.to_string()))?;

        Ok(Self { base, socket_base })
    }

    pub const fn base(&self) -> &Url {
        &self.base
    }

    /// Live container log tail (event stream).
    pub fn logs_stream(&self, instance: &str, container: Option<&str>, tail: Option<u32>) -> Url {
        let mut url = instance_url(&self.base, instance, &["logs", "stream"]);
        if container.is_some() || tail.is_some() {
            let mut query = url.query_pairs_mut();
            if let Some(container) = container {
                query.append_pair("container", container);
            }
            if let Some(tail) = tail {
                query.append_pair("tail", &tail.to_string());
            }
        }
        url
    }

    /// One-shot command execution (JSON request/response).
    pub fn exec(&self, instance: &str) -> Url {
        instance_url(&self.base, instance, &["exec"])
    }

    /// Streamed command execution (event stream).
    pub fn exec_stream(&self, instance: &str) -> Url {
        instance_url(&self.base, instance, &["exec", "stream"])
    }

    /// Interactive terminal socket.
    pub fn terminal(&self, instance: &str, token: Option<&str>) -> Url {
        let mut url = instance_url(&self.socket_base, instance, &["terminal"]);
        if let Some(token) = token {
            url.query_pairs_mut().append_pair("token", token);
        }
        url
    }
}

fn instance_url(base: &Url, instance: &str, tail: &[&str]) -> Url {
    let mut url = base.clone();
    // Bases are validated as hierarchical in `Endpoints::new`
    if let Ok(mut segments) = url.path_segments_mut() {
        segments
            .pop_if_empty()
            .push("instances")
            .push(instance)
            .extend(tail);
    }
    url
}
