//! Transport seam between the client and the network.
//!
//! # Design
//! A `Transport` executes one `HttpRequest` and hands back the response as
//! plain data. Status codes are never interpreted here: 4xx/5xx responses are
//! returned as `Ok` so the parser can capture their bodies. Only failures to
//! complete the exchange (DNS, connect, timeout, unreadable body) become
//! `ApiError::Transport`.

use crate::error::ApiError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse};

/// Executes HTTP requests on behalf of the client.
pub trait Transport: Send + Sync {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, ApiError>;
}

impl<F> Transport for F
where
    F: Fn(&HttpRequest) -> Result<HttpResponse, ApiError> + Send + Sync,
{
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, ApiError> {
        self(request)
    }
}

/// Blocking transport backed by a `ureq` agent.
///
/// Every request is sent with `http_status_as_error` disabled so error
/// statuses are returned as data rather than `Err`, whatever the agent was
/// configured with.
#[derive(Debug, Clone)]
pub struct UreqTransport {
    agent: ureq::Agent,
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl UreqTransport {
    pub fn new() -> Self {
        let agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .build()
            .new_agent();
        Self { agent }
    }

    /// Use a preconfigured agent. Its timeouts apply to requests that carry
    /// no timeout of their own.
    pub fn with_agent(agent: ureq::Agent) -> Self {
        Self { agent }
    }
}

/// Copy headers onto `builder` and apply per-request settings. The agent's
/// `timeout_global` is only overridden when the request has a deadline.
fn prepare<B>(mut builder: ureq::RequestBuilder<B>, request: &HttpRequest) -> ureq::RequestBuilder<B> {
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    let config = builder.config().http_status_as_error(false);
    match request.timeout {
        Some(timeout) => config.timeout_global(Some(timeout)).build(),
        None => config.build(),
    }
}

impl Transport for UreqTransport {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, ApiError> {
        let url = request.url.as_str();
        let result = match request.method {
            HttpMethod::Get => prepare(self.agent.get(url), request).call(),
            HttpMethod::Delete => prepare(self.agent.delete(url), request).call(),
            HttpMethod::Post | HttpMethod::Put => {
                let builder = if request.method == HttpMethod::Post {
                    self.agent.post(url)
                } else {
                    self.agent.put(url)
                };
                let builder = prepare(builder, request);
                match &request.body {
                    Some(body) => builder.send(body.as_bytes()),
                    None => builder.send_empty(),
                }
            }
        };
        let mut response = result.map_err(|e| ApiError::transport(e.to_string()))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| Some((name.as_str().to_string(), value.to_str().ok()?.to_string())))
            .collect();
        let body = response
            .body_mut()
            .read_to_string()
            .map_err(|e| ApiError::transport(format!("reading response body: {e}")))?;

        Ok(HttpResponse { status, headers, body })
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;
    use std::time::{Duration, Instant};

    use super::*;

    /// A listener whose backlog completes the handshake but never answers.
    fn silent_server() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/kv", listener.local_addr().unwrap());
        (listener, url)
    }

    fn get(url: &str, timeout: Option<Duration>) -> HttpRequest {
        HttpRequest {
            method: HttpMethod::Get,
            url: url.to_string(),
            headers: Vec::new(),
            body: None,
            timeout,
        }
    }

    #[test]
    fn agent_timeout_applies_when_request_has_none() {
        let (_listener, url) = silent_server();
        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_millis(500)))
            .build()
            .new_agent();
        let transport = UreqTransport::with_agent(agent);

        let started = Instant::now();
        let err = transport.send(&get(&url, None)).unwrap_err();
        assert!(matches!(err, ApiError::Transport(_)), "unexpected error: {err}");
        assert!(started.elapsed() < Duration::from_secs(5), "agent timeout ignored");
    }

    #[test]
    fn request_timeout_bounds_the_call() {
        let (_listener, url) = silent_server();
        let transport = UreqTransport::new();

        let started = Instant::now();
        let err = transport
            .send(&get(&url, Some(Duration::from_millis(500))))
            .unwrap_err();
        assert!(matches!(err, ApiError::Transport(_)), "unexpected error: {err}");
        assert!(started.elapsed() < Duration::from_secs(5), "request timeout ignored");
    }

    #[test]
    fn closures_act_as_transports() {
        let transport = |req: &HttpRequest| -> Result<HttpResponse, ApiError> {
            Ok(HttpResponse {
                status: 204,
                headers: Vec::new(),
                body: req.url.clone(),
            })
        };
        let response = transport.send(&get("http://x/kv", None)).unwrap();
        assert_eq!(response.body, "http://x/kv");
    }
}
