use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl OutboundRequest {
    pub fn post(url: &str) -> Self {
        OutboundRequest {
            url: url.to_string(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn json<T: Serialize>(url: &str, body: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::post(url)
            .header("Content-Type", "application/json")
            .body(serde_json::to_vec(body)?))
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    #[cfg(test)]
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct OutboundResponse {
    pub status: u16,
    pub location: Option<String>,
    pub body: String,
}

impl OutboundResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request to {host} timed out")]
    Timeout { host: String },

    #[error("request to {host} failed: {reason}")]
    Failed { host: String, reason: String },
}

/// Outbound HTTP used by every delivery channel.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post(&self, request: OutboundRequest) -> Result<OutboundResponse, TransportError>;
}

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Every request is bounded by `timeout` so one unresponsive push service
    /// cannot hold a batch open.
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(HttpTransport { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post(&self, request: OutboundRequest) -> Result<OutboundResponse, TransportError> {
        let OutboundRequest { url, headers, body } = request;

        let mut builder = self.client.post(&url);
        for (name, value) in &headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        // Endpoint paths identify the subscription, so only the host is reported.
        let response = builder.body(body).send().await.map_err(|e| {
            let host = host_of(&url);
            if e.is_timeout() {
                TransportError::Timeout { host }
            } else {
                TransportError::Failed {
                    host,
                    reason: e.without_url().to_string(),
                }
            }
        })?;

        let status = response.status().as_u16();
        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let body = readable_body(response.text().await.map_err(reqwest::Error::without_url));

        Ok(OutboundResponse {
            status,
            location,
            body,
        })
    }
}

/// Response bodies are diagnostics only; a failed read is logged and
/// replaced with a marker so the status still reaches the caller.
fn readable_body<E: std::fmt::Display>(body: Result<String, E>) -> String {
    match body {
        Ok(body) => body,
        Err(error) => {
            tracing::debug!(%error, "Could not read response body.");
            format!("<unreadable response body: {}>", error)
        }
    }
}

fn host_of(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_owned))
        .unwrap_or_else(|| "unknown host".to_string())
}

#[cfg(test)]
pub mod testing {
    use std::sync::Mutex;

    use super::*;

    type Responder =
        Box<dyn Fn(&OutboundRequest) -> Result<OutboundResponse, TransportError> + Send + Sync>;

    /// Records every request and answers from a closure.
    pub struct RecordingTransport {
        requests: Mutex<Vec<OutboundRequest>>,
        responder: Responder,
    }

    impl RecordingTransport {
        pub fn new(
            responder: impl Fn(&OutboundRequest) -> Result<OutboundResponse, TransportError>
                + Send
                + Sync
                + 'static,
        ) -> Self {
            RecordingTransport {
                requests: Mutex::new(Vec::new()),
                responder: Box::new(responder),
            }
        }

        pub fn always(status: u16, body: &str) -> Self {
            let body = body.to_string();
            Self::new(move |_| Ok(respond(status, &body)))
        }

        pub fn requests(&self) -> Vec<OutboundRequest> {
            self.requests.lock().unwrap().clone()
        }

        pub fn requests_to(&self, prefix: &str) -> Vec<OutboundRequest> {
            self.requests()
                .into_iter()
                .filter(|r| r.url.starts_with(prefix))
                .collect()
        }
    }

    pub fn respond(status: u16, body: &str) -> OutboundResponse {
        OutboundResponse {
            status,
            location: None,
            body: body.to_string(),
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn post(
            &self,
            request: OutboundRequest,
        ) -> Result<OutboundResponse, TransportError> {
            let response = (self.responder)(&request);
            self.requests.lock().unwrap().push(request);
            response
        }
    }
}
