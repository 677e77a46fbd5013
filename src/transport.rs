use std::collections::BTreeMap;
use std::thread;
use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::Settings;
use crate::error::PennsieveError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }

    /// POST is never replayed after a transient failure.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Method::Post)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub host: Option<String>,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            host: None,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Post, path).json(body)
    }

    pub fn put(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Put, path).json(body)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn host(mut self, host: Option<&str>) -> Self {
        self.host = host.map(|value| value.to_string());
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

pub trait Transport: Send + Sync {
    fn send(&self, request: &ApiRequest) -> Result<Value, PennsieveError>;
}

#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    host: String,
    max_retries: usize,
    retry_delay: Duration,
}

const RETRY_DELAY: Duration = Duration::from_millis(500);

impl HttpTransport {
    pub fn new(
        host: &str,
        timeout: Duration,
        max_retries: usize,
        extra_headers: &BTreeMap<String, String>,
    ) -> Result<Self, PennsieveError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("pennsieve-client/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| PennsieveError::Config(err.to_string()))?,
        );
        for (name, value) in extra_headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|err| PennsieveError::Config(format!("header {name}: {err}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|err| PennsieveError::Config(err.to_string()))?;
            headers.insert(name, value);
        }
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| PennsieveError::Http(err.to_string()))?;
        Ok(Self {
            client,
            host: host.trim_end_matches('/').to_string(),
            max_retries,
            retry_delay: RETRY_DELAY,
        })
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, PennsieveError> {
        Self::new(
            &settings.api_host,
            Duration::from_secs(settings.max_request_time),
            settings.max_request_timeout_retries as usize,
            &settings.headers,
        )
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    fn url(&self, request: &ApiRequest) -> String {
        let host = request
            .host
            .as_deref()
            .map(|value| value.trim_end_matches('/'))
            .unwrap_or(&self.host);
        format!("{host}{}", request.path)
    }

    fn build(&self, request: &ApiRequest) -> RequestBuilder {
        let url = self.url(request);
        let mut builder = match request.method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
            Method::Put => self.client.put(&url),
            Method::Delete => self.client.delete(&url),
        };
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        builder
    }

    fn backoff(&self, attempt: usize) -> Duration {
        let factor = u32::try_from(attempt + 1).unwrap_or(u32::MAX);
        self.retry_delay.saturating_mul(factor)
    }

    fn send_with_retries(&self, request: &ApiRequest) -> Result<Response, PennsieveError> {
        let retries = if request.method.is_retryable() {
            self.max_retries
        } else {
            0
        };
        let mut attempt = 0usize;
        loop {
            match self.build(request).send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < retries && is_retryable_status(status) {
                        warn!(status, path = %request.path, "transient status, retrying");
                        thread::sleep(self.backoff(attempt));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < retries && is_retryable_error(&err) {
                        warn!(path = %request.path, "request failed, retrying: {err}");
                        thread::sleep(self.backoff(attempt));
                        attempt += 1;
                        continue;
                    }
                    return Err(PennsieveError::Http(err.to_string()));
                }
            }
        }
    }
}

impl Transport for HttpTransport {
    fn send(&self, request: &ApiRequest) -> Result<Value, PennsieveError> {
        debug!(method = request.method.as_str(), url = %self.url(request), "request");
        let response = self.send_with_retries(request)?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .map_err(|err| PennsieveError::Http(err.to_string()))?;
        handle_status(status, text)
    }
}

pub fn handle_status(status: u16, text: String) -> Result<Value, PennsieveError> {
    if matches!(status, 401 | 403) {
        return Err(PennsieveError::Unauthorized);
    }
    if !(200..300).contains(&status) {
        let message = if text.trim().is_empty() {
            "Pennsieve request failed".to_string()
        } else {
            text
        };
        return Err(PennsieveError::Api { status, message });
    }
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    #[test]
    fn unauthorized_statuses() {
        assert_matches!(
            handle_status(401, String::new()),
            Err(PennsieveError::Unauthorized)
        );
        assert_matches!(
            handle_status(403, "nope".to_string()),
            Err(PennsieveError::Unauthorized)
        );
    }

    #[test]
    fn error_status_keeps_body() {
        let err = handle_status(404, "{\"message\":\"missing\"}".to_string()).unwrap_err();
        assert_matches!(err, PennsieveError::Api { status: 404, ref message } if message.contains("missing"));
    }

    #[test]
    fn body_parsing() {
        assert_eq!(handle_status(200, String::new()).unwrap(), Value::Null);
        assert_eq!(
            handle_status(201, "{\"id\":1}".to_string()).unwrap(),
            json!({"id": 1})
        );
        assert_eq!(
            handle_status(200, "plain".to_string()).unwrap(),
            json!("plain")
        );
    }

    #[test]
    fn post_is_never_retried() {
        assert!(!Method::Post.is_retryable());
        assert!(Method::Get.is_retryable());
        assert!(Method::Put.is_retryable());
        assert!(is_retryable_status(503));
        assert!(!is_retryable_status(429));
    }

    #[test]
    fn backoff_grows_linearly_without_overflow() {
        let transport = HttpTransport::new("http://localhost", Duration::from_secs(1), 100, &BTreeMap::new())
            .unwrap()
            .with_retry_delay(Duration::from_millis(10));
        assert_eq!(transport.backoff(0), Duration::from_millis(10));
        assert_eq!(transport.backoff(2), Duration::from_millis(30));
        assert_eq!(transport.backoff(99), Duration::from_millis(1000));
        assert!(transport.backoff(usize::MAX) >= Duration::from_secs(1));
    }
}
