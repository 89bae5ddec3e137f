//! # HTTP Transport
//!
//! [`HttpClient`] executes one request and returns the response body. Any
//! non-2xx status is a failure. The reqwest implementation applies a
//! per-request timeout and does not retry.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::ProtocolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub bearer_token: Option<String>,
    pub body: Option<Value>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            bearer_token: None,
            body: None,
        }
    }

    pub fn post_json(url: impl Into<String>, body: Value) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            bearer_token: None,
            body: Some(body),
        }
    }

    pub fn with_bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// Executes outbound HTTP requests.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, ProtocolError>;
}

/// [`HttpClient`] over `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new(timeout: Duration) -> Result<Self, ProtocolError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProtocolError::Http(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, ProtocolError> {
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
        };
        if let Some(token) = &request.bearer_token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let resp = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ProtocolError::Http(format!("request to {} timed out", request.url))
            } else {
                ProtocolError::Http(format!("request to {} failed: {e}", request.url))
            }
        })?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| ProtocolError::Http(format!("failed to read response body: {e}")))?;

        if !status.is_success() {
            tracing::debug!(url = %request.url, status = status.as_u16(), "non-success HTTP status");
            return Err(ProtocolError::Http(format!(
                "HTTP {} from {}: {}",
                status.as_u16(),
                request.url,
                body
            )));
        }

        Ok(HttpResponse {
            status: status.as_u16(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn posts_json_with_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/credentials"))
            .and(header("authorization", "Bearer tok"))
            .and(body_json(json!({"holderPid": "h1"})))
            .respond_with(ResponseTemplate::new(201).set_body_string("issuer-pid-1"))
            .expect(1)
            .mount(&server)
            .await;

        let client = ReqwestHttpClient::new(Duration::from_secs(5)).unwrap();
        let resp = client
            .execute(
                HttpRequest::post_json(format!("{}/api/credentials", server.uri()), json!({"holderPid": "h1"}))
                    .with_bearer("tok"),
            )
            .await
            .unwrap();
        assert_eq!(resp.status, 201);
        assert_eq!(resp.body, "issuer-pid-1");
    }

    #[tokio::test]
    async fn non_success_status_is_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_string("nope"))
            .mount(&server)
            .await;

        let client = ReqwestHttpClient::new(Duration::from_secs(5)).unwrap();
        let err = client
            .execute(HttpRequest::get(format!("{}/missing", server.uri())))
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Http(_)));
        assert!(err.to_string().starts_with("HTTP 404"));
        assert!(err.to_string().ends_with("nope"));
    }

    #[test]
    fn response_json_decoding() {
        let resp = HttpResponse::ok(r#"{"status":"ISSUED"}"#);
        let v: Value = resp.json().unwrap();
        assert_eq!(v["status"], "ISSUED");
        assert!(HttpResponse::ok("not json").json::<Value>().is_err());
    }
}
