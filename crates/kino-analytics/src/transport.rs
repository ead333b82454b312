//! HTTP transport for hit delivery

use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::trace;
use url::Url;

/// Header carrying the collection validation token
pub const VALIDATION_TOKEN_HEADER: &str = "X-Adobe-AEP-Validation-Token";

/// A single hit delivery request
#[derive(Debug, Clone, PartialEq)]
pub struct HitRequest {
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: serde_json::Value,
}

/// What the sender needs back from a delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HitResponse {
    pub status: u16,
    /// `Location` header of the response
    pub location: Option<String>,
}

impl HitResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Posts hit requests to the collection server
#[async_trait]
pub trait HitTransport: Send + Sync {
    async fn post(&self, request: HitRequest) -> Result<HitResponse>;
}

/// `reqwest` backed transport
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Create a transport with the same connect and read timeout
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HitTransport for ReqwestTransport {
    async fn post(&self, request: HitRequest) -> Result<HitResponse> {
        trace!(url = %request.url, "Posting hit");

        let body = serde_json::to_vec(&request.body)?;
        let mut builder = self.client.post(request.url).body(body);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await?;
        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);

        Ok(HitResponse {
            status: response.status().as_u16(),
            location,
        })
    }
}

fn server_base(server: &str) -> Result<Url> {
    let base = if server.contains("://") {
        server.trim_end_matches('/').to_string()
    } else {
        format!("https://{}", server.trim_end_matches('/'))
    };
    Url::parse(&base).map_err(Error::from)
}

/// URL for the session start request
pub fn session_start_url(server: &str) -> Result<Url> {
    let base = server_base(server)?;
    Ok(base.join("/api/v1/sessions")?)
}

/// URL for hits of an established backend session
pub fn session_events_url(server: &str, backend_session_id: &str) -> Result<Url> {
    let base = server_base(server)?;
    Ok(base.join(&format!("/api/v1/sessions/{backend_session_id}/events"))?)
}

/// Request headers for a delivery
pub fn request_headers(validation_token: Option<&str>) -> Vec<(String, String)> {
    let mut headers = vec![("Content-Type".to_string(), "application/json".to_string())];
    if let Some(token) = validation_token.filter(|t| !t.is_empty()) {
        headers.push((VALIDATION_TOKEN_HEADER.to_string(), token.to_string()));
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_urls() {
        assert_eq!(
            session_start_url("collection.example.com").unwrap().as_str(),
            "https://collection.example.com/api/v1/sessions"
        );
        assert_eq!(
            session_events_url("http://127.0.0.1:8080/", "abc").unwrap().as_str(),
            "http://127.0.0.1:8080/api/v1/sessions/abc/events"
        );
        assert!(session_start_url("").is_err());
    }

    #[test]
    fn test_request_headers() {
        assert_eq!(request_headers(None).len(), 1);
        let headers = request_headers(Some("token"));
        assert_eq!(headers[1], (VALIDATION_TOKEN_HEADER.to_string(), "token".to_string()));
        assert_eq!(request_headers(Some("")).len(), 1);
    }

    #[test]
    fn test_response_success_range() {
        let response = |status| HitResponse { status, location: None };
        assert!(response(201).is_success());
        assert!(!response(302).is_success());
        assert!(!response(500).is_success());
    }
}
