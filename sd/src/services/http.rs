//! RemoteService trait and its HTTP implementation

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use tracing::debug;

use crate::error::FetchError;

use super::config::ServicesConfig;
use super::response::{ServiceResponse, ServiceResult};

/// An opaque remote collaborator answering with the service envelope
#[async_trait]
pub trait RemoteService: Send + Sync {
    /// Read a resource
    async fn fetch(&self, path: &str, query: &[(String, String)]) -> ServiceResult;

    /// Write to a resource
    async fn submit(&self, path: &str, body: &Value) -> ServiceResult;
}

/// JSON-over-HTTP remote service
#[derive(Debug, Clone)]
pub struct HttpService {
    http: Client,
    base_url: String,
    timeout: Duration,
}

impl HttpService {
    pub fn from_config(config: &ServicesConfig) -> Result<Self, FetchError> {
        debug!(base_url = %config.base_url, "HttpService::from_config: called");
        let timeout = config.timeout();
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn send(&self, request: RequestBuilder) -> ServiceResult {
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout(self.timeout)
            } else {
                FetchError::from(e)
            }
        })?;

        let status = response.status();
        let text = response.text().await?;
        debug!(status = status.as_u16(), bytes = text.len(), "HttpService: response received");

        if !status.is_success() {
            // Prefer the envelope's error over the raw body
            let message = serde_json::from_str::<ServiceResponse>(&text)
                .ok()
                .and_then(|envelope| envelope.error_message())
                .unwrap_or(text);
            return Err(FetchError::Http {
                status: status.as_u16(),
                message,
            });
        }

        let envelope: ServiceResponse = serde_json::from_str(&text)?;
        envelope.into_result()
    }
}

#[async_trait]
impl RemoteService for HttpService {
    async fn fetch(&self, path: &str, query: &[(String, String)]) -> ServiceResult {
        let url = self.url(path);
        debug!(%url, ?query, "HttpService::fetch: called");
        self.send(self.http.get(&url).query(query)).await
    }

    async fn submit(&self, path: &str, body: &Value) -> ServiceResult {
        let url = self.url(path);
        debug!(%url, "HttpService::submit: called");
        self.send(self.http.post(&url).json(body)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Answer one HTTP request with a fixed status and body, returning the request head
    async fn serve_once(status: &'static str, body: String) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}/api", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = read_request(&mut socket).await;
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            request
        });
        (base_url, handle)
    }

    /// Read the head plus a Content-Length body so closing never resets the client
    async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf).to_string();
            if let Some(head_end) = text.find("\r\n\r\n") {
                let content_length = text[..head_end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if buf.len() >= head_end + 4 + content_length {
                    return text;
                }
            }
        }
        String::from_utf8_lossy(&buf).to_string()
    }

    fn service(base_url: &str) -> HttpService {
        HttpService::from_config(&ServicesConfig {
            base_url: base_url.to_string(),
            timeout_ms: 5_000,
        })
        .unwrap()
    }

    #[test]
    fn test_url_joining() {
        let svc = service("http://localhost:3000/api/");
        assert_eq!(svc.base_url(), "http://localhost:3000/api");
        assert_eq!(svc.url("/fleet"), "http://localhost:3000/api/fleet");
        assert_eq!(svc.url("quotes/Q1"), "http://localhost:3000/api/quotes/Q1");
    }

    #[tokio::test]
    async fn test_fetch_success_envelope() {
        let body = json!({"success": true, "data": [{"id": "truck-1"}]}).to_string();
        let (base_url, server) = serve_once("200 OK", body).await;

        let result = service(&base_url)
            .fetch("fleet", &[("region".to_string(), "north".to_string())])
            .await;

        assert_eq!(result, Ok(json!([{"id": "truck-1"}])));
        let request = server.await.unwrap();
        assert!(request.starts_with("GET /api/fleet?region=north"));
    }

    #[tokio::test]
    async fn test_service_failure_is_not_an_http_error() {
        let body = json!({"success": false, "error": "quote expired"}).to_string();
        let (base_url, server) = serve_once("200 OK", body).await;

        let result = service(&base_url).submit("quotes", &json!({"id": "Q1"})).await;

        assert_eq!(result, Err(FetchError::Service("quote expired".to_string())));
        assert!(server.await.unwrap().starts_with("POST /api/quotes"));
    }

    #[tokio::test]
    async fn test_http_status_uses_envelope_message() {
        let body = json!({"success": false, "error": {"message": "maintenance"}}).to_string();
        let (base_url, _server) = serve_once("503 Service Unavailable", body).await;

        let result = service(&base_url).fetch("fleet", &[]).await;

        assert_eq!(
            result,
            Err(FetchError::Http {
                status: 503,
                message: "maintenance".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_undecodable_body() {
        let (base_url, _server) = serve_once("200 OK", "<html>".to_string()).await;
        let result = service(&base_url).fetch("fleet", &[]).await;
        assert!(matches!(result, Err(FetchError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}/api", listener.local_addr().unwrap());
        drop(listener);

        let result = service(&base_url).fetch("fleet", &[]).await;
        assert!(matches!(result, Err(FetchError::Network(_))));
    }
}
