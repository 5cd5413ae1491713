use http_body_util::{BodyExt, Full};
use hyper::Request;
use hyper::body::Bytes;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use log::{debug, trace};
use std::time::Duration;

use crate::codec::Frame;
use crate::error::{MetricsError, Result};

const BATCH_PATH: &str = "/updates/";

/// Normalize `host:port` or a full URL into a base URL without trailing slash
pub fn base_url(address: &str) -> String {
    let address = address.trim().trim_end_matches('/');
    if address.starts_with("http://") || address.starts_with("https://") {
        address.to_string()
    } else {
        format!("http://{}", address)
    }
}

/// HTTP client posting framed snapshots to the collector
#[derive(Clone)]
pub struct MetricsClient {
    client: Client<HttpConnector, Full<Bytes>>,
    url: String,
    timeout: Duration,
}

impl MetricsClient {
    pub fn new(address: &str, timeout: Duration) -> Self {
        Self {
            client: Client::builder(TokioExecutor::new()).build_http(),
            url: format!("{}{}", base_url(address), BATCH_PATH),
            timeout,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// POST a frame to the batch endpoint
    ///
    /// Connection failures and timeouts map to transient errors, non-2xx
    /// answers to [`MetricsError::Status`].
    pub async fn send(&self, frame: &Frame) -> Result<()> {
        let mut builder = Request::builder().method("POST").uri(&self.url);
        for (name, value) in frame.headers() {
            builder = builder.header(name, value);
        }
        let request = builder
            .body(Full::new(Bytes::from(frame.body.clone())))
            .map_err(|e| MetricsError::Validation(format!("Failed to build request: {}", e)))?;

        trace!("POST {} ({} bytes)", self.url, frame.body.len());

        let response = tokio::time::timeout(self.timeout, self.client.request(request))
            .await
            .map_err(|_| MetricsError::Timeout(format!("no response within {:?}", self.timeout)))?
            .map_err(|e| MetricsError::Transport(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| MetricsError::Transport(format!("Failed to read response: {}", e)))?
            .to_bytes();

        if !status.is_success() {
            return Err(MetricsError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).trim().to_string(),
            });
        }

        debug!("Delivered snapshot to {} ({})", self.url, status);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;

    type Seen = Arc<Mutex<Vec<(HeaderMap, Bytes)>>>;

    async fn serve(status: StatusCode) -> (String, Seen) {
        let seen: Seen = Arc::default();
        let recorder = Arc::clone(&seen);
        let app = Router::new().route(
            "/updates/",
            post(move |headers: HeaderMap, body: Bytes| {
                let recorder = Arc::clone(&recorder);
                async move {
                    recorder.lock().unwrap().push((headers, body));
                    (status, "answer")
                }
            }),
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        (addr.to_string(), seen)
    }

    fn frame() -> Frame {
        Frame {
            body: b"[]".to_vec(),
            content_encoding: Some("gzip"),
            hash: Some("abcd".to_string()),
        }
    }

    #[test]
    fn test_base_url() {
        assert_eq!(base_url("localhost:8080"), "http://localhost:8080");
        assert_eq!(base_url("http://collector:1/"), "http://collector:1");
    }

    #[tokio::test]
    async fn test_send_carries_frame_headers() {
        let (addr, seen) = serve(StatusCode::OK).await;
        let client = MetricsClient::new(&addr, Duration::from_secs(5));

        client.send(&frame()).await.unwrap();

        let seen = seen.lock().unwrap();
        let (headers, body) = &seen[0];
        assert_eq!(body.as_ref(), b"[]");
        assert_eq!(headers["content-type"], "application/json");
        assert_eq!(headers["content-encoding"], "gzip");
        assert_eq!(headers["hashsha256"], "abcd");
    }

    #[tokio::test]
    async fn test_error_status() {
        let (addr, _) = serve(StatusCode::SERVICE_UNAVAILABLE).await;
        let client = MetricsClient::new(&addr, Duration::from_secs(5));

        let err = client.send(&frame()).await.unwrap_err();
        assert!(matches!(err, MetricsError::Status { status: 503, ref body } if body == "answer"));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_connection_refused_is_transient() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let client = MetricsClient::new(&addr, Duration::from_secs(5));
        let err = client.send(&frame()).await.unwrap_err();
        assert!(err.is_transient(), "{}", err);
    }
}
