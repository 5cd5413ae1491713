//! Request and response middleware
//!
//! Body-rewriting layers buffer the whole body, transform it and hand a new
//! body on, dropping the stale `Content-Length`.

use axum::body::{Body, Bytes, HttpBody, to_bytes};
use axum::extract::{Request, State};
use axum::http::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderValue, Method, StatusCode, request::Parts};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use log::{info, warn};
use std::time::Instant;

use crate::codec::{HASH_HEADER, gzip};
use crate::server::AppState;

/// Largest request or response body buffered by the middleware
pub const MAX_BODY: usize = 16 * 1024 * 1024;

fn bad_request(message: &'static str) -> Response {
    (StatusCode::BAD_REQUEST, message).into_response()
}

async fn read_body(request: Request) -> Result<(Parts, Bytes), Response> {
    let (parts, body) = request.into_parts();
    match to_bytes(body, MAX_BODY).await {
        Ok(bytes) => Ok((parts, bytes)),
        Err(e) => {
            warn!("Failed to read request body: {}", e);
            Err(bad_request("Failed to read request body"))
        }
    }
}

fn rebuild(mut parts: Parts, body: impl Into<Body>) -> Request {
    parts.headers.remove(CONTENT_LENGTH);
    Request::from_parts(parts, body.into())
}

/// Log method, path, status, response size and latency
pub async fn log_request(request: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = request.method().clone();
    let uri = request.uri().clone();

    let response = next.run(request).await;

    let size = response
        .body()
        .size_hint()
        .exact()
        .map_or_else(|| "-".to_string(), |n| n.to_string());
    info!(
        "{} {} {} {} bytes {:?}",
        method,
        uri,
        response.status().as_u16(),
        size,
        started.elapsed()
    );
    response
}

/// RSA-decrypt POST bodies when a private key is configured
pub async fn decrypt(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if !state.decoder.decrypts() || request.method() != Method::POST {
        return next.run(request).await;
    }

    let (parts, body) = match read_body(request).await {
        Ok(read) => read,
        Err(response) => return response,
    };
    if body.is_empty() {
        return next.run(rebuild(parts, body)).await;
    }

    match state.decoder.decrypt(body.to_vec()) {
        Ok(plain) => next.run(rebuild(parts, plain)).await,
        Err(e) => {
            warn!("Decryption failed for {}: {}", parts.uri, e);
            bad_request("Decryption failed")
        }
    }
}

/// Check the `HashSHA256` header against the body when both sides have a key
pub async fn verify_integrity(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if !state.decoder.verifies() || request.method() != Method::POST {
        return next.run(request).await;
    }
    let Some(received) = request.headers().get(HASH_HEADER).cloned() else {
        return next.run(request).await;
    };
    let Ok(received) = received.to_str().map(str::to_string) else {
        return bad_request("The data is corrupted");
    };

    let (parts, body) = match read_body(request).await {
        Ok(read) => read,
        Err(response) => return response,
    };

    match state.decoder.verify(&body, Some(&received)) {
        Ok(()) => next.run(rebuild(parts, body)).await,
        Err(e) => {
            warn!("Integrity check failed for {}: {}", parts.uri, e);
            bad_request("The data is corrupted")
        }
    }
}

fn is_gzip(value: Option<&HeaderValue>) -> bool {
    value
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.split(',').any(|enc| enc.trim().eq_ignore_ascii_case("gzip")))
}

/// Inflate gzip request bodies, refusing any that inflate past [`MAX_BODY`]
pub async fn decompress(request: Request, next: Next) -> Response {
    if !is_gzip(request.headers().get(CONTENT_ENCODING)) {
        return next.run(request).await;
    }

    let (mut parts, body) = match read_body(request).await {
        Ok(read) => read,
        Err(response) => return response,
    };

    match gzip::decompress_limited(&body, MAX_BODY) {
        Ok(plain) => {
            parts.headers.remove(CONTENT_ENCODING);
            next.run(rebuild(parts, plain)).await
        }
        Err(e) => {
            warn!("Bad gzip body for {}: {}", parts.uri, e);
            bad_request("Failed to decompress request body")
        }
    }
}

fn compressible(response: &Response) -> bool {
    if response.headers().contains_key(CONTENT_ENCODING) {
        return false;
    }
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json") || ct.starts_with("text/html"))
}

/// Gzip JSON and HTML responses for clients that accept it
pub async fn compress_response(request: Request, next: Next) -> Response {
    let accepts_gzip = is_gzip(request.headers().get(ACCEPT_ENCODING));
    let response = next.run(request).await;
    if !accepts_gzip || !compressible(&response) {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match to_bytes(body, MAX_BODY).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Failed to read response body: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    match gzip::compress(&bytes) {
        Ok(packed) => {
            parts.headers.remove(CONTENT_LENGTH);
            parts
                .headers
                .insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
            Response::from_parts(parts, Body::from(packed))
        }
        Err(e) => {
            warn!("Response compression failed: {}", e);
            Response::from_parts(parts, Body::from(bytes))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_gzip() {
        assert!(is_gzip(Some(&HeaderValue::from_static("gzip"))));
        assert!(is_gzip(Some(&HeaderValue::from_static("deflate, GZIP"))));
        assert!(!is_gzip(Some(&HeaderValue::from_static("br"))));
        assert!(!is_gzip(None));
    }

    #[test]
    fn test_compressible_types() {
        let json = Response::builder()
            .header(CONTENT_TYPE, "application/json")
            .body(Body::empty())
            .unwrap();
        let html = Response::builder()
            .header(CONTENT_TYPE, "text/html; charset=utf-8")
            .body(Body::empty())
            .unwrap();
        let text = Response::builder()
            .header(CONTENT_TYPE, "text/plain")
            .body(Body::empty())
            .unwrap();

        assert!(compressible(&json));
        assert!(compressible(&html));
        assert!(!compressible(&text));
    }
}
