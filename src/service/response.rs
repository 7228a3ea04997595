use std::collections::HashMap;

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use hyper::header::{self, HeaderValue};
use hyper::{Body, Response, StatusCode, Uri};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tracing::error;

use crate::core::{GitError, Result};

pub const JSON: &str = "application/json";

fn with_body(status: StatusCode, content_type: &'static str, body: impl Into<Body>) -> Response<Body> {
    let mut response = Response::new(body.into());
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

/// Serialize `value` as the response body
pub fn json<T: Serialize>(status: StatusCode, value: &T) -> Response<Body> {
    match serde_json::to_vec(value) {
        Ok(body) => with_body(status, JSON, body),
        Err(e) => api_error(&GitError::Internal(format!("Failed to encode response: {}", e))),
    }
}

/// Message shown to clients; internal details stay in the log
fn public_message(err: &GitError) -> String {
    if err.is_internal() {
        error!(error = %err, "request failed");
        "Internal Server Error".to_string()
    } else {
        err.to_string()
    }
}

/// JSON error envelope used by the API
pub fn api_error(err: &GitError) -> Response<Body> {
    let body = json!({
        "success": false,
        "message": public_message(err),
        "errors": [],
        "data": null,
    });
    let status = err.status_code();
    match serde_json::to_vec(&body) {
        Ok(body) => with_body(status, JSON, body),
        Err(_) => with_body(status, "text/plain", "Internal Server Error"),
    }
}

/// Plain-text error for git clients, which print the body to the user
pub fn git_error(err: &GitError) -> Response<Body> {
    let mut response = with_body(err.status_code(), "text/plain", public_message(err));
    if matches!(err, GitError::Unauthenticated(_)) {
        response.headers_mut().insert(
            header::WWW_AUTHENTICATE,
            HeaderValue::from_static("Basic realm=\"Git Server\""),
        );
    }
    response
}

pub fn not_found() -> GitError {
    GitError::not_found("Not found")
}

/// Header value built from runtime data
pub fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| GitError::Internal(format!("Invalid header value {:?}: {}", value, e)))
}

/// Add the CORS headers configured for the API
pub fn with_cors(mut response: Response<Body>, origin: &HeaderValue) -> Response<Body> {
    let headers = response.headers_mut();
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
    headers.insert(header::ACCESS_CONTROL_ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
    response
}

pub fn preflight(origin: &HeaderValue) -> Response<Body> {
    let mut response = with_cors(with_body(StatusCode::NO_CONTENT, "text/plain", Body::empty()), origin);
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, PUT, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Authorization, Content-Type"),
    );
    response
}

/// Collect a request body, failing once it grows past `limit` bytes
pub async fn read_body(mut body: Body, limit: usize) -> Result<Bytes> {
    let mut buf = BytesMut::new();
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        if buf.len() + chunk.len() > limit {
            return Err(GitError::invalid(format!("Request body exceeds {} bytes", limit)));
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf.freeze())
}

pub async fn read_json<T: DeserializeOwned>(body: Body, limit: usize) -> Result<T> {
    let bytes = read_body(body, limit).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Decoded query string; later duplicates win
pub fn query_params(uri: &Uri) -> HashMap<String, String> {
    uri.query()
        .map(|query| url::form_urlencoded::parse(query.as_bytes()).into_owned().collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn error_envelope_shape() {
        let response = api_error(&GitError::not_found("Branch not found: dev"));
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["message"], "Branch not found: dev");
        assert_eq!(value["errors"], serde_json::json!([]));
        assert!(value["data"].is_null());
    }

    #[tokio::test]
    async fn internal_details_are_hidden() {
        let response = api_error(&GitError::ObjectDatabase("corrupt pack at /srv/x".into()));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        assert!(!String::from_utf8_lossy(&body).contains("/srv/x"));
    }

    #[test]
    fn git_401_carries_a_challenge() {
        let response = git_error(&GitError::Unauthenticated("Authentication required".into()));
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            "Basic realm=\"Git Server\""
        );
    }

    #[tokio::test]
    async fn body_limit_is_enforced() {
        assert_eq!(read_body(Body::from("abc"), 3).await.unwrap(), Bytes::from_static(b"abc"));
        assert!(matches!(
            read_body(Body::from("abcd"), 3).await,
            Err(GitError::InvalidArgument(_))
        ));
    }

    #[test]
    fn query_strings_are_decoded() {
        let uri: Uri = "/x?path=src%2Flib.rs&recursive=true".parse().unwrap();
        let params = query_params(&uri);
        assert_eq!(params["path"], "src/lib.rs");
        assert_eq!(params["recursive"], "true");
    }
}
