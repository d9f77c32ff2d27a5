//! HTTP routes for evidence-gate
//!
//! Handlers return `Response<Full<Bytes>>`; the server boxes them.

pub mod access;
pub mod counts;
pub mod files;
pub mod health;
pub mod slots;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::{self, HeaderValue};
use hyper::{Request, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{error, warn};

use crate::auth::{extract_token_from_header, Caller, JwtValidator};
use crate::types::{GateError, Result};

pub use access::handle_issue_access;
pub use counts::handle_counts;
pub use files::handle_file_request;
pub use health::health_check;
pub use slots::handle_slot_request;

/// Largest JSON body accepted
pub const MAX_BODY_BYTES: usize = 64 * 1024;

// =============================================================================
// Response Helpers
// =============================================================================

fn cors(response: &mut Response<Full<Bytes>>) {
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type, Authorization"),
    );
}

pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let json = serde_json::to_vec(body).unwrap_or_else(|_| b"{}".to_vec());

    let mut response = Response::new(Full::new(Bytes::from(json)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    cors(&mut response);
    response
}

/// JSON error body. Only the public message leaves the process.
pub fn error_response(err: &GateError) -> Response<Full<Bytes>> {
    error_response_with_status(err, err.status_code())
}

pub fn error_response_with_status(err: &GateError, status: StatusCode) -> Response<Full<Bytes>> {
    match err {
        GateError::IntegrityViolation(_) => error!(error = %err, "integrity violation"),
        GateError::Database(_) | GateError::Internal(_) | GateError::Config(_) => {
            error!(error = %err, "request failed")
        }
        GateError::Upstream(_) => warn!(error = %err, "upstream failure"),
        _ => {}
    }

    let body = serde_json::json!({
        "error": err.public_message(),
        "code": err.code(),
    });
    json_response(status, &body)
}

pub fn not_found_response(path: &str) -> Response<Full<Bytes>> {
    let body = serde_json::json!({
        "error": "Not Found",
        "path": path,
    });
    json_response(StatusCode::NOT_FOUND, &body)
}

pub fn method_not_allowed_response() -> Response<Full<Bytes>> {
    let body = serde_json::json!({ "error": "Method Not Allowed" });
    json_response(StatusCode::METHOD_NOT_ALLOWED, &body)
}

/// CORS preflight response
pub fn preflight_response() -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = StatusCode::NO_CONTENT;
    cors(&mut response);
    response.headers_mut().insert(
        header::ACCESS_CONTROL_MAX_AGE,
        HeaderValue::from_static("86400"),
    );
    response
}

/// Collapse a handler result into a response
pub fn respond(result: Result<Response<Full<Bytes>>>) -> Response<Full<Bytes>> {
    result.unwrap_or_else(|e| error_response(&e))
}

// =============================================================================
// Request Helpers
// =============================================================================

/// Resolve the bearer JWT on a request to a caller
pub fn authenticate<B>(req: &Request<B>, jwt: &JwtValidator) -> Result<Caller> {
    let header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let token = extract_token_from_header(header)
        .ok_or_else(|| GateError::Unauthenticated("missing bearer token".into()))?;

    jwt.verify_token(token)
}

pub async fn parse_json_body<T, B>(req: Request<B>) -> Result<T>
where
    T: DeserializeOwned,
    B: hyper::body::Body,
    B::Error: std::fmt::Display,
{
    let body = req
        .into_body()
        .collect()
        .await
        .map_err(|e| GateError::BadRequest(format!("failed to read body: {}", e)))?
        .to_bytes();

    if body.len() > MAX_BODY_BYTES {
        return Err(GateError::BadRequest("request body too large".into()));
    }

    serde_json::from_slice(&body).map_err(|e| GateError::BadRequest(format!("invalid JSON: {}", e)))
}

/// Split a path below `prefix` into decoded segments
pub fn path_segments(path: &str, prefix: &str) -> Result<Vec<String>> {
    let rest = path
        .strip_prefix(prefix)
        .ok_or_else(|| GateError::NotFound(path.to_string()))?;

    rest.split('/')
        .filter(|s| !s.is_empty())
        .map(|s| {
            urlencoding::decode(s)
                .map(|d| d.into_owned())
                .map_err(|e| GateError::BadRequest(format!("bad path segment: {}", e)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_body_hides_token_failure_kind() {
        let expired = error_response(&GateError::Expired);
        let forged = error_response(&GateError::InvalidSignature("mac".into()));
        assert_eq!(expired.status(), forged.status());
        assert_eq!(expired.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_path_segments() {
        let segments = path_segments("/api/v1/slots/app%201/chest-xray/uploads", "/api/v1/slots/")
            .unwrap();
        assert_eq!(segments, vec!["app 1", "chest-xray", "uploads"]);
        assert!(path_segments("/other", "/api/v1/slots/").is_err());
    }

    #[test]
    fn test_authenticate_requires_bearer() {
        let jwt = JwtValidator::new_dev();
        let req = Request::builder().uri("/").body(()).unwrap();
        assert!(matches!(
            authenticate(&req, &jwt),
            Err(GateError::Unauthenticated(_))
        ));

        let token = jwt
            .generate_token("alice", &[crate::auth::Role::Applicant])
            .unwrap();
        let req = Request::builder()
            .uri("/")
            .header("Authorization", format!("Bearer {}", token))
            .body(())
            .unwrap();
        assert_eq!(authenticate(&req, &jwt).unwrap().subject_id, "alice");
    }
}
