//! GET /files/{documentId}?exp=&sub=&sig=
//!
//! Serves document bytes for a signed reference. The reference is checked,
//! then the embedded subject's access is re-evaluated against current
//! ownership and roles before anything is read from storage.
//!
//! Status codes: 200 with the bytes; 404 for an unknown document; 403 for a
//! forged, malformed or expired reference and for a subject who lost access.
//! Expired references answer 410 instead when `EXPIRED_AS_GONE` is set. The
//! body for expired and forged references is identical either way.

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{self, HeaderValue};
use hyper::{Request, Response, StatusCode};
use std::sync::Arc;
use tracing::{debug, warn};

use super::error_response_with_status;
use crate::logging::AuditEventType;
use crate::server::AppState;
use crate::types::{GateError, Result};

pub async fn handle_file_request<B>(req: Request<B>, state: Arc<AppState>) -> Response<Full<Bytes>> {
    let reference = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    drop(req);

    match serve_file(&reference, &state).await {
        Ok(response) => response,
        Err(e) => {
            let status = match e {
                GateError::Expired if state.args.expired_as_gone => StatusCode::GONE,
                _ => e.status_code(),
            };
            error_response_with_status(&e, status)
        }
    }
}

async fn serve_file(reference: &str, state: &AppState) -> Result<Response<Full<Bytes>>> {
    let (grant, context) = state.tokens.redeem(reference).await?;

    let data = match state.blobs.get(&context.upload.blob_ref).await {
        Ok(data) => data,
        Err(e) => {
            warn!(
                document = %grant.document_id,
                blob = %context.upload.blob_ref,
                error = %e,
                "blob fetch failed"
            );
            return Err(e);
        }
    };

    debug!(
        document = %grant.document_id,
        subject = %grant.subject_id,
        size = data.len(),
        "serving document"
    );
    state
        .audit
        .log(
            state
                .audit
                .event(AuditEventType::DocumentServed)
                .at(state.clock.now())
                .with_subject(&grant.subject_id)
                .with_document(&grant.document_id)
                .with_slot(&context.upload.slot),
        )
        .await;

    let mut response = Response::new(Full::new(data));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&context.upload.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    if let Ok(disposition) = HeaderValue::from_str(&format!(
        "inline; filename=\"{}\"",
        context.upload.original_filename.replace('"', "")
    )) {
        headers.insert(header::CONTENT_DISPOSITION, disposition);
    }
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("private, no-store"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    Ok(response)
}
