//! POST /api/v1/documents/{documentId}/access
//!
//! Issues a short-lived signed URL for one document.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Request, Response, StatusCode};
use std::sync::Arc;

use super::{authenticate, json_response, path_segments, respond};
use crate::server::AppState;
use crate::types::{GateError, Result};

pub const DOCUMENTS_PREFIX: &str = "/api/v1/documents/";

pub async fn handle_issue_access<B>(req: Request<B>, state: Arc<AppState>) -> Response<Full<Bytes>> {
    respond(issue_access(req, state).await)
}

async fn issue_access<B>(req: Request<B>, state: Arc<AppState>) -> Result<Response<Full<Bytes>>> {
    let segments = path_segments(req.uri().path(), DOCUMENTS_PREFIX)?;
    let document_id = match segments.as_slice() {
        [document_id, action] if action == "access" => document_id.clone(),
        _ => return Err(GateError::NotFound(req.uri().path().to_string())),
    };

    let caller = authenticate(&req, &state.jwt)?;
    caller.require("issue_access_token")?;

    let token = state.tokens.issue(&caller, &document_id).await?;
    Ok(json_response(StatusCode::OK, &token))
}
