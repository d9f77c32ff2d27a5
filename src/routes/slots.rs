//! Slot routes
//!
//! - POST /api/v1/slots/{applicationId}/{documentTypeId}/uploads
//! - POST /api/v1/slots/{applicationId}/{documentTypeId}/outcomes
//! - POST /api/v1/slots/{applicationId}/{documentTypeId}/verify
//! - GET  /api/v1/slots/{applicationId}/{documentTypeId}/history

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Method, Request, Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;

use super::{
    authenticate, json_response, method_not_allowed_response, parse_json_body, path_segments,
    respond,
};
use crate::model::{DocumentUpload, OutcomeDraft, SlotId};
use crate::outcomes::{NewUpload, SourcedRecord};
use crate::server::AppState;
use crate::types::{GateError, Result};

pub const SLOTS_PREFIX: &str = "/api/v1/slots/";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SlotHistoryResponse {
    slot: SlotId,
    /// Merged records, each tagged with its `source` store
    records: Vec<SourcedRecord>,
    uploads: Vec<DocumentUpload>,
}

pub async fn handle_slot_request<B>(req: Request<B>, state: Arc<AppState>) -> Response<Full<Bytes>>
where
    B: hyper::body::Body,
    B::Error: std::fmt::Display,
{
    respond(route(req, state).await)
}

async fn route<B>(req: Request<B>, state: Arc<AppState>) -> Result<Response<Full<Bytes>>>
where
    B: hyper::body::Body,
    B::Error: std::fmt::Display,
{
    let segments = path_segments(req.uri().path(), SLOTS_PREFIX)?;
    let (slot, action) = match segments.as_slice() {
        [application_id, document_type_id, action] => (
            SlotId::new(application_id.as_str(), document_type_id.as_str()),
            action.clone(),
        ),
        _ => return Err(GateError::NotFound(req.uri().path().to_string())),
    };

    let caller = authenticate(&req, &state.jwt)?;
    let method = req.method().clone();

    match (method, action.as_str()) {
        (Method::POST, "uploads") => {
            let upload: NewUpload = parse_json_body(req).await?;
            let receipt = state.slots.register_upload(&caller, &slot, upload).await?;
            Ok(json_response(StatusCode::CREATED, &receipt))
        }
        (Method::POST, "outcomes") => {
            let draft: OutcomeDraft = parse_json_body(req).await?;
            let record = state.slots.record_outcome(&caller, &slot, draft).await?;
            Ok(json_response(StatusCode::CREATED, &record))
        }
        (Method::POST, "verify") => {
            let upload = state.slots.verify_upload(&caller, &slot).await?;
            Ok(json_response(StatusCode::OK, &upload))
        }
        (Method::GET, "history") => {
            let records = state.slots.history(&caller, &slot).await?;
            let uploads = state.slots.uploads(&caller, &slot).await?;
            Ok(json_response(
                StatusCode::OK,
                &SlotHistoryResponse {
                    slot,
                    records,
                    uploads,
                },
            ))
        }
        (_, "uploads" | "outcomes" | "verify" | "history") => Ok(method_not_allowed_response()),
        _ => Err(GateError::NotFound(format!("slot action {}", action))),
    }
}
