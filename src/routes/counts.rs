//! GET /api/v1/outcomes/counts[?applications=a,b]
//!
//! Reconciled outcome counts. Without a filter the caller's own applications
//! are counted.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Request, Response, StatusCode};
use serde::Deserialize;
use std::sync::Arc;

use super::{authenticate, json_response, respond};
use crate::server::AppState;
use crate::types::{GateError, Result};

#[derive(Debug, Default, Deserialize)]
struct CountsQuery {
    applications: Option<String>,
}

pub async fn handle_counts<B>(req: Request<B>, state: Arc<AppState>) -> Response<Full<Bytes>> {
    respond(counts(req, state).await)
}

async fn counts<B>(req: Request<B>, state: Arc<AppState>) -> Result<Response<Full<Bytes>>> {
    let caller = authenticate(&req, &state.jwt)?;

    let query: CountsQuery = match req.uri().query() {
        Some(q) => serde_urlencoded::from_str(q)
            .map_err(|e| GateError::BadRequest(format!("invalid query: {}", e)))?,
        None => CountsQuery::default(),
    };

    let applications = query.applications.map(|list| {
        list.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
    });

    let counts = state.slots.counts(&caller, applications).await?;
    Ok(json_response(StatusCode::OK, &counts))
}
