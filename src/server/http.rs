//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo; one task per connection.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::auth::{AccessPolicy, JwtValidator};
use crate::clock::Clock;
use crate::config::Args;
use crate::db::MongoClient;
use crate::logging::AuditLogger;
use crate::outcomes::{Reconciler, SlotService};
use crate::routes::{self, access::DOCUMENTS_PREFIX, slots::SLOTS_PREFIX};
use crate::services::BlobStore;
use crate::signing::TokenService;
use crate::store::Stores;
use crate::types::{GateError, Result};

type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

/// Which backend the stores run on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    MongoDb,
    Memory,
}

impl StorageBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            StorageBackend::MongoDb => "mongodb",
            StorageBackend::Memory => "memory",
        }
    }
}

/// Shared application state
pub struct AppState {
    pub args: Args,
    pub mongo: Option<MongoClient>,
    pub backend: StorageBackend,
    pub stores: Stores,
    /// Owner-or-reviewer check, shared by issuance and byte serving
    pub policy: Arc<AccessPolicy>,
    pub tokens: Arc<TokenService>,
    pub slots: Arc<SlotService>,
    pub reconciler: Arc<Reconciler>,
    pub blobs: Arc<dyn BlobStore>,
    /// Identity provider token verification
    pub jwt: JwtValidator,
    pub audit: AuditLogger,
    pub clock: Arc<dyn Clock>,
    pub started_at: Instant,
}

impl AppState {
    /// Wire the services over a set of stores.
    ///
    /// Fails on configuration errors (signing secret, TTL, JWT secret).
    pub async fn build(
        args: Args,
        mongo: Option<MongoClient>,
        stores: Stores,
        blobs: Arc<dyn BlobStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let backend = if mongo.is_some() {
            StorageBackend::MongoDb
        } else {
            StorageBackend::Memory
        };

        let audit = AuditLogger::new(args.node_id.to_string());
        if let Some(ref path) = args.audit_log_path {
            if let Err(e) = audit.init_file(path.clone()).await {
                warn!("Audit log file unavailable ({}), continuing without: {}", path.display(), e);
            }
        }

        let jwt = match (&args.jwt_secret, args.dev_mode) {
            (Some(secret), _) => JwtValidator::new(secret.clone(), args.jwt_expiry_seconds)?,
            (None, true) => {
                warn!("JWT_SECRET not set, using the development secret");
                JwtValidator::new_dev()
            }
            (None, false) => {
                return Err(GateError::Config(
                    "JWT_SECRET is required in production mode".into(),
                ))
            }
        };

        let policy = Arc::new(AccessPolicy::new(
            stores.uploads.clone(),
            stores.applications.clone(),
            stores.roles.clone(),
        ));

        let tokens = Arc::new(TokenService::new(
            args.signing_key()?,
            clock.clone(),
            args.access_token_ttl(),
            &args.public_url,
            policy.clone(),
            audit.clone(),
        )?);

        let reconciler = Arc::new(Reconciler::new(
            stores.legacy_outcomes.clone(),
            stores.outcomes.clone(),
        ));

        let slots = Arc::new(SlotService::new(
            stores.applications.clone(),
            stores.uploads.clone(),
            stores.outcomes.clone(),
            reconciler.clone(),
            policy.clone(),
            clock.clone(),
            audit.clone(),
        ));

        Ok(Self {
            args,
            mongo,
            backend,
            stores,
            policy,
            tokens,
            slots,
            reconciler,
            blobs,
            jwt,
            audit,
            clock,
            started_at: Instant::now(),
        })
    }
}

/// Bind the configured address and serve forever
pub async fn run(state: Arc<AppState>) -> Result<()> {
    let listener = TcpListener::bind(state.args.listen).await?;

    info!(
        "evidence-gate listening on {} as node {}",
        state.args.listen, state.args.node_id
    );
    if state.args.dev_mode {
        warn!("Development mode enabled - in-memory fallbacks active");
    }

    serve(listener, state).await
}

/// Accept loop over an already-bound listener
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    info!(
        storage = state.backend.as_str(),
        ttl_secs = state.tokens.ttl().as_secs(),
        "accepting connections"
    );

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new()
                        .serve_connection(io, service)
                        .await
                    {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Route incoming HTTP requests
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> std::result::Result<Response<BoxBody>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    // Signed references carry the grant in the query; keep it out of the logs
    if path.starts_with("/files/") {
        debug!("[{}] {} /files/...", addr, method);
    } else {
        debug!("[{}] {} {}", addr, method, path);
    }

    let timeout = state.args.request_timeout();
    let routed = tokio::time::timeout(timeout, route(state, req, method, path.as_str())).await;

    let response = match routed {
        Ok(response) => response,
        Err(_) => {
            warn!(path = %path, timeout_ms = timeout.as_millis() as u64, "request timed out");
            routes::error_response(&GateError::Upstream("request timed out".into()))
        }
    };

    Ok(to_boxed(response))
}

async fn route(
    state: Arc<AppState>,
    req: Request<Incoming>,
    method: Method,
    path: &str,
) -> Response<Full<Bytes>> {
    match (method, path) {
        // Liveness probe
        (Method::GET, "/health") | (Method::GET, "/healthz") => routes::health_check(state),

        // CORS preflight
        (Method::OPTIONS, _) => routes::preflight_response(),

        // Signed document bytes
        (Method::GET, p) if p.starts_with("/files/") => {
            routes::handle_file_request(req, state).await
        }

        // Access URL issuance
        (Method::POST, p) if p.starts_with(DOCUMENTS_PREFIX) => {
            routes::handle_issue_access(req, state).await
        }

        // Slot transitions and history
        (_, p) if p.starts_with(SLOTS_PREFIX) => routes::handle_slot_request(req, state).await,

        // Reconciled counts
        (Method::GET, "/api/v1/outcomes/counts") => routes::handle_counts(req, state).await,

        (_, p) => routes::not_found_response(p),
    }
}

/// Convert a Full<Bytes> body to BoxBody
fn to_boxed(response: Response<Full<Bytes>>) -> Response<BoxBody> {
    response.map(|body| body.map_err(|never| match never {}).boxed())
}
