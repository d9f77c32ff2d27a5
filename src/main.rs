//! evidence-gate - signed document URLs and review outcome tracking

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use evidence_gate::{
    clock::SystemClock,
    config::{Args, LogFormat},
    db::MongoClient,
    server::{self, AppState},
    services::{BlobStore, HttpBlobStore, MemoryBlobStore},
    store::{MemoryStores, Stores},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    // Initialize tracing/logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("evidence_gate={},info", args.log_level).into());
    match args.log_format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  evidence-gate");
    info!("======================================");
    info!("Node ID: {}", args.node_id);
    info!("Listen: {}", args.listen);
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("Public URL: {}", args.public_url);
    info!("Access token TTL: {}s", args.access_token_ttl_seconds);
    info!("MongoDB: {}", args.mongodb_uri);
    info!("======================================");

    // Connect to MongoDB (optional in dev mode)
    let mongo = match MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await {
        Ok(client) => {
            info!("MongoDB connected successfully");
            Some(client)
        }
        Err(e) => {
            if args.dev_mode {
                warn!("MongoDB connection failed (dev mode, using in-memory stores): {}", e);
                None
            } else {
                error!("MongoDB connection failed: {}", e);
                std::process::exit(1);
            }
        }
    };

    let stores = match mongo {
        Some(ref client) => Stores::mongo(client).await?,
        None => MemoryStores::new().stores(),
    };

    let blobs: Arc<dyn BlobStore> = match args.storage_url {
        Some(ref url) => {
            info!("Blob storage: {}", url);
            Arc::new(HttpBlobStore::new(url, args.request_timeout()))
        }
        None => {
            warn!("STORAGE_URL not set (dev mode), serving blobs from memory");
            Arc::new(MemoryBlobStore::new())
        }
    };

    let state = match AppState::build(args, mongo, stores, blobs, Arc::new(SystemClock)).await {
        Ok(state) => Arc::new(state),
        Err(e) => {
            error!("Startup failed: {}", e);
            std::process::exit(1);
        }
    };

    server::run(state).await?;

    Ok(())
}
