use anyhow::{Context, Result};
use std::{fs, io::ErrorKind, io::Read, path::Path, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod db;
mod errors;
mod gateway;
mod handlers;
mod models;
mod routes;
mod services;
#[cfg(test)]
mod test_support;

use config::{AppConfig, Mode};
use services::{
    link_issuer::LinkIssuer, movie_service::MovieService, movie_store::MovieStore, seed,
    storage_service::StorageService,
};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    // Logs go to stderr so `--invoke` keeps stdout for the response.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    // --- Parse config + run mode ---
    let (cfg, mode) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting cinedb with config: {:?}", cfg);
    tracing::info!(
        default_secs = cfg.link_policy.default_secs(),
        min_secs = cfg.link_policy.min_secs(),
        max_secs = cfg.link_policy.max_secs(),
        "link lifetime policy"
    );
    if cfg.signing_secret.generated {
        tracing::warn!(
            "CINEDB_SIGNING_SECRET is not set; using a random secret, links will not survive a restart"
        );
    }

    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    // --- Initialize SQLite connection ---
    let db = Arc::new(db::connect(&cfg.database_url).await?);

    // --- Apply schema; migration mode stops here ---
    db::run_migrations(&db).await?;
    if let Mode::Migrate = mode {
        tracing::info!("Database migration complete.");
        return Ok(());
    }

    // --- Sample data; seed mode stops here ---
    if let Mode::Seed = mode {
        let report = seed::seed_catalog(&MovieStore::new(db.clone())).await;
        tracing::info!("Successfully added {} movies to CineDB.", report.added);
        return Ok(());
    }

    // --- Initialize services ---
    let storage = StorageService::new(
        db.clone(),
        cfg.storage_dir.clone(),
        cfg.public_url.clone(),
        cfg.signing_secret.as_bytes(),
    )?;
    storage.ensure_bucket(&cfg.bucket).await?;

    let links = LinkIssuer::new(Arc::new(storage.clone()), cfg.bucket.clone(), cfg.link_policy);
    let service = MovieService::new(MovieStore::new(db.clone()), storage, links, cfg.bucket.clone());

    // --- Single gateway invocation ---
    if let Mode::Invoke { handler, event } = mode {
        let raw = read_event(&event)?;
        let event: gateway::GatewayEvent =
            serde_json::from_str(&raw).context("parsing gateway event")?;
        let response = gateway::dispatch(&service, handler, event).await;
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    // --- Build router ---
    let app = routes::routes::app(service);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Read an event from a file, or from stdin when the path is `-`.
fn read_event(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut raw = String::new();
        std::io::stdin()
            .read_to_string(&mut raw)
            .context("reading event from stdin")?;
        Ok(raw)
    } else {
        fs::read_to_string(path).with_context(|| format!("reading event file {}", path.display()))
    }
}
