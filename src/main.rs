use anyhow::Result;
use axum::Router;
use sqlx::sqlite::SqlitePoolOptions;
use std::{fs, io::ErrorKind, path::Path, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use upload_broker::handlers::AppState;
use upload_broker::models::bucket::{BucketDefinition, BucketKind};
use upload_broker::router::RouterBuilder;
use upload_broker::services::{
    dispatcher::Dispatcher, local_store::LocalObjectStore, reaper::Reaper,
    registry::TempFileRegistry, signing::UrlSigner,
};
use upload_broker::{config, routes};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting upload-broker with config: {:?}", cfg);

    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    // --- Initialize SQLite connection ---
    let db_url = &cfg.database_url;

    // Create the database file's parent directory if needed
    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("file:");
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }
    if let Err(e) = fs::OpenOptions::new().create(true).write(true).open(db_path) {
        tracing::warn!("Failed to open database file manually: {}", e);
    }

    let db: Arc<sqlx::Pool<sqlx::Sqlite>> = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await?,
    );

    // --- Handle migration mode ---
    if migrate {
        run_migrations(&db).await?;
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Initialize core services ---
    let signer = UrlSigner::new(&cfg.signing_secret);
    let store = Arc::new(
        LocalObjectStore::new(
            cfg.storage_dir.clone(),
            cfg.public_base_url.clone(),
            signer,
        )
        .allow_unsigned_reads(),
    );
    let registry = TempFileRegistry::new(db.clone());

    // Stock dev buckets; an embedding application registers its own.
    let bucket_router = RouterBuilder::<serde_json::Value>::new()
        .register(BucketDefinition::new("files", BucketKind::File).max_size_bytes(50_000_000))?
        .register(
            BucketDefinition::new("images", BucketKind::Image { thumbnails: false })
                .max_size_bytes(5_000_000)
                .public(),
        )?
        .build();

    let dispatcher = Arc::new(Dispatcher::new(
        bucket_router,
        store.clone(),
        registry.clone(),
    ));

    // --- Start the reaper ---
    Reaper::new(
        registry,
        store.clone(),
        Duration::from_secs(cfg.reaper_interval_secs),
    )
    .spawn();

    // --- Build router ---
    let state = AppState {
        dispatcher,
        store,
        db,
    };
    let app: Router = routes::routes::routes().with_state(state);

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

/// Run SQLite migrations manually from the embedded SQL file.
async fn run_migrations(db: &Arc<sqlx::Pool<sqlx::Sqlite>>) -> Result<()> {
    let path = "migrations/0001_init.sql";

    if !Path::new(path).exists() {
        anyhow::bail!("Migration file not found: {}", path);
    }

    let sql = fs::read_to_string(path)?;
    let statements = sql
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    tracing::info!("Running {} migration statements...", statements.len());

    for stmt in statements {
        tracing::debug!("Executing migration SQL: {}", stmt);
        sqlx::query(stmt).execute(&**db).await?;
    }

    Ok(())
}
