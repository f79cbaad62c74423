use anyhow::{Context, Result};
use clap::Parser;
use std::env;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub storage_dir: String,
    pub public_base_url: String,
    pub signing_secret: String,
    pub reaper_interval_secs: u64,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Direct-upload broker with a bundled dev object store")]
pub struct Args {
    /// Host to bind to (overrides UPLOAD_BROKER_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides UPLOAD_BROKER_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Registry database URL (overrides UPLOAD_BROKER_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Directory where the dev store keeps objects (overrides UPLOAD_BROKER_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Externally reachable origin for signed URLs (overrides UPLOAD_BROKER_PUBLIC_BASE_URL)
    #[arg(long)]
    pub public_base_url: Option<String>,

    /// Secret for signing URLs (overrides UPLOAD_BROKER_SIGNING_SECRET)
    #[arg(long)]
    pub signing_secret: Option<String>,

    /// Seconds between reaper sweeps (overrides UPLOAD_BROKER_REAPER_INTERVAL_SECS)
    #[arg(long)]
    pub reaper_interval_secs: Option<u64>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // Parse CLI once
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env::var("UPLOAD_BROKER_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = match env::var("UPLOAD_BROKER_PORT") {
            Ok(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing UPLOAD_BROKER_PORT value `{}`", value))?,
            Err(env::VarError::NotPresent) => 3000,
            Err(err) => return Err(err).context("reading UPLOAD_BROKER_PORT"),
        };
        let env_db = env::var("UPLOAD_BROKER_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/upload_broker.db".into());
        let env_storage =
            env::var("UPLOAD_BROKER_STORAGE_DIR").unwrap_or_else(|_| "./data/objects".into());
        let env_secret = env::var("UPLOAD_BROKER_SIGNING_SECRET")
            .unwrap_or_else(|_| "insecure-dev-secret".into());
        let env_reaper = match env::var("UPLOAD_BROKER_REAPER_INTERVAL_SECS") {
            Ok(value) => value.parse::<u64>().with_context(|| {
                format!("parsing UPLOAD_BROKER_REAPER_INTERVAL_SECS value `{}`", value)
            })?,
            Err(env::VarError::NotPresent) => 60,
            Err(err) => return Err(err).context("reading UPLOAD_BROKER_REAPER_INTERVAL_SECS"),
        };

        // --- Merge ---
        let port = args.port.unwrap_or(env_port);
        let env_public = env::var("UPLOAD_BROKER_PUBLIC_BASE_URL")
            .unwrap_or_else(|_| format!("http://127.0.0.1:{}", port));

        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port,
            database_url: args.database_url.unwrap_or(env_db),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            public_base_url: args.public_base_url.unwrap_or(env_public),
            signing_secret: args.signing_secret.unwrap_or(env_secret),
            reaper_interval_secs: args.reaper_interval_secs.unwrap_or(env_reaper),
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
