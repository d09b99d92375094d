//! Axum server bootstrap - the composition root.
//!
//! This module is the ONLY place where infrastructure is wired together
//! for the web adapter. All concrete implementations are instantiated here.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tokio_util::sync::CancellationToken;

use datadrop_core::{DownloadRecordRepository, DownloadSettings, SystemClock, validate_settings};
use datadrop_db::{CoreFactory, setup_database};
use datadrop_download::{DownloadService, LocalArtifactStore, ServiceDeps, StaticPolicyOracle};

/// Default listening port.
pub const DEFAULT_PORT: u16 = 8787;

/// CORS configuration for the web server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CorsConfig {
    /// Allow all origins (development mode).
    #[default]
    AllowAll,
    /// Allow specific origins (production mode).
    AllowOrigins(Vec<String>),
}

/// Server configuration for the Axum adapter.
#[derive(Clone)]
pub struct ServerConfig {
    /// Port for the HTTP server.
    pub port: u16,
    /// `SQLite` file holding download records.
    pub database_path: PathBuf,
    /// Directory that dataset artifact paths are resolved against.
    pub artifact_root: PathBuf,
    /// JSON fixture describing organizations, datasets and subjects.
    pub policy_path: Option<PathBuf>,
    /// HMAC secret for download tokens.
    pub token_secret: String,
    /// Download tunables.
    pub settings: DownloadSettings,
    /// CORS configuration.
    pub cors: CorsConfig,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("port", &self.port)
            .field("database_path", &self.database_path)
            .field("artifact_root", &self.artifact_root)
            .field("policy_path", &self.policy_path)
            .field("token_secret", &"<redacted>")
            .field("settings", &self.settings)
            .field("cors", &self.cors)
            .finish()
    }
}

impl ServerConfig {
    /// Config with default paths under `./data`.
    pub fn with_defaults(token_secret: impl Into<String>) -> Self {
        Self {
            port: DEFAULT_PORT,
            database_path: PathBuf::from("data/datadrop.db"),
            artifact_root: PathBuf::from("data/artifacts"),
            policy_path: None,
            token_secret: token_secret.into(),
            settings: DownloadSettings::with_defaults(),
            cors: CorsConfig::default(),
        }
    }

    /// Read `DATADROP_*` variables from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from any key lookup (the environment in production).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let Some(secret) = get("DATADROP_TOKEN_SECRET") else {
            bail!("DATADROP_TOKEN_SECRET must be set");
        };
        let mut config = Self::with_defaults(secret);

        if let Some(port) = get("DATADROP_PORT") {
            config.port = port
                .trim()
                .parse()
                .with_context(|| format!("DATADROP_PORT is not a port: {port}"))?;
        }
        if let Some(path) = get("DATADROP_DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }
        if let Some(path) = get("DATADROP_ARTIFACT_ROOT") {
            config.artifact_root = PathBuf::from(path);
        }
        config.policy_path = get("DATADROP_POLICY_FILE").map(PathBuf::from);

        if let Some(ttl) = get("DATADROP_TOKEN_TTL_SECS") {
            config.settings.token_ttl_secs = ttl
                .trim()
                .parse()
                .with_context(|| format!("DATADROP_TOKEN_TTL_SECS is not a number: {ttl}"))?;
        }
        if let Some(chunk) = get("DATADROP_CHUNK_SIZE") {
            config.settings.chunk_size = chunk
                .trim()
                .parse()
                .with_context(|| format!("DATADROP_CHUNK_SIZE is not a number: {chunk}"))?;
        }

        if let Some(origins) = get("DATADROP_CORS_ORIGINS") {
            let origins: Vec<String> = origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(str::to_string)
                .collect();
            if !origins.is_empty() {
                config.cors = CorsConfig::AllowOrigins(origins);
            }
        }

        Ok(config)
    }

    /// Set CORS to allow specific origins.
    #[must_use]
    pub fn with_allowed_origins(mut self, origins: Vec<String>) -> Self {
        self.cors = CorsConfig::AllowOrigins(origins);
        self
    }
}

/// Application context for the Axum adapter.
pub struct AxumContext {
    /// The download service facade.
    pub downloads: Arc<DownloadService>,
}

/// Wire the download service over an existing record repository.
pub fn build_service(
    config: &ServerConfig,
    repo: Arc<dyn DownloadRecordRepository>,
) -> Result<DownloadService> {
    validate_settings(&config.settings)?;

    let oracle = match &config.policy_path {
        Some(path) => StaticPolicyOracle::load(path)?,
        None => {
            tracing::warn!(target: "datadrop.http", "DATADROP_POLICY_FILE not set, starting with an empty catalog");
            StaticPolicyOracle::new()
        }
    };
    let oracle = Arc::new(oracle);

    let deps = ServiceDeps {
        repo,
        oracle: oracle.clone(),
        catalog: oracle.clone(),
        directory: oracle,
        store: Arc::new(LocalArtifactStore::new(
            config.artifact_root.clone(),
            config.settings.chunk_size,
        )),
        clock: Arc::new(SystemClock),
    };

    let service = DownloadService::new(
        deps,
        config.settings.clone(),
        config.token_secret.as_bytes(),
    )?;
    Ok(service)
}

/// Bootstrap the Axum server with all services.
pub async fn bootstrap(config: &ServerConfig) -> Result<AxumContext> {
    tracing::info!(
        target: "datadrop.http",
        database_path = %config.database_path.display(),
        artifact_root = %config.artifact_root.display(),
        policy_path = ?config.policy_path,
        "Axum bootstrap resolved paths"
    );

    let pool = setup_database(&config.database_path).await?;
    let repo = CoreFactory::build_record_port(pool);
    let downloads = Arc::new(build_service(config, repo)?);

    Ok(AxumContext { downloads })
}

/// Start the web server and run until Ctrl-C.
///
/// On shutdown the retention sweeper is stopped and running transfers are
/// interrupted (and persisted as such) before returning.
pub async fn start_server(config: ServerConfig) -> Result<()> {
    use tokio::net::TcpListener;
    use tracing::info;

    let ctx = bootstrap(&config).await?;
    let downloads = Arc::clone(&ctx.downloads);

    let sweeper_cancel = CancellationToken::new();
    let sweeper = downloads.spawn_sweeper(sweeper_cancel.clone());

    let app = crate::routes::create_router(ctx, &config.cors);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(target: "datadrop.http", "datadrop web server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!(
        target: "datadrop.http",
        active_transfers = downloads.active_transfers(),
        "shutting down"
    );
    sweeper_cancel.cancel();
    if let Err(e) = sweeper.await {
        tracing::warn!(target: "datadrop.http", "Retention sweeper ended abnormally: {}", e);
    }
    downloads.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(target: "datadrop.http", "Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
