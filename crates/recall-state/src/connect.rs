//! SurrealDB connection setup
//!
//! Supports in-memory (tests), cloud (WebSocket + auth), explicit URL, and
//! local on-disk (`surrealkv://`) connections.

use surrealdb::engine::any::Any;
use surrealdb::opt::auth::{Database, Root};
use surrealdb::Surreal;
use tracing::{info, instrument};

use crate::error::StateError;
use crate::migrations;
use crate::Result;

const DEFAULT_NAMESPACE: &str = "recall";
const DEFAULT_DATABASE: &str = "main";
const DEFAULT_LOCAL_PATH: &str = ".recall/db";

/// Credentials for an authenticated SurrealDB endpoint
#[derive(Debug, Clone)]
pub struct CloudConfig {
    /// WebSocket endpoint URL (e.g., "wss://xxx.aws-use1.surrealdb.cloud")
    pub endpoint: String,
    pub username: String,
    pub password: String,
    pub namespace: String,
    pub database: String,
    /// Whether this is a root user (true) or database user (false)
    pub is_root: bool,
}

impl CloudConfig {
    pub fn new(
        endpoint: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            username: username.into(),
            password: password.into(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            database: DEFAULT_DATABASE.to_string(),
            is_root: false,
        }
    }

    pub fn with_namespace(mut self, ns: impl Into<String>) -> Self {
        self.namespace = ns.into();
        self
    }

    pub fn with_database(mut self, db: impl Into<String>) -> Self {
        self.database = db.into();
        self
    }

    pub fn with_root(mut self, is_root: bool) -> Self {
        self.is_root = is_root;
        self
    }

    /// Create from environment variables
    ///
    /// Reads:
    /// - SURREALDB_ENDPOINT (required)
    /// - SURREALDB_USERNAME (required)
    /// - SURREALDB_PASSWORD (required)
    /// - SURREALDB_NAMESPACE (optional, default: "recall")
    /// - SURREALDB_DATABASE (optional, default: "main")
    /// - SURREALDB_ROOT (optional, default: "false")
    pub fn from_env() -> std::result::Result<Self, String> {
        let endpoint =
            std::env::var("SURREALDB_ENDPOINT").map_err(|_| "SURREALDB_ENDPOINT not set")?;
        let username =
            std::env::var("SURREALDB_USERNAME").map_err(|_| "SURREALDB_USERNAME not set")?;
        let password =
            std::env::var("SURREALDB_PASSWORD").map_err(|_| "SURREALDB_PASSWORD not set")?;
        let namespace =
            std::env::var("SURREALDB_NAMESPACE").unwrap_or_else(|_| DEFAULT_NAMESPACE.to_string());
        let database =
            std::env::var("SURREALDB_DATABASE").unwrap_or_else(|_| DEFAULT_DATABASE.to_string());
        let is_root = std::env::var("SURREALDB_ROOT")
            .map(|v| v.to_lowercase() == "true")
            .unwrap_or(false);

        Ok(Self {
            endpoint,
            username,
            password,
            namespace,
            database,
            is_root,
        })
    }
}

/// Where the store lives
#[derive(Debug, Clone)]
pub enum StoreConfig {
    /// Ephemeral `mem://` database
    InMemory,
    /// Authenticated remote endpoint
    Cloud(CloudConfig),
    /// Unauthenticated URL (`ws://`, `surrealkv://`, ...)
    Url(String),
}

impl StoreConfig {
    /// Resolve from the environment.
    ///
    /// Cloud credentials win, then `SURREALDB_URL`, then local persistence
    /// under `.recall/db`.
    pub fn from_env() -> Self {
        if let Ok(config) = CloudConfig::from_env() {
            return StoreConfig::Cloud(config);
        }
        if let Ok(url) = std::env::var("SURREALDB_URL") {
            return StoreConfig::Url(url);
        }
        StoreConfig::Url(format!("surrealkv://{DEFAULT_LOCAL_PATH}"))
    }

    /// Local on-disk store rooted at `path`.
    pub fn local(path: impl AsRef<std::path::Path>) -> Self {
        StoreConfig::Url(format!("surrealkv://{}", path.as_ref().display()))
    }
}

/// Open a connection, select namespace/database, and run migrations.
#[instrument(skip_all)]
pub async fn connect(config: &StoreConfig) -> Result<Surreal<Any>> {
    let db = match config {
        StoreConfig::InMemory => {
            info!("Connecting to SurrealDB (in-memory)");
            let db = surrealdb::engine::any::connect("mem://")
                .await
                .map_err(|e| StateError::Connection(e.to_string()))?;
            select(&db, DEFAULT_NAMESPACE, DEFAULT_DATABASE).await?;
            db
        }
        StoreConfig::Cloud(cloud) => {
            info!(endpoint = %cloud.endpoint, root = cloud.is_root, "Connecting to SurrealDB Cloud");
            let db = surrealdb::engine::any::connect(&cloud.endpoint)
                .await
                .map_err(|e| {
                    StateError::Connection(format!(
                        "Failed to connect to {}: {}",
                        cloud.endpoint, e
                    ))
                })?;
            if cloud.is_root {
                db.signin(Root {
                    username: &cloud.username,
                    password: &cloud.password,
                })
                .await
                .map_err(|e| StateError::Connection(format!("Root authentication failed: {e}")))?;
            } else {
                db.signin(Database {
                    namespace: &cloud.namespace,
                    database: &cloud.database,
                    username: &cloud.username,
                    password: &cloud.password,
                })
                .await
                .map_err(|e| {
                    StateError::Connection(format!("Database authentication failed: {e}"))
                })?;
            }
            select(&db, &cloud.namespace, &cloud.database).await?;
            db
        }
        StoreConfig::Url(url) => {
            if let Some(path) = url.strip_prefix("surrealkv://") {
                std::fs::create_dir_all(path).map_err(|e| {
                    StateError::Connection(format!(
                        "Failed to create database directory {path}: {e}"
                    ))
                })?;
            }
            info!(url = %url, "Connecting to SurrealDB");
            let db = surrealdb::engine::any::connect(url.as_str())
                .await
                .map_err(|e| StateError::Connection(format!("Failed to connect to {url}: {e}")))?;
            select(&db, DEFAULT_NAMESPACE, DEFAULT_DATABASE).await?;
            db
        }
    };

    migrations::init_schema(&db).await?;
    Ok(db)
}

async fn select(db: &Surreal<Any>, namespace: &str, database: &str) -> Result<()> {
    db.use_ns(namespace)
        .use_db(database)
        .await
        .map_err(|e| StateError::Connection(format!("Failed to select namespace/database: {e}")))
}
