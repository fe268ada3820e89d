//! Configuration for techfixd

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use techfix_adapters::{DEFAULT_API_BASE, DEFAULT_METADATA_TOKEN_URL};
use techfix_core::{Account, CentralStockEntry, NewBinding, StoreConfig};

/// Main service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TechfixConfig {
    #[serde(default)]
    pub server: ServerConfig,

    /// Courier transaction store
    #[serde(default)]
    pub storage: StorageConfig,

    /// Central and technician stock tabs
    #[serde(default)]
    pub row_store: RowStoreConfig,

    #[serde(default)]
    pub documents: DocumentsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Accounts upserted at start-up
    #[serde(default)]
    pub accounts: Vec<Account>,

    /// Stock bindings registered at start-up when absent
    #[serde(default)]
    pub bindings: Vec<NewBinding>,
}

impl Default for TechfixConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            row_store: RowStoreConfig::default(),
            documents: DocumentsConfig::default(),
            logging: LoggingConfig::default(),
            accounts: Vec::new(),
            bindings: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,

    #[serde(default = "default_true")]
    pub enable_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            enable_cors: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (for development/testing)
    #[default]
    Memory,

    /// PostgreSQL storage
    Postgres {
        url: String,

        #[serde(default = "default_pool_size")]
        max_connections: u32,

        #[serde(default = "default_connection_timeout")]
        connect_timeout_secs: u64,
    },
}

impl From<&StorageConfig> for StoreConfig {
    fn from(config: &StorageConfig) -> Self {
        match config {
            StorageConfig::Memory => StoreConfig::Memory,
            StorageConfig::Postgres {
                url,
                max_connections,
                connect_timeout_secs,
            } => StoreConfig::Postgres {
                database_url: url.clone(),
                max_connections: *max_connections,
                connect_timeout_secs: *connect_timeout_secs,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowStoreConfig {
    #[serde(default = "default_central_tab")]
    pub central_tab: String,

    #[serde(default = "default_technician_tab")]
    pub technician_tab: String,

    #[serde(default)]
    pub backend: RowStoreBackend,
}

impl Default for RowStoreBackend {
    fn default() -> Self {
        RowStoreBackend::Memory {
            central_seed: Vec::new(),
        }
    }
}

impl Default for RowStoreConfig {
    fn default() -> Self {
        Self {
            central_tab: default_central_tab(),
            technician_tab: default_technician_tab(),
            backend: RowStoreBackend::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RowStoreBackend {
    /// Process-local tabs, optionally seeded with central stock
    Memory {
        #[serde(default)]
        central_seed: Vec<CentralStockEntry>,
    },

    GoogleSheets {
        spreadsheet_id: String,

        #[serde(default = "default_api_base")]
        api_base: String,

        #[serde(default)]
        token: TokenConfig,

        #[serde(default = "default_request_timeout")]
        request_timeout_secs: u64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TokenConfig {
    Static {
        token: String,
    },

    /// Downloaded service-account JSON key, signed into a JWT-bearer grant
    ServiceAccount {
        key_path: PathBuf,
    },

    /// Service-account token from the compute metadata server
    MetadataServer {
        #[serde(default = "default_metadata_endpoint")]
        endpoint: String,
    },
}

impl Default for TokenConfig {
    fn default() -> Self {
        TokenConfig::MetadataServer {
            endpoint: default_metadata_endpoint(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentsConfig {
    /// Receipt archive root
    #[serde(default = "default_documents_dir")]
    pub dir: PathBuf,
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            dir: default_documents_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value helpers
fn default_true() -> bool {
    true
}

fn default_pool_size() -> u32 {
    10
}

fn default_connection_timeout() -> u64 {
    5
}

fn default_central_tab() -> String {
    "Mrp List".to_string()
}

fn default_technician_tab() -> String {
    "Technician Stocks".to_string()
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_metadata_endpoint() -> String {
    DEFAULT_METADATA_TOKEN_URL.to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_documents_dir() -> PathBuf {
    PathBuf::from("data/receipts")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl TechfixConfig {
    /// Layer defaults, an optional file, then `TECHFIX_` environment variables
    /// (`__` separates nested keys, e.g. `TECHFIX_STORAGE__URL`).
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&TechfixConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("TECHFIX")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}
