//! Courier transaction store.
//!
//! Relational record of accounts, technician stock bindings, courier transactions
//! and the receipt movement journal. Backed by process memory or PostgreSQL.

mod memory;
mod postgres;

pub use memory::MemoryCourierStore;
pub use postgres::PostgresCourierStore;

use crate::error::CourierError;
use crate::types::{
    Account, CourierFilter, CourierTransaction, MovementLeg, NewBinding, NewCourier,
    ReceiptMovement, TechnicianStockBinding,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Result type for store operations
pub type StoreResult<T> = Result<T, CourierError>;

/// Store backend configuration.
#[derive(Debug, Clone, Default)]
pub enum StoreConfig {
    /// Keep everything in process memory; lost on restart.
    #[default]
    Memory,
    /// Persist in PostgreSQL; schema is created on first connect.
    Postgres {
        database_url: String,
        max_connections: u32,
        connect_timeout_secs: u64,
    },
}

impl StoreConfig {
    pub fn memory() -> Self {
        Self::Memory
    }

    pub fn postgres(database_url: impl Into<String>, max_connections: u32) -> Self {
        Self::Postgres {
            database_url: database_url.into(),
            max_connections,
            connect_timeout_secs: 30,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Postgres { .. } => "postgres",
        }
    }
}

/// Connect the configured backend and make sure its schema exists.
pub async fn bootstrap(config: StoreConfig) -> StoreResult<Arc<dyn CourierStore>> {
    match config {
        StoreConfig::Memory => Ok(Arc::new(MemoryCourierStore::new())),
        StoreConfig::Postgres {
            database_url,
            max_connections,
            connect_timeout_secs,
        } => {
            let store =
                PostgresCourierStore::connect(&database_url, max_connections, connect_timeout_secs)
                    .await?;
            store.ensure_schema().await?;
            Ok(Arc::new(store))
        }
    }
}

#[async_trait]
pub trait CourierStore: Send + Sync {
    fn backend_label(&self) -> &'static str;

    /// Create or update an account by id.
    async fn upsert_account(&self, account: Account) -> StoreResult<()>;

    async fn get_account(&self, id: i64) -> StoreResult<Option<Account>>;

    /// All accounts ordered by username.
    async fn list_accounts(&self) -> StoreResult<Vec<Account>>;

    async fn get_binding_for_account(
        &self,
        account_id: i64,
    ) -> StoreResult<Option<TechnicianStockBinding>>;

    async fn list_bindings(&self) -> StoreResult<Vec<TechnicianStockBinding>>;

    /// Insert a binding; a second binding for the same account is `BindingExists`.
    async fn insert_binding(&self, binding: NewBinding) -> StoreResult<TechnicianStockBinding>;

    async fn touch_binding_sync(&self, account_id: i64, at: DateTime<Utc>) -> StoreResult<()>;

    /// Persist a courier together with its recipients, status `in_transit`.
    async fn insert_courier(&self, courier: NewCourier) -> StoreResult<CourierTransaction>;

    async fn get_courier(&self, id: i64) -> StoreResult<Option<CourierTransaction>>;

    async fn get_courier_by_code(&self, courier_id: &str)
        -> StoreResult<Option<CourierTransaction>>;

    /// Couriers matching `filter`, newest first.
    async fn list_couriers(&self, filter: &CourierFilter) -> StoreResult<Vec<CourierTransaction>>;

    /// Conditional `in_transit -> received`. Returns false when the courier was
    /// not in transit (already received or missing).
    async fn mark_received(&self, id: i64, at: DateTime<Utc>) -> StoreResult<bool>;

    async fn attach_document(&self, id: i64, reference: &str) -> StoreResult<()>;

    async fn get_movement(
        &self,
        courier_pk: i64,
        recipient_id: i64,
        spare_id: &str,
        leg: MovementLeg,
    ) -> StoreResult<Option<ReceiptMovement>>;

    async fn record_movement(&self, movement: ReceiptMovement) -> StoreResult<()>;

    /// Journal rows of one courier in application order.
    async fn list_movements(&self, courier_pk: i64) -> StoreResult<Vec<ReceiptMovement>>;
}
