#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod handlers;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::routing::{get, post};
use axum::Router;
use crate::config::{RowStoreBackend, RowStoreConfig, TechfixConfig, TokenConfig};
use std::sync::Arc;
use std::time::Duration;
use techfix_adapters::{
    GoogleSheetsRowStore, MetadataServerTokenSource, ServiceAccountTokenSource, SheetsConfig,
    StaticTokenSource, TokenCache,
};
use techfix_core::stock::{central_columns, technician_columns};
use techfix_core::{
    Account, CentralStockEntry, CourierWorkflow, FsReceiptArchive, MemoryRowStore, RowStore,
    StockLedger,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

pub use error::{ApiError, ServiceError};

/// Header carrying the numeric id of the calling account.
pub const ACCOUNT_HEADER: &str = "x-techfix-account";

#[derive(Clone)]
pub struct ServiceState {
    pub workflow: Arc<CourierWorkflow>,
}

impl ServiceState {
    pub fn new(workflow: Arc<CourierWorkflow>) -> Self {
        Self { workflow }
    }

    /// Connect every backend named in `config` and apply the account and binding seeds.
    pub async fn bootstrap(config: &TechfixConfig) -> Result<Self, ServiceError> {
        let store = techfix_core::storage::bootstrap((&config.storage).into()).await?;
        let (central, technician) = build_row_stores(&config.row_store)?;
        let ledger = Arc::new(StockLedger::new(central, technician));
        let archive = Arc::new(FsReceiptArchive::new(config.documents.dir.clone()));

        for account in &config.accounts {
            store.upsert_account(account.clone()).await?;
        }
        for binding in &config.bindings {
            if store
                .get_binding_for_account(binding.account_id)
                .await?
                .is_some()
            {
                debug!(account_id = binding.account_id, "binding already present");
                continue;
            }
            store.insert_binding(binding.clone()).await?;
        }

        let (central_label, technician_label) = ledger.labels();
        info!(
            storage = store.backend_label(),
            central = %central_label,
            technician = %technician_label,
            accounts = config.accounts.len(),
            "service state ready"
        );

        Ok(Self::new(Arc::new(CourierWorkflow::new(
            store, ledger, archive,
        ))))
    }
}

fn build_row_stores(
    config: &RowStoreConfig,
) -> Result<(Arc<dyn RowStore>, Arc<dyn RowStore>), ServiceError> {
    match &config.backend {
        RowStoreBackend::Memory { central_seed } => {
            let central = MemoryRowStore::with_rows(
                config.central_tab.clone(),
                &central_columns::HEADER,
                central_seed
                    .iter()
                    .enumerate()
                    .map(|(index, entry)| central_seed_row(index + 1, entry))
                    .collect(),
            );
            let technician =
                MemoryRowStore::new(config.technician_tab.clone(), &technician_columns::HEADER);
            Ok((Arc::new(central), Arc::new(technician)))
        }
        RowStoreBackend::GoogleSheets {
            spreadsheet_id,
            api_base,
            token,
            request_timeout_secs,
        } => {
            let tokens = Arc::new(match token {
                TokenConfig::Static { token } => TokenCache::new(StaticTokenSource::new(token)),
                TokenConfig::ServiceAccount { key_path } => {
                    let source = ServiceAccountTokenSource::from_key_file(key_path)?;
                    info!(client_email = source.client_email(), "using service account key");
                    TokenCache::new(source)
                }
                TokenConfig::MetadataServer { endpoint } => {
                    TokenCache::new(MetadataServerTokenSource::new(endpoint.clone())?)
                }
            });
            let mut sheets = SheetsConfig::new(spreadsheet_id.clone()).with_api_base(api_base);
            sheets.request_timeout = Duration::from_secs(*request_timeout_secs);

            let central =
                GoogleSheetsRowStore::new(sheets.clone(), config.central_tab.clone(), tokens.clone())?;
            let technician =
                GoogleSheetsRowStore::new(sheets, config.technician_tab.clone(), tokens)?;
            Ok((Arc::new(central), Arc::new(technician)))
        }
    }
}

fn central_seed_row(position: usize, entry: &CentralStockEntry) -> Vec<String> {
    vec![
        position.to_string(),
        entry.spare_id.clone(),
        entry.name.clone(),
        entry.mrp.to_string(),
        entry.hsn.clone(),
        entry.brand.clone(),
        entry.qty.to_string(),
    ]
}

/// Account resolved from the `x-techfix-account` header.
#[derive(Debug, Clone)]
pub struct Caller(pub Account);

#[async_trait]
impl FromRequestParts<ServiceState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &ServiceState,
    ) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(ACCOUNT_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| ApiError::unauthenticated(format!("missing {ACCOUNT_HEADER} header")))?;
        let account_id: i64 = raw.trim().parse().map_err(|_| {
            ApiError::unauthenticated(format!("invalid {ACCOUNT_HEADER} header '{raw}'"))
        })?;

        match state.workflow.store().get_account(account_id).await? {
            Some(account) => Ok(Caller(account)),
            None => Err(ApiError::unauthenticated(format!(
                "unknown account {account_id}"
            ))),
        }
    }
}

pub fn build_router(state: ServiceState, enable_cors: bool) -> Router {
    let api_routes = Router::new()
        .route("/health", get(handlers::health))
        .route("/company-stock", get(handlers::company_stock))
        .route(
            "/couriers",
            get(handlers::list_couriers).post(handlers::create_courier),
        )
        .route("/couriers/:courier_ref", get(handlers::courier_detail))
        .route(
            "/couriers/:courier_ref/document",
            get(handlers::courier_document),
        )
        .route(
            "/couriers/:courier_ref/receive",
            post(handlers::receive_courier),
        )
        .route("/my-stock", get(handlers::my_stock))
        .route("/my-couriers", get(handlers::my_couriers))
        .route("/my-couriers/pending", get(handlers::my_pending_couriers))
        .route("/technicians", get(handlers::technicians))
        .route(
            "/technician-stock",
            get(handlers::binding_overview).post(handlers::register_binding),
        );

    let router = Router::new()
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http());

    let router = if enable_cors {
        router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    } else {
        router
    };

    router.with_state(state)
}
