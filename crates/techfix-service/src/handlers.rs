//! REST handlers for `/api/v1`.

use crate::{ApiError, Caller, ServiceState};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use techfix_core::{
    AccountSummary, BindingOverview, CentralStockEntry, CourierError, CourierStatus,
    CourierTransaction, CourierView, CreateCourier, DispatchLine, NewBinding, ReceivedItem,
    StockQuery, TechnicianStockBinding, TechnicianStockEntry,
};

/// Success envelope shared by every JSON endpoint.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub data: T,
}

impl<T> Envelope<T> {
    fn data(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            count: None,
            message: None,
            data,
        })
    }

    fn with_message(message: &str, data: T) -> Json<Self> {
        Json(Self {
            success: true,
            count: None,
            message: Some(message.to_string()),
            data,
        })
    }
}

impl<T> Envelope<Vec<T>> {
    fn list(data: Vec<T>) -> Json<Self> {
        Json(Self {
            success: true,
            count: Some(data.len()),
            message: None,
            data,
        })
    }
}

type ApiResult<T> = Result<Json<Envelope<T>>, ApiError>;

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| ApiError::bad_request(rejection.body_text()))
}

/// Negative quantities become zero and are rejected downstream; oversized ones saturate.
fn wire_qty(qty: i64) -> u32 {
    u32::try_from(qty.max(0)).unwrap_or(u32::MAX)
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub storage_backend: &'static str,
    pub central_store: String,
    pub technician_store: String,
}

pub async fn health(State(state): State<ServiceState>) -> Json<HealthResponse> {
    let (central_store, technician_store) = state.workflow.ledger().labels();
    Json(HealthResponse {
        status: "ok",
        service: "techfixd",
        storage_backend: state.workflow.store().backend_label(),
        central_store,
        technician_store,
    })
}

#[derive(Debug, Default, Deserialize)]
pub struct StockParams {
    search: Option<String>,
    sort_by: Option<String>,
    order: Option<String>,
}

impl StockParams {
    fn query(&self) -> Result<StockQuery, CourierError> {
        StockQuery::from_params(
            self.search.as_deref(),
            self.sort_by.as_deref(),
            self.order.as_deref(),
        )
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct StatusParams {
    status: Option<String>,
}

impl StatusParams {
    fn status(&self) -> Result<Option<CourierStatus>, ApiError> {
        match self.status.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => CourierStatus::parse(raw).map(Some).ok_or_else(|| {
                ApiError::bad_request(format!(
                    "invalid status '{raw}'; expected in_transit or received"
                ))
            }),
        }
    }
}

pub async fn company_stock(
    State(state): State<ServiceState>,
    Caller(caller): Caller,
    Query(params): Query<StockParams>,
) -> ApiResult<Vec<CentralStockEntry>> {
    let query = params.query()?;
    let stock = state.workflow.company_stock(&caller, &query).await?;
    Ok(Envelope::list(stock))
}

pub async fn my_stock(
    State(state): State<ServiceState>,
    Caller(caller): Caller,
    Query(params): Query<StockParams>,
) -> ApiResult<Vec<TechnicianStockEntry>> {
    let query = params.query()?;
    let stock = state.workflow.my_stock(&caller, &query).await?;
    Ok(Envelope::list(stock))
}

#[derive(Debug, Deserialize)]
pub struct DispatchItemRequest {
    #[serde(default)]
    spare_id: String,
    #[serde(default)]
    qty: i64,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    mrp: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct CreateCourierRequest {
    #[serde(default, alias = "technician_ids")]
    recipient_ids: Vec<i64>,
    #[serde(default)]
    items: Vec<DispatchItemRequest>,
    #[serde(default)]
    notes: Option<String>,
}

impl From<CreateCourierRequest> for CreateCourier {
    fn from(request: CreateCourierRequest) -> Self {
        CreateCourier {
            recipient_ids: request.recipient_ids,
            items: request
                .items
                .into_iter()
                .map(|item| DispatchLine {
                    spare_id: item.spare_id,
                    qty: wire_qty(item.qty),
                    name: item.name,
                    mrp: item.mrp,
                })
                .collect(),
            notes: request.notes.unwrap_or_default(),
        }
    }
}

pub async fn create_courier(
    State(state): State<ServiceState>,
    Caller(caller): Caller,
    payload: Result<Json<CreateCourierRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Envelope<CourierView>>), ApiError> {
    let request = json_body(payload)?;
    let courier = state
        .workflow
        .create_courier(&caller, request.into())
        .await?;
    let view = state.workflow.describe(courier).await?;
    Ok((
        StatusCode::CREATED,
        Envelope::with_message("Courier created successfully", view),
    ))
}

async fn describe_all(
    state: &ServiceState,
    couriers: Vec<CourierTransaction>,
) -> Result<Vec<CourierView>, ApiError> {
    let mut views = Vec::with_capacity(couriers.len());
    for courier in couriers {
        views.push(state.workflow.describe(courier).await?);
    }
    Ok(views)
}

pub async fn list_couriers(
    State(state): State<ServiceState>,
    Caller(caller): Caller,
    Query(params): Query<StatusParams>,
) -> ApiResult<Vec<CourierView>> {
    let couriers = state
        .workflow
        .list_couriers(&caller, params.status()?)
        .await?;
    Ok(Envelope::list(describe_all(&state, couriers).await?))
}

pub async fn courier_detail(
    State(state): State<ServiceState>,
    Caller(caller): Caller,
    Path(courier_ref): Path<String>,
) -> ApiResult<CourierView> {
    let courier = state.workflow.courier_detail(&caller, &courier_ref).await?;
    Ok(Envelope::data(state.workflow.describe(courier).await?))
}

pub async fn courier_document(
    State(state): State<ServiceState>,
    Caller(caller): Caller,
    Path(courier_ref): Path<String>,
) -> Result<Response, ApiError> {
    let (courier, body) = state
        .workflow
        .courier_document(&caller, &courier_ref)
        .await?;
    let disposition = format!("inline; filename=\"{}.txt\"", courier.courier_id);
    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
pub struct ReceivedItemRequest {
    #[serde(default)]
    spare_id: String,
    #[serde(default)]
    qty: i64,
}

#[derive(Debug, Deserialize)]
pub struct ReceiveRequest {
    #[serde(default)]
    received_items: Vec<ReceivedItemRequest>,
}

pub async fn receive_courier(
    State(state): State<ServiceState>,
    Caller(caller): Caller,
    Path(courier_ref): Path<String>,
    payload: Result<Json<ReceiveRequest>, JsonRejection>,
) -> ApiResult<CourierView> {
    let request = json_body(payload)?;
    let received: Vec<ReceivedItem> = request
        .received_items
        .into_iter()
        .map(|item| ReceivedItem::new(item.spare_id, wire_qty(item.qty)))
        .collect();

    let courier = state
        .workflow
        .confirm_receipt(&courier_ref, &caller, &received)
        .await?;
    Ok(Envelope::with_message(
        "Courier marked as received successfully",
        state.workflow.describe(courier).await?,
    ))
}

pub async fn my_pending_couriers(
    State(state): State<ServiceState>,
    Caller(caller): Caller,
) -> ApiResult<Vec<CourierView>> {
    let couriers = state.workflow.pending_couriers(&caller).await?;
    Ok(Envelope::list(describe_all(&state, couriers).await?))
}

pub async fn my_couriers(
    State(state): State<ServiceState>,
    Caller(caller): Caller,
    Query(params): Query<StatusParams>,
) -> ApiResult<Vec<CourierView>> {
    let couriers = state
        .workflow
        .courier_history(&caller, params.status()?)
        .await?;
    Ok(Envelope::list(describe_all(&state, couriers).await?))
}

pub async fn technicians(
    State(state): State<ServiceState>,
    Caller(caller): Caller,
) -> ApiResult<Vec<AccountSummary>> {
    let accounts = state.workflow.technicians(&caller).await?;
    Ok(Envelope::list(
        accounts.iter().map(AccountSummary::from).collect(),
    ))
}

pub async fn binding_overview(
    State(state): State<ServiceState>,
    Caller(caller): Caller,
) -> ApiResult<BindingOverview> {
    Ok(Envelope::data(
        state.workflow.binding_overview(&caller).await?,
    ))
}

#[derive(Debug, Deserialize)]
pub struct RegisterBindingRequest {
    #[serde(alias = "technician_id")]
    account_id: i64,
    #[serde(default, alias = "sheet_technician_name")]
    sheet_identity: Option<String>,
    #[serde(default)]
    sheet_id: Option<String>,
}

pub async fn register_binding(
    State(state): State<ServiceState>,
    Caller(caller): Caller,
    payload: Result<Json<RegisterBindingRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Envelope<TechnicianStockBinding>>), ApiError> {
    let request = json_body(payload)?;
    let binding = state
        .workflow
        .register_binding(
            &caller,
            NewBinding {
                account_id: request.account_id,
                sheet_identity: request.sheet_identity,
                sheet_id: request.sheet_id,
            },
        )
        .await?;
    Ok((
        StatusCode::CREATED,
        Envelope::with_message("Stock binding registered", binding),
    ))
}
