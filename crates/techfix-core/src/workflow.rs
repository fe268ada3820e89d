//! Courier workflow engine.
//!
//! Creation validates availability against a central stock snapshot and persists an
//! `in_transit` courier without touching either ledger. Receipt confirmation moves
//! quantities (central debit, then technician credit) item by item and only then
//! closes the courier.
//!
//! The relational store and the row-store cannot share a transaction. Each applied
//! ledger leg is journaled, so a confirmation that fails mid-sequence can be retried
//! by the same recipient without applying any leg twice.

use crate::document::{render_receipt, ReceiptArchive};
use crate::error::CourierError;
use crate::flow::CourierLifecycle;
use crate::query::StockQuery;
use crate::stock::{KeyedLocks, StockLedger};
use crate::storage::CourierStore;
use crate::types::{
    Account, CentralStockEntry, CourierFilter, CourierItem, CourierStatus, CourierTransaction,
    MovementLeg, NewBinding, NewCourier, ReceiptMovement, ReceivedItem, TechnicianStockBinding,
    TechnicianStockEntry,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

const COURIER_ID_ATTEMPTS: usize = 3;

/// One requested dispatch line. Name and price default to the central catalogue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatchLine {
    pub spare_id: String,
    pub qty: u32,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub mrp: Option<f64>,
}

impl DispatchLine {
    pub fn new(spare_id: impl Into<String>, qty: u32) -> Self {
        Self {
            spare_id: spare_id.into(),
            qty,
            name: None,
            mrp: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CreateCourier {
    pub recipient_ids: Vec<i64>,
    pub items: Vec<DispatchLine>,
    pub notes: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccountSummary {
    pub id: i64,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub full_name: String,
}

impl From<&Account> for AccountSummary {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id,
            username: account.username.clone(),
            first_name: account.first_name.clone(),
            last_name: account.last_name.clone(),
            email: account.email.clone(),
            full_name: account.full_name(),
        }
    }
}

/// Courier with resolved account details, as returned to callers.
#[derive(Debug, Clone, Serialize)]
pub struct CourierView {
    #[serde(flatten)]
    pub courier: CourierTransaction,
    pub created_by_info: Option<AccountSummary>,
    pub recipients_info: Vec<AccountSummary>,
    pub total_amount: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BindingOverview {
    pub technicians: Vec<AccountSummary>,
    pub bindings: Vec<TechnicianStockBinding>,
}

/// One line of the technician mapping report.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MappingLine {
    pub account_id: i64,
    pub username: String,
    pub sheet_identity: Option<String>,
}

pub struct CourierWorkflow {
    store: Arc<dyn CourierStore>,
    ledger: Arc<StockLedger>,
    archive: Arc<dyn ReceiptArchive>,
    confirmations: KeyedLocks,
}

impl CourierWorkflow {
    pub fn new(
        store: Arc<dyn CourierStore>,
        ledger: Arc<StockLedger>,
        archive: Arc<dyn ReceiptArchive>,
    ) -> Self {
        Self {
            store,
            ledger,
            archive,
            confirmations: KeyedLocks::default(),
        }
    }

    pub fn store(&self) -> &Arc<dyn CourierStore> {
        &self.store
    }

    pub fn ledger(&self) -> &Arc<StockLedger> {
        &self.ledger
    }

    /// Resolve the caller account; unknown ids are reported as `NotFound`.
    pub async fn account(&self, account_id: i64) -> Result<Account, CourierError> {
        self.store
            .get_account(account_id)
            .await?
            .ok_or_else(|| CourierError::not_found("account", account_id.to_string()))
    }

    pub async fn create_courier(
        &self,
        creator: &Account,
        request: CreateCourier,
    ) -> Result<CourierTransaction, CourierError> {
        require_staff(creator, "only staff accounts may dispatch couriers")?;

        let recipients = self.resolve_recipients(&request.recipient_ids).await?;
        if request.items.is_empty() {
            return Err(CourierError::EmptyItems);
        }

        let mut per_spare: Vec<(String, u64)> = Vec::new();
        for line in &request.items {
            let spare_id = line.spare_id.trim();
            if spare_id.is_empty() {
                return Err(CourierError::Validation(
                    "spare_id must not be blank".to_string(),
                ));
            }
            if line.qty == 0 {
                return Err(CourierError::InvalidQuantity {
                    spare_id: spare_id.to_string(),
                });
            }
            match per_spare.iter_mut().find(|(id, _)| id == spare_id) {
                Some((_, qty)) => *qty += u64::from(line.qty),
                None => per_spare.push((spare_id.to_string(), u64::from(line.qty))),
            }
        }

        let recipient_count = recipients.len() as u64;
        let catalogue = self.ledger.fetch_central_stock().await?;
        // The debit path updates the first matching sheet row, so validate against it too.
        let mut by_spare = HashMap::new();
        for entry in &catalogue {
            by_spare.entry(entry.spare_id.as_str()).or_insert(entry);
        }

        for (spare_id, qty) in &per_spare {
            let entry = by_spare
                .get(spare_id.as_str())
                .ok_or_else(|| CourierError::UnknownSpare(spare_id.clone()))?;
            let required = qty * recipient_count;
            if i128::from(required) > i128::from(entry.qty) {
                return Err(CourierError::InsufficientStock {
                    spare_id: spare_id.clone(),
                    available: entry.qty,
                    requested: required,
                });
            }
        }

        let items = request
            .items
            .iter()
            .map(|line| {
                let spare_id = line.spare_id.trim();
                snapshot_item(line, by_spare.get(spare_id).copied())
            })
            .collect::<Vec<_>>();
        let recipient_ids = recipients.iter().map(|account| account.id).collect::<Vec<_>>();

        let courier = self
            .persist_courier(creator, recipient_ids, items, request.notes.trim())
            .await?;
        info!(
            courier_id = %courier.courier_id,
            created_by = creator.id,
            recipients = courier.recipients.len(),
            items = courier.items.len(),
            "courier created"
        );

        Ok(self.attach_receipt(courier, creator, &recipients).await)
    }

    async fn resolve_recipients(&self, ids: &[i64]) -> Result<Vec<Account>, CourierError> {
        let unique = ids.iter().copied().collect::<BTreeSet<_>>();
        if unique.is_empty() {
            return Err(CourierError::UnknownRecipient(
                "no recipients supplied".to_string(),
            ));
        }

        let mut found = Vec::with_capacity(unique.len());
        let mut missing = Vec::new();
        for id in unique {
            match self.store.get_account(id).await? {
                Some(account) => found.push(account),
                None => missing.push(id.to_string()),
            }
        }
        if !missing.is_empty() {
            return Err(CourierError::UnknownRecipient(missing.join(", ")));
        }
        Ok(found)
    }

    async fn persist_courier(
        &self,
        creator: &Account,
        recipients: Vec<i64>,
        items: Vec<CourierItem>,
        notes: &str,
    ) -> Result<CourierTransaction, CourierError> {
        let mut last_err = None;
        for _ in 0..COURIER_ID_ATTEMPTS {
            let new = NewCourier {
                courier_id: generate_courier_id(),
                created_by: Some(creator.id),
                recipients: recipients.clone(),
                items: items.clone(),
                notes: notes.to_string(),
                sent_time: Utc::now(),
            };
            match self.store.insert_courier(new).await {
                Ok(courier) => return Ok(courier),
                Err(err @ CourierError::StateConflict(_)) => {
                    debug!(error = %err, "courier id collision, regenerating");
                    last_err = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            CourierError::StateConflict("could not allocate a courier id".to_string())
        }))
    }

    /// Render and archive the receipt. Failures are logged and leave the courier
    /// without a document reference.
    async fn attach_receipt(
        &self,
        mut courier: CourierTransaction,
        creator: &Account,
        recipients: &[Account],
    ) -> CourierTransaction {
        let body = render_receipt(&courier, Some(creator), recipients);
        let reference = match self.archive.store(&courier.courier_id, &body).await {
            Ok(reference) => reference,
            Err(err) => {
                warn!(courier_id = %courier.courier_id, error = %err, "receipt archive failed");
                return courier;
            }
        };

        match self.store.attach_document(courier.id, &reference).await {
            Ok(()) => courier.document = Some(reference),
            Err(err) => {
                warn!(courier_id = %courier.courier_id, error = %err, "receipt reference not saved");
            }
        }
        courier
    }

    /// Look a courier up by its courier id, falling back to the numeric primary key.
    pub async fn find_courier(&self, courier_ref: &str) -> Result<CourierTransaction, CourierError> {
        let courier_ref = courier_ref.trim();
        if let Some(courier) = self.store.get_courier_by_code(courier_ref).await? {
            return Ok(courier);
        }
        if let Ok(id) = courier_ref.parse::<i64>() {
            if let Some(courier) = self.store.get_courier(id).await? {
                return Ok(courier);
            }
        }
        Err(CourierError::not_found("courier", courier_ref))
    }

    pub async fn confirm_receipt(
        &self,
        courier_ref: &str,
        recipient: &Account,
        received: &[ReceivedItem],
    ) -> Result<CourierTransaction, CourierError> {
        let located = self.find_courier(courier_ref).await?;
        let _guard = self
            .confirmations
            .acquire(format!("courier:{}", located.id))
            .await;
        // Re-read under the lock; a concurrent confirmation may have closed it.
        let courier = self
            .store
            .get_courier(located.id)
            .await?
            .ok_or_else(|| CourierError::not_found("courier", courier_ref))?;

        if !courier.is_recipient(recipient.id) {
            return Err(CourierError::Forbidden(format!(
                "account {} is not a recipient of courier '{}'",
                recipient.id, courier.courier_id
            )));
        }

        let mut lifecycle = CourierLifecycle::resume(&courier.courier_id, courier.status);
        lifecycle.ensure_receivable()?;

        let plan = receipt_plan(&courier, received)?;

        let binding = self.store.get_binding_for_account(recipient.id).await?;
        let identity = binding
            .as_ref()
            .and_then(TechnicianStockBinding::identity)
            .ok_or(CourierError::MissingBinding(recipient.id))?
            .to_string();

        for (spare_id, qty) in &plan {
            for leg in [MovementLeg::Debit, MovementLeg::Credit] {
                if let Err(err) = self
                    .apply_leg(&courier, recipient.id, &identity, spare_id, leg, *qty)
                    .await
                {
                    warn!(
                        courier_id = %courier.courier_id,
                        recipient = recipient.id,
                        spare_id = %spare_id,
                        leg = leg.as_str(),
                        error = %err,
                        "receipt confirmation aborted mid-sequence"
                    );
                    return Err(err);
                }
            }
        }

        self.settle_open_debits(&courier, recipient.id, &identity)
            .await?;

        let now = Utc::now();
        if !self.store.mark_received(courier.id, now).await? {
            return Err(CourierError::AlreadyReceived(courier.courier_id.clone()));
        }
        lifecycle.mark_received()?;
        self.store.touch_binding_sync(recipient.id, now).await?;

        info!(
            courier_id = %courier.courier_id,
            recipient = recipient.id,
            technician = %identity,
            items = plan.len(),
            "courier received"
        );

        self.store
            .get_courier(courier.id)
            .await?
            .ok_or_else(|| CourierError::not_found("courier", courier.courier_id.clone()))
    }

    /// Credit every spare debited for this recipient by an earlier attempt that never
    /// reached its credit leg, so central stock is not left short.
    async fn settle_open_debits(
        &self,
        courier: &CourierTransaction,
        recipient_id: i64,
        identity: &str,
    ) -> Result<(), CourierError> {
        let movements = self.store.list_movements(courier.id).await?;
        let mine = movements
            .iter()
            .filter(|movement| movement.recipient_id == recipient_id)
            .collect::<Vec<_>>();

        for debit in mine.iter().filter(|m| m.leg == MovementLeg::Debit) {
            let credited = mine
                .iter()
                .any(|m| m.leg == MovementLeg::Credit && m.spare_id == debit.spare_id);
            if credited {
                continue;
            }
            warn!(
                courier_id = %courier.courier_id,
                recipient = recipient_id,
                spare_id = %debit.spare_id,
                qty = debit.qty,
                "completing credit left open by an earlier attempt"
            );
            self.apply_leg(
                courier,
                recipient_id,
                identity,
                &debit.spare_id,
                MovementLeg::Credit,
                debit.qty,
            )
            .await?;
        }
        Ok(())
    }

    async fn apply_leg(
        &self,
        courier: &CourierTransaction,
        recipient_id: i64,
        identity: &str,
        spare_id: &str,
        leg: MovementLeg,
        qty: u64,
    ) -> Result<(), CourierError> {
        if let Some(prior) = self
            .store
            .get_movement(courier.id, recipient_id, spare_id, leg)
            .await?
        {
            if prior.qty != qty {
                return Err(CourierError::StateConflict(format!(
                    "{} of '{}' already applied with quantity {}, retry asked for {}",
                    leg.as_str(),
                    spare_id,
                    prior.qty,
                    qty
                )));
            }
            debug!(
                courier_id = %courier.courier_id,
                spare_id,
                leg = leg.as_str(),
                "movement already applied, skipping"
            );
            return Ok(());
        }

        let now_on_hand = match leg {
            MovementLeg::Debit => self.ledger.debit_central(spare_id, qty).await?,
            MovementLeg::Credit => {
                self.ledger
                    .credit_technician(identity, spare_id, qty)
                    .await?
            }
        };

        self.store
            .record_movement(ReceiptMovement {
                courier_pk: courier.id,
                recipient_id,
                spare_id: spare_id.to_string(),
                leg,
                qty,
                applied_at: Utc::now(),
            })
            .await?;
        info!(
            courier_id = %courier.courier_id,
            spare_id,
            leg = leg.as_str(),
            qty,
            now_on_hand,
            "stock movement applied"
        );
        Ok(())
    }

    pub async fn list_couriers(
        &self,
        caller: &Account,
        status: Option<CourierStatus>,
    ) -> Result<Vec<CourierTransaction>, CourierError> {
        require_staff(caller, "only staff accounts may list all couriers")?;
        self.store
            .list_couriers(&CourierFilter::all().with_status(status))
            .await
    }

    pub async fn courier_detail(
        &self,
        caller: &Account,
        courier_ref: &str,
    ) -> Result<CourierTransaction, CourierError> {
        let courier = self.find_courier(courier_ref).await?;
        require_visible(caller, &courier)?;
        Ok(courier)
    }

    pub async fn pending_couriers(
        &self,
        caller: &Account,
    ) -> Result<Vec<CourierTransaction>, CourierError> {
        self.courier_history(caller, Some(CourierStatus::InTransit))
            .await
    }

    pub async fn courier_history(
        &self,
        caller: &Account,
        status: Option<CourierStatus>,
    ) -> Result<Vec<CourierTransaction>, CourierError> {
        self.store
            .list_couriers(
                &CourierFilter::all()
                    .with_status(status)
                    .for_recipient(caller.id),
            )
            .await
    }

    /// Archived receipt text of a courier.
    pub async fn courier_document(
        &self,
        caller: &Account,
        courier_ref: &str,
    ) -> Result<(CourierTransaction, String), CourierError> {
        let courier = self.courier_detail(caller, courier_ref).await?;
        let reference = courier
            .document
            .clone()
            .ok_or_else(|| CourierError::not_found("document", courier.courier_id.clone()))?;
        let body = self
            .archive
            .load(&reference)
            .await?
            .ok_or_else(|| CourierError::not_found("document", reference.clone()))?;
        Ok((courier, body))
    }

    /// Resolve creator and recipient accounts for presentation.
    pub async fn describe(&self, courier: CourierTransaction) -> Result<CourierView, CourierError> {
        let created_by_info = match courier.created_by {
            Some(id) => self
                .store
                .get_account(id)
                .await?
                .as_ref()
                .map(AccountSummary::from),
            None => None,
        };
        let mut recipients_info = Vec::with_capacity(courier.recipients.len());
        for id in &courier.recipients {
            if let Some(account) = self.store.get_account(*id).await? {
                recipients_info.push(AccountSummary::from(&account));
            }
        }
        let total_amount = courier.total_amount();
        Ok(CourierView {
            courier,
            created_by_info,
            recipients_info,
            total_amount,
        })
    }

    pub async fn company_stock(
        &self,
        caller: &Account,
        query: &StockQuery,
    ) -> Result<Vec<CentralStockEntry>, CourierError> {
        require_staff(caller, "only staff accounts may view company stock")?;
        let stock = self.ledger.fetch_central_stock().await?;
        Ok(query.apply_central(stock))
    }

    pub async fn my_stock(
        &self,
        caller: &Account,
        query: &StockQuery,
    ) -> Result<Vec<TechnicianStockEntry>, CourierError> {
        let binding = self.store.get_binding_for_account(caller.id).await?;
        let identity = binding
            .as_ref()
            .and_then(TechnicianStockBinding::identity)
            .ok_or(CourierError::MissingBinding(caller.id))?;
        let stock = self.ledger.fetch_technician_stock(identity).await?;
        query.apply_technician(stock)
    }

    /// Non-staff accounts ordered by username.
    pub async fn technicians(&self, caller: &Account) -> Result<Vec<Account>, CourierError> {
        require_staff(caller, "only staff accounts may list technicians")?;
        self.technician_accounts().await
    }

    async fn technician_accounts(&self) -> Result<Vec<Account>, CourierError> {
        Ok(self
            .store
            .list_accounts()
            .await?
            .into_iter()
            .filter(|account| !account.is_staff)
            .collect())
    }

    pub async fn binding_overview(&self, caller: &Account) -> Result<BindingOverview, CourierError> {
        require_staff(caller, "only staff accounts may manage stock bindings")?;
        let technicians = self
            .technician_accounts()
            .await?
            .iter()
            .map(AccountSummary::from)
            .collect();
        let bindings = self.store.list_bindings().await?;
        Ok(BindingOverview {
            technicians,
            bindings,
        })
    }

    pub async fn register_binding(
        &self,
        caller: &Account,
        binding: NewBinding,
    ) -> Result<TechnicianStockBinding, CourierError> {
        require_staff(caller, "only staff accounts may manage stock bindings")?;
        self.account(binding.account_id).await?;

        let stored = self
            .store
            .insert_binding(NewBinding {
                account_id: binding.account_id,
                sheet_identity: non_blank(binding.sheet_identity),
                sheet_id: non_blank(binding.sheet_id),
            })
            .await?;
        info!(
            account_id = stored.account_id,
            sheet_identity = stored.sheet_identity.as_deref().unwrap_or(""),
            "technician stock binding registered"
        );
        Ok(stored)
    }

    /// Every technician with its bound sheet identity, if any.
    pub async fn mapping_report(&self) -> Result<Vec<MappingLine>, CourierError> {
        let bindings = self.store.list_bindings().await?;
        Ok(self
            .technician_accounts()
            .await?
            .into_iter()
            .map(|account| MappingLine {
                sheet_identity: bindings
                    .iter()
                    .find(|binding| binding.account_id == account.id)
                    .and_then(|binding| binding.identity().map(str::to_string)),
                account_id: account.id,
                username: account.username,
            })
            .collect())
    }
}

/// `COURIER-` followed by eight random uppercase hex digits.
pub fn generate_courier_id() -> String {
    format!("COURIER-{:08X}", rand::random::<u32>())
}

fn require_staff(caller: &Account, message: &str) -> Result<(), CourierError> {
    if caller.is_staff {
        Ok(())
    } else {
        Err(CourierError::Forbidden(message.to_string()))
    }
}

fn require_visible(caller: &Account, courier: &CourierTransaction) -> Result<(), CourierError> {
    if caller.is_staff || courier.is_recipient(caller.id) {
        Ok(())
    } else {
        Err(CourierError::Forbidden(format!(
            "account {} may not view courier '{}'",
            caller.id, courier.courier_id
        )))
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn snapshot_item(line: &DispatchLine, catalogue: Option<&CentralStockEntry>) -> CourierItem {
    let spare_id = line.spare_id.trim().to_string();
    let name = line
        .name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .or_else(|| catalogue.map(|entry| entry.name.clone()))
        .unwrap_or_default();
    let mrp = line
        .mrp
        .filter(|mrp| mrp.is_finite())
        .or_else(|| catalogue.map(|entry| entry.mrp))
        .unwrap_or(0.0);
    CourierItem {
        spare_id,
        name,
        qty: line.qty,
        mrp,
        brand: catalogue.map(|entry| entry.brand.clone()).unwrap_or_default(),
        hsn: catalogue.map(|entry| entry.hsn.clone()).unwrap_or_default(),
    }
}

/// Validate received entries against the dispatch. Entries naming the same spare are
/// merged at the position of their first appearance.
fn receipt_plan(
    courier: &CourierTransaction,
    received: &[ReceivedItem],
) -> Result<Vec<(String, u64)>, CourierError> {
    if received.is_empty() {
        return Err(CourierError::EmptySelection);
    }

    let mut plan: Vec<(String, u64)> = Vec::new();
    for entry in received {
        let spare_id = entry.spare_id.trim();
        let dispatched = courier
            .dispatched_qty(spare_id)
            .ok_or_else(|| CourierError::UnknownItem(spare_id.to_string()))?;
        if entry.qty == 0 {
            return Err(CourierError::InvalidQuantity {
                spare_id: spare_id.to_string(),
            });
        }

        let total = match plan.iter_mut().find(|(id, _)| id == spare_id) {
            Some((_, qty)) => {
                *qty += u64::from(entry.qty);
                *qty
            }
            None => {
                plan.push((spare_id.to_string(), u64::from(entry.qty)));
                u64::from(entry.qty)
            }
        };
        if total > dispatched {
            return Err(CourierError::QuantityExceeded {
                spare_id: spare_id.to_string(),
                dispatched,
                requested: total,
            });
        }
    }
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::MemoryReceiptArchive;
    use crate::rowstore::{MemoryRowStore, RowStore, RowStoreError};
    use crate::stock::tests::{central_row, tech_row};
    use crate::stock::{central_columns, technician_columns};
    use crate::storage::MemoryCourierStore;
    use async_trait::async_trait;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    const ADMIN: i64 = 1;
    const AMAL: i64 = 7;
    const ARUN: i64 = 8;
    const NOBIND: i64 = 9;

    /// Technician tab whose appends can be made to fail.
    struct FlakyRowStore {
        inner: MemoryRowStore,
        fail_appends: AtomicBool,
    }

    #[async_trait]
    impl RowStore for FlakyRowStore {
        fn label(&self) -> String {
            self.inner.label()
        }

        async fn read_all_rows(&self) -> Result<Vec<Vec<String>>, RowStoreError> {
            self.inner.read_all_rows().await
        }

        async fn find_row(
            &self,
            column: usize,
            value: &str,
        ) -> Result<Option<usize>, RowStoreError> {
            self.inner.find_row(column, value).await
        }

        async fn read_cell(&self, row: usize, column: usize) -> Result<String, RowStoreError> {
            self.inner.read_cell(row, column).await
        }

        async fn write_cell(
            &self,
            row: usize,
            column: usize,
            value: &str,
        ) -> Result<(), RowStoreError> {
            self.inner.write_cell(row, column, value).await
        }

        async fn append_row(&self, values: Vec<String>) -> Result<(), RowStoreError> {
            if self.fail_appends.load(Ordering::SeqCst) {
                return Err(RowStoreError::Transport("connection reset".to_string()));
            }
            self.inner.append_row(values).await
        }
    }

    struct Fixture {
        workflow: CourierWorkflow,
        store: Arc<MemoryCourierStore>,
        central: Arc<MemoryRowStore>,
        technician: Arc<FlakyRowStore>,
        archive: Arc<MemoryReceiptArchive>,
    }

    impl Fixture {
        async fn account(&self, id: i64) -> Account {
            self.workflow.account(id).await.unwrap()
        }

        async fn central_qty(&self, spare_id: &str) -> String {
            let row = self
                .central
                .find_row(central_columns::SPARE_CODE, spare_id)
                .await
                .unwrap()
                .unwrap();
            self.central
                .read_cell(row, central_columns::QUANTITY)
                .await
                .unwrap()
        }

        async fn technician_rows(&self) -> Vec<Vec<String>> {
            self.technician.inner.snapshot().await
        }
    }

    async fn fixture(central: Vec<Vec<String>>) -> Fixture {
        let store = Arc::new(MemoryCourierStore::new());
        store
            .upsert_account(Account::new(ADMIN, "ops").with_name("Office", "Desk").staff())
            .await
            .unwrap();
        store
            .upsert_account(Account::new(AMAL, "amal").with_name("Amal", "K"))
            .await
            .unwrap();
        store.upsert_account(Account::new(ARUN, "arun")).await.unwrap();
        store.upsert_account(Account::new(NOBIND, "new.hire")).await.unwrap();
        for (account_id, identity) in [(AMAL, "Amal K"), (ARUN, "arun")] {
            store
                .insert_binding(NewBinding {
                    account_id,
                    sheet_identity: Some(identity.to_string()),
                    sheet_id: None,
                })
                .await
                .unwrap();
        }

        let central = Arc::new(MemoryRowStore::with_rows(
            "Mrp List",
            &central_columns::HEADER,
            central,
        ));
        let technician = Arc::new(FlakyRowStore {
            inner: MemoryRowStore::with_rows(
                "Technician Stocks",
                &technician_columns::HEADER,
                vec![tech_row("Fan motor", "A1", "1", "amal k")],
            ),
            fail_appends: AtomicBool::new(false),
        });
        let archive = Arc::new(MemoryReceiptArchive::new());
        let ledger = Arc::new(StockLedger::new(central.clone(), technician.clone()));

        Fixture {
            workflow: CourierWorkflow::new(store.clone(), ledger, archive.clone()),
            store,
            central,
            technician,
            archive,
        }
    }

    fn default_stock() -> Vec<Vec<String>> {
        vec![
            central_row("A1", "Fan motor", "250", "10"),
            central_row("B2", "Capacitor", "40", "5"),
        ]
    }

    fn request(recipients: Vec<i64>, items: Vec<DispatchLine>) -> CreateCourier {
        CreateCourier {
            recipient_ids: recipients,
            items,
            notes: " fragile ".to_string(),
        }
    }

    #[tokio::test]
    async fn creation_fails_when_total_for_all_recipients_exceeds_stock() {
        let fx = fixture(vec![central_row("A1", "Fan motor", "250", "3")]).await;
        let admin = fx.account(ADMIN).await;

        let err = fx
            .workflow
            .create_courier(&admin, request(vec![AMAL, ARUN], vec![DispatchLine::new("A1", 2)]))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            CourierError::InsufficientStock {
                ref spare_id,
                available: 3,
                requested: 4,
            } if spare_id == "A1"
        ));
        assert!(fx.store.list_couriers(&CourierFilter::all()).await.unwrap().is_empty());
        assert_eq!(fx.central_qty("A1").await, "3");
    }

    #[tokio::test]
    async fn creation_validates_caller_recipients_and_items() {
        let fx = fixture(default_stock()).await;
        let admin = fx.account(ADMIN).await;
        let amal = fx.account(AMAL).await;

        let items = vec![DispatchLine::new("A1", 1)];
        assert!(matches!(
            fx.workflow.create_courier(&amal, request(vec![ARUN], items.clone())).await,
            Err(CourierError::Forbidden(_))
        ));
        assert!(matches!(
            fx.workflow.create_courier(&admin, request(vec![], items.clone())).await,
            Err(CourierError::UnknownRecipient(_))
        ));
        assert!(matches!(
            fx.workflow.create_courier(&admin, request(vec![AMAL, 404], items.clone())).await,
            Err(CourierError::UnknownRecipient(ids)) if ids == "404"
        ));
        assert!(matches!(
            fx.workflow.create_courier(&admin, request(vec![AMAL], vec![])).await,
            Err(CourierError::EmptyItems)
        ));
        assert!(matches!(
            fx.workflow
                .create_courier(&admin, request(vec![AMAL], vec![DispatchLine::new("A1", 0)]))
                .await,
            Err(CourierError::InvalidQuantity { .. })
        ));
        assert!(matches!(
            fx.workflow
                .create_courier(&admin, request(vec![AMAL], vec![DispatchLine::new("Z9", 1)]))
                .await,
            Err(CourierError::UnknownSpare(id)) if id == "Z9"
        ));
    }

    #[tokio::test]
    async fn creation_persists_snapshot_and_receipt_without_touching_ledgers() {
        let fx = fixture(default_stock()).await;
        let admin = fx.account(ADMIN).await;

        let courier = fx
            .workflow
            .create_courier(
                &admin,
                request(
                    vec![ARUN, AMAL, AMAL],
                    vec![
                        DispatchLine::new("A1", 2),
                        DispatchLine {
                            name: Some("Run capacitor".to_string()),
                            mrp: Some(45.0),
                            ..DispatchLine::new("B2", 1)
                        },
                    ],
                ),
            )
            .await
            .unwrap();

        assert!(courier.courier_id.starts_with("COURIER-"));
        assert_eq!(courier.courier_id.len(), "COURIER-".len() + 8);
        assert_eq!(courier.status, CourierStatus::InTransit);
        assert_eq!(courier.recipients, vec![AMAL, ARUN]);
        assert_eq!(courier.notes, "fragile");
        assert!(courier.received_time.is_none());
        assert_eq!(courier.items[0].name, "Fan motor");
        assert_eq!(courier.items[0].mrp, 250.0);
        assert_eq!(courier.items[0].brand, "Acme");
        assert_eq!(courier.items[1].name, "Run capacitor");
        assert_eq!(courier.total_amount(), 545.0);

        let reference = courier.document.clone().unwrap();
        assert_eq!(reference, format!("couriers/{}.txt", courier.courier_id));
        assert_eq!(fx.archive.len().await, 1);
        let (_, body) = fx
            .workflow
            .courier_document(&admin, &courier.courier_id)
            .await
            .unwrap();
        assert!(body.contains("Recipients : Amal K, arun"));

        assert_eq!(fx.central_qty("A1").await, "10");
        assert_eq!(fx.technician_rows().await.len(), 2);
    }

    #[tokio::test]
    async fn round_trip_debits_received_share_only() {
        let fx = fixture(vec![central_row("A1", "Fan motor", "250", "4")]).await;
        let admin = fx.account(ADMIN).await;
        let amal = fx.account(AMAL).await;
        let arun = fx.account(ARUN).await;

        let courier = fx
            .workflow
            .create_courier(&admin, request(vec![AMAL, ARUN], vec![DispatchLine::new("A1", 2)]))
            .await
            .unwrap();

        let pending = fx.workflow.pending_couriers(&amal).await.unwrap();
        assert_eq!(pending.len(), 1);

        let received = fx
            .workflow
            .confirm_receipt(&courier.courier_id, &amal, &[ReceivedItem::new("A1", 2)])
            .await
            .unwrap();

        assert_eq!(received.status, CourierStatus::Received);
        assert!(received.received_time.is_some());
        assert_eq!(fx.central_qty("A1").await, "2");
        let rows = fx.technician_rows().await;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1][2], "3");

        let binding = fx.store.get_binding_for_account(AMAL).await.unwrap().unwrap();
        assert!(binding.last_sync.is_some());

        // Closed for every recipient; the other share is forfeited.
        assert!(matches!(
            fx.workflow
                .confirm_receipt(&courier.courier_id, &arun, &[ReceivedItem::new("A1", 2)])
                .await,
            Err(CourierError::AlreadyReceived(_))
        ));
        assert_eq!(fx.central_qty("A1").await, "2");
        assert!(fx.workflow.pending_couriers(&amal).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn second_confirmation_is_rejected_without_mutation() {
        let fx = fixture(default_stock()).await;
        let admin = fx.account(ADMIN).await;
        let amal = fx.account(AMAL).await;

        let courier = fx
            .workflow
            .create_courier(&admin, request(vec![AMAL], vec![DispatchLine::new("B2", 2)]))
            .await
            .unwrap();
        fx.workflow
            .confirm_receipt(&courier.courier_id, &amal, &[ReceivedItem::new("B2", 2)])
            .await
            .unwrap();
        let central_before = fx.central.snapshot().await;
        let technician_before = fx.technician_rows().await;

        let err = fx
            .workflow
            .confirm_receipt(&courier.id.to_string(), &amal, &[ReceivedItem::new("B2", 2)])
            .await
            .unwrap_err();

        assert!(matches!(err, CourierError::AlreadyReceived(_)));
        assert_eq!(fx.central.snapshot().await, central_before);
        assert_eq!(fx.technician_rows().await, technician_before);
    }

    #[tokio::test]
    async fn confirmation_checks_run_in_order() {
        let fx = fixture(default_stock()).await;
        let admin = fx.account(ADMIN).await;
        let amal = fx.account(AMAL).await;
        let arun = fx.account(ARUN).await;

        let courier = fx
            .workflow
            .create_courier(
                &admin,
                request(vec![AMAL], vec![DispatchLine::new("A1", 2), DispatchLine::new("A1", 1)]),
            )
            .await
            .unwrap();
        let code = courier.courier_id.as_str();

        assert!(matches!(
            fx.workflow.confirm_receipt("COURIER-MISSING", &amal, &[]).await,
            Err(CourierError::NotFound { .. })
        ));
        assert!(matches!(
            fx.workflow.confirm_receipt(code, &arun, &[]).await,
            Err(CourierError::Forbidden(_))
        ));
        assert!(matches!(
            fx.workflow.confirm_receipt(code, &amal, &[]).await,
            Err(CourierError::EmptySelection)
        ));
        assert!(matches!(
            fx.workflow
                .confirm_receipt(code, &amal, &[ReceivedItem::new("A1", 0)])
                .await,
            Err(CourierError::InvalidQuantity { .. })
        ));
        // Dispatch repeated A1 for a total of 3; two entries of 2 exceed it.
        assert!(matches!(
            fx.workflow
                .confirm_receipt(
                    code,
                    &amal,
                    &[ReceivedItem::new("A1", 2), ReceivedItem::new("A1", 2)]
                )
                .await,
            Err(CourierError::QuantityExceeded {
                dispatched: 3,
                requested: 4,
                ..
            })
        ));
        assert_eq!(fx.central_qty("A1").await, "10");
    }

    #[tokio::test]
    async fn unknown_item_leaves_courier_in_transit() {
        let fx = fixture(default_stock()).await;
        let admin = fx.account(ADMIN).await;
        let amal = fx.account(AMAL).await;

        let courier = fx
            .workflow
            .create_courier(&admin, request(vec![AMAL], vec![DispatchLine::new("A1", 1)]))
            .await
            .unwrap();

        let err = fx
            .workflow
            .confirm_receipt(
                &courier.courier_id,
                &amal,
                &[ReceivedItem::new("A1", 1), ReceivedItem::new("B2", 1)],
            )
            .await
            .unwrap_err();

        assert!(matches!(err, CourierError::UnknownItem(id) if id == "B2"));
        let stored = fx.store.get_courier(courier.id).await.unwrap().unwrap();
        assert_eq!(stored.status, CourierStatus::InTransit);
        assert_eq!(fx.central_qty("A1").await, "10");
    }

    #[tokio::test]
    async fn missing_binding_blocks_confirmation_without_mutation() {
        let fx = fixture(default_stock()).await;
        let admin = fx.account(ADMIN).await;
        let newbie = fx.account(NOBIND).await;

        let courier = fx
            .workflow
            .create_courier(&admin, request(vec![NOBIND], vec![DispatchLine::new("A1", 1)]))
            .await
            .unwrap();
        let central_before = fx.central.snapshot().await;

        let err = fx
            .workflow
            .confirm_receipt(&courier.courier_id, &newbie, &[ReceivedItem::new("A1", 1)])
            .await
            .unwrap_err();

        assert!(matches!(err, CourierError::MissingBinding(NOBIND)));
        assert_eq!(fx.central.snapshot().await, central_before);
        assert_eq!(fx.technician_rows().await.len(), 2);
        assert!(matches!(
            fx.workflow.my_stock(&newbie, &StockQuery::default()).await,
            Err(CourierError::MissingBinding(NOBIND))
        ));
    }

    #[tokio::test]
    async fn debits_equal_credits_per_spare() {
        let fx = fixture(default_stock()).await;
        let admin = fx.account(ADMIN).await;
        let arun = fx.account(ARUN).await;

        let courier = fx
            .workflow
            .create_courier(
                &admin,
                request(vec![ARUN], vec![DispatchLine::new("A1", 3), DispatchLine::new("B2", 2)]),
            )
            .await
            .unwrap();
        fx.workflow
            .confirm_receipt(
                &courier.courier_id,
                &arun,
                &[ReceivedItem::new("B2", 1), ReceivedItem::new("A1", 3), ReceivedItem::new("B2", 1)],
            )
            .await
            .unwrap();

        let movements = fx.store.list_movements(courier.id).await.unwrap();
        for spare in ["A1", "B2"] {
            let sum = |leg: MovementLeg| {
                movements
                    .iter()
                    .filter(|m| m.spare_id == spare && m.leg == leg)
                    .map(|m| m.qty)
                    .sum::<u64>()
            };
            assert_eq!(sum(MovementLeg::Debit), sum(MovementLeg::Credit));
        }
        // B2 entries are coalesced at their first position.
        assert_eq!(movements[0].spare_id, "B2");
        assert_eq!(movements[0].qty, 2);

        assert_eq!(fx.central_qty("A1").await, "7");
        assert_eq!(fx.central_qty("B2").await, "3");
        let stock = fx
            .workflow
            .my_stock(&arun, &StockQuery::default())
            .await
            .unwrap();
        let qty = |spare: &str| stock.iter().find(|e| e.spare_id == spare).map(|e| e.qty);
        assert_eq!(qty("A1"), Some(3));
        assert_eq!(qty("B2"), Some(2));
    }

    #[tokio::test]
    async fn failed_confirmation_retries_without_double_applying() {
        let fx = fixture(default_stock()).await;
        let admin = fx.account(ADMIN).await;
        let amal = fx.account(AMAL).await;

        let courier = fx
            .workflow
            .create_courier(
                &admin,
                request(vec![AMAL], vec![DispatchLine::new("A1", 2), DispatchLine::new("B2", 1)]),
            )
            .await
            .unwrap();
        let items = [ReceivedItem::new("A1", 2), ReceivedItem::new("B2", 1)];

        // B2 needs a new technician row, which fails after its central debit.
        fx.technician.fail_appends.store(true, Ordering::SeqCst);
        let err = fx
            .workflow
            .confirm_receipt(&courier.courier_id, &amal, &items)
            .await
            .unwrap_err();
        assert!(matches!(err, CourierError::ExternalStore(_)));
        assert_eq!(fx.central_qty("A1").await, "8");
        assert_eq!(fx.central_qty("B2").await, "4");
        let stored = fx.store.get_courier(courier.id).await.unwrap().unwrap();
        assert_eq!(stored.status, CourierStatus::InTransit);

        // A retry with a different quantity for an applied leg is refused.
        fx.technician.fail_appends.store(false, Ordering::SeqCst);
        assert!(matches!(
            fx.workflow
                .confirm_receipt(&courier.courier_id, &amal, &[ReceivedItem::new("A1", 1)])
                .await,
            Err(CourierError::StateConflict(_))
        ));

        let received = fx
            .workflow
            .confirm_receipt(&courier.courier_id, &amal, &items)
            .await
            .unwrap();
        assert_eq!(received.status, CourierStatus::Received);
        assert_eq!(fx.central_qty("A1").await, "8");
        assert_eq!(fx.central_qty("B2").await, "4");

        let rows = fx.technician_rows().await;
        assert_eq!(rows[1][2], "3");
        assert_eq!(rows[2], tech_row("Capacitor", "B2", "1", "amal k"));
        assert_eq!(fx.store.list_movements(courier.id).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn narrower_retry_still_credits_spares_debited_earlier() {
        let fx = fixture(default_stock()).await;
        let admin = fx.account(ADMIN).await;
        let amal = fx.account(AMAL).await;

        let courier = fx
            .workflow
            .create_courier(
                &admin,
                request(vec![AMAL], vec![DispatchLine::new("A1", 2), DispatchLine::new("B2", 1)]),
            )
            .await
            .unwrap();

        fx.technician.fail_appends.store(true, Ordering::SeqCst);
        assert!(matches!(
            fx.workflow
                .confirm_receipt(
                    &courier.courier_id,
                    &amal,
                    &[ReceivedItem::new("A1", 2), ReceivedItem::new("B2", 1)],
                )
                .await,
            Err(CourierError::ExternalStore(_))
        ));

        // The retry leaves B2 out, but its central debit is already journaled.
        fx.technician.fail_appends.store(false, Ordering::SeqCst);
        let received = fx
            .workflow
            .confirm_receipt(&courier.courier_id, &amal, &[ReceivedItem::new("A1", 2)])
            .await
            .unwrap();
        assert_eq!(received.status, CourierStatus::Received);
        assert_eq!(fx.central_qty("A1").await, "8");
        assert_eq!(fx.central_qty("B2").await, "4");

        let rows = fx.technician_rows().await;
        assert_eq!(rows[1][2], "3");
        assert_eq!(rows[2], tech_row("Capacitor", "B2", "1", "amal k"));

        let movements = fx.store.list_movements(courier.id).await.unwrap();
        assert_eq!(movements.len(), 4);
        for spare in ["A1", "B2"] {
            let total = |leg| {
                movements
                    .iter()
                    .filter(|m| m.spare_id == spare && m.leg == leg)
                    .map(|m| m.qty)
                    .sum::<u64>()
            };
            assert_eq!(total(MovementLeg::Debit), total(MovementLeg::Credit));
        }
    }

    #[tokio::test]
    async fn duplicate_catalogue_rows_validate_against_the_first() {
        let fx = fixture(vec![
            central_row("A1", "Fan motor", "250", "0"),
            central_row("A1", "Fan motor", "250", "10"),
        ])
        .await;
        let admin = fx.account(ADMIN).await;

        let err = fx
            .workflow
            .create_courier(&admin, request(vec![AMAL], vec![DispatchLine::new("A1", 5)]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CourierError::InsufficientStock {
                available: 0,
                requested: 5,
                ..
            }
        ));
        assert!(fx.store.list_couriers(&CourierFilter::all()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn read_side_enforces_visibility() {
        let fx = fixture(default_stock()).await;
        let admin = fx.account(ADMIN).await;
        let amal = fx.account(AMAL).await;
        let arun = fx.account(ARUN).await;

        let courier = fx
            .workflow
            .create_courier(&admin, request(vec![AMAL], vec![DispatchLine::new("A1", 1)]))
            .await
            .unwrap();

        assert!(fx.workflow.courier_detail(&amal, &courier.courier_id).await.is_ok());
        assert!(fx
            .workflow
            .courier_detail(&admin, &courier.id.to_string())
            .await
            .is_ok());
        assert!(matches!(
            fx.workflow.courier_detail(&arun, &courier.courier_id).await,
            Err(CourierError::Forbidden(_))
        ));
        assert!(matches!(
            fx.workflow.list_couriers(&amal, None).await,
            Err(CourierError::Forbidden(_))
        ));
        assert_eq!(
            fx.workflow
                .list_couriers(&admin, Some(CourierStatus::Received))
                .await
                .unwrap()
                .len(),
            0
        );
        assert!(fx.workflow.courier_history(&arun, None).await.unwrap().is_empty());

        let view = fx.workflow.describe(courier).await.unwrap();
        assert_eq!(view.created_by_info.unwrap().full_name, "Office Desk");
        assert_eq!(view.recipients_info[0].username, "amal");
        assert_eq!(view.total_amount, 250.0);
    }

    #[tokio::test]
    async fn binding_registration_and_mapping_report() {
        let fx = fixture(default_stock()).await;
        let admin = fx.account(ADMIN).await;
        let amal = fx.account(AMAL).await;

        let binding = NewBinding {
            account_id: NOBIND,
            sheet_identity: Some("  New Hire ".to_string()),
            sheet_id: Some(" ".to_string()),
        };
        assert!(matches!(
            fx.workflow.register_binding(&amal, binding.clone()).await,
            Err(CourierError::Forbidden(_))
        ));
        assert!(matches!(
            fx.workflow
                .register_binding(
                    &admin,
                    NewBinding {
                        account_id: 404,
                        ..binding.clone()
                    }
                )
                .await,
            Err(CourierError::NotFound { .. })
        ));

        let report = fx.workflow.mapping_report().await.unwrap();
        let newbie = report.iter().find(|line| line.account_id == NOBIND).unwrap();
        assert_eq!(newbie.sheet_identity, None);

        let stored = fx
            .workflow
            .register_binding(&admin, binding.clone())
            .await
            .unwrap();
        assert_eq!(stored.sheet_identity.as_deref(), Some("New Hire"));
        assert_eq!(stored.sheet_id, None);
        assert!(matches!(
            fx.workflow.register_binding(&admin, binding).await,
            Err(CourierError::BindingExists(NOBIND))
        ));

        let overview = fx.workflow.binding_overview(&admin).await.unwrap();
        assert_eq!(overview.technicians.len(), 3);
        assert_eq!(overview.bindings.len(), 3);

        let technicians = fx.workflow.technicians(&admin).await.unwrap();
        let names = technicians.iter().map(|a| a.username.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["amal", "arun", "new.hire"]);
    }

    #[tokio::test]
    async fn stock_views_apply_query() {
        let fx = fixture(default_stock()).await;
        let admin = fx.account(ADMIN).await;
        let amal = fx.account(AMAL).await;

        let query = StockQuery::from_params(Some("cap"), None, None).unwrap();
        let stock = fx.workflow.company_stock(&admin, &query).await.unwrap();
        assert_eq!(stock.len(), 1);
        assert_eq!(stock[0].spare_id, "B2");
        assert!(matches!(
            fx.workflow.company_stock(&amal, &query).await,
            Err(CourierError::Forbidden(_))
        ));

        let mine = fx
            .workflow
            .my_stock(&amal, &StockQuery::default())
            .await
            .unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].qty, 1);
    }

    #[test]
    fn courier_ids_are_prefixed_uppercase_hex() {
        let id = generate_courier_id();
        let suffix = id.strip_prefix("COURIER-").unwrap();
        assert_eq!(suffix.len(), 8);
        assert!(suffix
            .chars()
            .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c)));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn creation_fails_iff_some_spare_total_exceeds_stock(
            lines in prop::collection::vec((0usize..2, 1u32..6), 1..5),
            recipients in 1usize..4,
            stock_a in 0i64..40,
            stock_b in 0i64..40,
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let spares = ["A1", "B2"];
            let mut need = [0u64; 2];
            for (spare, qty) in &lines {
                need[*spare] += u64::from(*qty) * recipients as u64;
            }
            let expect_ok = need[0] as i64 <= stock_a && need[1] as i64 <= stock_b;

            let outcome = runtime.block_on(async {
                let fx = fixture(vec![
                    central_row("A1", "Fan motor", "250", &stock_a.to_string()),
                    central_row("B2", "Capacitor", "40", &stock_b.to_string()),
                ])
                .await;
                let admin = fx.account(ADMIN).await;
                let ids = [AMAL, ARUN, NOBIND][..recipients].to_vec();
                let items = lines
                    .iter()
                    .map(|(spare, qty)| DispatchLine::new(spares[*spare], *qty))
                    .collect();
                fx.workflow.create_courier(&admin, request(ids, items)).await
            });

            match outcome {
                Ok(courier) => {
                    prop_assert!(expect_ok);
                    for (idx, spare) in spares.iter().enumerate() {
                        let total = courier.dispatched_qty(spare).unwrap_or(0)
                            * courier.recipients.len() as u64;
                        prop_assert_eq!(total, need[idx]);
                    }
                }
                Err(CourierError::InsufficientStock { spare_id, requested, .. }) => {
                    prop_assert!(!expect_ok);
                    let idx = spares.iter().position(|s| *s == spare_id).unwrap();
                    prop_assert_eq!(requested, need[idx]);
                }
                Err(other) => prop_assert!(false, "unexpected error: {other}"),
            }
        }
    }
}
