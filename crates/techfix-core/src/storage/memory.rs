//! In-memory store implementation

use super::{CourierStore, StoreResult};
use crate::error::CourierError;
use crate::types::{
    Account, CourierFilter, CourierStatus, CourierTransaction, MovementLeg, NewBinding,
    NewCourier, ReceiptMovement, TechnicianStockBinding,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

type MovementKey = (i64, i64, String, MovementLeg);

#[derive(Debug, Default)]
struct State {
    accounts: HashMap<i64, Account>,
    bindings: Vec<TechnicianStockBinding>,
    couriers: Vec<CourierTransaction>,
    movements: Vec<ReceiptMovement>,
    movement_index: HashMap<MovementKey, usize>,
    next_binding_id: i64,
    next_courier_id: i64,
}

/// In-memory store for development and testing
#[derive(Debug, Default)]
pub struct MemoryCourierStore {
    state: RwLock<State>,
}

impl MemoryCourierStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CourierStore for MemoryCourierStore {
    fn backend_label(&self) -> &'static str {
        "memory"
    }

    async fn upsert_account(&self, account: Account) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state.accounts.insert(account.id, account);
        Ok(())
    }

    async fn get_account(&self, id: i64) -> StoreResult<Option<Account>> {
        Ok(self.state.read().await.accounts.get(&id).cloned())
    }

    async fn list_accounts(&self) -> StoreResult<Vec<Account>> {
        let state = self.state.read().await;
        let mut accounts = state.accounts.values().cloned().collect::<Vec<_>>();
        accounts.sort_by(|a, b| a.username.cmp(&b.username).then(a.id.cmp(&b.id)));
        Ok(accounts)
    }

    async fn get_binding_for_account(
        &self,
        account_id: i64,
    ) -> StoreResult<Option<TechnicianStockBinding>> {
        let state = self.state.read().await;
        Ok(state
            .bindings
            .iter()
            .find(|binding| binding.account_id == account_id)
            .cloned())
    }

    async fn list_bindings(&self) -> StoreResult<Vec<TechnicianStockBinding>> {
        Ok(self.state.read().await.bindings.clone())
    }

    async fn insert_binding(&self, binding: NewBinding) -> StoreResult<TechnicianStockBinding> {
        let mut state = self.state.write().await;
        if state
            .bindings
            .iter()
            .any(|existing| existing.account_id == binding.account_id)
        {
            return Err(CourierError::BindingExists(binding.account_id));
        }

        state.next_binding_id += 1;
        let stored = TechnicianStockBinding {
            id: state.next_binding_id,
            account_id: binding.account_id,
            sheet_identity: binding.sheet_identity,
            sheet_id: binding.sheet_id,
            last_sync: None,
        };
        state.bindings.push(stored.clone());
        Ok(stored)
    }

    async fn touch_binding_sync(&self, account_id: i64, at: DateTime<Utc>) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if let Some(binding) = state
            .bindings
            .iter_mut()
            .find(|binding| binding.account_id == account_id)
        {
            binding.last_sync = Some(at);
        }
        Ok(())
    }

    async fn insert_courier(&self, courier: NewCourier) -> StoreResult<CourierTransaction> {
        let mut state = self.state.write().await;
        if state
            .couriers
            .iter()
            .any(|existing| existing.courier_id == courier.courier_id)
        {
            return Err(CourierError::StateConflict(format!(
                "courier id '{}' already exists",
                courier.courier_id
            )));
        }

        state.next_courier_id += 1;
        let now = Utc::now();
        let stored = CourierTransaction {
            id: state.next_courier_id,
            courier_id: courier.courier_id,
            created_by: courier.created_by,
            recipients: courier.recipients,
            status: CourierStatus::InTransit,
            items: courier.items,
            notes: courier.notes,
            document: None,
            sent_time: courier.sent_time,
            received_time: None,
            created_at: now,
            updated_at: now,
        };
        state.couriers.push(stored.clone());
        Ok(stored)
    }

    async fn get_courier(&self, id: i64) -> StoreResult<Option<CourierTransaction>> {
        let state = self.state.read().await;
        Ok(state.couriers.iter().find(|c| c.id == id).cloned())
    }

    async fn get_courier_by_code(
        &self,
        courier_id: &str,
    ) -> StoreResult<Option<CourierTransaction>> {
        let state = self.state.read().await;
        Ok(state
            .couriers
            .iter()
            .find(|c| c.courier_id == courier_id)
            .cloned())
    }

    async fn list_couriers(&self, filter: &CourierFilter) -> StoreResult<Vec<CourierTransaction>> {
        let state = self.state.read().await;
        let mut couriers = state
            .couriers
            .iter()
            .filter(|courier| filter.matches(courier))
            .cloned()
            .collect::<Vec<_>>();
        couriers.sort_by(|a, b| b.sent_time.cmp(&a.sent_time).then(b.id.cmp(&a.id)));
        Ok(couriers)
    }

    async fn mark_received(&self, id: i64, at: DateTime<Utc>) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        match state
            .couriers
            .iter_mut()
            .find(|c| c.id == id && c.status == CourierStatus::InTransit)
        {
            Some(courier) => {
                courier.status = CourierStatus::Received;
                courier.received_time = Some(at);
                courier.updated_at = at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn attach_document(&self, id: i64, reference: &str) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let courier = state
            .couriers
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| CourierError::not_found("courier", id.to_string()))?;
        courier.document = Some(reference.to_string());
        courier.updated_at = Utc::now();
        Ok(())
    }

    async fn get_movement(
        &self,
        courier_pk: i64,
        recipient_id: i64,
        spare_id: &str,
        leg: MovementLeg,
    ) -> StoreResult<Option<ReceiptMovement>> {
        let state = self.state.read().await;
        let key = (courier_pk, recipient_id, spare_id.to_string(), leg);
        Ok(state
            .movement_index
            .get(&key)
            .and_then(|idx| state.movements.get(*idx))
            .cloned())
    }

    async fn record_movement(&self, movement: ReceiptMovement) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let key = (
            movement.courier_pk,
            movement.recipient_id,
            movement.spare_id.clone(),
            movement.leg,
        );
        if state.movement_index.contains_key(&key) {
            return Ok(());
        }
        let idx = state.movements.len();
        state.movements.push(movement);
        state.movement_index.insert(key, idx);
        Ok(())
    }

    async fn list_movements(&self, courier_pk: i64) -> StoreResult<Vec<ReceiptMovement>> {
        let state = self.state.read().await;
        Ok(state
            .movements
            .iter()
            .filter(|movement| movement.courier_pk == courier_pk)
            .cloned()
            .collect())
    }
}
