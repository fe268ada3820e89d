use crate::error::CourierError;
use crate::types::CourierStatus;

/// Forward-only courier status machine.
///
/// `in_transit -> received` is the only legal move and it happens once.
#[derive(Debug, Clone)]
pub struct CourierLifecycle {
    courier_id: String,
    status: CourierStatus,
}

impl CourierLifecycle {
    pub fn new(courier_id: impl Into<String>) -> Self {
        Self::resume(courier_id, CourierStatus::InTransit)
    }

    pub fn resume(courier_id: impl Into<String>, status: CourierStatus) -> Self {
        Self {
            courier_id: courier_id.into(),
            status,
        }
    }

    pub fn courier_id(&self) -> &str {
        &self.courier_id
    }

    pub fn status(&self) -> CourierStatus {
        self.status
    }

    pub fn is_open(&self) -> bool {
        self.status == CourierStatus::InTransit
    }

    /// Guard checked before any ledger movement of a confirmation.
    pub fn ensure_receivable(&self) -> Result<(), CourierError> {
        match self.status {
            CourierStatus::InTransit => Ok(()),
            CourierStatus::Received => Err(CourierError::AlreadyReceived(self.courier_id.clone())),
        }
    }

    pub fn mark_received(&mut self) -> Result<(), CourierError> {
        self.advance(CourierStatus::InTransit, CourierStatus::Received)
    }

    fn advance(
        &mut self,
        expected_current: CourierStatus,
        next: CourierStatus,
    ) -> Result<(), CourierError> {
        if self.status != expected_current {
            return Err(CourierError::transition_violation(
                self.status.as_str(),
                next.as_str(),
            ));
        }
        self.status = next;
        Ok(())
    }
}
