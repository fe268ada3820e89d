use crate::rowstore::RowStoreError;
use thiserror::Error;

/// Broad error classes surfaced at the operation boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    Authorization,
    NotFound,
    InsufficientStock,
    ExternalStore,
    StateConflict,
    Storage,
}

/// Courier workflow errors.
#[derive(Debug, Error)]
pub enum CourierError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("No items supplied for dispatch")]
    EmptyItems,

    #[error("Unknown recipient account(s): {0}")]
    UnknownRecipient(String),

    #[error("Spare '{0}' not found in company stock")]
    UnknownSpare(String),

    #[error("Quantity for '{spare_id}' must be greater than zero")]
    InvalidQuantity { spare_id: String },

    #[error("Insufficient stock for '{spare_id}'. Available: {available}, Requested: {requested}")]
    InsufficientStock {
        spare_id: String,
        available: i64,
        requested: u64,
    },

    #[error("No items selected for receiving")]
    EmptySelection,

    #[error("Item '{0}' not found in courier")]
    UnknownItem(String),

    #[error("Quantity for '{spare_id}' exceeds courier quantity (dispatched {dispatched}, requested {requested})")]
    QuantityExceeded {
        spare_id: String,
        dispatched: u64,
        requested: u64,
    },

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Technician stock binding not configured for account {0}")]
    MissingBinding(i64),

    #[error("Stock binding already exists for account {0}")]
    BindingExists(i64),

    #[error("Courier '{0}' already marked as received")]
    AlreadyReceived(String),

    #[error("State conflict: {0}")]
    StateConflict(String),

    #[error("Row-store error: {0}")]
    ExternalStore(#[from] RowStoreError),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl CourierError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn storage(context: &str, err: impl std::fmt::Display) -> Self {
        Self::Storage(format!("{context}: {err}"))
    }

    pub fn transition_violation(from: &str, to: &str) -> Self {
        Self::StateConflict(format!(
            "courier status cannot move from '{}' to '{}'",
            from, to
        ))
    }

    /// Machine-readable error kind carried in API payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "ValidationError",
            Self::EmptyItems => "EmptyItems",
            Self::UnknownRecipient(_) => "UnknownRecipient",
            Self::UnknownSpare(_) => "UnknownSpare",
            Self::InvalidQuantity { .. } => "InvalidQuantity",
            Self::InsufficientStock { .. } => "InsufficientStock",
            Self::EmptySelection => "EmptySelection",
            Self::UnknownItem(_) => "UnknownItem",
            Self::QuantityExceeded { .. } => "QuantityExceeded",
            Self::Forbidden(_) => "Forbidden",
            Self::NotFound { .. } => "NotFound",
            Self::MissingBinding(_) => "MissingBinding",
            Self::BindingExists(_) => "BindingExists",
            Self::AlreadyReceived(_) => "AlreadyReceived",
            Self::StateConflict(_) => "StateConflict",
            Self::ExternalStore(_) => "ExternalStoreError",
            Self::Storage(_) => "StorageError",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation(_)
            | Self::EmptyItems
            | Self::UnknownRecipient(_)
            | Self::UnknownSpare(_)
            | Self::InvalidQuantity { .. }
            | Self::EmptySelection
            | Self::UnknownItem(_)
            | Self::QuantityExceeded { .. }
            | Self::BindingExists(_) => ErrorCategory::Validation,
            Self::InsufficientStock { .. } => ErrorCategory::InsufficientStock,
            Self::Forbidden(_) => ErrorCategory::Authorization,
            Self::NotFound { .. } | Self::MissingBinding(_) => ErrorCategory::NotFound,
            Self::AlreadyReceived(_) | Self::StateConflict(_) => ErrorCategory::StateConflict,
            Self::ExternalStore(_) => ErrorCategory::ExternalStore,
            Self::Storage(_) => ErrorCategory::Storage,
        }
    }

    /// Structured details for shortfall errors, if any.
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::InsufficientStock {
                spare_id,
                available,
                requested,
            } => Some(serde_json::json!({
                "spare_id": spare_id,
                "available": available,
                "requested": requested,
            })),
            Self::QuantityExceeded {
                spare_id,
                dispatched,
                requested,
            } => Some(serde_json::json!({
                "spare_id": spare_id,
                "dispatched": dispatched,
                "requested": requested,
            })),
            _ => None,
        }
    }
}
