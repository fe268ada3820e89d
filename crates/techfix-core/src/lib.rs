//! Techfix courier core.
//!
//! Moves spare-part stock from the central warehouse to field technicians through
//! courier transactions: dispatch is recorded relationally, and quantities move on
//! the row-store ledgers only when a recipient confirms receipt.

#![deny(unsafe_code)]

pub mod document;
pub mod error;
pub mod flow;
pub mod query;
pub mod rowstore;
pub mod stock;
pub mod storage;
pub mod types;
pub mod workflow;

pub use document::{
    render_receipt, ArchiveError, FsReceiptArchive, MemoryReceiptArchive, ReceiptArchive,
};
pub use error::{CourierError, ErrorCategory};
pub use flow::CourierLifecycle;
pub use query::{SortField, SortOrder, StockQuery};
pub use rowstore::{column_letter, MemoryRowStore, RowStore, RowStoreError};
pub use stock::{normalize_identity, parse_price, parse_quantity, StockLedger};
pub use storage::{
    CourierStore, MemoryCourierStore, PostgresCourierStore, StoreConfig, StoreResult,
};
pub use types::{
    Account, CentralStockEntry, CourierFilter, CourierItem, CourierStatus, CourierTransaction,
    MovementLeg, NewBinding, NewCourier, ReceiptMovement, ReceivedItem, TechnicianStockBinding,
    TechnicianStockEntry,
};
pub use workflow::{
    generate_courier_id, AccountSummary, BindingOverview, CourierView, CourierWorkflow,
    CreateCourier, DispatchLine, MappingLine,
};
