use crate::error::CourierError;
use crate::rowstore::RowStore;
use crate::types::{CentralStockEntry, TechnicianStockEntry};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

/// Central ("Mrp List") tab: S.No | Spare Code | Description | MRP | HSN | Brand | Quantity
pub mod central_columns {
    pub const SPARE_CODE: usize = 2;
    pub const DESCRIPTION: usize = 3;
    pub const MRP: usize = 4;
    pub const HSN: usize = 5;
    pub const BRAND: usize = 6;
    pub const QUANTITY: usize = 7;

    pub const HEADER: [&str; 7] = [
        "S.No",
        "Spare Code",
        "Description",
        "MRP",
        "HSN",
        "Brand",
        "Quantity",
    ];
}

/// Technician tab: Product | Spare Code | Quantity | Technician name
pub mod technician_columns {
    pub const PRODUCT: usize = 1;
    pub const SPARE_CODE: usize = 2;
    pub const QUANTITY: usize = 3;
    pub const TECHNICIAN: usize = 4;

    pub const HEADER: [&str; 4] = ["Product", "Spare Code", "Quantity", "Technician name"];
}

/// Parse a quantity cell. Blank, `#N/A` and non-numeric cells read as zero;
/// fractional values truncate toward zero.
pub fn parse_quantity(raw: &str) -> i64 {
    let value = parse_number(raw);
    if value.is_finite() {
        value.trunc() as i64
    } else {
        0
    }
}

/// Parse a price cell with the same tolerance as [`parse_quantity`].
pub fn parse_price(raw: &str) -> f64 {
    let value = parse_number(raw);
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

fn parse_number(raw: &str) -> f64 {
    let cleaned = raw.trim().replace(',', "");
    if cleaned.is_empty() || cleaned == "#N/A" {
        return 0.0;
    }
    cleaned.parse::<f64>().unwrap_or(0.0)
}

/// Canonical form of a technician identity: trimmed, lowercase, single spaces.
pub fn normalize_identity(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn cell(row: &[String], column: usize) -> &str {
    row.get(column - 1).map(|value| value.trim()).unwrap_or("")
}

/// Per-key async mutexes serialising read-modify-write cycles within this process.
///
/// An entry lives only while some caller holds or waits on its key.
#[derive(Debug, Default)]
pub(crate) struct KeyedLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyedLocks {
    pub(crate) async fn acquire(&self, key: String) -> KeyedGuard<'_> {
        let lock = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.lock_owned().await;
        KeyedGuard {
            locks: &self.locks,
            key,
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.len()
    }
}

/// Held lock on one key; the map entry is dropped with the last holder.
pub(crate) struct KeyedGuard<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyedGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Waiters hold their own clone, so a count of one means only the map is left.
        self.locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Domain view over the central and technician stock tabs.
///
/// The row-store offers no compare-and-swap, so every mutation is a read-modify-write
/// over the network. Mutations on the same key are serialised in-process; writers in
/// other processes can still interleave.
pub struct StockLedger {
    central: Arc<dyn RowStore>,
    technician: Arc<dyn RowStore>,
    locks: KeyedLocks,
}

impl StockLedger {
    pub fn new(central: Arc<dyn RowStore>, technician: Arc<dyn RowStore>) -> Self {
        Self {
            central,
            technician,
            locks: KeyedLocks::default(),
        }
    }

    pub fn labels(&self) -> (String, String) {
        (self.central.label(), self.technician.label())
    }

    pub async fn fetch_central_stock(&self) -> Result<Vec<CentralStockEntry>, CourierError> {
        use central_columns::*;

        let rows = self.central.read_all_rows().await?;
        let stock = rows
            .iter()
            .skip(1)
            .filter(|row| !cell(row, SPARE_CODE).is_empty())
            .map(|row| CentralStockEntry {
                spare_id: cell(row, SPARE_CODE).to_string(),
                name: cell(row, DESCRIPTION).to_string(),
                mrp: parse_price(cell(row, MRP)),
                hsn: cell(row, HSN).to_string(),
                brand: cell(row, BRAND).to_string(),
                qty: parse_quantity(cell(row, QUANTITY)),
            })
            .collect::<Vec<_>>();

        debug!(
            store = %self.central.label(),
            count = stock.len(),
            "fetched central stock"
        );
        Ok(stock)
    }

    pub async fn fetch_technician_stock(
        &self,
        identity: &str,
    ) -> Result<Vec<TechnicianStockEntry>, CourierError> {
        use technician_columns::*;

        let wanted = normalize_identity(identity);
        let rows = self.technician.read_all_rows().await?;
        let stock = rows
            .iter()
            .skip(1)
            .filter(|row| !cell(row, SPARE_CODE).is_empty())
            .filter(|row| normalize_identity(cell(row, TECHNICIAN)) == wanted)
            .map(|row| TechnicianStockEntry {
                spare_id: cell(row, SPARE_CODE).to_string(),
                name: cell(row, PRODUCT).to_string(),
                qty: parse_quantity(cell(row, QUANTITY)),
                technician: cell(row, TECHNICIAN).to_string(),
            })
            .collect::<Vec<_>>();

        debug!(
            store = %self.technician.label(),
            technician = %wanted,
            count = stock.len(),
            "fetched technician stock"
        );
        Ok(stock)
    }

    /// Reduce central stock for `spare_id`. Returns the new on-hand quantity.
    pub async fn debit_central(&self, spare_id: &str, qty: u64) -> Result<i64, CourierError> {
        use central_columns::*;

        let spare_id = spare_id.trim();
        let _guard = self.locks.acquire(format!("central:{spare_id}")).await;

        let row = self
            .central
            .find_row(SPARE_CODE, spare_id)
            .await?
            .ok_or_else(|| CourierError::not_found("spare", spare_id))?;

        let current = parse_quantity(&self.central.read_cell(row, QUANTITY).await?);
        let updated = current.saturating_sub(i64::try_from(qty).unwrap_or(i64::MAX));
        if updated < 0 {
            return Err(CourierError::InsufficientStock {
                spare_id: spare_id.to_string(),
                available: current,
                requested: qty,
            });
        }

        self.central
            .write_cell(row, QUANTITY, &updated.to_string())
            .await?;
        info!(
            spare_id,
            reduced_by = qty,
            was = current,
            now = updated,
            "central stock debited"
        );
        Ok(updated)
    }

    /// Increase a technician's stock for `spare_id`, appending a row on first credit.
    /// Returns the new on-hand quantity.
    pub async fn credit_technician(
        &self,
        identity: &str,
        spare_id: &str,
        qty: u64,
    ) -> Result<i64, CourierError> {
        use technician_columns::*;

        let identity = normalize_identity(identity);
        let spare_id = spare_id.trim();
        if identity.is_empty() {
            return Err(CourierError::Validation(
                "technician identity must not be blank".to_string(),
            ));
        }
        let _guard = self
            .locks
            .acquire(format!("technician:{identity}:{spare_id}"))
            .await;
        let added = i64::try_from(qty).unwrap_or(i64::MAX);

        let rows = self.technician.read_all_rows().await?;
        let found = rows.iter().enumerate().skip(1).find(|(_, row)| {
            cell(row, SPARE_CODE) == spare_id
                && normalize_identity(cell(row, TECHNICIAN)) == identity
        });

        if let Some((idx, _)) = found {
            let row = idx + 1;
            let current = parse_quantity(&self.technician.read_cell(row, QUANTITY).await?);
            let updated = current.saturating_add(added);
            self.technician
                .write_cell(row, QUANTITY, &updated.to_string())
                .await?;
            info!(
                technician = %identity,
                spare_id,
                added = qty,
                was = current,
                now = updated,
                "technician stock credited"
            );
            return Ok(updated);
        }

        let central = self.fetch_central_stock().await?;
        let entry = central
            .iter()
            .find(|entry| entry.spare_id == spare_id)
            .ok_or_else(|| CourierError::not_found("spare", spare_id))?;

        self.technician
            .append_row(vec![
                entry.name.clone(),
                spare_id.to_string(),
                added.to_string(),
                identity.clone(),
            ])
            .await?;
        info!(
            technician = %identity,
            spare_id,
            name = %entry.name,
            qty,
            "technician stock row added"
        );
        Ok(added)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::rowstore::MemoryRowStore;
    use proptest::prelude::*;

    pub(crate) fn central_row(spare_id: &str, name: &str, mrp: &str, qty: &str) -> Vec<String> {
        vec![
            "1".to_string(),
            spare_id.to_string(),
            name.to_string(),
            mrp.to_string(),
            "8516".to_string(),
            "Acme".to_string(),
            qty.to_string(),
        ]
    }

    pub(crate) fn tech_row(name: &str, spare_id: &str, qty: &str, tech: &str) -> Vec<String> {
        vec![
            name.to_string(),
            spare_id.to_string(),
            qty.to_string(),
            tech.to_string(),
        ]
    }

    fn ledger_with(
        central: Vec<Vec<String>>,
        technician: Vec<Vec<String>>,
    ) -> (StockLedger, Arc<MemoryRowStore>, Arc<MemoryRowStore>) {
        let central = Arc::new(MemoryRowStore::with_rows(
            "Mrp List",
            &central_columns::HEADER,
            central,
        ));
        let technician = Arc::new(MemoryRowStore::with_rows(
            "Technician Stocks",
            &technician_columns::HEADER,
            technician,
        ));
        (
            StockLedger::new(central.clone(), technician.clone()),
            central,
            technician,
        )
    }

    #[test]
    fn malformed_cells_parse_as_zero() {
        assert_eq!(parse_quantity(""), 0);
        assert_eq!(parse_quantity("#N/A"), 0);
        assert_eq!(parse_quantity("abc"), 0);
        assert_eq!(parse_quantity("1,250"), 1250);
        assert_eq!(parse_quantity(" 12.9 "), 12);
        assert_eq!(parse_price("1,499.50"), 1499.5);
        assert_eq!(parse_price("NaN"), 0.0);
    }

    #[test]
    fn identity_normalisation_collapses_case_and_whitespace() {
        assert_eq!(normalize_identity("  Arun   Kakkodi "), "arun kakkodi");
        assert_eq!(normalize_identity("AMAL"), "amal");
    }

    proptest! {
        #[test]
        fn parsing_never_panics(raw in ".*") {
            let _ = parse_quantity(&raw);
            let price = parse_price(&raw);
            prop_assert!(price.is_finite());
        }
    }

    #[tokio::test]
    async fn central_snapshot_skips_header_and_blank_spare_rows() {
        let (ledger, _, _) = ledger_with(
            vec![
                central_row("A1", " Fan motor ", "250", "10"),
                central_row("", "orphan", "1", "1"),
                central_row("B2", "Capacitor", "n/a", "#N/A"),
                vec!["3".to_string(), "C3".to_string()],
            ],
            vec![],
        );

        let stock = ledger.fetch_central_stock().await.unwrap();
        assert_eq!(stock.len(), 3);
        assert_eq!(stock[0].name, "Fan motor");
        assert_eq!(stock[0].qty, 10);
        assert_eq!(stock[1].mrp, 0.0);
        assert_eq!(stock[1].qty, 0);
        assert_eq!(stock[2].spare_id, "C3");
        assert_eq!(stock[2].qty, 0);
    }

    #[tokio::test]
    async fn technician_snapshot_matches_identity_case_insensitively() {
        let (ledger, _, _) = ledger_with(
            vec![],
            vec![
                tech_row("Fan motor", "A1", "2", "Arun  Kakkodi"),
                tech_row("Capacitor", "B2", "5", "amal"),
                tech_row("Relay", "C3", "x", " ARUN KAKKODI "),
            ],
        );

        let stock = ledger.fetch_technician_stock("arun kakkodi").await.unwrap();
        assert_eq!(stock.len(), 2);
        assert_eq!(stock[1].qty, 0);
    }

    #[tokio::test]
    async fn debit_rejects_underflow_without_writing() {
        let (ledger, central, _) = ledger_with(vec![central_row("A1", "Fan", "250", "3")], vec![]);

        let err = ledger.debit_central("A1", 4).await.unwrap_err();
        assert!(matches!(
            err,
            CourierError::InsufficientStock {
                available: 3,
                requested: 4,
                ..
            }
        ));
        assert_eq!(central.read_cell(2, central_columns::QUANTITY).await.unwrap(), "3");

        assert_eq!(ledger.debit_central("A1", 3).await.unwrap(), 0);
        assert_eq!(central.read_cell(2, central_columns::QUANTITY).await.unwrap(), "0");
    }

    #[tokio::test]
    async fn debit_unknown_spare_is_not_found() {
        let (ledger, _, _) = ledger_with(vec![central_row("A1", "Fan", "250", "3")], vec![]);
        let err = ledger.debit_central("Z9", 1).await.unwrap_err();
        assert!(matches!(err, CourierError::NotFound { .. }));
    }

    #[tokio::test]
    async fn credit_updates_existing_row_or_appends() {
        let (ledger, _, technician) = ledger_with(
            vec![central_row("A1", "Fan motor", "250", "10"), central_row("B2", "Capacitor", "40", "5")],
            vec![tech_row("Fan motor", "A1", "2", "Amal")],
        );

        assert_eq!(ledger.credit_technician(" AMAL ", "A1", 3).await.unwrap(), 5);
        assert_eq!(ledger.credit_technician("amal", "B2", 4).await.unwrap(), 4);

        let rows = technician.snapshot().await;
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1][2], "5");
        assert_eq!(rows[2], tech_row("Capacitor", "B2", "4", "amal"));
    }

    #[tokio::test]
    async fn credit_for_spare_missing_from_central_fails() {
        let (ledger, _, technician) = ledger_with(vec![], vec![]);
        let err = ledger.credit_technician("amal", "Z9", 1).await.unwrap_err();
        assert!(matches!(err, CourierError::NotFound { .. }));
        assert_eq!(technician.snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_debits_on_one_spare_do_not_lose_updates() {
        let (ledger, central, _) =
            ledger_with(vec![central_row("A1", "Fan", "250", "100")], vec![]);
        let ledger = Arc::new(ledger);

        let mut tasks = Vec::new();
        for _ in 0..20 {
            let ledger = ledger.clone();
            tasks.push(tokio::spawn(async move { ledger.debit_central("A1", 5).await }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(central.read_cell(2, central_columns::QUANTITY).await.unwrap(), "0");
    }

    #[tokio::test]
    async fn released_keys_do_not_accumulate() {
        let locks = Arc::new(KeyedLocks::default());
        for spare in ["A1", "B2", "C3"] {
            let _guard = locks.acquire(format!("central:{spare}")).await;
        }
        assert_eq!(locks.len(), 0);

        let first = locks.acquire("central:A1".to_string()).await;
        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire("central:A1".to_string()).await;
            })
        };
        tokio::task::yield_now().await;

        // The waiter still needs the entry after the first holder lets go.
        drop(first);
        assert_eq!(locks.len(), 1);

        waiter.await.unwrap();
        assert_eq!(locks.len(), 0);
    }
}
