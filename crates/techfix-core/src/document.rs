//! Courier receipt rendering and archival.

use crate::error::CourierError;
use crate::types::{Account, CourierTransaction};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("receipt archive IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid receipt reference '{0}'")]
    InvalidReference(String),
}

impl From<ArchiveError> for CourierError {
    fn from(err: ArchiveError) -> Self {
        CourierError::Storage(err.to_string())
    }
}

const RULE_WIDTH: usize = 78;

/// Plain-text receipt layout for one courier.
pub struct Receipt<'a> {
    courier: &'a CourierTransaction,
    sender: String,
    recipients: String,
}

impl<'a> Receipt<'a> {
    pub fn new(
        courier: &'a CourierTransaction,
        sender: Option<&Account>,
        recipients: &[Account],
    ) -> Self {
        let sender = sender
            .map(Account::full_name)
            .unwrap_or_else(|| "Unknown".to_string());
        let recipients = if recipients.is_empty() {
            "-".to_string()
        } else {
            recipients
                .iter()
                .map(Account::full_name)
                .collect::<Vec<_>>()
                .join(", ")
        };
        Self {
            courier,
            sender,
            recipients,
        }
    }
}

impl fmt::Display for Receipt<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let courier = self.courier;
        let rule = "=".repeat(RULE_WIDTH);
        let thin = "-".repeat(RULE_WIDTH);

        writeln!(f, "{rule}")?;
        writeln!(f, "{:^width$}", "COURIER TRANSACTION RECEIPT", width = RULE_WIDTH)?;
        writeln!(f, "{rule}")?;
        writeln!(f, "Courier ID : {}", courier.courier_id)?;
        writeln!(f, "Sent by    : {}", self.sender)?;
        writeln!(
            f,
            "Date       : {}",
            courier.sent_time.format("%Y-%m-%d %H:%M UTC")
        )?;
        writeln!(f, "Recipients : {}", self.recipients)?;
        writeln!(f)?;
        writeln!(
            f,
            "{:<14} {:<24} {:<10} {:>6} {:>9} {:>10}",
            "Spare ID", "Name", "Brand", "Qty", "MRP", "Total"
        )?;
        writeln!(f, "{thin}")?;
        for item in &courier.items {
            writeln!(
                f,
                "{:<14} {:<24} {:<10} {:>6} {:>9.2} {:>10.2}",
                clip(&item.spare_id, 14),
                clip(&item.name, 24),
                clip(&item.brand, 10),
                item.qty,
                item.mrp,
                item.line_total()
            )?;
        }
        writeln!(f, "{thin}")?;
        writeln!(
            f,
            "{:>width$}",
            format!("TOTAL: {:.2}", courier.total_amount()),
            width = RULE_WIDTH
        )?;

        let notes = courier.notes.trim();
        if !notes.is_empty() {
            writeln!(f)?;
            writeln!(f, "Notes: {notes}")?;
        }

        writeln!(f)?;
        writeln!(f, "{thin}")?;
        writeln!(
            f,
            "Computer-generated receipt. Confirm receipt in the Techfix app on delivery."
        )
    }
}

/// Render the plain-text receipt for a freshly created courier.
pub fn render_receipt(
    courier: &CourierTransaction,
    sender: Option<&Account>,
    recipients: &[Account],
) -> String {
    Receipt::new(courier, sender, recipients).to_string()
}

fn clip(value: &str, width: usize) -> String {
    if value.chars().count() <= width {
        value.to_string()
    } else {
        let mut clipped = value.chars().take(width.saturating_sub(1)).collect::<String>();
        clipped.push('~');
        clipped
    }
}

/// Archive-relative reference for a courier's receipt.
pub fn receipt_reference(courier_id: &str) -> String {
    format!("couriers/{courier_id}.txt")
}

/// Storage for rendered receipts, addressed by archive-relative reference.
#[async_trait]
pub trait ReceiptArchive: Send + Sync {
    /// Store a receipt body and return its reference.
    async fn store(&self, courier_id: &str, body: &str) -> Result<String, ArchiveError>;

    async fn load(&self, reference: &str) -> Result<Option<String>, ArchiveError>;
}

/// Receipts as files under a root directory.
#[derive(Debug, Clone)]
pub struct FsReceiptArchive {
    root: PathBuf,
}

impl FsReceiptArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, reference: &str) -> Result<PathBuf, ArchiveError> {
        let relative = Path::new(reference);
        let safe = !reference.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !safe {
            return Err(ArchiveError::InvalidReference(reference.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ReceiptArchive for FsReceiptArchive {
    async fn store(&self, courier_id: &str, body: &str) -> Result<String, ArchiveError> {
        let reference = receipt_reference(courier_id);
        let path = self.resolve(&reference)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, body.as_bytes()).await?;
        fs::rename(&tmp_path, &path).await?;
        Ok(reference)
    }

    async fn load(&self, reference: &str) -> Result<Option<String>, ArchiveError> {
        let path = self.resolve(reference)?;
        match fs::read_to_string(&path).await {
            Ok(body) => Ok(Some(body)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

/// Process-local archive for tests and memory deployments.
#[derive(Debug, Default)]
pub struct MemoryReceiptArchive {
    receipts: RwLock<HashMap<String, String>>,
}

impl MemoryReceiptArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.receipts.read().await.len()
    }
}

#[async_trait]
impl ReceiptArchive for MemoryReceiptArchive {
    async fn store(&self, courier_id: &str, body: &str) -> Result<String, ArchiveError> {
        let reference = receipt_reference(courier_id);
        self.receipts
            .write()
            .await
            .insert(reference.clone(), body.to_string());
        Ok(reference)
    }

    async fn load(&self, reference: &str) -> Result<Option<String>, ArchiveError> {
        Ok(self.receipts.read().await.get(reference).cloned())
    }
}
