use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Operator or technician account. Staff accounts may dispatch couriers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Account {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub is_staff: bool,
}

impl Account {
    pub fn new(id: i64, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            first_name: String::new(),
            last_name: String::new(),
            email: String::new(),
            is_staff: false,
        }
    }

    pub fn staff(mut self) -> Self {
        self.is_staff = true;
        self
    }

    pub fn with_name(mut self, first: impl Into<String>, last: impl Into<String>) -> Self {
        self.first_name = first.into();
        self.last_name = last.into();
        self
    }

    pub fn full_name(&self) -> String {
        let joined = format!("{} {}", self.first_name, self.last_name);
        let trimmed = joined.trim();
        if trimmed.is_empty() {
            self.username.clone()
        } else {
            trimmed.to_string()
        }
    }
}

/// One line of a courier dispatch, snapshotted at creation time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CourierItem {
    pub spare_id: String,
    pub name: String,
    pub qty: u32,
    pub mrp: f64,
    #[serde(default)]
    pub brand: String,
    #[serde(default)]
    pub hsn: String,
}

impl CourierItem {
    pub fn new(spare_id: impl Into<String>, name: impl Into<String>, qty: u32, mrp: f64) -> Self {
        Self {
            spare_id: spare_id.into(),
            name: name.into(),
            qty,
            mrp,
            brand: String::new(),
            hsn: String::new(),
        }
    }

    pub fn line_total(&self) -> f64 {
        f64::from(self.qty) * self.mrp
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CourierStatus {
    InTransit,
    Received,
}

impl CourierStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InTransit => "in_transit",
            Self::Received => "received",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "in_transit" => Some(Self::InTransit),
            "received" => Some(Self::Received),
            _ => None,
        }
    }
}

/// Durable record of one dispatch event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourierTransaction {
    pub id: i64,
    pub courier_id: String,
    pub created_by: Option<i64>,
    pub recipients: Vec<i64>,
    pub status: CourierStatus,
    pub items: Vec<CourierItem>,
    pub notes: String,
    pub document: Option<String>,
    pub sent_time: DateTime<Utc>,
    pub received_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CourierTransaction {
    pub fn total_amount(&self) -> f64 {
        self.items.iter().map(CourierItem::line_total).sum()
    }

    pub fn is_recipient(&self, account_id: i64) -> bool {
        self.recipients.contains(&account_id)
    }

    /// Total dispatched quantity per spare id (items may repeat a spare).
    pub fn dispatched_qty(&self, spare_id: &str) -> Option<u64> {
        let mut found = false;
        let mut total = 0u64;
        for item in self.items.iter().filter(|item| item.spare_id == spare_id) {
            found = true;
            total += u64::from(item.qty);
        }
        found.then_some(total)
    }
}

/// Insert payload for the courier store; the store assigns the primary key.
#[derive(Debug, Clone)]
pub struct NewCourier {
    pub courier_id: String,
    pub created_by: Option<i64>,
    pub recipients: Vec<i64>,
    pub items: Vec<CourierItem>,
    pub notes: String,
    pub sent_time: DateTime<Utc>,
}

/// Link between an account and the identity keying its rows in the technician sheet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TechnicianStockBinding {
    pub id: i64,
    pub account_id: i64,
    pub sheet_identity: Option<String>,
    pub sheet_id: Option<String>,
    pub last_sync: Option<DateTime<Utc>>,
}

impl TechnicianStockBinding {
    /// The bound identity, if present and non-blank.
    pub fn identity(&self) -> Option<&str> {
        self.sheet_identity
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBinding {
    pub account_id: i64,
    pub sheet_identity: Option<String>,
    pub sheet_id: Option<String>,
}

/// A recipient's claim of one received spare.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReceivedItem {
    pub spare_id: String,
    pub qty: u32,
}

impl ReceivedItem {
    pub fn new(spare_id: impl Into<String>, qty: u32) -> Self {
        Self {
            spare_id: spare_id.into(),
            qty,
        }
    }
}

/// Row of the central ("Mrp List") stock sheet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CentralStockEntry {
    pub spare_id: String,
    pub name: String,
    pub mrp: f64,
    pub hsn: String,
    pub brand: String,
    pub qty: i64,
}

/// Row of the combined technician stock sheet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TechnicianStockEntry {
    pub spare_id: String,
    pub name: String,
    pub qty: i64,
    pub technician: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MovementLeg {
    Debit,
    Credit,
}

impl MovementLeg {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debit => "debit",
            Self::Credit => "credit",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "debit" => Some(Self::Debit),
            "credit" => Some(Self::Credit),
            _ => None,
        }
    }
}

/// Journal row for one applied ledger leg of a receipt confirmation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReceiptMovement {
    pub courier_pk: i64,
    pub recipient_id: i64,
    pub spare_id: String,
    pub leg: MovementLeg,
    pub qty: u64,
    pub applied_at: DateTime<Utc>,
}

/// Filter for courier listings.
#[derive(Debug, Clone, Default)]
pub struct CourierFilter {
    pub status: Option<CourierStatus>,
    pub recipient: Option<i64>,
}

impl CourierFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: Option<CourierStatus>) -> Self {
        self.status = status;
        self
    }

    pub fn for_recipient(mut self, account_id: i64) -> Self {
        self.recipient = Some(account_id);
        self
    }

    pub fn matches(&self, courier: &CourierTransaction) -> bool {
        self.status.map_or(true, |status| courier.status == status)
            && self
                .recipient
                .map_or(true, |account_id| courier.is_recipient(account_id))
    }
}
