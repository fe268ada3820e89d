use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

/// Row-store communication failures.
#[derive(Debug, Clone, Error)]
pub enum RowStoreError {
    #[error("row-store transport failed: {0}")]
    Transport(String),

    #[error("row-store rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("row-store authentication failed: {0}")]
    Auth(String),

    #[error("row-store response could not be decoded: {0}")]
    Decode(String),

    #[error("row-store address out of range: row {row}, column {column}")]
    OutOfRange { row: usize, column: usize },
}

/// One tab of an external spreadsheet-like data source.
///
/// Rows and columns are 1-based, matching spreadsheet addressing. Row 1 is the
/// header row. No operation is transactional; every call is a separate round trip.
#[async_trait]
pub trait RowStore: Send + Sync {
    fn label(&self) -> String;

    /// All rows, header included, with cells as displayed strings.
    async fn read_all_rows(&self) -> Result<Vec<Vec<String>>, RowStoreError>;

    /// First data row whose `column` cell equals `value` after trimming.
    async fn find_row(&self, column: usize, value: &str) -> Result<Option<usize>, RowStoreError>;

    async fn read_cell(&self, row: usize, column: usize) -> Result<String, RowStoreError>;

    async fn write_cell(&self, row: usize, column: usize, value: &str)
        -> Result<(), RowStoreError>;

    async fn append_row(&self, values: Vec<String>) -> Result<(), RowStoreError>;
}

/// Spreadsheet column letters for a 1-based column index (1 -> A, 27 -> AA).
pub fn column_letter(column: usize) -> String {
    let mut remaining = column;
    let mut letters = Vec::new();
    while remaining > 0 {
        let rem = (remaining - 1) % 26;
        letters.push(char::from(b'A' + rem as u8));
        remaining = (remaining - 1) / 26;
    }
    letters.iter().rev().collect()
}

/// Process-local row store used for development and tests.
#[derive(Debug, Default)]
pub struct MemoryRowStore {
    label: String,
    rows: RwLock<Vec<Vec<String>>>,
}

impl MemoryRowStore {
    pub fn new(label: impl Into<String>, header: &[&str]) -> Self {
        Self {
            label: label.into(),
            rows: RwLock::new(vec![header.iter().map(|cell| cell.to_string()).collect()]),
        }
    }

    pub fn with_rows(
        label: impl Into<String>,
        header: &[&str],
        rows: Vec<Vec<String>>,
    ) -> Self {
        let mut all = vec![header.iter().map(|cell| cell.to_string()).collect::<Vec<_>>()];
        all.extend(rows);
        Self {
            label: label.into(),
            rows: RwLock::new(all),
        }
    }

    pub async fn snapshot(&self) -> Vec<Vec<String>> {
        self.rows.read().await.clone()
    }
}

#[async_trait]
impl RowStore for MemoryRowStore {
    fn label(&self) -> String {
        format!("memory:{}", self.label)
    }

    async fn read_all_rows(&self) -> Result<Vec<Vec<String>>, RowStoreError> {
        Ok(self.rows.read().await.clone())
    }

    async fn find_row(&self, column: usize, value: &str) -> Result<Option<usize>, RowStoreError> {
        if column == 0 {
            return Err(RowStoreError::OutOfRange { row: 0, column });
        }
        let needle = value.trim();
        let rows = self.rows.read().await;
        Ok(rows
            .iter()
            .enumerate()
            .skip(1)
            .find(|(_, row)| {
                row.get(column - 1)
                    .map(|cell| cell.trim() == needle)
                    .unwrap_or(false)
            })
            .map(|(idx, _)| idx + 1))
    }

    async fn read_cell(&self, row: usize, column: usize) -> Result<String, RowStoreError> {
        if row == 0 || column == 0 {
            return Err(RowStoreError::OutOfRange { row, column });
        }
        let rows = self.rows.read().await;
        Ok(rows
            .get(row - 1)
            .and_then(|cells| cells.get(column - 1))
            .cloned()
            .unwrap_or_default())
    }

    async fn write_cell(
        &self,
        row: usize,
        column: usize,
        value: &str,
    ) -> Result<(), RowStoreError> {
        if row == 0 || column == 0 {
            return Err(RowStoreError::OutOfRange { row, column });
        }
        let mut rows = self.rows.write().await;
        if rows.len() < row {
            rows.resize_with(row, Vec::new);
        }
        let cells = &mut rows[row - 1];
        if cells.len() < column {
            cells.resize(column, String::new());
        }
        cells[column - 1] = value.to_string();
        Ok(())
    }

    async fn append_row(&self, values: Vec<String>) -> Result<(), RowStoreError> {
        self.rows.write().await.push(values);
        Ok(())
    }
}
