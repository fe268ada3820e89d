//! Google Sheets v4 row store.

use crate::token::TokenCache;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use techfix_core::rowstore::{column_letter, RowStore, RowStoreError};
use tracing::debug;

pub const DEFAULT_API_BASE: &str = "https://sheets.googleapis.com/v4";

/// Spreadsheet-level settings shared by every tab.
#[derive(Debug, Clone)]
pub struct SheetsConfig {
    pub spreadsheet_id: String,
    pub api_base: String,
    pub request_timeout: Duration,
}

impl SheetsConfig {
    pub fn new(spreadsheet_id: impl Into<String>) -> Self {
        Self {
            spreadsheet_id: spreadsheet_id.into(),
            api_base: DEFAULT_API_BASE.to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ValueRangeBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    range: Option<&'a str>,
    major_dimension: &'static str,
    values: Vec<Vec<String>>,
}

/// One tab of a Google spreadsheet.
///
/// Every operation is a single API call. A 401 response drops the cached token and
/// repeats the call once with a fresh one.
pub struct GoogleSheetsRowStore {
    client: Client,
    config: SheetsConfig,
    tab: String,
    token: Arc<TokenCache>,
}

impl GoogleSheetsRowStore {
    pub fn new(
        config: SheetsConfig,
        tab: impl Into<String>,
        token: Arc<TokenCache>,
    ) -> Result<Self, RowStoreError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| RowStoreError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            config: SheetsConfig {
                api_base: config.api_base.trim_end_matches('/').to_string(),
                ..config
            },
            tab: tab.into(),
            token,
        })
    }

    fn quoted_tab(&self) -> String {
        format!("'{}'", self.tab.replace('\'', "''"))
    }

    fn cell_range(&self, row: usize, column: usize) -> String {
        format!("{}!{}{}", self.quoted_tab(), column_letter(column), row)
    }

    fn values_url(&self, range: &str) -> Result<Url, RowStoreError> {
        let mut url = Url::parse(&self.config.api_base)
            .map_err(|e| RowStoreError::Transport(format!("invalid api base: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| RowStoreError::Transport("api base cannot carry a path".to_string()))?
            .pop_if_empty()
            .push("spreadsheets")
            .push(&self.config.spreadsheet_id)
            .push("values")
            .push(range);
        Ok(url)
    }

    async fn send<F>(&self, operation: &str, build: F) -> Result<Response, RowStoreError>
    where
        F: Fn(&str) -> RequestBuilder,
    {
        let bearer = self.token.bearer().await?;
        let response = build(&bearer).send().await.map_err(transport)?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return check(operation, response).await;
        }

        debug!(tab = %self.tab, operation, "sheets token rejected, re-authenticating");
        self.token.invalidate().await;
        let bearer = self.token.bearer().await?;
        let response = build(&bearer).send().await.map_err(transport)?;
        check(operation, response).await
    }

    async fn read_range(&self, range: &str) -> Result<Vec<Vec<String>>, RowStoreError> {
        let url = self.values_url(range)?;
        debug!(tab = %self.tab, range, "sheets values.get");
        let response = self
            .send("values.get", |bearer| {
                self.client
                    .get(url.clone())
                    .query(&[("valueRenderOption", "FORMATTED_VALUE")])
                    .bearer_auth(bearer)
            })
            .await?;
        let body: ValueRange = response
            .json()
            .await
            .map_err(|e| RowStoreError::Decode(e.to_string()))?;
        Ok(body
            .values
            .into_iter()
            .map(|row| row.iter().map(cell_text).collect())
            .collect())
    }
}

#[async_trait]
impl RowStore for GoogleSheetsRowStore {
    fn label(&self) -> String {
        format!("sheets:{}/{}", self.config.spreadsheet_id, self.tab)
    }

    async fn read_all_rows(&self) -> Result<Vec<Vec<String>>, RowStoreError> {
        self.read_range(&self.quoted_tab()).await
    }

    async fn find_row(&self, column: usize, value: &str) -> Result<Option<usize>, RowStoreError> {
        if column == 0 {
            return Err(RowStoreError::OutOfRange { row: 0, column });
        }
        let letter = column_letter(column);
        let range = format!("{}!{letter}:{letter}", self.quoted_tab());
        let needle = value.trim();
        let rows = self.read_range(&range).await?;
        Ok(rows
            .iter()
            .enumerate()
            .skip(1)
            .find(|(_, row)| row.first().map(|cell| cell.trim() == needle).unwrap_or(false))
            .map(|(idx, _)| idx + 1))
    }

    async fn read_cell(&self, row: usize, column: usize) -> Result<String, RowStoreError> {
        if row == 0 || column == 0 {
            return Err(RowStoreError::OutOfRange { row, column });
        }
        let rows = self.read_range(&self.cell_range(row, column)).await?;
        Ok(rows
            .into_iter()
            .next()
            .and_then(|cells| cells.into_iter().next())
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
        let range = self.cell_range(row, column);
        let url = self.values_url(&range)?;
        let body = ValueRangeBody {
            range: Some(&range),
            major_dimension: "ROWS",
            values: vec![vec![value.to_string()]],
        };
        debug!(tab = %self.tab, range = %range, "sheets values.update");
        self.send("values.update", |bearer| {
            self.client
                .put(url.clone())
                .query(&[("valueInputOption", "USER_ENTERED")])
                .bearer_auth(bearer)
                .json(&body)
        })
        .await?;
        Ok(())
    }

    async fn append_row(&self, values: Vec<String>) -> Result<(), RowStoreError> {
        let url = self.values_url(&format!("{}!A1:append", self.quoted_tab()))?;
        let body = ValueRangeBody {
            range: None,
            major_dimension: "ROWS",
            values: vec![values],
        };
        debug!(tab = %self.tab, "sheets values.append");
        self.send("values.append", |bearer| {
            self.client
                .post(url.clone())
                .query(&[
                    ("valueInputOption", "USER_ENTERED"),
                    ("insertDataOption", "INSERT_ROWS"),
                ])
                .bearer_auth(bearer)
                .json(&body)
        })
        .await?;
        Ok(())
    }
}

fn transport(err: reqwest::Error) -> RowStoreError {
    RowStoreError::Transport(err.to_string())
}

async fn check(operation: &str, response: Response) -> Result<Response, RowStoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(RowStoreError::Auth(format!(
            "{operation} returned {}: {message}",
            status.as_u16()
        )));
    }
    Err(RowStoreError::Rejected {
        status: status.as_u16(),
        message,
    })
}

/// Display text of a cell value; numbers and booleans are stringified.
fn cell_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
