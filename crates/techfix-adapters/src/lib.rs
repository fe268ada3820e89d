//! Row-store adapters for Techfix.
//!
//! The Google Sheets implementation of [`techfix_core::RowStore`] plus the access
//! token sources it authenticates with.

#![deny(unsafe_code)]

pub mod sheets;
pub mod token;

pub use sheets::{GoogleSheetsRowStore, SheetsConfig, DEFAULT_API_BASE};
pub use token::{
    AccessToken, MetadataServerTokenSource, ServiceAccountKey, ServiceAccountTokenSource,
    StaticTokenSource, TokenCache, TokenSource, DEFAULT_METADATA_TOKEN_URL, DEFAULT_TOKEN_URI,
    SHEETS_SCOPE,
};
