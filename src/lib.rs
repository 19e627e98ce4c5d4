#![doc = include_str!("../README.md")]
pub mod amount;
pub mod auth;
pub mod client;
pub mod model;
pub mod report;

#[cfg(test)]
mod test_utils;

pub use amount::Amount;
pub use auth::AuthContext;
pub use client::{ApiConfig, FetchSummary, HttpTransport, ReceiptClient, Transport};
pub use model::{BoughtItem, Receipt, ReceiptItem, Receipts, ReceiptSummary};
pub use report::Report;
