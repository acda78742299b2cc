//! Double-Entry Ledger Core

pub mod store;
pub mod types;

pub use store::LedgerEngine;
pub use types::*;
