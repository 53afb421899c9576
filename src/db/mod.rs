//! Database layer (SQLite sync ledger).

pub mod ledger;

pub use ledger::SyncLedger;
