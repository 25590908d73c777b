//! Aggregate module
//!
//! Ledger aggregates: the per-currency balance slot and the entries posted against it.

pub mod balance;
pub mod entry;

pub use balance::AccountBalance;
pub use entry::{EntryType, LedgerEntry, NewEntry};
