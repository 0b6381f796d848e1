//! Append-only stock ledger boundary.
//!
//! This module defines the storage abstraction for ledger entries without
//! making storage assumptions, plus an in-memory implementation.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryLedgerStore;
pub use r#trait::{DateRange, LedgerStore, LedgerStoreError, validate_batch};
