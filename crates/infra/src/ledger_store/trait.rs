use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use wareflow_core::DocumentRef;
use wareflow_inventory::{BalanceKey, NewLedgerEntry, StockLedgerEntry};

use std::sync::Arc;

/// Half-open posting-time window `[from, to)`; either bound may be open.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl DateRange {
    pub fn between(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
        }
    }

    pub fn since(from: DateTime<Utc>) -> Self {
        Self {
            from: Some(from),
            to: None,
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from.is_none_or(|from| at >= from) && self.to.is_none_or(|to| at < to)
    }
}

/// Ledger store operation error.
///
/// These are **infrastructure errors** as opposed to domain errors: a rejected
/// batch or a failing backend. Either way nothing from the batch is stored.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerStoreError {
    #[error("invalid append: {0}")]
    InvalidAppend(String),

    #[error("ledger storage failure: {0}")]
    Storage(String),
}

/// Append-only stock ledger.
///
/// The ledger is the source of truth for stock: every balance must be
/// re-derivable by summing the entries for its key.
///
/// ## Append Semantics
///
/// `append()`:
/// - Validates that every entry in the batch references the same document
/// - Validates each entry's delta against its movement reason
/// - Assigns entry ids, sequence numbers (global, starting at 1) and the
///   posting timestamp
/// - Persists the batch atomically (all or nothing)
///
/// There is deliberately no update or delete operation; corrections are new
/// offsetting entries.
pub trait LedgerStore: Send + Sync {
    /// Append a batch of entries for one reference document.
    fn append(
        &self,
        entries: Vec<NewLedgerEntry>,
    ) -> Result<Vec<StockLedgerEntry>, LedgerStoreError>;

    /// Entries for one (item, warehouse) key in sequence order, optionally
    /// restricted to a posting-time window.
    fn entries_for(
        &self,
        key: &BalanceKey,
        range: Option<DateRange>,
    ) -> Result<Vec<StockLedgerEntry>, LedgerStoreError>;

    /// Entries booked by one business document, in sequence order.
    fn entries_for_document(
        &self,
        reference: DocumentRef,
    ) -> Result<Vec<StockLedgerEntry>, LedgerStoreError>;
}

impl<S> LedgerStore for Arc<S>
where
    S: LedgerStore + ?Sized,
{
    fn append(
        &self,
        entries: Vec<NewLedgerEntry>,
    ) -> Result<Vec<StockLedgerEntry>, LedgerStoreError> {
        (**self).append(entries)
    }

    fn entries_for(
        &self,
        key: &BalanceKey,
        range: Option<DateRange>,
    ) -> Result<Vec<StockLedgerEntry>, LedgerStoreError> {
        (**self).entries_for(key, range)
    }

    fn entries_for_document(
        &self,
        reference: DocumentRef,
    ) -> Result<Vec<StockLedgerEntry>, LedgerStoreError> {
        (**self).entries_for_document(reference)
    }
}

/// Check the batch-level rules every backend enforces before storing.
pub fn validate_batch(entries: &[NewLedgerEntry]) -> Result<(), LedgerStoreError> {
    let Some(first) = entries.first() else {
        return Ok(());
    };

    for (idx, e) in entries.iter().enumerate() {
        if e.reference != first.reference {
            return Err(LedgerStoreError::InvalidAppend(format!(
                "batch references multiple documents (index {idx})"
            )));
        }
        e.validate()
            .map_err(|err| LedgerStoreError::InvalidAppend(format!("index {idx}: {err}")))?;
    }

    Ok(())
}
