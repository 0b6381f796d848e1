use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use wareflow_core::{DocumentRef, DomainError, DomainResult, UserId, WarehouseId};

use crate::item::{BalanceKey, ItemRef};

/// Why stock moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementReason {
    Receipt,
    Issue,
    Adjustment,
    TransferIn,
    TransferOut,
}

impl MovementReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementReason::Receipt => "receipt",
            MovementReason::Issue => "issue",
            MovementReason::Adjustment => "adjustment",
            MovementReason::TransferIn => "transfer_in",
            MovementReason::TransferOut => "transfer_out",
        }
    }

    /// Whether `delta` has the sign this reason implies. Adjustments go either way.
    pub fn accepts(&self, delta: i64) -> bool {
        match self {
            MovementReason::Receipt | MovementReason::TransferIn => delta > 0,
            MovementReason::Issue | MovementReason::TransferOut => delta < 0,
            MovementReason::Adjustment => delta != 0,
        }
    }
}

/// A ledger entry ready to be appended (no sequence number or timestamp yet).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLedgerEntry {
    pub item: ItemRef,
    pub warehouse: WarehouseId,
    /// Signed quantity: positive = inbound, negative = outbound.
    pub delta: i64,
    pub reason: MovementReason,
    pub reference: DocumentRef,
    pub line_no: u32,
    pub posted_by: UserId,
}

impl NewLedgerEntry {
    pub fn key(&self) -> BalanceKey {
        BalanceKey::new(self.item, self.warehouse)
    }

    pub fn validate(&self) -> DomainResult<()> {
        if !self.reason.accepts(self.delta) {
            return Err(DomainError::validation(format!(
                "delta {} is not valid for a {} movement",
                self.delta,
                self.reason.as_str()
            )));
        }
        Ok(())
    }
}

/// Immutable record of one stock movement.
///
/// Once appended an entry is never updated or deleted; corrections are new
/// offsetting entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLedgerEntry {
    pub entry_id: Uuid,
    /// Monotonically assigned position in the ledger (starts at 1).
    pub sequence: u64,
    pub item: ItemRef,
    pub warehouse: WarehouseId,
    pub delta: i64,
    pub reason: MovementReason,
    pub reference: DocumentRef,
    pub line_no: u32,
    pub posted_at: DateTime<Utc>,
    pub posted_by: UserId,
}

impl StockLedgerEntry {
    pub fn key(&self) -> BalanceKey {
        BalanceKey::new(self.item, self.warehouse)
    }
}

/// Sum of ledger deltas: the quantity a balance must equal.
pub fn reconstruct_quantity<'a>(entries: impl IntoIterator<Item = &'a StockLedgerEntry>) -> i64 {
    entries.into_iter().map(|e| e.delta).sum()
}
