//! Inventory domain module.
//!
//! Item references, the immutable stock ledger entry, the materialized balance,
//! reservations, and the single-step stock documents (adjustment, transfer).
//! Everything here is deterministic domain logic (no IO, no locking, no storage).

pub mod adjustment;
pub mod balance;
pub mod document;
pub mod effect;
pub mod item;
pub mod ledger;
pub mod reservation;
pub mod transfer;

pub use adjustment::{
    AdjustmentLine, AdjustmentLineDraft, CreateStockAdjustment, PostStockAdjustment,
    StockAdjustment, StockAdjustmentAction, StockAdjustmentCommand, StockAdjustmentEvent,
    StockAdjustmentId, StockAdjustmentStatus,
};
pub use balance::StockBalance;
pub use document::StockDocument;
pub use effect::{ReservationOp, StockEffect, StockMovement};
pub use item::{BalanceKey, ItemRef};
pub use ledger::{MovementReason, NewLedgerEntry, StockLedgerEntry, reconstruct_quantity};
pub use reservation::{ReservationId, ReservationStatus, StockReservation};
pub use transfer::{
    CreateStockTransfer, PostStockTransfer, StockTransfer, StockTransferAction,
    StockTransferCommand, StockTransferEvent, StockTransferId, StockTransferStatus, TransferLine,
    TransferLineDraft,
};
